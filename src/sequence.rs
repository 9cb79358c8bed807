//! Climb animation sequences and a timeline player that reports back through messages.

use bevy_time::Stopwatch;
use tracing::debug;

use crate::prelude::*;

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_message::<ClimbCommitMarker>()
            .add_message::<SequenceCompleted>()
            .add_systems(
                schedule,
                advance_sequences.in_set(ClamberSystems::AdvanceSequences),
            );
    }
}

/// A climb-up animation. Anything that can tell when a point in it is reached can play it.
#[derive(Clone, Reflect, Debug, PartialEq)]
pub struct ClimbSequence {
    pub name: String,
    pub duration: Duration,
    /// Fraction of the sequence at which the character is moved onto the ledge.
    pub commit_at: f32,
    pub rate: f32,
}

impl ClimbSequence {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
            commit_at: 0.5,
            rate: 1.0,
        }
    }

    pub fn with_commit_at(mut self, commit_at: f32) -> Self {
        self.commit_at = commit_at.clamp(0.0, 1.0);
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.rate = rate;
        self
    }
}

/// Sent when a playing sequence reaches its commit point.
#[derive(Message, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClimbCommitMarker {
    pub entity: Entity,
}

/// Sent when a sequence ends, whether it played out or was cut short by the host's own
/// animation. The climb resolves either way.
#[derive(Message, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceCompleted {
    pub entity: Entity,
}

pub trait SequencePlayer {
    /// Starts `sequence`, replacing whatever was playing. Returns `false` if it could not be
    /// played.
    fn play(&mut self, sequence: &ClimbSequence, rate: f32) -> bool;

    /// Stops without reporting completion.
    fn stop(&mut self);
}

#[derive(Clone, Reflect, Debug)]
struct ActivePlayback {
    sequence: ClimbSequence,
    rate: f32,
    elapsed: Stopwatch,
    committed: bool,
}

/// Plays [`ClimbSequence`]s on a timer and emits [`ClimbCommitMarker`] and
/// [`SequenceCompleted`] for its entity.
#[derive(Component, Clone, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct SequencePlayback {
    active: Option<ActivePlayback>,
}

impl SequencePlayback {
    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    pub fn playing(&self) -> Option<&ClimbSequence> {
        self.active.as_ref().map(|active| &active.sequence)
    }
}

impl SequencePlayer for SequencePlayback {
    fn play(&mut self, sequence: &ClimbSequence, rate: f32) -> bool {
        if !(rate.is_finite() && rate > 0.0) {
            return false;
        }
        self.active = Some(ActivePlayback {
            sequence: sequence.clone(),
            rate,
            elapsed: Stopwatch::new(),
            committed: false,
        });
        true
    }

    fn stop(&mut self) {
        self.active = None;
    }
}

fn advance_sequences(
    mut players: Query<(Entity, &mut SequencePlayback)>,
    mut commits: MessageWriter<ClimbCommitMarker>,
    mut completions: MessageWriter<SequenceCompleted>,
    time: Res<Time>,
) {
    for (entity, mut player) in &mut players {
        let Some(active) = player.active.as_mut() else {
            continue;
        };
        active.elapsed.tick(time.delta().mul_f32(active.rate));

        let progress = if active.sequence.duration.is_zero() {
            1.0
        } else {
            active.elapsed.elapsed_secs() / active.sequence.duration.as_secs_f32()
        };
        if !active.committed && progress >= active.sequence.commit_at {
            active.committed = true;
            commits.write(ClimbCommitMarker { entity });
        }
        if progress >= 1.0 {
            debug!(%entity, sequence = %active.sequence.name, "climb sequence finished");
            player.active = None;
            completions.write(SequenceCompleted { entity });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::{message::Messages, system::RunSystemOnce as _};

    fn world_with_clock() -> World {
        let mut world = World::new();
        world.init_resource::<Time>();
        world.init_resource::<Messages<ClimbCommitMarker>>();
        world.init_resource::<Messages<SequenceCompleted>>();
        world
    }

    fn step(world: &mut World, millis: u64) {
        world
            .resource_mut::<Time>()
            .advance_by(Duration::from_millis(millis));
        world.run_system_once(advance_sequences).unwrap();
    }

    fn count<M: Message>(world: &World) -> usize {
        let messages = world.resource::<Messages<M>>();
        messages.iter_current_update_messages().count()
    }

    #[test]
    fn commit_then_completion() {
        let mut world = world_with_clock();
        let mut player = SequencePlayback::default();
        assert!(player.play(
            &ClimbSequence::new("climb", Duration::from_millis(1000)).with_commit_at(0.4),
            1.0,
        ));
        let entity = world.spawn(player).id();

        step(&mut world, 300);
        assert_eq!(count::<ClimbCommitMarker>(&world), 0);

        step(&mut world, 200);
        assert_eq!(count::<ClimbCommitMarker>(&world), 1);
        assert_eq!(count::<SequenceCompleted>(&world), 0);

        step(&mut world, 600);
        assert_eq!(count::<ClimbCommitMarker>(&world), 1);
        let completed: Vec<_> = world
            .resource::<Messages<SequenceCompleted>>()
            .iter_current_update_messages()
            .copied()
            .collect();
        assert_eq!(completed, [SequenceCompleted { entity }]);
        assert!(!world.get::<SequencePlayback>(entity).unwrap().is_playing());
    }

    #[test]
    fn rate_speeds_up_playback() {
        let mut world = world_with_clock();
        let mut player = SequencePlayback::default();
        player.play(&ClimbSequence::new("climb", Duration::from_millis(1000)), 4.0);
        let entity = world.spawn(player).id();

        step(&mut world, 300);
        assert_eq!(count::<SequenceCompleted>(&world), 1);
        assert!(!world.get::<SequencePlayback>(entity).unwrap().is_playing());
    }

    #[test]
    fn stopped_sequences_stay_silent() {
        let mut world = world_with_clock();
        let mut player = SequencePlayback::default();
        player.play(&ClimbSequence::new("climb", Duration::from_millis(100)), 1.0);
        player.stop();
        world.spawn(player);

        step(&mut world, 500);
        assert_eq!(count::<ClimbCommitMarker>(&world), 0);
        assert_eq!(count::<SequenceCompleted>(&world), 0);
    }

    #[test]
    fn rejects_nonsense_rates() {
        let mut player = SequencePlayback::default();
        let sequence = ClimbSequence::new("climb", Duration::from_millis(500));
        assert!(!player.play(&sequence, 0.0));
        assert!(!player.play(&sequence, f32::NAN));
        assert!(!player.is_playing());
    }
}
