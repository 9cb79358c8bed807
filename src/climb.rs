use bevy_time::Stopwatch;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    LedgeClimber,
    gate::{CollisionEvent, GateInput, GateRejection, RemoteProxy, Tags},
    movement::{self, CharacterMovement, MovementController, MovementMode},
    prelude::*,
    probe::{LedgeDescriptor, ProbeMiss, probe_ledge},
    query::{AvianWorld, CapsuleShape, WorldQuery},
    sequence::{ClimbCommitMarker, ClimbSequence, SequenceCompleted, SequencePlayback, SequencePlayer},
};

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_message::<CollisionEvent>()
            .add_message::<ClimbUpRequest>()
            .add_message::<DropFromLedgeRequest>()
            .add_message::<ClimbStateChanged>()
            .add_systems(
                schedule,
                (
                    handle_collisions,
                    handle_climb_up_requests,
                    handle_drop_requests,
                    handle_commit_markers,
                    handle_completed_sequences,
                    time_out_stuck_climbs,
                    publish_transitions,
                )
                    .chain()
                    .in_set(ClamberSystems::Climb),
            );
    }
}

#[derive(Default, Clone, Copy, Reflect, Debug, PartialEq, Eq, Hash)]
pub enum ClimbState {
    #[default]
    Idle,
    Hanging,
    Climbing,
}

#[derive(Clone, Reflect, Debug)]
pub struct ClimbConfig {
    /// Start climbing up as soon as the character hangs. Otherwise wait for a
    /// [`ClimbUpRequest`].
    pub auto_climb_up: bool,
    pub sequence: Option<ClimbSequence>,
    /// The sequence moves the character itself, so the commit step does not.
    pub uses_root_motion: bool,
    /// Climbs stuck in [`ClimbState::Climbing`] for longer than this are resolved anyway.
    pub sequence_timeout: Option<Duration>,
    /// How far past the edge the character is placed on commit.
    pub commit_step_forward: f32,
    /// Clearance between the capsule bottom and the ledge top on commit.
    pub commit_lift: f32,
    pub snap_down_trace: f32,
    pub snap_up_tolerance: f32,
}

impl Default for ClimbConfig {
    fn default() -> Self {
        Self {
            auto_climb_up: true,
            sequence: None,
            uses_root_motion: false,
            sequence_timeout: Some(Duration::from_secs(3)),
            commit_step_forward: 0.3,
            commit_lift: 0.02,
            snap_down_trace: 1.5,
            snap_up_tolerance: 0.12,
        }
    }
}

/// Asks a hanging character to climb up. Only needed without [`ClimbConfig::auto_climb_up`].
#[derive(Message, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClimbUpRequest {
    pub entity: Entity,
}

/// Lets go of the ledge a character is hanging from.
#[derive(Message, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DropFromLedgeRequest {
    pub entity: Entity,
}

#[derive(Message, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClimbStateChanged {
    pub entity: Entity,
    pub from: ClimbState,
    pub to: ClimbState,
}

#[derive(Error, Clone, Debug, PartialEq)]
pub enum AutoClimbError {
    #[error(transparent)]
    Gate(#[from] GateRejection),
    #[error(transparent)]
    Probe(#[from] ProbeMiss),
}

/// The parts of a character a climb moves around.
pub struct ClimbBody<'a> {
    pub entity: Entity,
    pub transform: &'a mut Transform,
    pub capsule: CapsuleShape,
    pub movement: Option<&'a mut dyn MovementController>,
    pub player: Option<&'a mut dyn SequencePlayer>,
}

impl<'a> ClimbBody<'a> {
    pub fn new(entity: Entity, transform: &'a mut Transform, capsule: CapsuleShape) -> Self {
        Self {
            entity,
            transform,
            capsule,
            movement: None,
            player: None,
        }
    }

    fn teleport(&mut self, translation: Vec3, facing: Vec3) {
        self.transform.translation = translation;
        self.transform.rotation = yaw_towards(facing);
    }

    fn snap_to_floor(&mut self, cfg: &ClimbConfig, world: &impl WorldQuery) {
        let snap = movement::snap_to_floor(
            world,
            self.transform,
            self.capsule,
            self.movement.as_deref(),
            cfg.snap_down_trace,
            cfg.snap_up_tolerance,
        );
        trace!(entity = %self.entity, ?snap, "snapped to floor");
    }
}

/// Rotation about the vertical axis only that makes `forward` point along `direction`.
fn yaw_towards(direction: Vec3) -> Quat {
    Quat::from_rotation_y(f32::atan2(-direction.x, -direction.z))
}

/// Climb state of one character. Transitions only happen through the methods here.
#[derive(Component, Clone, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct Climber {
    state: ClimbState,
    ledge: Option<LedgeDescriptor>,
    last_auto_climb: Option<f32>,
    climb_timer: Option<Stopwatch>,
    committed: bool,
    #[reflect(ignore)]
    transitions: Vec<(ClimbState, ClimbState)>,
}

impl Climber {
    pub fn state(&self) -> ClimbState {
        self.state
    }

    /// The ledge being climbed, if any.
    pub fn ledge(&self) -> Option<&LedgeDescriptor> {
        self.ledge.as_ref()
    }

    /// When the character last started hanging, `None` if it never has.
    pub fn last_auto_climb(&self) -> Option<f32> {
        self.last_auto_climb
    }

    pub fn is_busy(&self) -> bool {
        self.state != ClimbState::Idle
    }

    fn set_state(&mut self, entity: Entity, to: ClimbState) {
        let from = std::mem::replace(&mut self.state, to);
        debug!(%entity, ?from, ?to, "climb state changed");
        self.transitions.push((from, to));
    }

    /// Runs a collision through the gate and the probe, and starts hanging if both pass.
    pub fn try_auto_climb(
        &mut self,
        event: &CollisionEvent,
        input: &GateInput,
        world: &impl WorldQuery,
        body: &mut ClimbBody,
        cfg: &LedgeClimber,
        now: f32,
    ) -> Result<(), AutoClimbError> {
        cfg.gate.admit(event, input)?;
        let ledge = probe_ledge(world, body.transform, body.capsule, &cfg.probe)?;
        self.enter_hang(ledge, body, cfg, now);
        if cfg.climb.auto_climb_up {
            self.start_climb_up_sequence(world, body, cfg);
        }
        Ok(())
    }

    /// Idle → Hanging. Suspends movement and snaps the character to the hang anchor facing
    /// the wall.
    pub fn enter_hang(
        &mut self,
        ledge: LedgeDescriptor,
        body: &mut ClimbBody,
        cfg: &LedgeClimber,
        now: f32,
    ) -> bool {
        if self.state != ClimbState::Idle {
            return false;
        }
        if !ledge.is_valid() {
            warn!(entity = %body.entity, ?ledge, "refusing to hang from a ledge without a body");
            return false;
        }
        if let Some(movement) = body.movement.as_deref_mut() {
            movement::suspend(movement);
        }

        let into_wall = ledge.climb_direction();
        let anchor = ledge.ledge_top_point
            + into_wall * cfg.probe.hang_offset_from_edge
            + Vec3::Y * (cfg.probe.hang_vertical_offset + body.capsule.half_height);
        body.teleport(anchor, into_wall);

        self.ledge = Some(ledge);
        self.last_auto_climb = Some(now);
        self.set_state(body.entity, ClimbState::Hanging);
        true
    }

    /// Hanging → Climbing. Plays the configured sequence, or commits and finishes right away
    /// when there is nothing to play.
    pub fn start_climb_up_sequence(
        &mut self,
        world: &impl WorldQuery,
        body: &mut ClimbBody,
        cfg: &LedgeClimber,
    ) -> bool {
        if self.state != ClimbState::Hanging {
            return false;
        }
        self.climb_timer = Some(Stopwatch::new());
        self.committed = false;
        self.set_state(body.entity, ClimbState::Climbing);

        if let Some(movement) = body.movement.as_deref_mut() {
            movement.stop_immediately();
            movement.set_mode(MovementMode::Flying);
            movement.set_orient_rotation(false);
        }

        let playing = match (&cfg.climb.sequence, body.player.as_deref_mut()) {
            (Some(sequence), Some(player)) => player.play(sequence, sequence.rate),
            _ => false,
        };
        if !playing {
            self.climb_up_commit(world, body, cfg);
            self.finish_climb_up_sequence(world, body, cfg);
        }
        true
    }

    /// Hanging → Idle without climbing. The character falls from where it hangs.
    pub fn drop_from_ledge(&mut self, body: &mut ClimbBody) -> bool {
        if self.state != ClimbState::Hanging {
            return false;
        }
        if let Some(movement) = body.movement.as_deref_mut() {
            movement::restore(movement);
        }
        self.ledge = None;
        self.set_state(body.entity, ClimbState::Idle);
        true
    }

    /// Moves the character onto the ledge. Called from the sequence's commit marker; runs at
    /// most once per climb.
    pub fn climb_up_commit(
        &mut self,
        world: &impl WorldQuery,
        body: &mut ClimbBody,
        cfg: &LedgeClimber,
    ) -> bool {
        if self.state != ClimbState::Climbing || self.committed {
            return false;
        }
        self.committed = true;
        if cfg.climb.uses_root_motion {
            return true;
        }
        let Some(ledge) = self.ledge else {
            return false;
        };

        let forward = ledge.climb_direction();
        let mut target = ledge.ledge_top_point + forward * cfg.climb.commit_step_forward;
        target.y += body.capsule.half_height + cfg.climb.commit_lift;
        body.teleport(target, forward);
        body.snap_to_floor(&cfg.climb, world);
        true
    }

    /// Climbing → Idle. Hands the character back to normal locomotion. Does nothing when
    /// not climbing.
    pub fn finish_climb_up_sequence(
        &mut self,
        world: &impl WorldQuery,
        body: &mut ClimbBody,
        cfg: &LedgeClimber,
    ) -> bool {
        if self.state != ClimbState::Climbing {
            return false;
        }
        if let Some(movement) = body.movement.as_deref_mut() {
            movement::restore(movement);
        }
        body.snap_to_floor(&cfg.climb, world);

        self.ledge = None;
        self.climb_timer = None;
        self.committed = false;
        self.set_state(body.entity, ClimbState::Idle);
        true
    }

    /// Advances the climb timer by `delta` and resolves the climb once it runs past
    /// [`ClimbConfig::sequence_timeout`] without the sequence reporting back.
    pub fn check_timeout(
        &mut self,
        world: &impl WorldQuery,
        body: &mut ClimbBody,
        cfg: &LedgeClimber,
        delta: Duration,
    ) -> bool {
        let Some(timeout) = cfg.climb.sequence_timeout else {
            return false;
        };
        if self.state != ClimbState::Climbing {
            return false;
        }
        let Some(timer) = self.climb_timer.as_mut() else {
            return false;
        };
        timer.tick(delta);
        if timer.elapsed() <= timeout {
            return false;
        }
        warn!(
            entity = %body.entity,
            elapsed = timer.elapsed_secs(),
            "climb sequence never completed, resolving climb"
        );
        if let Some(player) = body.player.as_deref_mut() {
            player.stop();
        }
        self.climb_up_commit(world, body, cfg);
        self.finish_climb_up_sequence(world, body, cfg)
    }
}

type Climbers<'w, 's> = Query<
    'w,
    's,
    (
        &'static LedgeClimber,
        &'static mut Climber,
        &'static mut Transform,
        Option<&'static Collider>,
        Option<&'static mut CharacterMovement>,
        Option<&'static mut SequencePlayback>,
        Has<RemoteProxy>,
    ),
>;

fn capsule_of(cfg: &LedgeClimber, collider: Option<&Collider>) -> CapsuleShape {
    cfg.capsule
        .or_else(|| collider.map(CapsuleShape::from_collider))
        .unwrap_or_default()
}

fn climb_body<'a>(
    entity: Entity,
    transform: &'a mut Transform,
    capsule: CapsuleShape,
    movement: Option<&'a mut CharacterMovement>,
    player: Option<&'a mut SequencePlayback>,
) -> ClimbBody<'a> {
    ClimbBody {
        entity,
        transform,
        capsule,
        movement: movement.map(|m| m as &mut dyn MovementController),
        player: player.map(|p| p as &mut dyn SequencePlayer),
    }
}

fn has_tag(other: Entity, tag: &str, tags: &Query<&Tags>, colliders: &Query<&ColliderOf>) -> bool {
    let body = colliders.get(other).ok().map(|collider_of| collider_of.body);
    [Some(other), body]
        .into_iter()
        .flatten()
        .any(|entity| tags.get(entity).is_ok_and(|tags| tags.contains(tag)))
}

fn handle_collisions(
    mut collisions: MessageReader<CollisionEvent>,
    mut climbers: Climbers,
    tags: Query<&Tags>,
    colliders: Query<&ColliderOf>,
    spatial: SpatialQuery,
    time: Res<Time>,
) {
    let now = time.elapsed_secs();
    for event in collisions.read() {
        let entity = event.character;
        if !(event.impact_normal.is_finite() && event.impact_velocity.is_finite()) {
            warn!(%entity, ?event, "ignoring collision with non-finite impact");
            continue;
        }
        let Ok((cfg, mut climber, mut transform, collider, mut movement, mut player, remote)) =
            climbers.get_mut(entity)
        else {
            continue;
        };
        let input = GateInput {
            character: entity,
            state: climber.state(),
            forward: transform.forward().into(),
            now,
            last_auto_climb: climber.last_auto_climb(),
            locally_controlled: !remote,
            // without a controller to ask, assume the host only reports hits worth climbing
            airborne: movement.as_deref().is_none_or(|m| m.airborne),
            other_has_tag: event
                .other
                .is_some_and(|other| has_tag(other, &cfg.gate.climbable_tag, &tags, &colliders)),
        };

        let world = AvianWorld::new(&spatial, &cfg.filter);
        let capsule = capsule_of(cfg, collider);
        let mut body = climb_body(
            entity,
            &mut transform,
            capsule,
            movement.as_deref_mut(),
            player.as_deref_mut(),
        );
        if let Err(err) = climber.try_auto_climb(event, &input, &world, &mut body, cfg, now) {
            trace!(%entity, %err, "no auto climb");
        }
    }
}

fn handle_climb_up_requests(
    mut requests: MessageReader<ClimbUpRequest>,
    mut climbers: Climbers,
    spatial: SpatialQuery,
) {
    for request in requests.read() {
        let entity = request.entity;
        let Ok((cfg, mut climber, mut transform, collider, mut movement, mut player, _)) =
            climbers.get_mut(entity)
        else {
            continue;
        };
        let world = AvianWorld::new(&spatial, &cfg.filter);
        let mut body = climb_body(
            entity,
            &mut transform,
            capsule_of(cfg, collider),
            movement.as_deref_mut(),
            player.as_deref_mut(),
        );
        if !climber.start_climb_up_sequence(&world, &mut body, cfg) {
            trace!(%entity, state = ?climber.state(), "ignoring climb up request");
        }
    }
}

fn handle_drop_requests(mut requests: MessageReader<DropFromLedgeRequest>, mut climbers: Climbers) {
    for request in requests.read() {
        let entity = request.entity;
        let Ok((cfg, mut climber, mut transform, collider, mut movement, mut player, _)) =
            climbers.get_mut(entity)
        else {
            continue;
        };
        let mut body = climb_body(
            entity,
            &mut transform,
            capsule_of(cfg, collider),
            movement.as_deref_mut(),
            player.as_deref_mut(),
        );
        if !climber.drop_from_ledge(&mut body) {
            trace!(%entity, state = ?climber.state(), "ignoring drop request");
        }
    }
}

fn handle_commit_markers(
    mut markers: MessageReader<ClimbCommitMarker>,
    mut climbers: Climbers,
    spatial: SpatialQuery,
) {
    for marker in markers.read() {
        let entity = marker.entity;
        let Ok((cfg, mut climber, mut transform, collider, mut movement, mut player, _)) =
            climbers.get_mut(entity)
        else {
            continue;
        };
        let world = AvianWorld::new(&spatial, &cfg.filter);
        let mut body = climb_body(
            entity,
            &mut transform,
            capsule_of(cfg, collider),
            movement.as_deref_mut(),
            player.as_deref_mut(),
        );
        climber.climb_up_commit(&world, &mut body, cfg);
    }
}

fn handle_completed_sequences(
    mut completions: MessageReader<SequenceCompleted>,
    mut climbers: Climbers,
    spatial: SpatialQuery,
) {
    for completed in completions.read() {
        let entity = completed.entity;
        let Ok((cfg, mut climber, mut transform, collider, mut movement, mut player, _)) =
            climbers.get_mut(entity)
        else {
            continue;
        };
        let world = AvianWorld::new(&spatial, &cfg.filter);
        let mut body = climb_body(
            entity,
            &mut transform,
            capsule_of(cfg, collider),
            movement.as_deref_mut(),
            player.as_deref_mut(),
        );
        climber.finish_climb_up_sequence(&world, &mut body, cfg);
    }
}

fn time_out_stuck_climbs(
    mut climbers: Query<(
        Entity,
        &LedgeClimber,
        &mut Climber,
        &mut Transform,
        Option<&Collider>,
        Option<&mut CharacterMovement>,
        Option<&mut SequencePlayback>,
    )>,
    spatial: SpatialQuery,
    time: Res<Time>,
) {
    let delta = time.delta();
    for (entity, cfg, mut climber, mut transform, collider, mut movement, mut player) in
        &mut climbers
    {
        if climber.state() != ClimbState::Climbing {
            continue;
        }
        let world = AvianWorld::new(&spatial, &cfg.filter);
        let mut body = climb_body(
            entity,
            &mut transform,
            capsule_of(cfg, collider),
            movement.as_deref_mut(),
            player.as_deref_mut(),
        );
        climber.check_timeout(&world, &mut body, cfg, delta);
    }
}

fn publish_transitions(
    mut climbers: Query<(Entity, &mut Climber)>,
    mut changes: MessageWriter<ClimbStateChanged>,
) {
    for (entity, mut climber) in &mut climbers {
        if climber.transitions.is_empty() {
            continue;
        }
        for (from, to) in climber.transitions.drain(..) {
            changes.write(ClimbStateChanged { entity, from, to });
        }
    }
}
