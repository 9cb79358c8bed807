#![doc = include_str!("../readme.md")]

/// Everything you need to get started with `bevy_clamber`
pub mod prelude {
    pub(crate) use {
        crate::ClamberSystems,
        avian3d::prelude::*,
        bevy_app::prelude::*,
        bevy_derive::{Deref, DerefMut},
        bevy_ecs::{intern::Interned, prelude::*, schedule::ScheduleLabel},
        bevy_enhanced_input::prelude::*,
        bevy_math::prelude::*,
        bevy_reflect::prelude::*,
        bevy_time::prelude::*,
        bevy_transform::prelude::*,
        bevy_utils::prelude::*,
        core::time::Duration,
    };

    pub use crate::{
        ClamberPlugin, LedgeClimber,
        climb::{
            ClimbConfig, ClimbState, ClimbStateChanged, ClimbUpRequest, Climber,
            DropFromLedgeRequest,
        },
        gate::{CollisionEvent, CollisionGateConfig, RemoteProxy, Tags},
        input::{ClimbUp, DropFromLedge, SlowMo},
        movement::{CharacterMovement, MovementMode},
        probe::ProbeConfig,
        query::CapsuleShape,
        sequence::{ClimbSequence, SequenceCompleted, SequencePlayback},
        slowmo::{SimulationSpeed, SlowMotion},
    };
}

use crate::prelude::*;
use bevy_ecs::{
    lifecycle::HookContext, relationship::RelationshipSourceCollection as _, world::DeferredWorld,
};

pub mod climb;
pub mod gate;
pub mod input;
pub mod movement;
pub mod probe;
pub mod query;
pub mod sequence;
pub mod slowmo;

/// Also requires you to add [`PhysicsPlugins`] and [`EnhancedInputPlugin`] to work properly.
pub struct ClamberPlugin {
    schedule: Interned<dyn ScheduleLabel>,
}

impl ClamberPlugin {
    /// Create a new plugin in the given schedule. The default is [`FixedPostUpdate`].
    pub fn new(schedule: impl ScheduleLabel) -> Self {
        Self {
            schedule: schedule.intern(),
        }
    }
}

impl Default for ClamberPlugin {
    fn default() -> Self {
        Self {
            schedule: FixedPostUpdate.intern(),
        }
    }
}

impl Plugin for ClamberPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            self.schedule,
            (
                ClamberSystems::AdvanceSequences,
                ClamberSystems::Climb,
                ClamberSystems::SyncBodies,
            )
                .chain()
                .in_set(PhysicsSystems::First),
        )
        .add_plugins((
            input::plugin,
            slowmo::plugin,
            sequence::plugin(self.schedule),
            climb::plugin(self.schedule),
            movement::plugin(self.schedule),
        ));
    }
}

/// System set used by all systems of `bevy_clamber`.
#[derive(SystemSet, Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ClamberSystems {
    /// Ticks [`SequencePlayback`] and emits its commit markers and completions.
    AdvanceSequences,
    /// Runs the collision gate, the ledge probe and every climb transition.
    Climb,
    /// Mirrors [`CharacterMovement`] onto the character's rigid body.
    SyncBodies,
}

/// Makes a character climb up ledges it jumps against.
///
/// Collisions are reported by sending [`CollisionEvent`]s for the character.
#[derive(Component, Clone, Reflect, Default, Debug)]
#[reflect(Component)]
#[require(Climber, CharacterMovement, SequencePlayback, Transform)]
#[component(on_add=LedgeClimber::on_add)]
pub struct LedgeClimber {
    pub gate: CollisionGateConfig,
    pub probe: ProbeConfig,
    pub climb: ClimbConfig,
    /// Character capsule used for traces. Taken from the character's [`Collider`] when unset.
    pub capsule: Option<CapsuleShape>,
    pub filter: SpatialQueryFilter,
}

impl LedgeClimber {
    pub fn on_add(mut world: DeferredWorld, ctx: HookContext) {
        let Some(mut climber) = world.get_mut::<Self>(ctx.entity) else {
            return;
        };
        climber.filter.excluded_entities.add(ctx.entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn climbers_never_trace_against_themselves() {
        let mut world = World::new();
        let entity = world.spawn(LedgeClimber::default()).id();
        let climber = world.get::<LedgeClimber>(entity).unwrap();
        assert!(climber.filter.excluded_entities.contains(&entity));
        assert!(world.get::<Climber>(entity).is_some());
        assert!(world.get::<CharacterMovement>(entity).is_some());
        assert!(world.get::<SequencePlayback>(entity).is_some());
    }
}
