//! The movement controller surface the climb drives, and the floor snap performed when a
//! climb resolves.

use crate::{
    prelude::*,
    query::{CapsuleShape, WorldQuery},
};

/// Walkable floor angle assumed when no movement controller can be asked.
pub const DEFAULT_WALKABLE_FLOOR_ANGLE: f32 = 44.0;

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_systems(
            schedule,
            sync_bodies_with_movement.in_set(ClamberSystems::SyncBodies),
        );
    }
}

#[derive(Default, Clone, Copy, Reflect, Debug, PartialEq, Eq, Hash)]
pub enum MovementMode {
    #[default]
    Walking,
    /// Unconstrained, no gravity or external forces.
    Flying,
    Disabled,
}

/// Capabilities the climb needs from whatever moves the character.
pub trait MovementController {
    fn mode(&self) -> MovementMode;
    fn set_mode(&mut self, mode: MovementMode);
    /// Returns to the controller's own default mode.
    fn set_default_mode(&mut self);
    fn gravity_scale(&self) -> f32;
    fn set_gravity_scale(&mut self, scale: f32);
    fn stop_immediately(&mut self);
    /// In degrees.
    fn walkable_floor_angle(&self) -> f32;
    fn velocity(&self) -> Vec3;
    fn is_airborne(&self) -> bool;
    /// Whether the controller turns the character towards its movement or desired rotation.
    fn set_orient_rotation(&mut self, enabled: bool);
}

/// Movement state shared between the host's locomotion and the climb.
///
/// The host keeps `velocity` and `airborne` current and honors `mode`. `gravity_scale` is
/// mirrored onto the body's [`GravityScale`].
#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
#[require(GravityScale)]
pub struct CharacterMovement {
    pub mode: MovementMode,
    pub gravity_scale: f32,
    pub velocity: Vec3,
    pub airborne: bool,
    pub walkable_floor_angle: f32,
    pub orient_rotation_to_movement: bool,
    pub use_controller_desired_rotation: bool,
}

impl Default for CharacterMovement {
    fn default() -> Self {
        Self {
            mode: MovementMode::Walking,
            gravity_scale: 1.0,
            velocity: Vec3::ZERO,
            airborne: false,
            walkable_floor_angle: DEFAULT_WALKABLE_FLOOR_ANGLE,
            orient_rotation_to_movement: true,
            use_controller_desired_rotation: true,
        }
    }
}

impl CharacterMovement {
    pub fn is_suspended(&self) -> bool {
        self.mode != MovementMode::Walking
    }
}

impl MovementController for CharacterMovement {
    fn mode(&self) -> MovementMode {
        self.mode
    }

    fn set_mode(&mut self, mode: MovementMode) {
        self.mode = mode;
    }

    fn set_default_mode(&mut self) {
        self.mode = MovementMode::Walking;
    }

    fn gravity_scale(&self) -> f32 {
        self.gravity_scale
    }

    fn set_gravity_scale(&mut self, scale: f32) {
        self.gravity_scale = scale;
    }

    fn stop_immediately(&mut self) {
        self.velocity = Vec3::ZERO;
    }

    fn walkable_floor_angle(&self) -> f32 {
        self.walkable_floor_angle
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }

    fn is_airborne(&self) -> bool {
        self.airborne
    }

    fn set_orient_rotation(&mut self, enabled: bool) {
        self.orient_rotation_to_movement = enabled;
        self.use_controller_desired_rotation = enabled;
    }
}

/// Takes the character out of normal locomotion: no velocity, no gravity, no external forces.
pub fn suspend(movement: &mut dyn MovementController) {
    movement.stop_immediately();
    movement.set_mode(MovementMode::Disabled);
    movement.set_gravity_scale(0.0);
    movement.set_mode(MovementMode::Flying);
}

/// Undoes [`suspend`] and re-enables rotation following.
pub fn restore(movement: &mut dyn MovementController) {
    movement.set_gravity_scale(1.0);
    movement.set_mode(MovementMode::Walking);
    movement.set_default_mode();
    movement.set_orient_rotation(true);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FloorSnap {
    /// Moved onto a walkable floor with its center at this height.
    Snapped(f32),
    /// Found a floor that is too steep and left the character alone.
    Unwalkable,
    /// Found nothing and nudged the character down a little.
    Nudged,
}

/// Sweeps the capsule down from slightly above its current position and puts it on the
/// first walkable floor it finds.
pub fn snap_to_floor(
    world: &impl WorldQuery,
    transform: &mut Transform,
    capsule: CapsuleShape,
    movement: Option<&dyn MovementController>,
    down_trace: f32,
    up_tolerance: f32,
) -> FloorSnap {
    let position = transform.translation;
    let start = position + Vec3::Y * up_tolerance;
    let end = position - Vec3::Y * down_trace;

    let Some(hit) = world.sweep_capsule(capsule, start, end) else {
        transform.translation.y -= up_tolerance * 0.5;
        return FloorSnap::Nudged;
    };

    let walkable_angle = movement
        .map(|m| m.walkable_floor_angle())
        .unwrap_or(DEFAULT_WALKABLE_FLOOR_ANGLE);
    if hit.normal.dot(Vec3::Y) < walkable_angle.to_radians().cos() {
        return FloorSnap::Unwalkable;
    }
    transform.translation.y = hit.point.y + capsule.half_height;
    FloorSnap::Snapped(transform.translation.y)
}

/// Mirrors the movement state onto the Avian body so a suspended character is not pushed
/// around by the solver.
fn sync_bodies_with_movement(
    mut bodies: Query<(
        &mut CharacterMovement,
        &mut GravityScale,
        Option<&mut LinearVelocity>,
    )>,
) {
    for (mut movement, mut gravity, velocity) in &mut bodies {
        if gravity.0 != movement.gravity_scale {
            gravity.0 = movement.gravity_scale;
        }
        let Some(mut velocity) = velocity else {
            continue;
        };
        if movement.is_suspended() {
            velocity.0 = Vec3::ZERO;
        } else if movement.velocity != velocity.0 {
            movement.velocity = velocity.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::test_world::{Block, BlockWorld, entities};

    fn floor_at(y: f32) -> BlockWorld {
        let [floor] = entities();
        BlockWorld::default().with(Block::new(
            vec3(-5.0, y - 1.0, -5.0),
            vec3(5.0, y, 5.0),
            floor,
        ))
    }

    #[test]
    fn suspend_and_restore_round_trip() {
        let mut movement = CharacterMovement {
            velocity: vec3(1.0, -3.0, 0.0),
            airborne: true,
            ..default()
        };
        suspend(&mut movement);
        assert_eq!(movement.mode, MovementMode::Flying);
        assert_eq!(movement.gravity_scale, 0.0);
        assert_eq!(movement.velocity, Vec3::ZERO);

        movement.set_orient_rotation(false);
        restore(&mut movement);
        assert_eq!(movement.mode, MovementMode::Walking);
        assert_eq!(movement.gravity_scale, 1.0);
        assert!(movement.orient_rotation_to_movement);
        assert!(movement.use_controller_desired_rotation);
    }

    #[test]
    fn suspended_bodies_get_no_gravity() {
        use bevy_ecs::system::RunSystemOnce as _;

        let mut world = World::new();
        let entity = world
            .spawn((CharacterMovement::default(), LinearVelocity(vec3(0.0, -2.0, 0.0))))
            .id();
        assert_eq!(world.get::<GravityScale>(entity).unwrap().0, 1.0);

        suspend(&mut *world.get_mut::<CharacterMovement>(entity).unwrap());
        world.run_system_once(sync_bodies_with_movement).unwrap();
        assert_eq!(world.get::<GravityScale>(entity).unwrap().0, 0.0);
        assert_eq!(world.get::<LinearVelocity>(entity).unwrap().0, Vec3::ZERO);

        restore(&mut *world.get_mut::<CharacterMovement>(entity).unwrap());
        world.entity_mut(entity).insert(LinearVelocity(vec3(1.0, 0.0, 0.0)));
        world.run_system_once(sync_bodies_with_movement).unwrap();
        assert_eq!(world.get::<GravityScale>(entity).unwrap().0, 1.0);
        let movement = world.get::<CharacterMovement>(entity).unwrap();
        assert_eq!(movement.velocity, vec3(1.0, 0.0, 0.0));
    }

    #[test]
    fn snaps_down_onto_floor() {
        let world = floor_at(1.5);
        let mut transform = Transform::from_xyz(0.0, 2.48, 0.0);
        let capsule = CapsuleShape::default();
        let snap = snap_to_floor(&world, &mut transform, capsule, None, 1.5, 0.12);
        assert!(matches!(snap, FloorSnap::Snapped(_)));
        approx::assert_abs_diff_eq!(transform.translation.y, 1.5 + 0.96, epsilon = 1e-5);
    }

    #[test]
    fn nudges_when_nothing_below() {
        let world = BlockWorld::default();
        let mut transform = Transform::from_xyz(0.0, 5.0, 0.0);
        let snap = snap_to_floor(
            &world,
            &mut transform,
            CapsuleShape::default(),
            None,
            1.5,
            0.12,
        );
        assert_eq!(snap, FloorSnap::Nudged);
        approx::assert_abs_diff_eq!(transform.translation.y, 4.94, epsilon = 1e-5);
    }

    #[test]
    fn steep_floors_are_left_alone() {
        use crate::query::{TraceHit, test_world::ScriptedWorld};
        let world = ScriptedWorld::default();
        world.sweeps.borrow_mut().push_back(Some(TraceHit {
            point: vec3(0.0, 1.0, 0.0),
            // 60 degrees from up
            normal: vec3(60f32.to_radians().sin(), 60f32.to_radians().cos(), 0.0),
            entity: None,
        }));
        let mut transform = Transform::from_xyz(0.0, 2.5, 0.0);
        let movement = CharacterMovement::default();
        let snap = snap_to_floor(
            &world,
            &mut transform,
            CapsuleShape::default(),
            Some(&movement),
            1.5,
            0.12,
        );
        assert_eq!(snap, FloorSnap::Unwalkable);
        assert_eq!(transform.translation.y, 2.5);
    }
}
