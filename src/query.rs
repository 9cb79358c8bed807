//! The narrow view of the physics world the climb logic needs: single line traces and
//! capsule sweeps.

use crate::prelude::*;

/// Result of a trace or sweep against the world.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct TraceHit {
    /// World-space impact point on the surface that was hit.
    pub point: Vec3,
    /// Outward surface normal at [`TraceHit::point`].
    pub normal: Vec3,
    /// The collider that was hit, if the backend can name one.
    pub entity: Option<Entity>,
}

/// Vertical capsule dimensions. `half_height` runs from the center to the tip of a cap.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct CapsuleShape {
    pub radius: f32,
    pub half_height: f32,
}

impl CapsuleShape {
    pub fn new(radius: f32, half_height: f32) -> Self {
        Self {
            radius,
            half_height,
        }
    }

    /// Fits a capsule around the collider's local AABB.
    pub fn from_collider(collider: &Collider) -> Self {
        let size = collider.aabb(Vec3::default(), Rotation::default()).size();
        Self {
            radius: size.x.max(size.z) / 2.0,
            half_height: size.y / 2.0,
        }
    }

    /// Length of the cylindrical part between the two caps.
    pub fn segment_length(&self) -> f32 {
        (2.0 * (self.half_height - self.radius)).max(0.0)
    }
}

impl Default for CapsuleShape {
    fn default() -> Self {
        Self::new(0.42, 0.96)
    }
}

/// World query service consumed by the ledge probe and the floor snap.
pub trait WorldQuery {
    /// Casts an infinitely thin line from `start` to `end` and returns the first hit.
    fn line_trace(&self, start: Vec3, end: Vec3) -> Option<TraceHit>;

    /// Sweeps an upright capsule centered at `start` towards `end` and returns the first hit.
    fn sweep_capsule(&self, capsule: CapsuleShape, start: Vec3, end: Vec3) -> Option<TraceHit>;
}

/// [`WorldQuery`] backed by Avian's [`SpatialQuery`].
pub struct AvianWorld<'a, 'w, 's> {
    pub spatial: &'a SpatialQuery<'w, 's>,
    pub filter: &'a SpatialQueryFilter,
}

impl<'a, 'w, 's> AvianWorld<'a, 'w, 's> {
    pub fn new(spatial: &'a SpatialQuery<'w, 's>, filter: &'a SpatialQueryFilter) -> Self {
        Self { spatial, filter }
    }
}

impl WorldQuery for AvianWorld<'_, '_, '_> {
    fn line_trace(&self, start: Vec3, end: Vec3) -> Option<TraceHit> {
        let (dir, max_distance) = Dir3::new_and_length(end - start).ok()?;
        let hit = self
            .spatial
            .cast_ray(start, dir, max_distance, true, self.filter)?;
        Some(TraceHit {
            point: start + dir * hit.distance,
            normal: hit.normal,
            entity: Some(hit.entity),
        })
    }

    fn sweep_capsule(&self, capsule: CapsuleShape, start: Vec3, end: Vec3) -> Option<TraceHit> {
        let (dir, max_distance) = Dir3::new_and_length(end - start).ok()?;
        let shape = Collider::capsule(capsule.radius, capsule.segment_length());
        let hit = self.spatial.cast_shape(
            &shape,
            start,
            Quat::IDENTITY,
            dir,
            &ShapeCastConfig::from_max_distance(max_distance),
            self.filter,
        )?;
        Some(TraceHit {
            point: hit.point1,
            normal: hit.normal1,
            entity: Some(hit.entity),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_world {
    //! Physics-free [`WorldQuery`] doubles.

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Distinct entity ids without a full app.
    pub fn entities<const N: usize>() -> [Entity; N] {
        let mut world = World::new();
        core::array::from_fn(|_| world.spawn_empty().id())
    }

    /// An axis-aligned box in the test world.
    #[derive(Clone, Copy, Debug)]
    pub struct Block {
        pub min: Vec3,
        pub max: Vec3,
        pub entity: Option<Entity>,
    }

    impl Block {
        pub fn new(min: Vec3, max: Vec3, entity: Entity) -> Self {
            Self {
                min,
                max,
                entity: Some(entity),
            }
        }
    }

    /// Static geometry made of boxes. Capsule sweeps are approximated by a line traced from the
    /// bottom of the capsule, which is exact for flat floors.
    #[derive(Default, Debug)]
    pub struct BlockWorld {
        pub blocks: Vec<Block>,
    }

    impl BlockWorld {
        pub fn with(mut self, block: Block) -> Self {
            self.blocks.push(block);
            self
        }

        fn trace_block(block: &Block, start: Vec3, delta: Vec3) -> Option<(f32, Vec3)> {
            let mut t_enter = f32::NEG_INFINITY;
            let mut t_exit = f32::INFINITY;
            let mut normal = Vec3::ZERO;
            for axis in 0..3 {
                let (o, d) = (start[axis], delta[axis]);
                if d.abs() < 1e-6 {
                    if o < block.min[axis] || o > block.max[axis] {
                        return None;
                    }
                    continue;
                }
                let t1 = (block.min[axis] - o) / d;
                let t2 = (block.max[axis] - o) / d;
                let (near, far) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
                if near > t_enter {
                    t_enter = near;
                    normal = Vec3::ZERO;
                    normal[axis] = -d.signum();
                }
                t_exit = t_exit.min(far);
            }
            (t_enter <= t_exit && (0.0..=1.0).contains(&t_enter)).then_some((t_enter, normal))
        }
    }

    impl WorldQuery for BlockWorld {
        fn line_trace(&self, start: Vec3, end: Vec3) -> Option<TraceHit> {
            let delta = end - start;
            self.blocks
                .iter()
                .filter_map(|block| {
                    Self::trace_block(block, start, delta).map(|(t, normal)| (t, normal, block))
                })
                .min_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(t, normal, block)| TraceHit {
                    point: start + delta * t,
                    normal,
                    entity: block.entity,
                })
        }

        fn sweep_capsule(&self, capsule: CapsuleShape, start: Vec3, end: Vec3) -> Option<TraceHit> {
            let foot = Vec3::Y * capsule.half_height;
            self.line_trace(start - foot, end - foot)
        }
    }

    /// Replays canned hits in call order, regardless of the query arguments.
    #[derive(Default, Debug)]
    pub struct ScriptedWorld {
        pub lines: RefCell<VecDeque<Option<TraceHit>>>,
        pub sweeps: RefCell<VecDeque<Option<TraceHit>>>,
    }

    impl ScriptedWorld {
        pub fn lines(hits: impl IntoIterator<Item = Option<TraceHit>>) -> Self {
            Self {
                lines: RefCell::new(hits.into_iter().collect()),
                ..default()
            }
        }

        pub fn remaining_lines(&self) -> usize {
            self.lines.borrow().len()
        }
    }

    impl WorldQuery for ScriptedWorld {
        fn line_trace(&self, _start: Vec3, _end: Vec3) -> Option<TraceHit> {
            self.lines.borrow_mut().pop_front().flatten()
        }

        fn sweep_capsule(&self, _capsule: CapsuleShape, _start: Vec3, _end: Vec3) -> Option<TraceHit> {
            self.sweeps.borrow_mut().pop_front().flatten()
        }
    }

    #[test]
    fn block_trace_reports_entry_face() {
        let [e] = entities();
        let world = BlockWorld::default().with(Block::new(
            vec3(-1.0, 0.0, -2.0),
            vec3(1.0, 1.0, -1.0),
            e,
        ));
        let hit = world
            .line_trace(vec3(0.0, 0.5, 0.0), vec3(0.0, 0.5, -3.0))
            .unwrap();
        assert_eq!(hit.normal, Vec3::Z);
        assert_eq!(hit.entity, Some(e));
        approx::assert_abs_diff_eq!(hit.point.z, -1.0, epsilon = 1e-5);

        assert!(world
            .line_trace(vec3(0.0, 2.0, 0.0), vec3(0.0, 2.0, -3.0))
            .is_none());
    }
}
