use thiserror::Error;
use tracing::debug;

use crate::{
    prelude::*,
    query::{CapsuleShape, TraceHit, WorldQuery},
};

/// Largest vertical normal component a surface may have and still count as a wall.
/// Independent of the walkable floor angle used when landing.
pub const MAX_WALL_NORMAL_Y: f32 = 0.3;

#[derive(Clone, Reflect, Debug)]
pub struct ProbeConfig {
    /// How far past the capsule radius the chest trace looks for a wall.
    pub forward_check_distance: f32,
    /// How far above the wall hit the downward trace starts.
    pub up_check_height: f32,
    /// Length of the downward trace.
    pub down_check_depth: f32,
    /// Ledge height above the feet, inclusive range.
    pub min_ledge_height: f32,
    pub max_ledge_height: f32,
    /// Horizontal distance of the hang anchor from the edge, along the climb direction.
    pub hang_offset_from_edge: f32,
    /// Vertical offset of the hang anchor relative to standing on the ledge.
    pub hang_vertical_offset: f32,
    /// How far behind the wall face the downward trace is placed.
    pub wall_back_off: f32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            forward_check_distance: 0.7,
            up_check_height: 0.9,
            down_check_depth: 1.2,
            min_ledge_height: 0.6,
            max_ledge_height: 1.8,
            hang_offset_from_edge: 0.35,
            hang_vertical_offset: -0.4,
            wall_back_off: 0.1,
        }
    }
}

/// A ledge found in front of the character. Only lives for one climb cycle.
#[derive(Clone, Copy, Reflect, Debug, PartialEq)]
pub struct LedgeDescriptor {
    pub wall_contact_point: Vec3,
    /// Unit normal pointing out of the wall, towards the character.
    pub wall_normal: Vec3,
    pub ledge_top_point: Vec3,
    /// World height of the ledge top.
    pub ledge_top_height: f32,
    /// The body the ledge belongs to. Identity only.
    pub contacted_body: Option<Entity>,
}

impl LedgeDescriptor {
    pub fn is_valid(&self) -> bool {
        self.contacted_body.is_some()
    }

    /// Horizontal direction from the wall face over the ledge.
    pub fn climb_direction(&self) -> Vec3 {
        let into_wall = -self.wall_normal.with_y(0.0);
        into_wall.try_normalize().unwrap_or(-self.wall_normal)
    }
}

#[derive(Error, Clone, Copy, Debug, PartialEq)]
pub enum ProbeMiss {
    #[error("no wall in front of the character")]
    NoWall,
    #[error("surface in front is not steep enough to be a wall (normal y = {0})")]
    WallTooFlat(f32),
    #[error("no ledge top within reach above the wall")]
    NoLedgeTop,
    #[error("ledge is {height} above the feet, outside [{min}, {max}]")]
    HeightOutOfRange { height: f32, min: f32, max: f32 },
    #[error("neither hit reported a body")]
    NoContactedBody,
}

/// Looks for a climbable ledge in front of a character standing at `transform`.
///
/// A single miss at any stage aborts the probe, nothing is retried.
pub fn probe_ledge(
    world: &impl WorldQuery,
    transform: &Transform,
    capsule: CapsuleShape,
    cfg: &ProbeConfig,
) -> Result<LedgeDescriptor, ProbeMiss> {
    let origin = transform.translation;
    let forward = Vec3::from(transform.forward())
        .with_y(0.0)
        .try_normalize()
        .ok_or(ProbeMiss::NoWall)?;

    let chest = origin + Vec3::Y * (capsule.half_height * 0.5);
    let reach = chest + forward * (cfg.forward_check_distance + capsule.radius);
    let wall = world.line_trace(chest, reach).ok_or(ProbeMiss::NoWall)?;
    if wall.normal.y > MAX_WALL_NORMAL_Y {
        return Err(ProbeMiss::WallTooFlat(wall.normal.y));
    }

    let over_top = wall.point + Vec3::Y * cfg.up_check_height - wall.normal * cfg.wall_back_off;
    let top = world
        .line_trace(over_top, over_top - Vec3::Y * cfg.down_check_depth)
        .ok_or(ProbeMiss::NoLedgeTop)?;

    let feet = origin.y - capsule.half_height;
    let height = top.point.y - feet;
    if !(cfg.min_ledge_height..=cfg.max_ledge_height).contains(&height) {
        return Err(ProbeMiss::HeightOutOfRange {
            height,
            min: cfg.min_ledge_height,
            max: cfg.max_ledge_height,
        });
    }

    let ledge = describe(&wall, &top);
    if !ledge.is_valid() {
        return Err(ProbeMiss::NoContactedBody);
    }
    debug!(?ledge, height, "found ledge");
    Ok(ledge)
}

fn describe(wall: &TraceHit, top: &TraceHit) -> LedgeDescriptor {
    LedgeDescriptor {
        wall_contact_point: wall.point,
        wall_normal: wall.normal.normalize_or_zero(),
        ledge_top_point: top.point,
        ledge_top_height: top.point.y,
        contacted_body: top.entity.or(wall.entity),
    }
}
