//! Filters raw collision events before they are allowed to start a climb.

use thiserror::Error;

use crate::{climb::ClimbState, prelude::*, probe::MAX_WALL_NORMAL_Y};

/// A hit between a climber and something else, reported by the host's movement or physics
/// layer.
#[derive(Message, Clone, Copy, Reflect, Debug, PartialEq)]
pub struct CollisionEvent {
    /// The climbing character.
    pub character: Entity,
    /// The collider that was hit.
    pub other: Option<Entity>,
    pub impact_normal: Vec3,
    pub impact_velocity: Vec3,
}

/// Free-form labels on a body, checked against [`CollisionGateConfig::climbable_tag`].
#[derive(Component, Clone, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct Tags(pub Vec<String>);

impl Tags {
    pub fn new(tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(tags.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }
}

/// Marks a character whose movement is simulated elsewhere, e.g. another peer's player.
/// Such characters never evaluate climbs themselves.
#[derive(Component, Clone, Copy, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct RemoteProxy;

#[derive(Clone, Reflect, Debug)]
pub struct CollisionGateConfig {
    pub auto_climb_enabled: bool,
    /// Minimum time between two automatic climbs.
    pub cooldown: Duration,
    /// Hits slower than this are grazes.
    pub min_impact_speed: f32,
    /// Minimum of `forward · -normal` for a hit to count as frontal.
    pub min_approach_dot: f32,
    pub require_airborne: bool,
    pub use_tag_filter: bool,
    pub climbable_tag: String,
}

impl Default for CollisionGateConfig {
    fn default() -> Self {
        Self {
            auto_climb_enabled: true,
            cooldown: Duration::from_millis(600),
            min_impact_speed: 1.5,
            min_approach_dot: 0.6,
            require_airborne: true,
            use_tag_filter: true,
            climbable_tag: "Climbable".into(),
        }
    }
}

/// Everything about the character the gate looks at, sampled when the event arrives.
#[derive(Clone, Copy, Debug)]
pub struct GateInput {
    pub character: Entity,
    pub state: ClimbState,
    pub forward: Vec3,
    pub now: f32,
    pub last_auto_climb: Option<f32>,
    pub locally_controlled: bool,
    pub airborne: bool,
    pub other_has_tag: bool,
}

#[derive(Error, Clone, Debug, PartialEq)]
pub enum GateRejection {
    #[error("automatic climbing is disabled")]
    Disabled,
    #[error("already {0:?}")]
    Busy(ClimbState),
    #[error("hit has no other body")]
    NoOtherBody,
    #[error("character hit itself")]
    SelfHit,
    #[error("character is not controlled locally")]
    NotAuthoritative,
    #[error("cooling down for another {remaining:.3}s")]
    CoolingDown { remaining: f32 },
    #[error("character is grounded")]
    NotAirborne,
    #[error("hit body is not tagged {0:?}")]
    MissingTag(String),
    #[error("surface is floor or ramp (normal y = {0})")]
    NotAWall(f32),
    #[error("approach is not frontal enough (dot = {0})")]
    NotFrontal(f32),
    #[error("impact too slow ({0} m/s)")]
    TooSlow(f32),
}

impl CollisionGateConfig {
    /// Checks `event` against every admission rule in order, stopping at the first failure.
    pub fn admit(&self, event: &CollisionEvent, input: &GateInput) -> Result<(), GateRejection> {
        if !self.auto_climb_enabled {
            return Err(GateRejection::Disabled);
        }
        if input.state != ClimbState::Idle {
            return Err(GateRejection::Busy(input.state));
        }
        let Some(other) = event.other else {
            return Err(GateRejection::NoOtherBody);
        };
        if other == input.character {
            return Err(GateRejection::SelfHit);
        }
        if !input.locally_controlled {
            return Err(GateRejection::NotAuthoritative);
        }
        if let Some(last) = input.last_auto_climb {
            let elapsed = input.now - last;
            let cooldown = self.cooldown.as_secs_f32();
            if elapsed < cooldown {
                return Err(GateRejection::CoolingDown {
                    remaining: cooldown - elapsed,
                });
            }
        }
        if self.require_airborne && !input.airborne {
            return Err(GateRejection::NotAirborne);
        }
        if self.use_tag_filter && !input.other_has_tag {
            return Err(GateRejection::MissingTag(self.climbable_tag.clone()));
        }

        let normal = event.impact_normal.normalize_or_zero();
        if normal.y > MAX_WALL_NORMAL_Y {
            return Err(GateRejection::NotAWall(normal.y));
        }
        let approach = input.forward.dot(-normal);
        if approach < self.min_approach_dot {
            return Err(GateRejection::NotFrontal(approach));
        }
        let speed_squared = event.impact_velocity.length_squared();
        if speed_squared < self.min_impact_speed * self.min_impact_speed {
            return Err(GateRejection::TooSlow(speed_squared.sqrt()));
        }
        Ok(())
    }
}
