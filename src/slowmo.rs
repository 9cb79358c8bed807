//! Slow motion with a screen desaturation that eases in and out.
//!
//! Nothing here touches the climb. The effective speed is published as [`SimulationSpeed`]
//! for the host to feed into its clocks instead of being applied globally.

use crate::prelude::*;

pub(super) fn plugin(app: &mut App) {
    app.init_resource::<SimulationSpeed>()
        .add_systems(Update, (update_simulation_speed, ease_desaturation).chain());
}

/// Speed multiplier the simulation should run at. `1.0` is real time.
#[derive(Resource, Clone, Copy, Reflect, Debug, Deref, DerefMut, PartialEq)]
#[reflect(Resource)]
pub struct SimulationSpeed(pub f32);

impl Default for SimulationSpeed {
    fn default() -> Self {
        Self(1.0)
    }
}

#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
pub struct SlowMotion {
    /// Simulation speed while active, clamped to `[0.01, 1.0]`.
    pub dilation: f32,
    /// Desaturation eased towards while active.
    pub slowed_desaturation: f32,
    /// How fast the desaturation eases, in 1/s.
    pub interp_speed: f32,
    /// Current desaturation in `[0, 1]`, for the renderer to read.
    pub desaturation: f32,
    active: bool,
    target_desaturation: f32,
}

impl Default for SlowMotion {
    fn default() -> Self {
        Self {
            dilation: 0.25,
            slowed_desaturation: 0.4,
            interp_speed: 6.0,
            desaturation: 0.0,
            active: false,
            target_desaturation: 0.0,
        }
    }
}

impl SlowMotion {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns `false` if it was already active.
    pub fn start(&mut self) -> bool {
        if self.active {
            return false;
        }
        self.active = true;
        self.target_desaturation = self.slowed_desaturation;
        true
    }

    /// Returns `false` if it was not active.
    pub fn stop(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.target_desaturation = 0.0;
        true
    }

    pub fn speed(&self) -> f32 {
        if self.active {
            self.dilation.clamp(0.01, 1.0)
        } else {
            1.0
        }
    }

    /// Moves the desaturation one frame closer to its target.
    pub fn tick(&mut self, delta_secs: f32) {
        let next = interp_to(
            self.desaturation,
            self.target_desaturation,
            delta_secs,
            self.interp_speed,
        );
        if (next - self.desaturation).abs() > 0.001 || next == self.target_desaturation {
            self.desaturation = next;
        }
    }
}

/// Eases `current` towards `target`, covering `delta_secs * speed` of the remaining distance.
pub fn interp_to(current: f32, target: f32, delta_secs: f32, speed: f32) -> f32 {
    if speed <= 0.0 {
        return target;
    }
    let distance = target - current;
    if distance * distance < 1e-8 {
        return target;
    }
    current + distance * (delta_secs * speed).clamp(0.0, 1.0)
}

fn update_simulation_speed(slow_motions: Query<&SlowMotion>, mut speed: ResMut<SimulationSpeed>) {
    let slowest = slow_motions
        .iter()
        .map(SlowMotion::speed)
        .fold(1.0, f32::min);
    if speed.0 != slowest {
        speed.0 = slowest;
    }
}

fn ease_desaturation(mut slow_motions: Query<&mut SlowMotion>, time: Res<Time>) {
    let delta = time.delta_secs();
    for mut slow_motion in &mut slow_motions {
        slow_motion.tick(delta);
    }
}
