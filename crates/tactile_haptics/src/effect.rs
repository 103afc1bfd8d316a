//! # Force Effects
//!
//! A force effect maps the current device state to a force and torque.
//! The scene graph hands the device a new effect set once per iteration;
//! the device loop evaluates the active set every tick.
//!
//! ## Interpolation
//!
//! The scene graph runs ~60 Hz, the device loop ~1 kHz. To avoid a force
//! step at every effect change, interpolated effects are cross-faded over
//! one scene-graph period:
//!
//! ```text
//! w = min(1, time since last change / duration of the previous period)
//!
//! force = Σ current (interpolated)     · w
//!       + Σ current (not interpolated)
//!       + Σ last    (interpolated)     · (1 - w)
//! ```

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Mul};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tactile_core::{Rotation, Vec3};

/// Device state an effect is evaluated against, in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectInput {
    /// Calibrated device position.
    pub position: Vec3,
    /// Calibrated device velocity.
    pub velocity: Vec3,
    /// Calibrated device orientation.
    pub orientation: Rotation,
    /// Time since the device loop started.
    pub elapsed: Duration,
}

/// Force and torque produced by an effect, in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EffectOutput {
    /// Force.
    pub force: Vec3,
    /// Torque.
    pub torque: Vec3,
}

impl EffectOutput {
    /// No force, no torque.
    pub const ZERO: Self = Self {
        force: Vec3::ZERO,
        torque: Vec3::ZERO,
    };

    /// Pure force.
    #[inline]
    #[must_use]
    pub const fn force(force: Vec3) -> Self {
        Self {
            force,
            torque: Vec3::ZERO,
        }
    }
}

impl Add for EffectOutput {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            force: self.force + other.force,
            torque: self.torque + other.torque,
        }
    }
}

impl AddAssign for EffectOutput {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Mul<f64> for EffectOutput {
    type Output = Self;

    fn mul(self, weight: f64) -> Self {
        Self {
            force: self.force * weight,
            torque: self.torque * weight,
        }
    }
}

/// Something that renders a force on the real-time thread.
///
/// Implementations must be cheap: `calculate_forces` runs every tick.
pub trait ForceEffect: Send + Sync + Debug {
    /// Force and torque for the given device state.
    fn calculate_forces(&self, input: &EffectInput) -> EffectOutput;

    /// Whether the effect fades in and out over a scene-graph period.
    fn is_interpolated(&self) -> bool {
        false
    }
}

/// An effect set handed to a device.
pub type EffectVec = Vec<Arc<dyn ForceEffect>>;

// ----------------------------------------------------------------------
// Effects
// ----------------------------------------------------------------------

/// Damped spring pulling the device towards a point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpringEffect {
    /// Anchor point in world space.
    pub position: Vec3,
    /// Stiffness, N/m.
    pub spring_constant: f64,
    /// Damping, Ns/m.
    pub damping: f64,
    /// Cross-fade on effect changes.
    pub interpolate: bool,
}

impl SpringEffect {
    /// Undamped, interpolated spring.
    #[must_use]
    pub const fn new(position: Vec3, spring_constant: f64) -> Self {
        Self {
            position,
            spring_constant,
            damping: 0.0,
            interpolate: true,
        }
    }

    /// Sets the damping.
    #[must_use]
    pub const fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }
}

impl Default for SpringEffect {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 100.0)
    }
}

impl ForceEffect for SpringEffect {
    fn calculate_forces(&self, input: &EffectInput) -> EffectOutput {
        let stretch = self.position - input.position;
        EffectOutput::force(stretch * self.spring_constant - input.velocity * self.damping)
    }

    fn is_interpolated(&self) -> bool {
        self.interpolate
    }
}

/// The same force every tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantForce {
    /// Force.
    pub force: Vec3,
    /// Torque.
    pub torque: Vec3,
    /// Cross-fade on effect changes.
    pub interpolate: bool,
}

impl ForceEffect for ConstantForce {
    fn calculate_forces(&self, _input: &EffectInput) -> EffectOutput {
        EffectOutput {
            force: self.force,
            torque: self.torque,
        }
    }

    fn is_interpolated(&self) -> bool {
        self.interpolate
    }
}

// ----------------------------------------------------------------------
// Double buffer
// ----------------------------------------------------------------------

/// Current and previous effect set of a device, with the timing needed
/// to cross-fade between them.
///
/// Owned by the device loop; the scene graph swaps a new set in through a
/// synchronous callback, so a tick never sees a half-updated set.
#[derive(Debug, Default)]
pub struct EffectBuffers {
    current: EffectVec,
    last: EffectVec,
    last_change: Option<Instant>,
    last_loop_time: Duration,
}

impl EffectBuffers {
    /// Empty buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `effects` current and the current set the fading one.
    pub fn swap(&mut self, effects: EffectVec, now: Instant) {
        if let Some(previous) = self.last_change {
            self.last_loop_time = now.saturating_duration_since(previous);
        }
        self.last_change = Some(now);
        self.last = std::mem::replace(&mut self.current, effects);
    }

    /// Weight of the current set at `now`, in `[0, 1]`.
    #[must_use]
    pub fn weight(&self, now: Instant) -> f64 {
        let Some(changed) = self.last_change else {
            return 1.0;
        };
        if self.last_loop_time.is_zero() {
            return 1.0;
        }
        let since = now.saturating_duration_since(changed);
        (since.as_secs_f64() / self.last_loop_time.as_secs_f64()).min(1.0)
    }

    /// Sum of all effects at `now`.
    #[must_use]
    pub fn evaluate(&self, input: &EffectInput, now: Instant) -> EffectOutput {
        let weight = self.weight(now);
        let mut output = EffectOutput::ZERO;
        for effect in &self.current {
            let contribution = effect.calculate_forces(input);
            output += if effect.is_interpolated() {
                contribution * weight
            } else {
                contribution
            };
        }
        if weight < 1.0 {
            for effect in self.last.iter().filter(|effect| effect.is_interpolated()) {
                output += effect.calculate_forces(input) * (1.0 - weight);
            }
        }
        output
    }

    /// The active effect set.
    #[inline]
    #[must_use]
    pub fn current(&self) -> &[Arc<dyn ForceEffect>] {
        &self.current
    }

    /// Time between the last two swaps.
    #[inline]
    #[must_use]
    pub const fn last_loop_time(&self) -> Duration {
        self.last_loop_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(position: Vec3) -> EffectInput {
        EffectInput {
            position,
            velocity: Vec3::ZERO,
            orientation: Rotation::IDENTITY,
            elapsed: Duration::ZERO,
        }
    }

    fn push(x: f64, interpolate: bool) -> Arc<dyn ForceEffect> {
        Arc::new(ConstantForce {
            force: Vec3::new(x, 0.0, 0.0),
            torque: Vec3::ZERO,
            interpolate,
        })
    }

    #[test]
    fn test_spring_pulls_towards_anchor() {
        let spring = SpringEffect::new(Vec3::ZERO, 200.0).with_damping(2.0);
        let mut input = at(Vec3::new(0.01, 0.0, 0.0));
        input.velocity = Vec3::new(0.5, 0.0, 0.0);

        let output = spring.calculate_forces(&input);
        assert!(output.force.approx_eq(Vec3::new(-3.0, 0.0, 0.0), 1e-12));
        assert_eq!(output.torque, Vec3::ZERO);
    }

    #[test]
    fn test_spring_deserializes_with_defaults() {
        let spring: SpringEffect = toml::from_str("spring_constant = 50.0").unwrap();
        assert_eq!(spring.position, Vec3::ZERO);
        assert!((spring.spring_constant - 50.0).abs() < f64::EPSILON);
        assert!(spring.interpolate);
    }

    #[test]
    fn test_first_set_applies_at_full_strength() {
        let mut buffers = EffectBuffers::new();
        let start = Instant::now();
        buffers.swap(vec![push(1.0, true)], start);

        assert!((buffers.weight(start) - 1.0).abs() < f64::EPSILON);
        let output = buffers.evaluate(&at(Vec3::ZERO), start);
        assert!((output.force.x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolated_sets_cross_fade() {
        let mut buffers = EffectBuffers::new();
        let start = Instant::now();
        let period = Duration::from_millis(16);
        buffers.swap(vec![push(1.0, true)], start);
        buffers.swap(vec![push(3.0, true)], start + period);

        let halfway = start + period + period / 2;
        assert!((buffers.weight(halfway) - 0.5).abs() < 1e-9);
        let output = buffers.evaluate(&at(Vec3::ZERO), halfway);
        assert!((output.force.x - 2.0).abs() < 1e-9);

        let later = start + period * 3;
        let output = buffers.evaluate(&at(Vec3::ZERO), later);
        assert!((output.force.x - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_plain_effects_switch_immediately() {
        let mut buffers = EffectBuffers::new();
        let start = Instant::now();
        let period = Duration::from_millis(10);
        buffers.swap(vec![push(5.0, false)], start);
        buffers.swap(vec![push(-1.0, false)], start + period);

        let output = buffers.evaluate(&at(Vec3::ZERO), start + period);
        assert!((output.force.x + 1.0).abs() < 1e-12);
        assert_eq!(buffers.current().len(), 1);
        assert_eq!(buffers.last_loop_time(), period);
    }

    #[test]
    fn test_output_arithmetic() {
        let a = EffectOutput {
            force: Vec3::new(1.0, 2.0, 3.0),
            torque: Vec3::new(0.0, 1.0, 0.0),
        };
        let mut sum = a + a * 2.0;
        assert_eq!(sum.force, Vec3::new(3.0, 6.0, 9.0));
        sum += EffectOutput::force(Vec3::new(-3.0, 0.0, 0.0));
        assert_eq!(sum.force, Vec3::new(0.0, 6.0, 9.0));
        assert_eq!(sum.torque, Vec3::new(0.0, 3.0, 0.0));
    }
}
