//! Noise schedules for the rotational and translational channels.
//!
//! A schedule holds one `(rotation_sigma, translation_sigma)` pair per timestep `t ∈ [0, T]`.
//! Entry `0` is exactly zero, so the last reverse step collapses onto a single pose, and
//! the scales never decrease as `t` grows.

use serde::Deserialize;
use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Offset of the cosine profile that keeps the first steps from being vanishingly small.
const COSINE_OFFSET: f64 = 0.008;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleProfile {
    #[default]
    Linear,
    Cosine,
}

impl FromStr for ScheduleProfile {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(ScheduleProfile::Linear),
            "cosine" => Ok(ScheduleProfile::Cosine),
            other => Err(ScheduleError::InvalidSchedule(format!(
                "unknown profile '{}', expected 'linear' or 'cosine'",
                other
            ))),
        }
    }
}

impl fmt::Display for ScheduleProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleProfile::Linear => write!(f, "linear"),
            ScheduleProfile::Cosine => write!(f, "cosine"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseLevel {
    pub rotation: f64,
    pub translation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSchedule {
    profile: ScheduleProfile,
    levels: Vec<NoiseLevel>,
}

impl NoiseSchedule {
    /// Builds the per-step noise scales for `num_steps` reverse steps.
    ///
    /// # Arguments
    ///
    /// * `num_steps` - Number of reverse steps `T`; must be positive.
    /// * `rotation_max` - Rotational noise scale at `t = T` (radians).
    /// * `translation_max` - Translational noise scale at `t = T` (Å).
    /// * `profile` - Shape of the decay between `t = T` and `t = 0`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidSchedule`] if `num_steps` is zero, a maximum is negative
    /// or not finite, or the generated scales are not monotonic.
    pub fn build(
        num_steps: usize,
        rotation_max: f64,
        translation_max: f64,
        profile: ScheduleProfile,
    ) -> Result<Self, ScheduleError> {
        if num_steps == 0 {
            return Err(ScheduleError::InvalidSchedule(
                "number of steps must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("rotation_max", rotation_max),
            ("translation_max", translation_max),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ScheduleError::InvalidSchedule(format!(
                    "{} must be a finite, non-negative number (got {})",
                    name, value
                )));
            }
        }

        let levels = (0..=num_steps)
            .map(|t| {
                let shape = profile_shape(profile, t, num_steps);
                NoiseLevel {
                    rotation: rotation_max * shape,
                    translation: translation_max * shape,
                }
            })
            .collect();

        let schedule = Self { profile, levels };
        schedule.validate()?;
        Ok(schedule)
    }

    fn validate(&self) -> Result<(), ScheduleError> {
        let first = self.levels[0];
        if first.rotation != 0.0 || first.translation != 0.0 {
            return Err(ScheduleError::InvalidSchedule(
                "noise at t = 0 must be exactly zero".to_string(),
            ));
        }
        for (t, pair) in self.levels.windows(2).enumerate() {
            let (lower, upper) = (pair[0], pair[1]);
            if !upper.rotation.is_finite() || !upper.translation.is_finite() {
                return Err(ScheduleError::InvalidSchedule(format!(
                    "non-finite scale at t = {}",
                    t + 1
                )));
            }
            if upper.rotation < lower.rotation || upper.translation < lower.translation {
                return Err(ScheduleError::InvalidSchedule(format!(
                    "scales decrease between t = {} and t = {}",
                    t,
                    t + 1
                )));
            }
        }
        Ok(())
    }

    /// Number of reverse steps `T`.
    pub fn num_steps(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn profile(&self) -> ScheduleProfile {
        self.profile
    }

    pub fn level(&self, t: usize) -> Option<NoiseLevel> {
        self.levels.get(t).copied()
    }

    pub fn levels(&self) -> &[NoiseLevel] {
        &self.levels
    }

    pub fn rotation_sigma(&self, t: usize) -> f64 {
        self.levels[t.min(self.num_steps())].rotation
    }

    pub fn translation_sigma(&self, t: usize) -> f64 {
        self.levels[t.min(self.num_steps())].translation
    }

    /// Fraction of the remaining displacement toward the prediction covered by the step
    /// `t → t-1`, for each channel: `(σ_t² − σ_{t−1}²) / σ_t²`.
    ///
    /// A channel with `σ_t = 0` is already at the data and takes the full step (`1.0`).
    pub fn step_fraction(&self, t: usize) -> NoiseLevel {
        let (current, previous) = self.pair(t);
        NoiseLevel {
            rotation: bridge_fraction(current.rotation, previous.rotation),
            translation: bridge_fraction(current.translation, previous.translation),
        }
    }

    /// Standard deviation of the Gaussian bridge between `t` and `t-1`:
    /// `σ_{t−1} · sqrt(σ_t² − σ_{t−1}²) / σ_t`. Zero for the final step.
    pub fn posterior_std(&self, t: usize) -> NoiseLevel {
        let (current, previous) = self.pair(t);
        NoiseLevel {
            rotation: bridge_std(current.rotation, previous.rotation),
            translation: bridge_std(current.translation, previous.translation),
        }
    }

    /// Whether the step out of `t` injects no fresh noise.
    pub fn is_noise_free(&self, t: usize) -> bool {
        let std = self.posterior_std(t);
        std.rotation == 0.0 && std.translation == 0.0
    }

    fn pair(&self, t: usize) -> (NoiseLevel, NoiseLevel) {
        let t = t.clamp(1, self.num_steps());
        (self.levels[t], self.levels[t - 1])
    }
}

fn profile_shape(profile: ScheduleProfile, t: usize, num_steps: usize) -> f64 {
    if t == 0 {
        return 0.0;
    }
    let fraction = t as f64 / num_steps as f64;
    match profile {
        ScheduleProfile::Linear => fraction,
        ScheduleProfile::Cosine => {
            let alpha_bar = |x: f64| {
                ((x + COSINE_OFFSET) / (1.0 + COSINE_OFFSET) * FRAC_PI_2)
                    .cos()
                    .powi(2)
            };
            let ratio = (alpha_bar(fraction) / alpha_bar(0.0)).clamp(0.0, 1.0);
            (1.0 - ratio).sqrt()
        }
    }
}

fn bridge_fraction(current: f64, previous: f64) -> f64 {
    if current <= 0.0 {
        return 1.0;
    }
    ((current * current - previous * previous) / (current * current)).clamp(0.0, 1.0)
}

fn bridge_std(current: f64, previous: f64) -> f64 {
    if current <= 0.0 || previous <= 0.0 {
        return 0.0;
    }
    previous * (current * current - previous * previous).max(0.0).sqrt() / current
}
