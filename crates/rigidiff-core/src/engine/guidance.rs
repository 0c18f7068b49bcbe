use super::config::GuidanceConfig;
use crate::core::models::frame::{RigidDelta, RigidFrame};
use crate::core::schedule::NoiseLevel;
use nalgebra::Vector3;

/// Caps a vector's length at `max_norm`, keeping its direction.
pub fn clip_norm(vector: Vector3<f64>, max_norm: f64) -> Vector3<f64> {
    let norm = vector.norm();
    if norm > max_norm && norm > 0.0 {
        vector * (max_norm / norm)
    } else {
        vector
    }
}

/// Combines the model's proposed move with the potential bias, per residue.
///
/// The model move is the fraction `γ_t` of the displacement from `current` to `predicted`,
/// taken channel by channel in the tangent space. The bias is the clipped, strength-scaled
/// negative gradient, scaled by the same translational `γ_t` and added to the translation
/// channel before any noise is injected. Non-finite predictions produce non-finite deltas,
/// which the caller treats as an unstable update.
pub fn combine(
    current: &[RigidFrame],
    predicted: &[RigidFrame],
    gradient: &[Vector3<f64>],
    step_fraction: NoiseLevel,
    config: &GuidanceConfig,
) -> Vec<RigidDelta> {
    current
        .iter()
        .zip(predicted)
        .enumerate()
        .map(|(i, (frame, target))| {
            let toward = frame.delta_to(target);
            let model = RigidDelta::new(
                toward.rotation * step_fraction.rotation,
                toward.translation * step_fraction.translation,
            );
            let bias = gradient.get(i).map_or_else(Vector3::zeros, |g| {
                -clip_norm(g * config.strength, config.max_bias_step) * step_fraction.translation
            });
            model + RigidDelta::translation_only(bias)
        })
        .collect()
}
