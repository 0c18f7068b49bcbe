use super::config::NoiseConfig;
use crate::core::models::frame::{RigidDelta, RigidFrame};
use crate::core::schedule::{NoiseLevel, NoiseSchedule};
use crate::core::utils::geometry::{gaussian_vector, random_rotation, so3_exp};
use nalgebra::Point3;
use rand::Rng;

/// Draws the fully noised starting frames: positions from `N(0, σ_T²)` per axis and
/// orientations uniform over SO(3).
pub fn initial_frames<R: Rng + ?Sized>(
    rng: &mut R,
    num_residues: usize,
    schedule: &NoiseSchedule,
) -> Vec<RigidFrame> {
    let sigma = schedule.translation_sigma(schedule.num_steps());
    (0..num_residues)
        .map(|_| {
            let orientation = random_rotation(rng);
            let position = Point3::from(gaussian_vector(rng) * sigma);
            RigidFrame::new(orientation, position)
        })
        .collect()
}

/// Noises clean frames forward to timestep `t`, for partial diffusion.
///
/// Residues flagged in `fixed` are returned unchanged. The rotational channel uses an isotropic
/// Gaussian rotation vector with standard deviation `σ_rot(t)`.
pub fn forward_noise<R: Rng + ?Sized>(
    rng: &mut R,
    frames: &[RigidFrame],
    t: usize,
    schedule: &NoiseSchedule,
    fixed: &[bool],
) -> Vec<RigidFrame> {
    let rotation_sigma = schedule.rotation_sigma(t);
    let translation_sigma = schedule.translation_sigma(t);
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let rotation = gaussian_vector(rng) * rotation_sigma;
            let translation = gaussian_vector(rng) * translation_sigma;
            if fixed.get(i).copied().unwrap_or(false) {
                return *frame;
            }
            let mut orientation = so3_exp(&rotation) * frame.orientation;
            orientation.renormalize();
            RigidFrame::new(orientation, frame.position + translation)
        })
        .collect()
}

/// Fresh noise for one reverse step, one delta per residue.
///
/// Draws are made even when `std` is zero so that the random stream consumed per step does not
/// depend on the schedule.
pub fn posterior_noise<R: Rng + ?Sized>(
    rng: &mut R,
    num_residues: usize,
    std: NoiseLevel,
    scales: &NoiseConfig,
) -> Vec<RigidDelta> {
    let rotation_std = std.rotation * scales.noise_scale_rotation;
    let translation_std = std.translation * scales.noise_scale_translation;
    (0..num_residues)
        .map(|_| {
            let rotation = gaussian_vector(rng) * rotation_std;
            let translation = gaussian_vector(rng) * translation_std;
            RigidDelta::new(rotation, translation)
        })
        .collect()
}
