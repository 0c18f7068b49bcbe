use nalgebra::{Matrix3, Point3, Quaternion, Rotation3, UnitQuaternion, Vector3};
use rand::Rng;
use rand_distr::StandardNormal;

/// Rotation vector below which the exponential map is treated as the identity.
const SMALL_ANGLE: f64 = 1e-12;

/// Maps a rotation vector (axis scaled by angle, radians) onto SO(3).
pub fn so3_exp(rotation_vector: &Vector3<f64>) -> UnitQuaternion<f64> {
    if rotation_vector.norm_squared() < SMALL_ANGLE * SMALL_ANGLE {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_scaled_axis(*rotation_vector)
}

/// Inverse of [`so3_exp`]; the returned angle lies in `[0, π]`.
pub fn so3_log(rotation: &UnitQuaternion<f64>) -> Vector3<f64> {
    rotation.scaled_axis()
}

/// Geodesic distance in radians between two orientations.
pub fn angular_distance(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    a.angle_to(b)
}

/// Draws an orientation uniformly distributed over SO(3).
///
/// Normalizing an isotropic 4-D Gaussian sample yields the Haar measure on unit quaternions.
pub fn random_rotation<R: Rng + ?Sized>(rng: &mut R) -> UnitQuaternion<f64> {
    loop {
        let q = Quaternion::new(
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
        );
        if q.norm() > 1e-8 {
            return UnitQuaternion::from_quaternion(q);
        }
    }
}

/// Draws a vector with independent standard normal components.
pub fn gaussian_vector<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    Vector3::new(
        rng.sample(StandardNormal),
        rng.sample(StandardNormal),
        rng.sample(StandardNormal),
    )
}

pub fn centroid(points: &[Point3<f64>]) -> Option<Point3<f64>> {
    if points.is_empty() {
        return None;
    }
    let sum: Vector3<f64> = points.iter().map(|p| p.coords).sum();
    Some(Point3::from(sum / points.len() as f64))
}

/// Optimal rigid superposition (Kabsch) of `from_points` onto `to_points`.
///
/// Returns `(rotation, translation)` such that `rotation * from + translation` best matches
/// `to` in the least-squares sense, or `None` when the inputs are empty, of different length,
/// or the decomposition fails.
pub fn superpose(
    from_points: &[Point3<f64>],
    to_points: &[Point3<f64>],
) -> Option<(Rotation3<f64>, Vector3<f64>)> {
    if from_points.len() != to_points.len() {
        return None;
    }
    let from_centroid = centroid(from_points)?;
    let to_centroid = centroid(to_points)?;

    let h = from_points
        .iter()
        .zip(to_points.iter())
        .fold(Matrix3::zeros(), |acc, (f, t)| {
            acc + (t - to_centroid) * (f - from_centroid).transpose()
        });

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let d = (u * v_t).determinant();
    let mut correction = Matrix3::identity();
    if d < 0.0 {
        correction[(2, 2)] = -1.0;
    }

    let rotation = Rotation3::from_matrix_unchecked(u * correction * v_t);
    let translation = to_centroid.coords - rotation * from_centroid.coords;
    Some((rotation, translation))
}

pub fn calculate_rmsd(coords1: &[Point3<f64>], coords2: &[Point3<f64>]) -> Option<f64> {
    if coords1.len() != coords2.len() || coords1.is_empty() {
        return None;
    }
    let n = coords1.len() as f64;
    let squared_dist_sum: f64 = coords1
        .iter()
        .zip(coords2.iter())
        .map(|(p1, p2)| (p1 - p2).norm_squared())
        .sum();
    Some((squared_dist_sum / n).sqrt())
}

/// RMSD after optimal superposition of `coords2` onto `coords1`.
pub fn calculate_aligned_rmsd(coords1: &[Point3<f64>], coords2: &[Point3<f64>]) -> Option<f64> {
    let (rotation, translation) = superpose(coords2, coords1)?;
    let aligned: Vec<_> = coords2
        .iter()
        .map(|p| rotation * p + translation)
        .collect();
    calculate_rmsd(coords1, &aligned)
}
