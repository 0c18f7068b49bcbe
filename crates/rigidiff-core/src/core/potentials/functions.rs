use nalgebra::{Point3, Vector3};

const MIN_DISTANCE: f64 = 1e-9;
const MAX_EXPONENT: f64 = 50.0;

/// Flat-bottom harmonic well that turns linear `clip` Å past either wall.
///
/// Returns `(value, d value / d distance)`. The penalty is zero on `[lower, upper]`, quadratic
/// with stiffness `k` just outside, and linear with slope `k · clip` beyond the clip distance,
/// which keeps gradients bounded for badly violated targets.
#[inline]
pub fn flat_bottom(dist: f64, lower: f64, upper: f64, stiffness: f64, clip: f64) -> (f64, f64) {
    let excess = if dist > upper {
        dist - upper
    } else if dist < lower {
        dist - lower
    } else {
        return (0.0, 0.0);
    };
    let magnitude = excess.abs();
    if magnitude <= clip {
        (0.5 * stiffness * excess * excess, stiffness * excess)
    } else {
        (
            0.5 * stiffness * clip * clip + stiffness * clip * (magnitude - clip),
            stiffness * clip * excess.signum(),
        )
    }
}

/// Harmonic penalty `0.5 · k · (d − d₀)²`, returned as `(value, derivative)`.
#[inline]
pub fn harmonic(dist: f64, target: f64, stiffness: f64) -> (f64, f64) {
    let deviation = dist - target;
    (0.5 * stiffness * deviation * deviation, stiffness * deviation)
}

/// Smooth contact indicator `1 / (1 + exp(sharpness · (d − d₀)))`, returned as
/// `(value, derivative)`. Close to 1 below the contact distance and to 0 above it.
#[inline]
pub fn sigmoid_contact(dist: f64, contact_distance: f64, sharpness: f64) -> (f64, f64) {
    let exponent = (sharpness * (dist - contact_distance)).clamp(-MAX_EXPONENT, MAX_EXPONENT);
    let s = 1.0 / (1.0 + exponent.exp());
    (s, -sharpness * s * (1.0 - s))
}

/// Distance between two points and the unit vector pointing from `b` to `a`.
///
/// Coincident points yield a zero direction so that callers add no gradient.
#[inline]
pub fn distance_and_direction(a: &Point3<f64>, b: &Point3<f64>) -> (f64, Vector3<f64>) {
    let diff = a - b;
    let dist = diff.norm();
    if dist < MIN_DISTANCE {
        (dist, Vector3::zeros())
    } else {
        (dist, diff / dist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn derivative_by_difference(f: impl Fn(f64) -> f64, x: f64) -> f64 {
        let h = 1e-6;
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn flat_bottom_is_zero_inside_the_well() {
        assert_eq!(flat_bottom(5.0, 4.0, 6.0, 2.0, 1.0), (0.0, 0.0));
        assert_eq!(flat_bottom(4.0, 4.0, 6.0, 2.0, 1.0), (0.0, 0.0));
    }

    #[test]
    fn flat_bottom_derivative_matches_finite_difference_on_every_branch() {
        for dist in [1.5, 3.5, 6.5, 9.0] {
            let (_, analytic) = flat_bottom(dist, 4.0, 6.0, 2.0, 1.0);
            let numeric = derivative_by_difference(|d| flat_bottom(d, 4.0, 6.0, 2.0, 1.0).0, dist);
            assert!((analytic - numeric).abs() < 1e-6, "at {}", dist);
        }
    }

    #[test]
    fn flat_bottom_is_linear_beyond_clip() {
        let (_, slope_near) = flat_bottom(8.0, 4.0, 6.0, 2.0, 1.0);
        let (_, slope_far) = flat_bottom(60.0, 4.0, 6.0, 2.0, 1.0);
        assert!((slope_near - slope_far).abs() < TOLERANCE);
        assert!((slope_far - 2.0).abs() < TOLERANCE);
    }

    #[test]
    fn harmonic_is_zero_at_target() {
        assert_eq!(harmonic(3.0, 3.0, 5.0), (0.0, 0.0));
        assert_eq!(harmonic(4.0, 3.0, 2.0), (1.0, 2.0));
    }

    #[test]
    fn sigmoid_contact_is_one_half_at_contact_distance_and_decreasing() {
        let (value, slope) = sigmoid_contact(8.0, 8.0, 2.0);
        assert!((value - 0.5).abs() < TOLERANCE);
        assert!(slope < 0.0);
        let numeric = derivative_by_difference(|d| sigmoid_contact(d, 8.0, 2.0).0, 7.3);
        assert!((sigmoid_contact(7.3, 8.0, 2.0).1 - numeric).abs() < 1e-6);
    }

    #[test]
    fn sigmoid_contact_saturates_without_overflow() {
        let (far, _) = sigmoid_contact(1e6, 8.0, 10.0);
        let (near, _) = sigmoid_contact(-1e6, 8.0, 10.0);
        assert!(far.is_finite() && far < 1e-20);
        assert!((near - 1.0).abs() < 1e-12);
    }

    #[test]
    fn distance_and_direction_handles_coincident_points() {
        let p = Point3::new(1.0, 1.0, 1.0);
        let (dist, dir) = distance_and_direction(&p, &p);
        assert_eq!(dist, 0.0);
        assert_eq!(dir, Vector3::zeros());

        let (dist, dir) = distance_and_direction(&Point3::new(3.0, 0.0, 0.0), &Point3::origin());
        assert!((dist - 3.0).abs() < TOLERANCE);
        assert!((dir - Vector3::x()).norm() < TOLERANCE);
    }
}
