use crate::core::utils::geometry::{so3_exp, so3_log};
use nalgebra::{Point3, Rotation3, UnitQuaternion, Vector3};
use std::ops::{Add, AddAssign, Mul};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("Numeric instability: {0}")]
    NumericInstability(String),
}

/// A small rigid-body update expressed in the tangent space of a frame.
///
/// Both components live in the world frame: the rotation vector is applied on the left of the
/// current orientation (`R' = exp(ω) R`) and the translation is added to the position
/// (`x' = x + v`). This makes deltas linear objects that can be summed, scaled and rotated.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RigidDelta {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidDelta {
    pub fn new(rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn translation_only(translation: Vector3<f64>) -> Self {
        Self {
            rotation: Vector3::zeros(),
            translation,
        }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.rotation.iter().all(|v| v.is_finite())
            && self.translation.iter().all(|v| v.is_finite())
    }

    /// Expresses this world-frame delta in the coordinate system reached through `rotation`'s
    /// inverse, i.e. returns `(Rᵀω, Rᵀv)`.
    pub fn pulled_back(&self, rotation: &Rotation3<f64>) -> Self {
        let inverse = rotation.inverse();
        Self {
            rotation: inverse * self.rotation,
            translation: inverse * self.translation,
        }
    }

    /// Expresses this delta in the coordinate system reached through `rotation`, i.e. `(Rω, Rv)`.
    pub fn pushed_forward(&self, rotation: &Rotation3<f64>) -> Self {
        Self {
            rotation: rotation * self.rotation,
            translation: rotation * self.translation,
        }
    }
}

impl Add for RigidDelta {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            rotation: self.rotation + rhs.rotation,
            translation: self.translation + rhs.translation,
        }
    }
}

impl AddAssign for RigidDelta {
    fn add_assign(&mut self, rhs: Self) {
        self.rotation += rhs.rotation;
        self.translation += rhs.translation;
    }
}

impl Mul<f64> for RigidDelta {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self {
            rotation: self.rotation * rhs,
            translation: self.translation * rhs,
        }
    }
}

/// A rigid-body transform `x ↦ R x + t`, used for symmetry operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidOperator {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidOperator {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_rotation(rotation: Rotation3<f64>) -> Self {
        Self::new(rotation, Vector3::zeros())
    }

    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Returns `self ∘ other`, the operator that applies `other` first.
    pub fn compose(&self, other: &RigidOperator) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn apply_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    pub fn is_identity(&self, tolerance: f64) -> bool {
        self.rotation.angle() < tolerance && self.translation.norm() < tolerance
    }

    pub fn approx_eq(&self, other: &RigidOperator, tolerance: f64) -> bool {
        self.rotation.angle_to(&other.rotation) < tolerance
            && (self.translation - other.translation).norm() < tolerance
    }
}

/// The rigid-body pose of one residue: orientation in SO(3) and position in Å.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidFrame {
    pub orientation: UnitQuaternion<f64>,
    pub position: Point3<f64>,
}

impl Default for RigidFrame {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidFrame {
    pub fn new(orientation: UnitQuaternion<f64>, position: Point3<f64>) -> Self {
        Self {
            orientation,
            position,
        }
    }

    pub fn identity() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            position: Point3::origin(),
        }
    }

    pub fn at(position: Point3<f64>) -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            position,
        }
    }

    /// Checks the frame invariant: a unit orientation and a finite position.
    pub fn is_valid(&self) -> bool {
        let q = self.orientation.quaternion();
        q.coords.iter().all(|c| c.is_finite())
            && (q.norm() - 1.0).abs() < 1e-6
            && self.position.iter().all(|c| c.is_finite())
    }

    /// Applies a tangent-space delta and renormalizes the orientation.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NumericInstability`] if the delta is non-finite or the resulting
    /// frame would violate the frame invariant.
    pub fn compose(&self, delta: &RigidDelta) -> Result<RigidFrame, FrameError> {
        if !delta.is_finite() {
            return Err(FrameError::NumericInstability(format!(
                "non-finite delta (rotation: {:?}, translation: {:?})",
                delta.rotation, delta.translation
            )));
        }
        let mut orientation = so3_exp(&delta.rotation) * self.orientation;
        orientation.renormalize();
        let composed = RigidFrame {
            orientation,
            position: self.position + delta.translation,
        };
        if !composed.is_valid() {
            return Err(FrameError::NumericInstability(
                "composed frame is not a valid rigid pose".to_string(),
            ));
        }
        Ok(composed)
    }

    /// The world-frame delta that maps `self` onto `target`, so that
    /// `self.compose(&self.delta_to(target))` reproduces `target`.
    pub fn delta_to(&self, target: &RigidFrame) -> RigidDelta {
        RigidDelta {
            rotation: so3_log(&(target.orientation * self.orientation.inverse())),
            translation: target.position - self.position,
        }
    }

    /// Geodesic interpolation on SO(3) combined with linear interpolation of the position.
    ///
    /// `weight = 0` returns `a`, `weight = 1` returns `b`.
    pub fn interpolate(a: &RigidFrame, b: &RigidFrame, weight: f64) -> RigidFrame {
        let relative = so3_log(&(b.orientation * a.orientation.inverse()));
        let mut orientation = so3_exp(&(relative * weight)) * a.orientation;
        orientation.renormalize();
        RigidFrame {
            orientation,
            position: a.position + (b.position - a.position) * weight,
        }
    }

    /// Applies a rigid operator to the whole frame (`g ∘ F`).
    pub fn transformed(&self, operator: &RigidOperator) -> RigidFrame {
        let rotation = UnitQuaternion::from_rotation_matrix(&operator.rotation);
        RigidFrame {
            orientation: rotation * self.orientation,
            position: operator.apply_point(&self.position),
        }
    }

    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        self.orientation.to_rotation_matrix()
    }

    /// Maps a point given in this frame's local coordinates into world coordinates.
    pub fn to_world(&self, local: &Vector3<f64>) -> Point3<f64> {
        self.position + self.orientation * local
    }

    /// Builds the residue frame from backbone N, Cα and C positions.
    ///
    /// The frame sits on Cα with x along Cα→C and N in the xy-plane (positive y), which is the
    /// convention of [`IDEAL_BACKBONE`]. Returns `None` for collinear or non-finite atoms.
    pub fn from_backbone(n: &Point3<f64>, ca: &Point3<f64>, c: &Point3<f64>) -> Option<Self> {
        let e1 = (c - ca).try_normalize(1e-8)?;
        let to_n = n - ca;
        let e2 = (to_n - e1 * e1.dot(&to_n)).try_normalize(1e-8)?;
        let e3 = e1.cross(&e2);
        let rotation = Rotation3::from_basis_unchecked(&[e1, e2, e3]);
        let frame = Self::new(UnitQuaternion::from_rotation_matrix(&rotation), *ca);
        frame.is_valid().then_some(frame)
    }

    /// World positions of the ideal N, Cα and C atoms of this residue.
    pub fn backbone_atoms(&self) -> [Point3<f64>; 3] {
        IDEAL_BACKBONE.map(|local| self.to_world(&Vector3::from(local)))
    }
}

/// Ideal N, Cα, C coordinates (Å) in the local residue frame.
pub const IDEAL_BACKBONE: [[f64; 3]; 3] = [
    [-0.5272, 1.3593, 0.0],
    [0.0, 0.0, 0.0],
    [1.5233, 0.0, 0.0],
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    const TOLERANCE: f64 = 1e-9;

    fn frame(axis_angle: Vector3<f64>, position: [f64; 3]) -> RigidFrame {
        RigidFrame::new(UnitQuaternion::from_scaled_axis(axis_angle), Point3::from(position))
    }

    #[test]
    fn compose_with_zero_delta_returns_same_frame() {
        let f = frame(Vector3::new(0.1, 0.2, 0.3), [1.0, 2.0, 3.0]);
        let composed = f.compose(&RigidDelta::zero()).unwrap();
        assert!(composed.orientation.angle_to(&f.orientation) < TOLERANCE);
        assert!((composed.position - f.position).norm() < TOLERANCE);
    }

    #[test]
    fn compose_applies_rotation_on_the_left_and_translates_position() {
        let f = RigidFrame::identity();
        let delta = RigidDelta::new(Vector3::new(0.0, 0.0, FRAC_PI_2), Vector3::new(1.0, 0.0, 0.0));
        let composed = f.compose(&delta).unwrap();
        let rotated = composed.orientation * Vector3::x();
        assert!((rotated - Vector3::y()).norm() < TOLERANCE);
        assert!((composed.position - Point3::new(1.0, 0.0, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn compose_rejects_non_finite_delta() {
        let f = RigidFrame::identity();
        let delta = RigidDelta::translation_only(Vector3::new(f64::NAN, 0.0, 0.0));
        assert!(matches!(
            f.compose(&delta),
            Err(FrameError::NumericInstability(_))
        ));
        let delta = RigidDelta::new(Vector3::new(0.0, f64::INFINITY, 0.0), Vector3::zeros());
        assert!(f.compose(&delta).is_err());
    }

    #[test]
    fn compose_keeps_orientation_normalized_after_many_updates() {
        let mut f = RigidFrame::identity();
        let delta = RigidDelta::new(Vector3::new(0.013, -0.021, 0.007), Vector3::zeros());
        for _ in 0..10_000 {
            f = f.compose(&delta).unwrap();
        }
        assert!((f.orientation.quaternion().norm() - 1.0).abs() < 1e-12);
        assert!(f.is_valid());
    }

    #[test]
    fn delta_to_then_compose_reaches_target() {
        let a = frame(Vector3::new(0.4, -0.2, 0.9), [0.0, 1.0, -2.0]);
        let b = frame(Vector3::new(-1.1, 0.5, 0.3), [3.0, -4.0, 5.0]);
        let reached = a.compose(&a.delta_to(&b)).unwrap();
        assert!(reached.orientation.angle_to(&b.orientation) < 1e-9);
        assert!((reached.position - b.position).norm() < 1e-9);
    }

    #[test]
    fn interpolate_endpoints_and_midpoint() {
        let a = RigidFrame::identity();
        let b = frame(Vector3::new(0.0, 0.0, PI / 2.0), [2.0, 0.0, 0.0]);

        let start = RigidFrame::interpolate(&a, &b, 0.0);
        let end = RigidFrame::interpolate(&a, &b, 1.0);
        let mid = RigidFrame::interpolate(&a, &b, 0.5);

        assert!(start.orientation.angle_to(&a.orientation) < TOLERANCE);
        assert!(end.orientation.angle_to(&b.orientation) < TOLERANCE);
        assert!((mid.orientation.angle() - PI / 4.0).abs() < 1e-9);
        assert!((mid.position - Point3::new(1.0, 0.0, 0.0)).norm() < TOLERANCE);
    }

    #[test]
    fn interpolate_does_not_panic_for_antipodal_orientations() {
        let a = RigidFrame::identity();
        let b = frame(Vector3::new(PI, 0.0, 0.0), [0.0, 0.0, 0.0]);
        let mid = RigidFrame::interpolate(&a, &b, 0.5);
        assert!(mid.is_valid());
    }

    #[test]
    fn operator_inverse_undoes_operator() {
        let op = RigidOperator::new(
            Rotation3::from_axis_angle(&Vector3::y_axis(), 1.2),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let p = Point3::new(-0.5, 4.0, 2.2);
        let back = op.inverse().apply_point(&op.apply_point(&p));
        assert!((back - p).norm() < TOLERANCE);
        assert!(op.compose(&op.inverse()).is_identity(1e-9));
    }

    #[test]
    fn pulled_back_delta_inverts_pushed_forward_delta() {
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.8);
        let delta = RigidDelta::new(Vector3::new(0.1, 0.2, 0.3), Vector3::new(1.0, -1.0, 0.5));
        let round = delta.pushed_forward(&rotation).pulled_back(&rotation);
        assert!((round.rotation - delta.rotation).norm() < TOLERANCE);
        assert!((round.translation - delta.translation).norm() < TOLERANCE);
    }

    #[test]
    fn from_backbone_recovers_frame_of_its_own_ideal_atoms() {
        let f = frame(Vector3::new(-0.7, 0.3, 1.9), [5.0, -2.0, 8.0]);
        let [n, ca, c] = f.backbone_atoms();
        let rebuilt = RigidFrame::from_backbone(&n, &ca, &c).unwrap();
        assert!(rebuilt.orientation.angle_to(&f.orientation) < 1e-9);
        assert!((rebuilt.position - f.position).norm() < 1e-12);
    }

    #[test]
    fn from_backbone_rejects_collinear_atoms() {
        let n = Point3::new(-1.0, 0.0, 0.0);
        let ca = Point3::origin();
        let c = Point3::new(1.5, 0.0, 0.0);
        assert!(RigidFrame::from_backbone(&n, &ca, &c).is_none());
    }

    #[test]
    fn transformed_frame_commutes_with_pushed_forward_delta() {
        let op = RigidOperator::from_rotation(Rotation3::from_axis_angle(&Vector3::z_axis(), 1.0));
        let f = frame(Vector3::new(0.2, 0.1, -0.3), [4.0, 0.0, 1.0]);
        let delta = RigidDelta::new(Vector3::new(0.05, 0.0, 0.1), Vector3::new(0.5, 0.2, 0.0));

        let lhs = f.compose(&delta).unwrap().transformed(&op);
        let rhs = f
            .transformed(&op)
            .compose(&delta.pushed_forward(&op.rotation))
            .unwrap();
        assert!(lhs.orientation.angle_to(&rhs.orientation) < 1e-9);
        assert!((lhs.position - rhs.position).norm() < 1e-9);
    }
}
