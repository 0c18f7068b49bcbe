use super::SymmetryError;
use crate::core::models::frame::RigidOperator;
use nalgebra::{Rotation3, Unit, Vector3};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

const OPERATOR_TOLERANCE: f64 = 1e-6;
/// Upper bound on closure size; the largest finite point group used here (I) has 60 elements.
const MAX_CLOSURE_ORDER: usize = 120;

/// An ordered list of rigid operators closed under composition (point groups) or an explicit
/// operator list (e.g. crystallographic copies). The first operator is always the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetryGroup {
    name: String,
    operators: Vec<RigidOperator>,
}

impl SymmetryGroup {
    pub fn identity() -> Self {
        Self {
            name: "C1".to_string(),
            operators: vec![RigidOperator::identity()],
        }
    }

    /// Cyclic group `Cn` about the z axis.
    pub fn cyclic(n: usize) -> Result<Self, SymmetryError> {
        if n == 0 {
            return Err(SymmetryError::InvalidGroup(
                "cyclic order must be at least 1".to_string(),
            ));
        }
        let operators = (0..n)
            .map(|k| RigidOperator::from_rotation(z_rotation(k, n)))
            .collect();
        Ok(Self {
            name: format!("C{}", n),
            operators,
        })
    }

    /// Dihedral group `Dn`: `Cn` about z followed by the same rotations composed with a
    /// two-fold about x.
    pub fn dihedral(n: usize) -> Result<Self, SymmetryError> {
        if n < 2 {
            return Err(SymmetryError::InvalidGroup(
                "dihedral order must be at least 2".to_string(),
            ));
        }
        let flip = Rotation3::from_axis_angle(&Vector3::x_axis(), PI);
        let cyclic = (0..n).map(|k| z_rotation(k, n));
        let flipped = (0..n).map(|k| z_rotation(k, n) * flip);
        let operators = cyclic
            .chain(flipped)
            .map(RigidOperator::from_rotation)
            .collect();
        Ok(Self {
            name: format!("D{}", n),
            operators,
        })
    }

    pub fn tetrahedral() -> Result<Self, SymmetryError> {
        Self::from_generators(
            "T",
            &[
                axis_rotation(Vector3::new(1.0, 1.0, 1.0), 3),
                axis_rotation(Vector3::z(), 2),
            ],
        )
    }

    pub fn octahedral() -> Result<Self, SymmetryError> {
        Self::from_generators(
            "O",
            &[
                axis_rotation(Vector3::z(), 4),
                axis_rotation(Vector3::new(1.0, 1.0, 1.0), 3),
            ],
        )
    }

    /// Rotation group of the icosahedron with vertices at cyclic permutations of `(0, ±1, ±φ)`.
    pub fn icosahedral() -> Result<Self, SymmetryError> {
        let phi = (1.0 + 5f64.sqrt()) / 2.0;
        Self::from_generators(
            "I",
            &[
                axis_rotation(Vector3::new(0.0, 1.0, phi), 5),
                axis_rotation(Vector3::new(phi, 0.0, 2.0 * phi + 1.0), 3),
            ],
        )
    }

    /// Closes `generators` under composition, in breadth-first order starting at the identity.
    pub fn from_generators(name: &str, generators: &[RigidOperator]) -> Result<Self, SymmetryError> {
        let mut operators = vec![RigidOperator::identity()];
        let mut frontier = 0;
        while frontier < operators.len() {
            let current = operators[frontier];
            for generator in generators {
                let product = generator.compose(&current);
                if !operators
                    .iter()
                    .any(|op| op.approx_eq(&product, OPERATOR_TOLERANCE))
                {
                    if operators.len() == MAX_CLOSURE_ORDER {
                        return Err(SymmetryError::InvalidGroup(format!(
                            "generators of '{}' do not close within {} operators",
                            name, MAX_CLOSURE_ORDER
                        )));
                    }
                    operators.push(product);
                }
            }
            frontier += 1;
        }
        Ok(Self {
            name: name.to_string(),
            operators,
        })
    }

    /// Uses an explicit operator list as given. The list must start with the identity, which
    /// maps the asymmetric unit onto itself.
    pub fn from_operators(name: &str, operators: Vec<RigidOperator>) -> Result<Self, SymmetryError> {
        let Some(first) = operators.first() else {
            return Err(SymmetryError::InvalidGroup(
                "operator list is empty".to_string(),
            ));
        };
        if !first.is_identity(OPERATOR_TOLERANCE) {
            return Err(SymmetryError::InvalidGroup(
                "the first operator must be the identity".to_string(),
            ));
        }
        for (k, op) in operators.iter().enumerate() {
            let m = op.rotation.matrix();
            let orthonormal = (m * m.transpose() - nalgebra::Matrix3::identity()).norm()
                < OPERATOR_TOLERANCE
                && (m.determinant() - 1.0).abs() < OPERATOR_TOLERANCE;
            if !orthonormal || op.translation.iter().any(|c| !c.is_finite()) {
                return Err(SymmetryError::InvalidGroup(format!(
                    "operator {} is not a proper rigid transform",
                    k
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            operators,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.operators.len()
    }

    pub fn operators(&self) -> &[RigidOperator] {
        &self.operators
    }

    pub fn operator(&self, index: usize) -> Option<&RigidOperator> {
        self.operators.get(index)
    }

    pub fn is_trivial(&self) -> bool {
        self.operators.len() == 1
    }
}

impl Default for SymmetryGroup {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for SymmetryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (order {})", self.name, self.order())
    }
}

impl FromStr for SymmetryGroup {
    type Err = SymmetryError;

    /// Parses `C<n>`, `D<n>`, `T`, `O` or `I`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let unknown = || SymmetryError::UnknownGroup(s.to_string());
        let upper = trimmed.to_ascii_uppercase();
        match upper.as_str() {
            "T" => return Self::tetrahedral(),
            "O" => return Self::octahedral(),
            "I" => return Self::icosahedral(),
            _ => {}
        }
        let (family, order) = upper.split_at_checked(1).ok_or_else(unknown)?;
        let n: usize = order.parse().map_err(|_| unknown())?;
        match family {
            "C" => Self::cyclic(n),
            "D" => Self::dihedral(n),
            _ => Err(unknown()),
        }
    }
}

fn z_rotation(k: usize, n: usize) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), 2.0 * PI * k as f64 / n as f64)
}

fn axis_rotation(axis: Vector3<f64>, fold: usize) -> RigidOperator {
    RigidOperator::from_rotation(Rotation3::from_axis_angle(
        &Unit::new_normalize(axis),
        2.0 * PI / fold as f64,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_closed(group: &SymmetryGroup) {
        for a in group.operators() {
            for b in group.operators() {
                let product = a.compose(b);
                assert!(
                    group
                        .operators()
                        .iter()
                        .any(|op| op.approx_eq(&product, 1e-6)),
                    "{} is not closed",
                    group.name()
                );
            }
        }
    }

    #[test]
    fn point_groups_have_expected_orders() {
        assert_eq!(SymmetryGroup::identity().order(), 1);
        assert_eq!(SymmetryGroup::cyclic(4).unwrap().order(), 4);
        assert_eq!(SymmetryGroup::dihedral(3).unwrap().order(), 6);
        assert_eq!(SymmetryGroup::tetrahedral().unwrap().order(), 12);
        assert_eq!(SymmetryGroup::octahedral().unwrap().order(), 24);
        assert_eq!(SymmetryGroup::icosahedral().unwrap().order(), 60);
    }

    #[test]
    fn point_groups_are_closed_and_start_with_identity() {
        for group in [
            SymmetryGroup::cyclic(5).unwrap(),
            SymmetryGroup::dihedral(4).unwrap(),
            SymmetryGroup::tetrahedral().unwrap(),
            SymmetryGroup::octahedral().unwrap(),
            SymmetryGroup::icosahedral().unwrap(),
        ] {
            assert!(group.operators()[0].is_identity(1e-12));
            assert_closed(&group);
        }
    }

    #[test]
    fn from_str_parses_group_identifiers() {
        assert_eq!("C4".parse::<SymmetryGroup>().unwrap().order(), 4);
        assert_eq!("d2".parse::<SymmetryGroup>().unwrap().order(), 4);
        assert_eq!("C1".parse::<SymmetryGroup>().unwrap().order(), 1);
        assert_eq!("I".parse::<SymmetryGroup>().unwrap().name(), "I");
        assert!(matches!(
            "X7".parse::<SymmetryGroup>(),
            Err(SymmetryError::UnknownGroup(_))
        ));
        assert!(matches!(
            "C".parse::<SymmetryGroup>(),
            Err(SymmetryError::UnknownGroup(_))
        ));
        assert!(matches!(
            "C0".parse::<SymmetryGroup>(),
            Err(SymmetryError::InvalidGroup(_))
        ));
    }

    #[test]
    fn from_operators_requires_leading_identity() {
        let screw = RigidOperator::new(
            Rotation3::from_axis_angle(&Vector3::z_axis(), PI),
            Vector3::new(0.0, 0.0, 12.5),
        );
        let group =
            SymmetryGroup::from_operators("P2_1", vec![RigidOperator::identity(), screw]).unwrap();
        assert_eq!(group.order(), 2);

        assert!(SymmetryGroup::from_operators("bad", vec![screw]).is_err());
        assert!(SymmetryGroup::from_operators("empty", vec![]).is_err());
    }

    #[test]
    fn from_generators_rejects_non_closing_generators() {
        let irrational = RigidOperator::from_rotation(Rotation3::from_axis_angle(
            &Vector3::z_axis(),
            1.0,
        ));
        assert!(matches!(
            SymmetryGroup::from_generators("bad", &[irrational]),
            Err(SymmetryError::InvalidGroup(_))
        ));
    }
}
