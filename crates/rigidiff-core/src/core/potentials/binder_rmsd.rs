use super::{Potential, PotentialError, PotentialOutput, ResidueRef, parse_params};
use crate::core::models::structure::Structure;
use crate::core::utils::geometry::superpose;
use nalgebra::Point3;
use serde::Deserialize;

pub const KIND: &str = "binder_rmsd";

const MIN_REFERENCE_POINTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BinderRmsdParams {
    /// Chain whose residues form the binder, in order.
    #[serde(default)]
    pub binder_chain: Option<char>,
    /// Explicit binder residues; mutually exclusive with `binder_chain`.
    #[serde(default)]
    pub binder_residues: Option<Vec<ResidueRef>>,
    /// Reference Cα coordinates, one per binder residue.
    pub reference: Vec<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
enum BinderSelection {
    Chain(char),
    Residues(Vec<ResidueRef>),
}

/// Mean squared deviation of the binder from a reference shape after optimal superposition.
///
/// The reference is superposed onto the current binder coordinates, so the value is invariant
/// to rigid motion of the binder and the gradient only reshapes it.
#[derive(Debug, Clone)]
pub struct BinderRmsd {
    name: String,
    selection: BinderSelection,
    reference: Vec<Point3<f64>>,
}

impl BinderRmsd {
    pub fn new(params: BinderRmsdParams) -> Result<Self, PotentialError> {
        let invalid = |message: String| PotentialError::InvalidParams {
            kind: KIND.to_string(),
            message,
        };
        let selection = match (params.binder_chain, params.binder_residues) {
            (Some(chain), None) => BinderSelection::Chain(chain),
            (None, Some(residues)) => BinderSelection::Residues(residues),
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "binder_chain and binder_residues are mutually exclusive".to_string(),
                ));
            }
            (None, None) => {
                return Err(invalid(
                    "one of binder_chain or binder_residues is required".to_string(),
                ));
            }
        };
        if params.reference.len() < MIN_REFERENCE_POINTS {
            return Err(invalid(format!(
                "reference needs at least {} points, found {}",
                MIN_REFERENCE_POINTS,
                params.reference.len()
            )));
        }
        if params.reference.iter().flatten().any(|c| !c.is_finite()) {
            return Err(invalid("reference coordinates must be finite".to_string()));
        }
        if let BinderSelection::Residues(residues) = &selection {
            if residues.len() != params.reference.len() {
                return Err(PotentialError::ShapeMismatch {
                    potential: KIND.to_string(),
                    expected: params.reference.len(),
                    found: residues.len(),
                });
            }
        }
        Ok(Self {
            name: KIND.to_string(),
            selection,
            reference: params.reference.into_iter().map(Point3::from).collect(),
        })
    }

    pub fn from_params(params: &toml::Table) -> Result<Self, PotentialError> {
        Self::new(parse_params(KIND, params)?)
    }

    fn binder_indices(&self, structure: &Structure) -> Result<Vec<usize>, PotentialError> {
        let indices: Vec<usize> = match &self.selection {
            BinderSelection::Chain(label) => structure
                .chain_range_by_label(*label)
                .ok_or_else(|| PotentialError::ResidueOutOfRange {
                    potential: self.name.clone(),
                    reference: ResidueRef::Chain {
                        chain: *label,
                        residue: 1,
                    },
                    len: structure.len(),
                })?
                .collect(),
            BinderSelection::Residues(residues) => residues
                .iter()
                .map(|r| r.resolve_for(&self.name, structure))
                .collect::<Result<_, _>>()?,
        };
        if indices.len() != self.reference.len() {
            return Err(PotentialError::ShapeMismatch {
                potential: self.name.clone(),
                expected: self.reference.len(),
                found: indices.len(),
            });
        }
        Ok(indices)
    }
}

impl Potential for BinderRmsd {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate_one(&self, structure: &Structure) -> Result<PotentialOutput, PotentialError> {
        let indices = self.binder_indices(structure)?;
        let frames = structure.frames();
        let current: Vec<Point3<f64>> = indices.iter().map(|&i| frames[i].position).collect();

        let Some((rotation, translation)) = superpose(&self.reference, &current) else {
            return Err(PotentialError::InvalidParams {
                kind: self.name.clone(),
                message: "superposition of the reference failed".to_string(),
            });
        };

        let n = current.len() as f64;
        let mut output = PotentialOutput::zeros(structure.len());
        for ((&index, x), r) in indices.iter().zip(&current).zip(&self.reference) {
            let aligned = rotation * r + translation;
            let diff = x - aligned;
            output.value += diff.norm_squared() / n;
            // The alignment is optimal, so its own dependence on x drops out of the gradient.
            output.gradient[index] += diff * (2.0 / n);
        }
        Ok(output)
    }

    fn check(&self, structure: &Structure) -> Result<(), PotentialError> {
        self.binder_indices(structure).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{
        assert_gradient_matches_finite_difference, structure_from_points,
    };
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    const REFERENCE: [[f64; 3]; 4] = [
        [0.0, 0.0, 0.0],
        [3.8, 0.0, 0.0],
        [5.0, 3.5, 0.0],
        [4.0, 5.0, 2.5],
    ];

    fn complex_with_binder(binder: &[[f64; 3]]) -> Structure {
        let mut points = vec![[20.0, 0.0, 0.0], [23.8, 0.0, 0.0]];
        points.extend_from_slice(binder);
        structure_from_points(&points, &[('A', 2), ('B', binder.len())])
    }

    fn chain_potential() -> BinderRmsd {
        BinderRmsd::new(BinderRmsdParams {
            binder_chain: Some('B'),
            binder_residues: None,
            reference: REFERENCE.to_vec(),
        })
        .unwrap()
    }

    #[test]
    fn value_is_zero_for_rigidly_moved_reference() {
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.9);
        let moved: Vec<[f64; 3]> = REFERENCE
            .iter()
            .map(|p| {
                let q = rotation * Point3::from(*p) + Vector3::new(-3.0, 7.0, 1.0);
                [q.x, q.y, q.z]
            })
            .collect();
        let output = chain_potential()
            .evaluate_one(&complex_with_binder(&moved))
            .unwrap();
        assert!(output.value < 1e-12);
        assert!(output.gradient.iter().all(|g| g.norm() < 1e-6));
    }

    #[test]
    fn gradient_only_touches_binder_and_matches_finite_difference() {
        let distorted = [
            [0.5, -0.3, 0.2],
            [4.1, 0.6, -0.4],
            [4.2, 4.4, 0.9],
            [5.3, 4.1, 3.3],
        ];
        let structure = complex_with_binder(&distorted);
        let output = chain_potential().evaluate_one(&structure).unwrap();
        assert!(output.value > 0.0);
        assert_eq!(output.gradient[0].norm(), 0.0);
        assert_eq!(output.gradient[1].norm(), 0.0);
        assert_gradient_matches_finite_difference(&chain_potential(), &structure, 1e-5);
    }

    #[test]
    fn explicit_residues_must_match_reference_length() {
        let result = BinderRmsd::new(BinderRmsdParams {
            binder_chain: None,
            binder_residues: Some(vec![ResidueRef::Index(0), ResidueRef::Index(1)]),
            reference: REFERENCE.to_vec(),
        });
        assert!(matches!(result, Err(PotentialError::ShapeMismatch { .. })));
    }

    #[test]
    fn chain_of_wrong_length_is_a_shape_mismatch() {
        let structure = complex_with_binder(&REFERENCE[..3]);
        assert!(matches!(
            chain_potential().check(&structure),
            Err(PotentialError::ShapeMismatch {
                expected: 4,
                found: 3,
                ..
            })
        ));
    }

    #[test]
    fn selection_must_be_exactly_one_of_chain_or_residues() {
        let both = BinderRmsd::new(BinderRmsdParams {
            binder_chain: Some('B'),
            binder_residues: Some(vec![ResidueRef::Index(0); 4]),
            reference: REFERENCE.to_vec(),
        });
        let neither = BinderRmsd::new(BinderRmsdParams {
            binder_chain: None,
            binder_residues: None,
            reference: REFERENCE.to_vec(),
        });
        assert!(both.is_err() && neither.is_err());
    }

    #[test]
    fn from_params_reads_reference_coordinates() {
        let table: toml::Table = toml::from_str(
            r#"
            binder_chain = "B"
            reference = [[0.0, 0.0, 0.0], [3.8, 0.0, 0.0], [5.0, 3.5, 0.0]]
            "#,
        )
        .unwrap();
        let potential = BinderRmsd::from_params(&table).unwrap();
        assert_eq!(potential.reference.len(), 3);
    }
}
