use super::functions::{distance_and_direction, harmonic};
use super::{Potential, PotentialError, PotentialOutput, ResidueRef, parse_params};
use crate::core::models::structure::Structure;
use serde::Deserialize;

pub const KIND: &str = "res_pair_constraints";

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResiduePairConstraint {
    pub residue_a: ResidueRef,
    pub residue_b: ResidueRef,
    /// Target Cα–Cα distance in Å.
    pub distance: f64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResiduePairParams {
    pub pairs: Vec<ResiduePairConstraint>,
}

/// Harmonic restraints pulling named residue pairs toward target distances.
#[derive(Debug, Clone)]
pub struct ResiduePairConstraints {
    name: String,
    pairs: Vec<ResiduePairConstraint>,
}

impl ResiduePairConstraints {
    pub fn new(pairs: Vec<ResiduePairConstraint>) -> Result<Self, PotentialError> {
        if pairs.is_empty() {
            return Err(PotentialError::InvalidParams {
                kind: KIND.to_string(),
                message: "at least one residue pair is required".to_string(),
            });
        }
        for pair in &pairs {
            if !pair.distance.is_finite() || pair.distance < 0.0 {
                return Err(PotentialError::InvalidParams {
                    kind: KIND.to_string(),
                    message: format!(
                        "target distance for {}–{} must be non-negative",
                        pair.residue_a, pair.residue_b
                    ),
                });
            }
            if !pair.weight.is_finite() || pair.weight < 0.0 {
                return Err(PotentialError::InvalidParams {
                    kind: KIND.to_string(),
                    message: format!(
                        "weight for {}–{} must be non-negative",
                        pair.residue_a, pair.residue_b
                    ),
                });
            }
        }
        Ok(Self {
            name: KIND.to_string(),
            pairs,
        })
    }

    pub fn from_params(params: &toml::Table) -> Result<Self, PotentialError> {
        let parsed: ResiduePairParams = parse_params(KIND, params)?;
        Self::new(parsed.pairs)
    }

    pub fn pairs(&self) -> &[ResiduePairConstraint] {
        &self.pairs
    }
}

impl Potential for ResiduePairConstraints {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate_one(&self, structure: &Structure) -> Result<PotentialOutput, PotentialError> {
        let mut output = PotentialOutput::zeros(structure.len());
        let frames = structure.frames();
        for pair in &self.pairs {
            let a = pair.residue_a.resolve_for(&self.name, structure)?;
            let b = pair.residue_b.resolve_for(&self.name, structure)?;
            let (dist, direction) =
                distance_and_direction(&frames[a].position, &frames[b].position);
            let (value, slope) = harmonic(dist, pair.distance, pair.weight);
            output.value += value;
            output.gradient[a] += direction * slope;
            output.gradient[b] -= direction * slope;
        }
        Ok(output)
    }

    fn check(&self, structure: &Structure) -> Result<(), PotentialError> {
        for pair in &self.pairs {
            pair.residue_a.resolve_for(&self.name, structure)?;
            pair.residue_b.resolve_for(&self.name, structure)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{
        assert_gradient_matches_finite_difference, numeric_gradient, structure_from_points,
    };
    use super::*;

    fn single_pair(a: usize, b: usize, distance: f64) -> ResiduePairConstraints {
        ResiduePairConstraints::new(vec![ResiduePairConstraint {
            residue_a: ResidueRef::Index(a),
            residue_b: ResidueRef::Index(b),
            distance,
            weight: 1.0,
        }])
        .unwrap()
    }

    #[test]
    fn gradient_points_to_decrease_distance_when_too_far() {
        let structure =
            structure_from_points(&[[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]], &[('A', 2)]);
        let potential = single_pair(0, 1, 6.0);
        let output = potential.evaluate_one(&structure).unwrap();

        // Descending the gradient moves the residues toward each other.
        let step = 1e-3;
        let mut frames = structure.frames().to_vec();
        for (frame, g) in frames.iter_mut().zip(&output.gradient) {
            frame.position -= g * step;
        }
        let moved = structure.with_frames(frames).unwrap();
        let new_distance = (moved.frames()[1].position - moved.frames()[0].position).norm();
        assert!(new_distance < 10.0);
        assert!(potential.evaluate_one(&moved).unwrap().value < output.value);

        for index in 0..2 {
            let numeric = numeric_gradient(&potential, &structure, index);
            assert!((output.gradient[index] - numeric).norm() < 1e-5);
        }
    }

    #[test]
    fn gradient_points_to_increase_distance_when_too_close() {
        let structure = structure_from_points(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]], &[('A', 2)]);
        let output = single_pair(0, 1, 5.0).evaluate_one(&structure).unwrap();
        // Residue 1 sits on +x; descending must push it further along +x.
        assert!(-output.gradient[1].x > 0.0);
        assert!(-output.gradient[0].x < 0.0);
    }

    #[test]
    fn value_is_zero_at_target_distance() {
        let structure = structure_from_points(&[[0.0, 0.0, 0.0], [0.0, 4.0, 0.0]], &[('A', 2)]);
        let output = single_pair(0, 1, 4.0).evaluate_one(&structure).unwrap();
        assert!(output.value.abs() < 1e-12);
    }

    #[test]
    fn gradient_matches_finite_difference_for_several_pairs() {
        let structure = structure_from_points(
            &[
                [0.0, 0.0, 0.0],
                [3.0, 1.0, 0.0],
                [5.0, -2.0, 1.0],
                [1.0, 4.0, 2.0],
            ],
            &[('A', 2), ('B', 2)],
        );
        let potential = ResiduePairConstraints::new(vec![
            ResiduePairConstraint {
                residue_a: ResidueRef::Index(0),
                residue_b: ResidueRef::Index(2),
                distance: 3.0,
                weight: 2.0,
            },
            ResiduePairConstraint {
                residue_a: ResidueRef::Index(1),
                residue_b: ResidueRef::Chain {
                    chain: 'B',
                    residue: 2,
                },
                distance: 7.0,
                weight: 0.5,
            },
        ])
        .unwrap();
        assert_gradient_matches_finite_difference(&potential, &structure, 1e-5);
    }

    #[test]
    fn out_of_range_residue_is_reported() {
        let structure = structure_from_points(&[[0.0; 3], [1.0, 0.0, 0.0]], &[('A', 2)]);
        let potential = single_pair(0, 5, 4.0);
        assert!(matches!(
            potential.evaluate_one(&structure),
            Err(PotentialError::ResidueOutOfRange { .. })
        ));
        assert!(potential.check(&structure).is_err());
    }

    #[test]
    fn from_params_parses_toml_table() {
        let table: toml::Table = toml::from_str(
            r#"
            [[pairs]]
            residue_a = 0
            residue_b = { chain = "A", residue = 3 }
            distance = 5.5
            "#,
        )
        .unwrap();
        let potential = ResiduePairConstraints::from_params(&table).unwrap();
        assert_eq!(potential.pairs().len(), 1);
        assert_eq!(potential.pairs()[0].weight, 1.0);
    }

    #[test]
    fn new_rejects_empty_and_negative_targets() {
        assert!(ResiduePairConstraints::new(vec![]).is_err());
        let result = ResiduePairConstraints::new(vec![ResiduePairConstraint {
            residue_a: ResidueRef::Index(0),
            residue_b: ResidueRef::Index(1),
            distance: -1.0,
            weight: 1.0,
        }]);
        assert!(matches!(result, Err(PotentialError::InvalidParams { .. })));
    }
}
