use super::functions::{distance_and_direction, flat_bottom};
use super::{Potential, PotentialError, PotentialOutput, ResidueRef, parse_params};
use crate::core::models::structure::Structure;
use serde::Deserialize;

pub const KIND: &str = "loop_contacts";

fn default_stiffness() -> f64 {
    1.0
}

fn default_clip_distance() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopContactParams {
    pub residue_a: ResidueRef,
    pub residue_b: ResidueRef,
    #[serde(default)]
    pub min_distance: f64,
    pub max_distance: f64,
    #[serde(default = "default_stiffness")]
    pub stiffness: f64,
    /// Distance past a wall at which the quadratic penalty turns linear.
    #[serde(default = "default_clip_distance")]
    pub clip_distance: f64,
}

/// Keeps two designated residues (typically the ends of a loop) within a distance range.
#[derive(Debug, Clone)]
pub struct LoopContacts {
    name: String,
    params: LoopContactParams,
}

impl LoopContacts {
    pub fn new(params: LoopContactParams) -> Result<Self, PotentialError> {
        let invalid = |message: &str| PotentialError::InvalidParams {
            kind: KIND.to_string(),
            message: message.to_string(),
        };
        if !(params.min_distance >= 0.0 && params.min_distance <= params.max_distance) {
            return Err(invalid("require 0 <= min_distance <= max_distance"));
        }
        if !params.max_distance.is_finite() {
            return Err(invalid("max_distance must be finite"));
        }
        if !(params.stiffness > 0.0 && params.stiffness.is_finite()) {
            return Err(invalid("stiffness must be positive"));
        }
        if !(params.clip_distance > 0.0 && params.clip_distance.is_finite()) {
            return Err(invalid("clip_distance must be positive"));
        }
        Ok(Self {
            name: KIND.to_string(),
            params,
        })
    }

    pub fn from_params(params: &toml::Table) -> Result<Self, PotentialError> {
        Self::new(parse_params(KIND, params)?)
    }
}

impl Potential for LoopContacts {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate_one(&self, structure: &Structure) -> Result<PotentialOutput, PotentialError> {
        let p = &self.params;
        let a = p.residue_a.resolve_for(&self.name, structure)?;
        let b = p.residue_b.resolve_for(&self.name, structure)?;
        let frames = structure.frames();

        let mut output = PotentialOutput::zeros(structure.len());
        let (dist, direction) = distance_and_direction(&frames[a].position, &frames[b].position);
        let (value, slope) = flat_bottom(
            dist,
            p.min_distance,
            p.max_distance,
            p.stiffness,
            p.clip_distance,
        );
        output.value = value;
        output.gradient[a] += direction * slope;
        output.gradient[b] -= direction * slope;
        Ok(output)
    }

    fn check(&self, structure: &Structure) -> Result<(), PotentialError> {
        self.params.residue_a.resolve_for(&self.name, structure)?;
        self.params.residue_b.resolve_for(&self.name, structure)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{
        assert_gradient_matches_finite_difference, structure_from_points,
    };
    use super::*;

    fn loop_potential(min: f64, max: f64) -> LoopContacts {
        LoopContacts::new(LoopContactParams {
            residue_a: ResidueRef::Index(0),
            residue_b: ResidueRef::Index(3),
            min_distance: min,
            max_distance: max,
            stiffness: 1.5,
            clip_distance: 2.0,
        })
        .unwrap()
    }

    fn open_loop(end_to_end: f64) -> Structure {
        structure_from_points(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 2.0, 0.0],
                [2.0, 2.0, 0.0],
                [end_to_end, 0.0, 0.0],
            ],
            &[('A', 4)],
        )
    }

    #[test]
    fn inside_range_has_no_penalty_or_gradient() {
        let output = loop_potential(4.0, 6.0).evaluate_one(&open_loop(5.0)).unwrap();
        assert_eq!(output.value, 0.0);
        assert!(output.gradient.iter().all(|g| g.norm() == 0.0));
    }

    #[test]
    fn only_designated_residues_receive_gradient() {
        let output = loop_potential(4.0, 6.0).evaluate_one(&open_loop(9.0)).unwrap();
        assert!(output.value > 0.0);
        assert!(output.gradient[1].norm() == 0.0 && output.gradient[2].norm() == 0.0);
        // Too far apart: descending pulls residue 3 back toward residue 0.
        assert!(output.gradient[3].x > 0.0);
    }

    #[test]
    fn gradient_matches_finite_difference_on_both_sides_of_the_range() {
        for end in [1.5, 7.0, 12.0] {
            assert_gradient_matches_finite_difference(
                &loop_potential(4.0, 6.0),
                &open_loop(end),
                1e-5,
            );
        }
    }

    #[test]
    fn new_rejects_inverted_range() {
        let result = LoopContacts::new(LoopContactParams {
            residue_a: ResidueRef::Index(0),
            residue_b: ResidueRef::Index(1),
            min_distance: 8.0,
            max_distance: 4.0,
            stiffness: 1.0,
            clip_distance: 1.0,
        });
        assert!(matches!(result, Err(PotentialError::InvalidParams { .. })));
    }

    #[test]
    fn from_params_applies_defaults() {
        let table: toml::Table = toml::from_str(
            r#"
            residue_a = 0
            residue_b = 9
            max_distance = 10.0
            "#,
        )
        .unwrap();
        let potential = LoopContacts::from_params(&table).unwrap();
        assert_eq!(potential.params.stiffness, 1.0);
        assert_eq!(potential.params.clip_distance, 2.0);
        assert_eq!(potential.params.min_distance, 0.0);
    }

    #[test]
    fn from_params_rejects_unknown_fields() {
        let table: toml::Table = toml::from_str("residue_a = 0\nresidue_b = 1\nmax_distance = 3.0\nfoo = 1").unwrap();
        assert!(LoopContacts::from_params(&table).is_err());
    }
}
