//! # Potentials Module
//!
//! Differentiable steering objectives evaluated on the current structure during sampling.
//!
//! ## Overview
//!
//! Every potential is a penalty: a scalar that is small when the design goal is met, together
//! with its gradient with respect to each residue position. The sampler moves residues along
//! the negative gradient, so all potentials share one sign convention and one unit convention
//! (penalty per Å on residue positions), which keeps a single guidance weight meaningful across
//! potential kinds. This convention is documented rather than checked at runtime because new
//! potential kinds can be registered from outside the crate.
//!
//! ## Key Components
//!
//! - [`functions`] - Scalar penalty shapes (flat-bottom wells, sigmoid contacts)
//! - [`loop_contacts`] - Distance range between two designated residues
//! - [`hetero_olig`] - Smooth inter- and intra-chain contact counts
//! - [`binder_rmsd`] - Superposition-based shape agreement of a binder with a reference
//! - [`res_pair`] - Target distances for named residue pairs
//! - [`registry`] - Kind registry, weights, decay and the combined gradient
//!
//! ## Usage
//!
//! ```ignore
//! use rigidiff::core::potentials::registry::{ActiveWindow, PotentialRegistry, Weight};
//!
//! let mut registry = PotentialRegistry::with_builtin_kinds();
//! registry.register("res_pair_constraints", params, Weight::constant(1.0), ActiveWindow::all())?;
//! let guidance = registry.evaluate(&structure, t, num_steps);
//! ```

pub mod binder_rmsd;
pub mod functions;
pub mod hetero_olig;
pub mod loop_contacts;
pub mod registry;
pub mod res_pair;

use crate::core::models::structure::Structure;
use nalgebra::Vector3;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;

/// Value and per-residue positional gradient of one potential.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialOutput {
    pub value: f64,
    pub gradient: Vec<Vector3<f64>>,
}

impl PotentialOutput {
    pub fn zeros(num_residues: usize) -> Self {
        Self {
            value: 0.0,
            gradient: vec![Vector3::zeros(); num_residues],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
            && self
                .gradient
                .iter()
                .all(|g| g.iter().all(|c| c.is_finite()))
    }
}

/// A steering objective over a structure.
///
/// Implementations hold their target parameters and must be pure functions of the structure
/// they are given; they are shared across threads and evaluated concurrently.
pub trait Potential: Send + Sync {
    fn name(&self) -> &str;

    /// Computes the penalty value and its gradient with respect to every residue position.
    fn evaluate_one(&self, structure: &Structure) -> Result<PotentialOutput, PotentialError>;

    /// Verifies that this potential can be evaluated on structures shaped like `structure`.
    fn check(&self, _structure: &Structure) -> Result<(), PotentialError> {
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PotentialError {
    #[error("Unknown potential kind: '{0}'")]
    UnknownKind(String),

    #[error("Invalid parameters for potential '{kind}': {message}")]
    InvalidParams { kind: String, message: String },

    #[error("Potential '{potential}' references residue {reference} outside a structure of {len} residues")]
    ResidueOutOfRange {
        potential: String,
        reference: ResidueRef,
        len: usize,
    },

    #[error("Potential '{potential}' expected {expected} values but found {found}")]
    ShapeMismatch {
        potential: String,
        expected: usize,
        found: usize,
    },

    #[error("Potential '{0}' produced a non-finite value or gradient")]
    NonFinite(String),
}

/// A non-fatal report that a potential was excluded from one step's guidance.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialEvaluationWarning {
    pub potential: String,
    pub t: usize,
    pub reason: String,
}

impl fmt::Display for PotentialEvaluationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "potential '{}' excluded at t = {}: {}",
            self.potential, self.t, self.reason
        )
    }
}

/// A reference to one residue of a structure.
///
/// In configuration files a bare integer is a 0-based index into the full structure, and a
/// table `{ chain = "B", residue = 4 }` names the 1-based residue number within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum ResidueRef {
    Index(usize),
    Chain { chain: char, residue: usize },
}

impl ResidueRef {
    pub fn resolve(&self, structure: &Structure) -> Option<usize> {
        match *self {
            ResidueRef::Index(index) => (index < structure.len()).then_some(index),
            ResidueRef::Chain { chain, residue } => {
                let range = structure.chain_range_by_label(chain)?;
                if residue == 0 || residue > range.len() {
                    return None;
                }
                Some(range.start + residue - 1)
            }
        }
    }

    pub(crate) fn resolve_for(
        &self,
        potential: &str,
        structure: &Structure,
    ) -> Result<usize, PotentialError> {
        self.resolve(structure)
            .ok_or_else(|| PotentialError::ResidueOutOfRange {
                potential: potential.to_string(),
                reference: *self,
                len: structure.len(),
            })
    }
}

impl fmt::Display for ResidueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResidueRef::Index(index) => write!(f, "#{}", index),
            ResidueRef::Chain { chain, residue } => write!(f, "{}{}", chain, residue),
        }
    }
}

/// Deserializes the parameter table of a potential kind.
pub(crate) fn parse_params<T: DeserializeOwned>(
    kind: &str,
    params: &toml::Table,
) -> Result<T, PotentialError> {
    toml::Value::Table(params.clone())
        .try_into()
        .map_err(|e: toml::de::Error| PotentialError::InvalidParams {
            kind: kind.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::models::chain::ChainInfo;
    use crate::core::models::frame::RigidFrame;
    use nalgebra::Point3;

    pub fn structure_from_points(points: &[[f64; 3]], chains: &[(char, usize)]) -> Structure {
        let frames = points
            .iter()
            .map(|p| RigidFrame::at(Point3::from(*p)))
            .collect();
        let chains = chains
            .iter()
            .map(|&(label, length)| ChainInfo::new(label, length, true))
            .collect();
        Structure::new(frames, chains).unwrap()
    }

    /// Central finite-difference gradient of `potential` at residue `index`.
    pub fn numeric_gradient(
        potential: &dyn Potential,
        structure: &Structure,
        index: usize,
    ) -> Vector3<f64> {
        let h = 1e-6;
        let mut gradient = Vector3::zeros();
        for axis in 0..3 {
            let shifted = |sign: f64| {
                let mut frames = structure.frames().to_vec();
                frames[index].position[axis] += sign * h;
                let moved = structure.with_frames(frames).unwrap();
                potential.evaluate_one(&moved).unwrap().value
            };
            gradient[axis] = (shifted(1.0) - shifted(-1.0)) / (2.0 * h);
        }
        gradient
    }

    pub fn assert_gradient_matches_finite_difference(
        potential: &dyn Potential,
        structure: &Structure,
        tolerance: f64,
    ) {
        let analytic = potential.evaluate_one(structure).unwrap().gradient;
        for (index, g) in analytic.iter().enumerate() {
            let numeric = numeric_gradient(potential, structure, index);
            assert!(
                (g - numeric).norm() < tolerance,
                "residue {}: analytic {:?} vs numeric {:?}",
                index,
                g,
                numeric
            );
        }
    }
}
