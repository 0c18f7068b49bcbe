//! Symmetric assemblies: point and explicit operator groups, the asymmetric-unit ↔ assembly
//! mapping, and per-chain length assignment.
//!
//! Only the asymmetric unit is ever updated. The full assembly is always re-derived from it
//! with [`manager::SymmetryManager::expand`], so copies cannot drift apart over many steps.

pub mod group;
pub mod lengths;
pub mod manager;

use crate::core::models::structure::StructureError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SymmetryError {
    #[error("Incompatible symmetry: {0}")]
    IncompatibleSymmetry(String),

    #[error("Invalid chain length specification: {0}")]
    InvalidLengthSpec(String),

    #[error("Invalid symmetry group: {0}")]
    InvalidGroup(String),

    #[error("Unknown symmetry group identifier: '{0}'")]
    UnknownGroup(String),

    #[error("Structure layout does not match the symmetry mapping (expected {expected} residues, found {found})")]
    LayoutMismatch { expected: usize, found: usize },

    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),
}
