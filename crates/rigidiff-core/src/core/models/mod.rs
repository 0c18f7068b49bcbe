//! # Core Models Module
//!
//! Data structures that represent a protein backbone as one rigid frame per residue.
//!
//! ## Key Components
//!
//! - [`frame`] - A single residue's pose, its tangent-space delta and rigid operators
//! - [`chain`] - Chain metadata (label, length, symmetry participation)
//! - [`structure`] - An ordered, chain-labelled sequence of frames
//! - [`reference`] - A structure keyed by author residue numbering, for motif lookup
//!
//! ## Usage
//!
//! ```ignore
//! use rigidiff::core::models::{chain::ChainInfo, frame::RigidFrame, structure::Structure};
//!
//! let chains = vec![ChainInfo::new('A', 20, true)];
//! let structure = Structure::new(vec![RigidFrame::identity(); 20], chains)?;
//! ```

pub mod chain;
pub mod frame;
pub mod reference;
pub mod structure;
