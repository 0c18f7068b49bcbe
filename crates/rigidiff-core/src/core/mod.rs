//! # Core Module
//!
//! This module provides the stateless building blocks of the sampler: the residue frame
//! representation, the noise schedule, the steering potentials, the symmetry machinery and
//! the contig specification language.
//!
//! ## Architecture
//!
//! - **Structural Representation** ([`models`]) - Rigid residue frames, tangent-space deltas and
//!   multi-chain structures
//! - **Noise Schedule** ([`schedule`]) - Per-timestep rotational and translational noise scales
//! - **Steering Objectives** ([`potentials`]) - Differentiable penalties and their registry
//! - **Symmetry** ([`symmetry`]) - Point/space group operators, assembly expansion and update
//!   projection, chain length assignment
//! - **Contigs** ([`contig`]) - Parsing and sampling of contig strings into chain layouts
//! - **Utilities** ([`utils`]) - SO(3) maps, superposition and RMSD
//!
//! ## Invariants
//!
//! Every value produced by this module is a pure function of its inputs. Orientation state is
//! always a unit quaternion and positions are always finite; operations that would break
//! either invariant return an error instead.

pub mod contig;
pub mod models;
pub mod potentials;
pub mod schedule;
pub mod symmetry;
pub mod utils;
