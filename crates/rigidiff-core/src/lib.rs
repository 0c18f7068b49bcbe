//! # rigidiff Core Library
//!
//! A guided, symmetry-aware reverse-diffusion sampler that generates protein backbones as
//! sequences of rigid residue frames (orientation + position).
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture to keep concerns separated:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`RigidFrame`, `Structure`), the noise
//!   schedule, the steering potentials, symmetry groups and contig parsing.
//!
//! - **[`engine`]: The Logic Core.** The stateful layer that owns a trajectory. It contains the
//!   sampler state machine, the reverse-step math, the guidance combination and the
//!   interface to the external denoising model.
//!
//! - **[`workflows`]: The Public API.** High-level entry points that tie `engine` and `core`
//!   together, such as generating a batch of independent designs.

pub mod core;
pub mod engine;
pub mod workflows;
