//! # Engine Module
//!
//! This module implements the stateful part of rigidiff: the reverse-diffusion sampler that
//! carries one trajectory from pure noise (or a partially noised input) down to a clean
//! backbone.
//!
//! ## Overview
//!
//! A run repeatedly expands the asymmetric unit into the full assembly, asks the external
//! denoising model for a clean estimate, evaluates the active steering potentials, combines
//! both into a tangent-space update, projects that update back onto the asymmetric unit and
//! injects the scheduled noise. Steps are strictly sequential; only the potential evaluations
//! inside one step run concurrently.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Sampler parameters and their builder
//! - **Model Interface** ([`model`]) - The denoising-model trait, conditioning and a reference helix model
//! - **Reverse-Step Math** ([`diffuser`], [`guidance`]) - Noise draws and the model/potential combination
//! - **State Machine** ([`sampler`], [`state`]) - The trajectory loop and its records
//! - **Progress Monitoring** ([`progress`]) - Progress reporting callbacks
//! - **Error Handling** ([`error`]) - Engine-level errors aggregating every layer below

pub mod config;
pub mod diffuser;
pub mod error;
pub mod guidance;
pub mod model;
pub mod progress;
pub mod sampler;
pub mod state;
