//! # Workflows Module
//!
//! High-level entry points that tie the sampler and the core building blocks together.
//!
//! ## Architecture
//!
//! - **Design Workflow** ([`design`]) - A batch of independent designs, each with its own seed
//!   and, optionally, its own contig-sampled chain layout. Designs run in parallel when the
//!   `parallel` feature is enabled.

pub mod design;
