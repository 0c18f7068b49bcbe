use thiserror::Error;

use super::config::ConfigError;
use super::model::ModelError;
use crate::core::contig::ContigError;
use crate::core::models::structure::StructureError;
use crate::core::potentials::PotentialError;
use crate::core::schedule::ScheduleError;
use crate::core::symmetry::SymmetryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Schedule error: {source}")]
    Schedule {
        #[from]
        source: ScheduleError,
    },

    #[error("Potential error: {source}")]
    Potential {
        #[from]
        source: PotentialError,
    },

    #[error("Symmetry error: {source}")]
    Symmetry {
        #[from]
        source: SymmetryError,
    },

    #[error("Contig error: {source}")]
    Contig {
        #[from]
        source: ContigError,
    },

    #[error("Structure error: {source}")]
    Structure {
        #[from]
        source: StructureError,
    },

    #[error("Denoising model failed at t = {t}: {source}")]
    Model { t: usize, source: ModelError },

    #[error("Sampling diverged at t = {t} after {consecutive} consecutive unstable steps")]
    SamplingDiverged { t: usize, consecutive: usize },

    #[error("Sampling was cancelled before step t = {t}")]
    Cancelled { t: usize },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Errors raised before any reverse step runs.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            EngineError::Config { .. }
                | EngineError::Schedule { .. }
                | EngineError::Potential { .. }
                | EngineError::Symmetry { .. }
                | EngineError::Contig { .. }
        )
    }
}
