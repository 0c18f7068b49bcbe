use crate::core::models::frame::RigidOperator;
use crate::core::potentials::registry::{ActiveWindow, Decay, PotentialRegistry, Weight};
use crate::core::potentials::PotentialError;
use crate::core::schedule::{NoiseSchedule, ScheduleError, ScheduleProfile};
use crate::core::symmetry::SymmetryError;
use crate::core::symmetry::group::SymmetryGroup;
use crate::core::symmetry::lengths::{ChainSpec, LengthRange};
use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{parameter}': {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub num_steps: usize,
    /// Rotational noise scale at `t = T`, in radians.
    pub rotation_max: f64,
    /// Translational noise scale at `t = T`, in Å.
    pub translation_max: f64,
    pub profile: ScheduleProfile,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            num_steps: 50,
            rotation_max: 1.5,
            translation_max: 12.0,
            profile: ScheduleProfile::Linear,
        }
    }
}

impl ScheduleConfig {
    pub fn build(&self) -> Result<NoiseSchedule, ScheduleError> {
        NoiseSchedule::build(
            self.num_steps,
            self.rotation_max,
            self.translation_max,
            self.profile,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Weight of the potential bias relative to the model's own update.
    pub strength: f64,
    /// Largest bias a single residue may receive before the step fraction is applied, in Å.
    pub max_bias_step: f64,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            strength: 1.0,
            max_bias_step: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub noise_scale_rotation: f64,
    pub noise_scale_translation: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            noise_scale_rotation: 1.0,
            noise_scale_translation: 1.0,
        }
    }
}

/// A rigid operator given as a row-major rotation matrix and a translation in Å.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct OperatorSpec {
    pub rotation: [[f64; 3]; 3],
    #[serde(default)]
    pub translation: [f64; 3],
}

impl OperatorSpec {
    pub fn to_operator(&self) -> RigidOperator {
        let r = self.rotation;
        let matrix = Matrix3::new(
            r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
        );
        RigidOperator::new(
            Rotation3::from_matrix_unchecked(matrix),
            Vector3::from(self.translation),
        )
    }
}

/// Either a named point group or an explicit operator list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymmetryConfig {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub operators: Option<Vec<OperatorSpec>>,
}

impl SymmetryConfig {
    pub fn named(group: &str) -> Self {
        Self {
            group: Some(group.to_string()),
            operators: None,
        }
    }

    pub fn resolve(&self) -> Result<SymmetryGroup, SymmetryError> {
        match (&self.group, &self.operators) {
            (Some(name), None) => name.parse(),
            (name, Some(operators)) => SymmetryGroup::from_operators(
                name.as_deref().unwrap_or("explicit"),
                operators.iter().map(OperatorSpec::to_operator).collect(),
            ),
            (None, None) => Ok(SymmetryGroup::identity()),
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

/// One guiding potential as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PotentialSpec {
    pub kind: String,
    #[serde(default)]
    pub params: toml::Table,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub decay: Decay,
    /// `[start, end]` timesteps, inclusive, with `start >= end`. Active throughout when absent.
    #[serde(default)]
    pub active_window: Option<[usize; 2]>,
}

impl PotentialSpec {
    pub fn window(&self) -> Result<ActiveWindow, PotentialError> {
        match self.active_window {
            Some([start, end]) => ActiveWindow::new(start, end),
            None => Ok(ActiveWindow::all()),
        }
    }

    pub fn register_into(&self, registry: &mut PotentialRegistry) -> Result<(), PotentialError> {
        registry.register(
            &self.kind,
            &self.params,
            Weight::new(self.weight, self.decay),
            self.window()?,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub schedule: ScheduleConfig,
    pub guidance: GuidanceConfig,
    pub noise: NoiseConfig,
    pub symmetry: Option<SymmetryConfig>,
    /// Chains of the asymmetric unit (the whole structure when there is no symmetry).
    pub chains: Vec<ChainSpec>,
    /// Bounds on the residue count of the full assembly.
    pub total_length: Option<LengthRange>,
    pub potentials: Vec<PotentialSpec>,
    pub seed: u64,
    pub record_trajectory: bool,
    pub max_consecutive_instabilities: usize,
    /// Start partial diffusion from an input structure noised to this timestep.
    pub partial_steps: Option<usize>,
}

impl SamplerConfig {
    pub fn symmetry_group(&self) -> Result<SymmetryGroup, SymmetryError> {
        self.symmetry
            .as_ref()
            .map_or_else(|| Ok(SymmetryGroup::identity()), SymmetryConfig::resolve)
    }

    /// A copy that differs only in its seed.
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }
}

#[derive(Default)]
pub struct SamplerConfigBuilder {
    schedule: Option<ScheduleConfig>,
    guidance: Option<GuidanceConfig>,
    noise: Option<NoiseConfig>,
    symmetry: Option<SymmetryConfig>,
    chains: Option<Vec<ChainSpec>>,
    total_length: Option<LengthRange>,
    potentials: Vec<PotentialSpec>,
    seed: Option<u64>,
    record_trajectory: bool,
    max_consecutive_instabilities: Option<usize>,
    partial_steps: Option<usize>,
}

impl SamplerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = Some(schedule);
        self
    }
    pub fn num_steps(mut self, num_steps: usize) -> Self {
        self.schedule.get_or_insert_with(ScheduleConfig::default).num_steps = num_steps;
        self
    }
    pub fn guidance(mut self, guidance: GuidanceConfig) -> Self {
        self.guidance = Some(guidance);
        self
    }
    pub fn noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = Some(noise);
        self
    }
    pub fn symmetry(mut self, symmetry: SymmetryConfig) -> Self {
        self.symmetry = Some(symmetry);
        self
    }
    pub fn chains(mut self, chains: Vec<ChainSpec>) -> Self {
        self.chains = Some(chains);
        self
    }
    pub fn total_length(mut self, range: LengthRange) -> Self {
        self.total_length = Some(range);
        self
    }
    pub fn potential(mut self, spec: PotentialSpec) -> Self {
        self.potentials.push(spec);
        self
    }
    pub fn potentials(mut self, specs: Vec<PotentialSpec>) -> Self {
        self.potentials = specs;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn record_trajectory(mut self, record: bool) -> Self {
        self.record_trajectory = record;
        self
    }
    pub fn max_consecutive_instabilities(mut self, n: usize) -> Self {
        self.max_consecutive_instabilities = Some(n);
        self
    }
    pub fn partial_steps(mut self, steps: usize) -> Self {
        self.partial_steps = Some(steps);
        self
    }

    pub fn build(self) -> Result<SamplerConfig, ConfigError> {
        let schedule = self
            .schedule
            .ok_or(ConfigError::MissingParameter("schedule"))?;
        let chains = self
            .chains
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::MissingParameter("chains"))?;
        let guidance = self.guidance.unwrap_or_default();
        let noise = self.noise.unwrap_or_default();
        let max_consecutive_instabilities = self.max_consecutive_instabilities.unwrap_or(3);

        if !(guidance.strength >= 0.0 && guidance.strength.is_finite()) {
            return Err(ConfigError::InvalidValue {
                parameter: "guidance.strength",
                reason: format!("must be a finite, non-negative number (got {})", guidance.strength),
            });
        }
        if !(guidance.max_bias_step > 0.0) {
            return Err(ConfigError::InvalidValue {
                parameter: "guidance.max_bias_step",
                reason: format!("must be positive (got {})", guidance.max_bias_step),
            });
        }
        for (parameter, value) in [
            ("noise.noise_scale_rotation", noise.noise_scale_rotation),
            ("noise.noise_scale_translation", noise.noise_scale_translation),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::InvalidValue {
                    parameter,
                    reason: format!("must be a finite, non-negative number (got {})", value),
                });
            }
        }
        if max_consecutive_instabilities == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "max_consecutive_instabilities",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(steps) = self.partial_steps {
            if steps == 0 || steps > schedule.num_steps {
                return Err(ConfigError::InvalidValue {
                    parameter: "partial_steps",
                    reason: format!("must lie in 1..={} (got {})", schedule.num_steps, steps),
                });
            }
        }

        Ok(SamplerConfig {
            schedule,
            guidance,
            noise,
            symmetry: self.symmetry,
            chains,
            total_length: self.total_length,
            potentials: self.potentials,
            seed: self.seed.ok_or(ConfigError::MissingParameter("seed"))?,
            record_trajectory: self.record_trajectory,
            max_consecutive_instabilities,
            partial_steps: self.partial_steps,
        })
    }
}
