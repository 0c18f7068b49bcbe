use crate::core::models::structure::Structure;
use crate::core::potentials::PotentialEvaluationWarning;

/// Where the sampler is in its single pass from `t = T` down to `t = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerPhase {
    Initializing,
    Stepping(usize),
    Terminal,
}

impl SamplerPhase {
    /// The phase that follows a completed step out of `t`.
    pub fn after_step(t: usize) -> Self {
        if t <= 1 {
            SamplerPhase::Terminal
        } else {
            SamplerPhase::Stepping(t - 1)
        }
    }
}

/// The asymmetric unit at timestep `t`. Each step produces a new state; the full assembly is
/// always derived from it, never stored alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryState {
    pub t: usize,
    pub asym: Structure,
}

impl TrajectoryState {
    pub fn new(t: usize, asym: Structure) -> Self {
        Self { t, asym }
    }

    pub fn is_terminal(&self) -> bool {
        self.t == 0
    }
}

/// Diagnostics for one reverse step `t → t-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub t: usize,
    /// Unweighted value of every potential that contributed, in registration order.
    pub potential_values: Vec<(String, f64)>,
    pub warnings: Vec<PotentialEvaluationWarning>,
    /// Asymmetric-unit residues that kept their previous frame because the update was unusable.
    pub unstable_residues: Vec<usize>,
    /// Largest translational update applied to any residue, in Å.
    pub max_update: f64,
    pub confidence: Option<f64>,
}

impl StepRecord {
    pub fn is_unstable(&self) -> bool {
        !self.unstable_residues.is_empty()
    }
}

/// Snapshot of the assembly taken at the end of step `t`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryFrame {
    pub t: usize,
    /// The model's clean-structure estimate, when its frames were valid.
    pub denoised: Option<Structure>,
    /// The full assembly at `t - 1`.
    pub noisy: Structure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingResult {
    /// The full assembly at `t = 0`.
    pub structure: Structure,
    pub asymmetric_unit: Structure,
    /// One record per step, in the order they ran (highest `t` first).
    pub steps: Vec<StepRecord>,
    pub trajectory: Option<Vec<TrajectoryFrame>>,
}

impl SamplingResult {
    pub fn unstable_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_unstable()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.steps.iter().map(|s| s.warnings.len()).sum()
    }
}
