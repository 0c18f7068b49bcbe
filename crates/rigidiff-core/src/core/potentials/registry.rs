use super::binder_rmsd::{self, BinderRmsd};
use super::hetero_olig::{self, HeteroOligomerContacts};
use super::loop_contacts::{self, LoopContacts};
use super::res_pair::{self, ResiduePairConstraints};
use super::{Potential, PotentialError, PotentialEvaluationWarning, PotentialOutput};
use crate::core::models::structure::Structure;
use nalgebra::Vector3;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Builds a potential of one kind from its parameter table.
pub type PotentialFactory =
    Box<dyn Fn(&toml::Table) -> Result<Box<dyn Potential>, PotentialError> + Send + Sync>;

/// How a potential's weight changes over the course of sampling.
///
/// The decay factor is `(t / T)^p` with `p = 0, 1, 2, 3`, so every non-constant profile fades
/// the potential out as the structure approaches `t = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decay {
    #[default]
    Constant,
    Linear,
    Quadratic,
    Cubic,
}

impl Decay {
    fn exponent(self) -> i32 {
        match self {
            Decay::Constant => 0,
            Decay::Linear => 1,
            Decay::Quadratic => 2,
            Decay::Cubic => 3,
        }
    }

    pub fn factor(self, t: usize, num_steps: usize) -> f64 {
        if num_steps == 0 {
            return 1.0;
        }
        let progress = (t.min(num_steps) as f64) / num_steps as f64;
        progress.powi(self.exponent())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Weight {
    pub scale: f64,
    #[serde(default)]
    pub decay: Decay,
}

impl Weight {
    pub fn new(scale: f64, decay: Decay) -> Self {
        Self { scale, decay }
    }

    pub fn constant(scale: f64) -> Self {
        Self::new(scale, Decay::Constant)
    }

    pub fn at(&self, t: usize, num_steps: usize) -> f64 {
        self.scale * self.decay.factor(t, num_steps)
    }
}

/// Inclusive range of timesteps during which a potential contributes.
///
/// Sampling counts down, so `start` is the first (largest) active `t` and `end` the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    start: usize,
    end: usize,
}

impl ActiveWindow {
    pub fn new(start: usize, end: usize) -> Result<Self, PotentialError> {
        if start < end {
            return Err(PotentialError::InvalidParams {
                kind: "active_window".to_string(),
                message: format!("window start ({}) precedes its end ({})", start, end),
            });
        }
        Ok(Self { start, end })
    }

    pub fn all() -> Self {
        Self {
            start: usize::MAX,
            end: 0,
        }
    }

    #[inline]
    pub fn contains(&self, t: usize) -> bool {
        self.end <= t && t <= self.start
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self::all()
    }
}

struct RegisteredPotential {
    potential: Box<dyn Potential>,
    weight: Weight,
    window: ActiveWindow,
}

/// Weighted sum of all active potentials at one step.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidanceEvaluation {
    /// Combined per-residue gradient, already multiplied by each potential's weight.
    pub gradient: Vec<Vector3<f64>>,
    /// Unweighted value of each potential that contributed, in registration order.
    pub values: Vec<(String, f64)>,
    pub warnings: Vec<PotentialEvaluationWarning>,
}

impl GuidanceEvaluation {
    pub fn empty(num_residues: usize) -> Self {
        Self {
            gradient: vec![Vector3::zeros(); num_residues],
            values: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max_gradient_norm(&self) -> f64 {
        self.gradient.iter().map(|g| g.norm()).fold(0.0, f64::max)
    }
}

/// Holds the known potential kinds and the potentials activated for a run.
///
/// Kinds are looked up case-insensitively, so `binder_RMSD` and `binder_rmsd` name the same kind.
#[derive(Default)]
pub struct PotentialRegistry {
    factories: HashMap<String, PotentialFactory>,
    active: Vec<RegisteredPotential>,
}

impl fmt::Debug for PotentialRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PotentialRegistry")
            .field("kinds", &self.kinds())
            .field("active", &self.names())
            .finish()
    }
}

impl PotentialRegistry {
    /// An empty registry that knows no kinds.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_kinds() -> Self {
        let mut registry = Self::new();
        registry.register_kind(loop_contacts::KIND, factory(LoopContacts::from_params));
        registry.register_kind(hetero_olig::KIND, factory(HeteroOligomerContacts::from_params));
        registry.register_kind(binder_rmsd::KIND, factory(BinderRmsd::from_params));
        registry.register_kind(res_pair::KIND, factory(ResiduePairConstraints::from_params));
        registry
    }

    /// Adds (or replaces) a potential kind.
    pub fn register_kind(&mut self, kind: &str, factory: PotentialFactory) {
        self.factories.insert(kind.to_lowercase(), factory);
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_lowercase())
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiates a potential of `kind` from `params` and activates it.
    pub fn register(
        &mut self,
        kind: &str,
        params: &toml::Table,
        weight: Weight,
        window: ActiveWindow,
    ) -> Result<(), PotentialError> {
        let factory = self
            .factories
            .get(&kind.to_lowercase())
            .ok_or_else(|| PotentialError::UnknownKind(kind.to_string()))?;
        let potential = factory(params)?;
        self.register_potential(potential, weight, window)
    }

    pub fn register_potential(
        &mut self,
        potential: Box<dyn Potential>,
        weight: Weight,
        window: ActiveWindow,
    ) -> Result<(), PotentialError> {
        if !weight.scale.is_finite() {
            return Err(PotentialError::InvalidParams {
                kind: potential.name().to_string(),
                message: "weight must be finite".to_string(),
            });
        }
        debug!(
            potential = potential.name(),
            scale = weight.scale,
            "Registered guiding potential."
        );
        self.active.push(RegisteredPotential {
            potential,
            weight,
            window,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.active.iter().map(|r| r.potential.name()).collect()
    }

    /// Checks every active potential against the layout of `structure` before sampling starts.
    pub fn check_all(&self, structure: &Structure) -> Result<(), PotentialError> {
        self.active
            .iter()
            .try_for_each(|r| r.potential.check(structure))
    }

    /// Evaluates all potentials active at `t` and combines their weighted gradients.
    ///
    /// A potential that fails or returns a non-finite or wrongly shaped result is left out of
    /// this step and reported in [`GuidanceEvaluation::warnings`].
    pub fn evaluate(&self, structure: &Structure, t: usize, num_steps: usize) -> GuidanceEvaluation {
        let n = structure.len();
        let scheduled: Vec<(&RegisteredPotential, f64)> = self
            .active
            .iter()
            .filter(|r| r.window.contains(t))
            .map(|r| (r, r.weight.at(t, num_steps)))
            .filter(|(_, w)| *w != 0.0)
            .collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = scheduled.iter();

        #[cfg(feature = "parallel")]
        let iterator = scheduled.par_iter();

        let results: Vec<Result<PotentialOutput, PotentialError>> = iterator
            .map(|(registered, _)| evaluate_checked(registered.potential.as_ref(), structure))
            .collect();

        let mut evaluation = GuidanceEvaluation::empty(n);
        for ((registered, weight), result) in scheduled.iter().zip(results) {
            let name = registered.potential.name();
            match result {
                Ok(output) => {
                    for (total, g) in evaluation.gradient.iter_mut().zip(&output.gradient) {
                        *total += g * *weight;
                    }
                    evaluation.values.push((name.to_string(), output.value));
                }
                Err(e) => {
                    warn!(potential = name, t, "Potential excluded from this step: {}", e);
                    evaluation.warnings.push(PotentialEvaluationWarning {
                        potential: name.to_string(),
                        t,
                        reason: e.to_string(),
                    });
                }
            }
        }
        evaluation
    }
}

fn factory<P: Potential + 'static>(
    build: fn(&toml::Table) -> Result<P, PotentialError>,
) -> PotentialFactory {
    Box::new(move |params: &toml::Table| Ok(Box::new(build(params)?) as Box<dyn Potential>))
}

fn evaluate_checked(
    potential: &dyn Potential,
    structure: &Structure,
) -> Result<PotentialOutput, PotentialError> {
    let output = potential.evaluate_one(structure)?;
    if output.gradient.len() != structure.len() {
        return Err(PotentialError::ShapeMismatch {
            potential: potential.name().to_string(),
            expected: structure.len(),
            found: output.gradient.len(),
        });
    }
    if !output.is_finite() {
        return Err(PotentialError::NonFinite(potential.name().to_string()));
    }
    Ok(output)
}
