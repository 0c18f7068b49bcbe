use crate::core::contig::{ContigMap, ContigMapping, SampledContig};
use crate::core::models::reference::ReferenceStructure;
use crate::core::symmetry::lengths::LengthRange;
use crate::engine::config::{ConfigError, SamplerConfig};
use crate::engine::error::EngineError;
use crate::engine::model::{Conditioning, DenoisingModel, MotifResidue};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sampler::{CancellationToken, DiffusionSampler};
use crate::engine::state::SamplingResult;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A batch of independent designs sharing one configuration.
#[derive(Debug, Clone, Default)]
pub struct DesignRequest {
    pub num_designs: usize,
    /// Design `i` runs with seed `base_seed + i`.
    pub base_seed: u64,
    /// Contig string describing the chain layout; overrides the configured chains.
    pub contig: Option<String>,
    /// Bounds on the designed length when a contig is sampled.
    pub length: Option<LengthRange>,
    /// Motif residues (motif syntax, e.g. `A10-15`) whose structure is diffused, not fixed.
    pub inpaint_str: Vec<String>,
    /// Structure that motif segments copy frames from. Residue `X10` of the contig is the
    /// residue numbered 10 in chain `X`.
    pub reference: Option<ReferenceStructure>,
    pub conditioning: Conditioning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DesignOutcome {
    Completed(Box<SamplingResult>),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    pub index: usize,
    pub seed: u64,
    pub contig: Option<SampledContig>,
    /// Design-to-reference correspondence, present whenever a contig was sampled.
    pub mapping: Option<ContigMapping>,
    pub outcome: DesignOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesignResult {
    pub designs: Vec<Design>,
}

impl DesignResult {
    pub fn completed(&self) -> impl Iterator<Item = (&Design, &SamplingResult)> {
        self.designs.iter().filter_map(|d| match &d.outcome {
            DesignOutcome::Completed(result) => Some((d, result.as_ref())),
            DesignOutcome::Failed { .. } => None,
        })
    }

    pub fn failed_count(&self) -> usize {
        self.designs
            .iter()
            .filter(|d| matches!(d.outcome, DesignOutcome::Failed { .. }))
            .count()
    }
}

/// Generates `request.num_designs` independent designs.
///
/// A design whose trajectory diverges or whose model call fails is recorded as
/// [`DesignOutcome::Failed`] and the batch carries on. Configuration errors and cancellation
/// abort the whole batch.
#[instrument(skip_all, name = "design_workflow")]
pub fn run(
    request: &DesignRequest,
    config: &SamplerConfig,
    model: &dyn DenoisingModel,
    reporter: &ProgressReporter,
    cancellation: Option<&CancellationToken>,
) -> Result<DesignResult, EngineError> {
    reporter.report(Progress::PhaseStart { name: "Preparation" });
    let contig = match request.contig.as_deref() {
        Some(text) => Some(ContigMap::parse(text)?.with_inpaint_str(&request.inpaint_str)?),
        None if !request.inpaint_str.is_empty() => {
            return Err(ConfigError::InvalidValue {
                parameter: "inpaint_str",
                reason: "requires a contig".to_string(),
            }
            .into());
        }
        None => None,
    };
    let sym_order = config.symmetry_group()?.order();
    info!(
        designs = request.num_designs,
        base_seed = request.base_seed,
        contig = request.contig.as_deref().unwrap_or("-"),
        "Starting design batch."
    );
    reporter.report(Progress::PhaseFinish);

    reporter.report(Progress::PhaseStart { name: "Sampling" });
    reporter.report(Progress::TaskStart {
        total_steps: request.num_designs as u64,
    });

    let indices: Vec<usize> = (0..request.num_designs).collect();

    #[cfg(not(feature = "parallel"))]
    let iterator = indices.iter();

    #[cfg(feature = "parallel")]
    let iterator = indices.par_iter();

    let results: Vec<Result<Design, EngineError>> = iterator
        .map(|&index| {
            let design = run_one(
                index,
                request,
                contig.as_ref(),
                sym_order,
                config,
                model,
                cancellation,
            );
            reporter.report(Progress::TaskIncrement);
            design
        })
        .collect();

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    let designs = results.into_iter().collect::<Result<Vec<_>, _>>()?;
    let result = DesignResult { designs };
    info!(
        completed = result.designs.len() - result.failed_count(),
        failed = result.failed_count(),
        "Design batch complete."
    );
    Ok(result)
}

fn run_one(
    index: usize,
    request: &DesignRequest,
    contig: Option<&ContigMap>,
    sym_order: usize,
    config: &SamplerConfig,
    model: &dyn DenoisingModel,
    cancellation: Option<&CancellationToken>,
) -> Result<Design, EngineError> {
    let seed = request.base_seed.wrapping_add(index as u64);
    let mut design_config = config.with_seed(seed);
    let mut conditioning = request.conditioning.clone();

    let sampled: Option<SampledContig> = match contig {
        Some(map) => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let sampled = map.sample(&mut rng, request.length, Some(sym_order))?;
            design_config.chains = sampled.chain_specs();
            design_config.total_length = None;
            if let Some(reference) = &request.reference {
                conditioning.motif.extend(motif_from_reference(&sampled, reference)?);
            }
            Some(sampled)
        }
        None => None,
    };

    let mut sampler = DiffusionSampler::new(design_config, model)?;
    if let Some(token) = cancellation {
        sampler = sampler.with_cancellation(token.clone());
    }

    let outcome = match sampler.run(&conditioning, &ProgressReporter::new()) {
        Ok(result) => DesignOutcome::Completed(Box::new(result)),
        Err(e @ (EngineError::SamplingDiverged { .. } | EngineError::Model { .. })) => {
            warn!(design = index, seed, "Design failed: {}", e);
            DesignOutcome::Failed {
                reason: e.to_string(),
            }
        }
        Err(e) => return Err(e),
    };

    let mapping = sampled
        .as_ref()
        .map(|s| s.mapping_record(request.reference.as_ref()));
    Ok(Design {
        index,
        seed,
        contig: sampled,
        mapping,
        outcome,
    })
}

/// Fixed frames for every motif position of a sampled contig, looked up by residue number.
///
/// Residues diffused through an inpaint_str are not fixed and are skipped.
pub fn motif_from_reference(
    sampled: &SampledContig,
    reference: &ReferenceStructure,
) -> Result<Vec<MotifResidue>, EngineError> {
    sampled
        .mapping()
        .iter()
        .zip(sampled.motif_mask())
        .enumerate()
        .filter_map(|(index, (source, fixed))| source.filter(|_| fixed).map(|s| (index, s)))
        .map(|(index, (chain, number))| {
            let frame = reference
                .frame(chain, number)
                .copied()
                .ok_or_else(|| ConfigError::InvalidValue {
                    parameter: "reference",
                    reason: format!("motif residue {}{} is not in the reference structure", chain, number),
                })?;
            Ok(MotifResidue { index, frame })
        })
        .collect()
}
