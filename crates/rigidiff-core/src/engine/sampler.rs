use super::config::{ConfigError, SamplerConfig};
use super::diffuser;
use super::error::EngineError;
use super::guidance;
use super::model::{Conditioning, DenoisingModel, ModelError};
use super::progress::{Progress, ProgressReporter};
use super::state::{SamplerPhase, SamplingResult, StepRecord, TrajectoryFrame, TrajectoryState};
use crate::core::models::chain::{ChainInfo, chain_label};
use crate::core::models::frame::RigidFrame;
use crate::core::models::structure::Structure;
use crate::core::potentials::registry::PotentialRegistry;
use crate::core::schedule::NoiseSchedule;
use crate::core::symmetry::SymmetryError;
use crate::core::symmetry::lengths::assign_lengths;
use crate::core::symmetry::manager::SymmetryManager;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};

/// Stream of the run's generator that drives the trajectory; stream 0 picks chain lengths.
const TRAJECTORY_STREAM: u64 = 1;

/// A shared flag a caller sets to stop a run at the next step boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs one reverse-diffusion trajectory from `t = T` (or `partial_steps`) down to `t = 0`.
///
/// Everything that can be checked without running the model is checked by
/// [`DiffusionSampler::new`]: the schedule, the symmetry group, the chain lengths and every
/// potential's residue references. A constructed sampler can be run any number of times; each
/// run with the same configuration reproduces the same trajectory.
pub struct DiffusionSampler<'a> {
    config: SamplerConfig,
    model: &'a dyn DenoisingModel,
    schedule: NoiseSchedule,
    registry: PotentialRegistry,
    manager: SymmetryManager,
    cancellation: Option<CancellationToken>,
}

struct StepOutcome {
    next: Structure,
    record: StepRecord,
    snapshot: Option<TrajectoryFrame>,
}

impl<'a> DiffusionSampler<'a> {
    pub fn new(config: SamplerConfig, model: &'a dyn DenoisingModel) -> Result<Self, EngineError> {
        let schedule = config.schedule.build()?;
        let group = config.symmetry_group()?;

        let mut layout_rng = ChaCha8Rng::seed_from_u64(config.seed);
        let lengths = assign_lengths(
            &config.chains,
            group.order(),
            config.total_length,
            &mut layout_rng,
        )?;
        let asym_chains: Vec<ChainInfo> = config
            .chains
            .iter()
            .zip(&lengths)
            .enumerate()
            .map(|(k, (spec, &length))| ChainInfo::new(chain_label(k), length, spec.symmetric))
            .collect();
        let manager = SymmetryManager::new(group, asym_chains)?;

        let mut registry = PotentialRegistry::with_builtin_kinds();
        for spec in &config.potentials {
            spec.register_into(&mut registry)?;
        }
        let template = Structure::idealized(manager.full_chains().to_vec())?;
        registry.check_all(&template)?;

        info!(
            group = manager.group().name(),
            asym_residues = manager.asym_len(),
            full_residues = manager.full_len(),
            potentials = registry.len(),
            num_steps = schedule.num_steps(),
            "Diffusion sampler prepared."
        );

        Ok(Self {
            config,
            model,
            schedule,
            registry,
            manager,
            cancellation: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
    }

    pub fn symmetry_manager(&self) -> &SymmetryManager {
        &self.manager
    }

    pub fn registry(&self) -> &PotentialRegistry {
        &self.registry
    }

    /// Access for registering custom potential kinds after construction. Potentials activated
    /// here are not checked against the layout until they are evaluated.
    pub fn registry_mut(&mut self) -> &mut PotentialRegistry {
        &mut self.registry
    }

    /// Samples a structure from pure noise.
    #[instrument(skip_all, name = "diffusion_sampler", fields(seed = self.config.seed))]
    pub fn run(
        &self,
        conditioning: &Conditioning,
        reporter: &ProgressReporter,
    ) -> Result<SamplingResult, EngineError> {
        self.sample(conditioning, None, reporter)
    }

    /// Partial diffusion: noises `input` (an asymmetric unit matching the sampler's layout)
    /// forward to `partial_steps` and denoises from there.
    #[instrument(skip_all, name = "partial_diffusion", fields(seed = self.config.seed))]
    pub fn run_from(
        &self,
        conditioning: &Conditioning,
        input: &Structure,
        reporter: &ProgressReporter,
    ) -> Result<SamplingResult, EngineError> {
        self.sample(conditioning, Some(input), reporter)
    }

    fn sample(
        &self,
        conditioning: &Conditioning,
        input: Option<&Structure>,
        reporter: &ProgressReporter,
    ) -> Result<SamplingResult, EngineError> {
        let mut phase = SamplerPhase::Initializing;
        reporter.report(Progress::PhaseStart {
            name: "Initialization",
        });
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        rng.set_stream(TRAJECTORY_STREAM);

        let motif = self.motif_frames(conditioning)?;
        let fixed: Vec<bool> = motif.iter().map(Option::is_some).collect();
        let num_steps = self.schedule.num_steps();

        let (start_t, mut frames) = match input {
            None => (
                num_steps,
                diffuser::initial_frames(&mut rng, self.manager.asym_len(), &self.schedule),
            ),
            Some(structure) => {
                if structure.chains() != self.manager.asym_chains() {
                    return Err(SymmetryError::LayoutMismatch {
                        expected: self.manager.asym_len(),
                        found: structure.len(),
                    }
                    .into());
                }
                let t = self.config.partial_steps.unwrap_or(num_steps);
                info!(t, "Noising the input structure for partial diffusion.");
                (
                    t,
                    diffuser::forward_noise(&mut rng, structure.frames(), t, &self.schedule, &fixed),
                )
            }
        };
        for (frame, fixed_frame) in frames.iter_mut().zip(&motif) {
            if let Some(f) = fixed_frame {
                *frame = *f;
            }
        }
        let mut state = TrajectoryState::new(
            start_t,
            Structure::new(frames, self.manager.asym_chains().to_vec())?,
        );
        reporter.report(Progress::PhaseFinish);

        reporter.report(Progress::PhaseStart { name: "Denoising" });
        reporter.report(Progress::TaskStart {
            total_steps: start_t as u64,
        });
        phase = match phase {
            SamplerPhase::Initializing if start_t > 0 => SamplerPhase::Stepping(start_t),
            _ => SamplerPhase::Terminal,
        };

        let mut steps = Vec::with_capacity(start_t);
        let mut trajectory = self.config.record_trajectory.then(Vec::new);
        let mut consecutive_unstable = 0usize;

        while let SamplerPhase::Stepping(t) = phase {
            if self.cancellation.as_ref().is_some_and(|c| c.is_cancelled()) {
                warn!(t, "Sampling cancelled.");
                return Err(EngineError::Cancelled { t });
            }

            let outcome = self.step(&state, conditioning, &motif, &mut rng)?;

            if outcome.record.is_unstable() {
                consecutive_unstable += 1;
                warn!(
                    t,
                    residues = outcome.record.unstable_residues.len(),
                    consecutive = consecutive_unstable,
                    "Numerically unstable update; affected residues kept their previous frames."
                );
                if consecutive_unstable >= self.config.max_consecutive_instabilities {
                    return Err(EngineError::SamplingDiverged {
                        t,
                        consecutive: consecutive_unstable,
                    });
                }
            } else {
                consecutive_unstable = 0;
            }

            if let (Some(frames), Some(snapshot)) = (trajectory.as_mut(), outcome.snapshot) {
                frames.push(snapshot);
            }
            steps.push(outcome.record);
            state = TrajectoryState::new(t - 1, outcome.next);
            reporter.report(Progress::TaskIncrement);
            phase = SamplerPhase::after_step(t);
        }

        reporter.report(Progress::TaskFinish);
        reporter.report(Progress::PhaseFinish);

        let structure = self.manager.expand(&state.asym)?;
        let unstable = steps.iter().filter(|s| s.is_unstable()).count();
        info!(
            residues = structure.len(),
            steps = steps.len(),
            unstable_steps = unstable,
            "Sampling complete."
        );

        Ok(SamplingResult {
            structure,
            asymmetric_unit: state.asym,
            steps,
            trajectory,
        })
    }

    fn step(
        &self,
        state: &TrajectoryState,
        conditioning: &Conditioning,
        motif: &[Option<RigidFrame>],
        rng: &mut ChaCha8Rng,
    ) -> Result<StepOutcome, EngineError> {
        let t = state.t;
        let full = self.manager.expand(&state.asym)?;

        let prediction = self
            .model
            .predict(&full, t, conditioning)
            .map_err(|source| EngineError::Model { t, source })?;
        if prediction.frames.len() != full.len() {
            return Err(EngineError::Model {
                t,
                source: ModelError::ShapeMismatch {
                    expected: full.len(),
                    found: prediction.frames.len(),
                },
            });
        }

        let evaluation = self
            .registry
            .evaluate(&full, t, self.schedule.num_steps());
        let full_update = guidance::combine(
            full.frames(),
            &prediction.frames,
            &evaluation.gradient,
            self.schedule.step_fraction(t),
            &self.config.guidance,
        );
        let update = self.manager.project_update(&state.asym, &full_update)?;
        let noise = diffuser::posterior_noise(
            rng,
            self.manager.asym_len(),
            self.schedule.posterior_std(t),
            &self.config.noise,
        );

        let mut unstable_residues = Vec::new();
        let mut max_update = 0.0f64;
        let frames: Vec<RigidFrame> = state
            .asym
            .frames()
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                if let Some(fixed) = motif[i] {
                    return fixed;
                }
                match frame
                    .compose(&update[i])
                    .and_then(|moved| moved.compose(&noise[i]))
                {
                    Ok(next) => {
                        max_update = max_update.max(update[i].translation.norm());
                        next
                    }
                    Err(e) => {
                        debug!(t, residue = i, "Update rejected: {}", e);
                        unstable_residues.push(i);
                        *frame
                    }
                }
            })
            .collect();
        let next = state.asym.with_frames(frames)?;

        let snapshot = if self.config.record_trajectory {
            let denoised = Structure::new(prediction.frames, full.chains().to_vec()).ok();
            Some(TrajectoryFrame {
                t,
                denoised,
                noisy: self.manager.expand(&next)?,
            })
        } else {
            None
        };

        debug!(
            t,
            max_update,
            potentials = evaluation.values.len(),
            warnings = evaluation.warnings.len(),
            "Step complete."
        );

        Ok(StepOutcome {
            next,
            record: StepRecord {
                t,
                potential_values: evaluation.values,
                warnings: evaluation.warnings,
                unstable_residues,
                max_update,
                confidence: prediction.confidence,
            },
            snapshot,
        })
    }

    /// Fixed frames per asymmetric-unit residue, from the conditioning's motif.
    fn motif_frames(&self, conditioning: &Conditioning) -> Result<Vec<Option<RigidFrame>>, EngineError> {
        let mut frames = vec![None; self.manager.asym_len()];
        for residue in &conditioning.motif {
            if residue.index >= frames.len() || !residue.frame.is_valid() {
                return Err(ConfigError::InvalidValue {
                    parameter: "conditioning.motif",
                    reason: format!(
                        "residue {} is outside the asymmetric unit of {} residues or has an invalid frame",
                        residue.index,
                        frames.len()
                    ),
                }
                .into());
            }
            frames[residue.index] = Some(residue.frame);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::symmetry::lengths::{ChainSpec, LengthSpec};
    use crate::engine::config::{PotentialSpec, SamplerConfigBuilder, SymmetryConfig};
    use crate::engine::model::{IdealHelixModel, MotifResidue, Prediction};
    use crate::core::utils::geometry::calculate_aligned_rmsd;
    use nalgebra::{Point3, UnitQuaternion, Vector3};
    use std::collections::HashSet;

    fn single_chain(length: usize, num_steps: usize, seed: u64) -> SamplerConfigBuilder {
        SamplerConfigBuilder::new()
            .num_steps(num_steps)
            .chains(vec![ChainSpec::symmetric(LengthSpec::Fixed(length))])
            .seed(seed)
    }

    fn quiet() -> ProgressReporter<'static> {
        ProgressReporter::new()
    }

    /// Returns NaN frames at the listed timesteps and an ideal helix otherwise.
    struct UnstableAt {
        steps: HashSet<usize>,
        inner: IdealHelixModel,
    }

    impl UnstableAt {
        fn new(steps: &[usize]) -> Self {
            Self {
                steps: steps.iter().copied().collect(),
                inner: IdealHelixModel::default(),
            }
        }
    }

    impl DenoisingModel for UnstableAt {
        fn predict(
            &self,
            structure: &Structure,
            t: usize,
            conditioning: &Conditioning,
        ) -> Result<Prediction, ModelError> {
            if self.steps.contains(&t) {
                let nan = RigidFrame::at(Point3::new(f64::NAN, f64::NAN, f64::NAN));
                return Ok(Prediction {
                    frames: vec![nan; structure.len()],
                    confidence: None,
                });
            }
            self.inner.predict(structure, t, conditioning)
        }
    }

    #[test]
    fn fifty_step_single_chain_run_yields_valid_twenty_residue_structure() {
        let model = IdealHelixModel::default();
        let sampler = DiffusionSampler::new(single_chain(20, 50, 11).build().unwrap(), &model).unwrap();
        let result = sampler.run(&Conditioning::new(), &quiet()).unwrap();

        assert_eq!(result.structure.len(), 20);
        assert!(result.structure.frames().iter().all(RigidFrame::is_valid));
        assert_eq!(result.steps.len(), 50);
        assert_eq!(result.unstable_step_count(), 0);
        assert_eq!(result.steps.first().map(|s| s.t), Some(50));
        assert_eq!(result.steps.last().map(|s| s.t), Some(1));

        // The final step is noise-free and takes the full step toward the prediction.
        let helix: Vec<_> = model.helix(20).iter().map(|f| f.position).collect();
        let rmsd = calculate_aligned_rmsd(&helix, &result.structure.positions()).unwrap();
        assert!(rmsd < 1e-6, "final structure deviates from the prediction by {}", rmsd);
    }

    #[test]
    fn same_seed_reproduces_the_trajectory() {
        let model = IdealHelixModel::default();
        let config = single_chain(15, 20, 42).record_trajectory(true).build().unwrap();
        let first = DiffusionSampler::new(config.clone(), &model).unwrap();
        let second = DiffusionSampler::new(config.clone(), &model).unwrap();

        let a = first.run(&Conditioning::new(), &quiet()).unwrap();
        let b = second.run(&Conditioning::new(), &quiet()).unwrap();
        let again = first.run(&Conditioning::new(), &quiet()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, again);

        let other = DiffusionSampler::new(config.with_seed(43), &model)
            .unwrap()
            .run(&Conditioning::new(), &quiet())
            .unwrap();
        assert_ne!(a.trajectory, other.trajectory);
    }

    #[test]
    fn c4_assembly_stays_symmetric_at_every_step() {
        let model = IdealHelixModel::default();
        let config = SamplerConfigBuilder::new()
            .num_steps(30)
            .chains(vec![ChainSpec::symmetric(LengthSpec::Range { min: 10, max: 30 })])
            .symmetry(SymmetryConfig::named("C4"))
            .record_trajectory(true)
            .seed(5)
            .build()
            .unwrap();
        let sampler = DiffusionSampler::new(config, &model).unwrap();
        let result = sampler.run(&Conditioning::new().with_symmetry("C4"), &quiet()).unwrap();

        let asym_len = result.asymmetric_unit.len();
        assert!((10..=30).contains(&asym_len));
        assert_eq!(result.structure.len(), 4 * asym_len);
        assert_eq!(result.structure.chains().len(), 4);

        let manager = sampler.symmetry_manager();
        let trajectory = result.trajectory.as_ref().unwrap();
        assert_eq!(trajectory.len(), 30);
        for frame in trajectory {
            let deviation = manager.max_copy_deviation(&frame.noisy).unwrap();
            assert!(
                deviation.position < 1e-6 && deviation.orientation < 1e-6,
                "copies drifted at t = {}: {:?}",
                frame.t,
                deviation
            );
        }
        assert!(manager.is_symmetric(&result.structure, 1e-6));
    }

    #[test]
    fn three_consecutive_unstable_steps_abort_the_run() {
        let model = UnstableAt::new(&[30, 29, 28]);
        let sampler = DiffusionSampler::new(single_chain(12, 50, 3).build().unwrap(), &model).unwrap();
        let result = sampler.run(&Conditioning::new(), &quiet());
        assert!(matches!(
            result,
            Err(EngineError::SamplingDiverged {
                t: 28,
                consecutive: 3
            })
        ));
    }

    #[test]
    fn isolated_unstable_steps_are_absorbed() {
        let model = UnstableAt::new(&[30, 29, 10]);
        let sampler = DiffusionSampler::new(single_chain(12, 50, 3).build().unwrap(), &model).unwrap();
        let result = sampler.run(&Conditioning::new(), &quiet()).unwrap();
        assert_eq!(result.unstable_step_count(), 3);
        assert!(result.structure.frames().iter().all(RigidFrame::is_valid));

        let unstable: Vec<&StepRecord> = result.steps.iter().filter(|s| s.is_unstable()).collect();
        assert_eq!(unstable.iter().map(|s| s.t).collect::<Vec<_>>(), vec![30, 29, 10]);
        assert!(unstable.iter().all(|s| s.unstable_residues.len() == 12));
    }

    #[test]
    fn motif_residues_keep_their_frames() {
        let model = IdealHelixModel::default();
        let fixed = RigidFrame::new(
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.4, 0.0)),
            Point3::new(1.0, 2.0, 3.0),
        );
        let conditioning = Conditioning::new().with_motif(vec![MotifResidue {
            index: 3,
            frame: fixed,
        }]);
        let config = single_chain(10, 15, 8).record_trajectory(true).build().unwrap();
        let sampler = DiffusionSampler::new(config, &model).unwrap();
        let result = sampler.run(&conditioning, &quiet()).unwrap();

        assert_eq!(result.asymmetric_unit.frames()[3], fixed);
        for frame in result.trajectory.unwrap() {
            assert_eq!(frame.noisy.frames()[3], fixed);
        }
    }

    #[test]
    fn motif_outside_the_asymmetric_unit_is_rejected() {
        let model = IdealHelixModel::default();
        let sampler = DiffusionSampler::new(single_chain(5, 5, 0).build().unwrap(), &model).unwrap();
        let conditioning = Conditioning::new().with_motif(vec![MotifResidue {
            index: 5,
            frame: RigidFrame::identity(),
        }]);
        let err = sampler.run(&conditioning, &quiet()).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn partial_diffusion_runs_only_the_requested_steps() {
        let model = IdealHelixModel::default();
        let config = single_chain(12, 50, 21).partial_steps(10).build().unwrap();
        let sampler = DiffusionSampler::new(config, &model).unwrap();
        let input = Structure::new(model.helix(12), sampler.symmetry_manager().asym_chains().to_vec())
            .unwrap();
        let result = sampler.run_from(&Conditioning::new(), &input, &quiet()).unwrap();

        assert_eq!(result.steps.len(), 10);
        assert_eq!(result.steps[0].t, 10);
        let rmsd = calculate_aligned_rmsd(&input.positions(), &result.structure.positions()).unwrap();
        assert!(rmsd < 1e-6);
    }

    #[test]
    fn partial_diffusion_rejects_a_mismatched_input() {
        let model = IdealHelixModel::default();
        let config = single_chain(12, 20, 21).partial_steps(5).build().unwrap();
        let sampler = DiffusionSampler::new(config, &model).unwrap();
        let input = Structure::new(model.helix(8), vec![ChainInfo::new('A', 8, true)]).unwrap();
        assert!(matches!(
            sampler.run_from(&Conditioning::new(), &input, &quiet()),
            Err(EngineError::Symmetry { .. })
        ));
    }

    #[test]
    fn cancellation_stops_at_the_next_step_boundary() {
        struct CancelAt {
            t: usize,
            token: CancellationToken,
            inner: IdealHelixModel,
        }
        impl DenoisingModel for CancelAt {
            fn predict(
                &self,
                structure: &Structure,
                t: usize,
                conditioning: &Conditioning,
            ) -> Result<Prediction, ModelError> {
                if t == self.t {
                    self.token.cancel();
                }
                self.inner.predict(structure, t, conditioning)
            }
        }

        let token = CancellationToken::new();
        let model = CancelAt {
            t: 10,
            token: token.clone(),
            inner: IdealHelixModel::default(),
        };
        let sampler = DiffusionSampler::new(single_chain(8, 20, 1).build().unwrap(), &model)
            .unwrap()
            .with_cancellation(token);
        assert!(matches!(
            sampler.run(&Conditioning::new(), &quiet()),
            Err(EngineError::Cancelled { t: 9 })
        ));
    }

    #[test]
    fn configuration_errors_surface_before_sampling() {
        let model = IdealHelixModel::default();
        let unknown_group = single_chain(10, 10, 0)
            .symmetry(SymmetryConfig::named("Q7"))
            .build()
            .unwrap();
        let err = DiffusionSampler::new(unknown_group, &model).err().unwrap();
        assert!(matches!(err, EngineError::Symmetry { .. }));

        let out_of_range = single_chain(10, 10, 0)
            .potential(
                toml::from_str::<PotentialSpec>(
                    "kind = \"loop_contacts\"\nparams = { residue_a = 0, residue_b = 40, max_distance = 8.0 }",
                )
                .unwrap(),
            )
            .build()
            .unwrap();
        let err = DiffusionSampler::new(out_of_range, &model).err().unwrap();
        assert!(matches!(err, EngineError::Potential { .. }));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn potential_values_are_recorded_per_step() {
        let model = IdealHelixModel::default();
        let spec: PotentialSpec = toml::from_str(
            r#"
            kind = "res_pair_constraints"
            weight = 0.5
            active_window = [10, 1]
            params = { pairs = [{ residue_a = 0, residue_b = 9, distance = 6.0 }] }
            "#,
        )
        .unwrap();
        let config = single_chain(10, 20, 4).potential(spec).build().unwrap();
        let sampler = DiffusionSampler::new(config, &model).unwrap();
        let result = sampler.run(&Conditioning::new(), &quiet()).unwrap();

        for record in &result.steps {
            let expected = usize::from(record.t <= 10);
            assert_eq!(record.potential_values.len(), expected, "t = {}", record.t);
        }
    }

    #[test]
    fn reporter_sees_one_increment_per_step() {
        use std::sync::Mutex;
        let increments = Mutex::new(0u64);
        let total = Mutex::new(0u64);
        let reporter = ProgressReporter::with_callback(Box::new(|event| match event {
            Progress::TaskStart { total_steps } => *total.lock().unwrap() = total_steps,
            Progress::TaskIncrement => *increments.lock().unwrap() += 1,
            _ => {}
        }));
        let model = IdealHelixModel::default();
        let sampler = DiffusionSampler::new(single_chain(6, 12, 2).build().unwrap(), &model).unwrap();
        sampler.run(&Conditioning::new(), &reporter).unwrap();
        drop(reporter);
        assert_eq!(total.into_inner().unwrap(), 12);
        assert_eq!(increments.into_inner().unwrap(), 12);
    }
}
