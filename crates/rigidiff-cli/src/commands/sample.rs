use crate::cli::SampleArgs;
use crate::config::{AppConfig, PartialSamplerConfig};
use crate::error::{CliError, Result};
use crate::pdb;
use crate::utils::progress::CliProgressHandler;
use rigidiff::core::contig::ContigMapping;
use rigidiff::core::models::chain::{ChainInfo, chain_label};
use rigidiff::core::models::reference::ReferenceStructure;
use rigidiff::core::models::structure::Structure;
use rigidiff::engine::error::EngineError;
use rigidiff::engine::model::{Conditioning, DenoisingModel, IdealHelixModel};
use rigidiff::engine::progress::ProgressReporter;
use rigidiff::engine::sampler::DiffusionSampler;
use rigidiff::engine::state::SamplingResult;
use rigidiff::workflows::design::{self, DesignOutcome, DesignRequest};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub fn run(args: SampleArgs) -> Result<()> {
    let partial_config = match &args.config {
        Some(path) => PartialSamplerConfig::from_file(path)?,
        None => PartialSamplerConfig::default(),
    };

    let input = args
        .input
        .as_deref()
        .map(read_asymmetric_unit)
        .transpose()?;

    info!("Merging configuration from file and CLI arguments...");
    let config = partial_config.merge_with_cli(&args, input.as_ref())?;

    let mut conditioning = Conditioning::new();
    let group = config.sampler.symmetry_group().map_err(EngineError::from)?;
    if !group.is_trivial() {
        conditioning = conditioning.with_symmetry(group.name());
    }

    let model = IdealHelixModel::default();
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    let results = match &input {
        Some(structure) => {
            if config.contig.is_some() {
                warn!("A contig was given together with an input structure; the contig is ignored.");
            }
            println!("Starting partial diffusion of {} design(s)...", config.num_designs);
            run_partial(&config, structure, &conditioning, &model, &reporter)?
        }
        None => {
            println!("Starting backbone sampling of {} design(s)...", config.num_designs);
            let reference = args.reference.as_deref().map(read_reference).transpose()?;
            let request = DesignRequest {
                num_designs: config.num_designs,
                base_seed: config.base_seed,
                contig: config.contig.clone(),
                length: config.length,
                inpaint_str: config.inpaint_str.clone(),
                reference,
                conditioning,
            };
            let outcome = design::run(&request, &config.sampler, &model, &reporter, None)?;
            outcome
                .designs
                .into_iter()
                .map(|d| DesignRun {
                    outcome: match d.outcome {
                        DesignOutcome::Completed(result) => Ok(*result),
                        DesignOutcome::Failed { reason } => Err(reason),
                    },
                    mapping: d.mapping,
                })
                .collect()
        }
    };

    write_results(&args.output, &results)
}

/// Reads the partial-diffusion input and relabels its chains in canonical order.
fn read_asymmetric_unit(path: &Path) -> Result<Structure> {
    let structure = read_pdb(path)?;
    let chains = structure
        .chains()
        .iter()
        .enumerate()
        .map(|(k, c)| ChainInfo::new(chain_label(k), c.length, c.symmetric))
        .collect();
    Ok(Structure::new(structure.frames().to_vec(), chains).map_err(EngineError::from)?)
}

fn read_pdb(path: &Path) -> Result<Structure> {
    info!("Loading structure from {:?}", path);
    let file = File::open(path)?;
    pdb::read_structure(BufReader::new(file)).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read_reference(path: &Path) -> Result<ReferenceStructure> {
    info!("Loading reference structure from {:?}", path);
    let file = File::open(path)?;
    pdb::read_reference(BufReader::new(file)).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e,
    })
}

struct DesignRun {
    outcome: std::result::Result<SamplingResult, String>,
    /// Written next to the design when a contig was sampled.
    mapping: Option<ContigMapping>,
}

fn run_partial(
    config: &AppConfig,
    input: &Structure,
    conditioning: &Conditioning,
    model: &dyn DenoisingModel,
    reporter: &ProgressReporter,
) -> Result<Vec<DesignRun>> {
    (0..config.num_designs)
        .map(|i| {
            let seed = config.base_seed.wrapping_add(i as u64);
            let sampler = DiffusionSampler::new(config.sampler.with_seed(seed), model)?;
            let outcome = match sampler.run_from(conditioning, input, reporter) {
                Ok(result) => Ok(result),
                Err(e @ (EngineError::SamplingDiverged { .. } | EngineError::Model { .. })) => {
                    warn!(design = i, seed, "Design failed: {}", e);
                    Err(e.to_string())
                }
                Err(e) => return Err(e.into()),
            };
            Ok(DesignRun {
                outcome,
                mapping: None,
            })
        })
        .collect()
}

fn write_results(output: &Path, results: &[DesignRun]) -> Result<()> {
    let total = results.len();
    let mut written = 0usize;

    for (i, run) in results.iter().enumerate() {
        let output_path = generate_output_path(output, i + 1, total, None);
        let result = match &run.outcome {
            Ok(result) => result,
            Err(reason) => {
                println!("  Design {} failed: {}", i + 1, reason);
                continue;
            }
        };

        info!(
            design = i + 1,
            residues = result.structure.len(),
            unstable_steps = result.unstable_step_count(),
            "Writing design to {:?}",
            &output_path
        );
        let mut file = File::create(&output_path)?;
        pdb::write_structure(&mut file, &result.structure).map_err(|e| CliError::FileParsing {
            path: output_path.clone(),
            source: e.into(),
        })?;

        if let Some(trajectory) = &result.trajectory {
            let trajectory_path = generate_output_path(output, i + 1, total, Some("traj"));
            let mut file = File::create(&trajectory_path)?;
            pdb::write_models(&mut file, trajectory.iter().map(|frame| &frame.noisy)).map_err(
                |e| CliError::FileParsing {
                    path: trajectory_path.clone(),
                    source: e.into(),
                },
            )?;
        }

        if let Some(mapping) = &run.mapping {
            let mapping_path = generate_output_path(output, i + 1, total, Some("mapping"))
                .with_extension("toml");
            let text = toml::to_string(mapping).map_err(|e| CliError::FileParsing {
                path: mapping_path.clone(),
                source: e.into(),
            })?;
            std::fs::write(&mapping_path, text)?;
        }

        println!(
            "✓ Design {} ({} residues) written to: {}",
            i + 1,
            result.structure.len(),
            output_path.display()
        );
        written += 1;
    }

    if written == 0 {
        warn!("Every design failed; nothing was written.");
        return Err(CliError::Other(anyhow::anyhow!(
            "all {} design(s) failed",
            total
        )));
    }
    if written < total {
        println!("Warning: {} of {} design(s) failed.", total - written, total);
    }
    Ok(())
}

/// `out.pdb` for a single design, `out_3.pdb` for the third of several, and `out_3_traj.pdb`
/// for its trajectory.
fn generate_output_path(base: &Path, index: usize, total: usize, suffix: Option<&str>) -> PathBuf {
    if total <= 1 && suffix.is_none() {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "design".to_string());
    let mut name = stem;
    if total > 1 {
        name.push_str(&format!("_{}", index));
    }
    if let Some(suffix) = suffix {
        name.push_str(&format!("_{}", suffix));
    }
    match base.extension() {
        Some(ext) => name.push_str(&format!(".{}", ext.to_string_lossy())),
        None => name.push_str(".pdb"),
    }
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;

    fn sample_args(argv: &[&str]) -> SampleArgs {
        let mut full = vec!["rigidiff", "sample"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Sample(args) => args,
        }
    }

    #[test]
    fn output_paths_are_numbered_only_for_batches() {
        let base = Path::new("/tmp/out/design.pdb");
        assert_eq!(generate_output_path(base, 1, 1, None), base);
        assert_eq!(
            generate_output_path(base, 3, 4, None),
            Path::new("/tmp/out/design_3.pdb")
        );
        assert_eq!(
            generate_output_path(base, 1, 1, Some("traj")),
            Path::new("/tmp/out/design_traj.pdb")
        );
        assert_eq!(
            generate_output_path(base, 2, 2, Some("traj")),
            Path::new("/tmp/out/design_2_traj.pdb")
        );
    }

    #[test]
    fn sample_writes_one_pdb_per_design() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("sampler.toml");
        fs::write(&config_path, "[[chains]]\nlength = \"8-12\"\n").unwrap();
        let output = dir.path().join("design.pdb");

        let args = sample_args(&[
            "-o",
            output.to_str().unwrap(),
            "-c",
            config_path.to_str().unwrap(),
            "-n",
            "2",
            "-T",
            "6",
            "--record-trajectory",
        ]);
        run(args).unwrap();

        for name in ["design_1.pdb", "design_2.pdb", "design_1_traj.pdb", "design_2_traj.pdb"] {
            assert!(dir.path().join(name).exists(), "{} missing", name);
        }
        let structure =
            pdb::read_structure(BufReader::new(File::open(dir.path().join("design_1.pdb")).unwrap()))
                .unwrap();
        assert!((8..=12).contains(&structure.len()));
        let trajectory = fs::read_to_string(dir.path().join("design_1_traj.pdb")).unwrap();
        assert_eq!(trajectory.matches("ENDMDL").count(), 6);
    }

    #[test]
    fn partial_diffusion_keeps_the_input_layout() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.pdb");
        let helix = IdealHelixModel::default().helix(10);
        let input = Structure::new(helix, vec![ChainInfo::new('A', 10, true)]).unwrap();
        pdb::write_structure(&mut File::create(&input_path).unwrap(), &input).unwrap();

        let output = dir.path().join("partial.pdb");
        let args = sample_args(&[
            "-o",
            output.to_str().unwrap(),
            "-i",
            input_path.to_str().unwrap(),
            "-T",
            "20",
            "--partial-steps",
            "5",
        ]);
        run(args).unwrap();

        let result = pdb::read_structure(BufReader::new(File::open(&output).unwrap())).unwrap();
        assert_eq!(result.chains(), input.chains());
    }

    /// Rewrites the residue numbers of a written PDB, residue `k` (1-based) becoming `numbers[k - 1]`.
    fn renumber(pdb: &str, numbers: &[i32]) -> String {
        pdb.lines()
            .map(|line| {
                if !line.starts_with("ATOM") {
                    return format!("{}\n", line);
                }
                let written: usize = line[22..26].trim().parse().unwrap();
                format!("{}{:>4}{}\n", &line[..22], numbers[written - 1], &line[26..])
            })
            .collect()
    }

    #[test]
    fn motif_frames_are_copied_from_the_numbered_reference() {
        let dir = tempfile::tempdir().unwrap();
        let helix = IdealHelixModel::default().helix(6);
        let reference = Structure::new(helix, vec![ChainInfo::new('A', 6, true)]).unwrap();
        let mut buffer = Vec::new();
        pdb::write_structure(&mut buffer, &reference).unwrap();
        let numbered = renumber(&String::from_utf8(buffer).unwrap(), &[10, 11, 12, 20, 21, 22]);
        let reference_path = dir.path().join("reference.pdb");
        fs::write(&reference_path, numbered).unwrap();
        let reference =
            pdb::read_structure(BufReader::new(File::open(&reference_path).unwrap())).unwrap();

        let output = dir.path().join("motif.pdb");
        let args = sample_args(&[
            "-o",
            output.to_str().unwrap(),
            "--contig",
            "3/A12/2/A20-21/3",
            "--inpaint-str",
            "A21",
            "--reference",
            reference_path.to_str().unwrap(),
            "-T",
            "8",
        ]);
        run(args).unwrap();

        let design = pdb::read_structure(BufReader::new(File::open(&output).unwrap())).unwrap();
        assert_eq!(design.len(), 11);
        // A12 and A20 sit at design positions 3 and 6; A21 is diffused.
        for (design_index, reference_index) in [(3, 2), (6, 3)] {
            let a = &design.frames()[design_index];
            let b = &reference.frames()[reference_index];
            assert!((a.position - b.position).norm() < 2e-3, "residue {}", design_index);
            assert!(a.orientation.angle_to(&b.orientation) < 5e-3, "residue {}", design_index);
        }

        let mapping: toml::Table =
            toml::from_str(&fs::read_to_string(dir.path().join("motif_mapping.toml")).unwrap())
                .unwrap();
        let residues = mapping["residues"].as_array().unwrap();
        assert_eq!(residues.len(), 3);
        assert_eq!(residues[1]["reference_number"].as_integer(), Some(20));
        assert_eq!(residues[1]["reference_index"].as_integer(), Some(3));
        assert_eq!(residues[1]["design_index"].as_integer(), Some(6));
        assert_eq!(residues[2]["diffused"].as_bool(), Some(true));
        assert_eq!(mapping["designed_length"].as_integer(), Some(11));
    }

    #[test]
    fn motif_missing_from_the_reference_numbering_fails() {
        let dir = tempfile::tempdir().unwrap();
        let helix = IdealHelixModel::default().helix(3);
        let reference = Structure::new(helix, vec![ChainInfo::new('A', 3, true)]).unwrap();
        let mut buffer = Vec::new();
        pdb::write_structure(&mut buffer, &reference).unwrap();
        let reference_path = dir.path().join("reference.pdb");
        fs::write(
            &reference_path,
            renumber(&String::from_utf8(buffer).unwrap(), &[10, 11, 12]),
        )
        .unwrap();

        let output = dir.path().join("out.pdb");
        let args = sample_args(&[
            "-o",
            output.to_str().unwrap(),
            "--contig",
            "2/A1-2/2",
            "--reference",
            reference_path.to_str().unwrap(),
            "-T",
            "4",
        ]);
        assert!(matches!(run(args), Err(CliError::Rigidiff(EngineError::Config { .. }))));
        assert!(!output.exists());
    }

    #[test]
    fn missing_input_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdb");
        let missing = dir.path().join("missing.pdb");
        let args = sample_args(&[
            "-o",
            output.to_str().unwrap(),
            "-i",
            missing.to_str().unwrap(),
        ]);
        assert!(matches!(run(args), Err(CliError::Io(_))));
    }
}
