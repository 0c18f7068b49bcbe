use crate::cli::SampleArgs;
use crate::error::{CliError, Result};
use rigidiff::core::contig::ContigMap;
use rigidiff::core::models::structure::Structure;
use rigidiff::core::potentials::registry::Decay;
use rigidiff::core::schedule::ScheduleProfile;
use rigidiff::core::symmetry::lengths::{ChainSpec, LengthRange, LengthSpec};
use rigidiff::engine::config::{
    self as core_config, GuidanceConfig, NoiseConfig, OperatorSpec, PotentialSpec, ScheduleConfig,
    SymmetryConfig,
};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const DEFAULT_NUM_DESIGNS: usize = 1;
const DEFAULT_SEED: u64 = 0;

/// A length written either as an integer or as a `"min-max"` string.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum PartialLength {
    Fixed(usize),
    Text(String),
}

impl PartialLength {
    fn to_spec(&self) -> Result<LengthSpec> {
        match self {
            PartialLength::Fixed(n) => Ok(LengthSpec::Fixed(*n)),
            PartialLength::Text(s) => parse_length(s),
        }
    }
}

fn parse_length(s: &str) -> Result<LengthSpec> {
    LengthSpec::from_str(s).map_err(|e| CliError::Config(e.to_string()))
}

fn parse_length_range(s: &str) -> Result<LengthRange> {
    let (min, max) = parse_length(s)?.bounds();
    Ok(LengthRange::new(min, max))
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value)))
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialScheduleConfig {
    #[serde(rename = "num-steps")]
    num_steps: Option<usize>,
    #[serde(rename = "rotation-max")]
    rotation_max: Option<f64>,
    #[serde(rename = "translation-max")]
    translation_max: Option<f64>,
    profile: Option<ScheduleProfile>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialGuidanceConfig {
    strength: Option<f64>,
    #[serde(rename = "max-bias-step")]
    max_bias_step: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialNoiseConfig {
    #[serde(rename = "rotation-scale")]
    rotation_scale: Option<f64>,
    #[serde(rename = "translation-scale")]
    translation_scale: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialSymmetryConfig {
    group: Option<String>,
    operators: Option<Vec<OperatorSpec>>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct PartialChainConfig {
    length: PartialLength,
    symmetric: Option<bool>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct PartialPotentialConfig {
    kind: String,
    #[serde(default)]
    params: toml::Table,
    weight: Option<f64>,
    decay: Option<Decay>,
    #[serde(rename = "active-window")]
    active_window: Option<[usize; 2]>,
}

impl From<PartialPotentialConfig> for PotentialSpec {
    fn from(p: PartialPotentialConfig) -> Self {
        Self {
            kind: p.kind,
            params: p.params,
            weight: p.weight.unwrap_or(1.0),
            decay: p.decay.unwrap_or_default(),
            active_window: p.active_window,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct PartialDesignConfig {
    contig: Option<String>,
    #[serde(rename = "inpaint-str")]
    inpaint_str: Option<Vec<String>>,
    #[serde(rename = "num-designs")]
    num_designs: Option<usize>,
    seed: Option<u64>,
    length: Option<PartialLength>,
    #[serde(rename = "total-length")]
    total_length: Option<PartialLength>,
    #[serde(rename = "record-trajectory")]
    record_trajectory: Option<bool>,
    #[serde(rename = "partial-steps")]
    partial_steps: Option<usize>,
    #[serde(rename = "max-consecutive-instabilities")]
    max_consecutive_instabilities: Option<usize>,
}

/// The sampler configuration as written in a TOML file; every field may be omitted.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialSamplerConfig {
    schedule: Option<PartialScheduleConfig>,
    guidance: Option<PartialGuidanceConfig>,
    noise: Option<PartialNoiseConfig>,
    symmetry: Option<PartialSymmetryConfig>,
    #[serde(default)]
    chains: Vec<PartialChainConfig>,
    #[serde(default)]
    potentials: Vec<PartialPotentialConfig>,
    design: Option<PartialDesignConfig>,
}

/// Everything the `sample` command needs after file and command-line values are merged.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sampler: core_config::SamplerConfig,
    pub num_designs: usize,
    pub base_seed: u64,
    pub contig: Option<String>,
    /// Motif residues whose structure is diffused instead of copied from the reference.
    pub inpaint_str: Vec<String>,
    pub length: Option<LengthRange>,
}

impl PartialSamplerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Resolves the final configuration. Command-line values win over the file, and the file
    /// wins over built-in defaults.
    ///
    /// The chain layout comes from, in order of preference: the partial-diffusion `input`
    /// structure, the `[[chains]]` table, or the length windows of the contig.
    pub fn merge_with_cli(mut self, args: &SampleArgs, input: Option<&Structure>) -> Result<AppConfig> {
        self.apply_set_values(&args.set_values)?;

        let schedule_file = self.schedule.take().unwrap_or_default();
        let guidance_file = self.guidance.take().unwrap_or_default();
        let noise_file = self.noise.take().unwrap_or_default();
        let design = self.design.take().unwrap_or_default();

        let defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            num_steps: args
                .num_steps
                .or(schedule_file.num_steps)
                .unwrap_or(defaults.num_steps),
            rotation_max: schedule_file.rotation_max.unwrap_or(defaults.rotation_max),
            translation_max: schedule_file
                .translation_max
                .unwrap_or(defaults.translation_max),
            profile: schedule_file.profile.unwrap_or(defaults.profile),
        };

        let guidance_defaults = GuidanceConfig::default();
        let guidance = GuidanceConfig {
            strength: args
                .guidance_strength
                .or(guidance_file.strength)
                .unwrap_or(guidance_defaults.strength),
            max_bias_step: guidance_file
                .max_bias_step
                .unwrap_or(guidance_defaults.max_bias_step),
        };

        let noise_defaults = NoiseConfig::default();
        let noise = NoiseConfig {
            noise_scale_rotation: noise_file
                .rotation_scale
                .unwrap_or(noise_defaults.noise_scale_rotation),
            noise_scale_translation: noise_file
                .translation_scale
                .unwrap_or(noise_defaults.noise_scale_translation),
        };

        let symmetry = Self::merge_symmetry(args.symmetry.as_deref(), self.symmetry.take());
        let sym_order = symmetry
            .as_ref()
            .map(SymmetryConfig::resolve)
            .transpose()
            .map_err(|e| CliError::Config(e.to_string()))?
            .map_or(1, |group| group.order());

        let contig = args.contig.clone().or(design.contig);
        let inpaint_str = if args.inpaint_str.is_empty() {
            design.inpaint_str.unwrap_or_default()
        } else {
            args.inpaint_str.clone()
        };
        let chains = self.resolve_chains(input, contig.as_deref(), sym_order)?;

        let length = match (&args.length, &design.length) {
            (Some(cli), _) => Some(parse_length_range(cli)?),
            (None, Some(file)) => {
                let (min, max) = file.to_spec()?.bounds();
                Some(LengthRange::new(min, max))
            }
            (None, None) => None,
        };

        let base_seed = args.seed.or(design.seed).unwrap_or(DEFAULT_SEED);
        let mut builder = core_config::SamplerConfigBuilder::new()
            .schedule(schedule)
            .guidance(guidance)
            .noise(noise)
            .chains(chains)
            .potentials(self.potentials.into_iter().map(Into::into).collect())
            .seed(base_seed)
            .record_trajectory(args.record_trajectory || design.record_trajectory.unwrap_or(false));

        if let Some(symmetry) = symmetry {
            builder = builder.symmetry(symmetry);
        }
        if let Some(total) = &design.total_length {
            let (min, max) = total.to_spec()?.bounds();
            builder = builder.total_length(LengthRange::new(min, max));
        }
        if let Some(n) = design.max_consecutive_instabilities {
            builder = builder.max_consecutive_instabilities(n);
        }
        if let Some(steps) = args.partial_steps.or(design.partial_steps) {
            builder = builder.partial_steps(steps);
        }

        let sampler = builder.build().map_err(|e| CliError::Config(e.to_string()))?;

        Ok(AppConfig {
            sampler,
            num_designs: args
                .num_designs
                .or(design.num_designs)
                .unwrap_or(DEFAULT_NUM_DESIGNS),
            base_seed,
            contig,
            inpaint_str,
            length,
        })
    }

    fn merge_symmetry(
        cli_group: Option<&str>,
        file: Option<PartialSymmetryConfig>,
    ) -> Option<SymmetryConfig> {
        match (cli_group, file) {
            (Some(group), _) => Some(SymmetryConfig::named(group)),
            (None, Some(p)) => Some(SymmetryConfig {
                group: p.group,
                operators: p.operators,
            }),
            (None, None) => None,
        }
    }

    fn resolve_chains(
        &self,
        input: Option<&Structure>,
        contig: Option<&str>,
        sym_order: usize,
    ) -> Result<Vec<ChainSpec>> {
        if let Some(structure) = input {
            return Ok(structure
                .chains()
                .iter()
                .map(|c| ChainSpec {
                    length: LengthSpec::Fixed(c.length),
                    symmetric: c.symmetric,
                })
                .collect());
        }
        if !self.chains.is_empty() {
            return self
                .chains
                .iter()
                .map(|c| {
                    Ok(ChainSpec {
                        length: c.length.to_spec()?,
                        symmetric: c.symmetric.unwrap_or(true),
                    })
                })
                .collect();
        }
        if let Some(contig) = contig {
            let map = ContigMap::parse(contig).map_err(|e| CliError::Config(e.to_string()))?;
            return Ok(map.chain_windows(Some(sym_order)));
        }
        Err(CliError::Config(
            "A chain layout is required: give `[[chains]]` in the config file, a contig, or an input structure."
                .to_string(),
        ))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let (key, value_str) = kv_pair.split_once('=').ok_or_else(|| {
                CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                ))
            })?;

            match key {
                "schedule.num-steps" => {
                    self.schedule.get_or_insert_with(Default::default).num_steps =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "schedule.rotation-max" => {
                    self.schedule.get_or_insert_with(Default::default).rotation_max =
                        Some(parse_value(key, value_str, "float")?);
                }
                "schedule.translation-max" => {
                    self.schedule.get_or_insert_with(Default::default).translation_max =
                        Some(parse_value(key, value_str, "float")?);
                }
                "schedule.profile" => {
                    self.schedule.get_or_insert_with(Default::default).profile =
                        Some(parse_value(key, value_str, "profile")?);
                }
                "guidance.strength" => {
                    self.guidance.get_or_insert_with(Default::default).strength =
                        Some(parse_value(key, value_str, "float")?);
                }
                "guidance.max-bias-step" => {
                    self.guidance.get_or_insert_with(Default::default).max_bias_step =
                        Some(parse_value(key, value_str, "float")?);
                }
                "noise.rotation-scale" => {
                    self.noise.get_or_insert_with(Default::default).rotation_scale =
                        Some(parse_value(key, value_str, "float")?);
                }
                "noise.translation-scale" => {
                    self.noise.get_or_insert_with(Default::default).translation_scale =
                        Some(parse_value(key, value_str, "float")?);
                }
                "symmetry.group" => {
                    let symmetry = self.symmetry.get_or_insert_with(Default::default);
                    symmetry.group = Some(value_str.to_string());
                    symmetry.operators = None;
                }
                "design.contig" => {
                    self.design.get_or_insert_with(Default::default).contig =
                        Some(value_str.to_string());
                }
                "design.inpaint-str" => {
                    self.design.get_or_insert_with(Default::default).inpaint_str = Some(
                        value_str
                            .split([',', ' '])
                            .filter(|entry| !entry.is_empty())
                            .map(str::to_string)
                            .collect(),
                    );
                }
                "design.num-designs" => {
                    self.design.get_or_insert_with(Default::default).num_designs =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "design.seed" => {
                    self.design.get_or_insert_with(Default::default).seed =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "design.length" => {
                    self.design.get_or_insert_with(Default::default).length =
                        Some(PartialLength::Text(value_str.to_string()));
                }
                "design.partial-steps" => {
                    self.design.get_or_insert_with(Default::default).partial_steps =
                        Some(parse_value(key, value_str, "integer")?);
                }
                "design.max-consecutive-instabilities" => {
                    self.design
                        .get_or_insert_with(Default::default)
                        .max_consecutive_instabilities = Some(parse_value(key, value_str, "integer")?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}
