use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "rigidiff CLI - Guided, symmetry-aware reverse-diffusion sampling of protein backbones.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sample backbone designs by reverse diffusion.
    Sample(SampleArgs),
}

/// Arguments for the `sample` subcommand.
#[derive(Args, Debug)]
pub struct SampleArgs {
    // --- Core Arguments ---
    /// Path for the output PDB file. With several designs, `_N` is appended to the file stem.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Path to the sampler configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Backbone PDB to start partial diffusion from instead of pure noise.
    #[arg(short, long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Backbone PDB that contig motif segments copy their frames from, matched by chain and
    /// residue number.
    #[arg(long, value_name = "PATH")]
    pub reference: Option<PathBuf>,

    // --- Design Overrides ---
    /// Override the contig string (e.g. "10-40/A163-181/10-40 B1-100/0").
    #[arg(long, value_name = "CONTIG")]
    pub contig: Option<String>,

    /// Motif residues whose structure is diffused rather than fixed (e.g. "A12-14 B3").
    #[arg(long = "inpaint-str", value_name = "RESIDUES", num_args(1..))]
    pub inpaint_str: Vec<String>,

    /// Override the designed length window of a contig (e.g. "100" or "80-120").
    #[arg(long, value_name = "LEN")]
    pub length: Option<String>,

    /// Override the number of designs to generate.
    #[arg(short, long, value_name = "INT")]
    pub num_designs: Option<usize>,

    /// Override the base random seed; design `i` uses `seed + i`.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    // --- Sampler Overrides ---
    /// Override the number of reverse diffusion steps.
    #[arg(short = 'T', long, value_name = "INT")]
    pub num_steps: Option<usize>,

    /// Override the symmetry group (e.g. C4, D3, T, O, I).
    #[arg(long, value_name = "GROUP")]
    pub symmetry: Option<String>,

    /// Override the number of steps used for partial diffusion of `--input`.
    #[arg(long, value_name = "INT")]
    pub partial_steps: Option<usize>,

    /// Override the guidance strength applied to potential gradients.
    #[arg(long, value_name = "FLOAT")]
    pub guidance_strength: Option<f64>,

    /// Also write every recorded step as a multi-model PDB next to each design.
    #[arg(long)]
    pub record_trajectory: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S schedule.num-steps=100
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}
