//! CLI argument parsing
//!
//! # Usage
//!
//! ```bash
//! qobserve calibrate ./llama --recipe recipe.yaml --output scales.safetensors
//! qobserve inspect ./llama --quantization-only
//! qobserve inspect ./llama --nest weight_scale --nest weight_zero_point --format json
//! qobserve header model.safetensors
//! qobserve validate recipe.yaml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// qobserve: calibrate quantization scales and zero-points for checkpoints
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "qobserve")]
#[command(version)]
#[command(about = "Quantization observers and calibration for safetensors checkpoints")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Calibrate weight quantization parameters for a checkpoint
    Calibrate(CalibrateArgs),

    /// List the tensors of a checkpoint
    Inspect(InspectArgs),

    /// Print the raw JSON header of a safetensors file
    Header(HeaderArgs),

    /// Validate a recipe file without calibrating
    Validate(ValidateArgs),
}

/// Arguments for the calibrate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct CalibrateArgs {
    /// Checkpoint directory, safetensors file or cached hub stub
    #[arg(value_name = "MODEL")]
    pub model: String,

    /// Path to the recipe (YAML or JSON)
    #[arg(short, long)]
    pub recipe: PathBuf,

    /// Output safetensors file for the calibrated parameters
    #[arg(short, long)]
    pub output: PathBuf,

    /// Hub cache directory to search for stubs
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

/// Arguments for the inspect command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InspectArgs {
    /// Checkpoint directory or safetensors file
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Only list quantization parameters
    #[arg(long)]
    pub quantization_only: bool,

    /// Group these parameter names under their layer
    #[arg(long, value_name = "NAME")]
    pub nest: Vec<String>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the header command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct HeaderArgs {
    /// Path to a safetensors file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to the recipe (YAML or JSON)
    #[arg(value_name = "RECIPE")]
    pub recipe: PathBuf,
}

/// Output format for the inspect command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "Unknown output format: {s}. Valid formats: text, json"
            )),
        }
    }
}

/// Parse CLI arguments from a string slice (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}
