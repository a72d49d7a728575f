//! qobserve CLI
//!
//! Calibrate and inspect quantization parameters of safetensors checkpoints.
//!
//! # Usage
//!
//! ```bash
//! # Calibrate weight scales / zero-points
//! qobserve calibrate ./model --recipe recipe.yaml --output scales.safetensors
//!
//! # List quantization parameters, grouped per layer
//! qobserve inspect ./model --quantization-only --nest weight_scale --nest weight_zero_point
//!
//! # Dump a safetensors header
//! qobserve header ./model/model.safetensors
//!
//! # Validate a recipe
//! qobserve validate recipe.yaml
//! ```

use clap::Parser;
use qobserve::config::{
    load_recipe, CalibrateArgs, Cli, Command, HeaderArgs, InspectArgs, OutputFormat, ValidateArgs,
};
use qobserve::io::{
    get_nested_weight_mappings_with_others, get_safetensors_folder, get_weight_mappings,
    is_quantization_param, read_safetensors_header, read_tensor_entries, NestedWeightMappings,
    WeightMappings,
};
use qobserve::{calibrate_checkpoint, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let result = match cli.command {
        Command::Calibrate(args) => run_calibrate(args),
        Command::Inspect(args) => run_inspect(args),
        Command::Header(args) => run_header(args),
        Command::Validate(args) => run_validate(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over the verbosity flags
fn init_tracing(cli: &Cli) {
    let default_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_calibrate(args: CalibrateArgs) -> Result<()> {
    let recipe = load_recipe(&args.recipe)?;
    let folder = get_safetensors_folder(&args.model, args.cache_dir.as_deref())?;
    tracing::info!(model = %folder.display(), "calibrating checkpoint");

    let report = calibrate_checkpoint(&folder, &recipe)?;
    report.save(&args.output)?;

    for (layer, reason) in &report.skipped {
        tracing::warn!(layer = %layer, "skipped: {reason}");
    }
    tracing::info!(
        layers = report.layers.len(),
        tensors = report.parameters.len(),
        output = %args.output.display(),
        "calibration complete"
    );
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let nest: Vec<&str> = args.nest.iter().map(String::as_str).collect();
    let (nested, flat) = if nest.is_empty() {
        (BTreeMap::new(), get_weight_mappings(&args.path)?)
    } else {
        get_nested_weight_mappings_with_others(&args.path, &nest)?
    };
    let flat: WeightMappings = flat
        .into_iter()
        .filter(|(name, _)| !args.quantization_only || is_quantization_param(name))
        .collect();

    match args.format {
        OutputFormat::Json => {
            let output = InspectOutput {
                nested: &nested,
                tensors: &flat,
            };
            let text = serde_json::to_string_pretty(&output)
                .map_err(|e| qobserve::Error::Serialization(format!("JSON serialization failed: {e}")))?;
            println!("{text}");
        }
        OutputFormat::Text => {
            let base = inspect_root(&args.path);
            for (layer, params) in &nested {
                println!("{layer}");
                for (param, file) in params {
                    println!("  {param}  {}", display_relative(file, &base));
                }
            }
            let mut shapes = BTreeMap::new();
            for (name, file) in &flat {
                if !shapes.contains_key(file) {
                    shapes.insert(file.clone(), read_tensor_entries(file)?);
                }
                let entry = shapes.get(file).and_then(|entries| entries.get(name));
                match entry {
                    Some(entry) => println!(
                        "{name}  {} {:?}  {}",
                        entry.dtype,
                        entry.shape,
                        display_relative(file, &base)
                    ),
                    None => println!("{name}  {}", display_relative(file, &base)),
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InspectOutput<'a> {
    nested: &'a NestedWeightMappings,
    tensors: &'a WeightMappings,
}

fn inspect_root(path: &Path) -> PathBuf {
    if path.is_file() {
        path.parent().map(Path::to_path_buf).unwrap_or_default()
    } else {
        path.to_path_buf()
    }
}

fn display_relative(file: &Path, base: &Path) -> String {
    file.strip_prefix(base).unwrap_or(file).display().to_string()
}

fn run_header(args: HeaderArgs) -> Result<()> {
    let header = read_safetensors_header(&args.file)?;
    let text = serde_json::to_string_pretty(&header)
        .map_err(|e| qobserve::Error::Serialization(format!("JSON serialization failed: {e}")))?;
    println!("{text}");
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let recipe = load_recipe(&args.recipe)?;
    println!("Recipe is valid: {}", args.recipe.display());
    println!("  Targets: {}", recipe.scheme.targets.join(", "));
    if let Some(weights) = &recipe.scheme.weights {
        println!(
            "  Weights: {} bits, {}, {}, observer {}",
            weights.num_bits,
            if weights.symmetric { "symmetric" } else { "asymmetric" },
            weights.strategy,
            weights.observer
        );
    }
    if recipe.scheme.input_activations.is_some() || recipe.scheme.output_activations.is_some() {
        println!("  Activations: configured (not calibrated offline)");
    }
    println!("  Force zero-point: {}", recipe.force_zero_point);
    Ok(())
}
