//! Weight calibration for safetensors checkpoints
//!
//! Selects the targeted linear layers of a checkpoint, runs each weight
//! through its observer once and collects the resulting scales and
//! zero-points under their persisted names. Activation slots need sample
//! inputs from a running model and are not calibrated here.

use crate::config::{validate_recipe, CalibrationRecipe};
use crate::io::{get_weight_mappings, match_param_name, save_tensors, StoredTensor};
use crate::quant::{LayerQuantization, QuantizationScheme, SlotKind, WeightInfo};
use crate::{Error, Result};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Layer selector built from scheme targets
///
/// A target is either an exact layer name or `re:<regex>`, which must match
/// the whole layer name.
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl TargetMatcher {
    pub fn new(targets: &[String]) -> Result<Self> {
        let mut exact = Vec::new();
        let mut patterns = Vec::new();
        for target in targets {
            match target.strip_prefix("re:") {
                Some(pattern) => {
                    let anchored = format!("^(?:{pattern})$");
                    patterns.push(Regex::new(&anchored).map_err(|e| {
                        Error::Config(format!("invalid target pattern {pattern}: {e}"))
                    })?);
                }
                None => exact.push(target.clone()),
            }
        }
        Ok(Self { exact, patterns })
    }

    pub fn matches(&self, layer: &str) -> bool {
        self.exact.iter().any(|t| t == layer) || self.patterns.iter().any(|p| p.is_match(layer))
    }
}

/// Outcome for one calibrated layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerReport {
    pub name: String,
    pub weight_shape: Vec<usize>,
    pub scale_shape: Vec<usize>,
    /// Largest absolute difference between the weight and its fake-quantized copy
    pub max_abs_error: f32,
}

/// Result of [`calibrate_checkpoint`]
#[derive(Debug, Clone, Default)]
pub struct CalibrationReport {
    pub layers: Vec<LayerReport>,
    /// Targeted layers left out, with the reason
    pub skipped: Vec<(String, String)>,
    /// Calibrated parameters keyed by persisted name
    pub parameters: BTreeMap<String, StoredTensor>,
}

impl CalibrationReport {
    /// Write the calibrated parameters to a safetensors file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let metadata = HashMap::from([("format".to_string(), "pt".to_string())]);
        save_tensors(&self.parameters, path, Some(metadata))
    }
}

/// Calibrate weight quantization parameters for every targeted layer
///
/// `model_path` is a checkpoint directory or a single safetensors file.
/// Layers are the prefixes of 2-D `*.weight` tensors; each shard is read
/// once.
///
/// # Errors
///
/// Fails when the recipe is invalid or has no weight arguments, the
/// checkpoint cannot be indexed or read, an observer rejects a weight, or
/// no layer matches the targets.
pub fn calibrate_checkpoint(
    model_path: impl AsRef<Path>,
    recipe: &CalibrationRecipe,
) -> Result<CalibrationReport> {
    validate_recipe(recipe)?;
    let scheme = &recipe.scheme;
    let weights = scheme.weights.clone().ok_or_else(|| {
        Error::Config("recipe has no weight quantization arguments".to_string())
    })?;
    if scheme.input_activations.is_some() || scheme.output_activations.is_some() {
        tracing::warn!("activation quantization needs runtime samples, calibrating weights only");
    }
    let weight_scheme = QuantizationScheme {
        targets: scheme.targets.clone(),
        weights: Some(weights),
        input_activations: None,
        output_activations: None,
    };

    let matcher = TargetMatcher::new(&scheme.targets)?;
    let mut by_file: BTreeMap<PathBuf, Vec<(String, String)>> = BTreeMap::new();
    for (name, file) in get_weight_mappings(model_path.as_ref())? {
        if let Some(layer) = match_param_name(&name, "weight") {
            if matcher.matches(layer) {
                let layer = layer.to_string();
                by_file.entry(file).or_default().push((layer, name));
            }
        }
    }

    if by_file.is_empty() {
        return Err(Error::Calibration(format!(
            "no layer weights in {} match targets {:?}",
            model_path.as_ref().display(),
            scheme.targets
        )));
    }

    let mut report = CalibrationReport::default();
    for (file, layers) in by_file {
        let bytes = std::fs::read(&file)?;
        let tensors = safetensors::SafeTensors::deserialize(&bytes)
            .map_err(|e| Error::SafeTensors(format!("{}: {e}", file.display())))?;

        for (layer, tensor_name) in layers {
            let view = tensors.tensor(&tensor_name).map_err(|e| {
                Error::SafeTensors(format!("{}: {tensor_name}: {e}", file.display()))
            })?;
            let stored = StoredTensor::from_view(&view);

            if stored.shape().len() != 2 {
                tracing::warn!(layer = %layer, shape = ?stored.shape(), "skipping non-2D weight");
                report
                    .skipped
                    .push((layer, format!("weight has shape {:?}", stored.shape())));
                continue;
            }
            let weight = match stored.to_f32() {
                Ok(weight) => weight,
                Err(e) => {
                    tracing::warn!(layer = %layer, dtype = ?stored.dtype(), "skipping weight: {e}");
                    report.skipped.push((layer, e.to_string()));
                    continue;
                }
            };

            let info = WeightInfo::new(stored.shape().to_vec(), stored.dtype());
            let mut quantization = LayerQuantization::initialize(
                layer.as_str(),
                weight_scheme.clone(),
                Some(&info),
                recipe.force_zero_point,
            )?;
            let params = quantization.observe(SlotKind::Weight, &weight.view())?;
            let fake = quantization.fake_quantize_weight(&weight.view())?;
            quantization.freeze();

            let max_abs_error = weight
                .iter()
                .zip(fake.iter())
                .fold(0.0f32, |acc, (a, b)| acc.max((a - b).abs()));

            tracing::info!(
                layer = %layer,
                shape = ?stored.shape(),
                scale_shape = ?params.shape(),
                max_abs_error,
                "calibrated layer"
            );

            report.parameters.extend(quantization.state_dict()?);
            report.layers.push(LayerReport {
                name: layer,
                weight_shape: stored.shape().to_vec(),
                scale_shape: params.shape().to_vec(),
                max_abs_error,
            });
        }
    }

    Ok(report)
}
