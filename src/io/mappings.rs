//! Locating checkpoint tensors across safetensors shards
//!
//! A checkpoint is either a single `.safetensors` file or a directory holding
//! `model.safetensors` or a sharded `model.safetensors.index.json`. These
//! helpers map parameter names to the file that stores them without reading
//! any tensor data, and pull quantization parameters out of a checkpoint.

use super::header::{read_safetensors_header, METADATA_KEY};
use super::tensor::StoredTensor;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Weights file of an unsharded checkpoint
pub const SAFE_WEIGHTS_NAME: &str = "model.safetensors";

/// Index file of a sharded checkpoint
pub const SAFE_WEIGHTS_INDEX_NAME: &str = "model.safetensors.index.json";

/// Parameter name → file holding it
pub type WeightMappings = BTreeMap<String, PathBuf>;

/// Layer name → (nested parameter name → file holding it)
pub type NestedWeightMappings = BTreeMap<String, WeightMappings>;

/// Name suffixes that mark quantization parameters
const QUANTIZATION_SUFFIXES: [&str; 3] = ["_scale", "_zero_point", "_g_idx"];

#[derive(Debug, Deserialize)]
struct WeightIndex {
    weight_map: BTreeMap<String, String>,
}

/// Resolve a local path or cached hub stub to the folder holding weights
///
/// Existing local paths are returned in absolute form. Anything else is read
/// as an `org/name` stub and looked up in a Hugging Face style cache
/// (`models--org--name/snapshots/<revision>/`) under `cache_dir`, or the
/// default hub cache when `cache_dir` is `None`. Nothing is downloaded.
pub fn get_safetensors_folder(
    path_or_stub: &str,
    cache_dir: Option<&Path>,
) -> Result<PathBuf> {
    let local = Path::new(path_or_stub);
    if local.exists() {
        return Ok(local.canonicalize()?);
    }

    let cache = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_hub_cache().ok_or_else(|| {
            Error::Config(format!(
                "could not locate {path_or_stub}: no local path and no hub cache directory"
            ))
        })?,
    };

    let repo = cache.join(format!("models--{}", path_or_stub.replace('/', "--")));
    for snapshot in snapshot_candidates(&repo)? {
        if snapshot.join(SAFE_WEIGHTS_NAME).is_file()
            || snapshot.join(SAFE_WEIGHTS_INDEX_NAME).is_file()
        {
            tracing::debug!(snapshot = %snapshot.display(), "found cached weights");
            return Ok(snapshot);
        }
    }

    Err(Error::Config(format!(
        "could not locate safetensors weight or index file from {path_or_stub}"
    )))
}

fn default_hub_cache() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("HF_HUB_CACHE") {
        return Some(PathBuf::from(dir));
    }
    if let Some(home) = std::env::var_os("HF_HOME") {
        return Some(PathBuf::from(home).join("hub"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache/huggingface/hub"))
}

/// Snapshot folders of a cached repo, the `main` ref first
fn snapshot_candidates(repo: &Path) -> Result<Vec<PathBuf>> {
    let snapshots = repo.join("snapshots");
    if !snapshots.is_dir() {
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    if let Ok(revision) = std::fs::read_to_string(repo.join("refs").join("main")) {
        candidates.push(snapshots.join(revision.trim()));
    }

    let mut others: Vec<PathBuf> = std::fs::read_dir(&snapshots)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && !candidates.contains(p))
        .collect();
    others.sort();
    candidates.extend(others);
    Ok(candidates)
}

/// Map every tensor of a checkpoint to the file that stores it
///
/// `path` may be a single safetensors file or a checkpoint directory.
pub fn get_weight_mappings(path: impl AsRef<Path>) -> Result<WeightMappings> {
    let path = path.as_ref();

    if path.is_file() {
        return header_mappings(path);
    }

    let single = path.join(SAFE_WEIGHTS_NAME);
    let index = path.join(SAFE_WEIGHTS_INDEX_NAME);
    if single.is_file() {
        header_mappings(&single)
    } else if index.is_file() {
        let content = std::fs::read_to_string(&index)?;
        let index: WeightIndex = serde_json::from_str(&content).map_err(|e| {
            Error::Serialization(format!("{}: invalid weight index: {e}", index.display()))
        })?;
        Ok(index
            .weight_map
            .into_iter()
            .map(|(name, file)| (name, path.join(file)))
            .collect())
    } else {
        Err(Error::Config(format!(
            "could not find a safetensors weight or index file at {}",
            path.display()
        )))
    }
}

fn header_mappings(file: &Path) -> Result<WeightMappings> {
    Ok(read_safetensors_header(file)?
        .into_keys()
        .filter(|name| name != METADATA_KEY)
        .map(|name| (name, file.to_path_buf()))
        .collect())
}

/// Group parameters under the layer they belong to
///
/// Each name of the form `{layer}.{param}` with `param` in `params_to_nest`
/// lands under `layer`. Other names are dropped.
pub fn get_nested_weight_mappings(
    path: impl AsRef<Path>,
    params_to_nest: &[&str],
) -> Result<NestedWeightMappings> {
    get_nested_weight_mappings_with_others(path, params_to_nest).map(|(nested, _)| nested)
}

/// Like [`get_nested_weight_mappings`], also returning the unmatched names
pub fn get_nested_weight_mappings_with_others(
    path: impl AsRef<Path>,
    params_to_nest: &[&str],
) -> Result<(NestedWeightMappings, WeightMappings)> {
    let mut nested = NestedWeightMappings::new();
    let mut others = WeightMappings::new();

    for (name, file) in get_weight_mappings(path)? {
        let mut matched = false;
        for &param in params_to_nest {
            if let Some(layer) = match_param_name(&name, param) {
                nested
                    .entry(layer.to_string())
                    .or_default()
                    .insert(param.to_string(), file.clone());
                matched = true;
            }
        }
        if !matched {
            others.insert(name, file);
        }
    }

    Ok((nested, others))
}

/// Layer name of `full_name` when it ends in `.{param_name}`
pub fn match_param_name<'a>(full_name: &'a str, param_name: &str) -> Option<&'a str> {
    full_name.strip_suffix(param_name)?.strip_suffix('.')
}

/// Join a layer name and a parameter name; inverse of [`match_param_name`]
pub fn merge_names(parent_name: &str, child_name: &str) -> String {
    format!("{parent_name}.{child_name}")
}

/// Whether `name` refers to a scale, zero-point or group-index tensor
pub fn is_quantization_param(name: &str) -> bool {
    QUANTIZATION_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// Load every quantization parameter of a checkpoint
///
/// Each shard is read at most once.
pub fn get_quantization_state_dict(
    path: impl AsRef<Path>,
) -> Result<BTreeMap<String, StoredTensor>> {
    let mut by_file: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    for (name, file) in get_weight_mappings(path)? {
        if is_quantization_param(&name) {
            by_file.entry(file).or_default().push(name);
        }
    }

    let mut state = BTreeMap::new();
    for (file, names) in by_file {
        let bytes = std::fs::read(&file)?;
        let tensors = safetensors::SafeTensors::deserialize(&bytes).map_err(|e| {
            Error::SafeTensors(format!("{}: {e}", file.display()))
        })?;
        for name in names {
            let view = tensors.tensor(&name).map_err(|e| {
                Error::SafeTensors(format!("{}: {name}: {e}", file.display()))
            })?;
            state.insert(name, StoredTensor::from_view(&view));
        }
    }

    Ok(state)
}
