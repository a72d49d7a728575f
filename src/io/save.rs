//! Writing and reading safetensors files

use super::mappings::SAFE_WEIGHTS_INDEX_NAME;
use super::tensor::StoredTensor;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Write named tensors to a safetensors file
///
/// # Example
///
/// ```no_run
/// use ndarray::arr1;
/// use qobserve::io::{save_tensors, StoredTensor};
/// use safetensors::Dtype;
/// use std::collections::BTreeMap;
///
/// let scale = StoredTensor::from_f32(&arr1(&[0.5f32]).into_dyn(), Dtype::F16).unwrap();
/// let tensors = BTreeMap::from([("fc.weight_scale".to_string(), scale)]);
/// save_tensors(&tensors, "scales.safetensors", None).unwrap();
/// ```
pub fn save_tensors(
    tensors: &BTreeMap<String, StoredTensor>,
    path: impl AsRef<Path>,
    metadata: Option<HashMap<String, String>>,
) -> Result<()> {
    let bytes = safetensors::serialize(tensors.iter(), metadata)
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read every tensor of a safetensors file
pub fn load_tensors(path: impl AsRef<Path>) -> Result<BTreeMap<String, StoredTensor>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let tensors = safetensors::SafeTensors::deserialize(&bytes)
        .map_err(|e| Error::SafeTensors(format!("{}: {e}", path.display())))?;

    Ok(tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| (name, StoredTensor::from_view(&view)))
        .collect())
}

#[derive(Serialize)]
struct IndexMetadata {
    total_size: usize,
}

#[derive(Serialize)]
struct WeightIndexFile<'a> {
    metadata: IndexMetadata,
    weight_map: BTreeMap<&'a str, String>,
}

/// Split tensors into shards of at most `max_shard_bytes` and write an index
///
/// Shards are named `model-00001-of-0000N.safetensors`. A tensor larger than
/// the limit gets a shard of its own. Returns the written shard paths.
pub fn save_sharded(
    tensors: &BTreeMap<String, StoredTensor>,
    dir: impl AsRef<Path>,
    max_shard_bytes: usize,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let mut shards: Vec<BTreeMap<String, StoredTensor>> = Vec::new();
    let mut current = BTreeMap::new();
    let mut current_bytes = 0usize;
    for (name, tensor) in tensors {
        let size = tensor.data().len();
        if !current.is_empty() && current_bytes + size > max_shard_bytes {
            shards.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current.insert(name.clone(), tensor.clone());
        current_bytes += size;
    }
    if !current.is_empty() {
        shards.push(current);
    }

    let count = shards.len();
    let mut weight_map = BTreeMap::new();
    let mut paths = Vec::with_capacity(count);
    for (i, shard) in shards.iter().enumerate() {
        let file_name = format!("model-{:05}-of-{:05}.safetensors", i + 1, count);
        let path = dir.join(&file_name);
        save_tensors(shard, &path, None)?;
        for name in shard.keys() {
            weight_map.insert(name.as_str(), file_name.clone());
        }
        paths.push(path);
    }

    let index = WeightIndexFile {
        metadata: IndexMetadata {
            total_size: tensors.values().map(|t| t.data().len()).sum(),
        },
        weight_map,
    };
    let json = serde_json::to_string_pretty(&index)
        .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?;
    std::fs::write(dir.join(SAFE_WEIGHTS_INDEX_NAME), json)?;

    tracing::debug!(shards = count, dir = %dir.display(), "wrote sharded checkpoint");
    Ok(paths)
}
