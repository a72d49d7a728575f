//! Checkpoint I/O - safetensors headers, shard indexes and tensor payloads
//!
//! Lets the calibration layer read weights from, and write quantization
//! parameters to, safetensors checkpoints split across one or more files.

mod header;
mod mappings;
mod save;
mod tensor;

#[cfg(test)]
mod tests;

pub use header::{read_safetensors_header, read_tensor_entries, TensorEntry, MAX_HEADER_SIZE};
pub use mappings::{
    get_nested_weight_mappings, get_nested_weight_mappings_with_others,
    get_quantization_state_dict, get_safetensors_folder, get_weight_mappings,
    is_quantization_param, match_param_name, merge_names, NestedWeightMappings, WeightMappings,
    SAFE_WEIGHTS_INDEX_NAME, SAFE_WEIGHTS_NAME,
};
pub use save::{load_tensors, save_sharded, save_tensors};
pub use tensor::{element_size, StoredTensor};
