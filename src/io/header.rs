//! Safetensors header parsing without loading tensor data

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Upper bound on the JSON header length accepted from disk
pub const MAX_HEADER_SIZE: u64 = 100_000_000;

/// Key under which free-form string metadata is stored in the header
pub const METADATA_KEY: &str = "__metadata__";

/// One tensor entry of a safetensors header
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TensorEntry {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data_offsets: (usize, usize),
}

/// Read the JSON header of a safetensors file
///
/// The file starts with an unsigned 64-bit little-endian length followed by
/// that many bytes of UTF-8 JSON. Only the header is read.
///
/// # Example
///
/// ```no_run
/// use qobserve::io::read_safetensors_header;
///
/// let header = read_safetensors_header("model.safetensors").unwrap();
/// for name in header.keys() {
///     println!("{name}");
/// }
/// ```
pub fn read_safetensors_header(
    path: impl AsRef<Path>,
) -> Result<BTreeMap<String, serde_json::Value>> {
    let path = path.as_ref();
    let mut file = File::open(path)?;

    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes).map_err(|e| {
        Error::SafeTensors(format!("{}: missing header length: {e}", path.display()))
    })?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_HEADER_SIZE {
        return Err(Error::SafeTensors(format!(
            "{}: header length {len} exceeds {MAX_HEADER_SIZE}",
            path.display()
        )));
    }

    let mut header = vec![0u8; len as usize];
    file.read_exact(&mut header).map_err(|e| {
        Error::SafeTensors(format!("{}: truncated header: {e}", path.display()))
    })?;

    serde_json::from_slice(&header).map_err(|e| {
        Error::SafeTensors(format!("{}: invalid header JSON: {e}", path.display()))
    })
}

/// Tensor entries of a safetensors header, skipping `__metadata__`
pub fn read_tensor_entries(path: impl AsRef<Path>) -> Result<BTreeMap<String, TensorEntry>> {
    read_safetensors_header(path)?
        .into_iter()
        .filter(|(name, _)| name != METADATA_KEY)
        .map(|(name, value)| {
            let entry = serde_json::from_value(value).map_err(|e| {
                Error::SafeTensors(format!("malformed header entry {name}: {e}"))
            })?;
            Ok((name, entry))
        })
        .collect()
}
