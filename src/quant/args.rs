//! Quantization arguments
//!
//! User-facing description of how a single tensor slot (a weight, an input
//! activation or an output activation) is quantized: bit depth, target
//! numeric type, symmetry, granularity and which observer computes the
//! scale / zero-point.

use crate::quant::observer::{Observer, ObserverRegistry};
use crate::{Error, Result};
use safetensors::Dtype;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Numeric representation quantized values are stored in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationType {
    /// Integer target
    #[default]
    Int,
    /// Floating-point target (e.g. fp8)
    Float,
}

/// Granularity at which independent scale/zero-point values are computed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationStrategy {
    /// One scale/zero-point for the whole tensor
    #[default]
    Tensor,
    /// One scale/zero-point per output channel (axis 0)
    Channel,
    /// One scale/zero-point per `group_size` contiguous columns of each row
    Group,
    /// One scale/zero-point per 2-D tile described by `block_structure`
    Block,
    /// One scale/zero-point per token (every index except the last axis)
    Token,
}

impl fmt::Display for QuantizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuantizationStrategy::Tensor => "tensor",
            QuantizationStrategy::Channel => "channel",
            QuantizationStrategy::Group => "group",
            QuantizationStrategy::Block => "block",
            QuantizationStrategy::Token => "token",
        };
        f.write_str(name)
    }
}

fn default_num_bits() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

fn default_observer() -> String {
    "minmax".to_string()
}

/// Arguments defining the quantization of one tensor slot
///
/// Deserializes from YAML/JSON with every field optional:
///
/// ```yaml
/// num_bits: 4
/// symmetric: false
/// strategy: group
/// group_size: 128
/// observer: minmax
/// observer_kwargs:
///   averaging_constant: 0.05
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizationArgs {
    /// Quantization bit depth
    #[serde(default = "default_num_bits")]
    pub num_bits: u32,

    /// Target numeric representation
    #[serde(default, rename = "type")]
    pub quant_type: QuantizationType,

    /// Whether the zero-point is pinned to the middle of the range
    #[serde(default = "default_true")]
    pub symmetric: bool,

    /// Scope of each scale/zero-point
    #[serde(default)]
    pub strategy: QuantizationStrategy,

    /// Group length along the column axis (GROUP only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_size: Option<usize>,

    /// Tile shape such as `"2x4"` (BLOCK only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_structure: Option<String>,

    /// Registry identifier of the observer computing scale/zero-point
    #[serde(default = "default_observer")]
    pub observer: String,

    /// Extra arguments forwarded to the observer constructor
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub observer_kwargs: HashMap<String, serde_json::Value>,
}

impl Default for QuantizationArgs {
    fn default() -> Self {
        Self {
            num_bits: default_num_bits(),
            quant_type: QuantizationType::Int,
            symmetric: true,
            strategy: QuantizationStrategy::Tensor,
            group_size: None,
            block_structure: None,
            observer: default_observer(),
            observer_kwargs: HashMap::new(),
        }
    }
}

impl QuantizationArgs {
    /// Integer arguments with the given bit depth and symmetry
    pub fn new(num_bits: u32, symmetric: bool) -> Self {
        Self {
            num_bits,
            symmetric,
            ..Self::default()
        }
    }

    /// Set the strategy
    pub fn with_strategy(mut self, strategy: QuantizationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Switch to GROUP strategy with the given group size
    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.strategy = QuantizationStrategy::Group;
        self.group_size = Some(group_size);
        self
    }

    /// Switch to BLOCK strategy with the given `"RxC"` structure
    pub fn with_block_structure(mut self, structure: impl Into<String>) -> Self {
        self.strategy = QuantizationStrategy::Block;
        self.block_structure = Some(structure.into());
        self
    }

    /// Set the target numeric type
    pub fn with_type(mut self, quant_type: QuantizationType) -> Self {
        self.quant_type = quant_type;
        self
    }

    /// Select the observer by registry identifier
    pub fn with_observer(mut self, observer: impl Into<String>) -> Self {
        self.observer = observer.into();
        self
    }

    /// Add one observer constructor argument
    pub fn with_observer_kwarg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.observer_kwargs.insert(key.into(), value);
        self
    }

    /// Check the arguments are internally consistent
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the bit depth is out of range, or a
    /// GROUP/BLOCK strategy lacks a usable group size / block structure.
    pub fn validate(&self) -> Result<()> {
        if self.num_bits == 0 || self.num_bits > 32 {
            return Err(Error::Config(format!(
                "num_bits must be in 1..=32, got {}",
                self.num_bits
            )));
        }

        match self.strategy {
            QuantizationStrategy::Group => {
                self.group_size_checked()?;
            }
            QuantizationStrategy::Block => {
                self.block_shape()?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Group size, failing unless it is set and positive
    pub fn group_size_checked(&self) -> Result<usize> {
        match self.group_size {
            Some(size) if size > 0 => Ok(size),
            Some(size) => Err(Error::Config(format!(
                "group strategy requires a positive group_size, got {size}"
            ))),
            None => Err(Error::Config(
                "group strategy requires group_size to be set".to_string(),
            )),
        }
    }

    /// Parse `block_structure` (`"2x4"`) into `(rows, cols)`
    pub fn block_shape(&self) -> Result<(usize, usize)> {
        let structure = self.block_structure.as_deref().ok_or_else(|| {
            Error::Config("block strategy requires block_structure to be set".to_string())
        })?;
        parse_block_structure(structure)
    }

    /// Representable integer range `(bit_min, bit_max)`
    ///
    /// `[-2^(n-1), 2^(n-1) - 1]`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] unless `num_bits` is in 1..=32.
    pub fn quant_range(&self) -> Result<(i64, i64)> {
        if self.num_bits == 0 || self.num_bits > 32 {
            return Err(Error::InvalidParameter(format!(
                "num_bits must be in 1..=32, got {}",
                self.num_bits
            )));
        }
        let bit_range = (1i64 << self.num_bits) - 1;
        let bit_min = -(bit_range + 1) / 2;
        Ok((bit_min, bit_min + bit_range))
    }

    /// On-disk dtype of the zero-point tensor
    pub fn zero_point_dtype(&self) -> Dtype {
        match self.quant_type {
            QuantizationType::Int if self.num_bits <= 8 => Dtype::I8,
            QuantizationType::Int if self.num_bits <= 16 => Dtype::I16,
            QuantizationType::Int => Dtype::I32,
            QuantizationType::Float => Dtype::F32,
        }
    }

    /// Build the observer named by `self.observer` from the default registry
    ///
    /// # Errors
    ///
    /// Fails on an unknown observer name, invalid arguments or invalid
    /// observer kwargs.
    pub fn get_observer(&self) -> Result<Box<dyn Observer>> {
        ObserverRegistry::with_defaults().load(&self.observer, self.clone())
    }
}

/// Parse a `"RxC"` block descriptor
pub fn parse_block_structure(structure: &str) -> Result<(usize, usize)> {
    let invalid = || {
        Error::Config(format!(
            "block_structure must look like \"2x4\", got {structure:?}"
        ))
    };

    let (rows, cols) = structure.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let rows: usize = rows.trim().parse().map_err(|_| invalid())?;
    let cols: usize = cols.trim().parse().map_err(|_| invalid())?;
    if rows == 0 || cols == 0 {
        return Err(invalid());
    }
    Ok((rows, cols))
}
