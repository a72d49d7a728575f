//! # qobserve: quantization observers and calibration
//!
//! Observers watch tensors flowing through a layer and turn their value range
//! into the scale and zero-point used to quantize it.
//!
//! ## Architecture
//!
//! - **quant**: Observers, the observer registry and parameter calculation
//! - **io**: Safetensors headers, shard indexes and quantization state dicts
//! - **calibrate**: Weight calibration for whole checkpoints
//! - **config**: Declarative YAML/JSON recipes and the CLI definition
//!
//! ## Example
//!
//! ```
//! use ndarray::arr2;
//! use qobserve::quant::{Observer, QuantizationArgs, QuantizationStrategy};
//!
//! let args = QuantizationArgs::new(8, true).with_strategy(QuantizationStrategy::Channel);
//! let mut observer = args.get_observer().unwrap();
//!
//! let weight = arr2(&[[0.5f32, -1.0], [2.0, 0.25]]).into_dyn();
//! let params = observer.observe(&weight.view()).unwrap();
//! assert_eq!(params.shape(), &[2, 1]);
//! ```

pub mod calibrate;
pub mod config;
pub mod io;
pub mod quant;

pub mod error;

// Re-export commonly used types
pub use calibrate::{calibrate_checkpoint, CalibrationReport, LayerReport};
pub use error::{Error, Result};
pub use quant::{Observer, ObserverRegistry, QuantParams, QuantizationArgs};
