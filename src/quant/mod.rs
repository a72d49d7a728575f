//! Quantization: observers and calibrated parameters
//!
//! - **args**: per-slot quantization arguments (bits, symmetry, strategy)
//! - **observer**: min/max observers and the name → observer registry
//! - **params**: scale / zero-point calculation from a min/max range
//! - **forward**: quantize, dequantize and fake-quantize with those parameters
//! - **lifecycle**: observers and parameters attached to a layer

mod args;
mod forward;
mod lifecycle;
pub mod observer;
mod params;

pub use args::{parse_block_structure, QuantizationArgs, QuantizationStrategy, QuantizationType};
pub use forward::{dequantize, fake_quantize, quantize};
pub use lifecycle::{
    expected_param_shape, LayerQuantization, QuantizationScheme, QuantizationStatus,
    QuantizedSlot, ScaleDtype, SlotKind, WeightInfo,
};
pub use observer::{
    MovingAverageMinMaxObserver, Observer, ObserverFactory, ObserverRegistry,
    RoundToNearestObserver,
};
pub use params::{calculate_qparams, QuantParams, SCALE_EPS};
