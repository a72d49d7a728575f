//! YAML schema for calibration recipes

use crate::quant::QuantizationScheme;
use serde::{Deserialize, Serialize};

/// Complete calibration recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecipe {
    /// Layers to quantize and the arguments for each slot
    pub scheme: QuantizationScheme,

    /// Store zero-points even for symmetric slots
    #[serde(default = "default_true")]
    pub force_zero_point: bool,
}

impl CalibrationRecipe {
    pub fn new(scheme: QuantizationScheme) -> Self {
        Self {
            scheme,
            force_zero_point: true,
        }
    }
}

fn default_true() -> bool {
    true
}
