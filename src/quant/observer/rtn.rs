//! Round-to-nearest observer

use super::{Observer, Statistics};
use crate::quant::args::QuantizationArgs;
use crate::quant::params::QuantParams;
use crate::{Error, Result};
use ndarray::ArrayViewD;

/// Stateless observer: scale / zero-point from the current tensor alone
///
/// Equivalent to [`super::MovingAverageMinMaxObserver`] with an averaging
/// constant of 1, except that nothing is retained between calls.
#[derive(Clone, Debug)]
pub struct RoundToNearestObserver {
    args: QuantizationArgs,
}

impl RoundToNearestObserver {
    /// Registry identifier
    pub const NAME: &'static str = "round_to_nearest";

    pub fn new(args: QuantizationArgs) -> Result<Self> {
        args.validate()?;
        Ok(Self { args })
    }

    /// Create observer; `observer_kwargs` must be empty
    pub fn from_args(args: QuantizationArgs) -> Result<Self> {
        if let Some(key) = args.observer_kwargs.keys().next() {
            return Err(Error::InvalidParameter(format!(
                "unexpected keyword argument for {} observer: {key}",
                Self::NAME
            )));
        }
        Self::new(args)
    }
}

impl Observer for RoundToNearestObserver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn args(&self) -> &QuantizationArgs {
        &self.args
    }

    fn calculate_qparams(
        &mut self,
        observed: &ArrayViewD<'_, f32>,
        reduce_dims: Option<&[usize]>,
    ) -> Result<QuantParams> {
        Statistics::collect(&self.args, observed, reduce_dims)?.qparams(&self.args)
    }
}
