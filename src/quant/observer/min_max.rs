//! Moving-average min/max observer

use super::{Observer, Statistics};
use crate::quant::args::QuantizationArgs;
use crate::quant::params::QuantParams;
use crate::{Error, Result};
use ndarray::ArrayViewD;

/// Default smoothing factor applied to each new batch
pub const DEFAULT_AVERAGING_CONSTANT: f32 = 0.01;

/// Observer tracking an exponentially smoothed min/max
///
/// The first call initializes the running statistics to the batch min/max;
/// every later call moves them by `averaging_constant` towards the batch
/// values. The statistics shape (channel count, group count) is fixed by
/// the first call.
#[derive(Clone, Debug)]
pub struct MovingAverageMinMaxObserver {
    args: QuantizationArgs,
    averaging_constant: f32,
    running: Option<Statistics>,
    num_batches: usize,
}

impl MovingAverageMinMaxObserver {
    /// Registry identifier
    pub const NAME: &'static str = "minmax";

    /// Create observer with an explicit averaging constant
    ///
    /// # Errors
    ///
    /// Fails unless `0 < averaging_constant <= 1` and `args` validate.
    pub fn new(args: QuantizationArgs, averaging_constant: f32) -> Result<Self> {
        args.validate()?;
        if !(averaging_constant > 0.0 && averaging_constant <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "averaging_constant must be in (0, 1], got {averaging_constant}"
            )));
        }
        Ok(Self {
            args,
            averaging_constant,
            running: None,
            num_batches: 0,
        })
    }

    /// Create observer reading `averaging_constant` from `args.observer_kwargs`
    pub fn from_args(args: QuantizationArgs) -> Result<Self> {
        let mut averaging_constant = DEFAULT_AVERAGING_CONSTANT;
        for (key, value) in &args.observer_kwargs {
            match key.as_str() {
                "averaging_constant" => {
                    averaging_constant = value.as_f64().ok_or_else(|| {
                        Error::InvalidParameter(format!(
                            "averaging_constant must be a number, got {value}"
                        ))
                    })? as f32;
                }
                other => {
                    return Err(Error::InvalidParameter(format!(
                        "unexpected keyword argument for {} observer: {other}",
                        Self::NAME
                    )));
                }
            }
        }
        Self::new(args, averaging_constant)
    }

    /// Smoothing factor
    pub fn averaging_constant(&self) -> f32 {
        self.averaging_constant
    }

    /// Running (min, max), groups concatenated along axis 1
    ///
    /// `Ok(None)` until the first tensor has been observed.
    ///
    /// # Errors
    ///
    /// Fails if the per-group statistics cannot be concatenated.
    pub fn running_min_max(&self) -> Result<Option<super::MinMax>> {
        self.running.as_ref().map(Statistics::merged).transpose()
    }

    /// Number of tensors folded into the statistics
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }
}

impl Observer for MovingAverageMinMaxObserver {
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
        let current = Statistics::collect(&self.args, observed, reduce_dims)?;

        match self.running.as_mut() {
            None => self.running = Some(current),
            Some(running) => running.blend(&current, self.averaging_constant)?,
        }
        self.num_batches += 1;

        tracing::debug!(
            observer = Self::NAME,
            shape = ?observed.shape(),
            batches = self.num_batches,
            "updated running min/max"
        );

        match &self.running {
            Some(running) => running.qparams(&self.args),
            None => Err(Error::Calibration("no statistics recorded".to_string())),
        }
    }

    fn reset(&mut self) {
        self.running = None;
        self.num_batches = 0;
    }
}
