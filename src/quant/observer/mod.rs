//! Quantization-parameter observers
//!
//! An observer consumes sampled tensors during calibration and returns the
//! scale / zero-point reflecting everything it has seen so far:
//! - **minmax**: exponential moving average of min/max ([`MovingAverageMinMaxObserver`])
//! - **round_to_nearest**: min/max of the current tensor only ([`RoundToNearestObserver`])
//!
//! Observers are looked up by name through an [`ObserverRegistry`].

mod min_max;
mod rtn;
mod stats;


pub use min_max::{MovingAverageMinMaxObserver, DEFAULT_AVERAGING_CONSTANT};
pub use rtn::RoundToNearestObserver;
pub use stats::MinMax;

use crate::quant::args::{QuantizationArgs, QuantizationStrategy};
use crate::quant::params::{calculate_qparams, QuantParams};
use crate::{Error, Result};
use ndarray::ArrayViewD;
use std::collections::BTreeMap;
use std::fmt;

/// Stateful scale / zero-point estimator for one tensor slot
///
/// Not thread-safe by contract: one observer is driven by one caller.
pub trait Observer: fmt::Debug + Send {
    /// Registry identifier
    fn name(&self) -> &'static str;

    /// Arguments the observer was built with
    fn args(&self) -> &QuantizationArgs;

    /// Update statistics from `observed` and derive scale / zero-point
    ///
    /// # Arguments
    /// * `observed` - Sampled tensor
    /// * `reduce_dims` - Axes collapsed per call; unset means a single
    ///   global statistic
    fn calculate_qparams(
        &mut self,
        observed: &ArrayViewD<'_, f32>,
        reduce_dims: Option<&[usize]>,
    ) -> Result<QuantParams>;

    /// Like [`Observer::calculate_qparams`] with the reduction implied by
    /// the configured strategy
    fn observe(&mut self, observed: &ArrayViewD<'_, f32>) -> Result<QuantParams> {
        let dims = default_reduce_dims(self.args().strategy, observed.ndim())?;
        self.calculate_qparams(observed, dims.as_deref())
    }

    /// Forget all accumulated statistics
    fn reset(&mut self) {}
}

/// Axes reduced for a strategy when the caller does not pass any
///
/// - tensor / block: none (global, or per tile)
/// - channel / group: every axis except the output-channel axis 0
/// - token: the last (hidden) axis
pub fn default_reduce_dims(
    strategy: QuantizationStrategy,
    ndim: usize,
) -> Result<Option<Vec<usize>>> {
    match strategy {
        QuantizationStrategy::Tensor | QuantizationStrategy::Block => Ok(None),
        QuantizationStrategy::Channel | QuantizationStrategy::Group => {
            if ndim < 2 {
                return Err(Error::Config(format!(
                    "{strategy} strategy needs a tensor with at least 2 dimensions, got {ndim}"
                )));
            }
            Ok(Some(stats::all_axes_except(ndim, &[0])))
        }
        QuantizationStrategy::Token => Ok(ndim.checked_sub(1).map(|last| vec![last])),
    }
}

/// Current-call statistics, partitioned the way the strategy requires
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Statistics {
    Single(MinMax),
    Groups(Vec<MinMax>),
}

impl Statistics {
    /// Reduce `observed` according to `args`
    ///
    /// All configuration and shape validation happens here, before any
    /// caller state is touched.
    pub(crate) fn collect(
        args: &QuantizationArgs,
        observed: &ArrayViewD<'_, f32>,
        reduce_dims: Option<&[usize]>,
    ) -> Result<Self> {
        match args.strategy {
            QuantizationStrategy::Group => {
                let group_size = args.group_size_checked()?;
                stats::reduce_groups(observed, group_size, reduce_dims).map(Statistics::Groups)
            }
            QuantizationStrategy::Block => {
                if reduce_dims.is_some_and(|dims| !dims.is_empty()) {
                    return Err(Error::InvalidParameter(
                        "block strategy reduces per tile and takes no reduce dims".to_string(),
                    ));
                }
                stats::reduce_blocks(observed, args.block_shape()?).map(Statistics::Single)
            }
            _ => stats::reduce_min_max(observed, reduce_dims).map(Statistics::Single),
        }
    }

    /// Blend `current` into `self`, leaving `self` untouched on mismatch
    pub(crate) fn blend(&mut self, current: &Statistics, averaging_constant: f32) -> Result<()> {
        match (self, current) {
            (Statistics::Single(running), Statistics::Single(current)) => {
                running.blend(current, averaging_constant)
            }
            (Statistics::Groups(running), Statistics::Groups(current)) => {
                if running.len() != current.len() {
                    return Err(Error::ShapeMismatch {
                        expected: vec![running.len()],
                        got: vec![current.len()],
                    });
                }
                if let Some((r, c)) = running
                    .iter()
                    .zip(current)
                    .find(|(r, c)| r.shape() != c.shape())
                {
                    return Err(Error::ShapeMismatch {
                        expected: r.shape().to_vec(),
                        got: c.shape().to_vec(),
                    });
                }
                for (r, c) in running.iter_mut().zip(current) {
                    r.blend(c, averaging_constant)?;
                }
                Ok(())
            }
            _ => Err(Error::Calibration(
                "statistics layout changed between calls".to_string(),
            )),
        }
    }

    /// Single (min, max) pair; groups are concatenated along axis 1
    pub(crate) fn merged(&self) -> Result<MinMax> {
        match self {
            Statistics::Single(mm) => Ok(mm.clone()),
            Statistics::Groups(groups) => stats::concat_groups(groups),
        }
    }

    pub(crate) fn qparams(&self, args: &QuantizationArgs) -> Result<QuantParams> {
        let merged = self.merged()?;
        calculate_qparams(&merged.min, &merged.max, args)
    }
}

/// Constructor registered under an observer name
pub type ObserverFactory = fn(QuantizationArgs) -> Result<Box<dyn Observer>>;

/// Name → constructor map used to build observers from [`QuantizationArgs`]
#[derive(Clone)]
pub struct ObserverRegistry {
    factories: BTreeMap<String, ObserverFactory>,
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ObserverRegistry {
    /// Registry with no observers
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding `minmax` and `round_to_nearest`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(MovingAverageMinMaxObserver::NAME, |args| {
            MovingAverageMinMaxObserver::from_args(args).map(|o| Box::new(o) as Box<dyn Observer>)
        });
        registry.register(RoundToNearestObserver::NAME, |args| {
            RoundToNearestObserver::from_args(args).map(|o| Box::new(o) as Box<dyn Observer>)
        });
        registry
    }

    /// Add or replace a constructor
    pub fn register(&mut self, name: impl Into<String>, factory: ObserverFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the observer registered under `name`
    ///
    /// # Errors
    ///
    /// [`Error::UnknownObserver`] for an unregistered name; otherwise any
    /// argument validation error from the observer constructor.
    pub fn load(&self, name: &str, args: QuantizationArgs) -> Result<Box<dyn Observer>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownObserver {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;
        args.validate()?;
        factory(args)
    }
}
