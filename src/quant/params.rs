//! Scale / zero-point derivation
//!
//! Maps a (min, max) statistic pair to quantization parameters for the bit
//! depth and symmetry in [`QuantizationArgs`]. The range is always widened to
//! contain zero so that zero is exactly representable.

use crate::quant::args::QuantizationArgs;
use crate::{Error, Result};
use ndarray::{ArrayD, Zip};

/// Smallest scale ever produced
pub const SCALE_EPS: f32 = f32::EPSILON;

/// Scale and zero-point derived for one tensor slot
///
/// Both arrays share the shape of the statistics they were derived from:
/// scalar for per-tensor, `(O, 1)` for per-channel, `(O, groups)` for
/// per-group.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantParams {
    /// Scale factor(s), always finite and positive
    pub scale: ArrayD<f32>,
    /// Zero point(s), within the representable integer range
    pub zero_point: ArrayD<i32>,
}

impl QuantParams {
    /// Shape shared by scale and zero-point
    pub fn shape(&self) -> &[usize] {
        self.scale.shape()
    }

    /// Number of independent scale/zero-point pairs
    pub fn len(&self) -> usize {
        self.scale.len()
    }

    /// True when no parameters are held
    pub fn is_empty(&self) -> bool {
        self.scale.is_empty()
    }
}

/// Compute scale and zero-point from running min/max statistics
///
/// # Arguments
/// * `min_vals` - Observed minimum(s)
/// * `max_vals` - Observed maximum(s), same shape as `min_vals`
/// * `args` - Bit depth and symmetry
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the two statistics disagree in shape,
/// [`Error::InvalidParameter`] if `num_bits` is outside 1..=32.
pub fn calculate_qparams(
    min_vals: &ArrayD<f32>,
    max_vals: &ArrayD<f32>,
    args: &QuantizationArgs,
) -> Result<QuantParams> {
    if min_vals.shape() != max_vals.shape() {
        return Err(Error::ShapeMismatch {
            expected: min_vals.shape().to_vec(),
            got: max_vals.shape().to_vec(),
        });
    }

    let (bit_min, bit_max) = args.quant_range()?;
    let bit_range = (bit_max - bit_min) as f64;
    let (bit_min, bit_max) = (bit_min as f64, bit_max as f64);

    let mut scale = ArrayD::<f32>::zeros(min_vals.raw_dim());
    let mut zero_point = ArrayD::<i32>::zeros(min_vals.raw_dim());

    Zip::from(&mut scale)
        .and(&mut zero_point)
        .and(min_vals)
        .and(max_vals)
        .for_each(|scale, zero_point, &min_val, &max_val| {
            let min_val = f64::from(min_val.min(0.0));
            let max_val = f64::from(max_val.max(0.0));

            if args.symmetric {
                let max_abs = (-min_val).max(max_val);
                *scale = clamp_scale(max_abs / (bit_range / 2.0));
                *zero_point = 0;
            } else {
                let s = clamp_scale((max_val - min_val) / bit_range);
                *scale = s;
                let zp = bit_min - (min_val / f64::from(s)).round_ties_even();
                *zero_point = zp.clamp(bit_min, bit_max) as i32;
            }
        });

    Ok(QuantParams { scale, zero_point })
}

fn clamp_scale(scale: f64) -> f32 {
    let scale = scale as f32;
    if scale.is_finite() {
        scale.max(SCALE_EPS)
    } else if scale.is_nan() {
        SCALE_EPS
    } else {
        f32::MAX
    }
}
