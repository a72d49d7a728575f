//! Applying calibrated parameters
//!
//! Quantize, dequantize and fake-quantize tensors with the scale/zero-point
//! produced by an observer. Parameters broadcast against the input: a single
//! parameter covers everything, otherwise ranks match and each parameter
//! axis must divide the input axis, covering equal contiguous tiles
//! (channels, groups, blocks).

use crate::quant::args::QuantizationArgs;
use crate::quant::params::QuantParams;
use crate::{Error, Result};
use ndarray::{ArrayD, ArrayViewD};

/// Per-axis tile length mapping an input index to a parameter index
fn tile_lengths(param_shape: &[usize], input_shape: &[usize]) -> Result<Vec<usize>> {
    let mismatch = || Error::ShapeMismatch {
        expected: input_shape.to_vec(),
        got: param_shape.to_vec(),
    };

    // a single parameter covers the whole input, whatever its rank
    if param_shape.iter().product::<usize>() == 1 {
        return Ok(input_shape.iter().map(|&d| d.max(1)).collect());
    }
    if param_shape.len() != input_shape.len() {
        return Err(mismatch());
    }

    param_shape
        .iter()
        .zip(input_shape)
        .map(|(&p, &x)| {
            if p == 0 || x % p != 0 {
                Err(mismatch())
            } else {
                Ok(x / p)
            }
        })
        .collect()
}

fn map_with_params<F>(
    input: &ArrayViewD<'_, f32>,
    params: &QuantParams,
    mut f: F,
) -> Result<ArrayD<f32>>
where
    F: FnMut(f32, f32, i32) -> f32,
{
    let tiles = tile_lengths(params.shape(), input.shape())?;
    let scalar = params.len() == 1;
    let mut index = vec![0usize; params.scale.ndim()];

    Ok(ArrayD::from_shape_fn(input.raw_dim(), |idx| {
        if !scalar {
            for (axis, slot) in index.iter_mut().enumerate() {
                *slot = idx[axis] / tiles[axis];
            }
        }
        let scale = params.scale[index.as_slice()];
        let zero_point = params.zero_point[index.as_slice()];
        f(input[&idx], scale, zero_point)
    }))
}

/// Map values onto the integer grid: `clamp(round(x / scale) + zp)`
///
/// Results are integral values carried as `f32`.
pub fn quantize(
    input: &ArrayViewD<'_, f32>,
    params: &QuantParams,
    args: &QuantizationArgs,
) -> Result<ArrayD<f32>> {
    let (bit_min, bit_max) = args.quant_range()?;
    let (bit_min, bit_max) = (bit_min as f32, bit_max as f32);
    map_with_params(input, params, |v, scale, zp| {
        ((v / scale).round_ties_even() + zp as f32).clamp(bit_min, bit_max)
    })
}

/// Map integer-grid values back: `(q - zp) * scale`
pub fn dequantize(quantized: &ArrayViewD<'_, f32>, params: &QuantParams) -> Result<ArrayD<f32>> {
    map_with_params(quantized, params, |q, scale, zp| (q - zp as f32) * scale)
}

/// Quantize then dequantize, simulating quantization noise in `f32`
pub fn fake_quantize(
    input: &ArrayViewD<'_, f32>,
    params: &QuantParams,
    args: &QuantizationArgs,
) -> Result<ArrayD<f32>> {
    let quantized = quantize(input, params, args)?;
    dequantize(&quantized.view(), params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::args::QuantizationStrategy;
    use crate::quant::params::calculate_qparams;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr0, arr2, Array, IxDyn};

    #[test]
    fn test_per_tensor_round_trip_error_bounded() {
        let x = arr2(&[[-1.0f32, -0.25, 0.0, 0.3, 1.0]]).into_dyn();
        let args = QuantizationArgs::new(8, true);
        let params = calculate_qparams(
            &arr0(-1.0f32).into_dyn(),
            &arr0(1.0f32).into_dyn(),
            &args,
        )
        .unwrap();

        let fq = fake_quantize(&x.view(), &params, &args).unwrap();
        let step = params.scale[IxDyn(&[])];
        for (a, b) in x.iter().zip(fq.iter()) {
            assert!((a - b).abs() <= step / 2.0 + 1e-6);
        }
    }

    #[test]
    fn test_quantize_clamps() {
        let args = QuantizationArgs::new(4, true);
        let params = QuantParams {
            scale: arr0(1.0f32).into_dyn(),
            zero_point: arr0(0i32).into_dyn(),
        };
        let x = arr2(&[[100.0f32, -100.0, 3.4]]).into_dyn();
        let q = quantize(&x.view(), &params, &args).unwrap();
        assert_eq!(q[[0, 0]], 7.0);
        assert_eq!(q[[0, 1]], -8.0);
        assert_eq!(q[[0, 2]], 3.0);
    }

    #[test]
    fn test_group_broadcast() {
        let args = QuantizationArgs::new(8, true).with_group_size(2);
        let x = arr2(&[[1.0f32, 1.0, 10.0, 10.0]]).into_dyn();
        let mut observer = args.get_observer().unwrap();
        let params = observer.observe(&x.view()).unwrap();
        assert_eq!(params.shape(), &[1, 2]);

        let q = quantize(&x.view(), &params, &args).unwrap();
        // each group hits the top of its own range
        assert_eq!(q[[0, 0]], 127.0);
        assert_eq!(q[[0, 3]], 127.0);

        let fq = dequantize(&q.view(), &params).unwrap();
        assert_abs_diff_eq!(fq[[0, 2]], 10.0 * 127.0 / 127.5, epsilon = 1e-4);
    }

    #[test]
    fn test_asymmetric_zero_point_shift() {
        let args = QuantizationArgs::new(8, false);
        let params = QuantParams {
            scale: arr0(0.5f32).into_dyn(),
            zero_point: arr0(-128i32).into_dyn(),
        };
        let x = Array::from_elem(IxDyn(&[2]), 1.0f32);
        let q = quantize(&x.view(), &params, &args).unwrap();
        assert_eq!(q[[0]], -126.0);
        assert_eq!(dequantize(&q.view(), &params).unwrap()[[1]], 1.0);
    }

    #[test]
    fn test_single_param_any_rank() {
        let args = QuantizationArgs::new(8, true);
        let params = QuantParams {
            scale: Array::from_elem(IxDyn(&[1]), 0.5f32),
            zero_point: Array::zeros(IxDyn(&[1])),
        };
        let x = arr2(&[[1.0f32, -1.0], [0.25, 2.0]]).into_dyn();
        let q = quantize(&x.view(), &params, &args).unwrap();
        assert_eq!(q[[1, 1]], 4.0);
        assert_eq!(q[[0, 1]], -2.0);
    }

    #[test]
    fn test_dynamic_rank_input() {
        let args = QuantizationArgs::new(8, true).with_strategy(QuantizationStrategy::Channel);
        let x = Array::from_shape_fn(IxDyn(&[2, 3, 4]), |idx| {
            (idx[0] as f32 + 1.0) * (idx[2] as f32 - 1.5)
        });
        let params = QuantParams {
            scale: Array::from_shape_vec(IxDyn(&[2, 1, 1]), vec![0.5f32, 1.0]).unwrap(),
            zero_point: Array::zeros(IxDyn(&[2, 1, 1])),
        };

        let q = quantize(&x.view(), &params, &args).unwrap();
        assert_eq!(q.shape(), &[2, 3, 4]);
        // -1.5 / 0.5 and 3.0 / 1.0
        assert_eq!(q[[0, 1, 0]], -3.0);
        assert_eq!(q[[1, 2, 3]], 3.0);

        let fq = fake_quantize(&x.view(), &params, &args).unwrap();
        assert_eq!(fq[[1, 0, 3]], 3.0);
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let args = QuantizationArgs::new(64, true);
        let params = QuantParams {
            scale: arr0(1.0f32).into_dyn(),
            zero_point: arr0(0i32).into_dyn(),
        };
        let x = arr2(&[[1.0f32]]).into_dyn();
        assert!(matches!(
            quantize(&x.view(), &params, &args),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_incompatible_params() {
        let args = QuantizationArgs::new(8, true);
        let params = QuantParams {
            scale: Array::ones(IxDyn(&[3, 1])),
            zero_point: Array::zeros(IxDyn(&[3, 1])),
        };
        let x = Array::<f32, _>::ones(IxDyn(&[2, 4]));
        assert!(matches!(
            quantize(&x.view(), &params, &args),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
