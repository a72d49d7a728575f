#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ndarray::arr1;
use qobserve::quant::{calculate_qparams, QuantizationArgs};

/// Fuzz target for scale / zero-point calculation
///
/// Any min/max pair, including non-finite values, must produce a finite
/// positive scale and a zero-point inside the representable range.
#[derive(Arbitrary, Debug)]
struct QParamsInput {
    min: Vec<f32>,
    max: Vec<f32>,
    num_bits: u8,
    symmetric: bool,
}

fuzz_target!(|input: QParamsInput| {
    let n = input.min.len().min(input.max.len());
    if n == 0 {
        return;
    }
    let args = QuantizationArgs::new(u32::from(input.num_bits % 16) + 1, input.symmetric);
    let min = arr1(&input.min[..n]).into_dyn();
    let max = arr1(&input.max[..n]).into_dyn();

    if let Ok(params) = calculate_qparams(&min, &max, &args) {
        let Ok((bit_min, bit_max)) = args.quant_range() else {
            return;
        };
        for (&scale, &zp) in params.scale.iter().zip(params.zero_point.iter()) {
            assert!(scale.is_finite() && scale > 0.0);
            assert!((bit_min..=bit_max).contains(&i64::from(zp)));
        }
    }
});
