//! Owned tensor payloads in safetensors layout

use crate::{Error, Result};
use half::{bf16, f16};
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, View};
use std::borrow::Cow;

/// Bytes per element for the dtypes this crate reads and writes
pub fn element_size(dtype: Dtype) -> Option<usize> {
    match dtype {
        Dtype::U8 | Dtype::I8 | Dtype::BOOL => Some(1),
        Dtype::F16 | Dtype::BF16 | Dtype::I16 => Some(2),
        Dtype::F32 | Dtype::I32 => Some(4),
        Dtype::F64 | Dtype::I64 => Some(8),
        _ => None,
    }
}

/// A tensor as stored on disk: dtype, shape and little-endian bytes
#[derive(Clone, Debug, PartialEq)]
pub struct StoredTensor {
    dtype: Dtype,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl StoredTensor {
    /// Wrap raw bytes, checking their length against dtype and shape
    pub fn new(dtype: Dtype, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        if let Some(size) = element_size(dtype) {
            let expected = shape.iter().product::<usize>() * size;
            if data.len() != expected {
                return Err(Error::SafeTensors(format!(
                    "{dtype:?} tensor of shape {shape:?} needs {expected} bytes, got {}",
                    data.len()
                )));
            }
        }
        Ok(Self { dtype, shape, data })
    }

    /// Copy a tensor out of a deserialized safetensors file
    pub fn from_view(view: &TensorView<'_>) -> Self {
        Self {
            dtype: view.dtype(),
            shape: view.shape().to_vec(),
            data: view.data().to_vec(),
        }
    }

    /// Encode floats as F32, F16, BF16 or F64
    pub fn from_f32(array: &ArrayD<f32>, dtype: Dtype) -> Result<Self> {
        let data: Vec<u8> = match dtype {
            Dtype::F32 => match array.as_slice() {
                Some(slice) => bytemuck::cast_slice(slice).to_vec(),
                None => array.iter().flat_map(|v| v.to_le_bytes()).collect(),
            },
            Dtype::F16 => array
                .iter()
                .flat_map(|&v| f16::from_f32(v).to_le_bytes())
                .collect(),
            Dtype::BF16 => array
                .iter()
                .flat_map(|&v| bf16::from_f32(v).to_le_bytes())
                .collect(),
            Dtype::F64 => array
                .iter()
                .flat_map(|&v| f64::from(v).to_le_bytes())
                .collect(),
            other => {
                return Err(Error::SafeTensors(format!(
                    "cannot encode float data as {other:?}"
                )))
            }
        };
        Self::new(dtype, array.shape().to_vec(), data)
    }

    /// Encode integers as I8, I16, I32, I64 or F32
    ///
    /// Values outside the target integer range are rejected.
    pub fn from_i32(array: &ArrayD<i32>, dtype: Dtype) -> Result<Self> {
        let out_of_range =
            |v: i32| Error::SafeTensors(format!("value {v} does not fit in {dtype:?}"));

        let mut data = Vec::with_capacity(array.len() * element_size(dtype).unwrap_or(4));
        for &v in array.iter() {
            match dtype {
                Dtype::I8 => {
                    data.extend(i8::try_from(v).map_err(|_| out_of_range(v))?.to_le_bytes())
                }
                Dtype::I16 => {
                    data.extend(i16::try_from(v).map_err(|_| out_of_range(v))?.to_le_bytes())
                }
                Dtype::I32 => data.extend(v.to_le_bytes()),
                Dtype::I64 => data.extend(i64::from(v).to_le_bytes()),
                Dtype::F32 => data.extend((v as f32).to_le_bytes()),
                other => {
                    return Err(Error::SafeTensors(format!(
                        "cannot encode integer data as {other:?}"
                    )))
                }
            }
        }
        Self::new(dtype, array.shape().to_vec(), data)
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Decode into an `f32` array of the stored shape
    pub fn to_f32(&self) -> Result<ArrayD<f32>> {
        let bytes = &self.data;
        let values: Vec<f32> = match self.dtype {
            Dtype::F32 => bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            Dtype::F16 => bytes
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            Dtype::BF16 => bytes
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            Dtype::F64 => bytes
                .chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    f64::from_le_bytes(b) as f32
                })
                .collect(),
            Dtype::I8 => bytes.iter().map(|&b| f32::from(b as i8)).collect(),
            Dtype::U8 => bytes.iter().map(|&b| f32::from(b)).collect(),
            Dtype::I16 => bytes
                .chunks_exact(2)
                .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])))
                .collect(),
            Dtype::I32 => bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
                .collect(),
            Dtype::I64 => bytes
                .chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    i64::from_le_bytes(b) as f32
                })
                .collect(),
            other => {
                return Err(Error::SafeTensors(format!(
                    "cannot decode {other:?} tensor as f32"
                )))
            }
        };

        ArrayD::from_shape_vec(IxDyn(&self.shape), values)
            .map_err(|e| Error::SafeTensors(format!("tensor data does not match shape: {e}")))
    }
}

impl View for &StoredTensor {
    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.data)
    }

    fn data_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_length_checked() {
        assert!(StoredTensor::new(Dtype::F32, vec![2], vec![0; 7]).is_err());
        assert!(StoredTensor::new(Dtype::F32, vec![2], vec![0; 8]).is_ok());
    }

    #[test]
    fn test_half_precision_encoding() {
        let x = arr2(&[[0.5f32, -2.0], [1.0e-3, 3.0]]).into_dyn();
        for dtype in [Dtype::F16, Dtype::BF16] {
            let stored = StoredTensor::from_f32(&x, dtype).unwrap();
            assert_eq!(stored.data().len(), 8);
            let back = stored.to_f32().unwrap();
            assert_eq!(back.shape(), &[2, 2]);
            assert_abs_diff_eq!(back[[0, 1]], -2.0);
            assert_abs_diff_eq!(back[[1, 0]], 1.0e-3, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_integer_encoding_range_checked() {
        let ok = arr2(&[[-128i32, 127]]).into_dyn();
        let stored = StoredTensor::from_i32(&ok, Dtype::I8).unwrap();
        assert_eq!(stored.data(), &[0x80, 0x7f]);

        let too_big = arr2(&[[200i32]]).into_dyn();
        assert!(StoredTensor::from_i32(&too_big, Dtype::I8).is_err());
        assert!(StoredTensor::from_i32(&too_big, Dtype::I16).is_ok());
    }

    #[test]
    fn test_unsupported_dtypes() {
        let x = arr2(&[[1.0f32]]).into_dyn();
        assert!(StoredTensor::from_f32(&x, Dtype::I8).is_err());
        let z = arr2(&[[1i32]]).into_dyn();
        assert!(StoredTensor::from_i32(&z, Dtype::BF16).is_err());
    }
}
