//! Min/max reductions shared by the observers

use crate::{Error, Result};
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice, Zip};

/// A (min, max) statistic pair of identical shape
#[derive(Clone, Debug, PartialEq)]
pub struct MinMax {
    pub min: ArrayD<f32>,
    pub max: ArrayD<f32>,
}

impl MinMax {
    pub fn shape(&self) -> &[usize] {
        self.min.shape()
    }

    /// Exponential moving-average update towards `current`
    ///
    /// `self += c * (current - self)` for both statistics. Shapes must match.
    pub fn blend(&mut self, current: &MinMax, averaging_constant: f32) -> Result<()> {
        if self.shape() != current.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().to_vec(),
                got: current.shape().to_vec(),
            });
        }

        Zip::from(&mut self.min)
            .and(&current.min)
            .for_each(|running, &value| *running += averaging_constant * (value - *running));
        Zip::from(&mut self.max)
            .and(&current.max)
            .for_each(|running, &value| *running += averaging_constant * (value - *running));
        Ok(())
    }
}

fn ensure_non_empty(observed: &ArrayViewD<'_, f32>) -> Result<()> {
    if observed.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "cannot observe an empty tensor of shape {:?}",
            observed.shape()
        )));
    }
    Ok(())
}

fn check_axes(shape: &[usize], dims: &[usize]) -> Result<()> {
    if let Some(&bad) = dims.iter().find(|&&d| d >= shape.len()) {
        return Err(Error::InvalidParameter(format!(
            "reduce dim {bad} out of range for tensor of shape {shape:?}"
        )));
    }
    Ok(())
}

/// Min and max of `observed`
///
/// With `reduce_dims` unset (or empty) the result is a pair of 0-d arrays.
/// Otherwise the listed axes are collapsed to length 1 and every other axis
/// is kept, so the statistics broadcast against the input.
pub fn reduce_min_max(
    observed: &ArrayViewD<'_, f32>,
    reduce_dims: Option<&[usize]>,
) -> Result<MinMax> {
    ensure_non_empty(observed)?;

    match reduce_dims {
        Some(dims) if !dims.is_empty() => {
            check_axes(observed.shape(), dims)?;
            let mut min = observed.to_owned();
            let mut max = observed.to_owned();
            for &dim in dims {
                min = min
                    .fold_axis(Axis(dim), f32::INFINITY, |&acc, &v| acc.min(v))
                    .insert_axis(Axis(dim));
                max = max
                    .fold_axis(Axis(dim), f32::NEG_INFINITY, |&acc, &v| acc.max(v))
                    .insert_axis(Axis(dim));
            }
            Ok(MinMax { min, max })
        }
        _ => {
            let (min, max) = global_min_max(observed);
            Ok(MinMax {
                min: ArrayD::from_elem(IxDyn(&[]), min),
                max: ArrayD::from_elem(IxDyn(&[]), max),
            })
        }
    }
}

fn global_min_max(observed: &ArrayViewD<'_, f32>) -> (f32, f32) {
    observed
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

/// Every axis except those in `keep`
pub fn all_axes_except(ndim: usize, keep: &[usize]) -> Vec<usize> {
    (0..ndim).filter(|d| !keep.contains(d)).collect()
}

/// Number of groups along axis 1, requiring an exact split
pub fn group_count(shape: &[usize], group_size: usize) -> Result<usize> {
    if shape.len() < 2 {
        return Err(Error::Config(format!(
            "group strategy needs a tensor with at least 2 dimensions, got shape {shape:?}"
        )));
    }
    let columns = shape[1];
    if group_size == 0 || columns % group_size != 0 {
        return Err(Error::Config(format!(
            "{columns} columns are not divisible by group_size {group_size}"
        )));
    }
    Ok(columns / group_size)
}

/// Per-group statistics over contiguous column slices of `group_size`
///
/// Unset `reduce_dims` reduce each group over all axes with keepdims, so the
/// group statistics can always be concatenated along axis 1.
pub fn reduce_groups(
    observed: &ArrayViewD<'_, f32>,
    group_size: usize,
    reduce_dims: Option<&[usize]>,
) -> Result<Vec<MinMax>> {
    ensure_non_empty(observed)?;
    let groups = group_count(observed.shape(), group_size)?;

    let all_axes: Vec<usize> = (0..observed.ndim()).collect();
    let dims = match reduce_dims {
        Some(dims) if !dims.is_empty() => dims,
        _ => all_axes.as_slice(),
    };

    (0..groups)
        .map(|g| {
            let start = g * group_size;
            let slice = observed.slice_axis(Axis(1), Slice::from(start..start + group_size));
            reduce_min_max(&slice, Some(dims))
        })
        .collect()
}

/// Concatenate per-group statistics along axis 1
pub fn concat_groups(groups: &[MinMax]) -> Result<MinMax> {
    let mins: Vec<_> = groups.iter().map(|g| g.min.view()).collect();
    let maxs: Vec<_> = groups.iter().map(|g| g.max.view()).collect();

    let min = ndarray::concatenate(Axis(1), &mins)
        .map_err(|e| Error::Calibration(format!("failed to concatenate group statistics: {e}")))?;
    let max = ndarray::concatenate(Axis(1), &maxs)
        .map_err(|e| Error::Calibration(format!("failed to concatenate group statistics: {e}")))?;
    Ok(MinMax { min, max })
}

/// One (min, max) per `rows x cols` tile of a 2-D tensor
pub fn reduce_blocks(observed: &ArrayViewD<'_, f32>, block: (usize, usize)) -> Result<MinMax> {
    ensure_non_empty(observed)?;
    let shape = observed.shape();
    if shape.len() != 2 {
        return Err(Error::Config(format!(
            "block strategy needs a 2-D tensor, got shape {shape:?}"
        )));
    }

    let (block_rows, block_cols) = block;
    if shape[0] % block_rows != 0 || shape[1] % block_cols != 0 {
        return Err(Error::Config(format!(
            "tensor shape {shape:?} is not divisible by block structure {block_rows}x{block_cols}"
        )));
    }

    let tiles = IxDyn(&[shape[0] / block_rows, shape[1] / block_cols]);
    let mut min = ArrayD::from_elem(tiles.clone(), f32::INFINITY);
    let mut max = ArrayD::from_elem(tiles, f32::NEG_INFINITY);

    for ((r, c), &v) in observed
        .indexed_iter()
        .map(|(idx, v)| ((idx[0] / block_rows, idx[1] / block_cols), v))
    {
        min[[r, c]] = min[[r, c]].min(v);
        max[[r, c]] = max[[r, c]].max(v);
    }

    Ok(MinMax { min, max })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array};

    #[test]
    fn test_global_reduction_is_scalar() {
        let x = arr2(&[[1.0f32, -2.0], [3.0, 0.5]]).into_dyn();
        let mm = reduce_min_max(&x.view(), None).unwrap();
        assert_eq!(mm.shape(), &[] as &[usize]);
        assert_eq!(mm.min[IxDyn(&[])], -2.0);
        assert_eq!(mm.max[IxDyn(&[])], 3.0);
    }

    #[test]
    fn test_empty_dims_behave_as_global() {
        let x = arr2(&[[1.0f32, -2.0]]).into_dyn();
        let mm = reduce_min_max(&x.view(), Some(&[])).unwrap();
        assert_eq!(mm.shape(), &[] as &[usize]);
    }

    #[test]
    fn test_keepdims_reduction() {
        let x = arr2(&[[1.0f32, -2.0, 4.0], [3.0, 0.5, -1.0]]).into_dyn();
        let mm = reduce_min_max(&x.view(), Some(&[1])).unwrap();
        assert_eq!(mm.shape(), &[2, 1]);
        assert_eq!(mm.min[[0, 0]], -2.0);
        assert_eq!(mm.max[[1, 0]], 3.0);

        let cols = reduce_min_max(&x.view(), Some(&[0])).unwrap();
        assert_eq!(cols.shape(), &[1, 3]);
        assert_eq!(cols.max[[0, 2]], 4.0);
    }

    #[test]
    fn test_reduce_axis_out_of_range() {
        let x = arr2(&[[1.0f32]]).into_dyn();
        assert!(reduce_min_max(&x.view(), Some(&[2])).is_err());
    }

    #[test]
    fn test_empty_tensor_rejected() {
        let x = Array::<f32, _>::zeros(IxDyn(&[0, 4]));
        assert!(matches!(
            reduce_min_max(&x.view(), None),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_groups_and_concat() {
        let x = arr2(&[[1.0f32, 2.0, -3.0, 4.0], [0.0, -1.0, 5.0, 6.0]]).into_dyn();
        let groups = reduce_groups(&x.view(), 2, Some(&[1])).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].shape(), &[2, 1]);

        let merged = concat_groups(&groups).unwrap();
        assert_eq!(merged.shape(), &[2, 2]);
        assert_eq!(merged.min[[0, 1]], -3.0);
        assert_eq!(merged.max[[1, 1]], 6.0);
        assert_eq!(merged.min[[1, 0]], -1.0);
    }

    #[test]
    fn test_groups_without_dims_keep_rank() {
        let x = arr2(&[[1.0f32, 2.0, -3.0, 4.0]]).into_dyn();
        let groups = reduce_groups(&x.view(), 2, None).unwrap();
        assert_eq!(groups[0].shape(), &[1, 1]);
        assert_eq!(concat_groups(&groups).unwrap().shape(), &[1, 2]);
    }

    #[test]
    fn test_uneven_groups_rejected() {
        let x = Array::<f32, _>::ones(IxDyn(&[2, 5]));
        assert!(matches!(
            reduce_groups(&x.view(), 2, Some(&[1])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_blocks() {
        let x = Array::from_shape_fn(IxDyn(&[4, 4]), |idx| (idx[0] * 4 + idx[1]) as f32);
        let mm = reduce_blocks(&x.view(), (2, 2)).unwrap();
        assert_eq!(mm.shape(), &[2, 2]);
        assert_eq!(mm.min[[0, 0]], 0.0);
        assert_eq!(mm.max[[0, 0]], 5.0);
        assert_eq!(mm.min[[1, 1]], 10.0);
        assert_eq!(mm.max[[1, 1]], 15.0);

        assert!(reduce_blocks(&x.view(), (3, 2)).is_err());
    }

    #[test]
    fn test_blend() {
        let mut running = MinMax {
            min: arr2(&[[0.0f32]]).into_dyn(),
            max: arr2(&[[1.0f32]]).into_dyn(),
        };
        let current = MinMax {
            min: arr2(&[[-1.0f32]]).into_dyn(),
            max: arr2(&[[3.0f32]]).into_dyn(),
        };
        running.blend(&current, 0.5).unwrap();
        assert_eq!(running.min[[0, 0]], -0.5);
        assert_eq!(running.max[[0, 0]], 2.0);

        let wrong = MinMax {
            min: arr2(&[[0.0f32, 0.0]]).into_dyn(),
            max: arr2(&[[0.0f32, 0.0]]).into_dyn(),
        };
        assert!(running.blend(&wrong, 0.5).is_err());
    }
}
