//! Test array generation.
//!
//! Every driver iterates over the same catalogue of shapes, each materialised
//! in several storage variants ([`ArrayTypes`]): plain row-major arrays,
//! blocked arrays, windows onto larger buffers, and arrays reusing a buffer
//! allocated for another shape. Data is integer-valued so that reference
//! relations and cross-dispatch comparisons can be checked exactly.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::array::NdArray;
use crate::error::OpError;
use crate::ops::shape::{conv_out_dim, deconv_out_dim};
use crate::tensors::{shape_size, Ten32};
use crate::testing::config::SuiteConfig;

pub use crate::ops::params::shape_string as create_shape_string;

/// Magnitude bound of default test data: values lie in `[-50, 50)`.
pub const DEFAULT_MAX: i32 = 50;

/// Magnitude bound of convolution test data.
pub const CONV_MAX: i32 = 10;

/// Magnitude bound of generated kernels and biases.
pub const KERNEL_MAX: i32 = 5;

/// A set of array storage variants.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayTypes(u16);

impl ArrayTypes {
    /// No variant.
    pub const NONE: Self = Self(0);
    /// Row-major array owning its buffer.
    pub const NORMAL: Self = Self(1);
    /// Blocked array owning its buffer.
    pub const BLOCKED: Self = Self(1 << 1);
    /// Row-major window onto a larger array.
    pub const NORMAL_RESHAPED: Self = Self(1 << 2);
    /// Window onto a larger array created blocked.
    pub const BLOCKED_RESHAPED: Self = Self(1 << 3);
    /// Row-major array reusing a flat buffer.
    pub const NORMAL_REUSED: Self = Self(1 << 4);
    /// Blocked array reusing a flat buffer.
    pub const BLOCKED_REUSED: Self = Self(1 << 5);
    /// Window onto a reused, larger buffer.
    pub const NORMAL_RESHAPED_REUSED: Self = Self(1 << 6);
    /// Row-major array reusing a byte-sized (four times larger) buffer.
    pub const NORMAL_REUSED_DIFF_DTYPE: Self = Self(1 << 7);
    /// Every variant.
    pub const ALL: Self = Self((1 << 8) - 1);

    /// Whether every variant of `other` is in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Variants in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for ArrayTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ArrayTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ArrayTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArrayTypes({:#010b})", self.0)
    }
}

/// A blocked storage format applicable to arrays of rank `ndim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDesc {
    /// Rank of the arrays it applies to.
    pub ndim: usize,
    /// Channels per group.
    pub block: usize,
}

/// A test array and a human-readable description of how it was built.
#[derive(Debug, Clone)]
pub struct NdArrayAttrs {
    /// The array.
    pub arr: NdArray,
    /// Description used in verification messages.
    pub desc: String,
}

impl NdArrayAttrs {
    /// Pairs `arr` with `desc`.
    pub fn new(arr: NdArray, desc: impl Into<String>) -> Self {
        Self {
            arr,
            desc: desc.into(),
        }
    }
}

/// The shapes and blocked formats drivers iterate over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestArrayShapes {
    /// Logical shapes.
    pub shapes: Vec<Vec<usize>>,
    /// Blocked formats.
    pub descs: Vec<BlockDesc>,
}

/// The shape catalogue. `spatial_only` keeps the rank 4 and 5 shapes that
/// convolution and pooling accept.
#[must_use]
pub fn get_test_array_shapes(spatial_only: bool) -> TestArrayShapes {
    let mut shapes = Vec::new();
    if !spatial_only {
        shapes.push(vec![72]);
        shapes.push(vec![8, 9]);
    }
    shapes.push(vec![3, 4, 6, 6]);
    shapes.push(vec![4, 2, 5, 5]);
    shapes.push(vec![3, 2, 4, 4, 4]);

    let descs = [(2, 4), (4, 4), (4, 8), (5, 8)]
        .into_iter()
        .filter(|&(ndim, _)| !spatial_only || ndim >= 4)
        .map(|(ndim, block)| BlockDesc { ndim, block })
        .collect();
    TestArrayShapes { shapes, descs }
}

lazy_static::lazy_static! {
    static ref RNG: Mutex<StdRng> = Mutex::new(StdRng::seed_from_u64(SuiteConfig::get().seed));
}

/// `n` integer values in `[-max, max)`: a repeating ramp, or seeded random.
fn default_values(n: usize, rand: bool, max: i32) -> Result<Vec<f32>, OpError> {
    if max <= 0 {
        return Err(OpError::InvalidAttribute {
            op: "test data",
            key: "max".into(),
            value: max.to_string(),
            reason: "the value range must be non-empty".into(),
        });
    }
    if rand {
        let mut rng = RNG.lock().unwrap_or_else(PoisonError::into_inner);
        Ok((0..n).map(|_| rng.random_range(-max..max) as f32).collect())
    } else {
        let period = 2 * max as usize;
        Ok((0..n).map(|i| ((i % period) as i32 - max) as f32).collect())
    }
}

/// Fills `arr` with default test data bounded by [`DEFAULT_MAX`].
///
/// # Errors
/// Propagates write failures.
pub fn init_default_array(arr: &NdArray, rand: bool) -> Result<(), OpError> {
    init_array_with_max(arr, rand, DEFAULT_MAX)
}

/// Fills `arr` with integer test data in `[-max, max)`.
///
/// # Errors
/// [`OpError::InvalidAttribute`] unless `max` is positive; write failures.
pub fn init_array_with_max(arr: &NdArray, rand: bool, max: i32) -> Result<(), OpError> {
    arr.fill_from(&default_values(arr.size(), rand, max)?)
}

fn scaled_shape(shape: &[usize], scale: &[f32]) -> Vec<usize> {
    shape
        .iter()
        .enumerate()
        .map(|(i, &d)| match scale.get(i) {
            Some(&s) => (d as f32 * s).round() as usize,
            None => d,
        })
        .collect()
}

fn grown(shape: &[usize], extra_rows: usize) -> Vec<usize> {
    let mut s = shape.to_vec();
    s[0] += extra_rows;
    s
}

fn blocked(shape: &[usize], block: usize, rand: bool, max: i32) -> Result<NdArray, OpError> {
    let t = Ten32::new(shape.to_vec(), default_values(shape_size(shape), rand, max)?);
    NdArray::from_tensor_blocked(&t, block)
}

/// Input arrays for every catalogue shape, scaled by `scale` (missing
/// entries count as 1) and built in every variant of `types`.
///
/// # Errors
/// Propagates array construction failures.
pub fn get_test_input_arrays(
    types: ArrayTypes,
    rand: bool,
    scale: &[f32],
    spatial_only: bool,
    max: i32,
) -> Result<Vec<NdArrayAttrs>, OpError> {
    let tas = get_test_array_shapes(spatial_only);
    let mut arrs = Vec::new();
    for base in &tas.shapes {
        let shape = scaled_shape(base, scale);
        let rows = shape[0];

        if types.contains(ArrayTypes::NORMAL) {
            let arr = NdArray::zeros(shape.clone());
            init_array_with_max(&arr, rand, max)?;
            arrs.push(NdArrayAttrs::new(arr, "Normal NdArray"));
        }
        if types.contains(ArrayTypes::NORMAL_RESHAPED) {
            let parent = NdArray::zeros(grown(&shape, 2));
            init_array_with_max(&parent, rand, max)?;
            arrs.push(NdArrayAttrs::new(parent.slice(1, rows + 1)?, "Reshaped Normal NdArray"));
        }
        if types.contains(ArrayTypes::NORMAL_REUSED) {
            let arr = NdArray::zeros(vec![shape_size(&shape)]).as_array(shape.clone())?;
            init_array_with_max(&arr, rand, max)?;
            arrs.push(NdArrayAttrs::new(arr, "Reused Normal NdArray"));
        }
        if types.contains(ArrayTypes::NORMAL_RESHAPED_REUSED) {
            let doubled = grown(&shape, rows);
            let parent = NdArray::zeros(vec![shape_size(&doubled)]).as_array(doubled)?;
            init_array_with_max(&parent, rand, max)?;
            arrs.push(NdArrayAttrs::new(
                parent.slice(1, rows + 1)?,
                "Reused Reshaped Normal NdArray",
            ));
        }

        for desc in tas.descs.iter().filter(|d| d.ndim == shape.len()) {
            let b = desc.block;
            if types.contains(ArrayTypes::BLOCKED) {
                arrs.push(NdArrayAttrs::new(
                    blocked(&shape, b, rand, max)?,
                    format!("Blocked NdArray (block {b})"),
                ));
            }
            if types.contains(ArrayTypes::BLOCKED_RESHAPED) {
                let parent = blocked(&grown(&shape, 2), b, rand, max)?;
                arrs.push(NdArrayAttrs::new(
                    parent.slice(1, rows + 1)?,
                    format!("Reshaped Blocked NdArray (block {b})"),
                ));
            }
            if types.contains(ArrayTypes::BLOCKED_REUSED) {
                let arr = NdArray::zeros(vec![shape_size(&shape)]).as_array(shape.clone())?;
                init_array_with_max(&arr, rand, max)?;
                arr.to_blocked_in_place(b)?;
                arrs.push(NdArrayAttrs::new(arr, format!("Reused Blocked NdArray (block {b})")));
            }
        }
    }
    Ok(arrs)
}

/// Randomly initialised output arrays for `shape` scaled by `scale`, in
/// every variant of `types`. Blocked variants are built for each of `descs`
/// matching the output rank; reshaped blocked outputs are not generated.
///
/// # Errors
/// Propagates array construction failures.
pub fn get_test_output_arrays(
    shape: &[usize],
    descs: &[BlockDesc],
    scale: &[f32],
    types: ArrayTypes,
) -> Result<Vec<NdArrayAttrs>, OpError> {
    let shape = scaled_shape(shape, scale);
    let size = shape_size(&shape);
    let rows = shape[0];
    let mut arrs = Vec::new();
    let init = |arr: &NdArray| init_default_array(arr, true);

    if types.contains(ArrayTypes::NORMAL) {
        let arr = NdArray::zeros(shape.clone());
        init(&arr)?;
        arrs.push(NdArrayAttrs::new(arr, "Normal NdArray"));
    }
    if types.contains(ArrayTypes::NORMAL_RESHAPED) {
        let parent = NdArray::zeros(grown(&shape, rows));
        init(&parent)?;
        arrs.push(NdArrayAttrs::new(parent.slice(1, rows + 1)?, "Reshaped NdArray"));
    }
    if types.contains(ArrayTypes::NORMAL_REUSED) {
        let arr = NdArray::zeros(vec![size]).as_array(shape.clone())?;
        init(&arr)?;
        arrs.push(NdArrayAttrs::new(arr, "Reused NdArray"));
    }
    if types.contains(ArrayTypes::NORMAL_REUSED_DIFF_DTYPE) {
        let bytes = NdArray::zeros(vec![size * std::mem::size_of::<f32>()]);
        let arr = bytes.as_array(shape.clone())?;
        init(&arr)?;
        arrs.push(NdArrayAttrs::new(arr, "Reused NdArray with diff data type"));
    }
    if types.contains(ArrayTypes::NORMAL_RESHAPED_REUSED) {
        let doubled = grown(&shape, rows);
        let parent = NdArray::zeros(vec![shape_size(&doubled)]).as_array(doubled)?;
        init(&parent)?;
        arrs.push(NdArrayAttrs::new(parent.slice(1, rows + 1)?, "Reused Reshaped NdArray"));
    }

    for desc in descs.iter().filter(|d| d.ndim == shape.len()) {
        let b = desc.block;
        if types.contains(ArrayTypes::BLOCKED) {
            arrs.push(NdArrayAttrs::new(
                blocked(&shape, b, true, DEFAULT_MAX)?,
                format!("Blocked NdArray (block {b})"),
            ));
        }
        if types.contains(ArrayTypes::BLOCKED_REUSED) {
            let arr = NdArray::zeros(vec![size]).as_array(shape.clone())?;
            init(&arr)?;
            arr.to_blocked_in_place(b)?;
            arrs.push(NdArrayAttrs::new(arr, format!("Reused Blocked NdArray (block {b})")));
        }
    }
    Ok(arrs)
}

/// A random convolution kernel: `[filters, channels, k..]`, or
/// `[channels, filters, k..]` for deconvolution.
///
/// # Errors
/// Propagates write failures.
pub fn create_kernel_array(
    kernel: &[usize],
    num_filters: usize,
    input_shape: &[usize],
    is_deconv: bool,
) -> Result<NdArray, OpError> {
    let channels = input_shape[1];
    let mut shape = if is_deconv {
        vec![channels, num_filters]
    } else {
        vec![num_filters, channels]
    };
    shape.extend_from_slice(kernel);
    let arr = NdArray::zeros(shape);
    init_array_with_max(&arr, true, KERNEL_MAX)?;
    Ok(arr)
}

/// A random bias.
///
/// # Errors
/// Propagates write failures.
pub fn create_bias_array(shape: &[usize]) -> Result<NdArray, OpError> {
    let arr = NdArray::zeros(shape.to_vec());
    init_array_with_max(&arr, true, KERNEL_MAX)?;
    Ok(arr)
}

/// Output width of a convolution, 0 if the window does not fit.
#[must_use]
pub fn calculate_width_conv_output(width: usize, kernel: usize, padding: usize, stride: usize) -> usize {
    conv_out_dim(width, kernel, padding, stride).unwrap_or(0)
}

/// Output width of a deconvolution, 0 if it would not be positive.
#[must_use]
pub fn calculate_width_deconv_output(width: usize, kernel: usize, padding: usize, stride: usize) -> usize {
    deconv_out_dim(width, kernel, padding, stride).unwrap_or(0)
}

/// Output width of a pooling window sweep.
#[must_use]
pub fn calculate_width_pool_output(width: usize, kernel: usize, padding: usize, stride: usize) -> usize {
    calculate_width_conv_output(width, kernel, padding, stride)
}

/// Columns of a fully connected weight for data of `shape`: every axis but
/// the first, folded.
#[must_use]
pub fn fc_weight_dim2(shape: &[usize]) -> usize {
    shape.iter().skip(1).product()
}

/// Logs which input and output variants are about to be verified.
pub fn print_verify_msg(input: &NdArrayAttrs, output: &NdArrayAttrs) {
    let level = if SuiteConfig::get().verbose {
        log::Level::Info
    } else {
        log::Level::Debug
    };
    log::log!(
        level,
        "Verifying: {} {:?} with {} {:?}",
        input.desc,
        input.arr.shape(),
        output.desc,
        output.arr.shape()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_data_wraps_at_twice_max() {
        let arr = NdArray::zeros(vec![5]);
        init_array_with_max(&arr, false, 2).unwrap();
        assert_eq!(arr.to_vec(), vec![-2.0, -1.0, 0.0, 1.0, -2.0]);
    }

    #[test]
    fn empty_value_range_is_rejected() {
        let arr = NdArray::zeros(vec![4]);
        for rand in [false, true] {
            assert!(matches!(
                init_array_with_max(&arr, rand, 0),
                Err(OpError::InvalidAttribute { .. })
            ));
        }
        assert!(get_test_input_arrays(ArrayTypes::BLOCKED, true, &[1.0], false, -1).is_err());
    }

    #[test]
    fn random_data_is_bounded_integers() {
        let arr = NdArray::zeros(vec![256]);
        init_array_with_max(&arr, true, 3).unwrap();
        assert!(arr.to_vec().iter().all(|v| v.fract() == 0.0 && (-3.0..3.0).contains(v)));
    }

    #[test]
    fn input_variants_keep_the_logical_shape() {
        let arrs = get_test_input_arrays(ArrayTypes::ALL, false, &[1.0], false, DEFAULT_MAX).unwrap();
        let tas = get_test_array_shapes(false);
        for a in &arrs {
            assert!(tas.shapes.iter().any(|s| s.as_slice() == a.arr.shape()), "{}", a.desc);
        }
        assert!(arrs.iter().any(|a| a.arr.is_blocked()));
        assert!(arrs.iter().any(|a| a.arr.is_view()));
    }

    #[test]
    fn scale_applies_per_axis() {
        let arrs =
            get_test_input_arrays(ArrayTypes::NORMAL, false, &[2.0], false, DEFAULT_MAX).unwrap();
        assert_eq!(arrs[0].arr.shape(), &[144]);
        assert_eq!(arrs[1].arr.shape(), &[16, 9]);
    }

    #[test]
    fn output_variants_include_diff_dtype_reuse() {
        let descs = get_test_array_shapes(false).descs;
        let outs = get_test_output_arrays(&[3, 4, 6, 6], &descs, &[1.0, 0.5], ArrayTypes::ALL).unwrap();
        assert!(outs.iter().all(|o| o.arr.shape() == [3, 2, 6, 6]));
        let diff = outs
            .iter()
            .find(|o| o.desc.contains("diff data type"))
            .unwrap();
        assert_eq!(diff.arr.storage_len(), 4 * 3 * 2 * 6 * 6);
        assert_eq!(outs.iter().filter(|o| o.arr.is_blocked()).count(), 4);
    }

    #[test]
    fn width_helpers() {
        assert_eq!(calculate_width_conv_output(6, 3, 1, 2), 3);
        assert_eq!(calculate_width_deconv_output(5, 2, 0, 2), 10);
        assert_eq!(calculate_width_pool_output(5, 2, 1, 1), 6);
        assert_eq!(fc_weight_dim2(&[3, 4, 6, 6]), 144);
        assert_eq!(create_shape_string(2, 2), "(2,2)");
    }
}
