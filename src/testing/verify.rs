//! Verification predicates.
//!
//! Each predicate receives the arrays an operator was invoked with and the
//! arrays it wrote, reads both in row-major order, and checks the operator's
//! reference relation. Checks come in two strengths, mirrored by [`Checks`]:
//! `expect_*` records a mismatch and keeps going, `require_*` stops at the
//! first one.

use crate::approx::{CloseTo, Tolerance};
use crate::array::NdArray;
use crate::error::VerifyError;
use crate::tensors::Ten32;

/// A predicate over `(inputs, outputs)`.
pub type VerifyFn = fn(&[NdArray], &[NdArray]) -> Result<(), VerifyError>;

/// Collects non-fatal mismatches for one verification.
#[derive(Debug, Default)]
pub struct Checks {
    context: String,
    recorded: Vec<VerifyError>,
}

impl Checks {
    /// Starts a verification named `context`.
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            recorded: Vec::new(),
        }
    }

    fn size_error(&self, expected: usize, actual: usize) -> Option<VerifyError> {
        (expected != actual).then(|| VerifyError::SizeMismatch {
            context: self.context.clone(),
            expected,
            actual,
        })
    }

    fn value_error(
        &self,
        index: usize,
        expected: f32,
        actual: f32,
        tol: Tolerance,
    ) -> Option<VerifyError> {
        (!tol.accepts(actual, expected)).then(|| VerifyError::ValueMismatch {
            context: self.context.clone(),
            index,
            expected,
            actual,
            tolerance: tol.bound(expected),
        })
    }

    /// Records a size mismatch.
    pub fn expect_size(&mut self, expected: usize, actual: usize) {
        if let Some(e) = self.size_error(expected, actual) {
            self.recorded.push(e);
        }
    }

    /// Fails on a size mismatch.
    ///
    /// # Errors
    /// [`VerifyError::SizeMismatch`].
    pub fn require_size(&self, expected: usize, actual: usize) -> Result<(), VerifyError> {
        self.size_error(expected, actual).map_or(Ok(()), Err)
    }

    /// Records an element outside `tol` of `expected`.
    pub fn expect_value(&mut self, index: usize, expected: f32, actual: f32, tol: Tolerance) {
        if let Some(e) = self.value_error(index, expected, actual, tol) {
            self.recorded.push(e);
        }
    }

    /// Fails on an element outside `tol` of `expected`.
    ///
    /// # Errors
    /// [`VerifyError::ValueMismatch`].
    pub fn require_value(
        &self,
        index: usize,
        expected: f32,
        actual: f32,
        tol: Tolerance,
    ) -> Result<(), VerifyError> {
        self.value_error(index, expected, actual, tol)
            .map_or(Ok(()), Err)
    }

    /// Number of recorded mismatches so far.
    #[must_use]
    pub fn recorded(&self) -> usize {
        self.recorded.len()
    }

    /// Ends the verification.
    ///
    /// # Errors
    /// [`VerifyError::Recorded`] if any mismatch was recorded.
    pub fn finish(mut self) -> Result<(), VerifyError> {
        if self.recorded.is_empty() {
            return Ok(());
        }
        let count = self.recorded.len();
        let first = self.recorded.swap_remove(0);
        Err(VerifyError::Recorded {
            count,
            first: Box::new(first),
        })
    }
}

fn first<'a>(arrs: &'a [NdArray], what: &str) -> Result<&'a NdArray, VerifyError> {
    arrs.first()
        .ok_or_else(|| VerifyError::Setup(format!("no {what} to verify")))
}

fn nth<'a>(arrs: &'a [NdArray], i: usize, what: &str) -> Result<&'a NdArray, VerifyError> {
    arrs.get(i)
        .ok_or_else(|| VerifyError::Setup(format!("missing {what} {i}")))
}

/// `|a - b| <= atol + rtol * |b|` for every element of the first arrays.
///
/// # Errors
/// The first element out of bounds, or a size mismatch.
pub fn assert_equal(
    in_arrs: &[NdArray],
    out_arrs: &[NdArray],
    rtol: f32,
    atol: f32,
) -> Result<(), VerifyError> {
    let a = first(in_arrs, "input")?.to_vec();
    let b = first(out_arrs, "output")?.to_vec();
    let checks = Checks::new("assert_equal");
    checks.require_size(a.len(), b.len())?;
    let tol = Tolerance::new(rtol, atol);
    for (i, (&x, &y)) in a.iter().zip(&b).enumerate() {
        checks.require_value(i, y, x, tol)?;
    }
    Ok(())
}

/// The output is a bit-exact copy of the input.
///
/// # Errors
/// The first differing element or a size mismatch.
pub fn verify_copy_result(in_arrs: &[NdArray], out_arrs: &[NdArray]) -> Result<(), VerifyError> {
    let a = first(in_arrs, "input")?.to_vec();
    let b = first(out_arrs, "output")?.to_vec();
    let mut checks = Checks::new("copy");
    checks.expect_size(a.len(), b.len());
    if let Some(i) = b.as_slice().first_mismatch(a.as_slice(), Tolerance::EXACT) {
        if i < a.len() && i < b.len() {
            checks.expect_value(i, a[i], b[i], Tolerance::EXACT);
        }
    }
    checks.finish()
}

/// `out = max(x, 0)`.
///
/// # Errors
/// Every differing element, recorded.
pub fn verify_act_result(in_arrs: &[NdArray], out_arrs: &[NdArray]) -> Result<(), VerifyError> {
    let x = first(in_arrs, "input")?.to_vec();
    let out = first(out_arrs, "output")?.to_vec();
    let mut checks = Checks::new("relu");
    checks.expect_size(x.len(), out.len());
    for (i, (&v, &o)) in x.iter().zip(&out).enumerate() {
        checks.expect_value(i, v.max(0.0), o, Tolerance::EXACT);
    }
    checks.finish()
}

/// Input gradient is the output gradient where the input is positive, zero
/// elsewhere.
///
/// # Errors
/// The first differing element.
pub fn verify_act_backwards_result(
    in_arrs: &[NdArray],
    out_arrs: &[NdArray],
) -> Result<(), VerifyError> {
    let grad = nth(in_arrs, 0, "input")?.to_vec();
    let x = nth(in_arrs, 1, "input")?.to_vec();
    let dx = first(out_arrs, "output")?.to_vec();
    let mut checks = Checks::new("relu backward");
    checks.expect_size(grad.len(), x.len());
    checks.require_size(grad.len(), dx.len())?;
    for (i, ((&g, &v), &d)) in grad.iter().zip(&x).zip(&dx).enumerate() {
        let expected = if v > 0.0 { g } else { 0.0 };
        checks.require_value(i, expected, d, Tolerance::EXACT)?;
    }
    checks.finish()
}

/// `out = a + b`.
///
/// # Errors
/// The first differing element.
pub fn verify_sum_result(in_arrs: &[NdArray], out_arrs: &[NdArray]) -> Result<(), VerifyError> {
    let a = nth(in_arrs, 0, "input")?.to_vec();
    let b = nth(in_arrs, 1, "input")?.to_vec();
    let out = first(out_arrs, "output")?.to_vec();
    let mut checks = Checks::new("sum");
    checks.expect_size(a.len(), out.len());
    for (i, ((&x, &y), &o)) in a.iter().zip(&b).zip(&out).enumerate() {
        checks.require_value(i, x + y, o, Tolerance::EXACT)?;
    }
    checks.finish()
}

/// Both input gradients equal the output gradient.
///
/// # Errors
/// The first differing element.
pub fn verify_sum_backwards_result(
    in_arrs: &[NdArray],
    out_arrs: &[NdArray],
) -> Result<(), VerifyError> {
    let grad = first(in_arrs, "input")?.to_vec();
    let checks = Checks::new("sum backward");
    for i in 0..2 {
        let ig = nth(out_arrs, i, "output")?.to_vec();
        checks.require_size(grad.len(), ig.len())?;
        for (j, (&g, &d)) in grad.iter().zip(&ig).enumerate() {
            checks.require_value(j, g, d, Tolerance::EXACT)?;
        }
    }
    checks.finish()
}

/// First axis on which the two shapes differ.
#[must_use]
pub fn get_dim(input_shape: &[usize], output_shape: &[usize]) -> Option<usize> {
    input_shape
        .iter()
        .zip(output_shape)
        .position(|(a, b)| a != b)
}

/// Elements in one slab from `dim` inwards: the product of `shape[dim..]`.
#[must_use]
pub fn get_block_size(shape: &[usize], dim: usize) -> usize {
    shape.iter().skip(dim).product()
}

/// Checks that `joined` interleaves `parts` slab by slab:
/// `joined[(block * n + part) * block_size + i] == parts[part][block * block_size + i]`.
fn verify_interleaved(
    context: &str,
    parts: &[NdArray],
    joined: &NdArray,
) -> Result<(), VerifyError> {
    let part_shape = first(parts, "part")?.shape().to_vec();
    let part_size = first(parts, "part")?.size();
    let n = parts.len();
    let out = joined.to_vec();

    let mut checks = Checks::new(context);
    checks.expect_size(part_size * n, out.len());
    let dim = get_dim(&part_shape, joined.shape()).ok_or_else(|| {
        VerifyError::Setup(format!(
            "{context}: {part_shape:?} and {:?} agree on every axis",
            joined.shape()
        ))
    })?;
    let block_size = get_block_size(&part_shape, dim);
    if block_size == 0 {
        return Err(VerifyError::Setup(format!(
            "{context}: {part_shape:?} is empty from axis {dim} on"
        )));
    }
    let num_blocks = part_size / block_size;

    for (p, part) in parts.iter().enumerate() {
        let data = part.to_vec();
        for block in 0..num_blocks {
            for i in 0..block_size {
                let at = (block * n + p) * block_size + i;
                let Some(&o) = out.get(at) else {
                    return Err(VerifyError::SizeMismatch {
                        context: context.to_owned(),
                        expected: at + 1,
                        actual: out.len(),
                    });
                };
                checks.require_value(at, data[block * block_size + i], o, Tolerance::EXACT)?;
            }
        }
    }
    checks.finish()
}

/// The output is the inputs joined along the axis where shapes differ.
///
/// # Errors
/// The first misplaced element.
pub fn verify_concat_result(in_arrs: &[NdArray], out_arrs: &[NdArray]) -> Result<(), VerifyError> {
    verify_interleaved("concat", in_arrs, first(out_arrs, "output")?)
}

/// The outputs are the pieces of the joined input gradient.
///
/// # Errors
/// The first misplaced element.
pub fn verify_concat_backwards_result(
    in_arrs: &[NdArray],
    out_arrs: &[NdArray],
) -> Result<(), VerifyError> {
    verify_interleaved("concat backward", out_arrs, first(in_arrs, "input")?)
}

/// Verifies an accumulating invocation: subtracts each output's
/// pre-invocation content and runs `verify_fn` on the differences.
///
/// # Errors
/// Whatever `verify_fn` reports, or a count mismatch.
pub fn verify_add_request(
    in_arrs: &[NdArray],
    original_outputs: &[NdArray],
    new_outputs: &[NdArray],
    verify_fn: VerifyFn,
) -> Result<(), VerifyError> {
    if original_outputs.len() != new_outputs.len() {
        return Err(VerifyError::Setup(format!(
            "{} original outputs for {} outputs",
            original_outputs.len(),
            new_outputs.len()
        )));
    }
    let diffs: Vec<NdArray> = new_outputs
        .iter()
        .zip(original_outputs)
        .map(|(new, orig)| {
            let new = new.to_tensor();
            let orig = orig.to_vec();
            let data = new.data.iter().zip(&orig).map(|(a, b)| a - b).collect();
            NdArray::from_tensor(&Ten32::new(new.shape, data))
        })
        .collect();
    verify_fn(in_arrs, &diffs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(shape: &[usize], data: &[f32]) -> NdArray {
        NdArray::from_tensor(&Ten32::new(shape.to_vec(), data.to_vec()))
    }

    #[test]
    fn act_mismatches_are_recorded_not_fatal() {
        let x = arr(&[4], &[-1.0, 2.0, -3.0, 4.0]);
        let bad = arr(&[4], &[-1.0, 2.0, -3.0, 4.0]);
        let err = verify_act_result(&[x], &[bad]).unwrap_err();
        let VerifyError::Recorded { count, first } = err else {
            panic!("expected recorded mismatches");
        };
        assert_eq!(count, 2);
        assert!(matches!(*first, VerifyError::ValueMismatch { index: 0, .. }));
    }

    #[test]
    fn assert_equal_uses_reference_relative_bound() {
        let a = arr(&[2], &[100.0, 1.0]);
        let b = arr(&[2], &[100.0005, 1.0]);
        assert!(assert_equal(&[a.clone()], &[b], 1e-5, 1e-8).is_ok());
        let c = arr(&[2], &[100.01, 1.0]);
        assert!(assert_equal(&[a], &[c], 1e-5, 1e-8).is_err());
    }

    #[test]
    fn concat_interleaves_slabs() {
        let part = arr(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let joined = arr(&[2, 4], &[1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0]);
        assert_eq!(get_dim(&[2, 2], &[2, 4]), Some(1));
        assert_eq!(get_block_size(&[2, 2], 1), 2);
        verify_concat_result(&[part.clone(), part.clone()], &[joined.clone()]).unwrap();
        verify_concat_backwards_result(&[joined], &[part.clone(), part]).unwrap();
    }

    #[test]
    fn empty_concat_parts_are_a_setup_error() {
        let part = NdArray::zeros(vec![2, 0]);
        let joined = NdArray::zeros(vec![4, 0]);
        let err = verify_concat_result(&[part.clone(), part], &[joined]).unwrap_err();
        assert!(matches!(err, VerifyError::Setup(_)));
    }

    #[test]
    fn checks_count_recorded_mismatches() {
        let mut checks = Checks::new("count");
        checks.expect_value(0, 1.0, 1.0, Tolerance::EXACT);
        assert_eq!(checks.recorded(), 0);
        checks.expect_value(1, 1.0, 2.0, Tolerance::EXACT);
        checks.expect_size(3, 4);
        assert_eq!(checks.recorded(), 2);
        assert!(matches!(checks.finish(), Err(VerifyError::Recorded { count: 2, .. })));
    }

    #[test]
    fn add_request_subtracts_prior_content() {
        let x = arr(&[3], &[1.0, -2.0, 3.0]);
        let prior = arr(&[3], &[5.0, 5.0, 5.0]);
        let after = arr(&[3], &[6.0, 3.0, 8.0]);
        verify_add_request(&[x], &[prior], &[after], verify_copy_result).unwrap();
    }

    #[test]
    fn copy_reports_size_mismatch() {
        let err = verify_copy_result(&[arr(&[2], &[1.0, 2.0])], &[arr(&[3], &[1.0, 2.0, 0.0])])
            .unwrap_err();
        assert!(matches!(err, VerifyError::Recorded { count: 1, .. }));
    }
}
