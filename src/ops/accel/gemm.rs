//! Packed GEMM and the im2col / col2im lowering used by the convolution
//! kernels.
//!
//! Every output element is accumulated in ascending reduction order in a
//! single `f32`, so for a given operand order the result matches a naive
//! triple loop bit for bit.

use rayon::prelude::*;

use crate::ops::window::Window;

/// Width of the column panel packed from `b` per pass.
const PANEL: usize = 64;

/// Read-only row-major matrix operand, possibly read transposed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Mat<'a> {
    data: &'a [f32],
    rows: usize,
    cols: usize,
    transposed: bool,
}

impl<'a> Mat<'a> {
    pub fn new(data: &'a [f32], rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self { data, rows, cols, transposed: false }
    }

    /// The transpose, without copying.
    pub fn t(self) -> Self {
        Self {
            data: self.data,
            rows: self.cols,
            cols: self.rows,
            transposed: !self.transposed,
        }
    }

    #[inline]
    fn at(&self, r: usize, c: usize) -> f32 {
        if self.transposed {
            self.data[c * self.rows + r]
        } else {
            self.data[r * self.cols + c]
        }
    }
}

/// `c = a · b`, or `c += a · b` when `accumulate` is set.
///
/// `c` is row-major `a.rows × b.cols`. Rows of `c` are computed in parallel
/// against a contiguous panel of `b` columns.
pub(crate) fn gemm(a: Mat<'_>, b: Mat<'_>, c: &mut [f32], accumulate: bool) {
    let (m, k, n) = (a.rows, a.cols, b.cols);
    debug_assert_eq!(k, b.rows, "gemm inner dimensions differ");
    debug_assert_eq!(c.len(), m * n);
    if m == 0 || n == 0 {
        return;
    }

    let mut packed = vec![0.0; k * PANEL.min(n)];
    for j0 in (0..n).step_by(PANEL) {
        let width = PANEL.min(n - j0);
        for l in 0..k {
            for jj in 0..width {
                packed[l * width + jj] = b.at(l, j0 + jj);
            }
        }
        let panel = &packed[..k * width];

        c.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            let out = &mut row[j0..j0 + width];
            if !accumulate {
                out.fill(0.0);
            }
            for l in 0..k {
                let av = a.at(i, l);
                let bl = &panel[l * width..(l + 1) * width];
                for (acc, &bv) in out.iter_mut().zip(bl) {
                    *acc += av * bv;
                }
            }
        });
    }
}

/// Lowers `channels` planes of `src` into a `(channels * K) × OUT` matrix
/// whose column `o` holds the window read by output position `o`.
/// Padded taps are zero.
pub(crate) fn im2col(src: &[f32], channels: usize, win: &Window) -> Vec<f32> {
    let (isz, osz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let mut cols = vec![0.0; channels * ksz * osz];
    cols.par_chunks_mut(osz).enumerate().for_each(|(row, col)| {
        let (c, k) = (row / ksz, row % ksz);
        let plane = &src[c * isz..(c + 1) * isz];
        for (o, v) in col.iter_mut().enumerate() {
            if let Some(i) = win.source_flat(o, k) {
                *v = plane[i];
            }
        }
    });
    cols
}

/// Adjoint of [`im2col`]: scatters a `(channels * K) × OUT` matrix back onto
/// `channels` input planes, summing overlapping taps.
pub(crate) fn col2im(cols: &[f32], channels: usize, win: &Window) -> Vec<f32> {
    let (isz, osz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let mut out = vec![0.0; channels * isz];
    out.par_chunks_mut(isz).enumerate().for_each(|(c, plane)| {
        for k in 0..ksz {
            let row = &cols[(c * ksz + k) * osz..(c * ksz + k + 1) * osz];
            for (o, &v) in row.iter().enumerate() {
                if let Some(i) = win.source_flat(o, k) {
                    plane[i] += v;
                }
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
        let mut c = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for l in 0..k {
                    sum += a[i * k + l] * b[l * n + j];
                }
                c[i * n + j] = sum;
            }
        }
        c
    }

    #[test]
    fn matches_naive_across_panels() {
        let (m, k, n) = (3, 5, 70);
        let a: Vec<f32> = (0..m * k).map(|i| (i % 7) as f32 - 3.0).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 11) as f32 * 0.25).collect();
        let mut c = vec![0.0; m * n];
        gemm(Mat::new(&a, m, k), Mat::new(&b, k, n), &mut c, false);
        assert_eq!(c, naive(&a, &b, m, k, n));
    }

    #[test]
    fn transposed_operands_and_accumulation() {
        // a is stored 2x3 and used as its 3x2 transpose
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0, 0.0, 0.0, 1.0];
        let mut c = vec![1.0; 6];
        gemm(Mat::new(&a, 2, 3).t(), Mat::new(&b, 2, 2), &mut c, true);
        assert_eq!(c, vec![2.0, 5.0, 3.0, 6.0, 4.0, 7.0]);
    }

    #[test]
    fn col2im_sums_overlapping_windows() {
        let win = Window::new(&[3], &[2], &[2], &[1], &[0]);
        let cols = im2col(&[1.0, 2.0, 3.0], 1, &win);
        assert_eq!(cols, vec![1.0, 2.0, 2.0, 3.0]);
        let back = col2im(&[1.0; 4], 1, &win);
        assert_eq!(back, vec![1.0, 2.0, 1.0]);
    }
}
