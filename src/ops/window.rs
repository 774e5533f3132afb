//! Sliding-window geometry shared by convolution, deconvolution and pooling.
//!
//! Spatial ranks 1 to 3 are normalized to three axes by prepending unit
//! axes, so every kernel walks the same `(d, h, w)` loop nest.

use crate::ops::params::{ConvolutionParam, PoolingParam};

/// A window sweep from an `input` grid onto an `output` grid.
///
/// Output position `o` with kernel offset `k` reads input position
/// `o * stride + k - pad` when that lands inside the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub input: [usize; 3],
    pub output: [usize; 3],
    pub kernel: [usize; 3],
    pub stride: [usize; 3],
    pub pad: [usize; 3],
}

fn lift(values: &[usize], fill: usize) -> [usize; 3] {
    let mut out = [fill; 3];
    out[3 - values.len()..].copy_from_slice(values);
    out
}

impl Window {
    pub fn new(
        input: &[usize],
        output: &[usize],
        kernel: &[usize],
        stride: &[usize],
        pad: &[usize],
    ) -> Self {
        Self {
            input: lift(input, 1),
            output: lift(output, 1),
            kernel: lift(kernel, 1),
            stride: lift(stride, 1),
            pad: lift(pad, 0),
        }
    }

    /// Convolution: data spatial dims onto output spatial dims.
    pub fn conv(p: &ConvolutionParam, data: &[usize], out: &[usize]) -> Self {
        Self::new(&data[2..], &out[2..], &p.kernel, &p.stride, &p.pad)
    }

    /// Deconvolution is a convolution read backwards: the (larger) output
    /// grid plays the input role.
    pub fn deconv(p: &ConvolutionParam, data: &[usize], out: &[usize]) -> Self {
        Self::new(&out[2..], &data[2..], &p.kernel, &p.stride, &p.pad)
    }

    /// Pooling, with global pooling covering the whole plane.
    pub fn pool(p: &PoolingParam, data: &[usize], out: &[usize]) -> Self {
        if p.global_pool {
            let spatial = &data[2..];
            let ones = vec![1; spatial.len()];
            let zeros = vec![0; spatial.len()];
            return Self::new(spatial, &out[2..], spatial, &ones, &zeros);
        }
        Self::new(&data[2..], &out[2..], &p.kernel, &p.stride, &p.pad)
    }

    pub fn input_size(&self) -> usize {
        self.input.iter().product()
    }

    pub fn output_size(&self) -> usize {
        self.output.iter().product()
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel.iter().product()
    }

    /// Input coordinate along `axis`, or `None` inside the padding.
    #[inline]
    pub fn source(&self, axis: usize, o: usize, k: usize) -> Option<usize> {
        (o * self.stride[axis] + k)
            .checked_sub(self.pad[axis])
            .filter(|&i| i < self.input[axis])
    }

    /// Flat input index for flat output position `o` and flat kernel offset `k`.
    #[inline]
    pub fn source_flat(&self, o: usize, k: usize) -> Option<usize> {
        let [_, oh, ow] = self.output;
        let [_, kh, kw] = self.kernel;
        let (od, oy, ox) = (o / (oh * ow), (o / ow) % oh, o % ow);
        let (kd, ky, kx) = (k / (kh * kw), (k / kw) % kh, k % kw);
        let d = self.source(0, od, kd)?;
        let y = self.source(1, oy, ky)?;
        let x = self.source(2, ox, kx)?;
        Some((d * self.input[1] + y) * self.input[2] + x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_dimensional_windows_are_lifted() {
        let w = Window::new(&[5], &[3], &[3], &[2], &[1]);
        assert_eq!(w.input, [1, 1, 5]);
        assert_eq!(w.kernel, [1, 1, 3]);
        assert_eq!(w.source_flat(0, 0), None);
        assert_eq!(w.source_flat(0, 1), Some(0));
        assert_eq!(w.source_flat(2, 1), Some(4));
        assert_eq!(w.source_flat(2, 2), None);
        assert_eq!(w.source_flat(2, 0), Some(3));
    }

    #[test]
    fn padding_is_excluded_on_both_edges() {
        let w = Window::new(&[3, 3], &[3, 3], &[3, 3], &[1, 1], &[1, 1]);
        // top-left output reads only the 2x2 interior corner
        let hits = (0..9).filter_map(|k| w.source_flat(0, k)).collect::<Vec<_>>();
        assert_eq!(hits, vec![0, 1, 3, 4]);
    }
}
