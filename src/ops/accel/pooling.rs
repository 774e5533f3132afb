//! Pooling over a precomputed tap plan.
//!
//! The window geometry is identical for every `(n, c)` plane, so the input
//! offsets of each output position are computed once and shared by all
//! planes, which are then pooled in parallel.

use rayon::prelude::*;

use crate::ops::params::{PoolType, PoolingParam};
use crate::ops::window::Window;
use crate::tensors::{Ten32, Tensor};

/// Input taps of every output position in CSR form.
struct TapPlan {
    starts: Vec<usize>,
    taps: Vec<usize>,
    kernel_size: usize,
}

impl TapPlan {
    fn new(win: &Window) -> Self {
        let (osz, ksz) = (win.output_size(), win.kernel_size());
        let mut starts = Vec::with_capacity(osz + 1);
        let mut taps = Vec::with_capacity(osz * ksz);
        starts.push(0);
        for o in 0..osz {
            taps.extend((0..ksz).filter_map(|k| win.source_flat(o, k)));
            starts.push(taps.len());
        }
        Self { starts, taps, kernel_size: ksz }
    }

    #[inline]
    fn taps(&self, o: usize) -> &[usize] {
        &self.taps[self.starts[o]..self.starts[o + 1]]
    }

    fn outputs(&self) -> usize {
        self.starts.len() - 1
    }

    /// First maximum of the window, or `None` if it lies wholly in padding.
    fn argmax(&self, plane: &[f32], o: usize) -> Option<usize> {
        let mut best: Option<usize> = None;
        for &i in self.taps(o) {
            if best.is_none_or(|b| plane[i] > plane[b]) {
                best = Some(i);
            }
        }
        best
    }

    fn sum(&self, plane: &[f32], o: usize) -> f32 {
        let mut sum = 0.0;
        for &i in self.taps(o) {
            sum += plane[i];
        }
        sum
    }
}

pub fn pooling(p: &PoolingParam, x: &Ten32, out_shape: &[usize], with_workspace: bool) -> Vec<Ten32> {
    let win = Window::pool(p, &x.shape, out_shape);
    let plan = TapPlan::new(&win);
    let (isz, osz) = (win.input_size(), plan.outputs());
    let planes = x.shape[0] * x.shape[1];

    let pooled: Vec<(f32, f32)> = (0..planes * osz)
        .into_par_iter()
        .map(|idx| {
            let (plane, o) = (idx / osz, idx % osz);
            let src = &x.data[plane * isz..(plane + 1) * isz];
            match p.pool_type {
                PoolType::Max => match plan.argmax(src, o) {
                    Some(i) => (src[i], i as f32),
                    None => (0.0, -1.0),
                },
                PoolType::Avg => (plan.sum(src, o) / plan.kernel_size as f32, 0.0),
                PoolType::Sum => (plan.sum(src, o), 0.0),
            }
        })
        .collect();

    let (out, workspace): (Vec<f32>, Vec<f32>) = pooled.into_iter().unzip();
    let mut outs = vec![Tensor::new(out_shape.to_vec(), out)];
    if with_workspace {
        outs.push(Tensor::new(out_shape.to_vec(), workspace));
    }
    outs
}

/// Max gradients are routed through `workspace` when the forward pass
/// produced one, otherwise the windows are re-scanned.
pub fn pooling_backward(p: &PoolingParam, grad: &Ten32, x: &Ten32, workspace: Option<&Ten32>) -> Ten32 {
    let win = Window::pool(p, &x.shape, &grad.shape);
    let plan = TapPlan::new(&win);
    let (isz, osz) = (win.input_size(), plan.outputs());

    let mut dx = vec![0.0; x.size()];
    dx.par_chunks_mut(isz).enumerate().for_each(|(plane, dst)| {
        let src = &x.data[plane * isz..(plane + 1) * isz];
        let grads = &grad.data[plane * osz..(plane + 1) * osz];
        for (o, &g) in grads.iter().enumerate() {
            match p.pool_type {
                PoolType::Max => {
                    let arg = match workspace {
                        Some(ws) => usize::try_from(ws.data[plane * osz + o] as i64).ok(),
                        None => plan.argmax(src, o),
                    };
                    if let Some(i) = arg.filter(|&i| i < isz) {
                        dst[i] += g;
                    }
                }
                PoolType::Avg => {
                    let share = g / plan.kernel_size as f32;
                    for &i in plan.taps(o) {
                        dst[i] += share;
                    }
                }
                PoolType::Sum => {
                    for &i in plan.taps(o) {
                        dst[i] += g;
                    }
                }
            }
        }
    });
    Tensor::new(x.shape.clone(), dx)
}
