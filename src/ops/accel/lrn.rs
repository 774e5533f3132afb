use rayon::prelude::*;

use crate::ops::generic::channel_window;
use crate::ops::params::LrnParam;
use crate::tensors::{Ten32, Tensor};

/// Batch items are normalized in parallel.
pub fn lrn(p: &LrnParam, x: &Ten32) -> (Ten32, Ten32) {
    let (batch, channels) = (x.shape[0], x.shape[1]);
    let item = x.size() / batch;
    let inner = item / channels;

    let mut out = vec![0.0; x.size()];
    let mut norm = vec![0.0; x.size()];
    out.par_chunks_mut(item)
        .zip(norm.par_chunks_mut(item))
        .zip(x.data.par_chunks(item))
        .for_each(|((out, norm), src)| {
            for c in 0..channels {
                let (lo, hi) = channel_window(c, p.nsize, channels);
                for r in 0..inner {
                    let mut sum = 0.0;
                    for cc in lo..=hi {
                        let v = src[cc * inner + r];
                        sum += v * v;
                    }
                    let idx = c * inner + r;
                    let scale = p.knorm + p.alpha / p.nsize as f32 * sum;
                    norm[idx] = scale;
                    out[idx] = src[idx] * scale.powf(-p.beta);
                }
            }
        });
    (
        Tensor::new(x.shape.clone(), out),
        Tensor::new(x.shape.clone(), norm),
    )
}

/// The per-element factor `g * x * norm^(-beta - 1)` is computed once and
/// then summed over each channel window.
pub fn lrn_backward(p: &LrnParam, grad: &Ten32, x: &Ten32, norm: &Ten32) -> Ten32 {
    let channels = x.shape[1];
    let item = x.size() / x.shape[0];
    let inner = item / channels;
    let coeff = 2.0 * p.alpha * p.beta / p.nsize as f32;

    let factor: Vec<f32> = (0..x.size())
        .into_par_iter()
        .map(|j| grad.data[j] * x.data[j] * norm.data[j].powf(-p.beta - 1.0))
        .collect();

    let mut dx = vec![0.0; x.size()];
    dx.par_chunks_mut(item).enumerate().for_each(|(n, dst)| {
        let base = n * item;
        for c in 0..channels {
            let (lo, hi) = channel_window(c, p.nsize, channels);
            for r in 0..inner {
                let mut cross = 0.0;
                for cc in lo..=hi {
                    cross += factor[base + cc * inner + r];
                }
                let idx = c * inner + r;
                let j = base + idx;
                dst[idx] = grad.data[j] * norm.data[j].powf(-p.beta) - coeff * x.data[j] * cross;
            }
        }
    });
    Tensor::new(x.shape.clone(), dx)
}
