use crate::ops::params::LrnParam;
use crate::tensors::{Ten32, Tensor};

/// Channel window `[lo, hi]` of size `nsize` centred on `c`, clipped to `channels`.
#[inline]
pub(crate) fn channel_window(c: usize, nsize: usize, channels: usize) -> (usize, usize) {
    let half = nsize / 2;
    (c.saturating_sub(half), (c + half).min(channels - 1))
}

/// Returns `(out, norm)` where
/// `norm = knorm + alpha / nsize * sum(x^2 over the channel window)` and
/// `out = x * norm^-beta`.
pub fn lrn(p: &LrnParam, x: &Ten32) -> (Ten32, Ten32) {
    let (batch, channels) = (x.shape[0], x.shape[1]);
    let inner = x.size() / (batch * channels);
    let mut out = vec![0.0; x.size()];
    let mut norm = vec![0.0; x.size()];

    for n in 0..batch {
        for c in 0..channels {
            let (lo, hi) = channel_window(c, p.nsize, channels);
            for r in 0..inner {
                let mut sum = 0.0;
                for cc in lo..=hi {
                    let v = x.data[(n * channels + cc) * inner + r];
                    sum += v * v;
                }
                let idx = (n * channels + c) * inner + r;
                let scale = p.knorm + p.alpha / p.nsize as f32 * sum;
                norm[idx] = scale;
                out[idx] = x.data[idx] * scale.powf(-p.beta);
            }
        }
    }
    (
        Tensor::new(x.shape.clone(), out),
        Tensor::new(x.shape.clone(), norm),
    )
}

pub fn lrn_backward(p: &LrnParam, grad: &Ten32, x: &Ten32, norm: &Ten32) -> Ten32 {
    let (batch, channels) = (x.shape[0], x.shape[1]);
    let inner = x.size() / (batch * channels);
    let coeff = 2.0 * p.alpha * p.beta / p.nsize as f32;
    let mut dx = vec![0.0; x.size()];

    for n in 0..batch {
        for c in 0..channels {
            let (lo, hi) = channel_window(c, p.nsize, channels);
            for r in 0..inner {
                let mut cross = 0.0;
                for cc in lo..=hi {
                    let j = (n * channels + cc) * inner + r;
                    cross += grad.data[j] * x.data[j] * norm.data[j].powf(-p.beta - 1.0);
                }
                let idx = (n * channels + c) * inner + r;
                dx[idx] = grad.data[idx] * norm.data[idx].powf(-p.beta) - coeff * x.data[idx] * cross;
            }
        }
    }
    Tensor::new(x.shape.clone(), dx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_channel_window() {
        let p = LrnParam { nsize: 1, alpha: 1.0, beta: 1.0, knorm: 1.0 };
        let x = Tensor::new(vec![1, 1, 2], vec![1.0, 2.0]);
        let (out, norm) = lrn(&p, &x);
        assert_eq!(norm.data, vec![2.0, 5.0]);
        assert!((out.data[0] - 0.5).abs() < 1e-6);
        assert!((out.data[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn window_clips_at_channel_edges() {
        assert_eq!(channel_window(0, 5, 4), (0, 2));
        assert_eq!(channel_window(3, 5, 4), (1, 3));
        assert_eq!(channel_window(1, 1, 4), (1, 1));
    }
}
