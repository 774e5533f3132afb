use crate::ops::params::{PoolType, PoolingParam};
use crate::ops::window::Window;
use crate::tensors::{Ten32, Tensor};

/// Reduces the window at output position `o` of one plane.
///
/// Returns the pooled value and, for max pooling, the flat plane index of the
/// first maximum. Padded taps never win a max and count as zero in sums.
fn reduce_window(
    pool_type: PoolType,
    win: &Window,
    plane: &[f32],
    o: usize,
) -> (f32, Option<usize>) {
    let taps = (0..win.kernel_size()).filter_map(|k| win.source_flat(o, k));
    match pool_type {
        PoolType::Max => {
            let mut best = f32::NEG_INFINITY;
            let mut arg = None;
            for i in taps {
                if arg.is_none() || plane[i] > best {
                    best = plane[i];
                    arg = Some(i);
                }
            }
            (if arg.is_some() { best } else { 0.0 }, arg)
        }
        PoolType::Avg => {
            let mut sum = 0.0;
            for i in taps {
                sum += plane[i];
            }
            (sum / win.kernel_size() as f32, None)
        }
        PoolType::Sum => {
            let mut sum = 0.0;
            for i in taps {
                sum += plane[i];
            }
            (sum, None)
        }
    }
}

/// Pools every `(n, c)` plane; the second output, when requested, holds the
/// argmax plane index of each max window.
pub fn pooling(p: &PoolingParam, x: &Ten32, out_shape: &[usize], with_workspace: bool) -> Vec<Ten32> {
    let win = Window::pool(p, &x.shape, out_shape);
    let (isz, osz) = (win.input_size(), win.output_size());
    let planes = x.shape[0] * x.shape[1];

    let mut out = vec![0.0; planes * osz];
    let mut workspace = vec![0.0; if with_workspace { planes * osz } else { 0 }];
    for plane in 0..planes {
        let src = &x.data[plane * isz..(plane + 1) * isz];
        for o in 0..osz {
            let (value, arg) = reduce_window(p.pool_type, &win, src, o);
            out[plane * osz + o] = value;
            if with_workspace {
                workspace[plane * osz + o] = arg.map_or(-1.0, |i| i as f32);
            }
        }
    }

    let mut outs = vec![Tensor::new(out_shape.to_vec(), out)];
    if with_workspace {
        outs.push(Tensor::new(out_shape.to_vec(), workspace));
    }
    outs
}

/// Routes each output gradient back to the window it was pooled from.
/// Max windows are re-scanned on `x`.
pub fn pooling_backward(p: &PoolingParam, grad: &Ten32, x: &Ten32) -> Ten32 {
    let win = Window::pool(p, &x.shape, &grad.shape);
    let (isz, osz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let planes = x.shape[0] * x.shape[1];

    let mut dx = vec![0.0; x.size()];
    for plane in 0..planes {
        let src = &x.data[plane * isz..(plane + 1) * isz];
        let dst = &mut dx[plane * isz..(plane + 1) * isz];
        for o in 0..osz {
            let g = grad.data[plane * osz + o];
            match p.pool_type {
                PoolType::Max => {
                    if let (_, Some(i)) = reduce_window(PoolType::Max, &win, src, o) {
                        dst[i] += g;
                    }
                }
                PoolType::Avg | PoolType::Sum => {
                    let share = if p.pool_type == PoolType::Avg { g / ksz as f32 } else { g };
                    for k in 0..ksz {
                        if let Some(i) = win.source_flat(o, k) {
                            dst[i] += share;
                        }
                    }
                }
            }
        }
    }
    Tensor::new(x.shape.clone(), dx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(pool_type: PoolType) -> PoolingParam {
        PoolingParam {
            kernel: vec![2, 2],
            stride: vec![2, 2],
            pad: vec![0, 0],
            pool_type,
            global_pool: false,
        }
    }

    #[test]
    fn max_pool_records_first_argmax() {
        let x = Tensor::new(vec![1, 1, 2, 4], vec![1.0, 7.0, 2.0, 2.0, 7.0, 0.0, 2.0, 1.0]);
        let outs = pooling(&param(PoolType::Max), &x, &[1, 1, 1, 2], true);
        assert_eq!(outs[0].data, vec![7.0, 2.0]);
        assert_eq!(outs[1].data, vec![1.0, 2.0]);

        let g = Tensor::new(vec![1, 1, 1, 2], vec![1.0, 3.0]);
        let dx = pooling_backward(&param(PoolType::Max), &g, &x);
        assert_eq!(dx.data, vec![0.0, 1.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn average_counts_padding_in_the_divisor() {
        let mut p = param(PoolType::Avg);
        p.pad = vec![1, 1];
        let x = Tensor::new(vec![1, 1, 2, 2], vec![4.0; 4]);
        let out = pooling(&p, &x, &[1, 1, 2, 2], false);
        assert_eq!(out[0].data, vec![1.0; 4]);
    }
}
