//! Direct convolution and deconvolution.
//!
//! Weights are `[F, C, k..]` for convolution and `[C, F, k..]` for
//! deconvolution, where `C` is the channel count of the data input.

use crate::ops::params::ConvolutionParam;
use crate::ops::window::Window;
use crate::tensors::{Ten32, Tensor};

fn add_bias(out: &mut [f32], bias: Option<&Ten32>, filters: usize, plane: usize) {
    let Some(b) = bias else { return };
    for (idx, v) in out.iter_mut().enumerate() {
        *v += b.data[(idx / plane) % filters];
    }
}

pub fn conv_forward(
    p: &ConvolutionParam,
    x: &Ten32,
    weight: &Ten32,
    bias: Option<&Ten32>,
    out_shape: &[usize],
) -> Ten32 {
    let win = Window::conv(p, &x.shape, out_shape);
    let (isz, osz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let (batch, channels, filters) = (x.shape[0], x.shape[1], p.num_filter);

    let mut out = vec![0.0; batch * filters * osz];
    for n in 0..batch {
        for f in 0..filters {
            for o in 0..osz {
                let mut sum = 0.0;
                for c in 0..channels {
                    for k in 0..ksz {
                        if let Some(i) = win.source_flat(o, k) {
                            sum += x.data[(n * channels + c) * isz + i]
                                * weight.data[(f * channels + c) * ksz + k];
                        }
                    }
                }
                out[(n * filters + f) * osz + o] = sum;
            }
        }
    }
    add_bias(&mut out, bias, filters, osz);
    Tensor::new(out_shape.to_vec(), out)
}

/// Returns `[dx, dweight]`, plus `dbias` unless the layer has no bias.
pub fn conv_backward(p: &ConvolutionParam, grad: &Ten32, x: &Ten32, weight: &Ten32) -> Vec<Ten32> {
    let win = Window::conv(p, &x.shape, &grad.shape);
    let (isz, osz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let (batch, channels, filters) = (x.shape[0], x.shape[1], p.num_filter);

    let mut dx = vec![0.0; x.size()];
    let mut dw = vec![0.0; weight.size()];
    let mut db = vec![0.0; filters];
    for n in 0..batch {
        for f in 0..filters {
            for o in 0..osz {
                let g = grad.data[(n * filters + f) * osz + o];
                db[f] += g;
                for c in 0..channels {
                    for k in 0..ksz {
                        if let Some(i) = win.source_flat(o, k) {
                            let xi = (n * channels + c) * isz + i;
                            let wi = (f * channels + c) * ksz + k;
                            dx[xi] += g * weight.data[wi];
                            dw[wi] += g * x.data[xi];
                        }
                    }
                }
            }
        }
    }

    let mut grads = vec![
        Tensor::new(x.shape.clone(), dx),
        Tensor::new(weight.shape.clone(), dw),
    ];
    if !p.no_bias {
        grads.push(Tensor::new(vec![filters], db));
    }
    grads
}

pub fn deconv_forward(
    p: &ConvolutionParam,
    x: &Ten32,
    weight: &Ten32,
    bias: Option<&Ten32>,
    out_shape: &[usize],
) -> Ten32 {
    let win = Window::deconv(p, &x.shape, out_shape);
    let (osz, xsz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let (batch, channels, filters) = (x.shape[0], x.shape[1], p.num_filter);

    let mut out = vec![0.0; batch * filters * osz];
    for n in 0..batch {
        for c in 0..channels {
            for i in 0..xsz {
                let v = x.data[(n * channels + c) * xsz + i];
                for f in 0..filters {
                    for k in 0..ksz {
                        if let Some(o) = win.source_flat(i, k) {
                            out[(n * filters + f) * osz + o] +=
                                v * weight.data[(c * filters + f) * ksz + k];
                        }
                    }
                }
            }
        }
    }
    add_bias(&mut out, bias, filters, osz);
    Tensor::new(out_shape.to_vec(), out)
}

/// Returns `[dx, dweight]`, plus `dbias` unless the layer has no bias.
pub fn deconv_backward(p: &ConvolutionParam, grad: &Ten32, x: &Ten32, weight: &Ten32) -> Vec<Ten32> {
    let win = Window::deconv(p, &x.shape, &grad.shape);
    let (osz, xsz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let (batch, channels, filters) = (x.shape[0], x.shape[1], p.num_filter);

    let mut dx = vec![0.0; x.size()];
    let mut dw = vec![0.0; weight.size()];
    for n in 0..batch {
        for c in 0..channels {
            for i in 0..xsz {
                let xi = (n * channels + c) * xsz + i;
                let mut sum = 0.0;
                for f in 0..filters {
                    for k in 0..ksz {
                        if let Some(o) = win.source_flat(i, k) {
                            let g = grad.data[(n * filters + f) * osz + o];
                            let wi = (c * filters + f) * ksz + k;
                            sum += g * weight.data[wi];
                            dw[wi] += g * x.data[xi];
                        }
                    }
                }
                dx[xi] = sum;
            }
        }
    }

    let mut grads = vec![
        Tensor::new(x.shape.clone(), dx),
        Tensor::new(weight.shape.clone(), dw),
    ];
    if !p.no_bias {
        let mut db = vec![0.0; filters];
        for n in 0..batch {
            for (f, slot) in db.iter_mut().enumerate() {
                let start = (n * filters + f) * osz;
                for g in &grad.data[start..start + osz] {
                    *slot += g;
                }
            }
        }
        grads.push(Tensor::new(vec![filters], db));
    }
    grads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(kernel: usize, stride: usize, pad: usize) -> ConvolutionParam {
        ConvolutionParam {
            kernel: vec![kernel, kernel],
            stride: vec![stride, stride],
            pad: vec![pad, pad],
            num_filter: 1,
            no_bias: false,
        }
    }

    #[test]
    fn box_filter_with_padding() {
        let p = param(3, 1, 1);
        let x = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let w = Tensor::new(vec![1, 1, 3, 3], vec![1.0; 9]);
        let b = Tensor::new(vec![1], vec![10.0]);
        let out = conv_forward(&p, &x, &w, Some(&b), &[1, 1, 2, 2]);
        assert_eq!(out.data, vec![20.0; 4]);

        let g = Tensor::new(vec![1, 1, 2, 2], vec![1.0; 4]);
        let grads = conv_backward(&p, &g, &x, &w);
        assert_eq!(grads[0].data, vec![4.0; 4]);
        assert_eq!(grads[2].data, vec![4.0]);
        // centre tap sees every pixel once
        assert_eq!(grads[1].data[4], 10.0);
    }

    #[test]
    fn deconvolution_spreads_each_input() {
        let p = param(2, 2, 0);
        let x = Tensor::new(vec![1, 1, 1, 2], vec![1.0, 2.0]);
        let w = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let out = deconv_forward(&p, &x, &w, None, &[1, 1, 2, 4]);
        assert_eq!(out.data, vec![1.0, 2.0, 2.0, 4.0, 3.0, 4.0, 6.0, 8.0]);

        let grads = deconv_backward(&p, &out, &x, &w);
        assert_eq!(grads[0].data, vec![30.0, 60.0]);
        assert_eq!(grads[2].data, vec![30.0]);
    }
}
