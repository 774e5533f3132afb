//! Convolution and deconvolution lowered to GEMM through im2col.
//!
//! Per batch item `n`, with `cols = im2col(x_n)` of shape `(C*K) × P`:
//!
//! - convolution: `y_n = W · cols`, `dW += g_n · colsᵀ`,
//!   `dx_n = col2im(Wᵀ · g_n)`
//! - deconvolution swaps the roles: `y_n = col2im(Wᵀ · x_n)`,
//!   `dx_n = W · im2col(g_n)`, `dW += x_n · im2col(g_n)ᵀ`

use rayon::prelude::*;

use super::gemm::{col2im, gemm, im2col, Mat};
use crate::ops::params::ConvolutionParam;
use crate::ops::window::Window;
use crate::tensors::{Ten32, Tensor};

fn add_bias(out: &mut [f32], bias: Option<&Ten32>, plane: usize) {
    let Some(b) = bias else { return };
    let filters = b.size();
    out.par_chunks_mut(plane).enumerate().for_each(|(idx, dst)| {
        let bf = b.data[idx % filters];
        for v in dst {
            *v += bf;
        }
    });
}

fn bias_grad(grad: &[f32], batch: usize, filters: usize, plane: usize) -> Vec<f32> {
    (0..filters)
        .into_par_iter()
        .map(|f| {
            let mut sum = 0.0;
            for n in 0..batch {
                let start = (n * filters + f) * plane;
                for g in &grad[start..start + plane] {
                    sum += g;
                }
            }
            sum
        })
        .collect()
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
    let (channels, filters) = (x.shape[1], p.num_filter);
    let w = Mat::new(&weight.data, filters, channels * ksz);

    let mut out = vec![0.0; x.shape[0] * filters * osz];
    out.par_chunks_mut(filters * osz)
        .zip(x.data.par_chunks(channels * isz))
        .for_each(|(dst, src)| {
            let cols = im2col(src, channels, &win);
            gemm(w, Mat::new(&cols, channels * ksz, osz), dst, false);
        });
    add_bias(&mut out, bias, osz);
    Tensor::new(out_shape.to_vec(), out)
}

pub fn conv_backward(p: &ConvolutionParam, grad: &Ten32, x: &Ten32, weight: &Ten32) -> Vec<Ten32> {
    let win = Window::conv(p, &x.shape, &grad.shape);
    let (isz, osz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let (batch, channels, filters) = (x.shape[0], x.shape[1], p.num_filter);
    let w = Mat::new(&weight.data, filters, channels * ksz);

    let mut dx = vec![0.0; x.size()];
    let mut dw = vec![0.0; weight.size()];
    for n in 0..batch {
        let src = &x.data[n * channels * isz..(n + 1) * channels * isz];
        let g = Mat::new(&grad.data[n * filters * osz..(n + 1) * filters * osz], filters, osz);

        let cols = im2col(src, channels, &win);
        gemm(g, Mat::new(&cols, channels * ksz, osz).t(), &mut dw, true);

        let mut dcols = vec![0.0; channels * ksz * osz];
        gemm(w.t(), g, &mut dcols, false);
        dx[n * channels * isz..(n + 1) * channels * isz]
            .copy_from_slice(&col2im(&dcols, channels, &win));
    }

    let mut grads = vec![
        Tensor::new(x.shape.clone(), dx),
        Tensor::new(weight.shape.clone(), dw),
    ];
    if !p.no_bias {
        grads.push(Tensor::new(vec![filters], bias_grad(&grad.data, batch, filters, osz)));
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
    let (channels, filters) = (x.shape[1], p.num_filter);
    let w = Mat::new(&weight.data, channels, filters * ksz);

    let mut out = vec![0.0; x.shape[0] * filters * osz];
    out.par_chunks_mut(filters * osz)
        .zip(x.data.par_chunks(channels * xsz))
        .for_each(|(dst, src)| {
            let mut cols = vec![0.0; filters * ksz * xsz];
            gemm(w.t(), Mat::new(src, channels, xsz), &mut cols, false);
            dst.copy_from_slice(&col2im(&cols, filters, &win));
        });
    add_bias(&mut out, bias, osz);
    Tensor::new(out_shape.to_vec(), out)
}

pub fn deconv_backward(p: &ConvolutionParam, grad: &Ten32, x: &Ten32, weight: &Ten32) -> Vec<Ten32> {
    let win = Window::deconv(p, &x.shape, &grad.shape);
    let (osz, xsz, ksz) = (win.input_size(), win.output_size(), win.kernel_size());
    let (batch, channels, filters) = (x.shape[0], x.shape[1], p.num_filter);
    let w = Mat::new(&weight.data, channels, filters * ksz);

    let mut dx = vec![0.0; x.size()];
    let mut dw = vec![0.0; weight.size()];
    for n in 0..batch {
        let src = Mat::new(&x.data[n * channels * xsz..(n + 1) * channels * xsz], channels, xsz);
        let g = &grad.data[n * filters * osz..(n + 1) * filters * osz];

        let gcols = im2col(g, filters, &win);
        let gcols = Mat::new(&gcols, filters * ksz, xsz);
        gemm(w, gcols, &mut dx[n * channels * xsz..(n + 1) * channels * xsz], false);
        gemm(src, gcols.t(), &mut dw, true);
    }

    let mut grads = vec![
        Tensor::new(x.shape.clone(), dx),
        Tensor::new(weight.shape.clone(), dw),
    ];
    if !p.no_bias {
        grads.push(Tensor::new(vec![filters], bias_grad(&grad.data, batch, filters, osz)));
    }
    grads
}
