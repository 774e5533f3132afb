use rayon::prelude::*;

use super::gemm::{gemm, Mat};
use crate::ops::params::FullyConnectedParam;
use crate::tensors::{Ten32, Tensor};

/// `out = x · weightᵀ + bias` as one GEMM.
pub fn forward(x: &Ten32, weight: &Ten32, bias: Option<&Ten32>, out_shape: &[usize]) -> Ten32 {
    let (h, k) = (weight.shape[0], weight.shape[1]);
    let m = x.size() / k;

    let mut out = vec![0.0; m * h];
    gemm(Mat::new(&x.data, m, k), Mat::new(&weight.data, h, k).t(), &mut out, false);
    if let Some(b) = bias {
        out.par_chunks_mut(h).for_each(|row| {
            for (v, &bj) in row.iter_mut().zip(&b.data) {
                *v += bj;
            }
        });
    }
    Tensor::new(out_shape.to_vec(), out)
}

/// `dx = g · W`, `dW = gᵀ · x` and `db = column sums of g`.
pub fn backward(p: &FullyConnectedParam, grad: &Ten32, x: &Ten32, weight: &Ten32) -> Vec<Ten32> {
    let (h, k) = (weight.shape[0], weight.shape[1]);
    let m = x.size() / k;
    let g = Mat::new(&grad.data, m, h);

    let (dx, dw) = rayon::join(
        || {
            let mut dx = vec![0.0; m * k];
            gemm(g, Mat::new(&weight.data, h, k), &mut dx, false);
            dx
        },
        || {
            let mut dw = vec![0.0; h * k];
            gemm(g.t(), Mat::new(&x.data, m, k), &mut dw, false);
            dw
        },
    );

    let mut grads = vec![
        Tensor::new(x.shape.clone(), dx),
        Tensor::new(weight.shape.clone(), dw),
    ];
    if !p.no_bias {
        let db = (0..h)
            .into_par_iter()
            .map(|j| {
                let mut sum = 0.0;
                for i in 0..m {
                    sum += grad.data[i * h + j];
                }
                sum
            })
            .collect();
        grads.push(Tensor::new(vec![h], db));
    }
    grads
}
