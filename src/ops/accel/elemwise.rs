use rayon::prelude::*;

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
use std::arch::x86_64::*;

use crate::ops::generic::{activate, activate_grad};
use crate::ops::params::{ActType, ActivationParam};
use crate::tensors::{Ten32, Tensor};

/// Elements handed to one rayon task.
const GRAIN: usize = 1024;

pub fn copy(x: &Ten32) -> Ten32 {
    let mut data = vec![0.0; x.size()];
    data.par_chunks_mut(GRAIN)
        .zip(x.data.par_chunks(GRAIN))
        .for_each(|(dst, src)| dst.copy_from_slice(src));
    Tensor::new(x.shape.clone(), data)
}

fn relu_chunk(dst: &mut [f32], src: &[f32]) {
    #[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
    {
        let lanes = src.len() / 8 * 8;
        unsafe {
            let zero = _mm256_setzero_ps();
            for i in (0..lanes).step_by(8) {
                let v = _mm256_loadu_ps(src.as_ptr().add(i));
                _mm256_storeu_ps(dst.as_mut_ptr().add(i), _mm256_max_ps(v, zero));
            }
        }
        for i in lanes..src.len() {
            dst[i] = activate(ActType::Relu, src[i]);
        }
    }

    #[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2")))]
    {
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = activate(ActType::Relu, s);
        }
    }
}

pub fn activation(p: &ActivationParam, x: &Ten32) -> Ten32 {
    let mut data = vec![0.0; x.size()];
    data.par_chunks_mut(GRAIN)
        .zip(x.data.par_chunks(GRAIN))
        .for_each(|(dst, src)| match p.act_type {
            ActType::Relu => relu_chunk(dst, src),
            act => {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = activate(act, s);
                }
            }
        });
    Tensor::new(x.shape.clone(), data)
}

pub fn activation_backward(p: &ActivationParam, grad: &Ten32, x: &Ten32) -> Ten32 {
    let data = x
        .data
        .par_iter()
        .zip(grad.data.par_iter())
        .with_min_len(GRAIN)
        .map(|(&v, &g)| activate_grad(p.act_type, v, g))
        .collect();
    Tensor::new(x.shape.clone(), data)
}

pub fn add(a: &Ten32, b: &Ten32) -> Ten32 {
    let data = a
        .data
        .par_iter()
        .zip(b.data.par_iter())
        .with_min_len(GRAIN)
        .map(|(&x, &y)| x + y)
        .collect();
    Tensor::new(a.shape.clone(), data)
}

pub fn add_backward(grad: &Ten32) -> (Ten32, Ten32) {
    let (a, b) = rayon::join(|| copy(grad), || copy(grad));
    (a, b)
}
