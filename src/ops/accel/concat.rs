use rayon::prelude::*;

use crate::tensors::{shape_size, Ten32, Tensor};

fn inner_sizes<'a>(dim: usize, shapes: impl Iterator<Item = &'a [usize]>) -> Vec<usize> {
    shapes.map(|s| s[dim..].iter().product()).collect()
}

/// Each outer row of the output is assembled independently.
pub fn concat(dim: usize, inputs: &[Ten32], out_shape: &[usize]) -> Ten32 {
    let inner = inner_sizes(dim, inputs.iter().map(|t| t.shape.as_slice()));
    let row: usize = out_shape[dim..].iter().product();
    let mut data = vec![0.0; shape_size(out_shape)];
    if row > 0 {
        data.par_chunks_mut(row).enumerate().for_each(|(o, dst)| {
            let mut at = 0;
            for (t, &len) in inputs.iter().zip(&inner) {
                dst[at..at + len].copy_from_slice(&t.data[o * len..(o + 1) * len]);
                at += len;
            }
        });
    }
    Tensor::new(out_shape.to_vec(), data)
}

/// Each gradient piece is gathered independently.
pub fn concat_backward(dim: usize, grad: &Ten32, out_shapes: &[Vec<usize>]) -> Vec<Ten32> {
    let inner = inner_sizes(dim, out_shapes.iter().map(Vec::as_slice));
    let row: usize = inner.iter().sum();
    let outer: usize = grad.shape[..dim].iter().product();
    out_shapes
        .par_iter()
        .enumerate()
        .map(|(idx, shape)| {
            let (len, skip) = (inner[idx], inner[..idx].iter().sum::<usize>());
            let mut data = Vec::with_capacity(outer * len);
            for o in 0..outer {
                let start = o * row + skip;
                data.extend_from_slice(&grad.data[start..start + len]);
            }
            Tensor::new(shape.clone(), data)
        })
        .collect()
}
