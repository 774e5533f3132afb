use crate::tensors::{shape_size, Ten32, Tensor};

/// Joins `inputs` along `dim`.
pub fn concat(dim: usize, inputs: &[Ten32], out_shape: &[usize]) -> Ten32 {
    let outer: usize = out_shape[..dim].iter().product();
    let mut data = Vec::with_capacity(shape_size(out_shape));
    for o in 0..outer {
        for t in inputs {
            let inner: usize = t.shape[dim..].iter().product();
            data.extend_from_slice(&t.data[o * inner..(o + 1) * inner]);
        }
    }
    Tensor::new(out_shape.to_vec(), data)
}

/// Splits the gradient of a concatenation back into per-input pieces.
pub fn concat_backward(dim: usize, grad: &Ten32, out_shapes: &[Vec<usize>]) -> Vec<Ten32> {
    let outer: usize = grad.shape[..dim].iter().product();
    let mut parts: Vec<Vec<f32>> = out_shapes
        .iter()
        .map(|s| Vec::with_capacity(shape_size(s)))
        .collect();
    let mut pos = 0;
    for _ in 0..outer {
        for (part, shape) in parts.iter_mut().zip(out_shapes) {
            let inner: usize = shape[dim..].iter().product();
            part.extend_from_slice(&grad.data[pos..pos + inner]);
            pos += inner;
        }
    }
    parts
        .into_iter()
        .zip(out_shapes)
        .map(|(data, shape)| Tensor::new(shape.clone(), data))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_and_split_on_inner_axis() {
        let a = Tensor::new(vec![2, 1], vec![1.0, 2.0]);
        let b = Tensor::new(vec![2, 2], vec![3.0, 4.0, 5.0, 6.0]);
        let joined = concat(1, &[a.clone(), b.clone()], &[2, 3]);
        assert_eq!(joined.data, vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);

        let parts = concat_backward(1, &joined, &[vec![2, 1], vec![2, 2]]);
        assert_eq!(parts, vec![a, b]);
    }
}
