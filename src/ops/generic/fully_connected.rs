use crate::ops::params::FullyConnectedParam;
use crate::tensors::{Ten32, Tensor};

/// `(rows, features, hidden)` of a fully connected invocation.
fn dims(x: &Ten32, weight: &Ten32) -> (usize, usize, usize) {
    let (hidden, k) = (weight.shape[0], weight.shape[1]);
    (x.size() / k, k, hidden)
}

/// `out = x · weightᵀ + bias`, with `x` viewed as `rows × features`.
pub fn forward(x: &Ten32, weight: &Ten32, bias: Option<&Ten32>, out_shape: &[usize]) -> Ten32 {
    let (m, k, h) = dims(x, weight);
    let mut out = vec![0.0; m * h];
    for i in 0..m {
        for j in 0..h {
            let mut sum = 0.0;
            for l in 0..k {
                sum += x.data[i * k + l] * weight.data[j * k + l];
            }
            out[i * h + j] = match bias {
                Some(b) => sum + b.data[j],
                None => sum,
            };
        }
    }
    Tensor::new(out_shape.to_vec(), out)
}

/// Returns `[dx, dweight]`, plus `dbias` unless the layer has no bias.
pub fn backward(p: &FullyConnectedParam, grad: &Ten32, x: &Ten32, weight: &Ten32) -> Vec<Ten32> {
    let (m, k, h) = dims(x, weight);

    let mut dx = vec![0.0; m * k];
    for i in 0..m {
        for l in 0..k {
            let mut sum = 0.0;
            for j in 0..h {
                sum += grad.data[i * h + j] * weight.data[j * k + l];
            }
            dx[i * k + l] = sum;
        }
    }

    let mut dw = vec![0.0; h * k];
    for j in 0..h {
        for l in 0..k {
            let mut sum = 0.0;
            for i in 0..m {
                sum += grad.data[i * h + j] * x.data[i * k + l];
            }
            dw[j * k + l] = sum;
        }
    }

    let mut grads = vec![
        Tensor::new(x.shape.clone(), dx),
        Tensor::new(weight.shape.clone(), dw),
    ];
    if !p.no_bias {
        let mut db = vec![0.0; h];
        for (j, slot) in db.iter_mut().enumerate() {
            for i in 0..m {
                *slot += grad.data[i * h + j];
            }
        }
        grads.push(Tensor::new(vec![h], db));
    }
    grads
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_layer() {
        let x = Tensor::new(vec![1, 2], vec![1.0, 2.0]);
        let w = Tensor::new(vec![2, 2], vec![1.0, 0.0, 3.0, -1.0]);
        let b = Tensor::new(vec![2], vec![0.5, 0.5]);
        let out = forward(&x, &w, Some(&b), &[1, 2]);
        assert_eq!(out.data, vec![1.5, 1.5]);

        let p = FullyConnectedParam { num_hidden: 2, no_bias: false, flatten: true };
        let g = Tensor::new(vec![1, 2], vec![1.0, 1.0]);
        let grads = backward(&p, &g, &x, &w);
        assert_eq!(grads[0].data, vec![4.0, -1.0]);
        assert_eq!(grads[1].data, vec![1.0, 2.0, 1.0, 2.0]);
        assert_eq!(grads[2].data, vec![1.0, 1.0]);
    }
}
