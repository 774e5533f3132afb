use crate::ops::params::{ActType, ActivationParam};
use crate::tensors::{Ten32, Tensor};

/// Scalar activation.
#[inline]
pub(crate) fn activate(act: ActType, x: f32) -> f32 {
    match act {
        ActType::Relu => {
            if x > 0.0 { x } else { 0.0 }
        }
        ActType::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        ActType::Tanh => x.tanh(),
        ActType::SoftRelu => {
            if x > 20.0 { x } else { x.exp().ln_1p() }
        }
    }
}

/// Scalar activation gradient at input `x` for upstream gradient `g`.
#[inline]
pub(crate) fn activate_grad(act: ActType, x: f32, g: f32) -> f32 {
    match act {
        ActType::Relu => {
            if x > 0.0 { g } else { 0.0 }
        }
        ActType::Sigmoid => {
            let s = activate(ActType::Sigmoid, x);
            g * s * (1.0 - s)
        }
        ActType::Tanh => {
            let t = x.tanh();
            g * (1.0 - t * t)
        }
        ActType::SoftRelu => g * activate(ActType::Sigmoid, x),
    }
}

pub fn copy(x: &Ten32) -> Ten32 {
    x.clone()
}

pub fn activation(p: &ActivationParam, x: &Ten32) -> Ten32 {
    let mut data = Vec::with_capacity(x.size());
    for &v in &x.data {
        data.push(activate(p.act_type, v));
    }
    Tensor::new(x.shape.clone(), data)
}

pub fn activation_backward(p: &ActivationParam, grad: &Ten32, x: &Ten32) -> Ten32 {
    let mut data = Vec::with_capacity(x.size());
    for i in 0..x.size() {
        data.push(activate_grad(p.act_type, x.data[i], grad.data[i]));
    }
    Tensor::new(x.shape.clone(), data)
}

pub fn add(a: &Ten32, b: &Ten32) -> Ten32 {
    let mut data = Vec::with_capacity(a.size());
    for i in 0..a.size() {
        data.push(a.data[i] + b.data[i]);
    }
    Tensor::new(a.shape.clone(), data)
}

/// Both addends receive the upstream gradient unchanged.
pub fn add_backward(grad: &Ten32) -> (Ten32, Ten32) {
    (grad.clone(), grad.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_and_its_gradient() {
        let x = Tensor::new(vec![4], vec![-2.0, -0.0, 0.5, 3.0]);
        let p = ActivationParam { act_type: ActType::Relu };
        assert_eq!(activation(&p, &x).data, vec![0.0, 0.0, 0.5, 3.0]);

        let g = Tensor::new(vec![4], vec![1.0; 4]);
        assert_eq!(activation_backward(&p, &g, &x).data, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn smooth_activations_at_zero() {
        assert!((activate(ActType::Sigmoid, 0.0) - 0.5).abs() < 1e-7);
        assert!((activate(ActType::SoftRelu, 0.0) - 2f32.ln()).abs() < 1e-6);
        assert!((activate_grad(ActType::Tanh, 0.0, 2.0) - 2.0).abs() < 1e-7);
        assert!((activate_grad(ActType::Sigmoid, 0.0, 1.0) - 0.25).abs() < 1e-7);
    }
}
