use std::slice;

use briny_dispatch::array::NdArray;
use briny_dispatch::backend::DispatchMode;
use briny_dispatch::imperative::{Context, Imperative, OpReqType};
use briny_dispatch::ops::dispatch::runs_accelerated;
use briny_dispatch::ops::NodeAttrs;
use briny_dispatch::tensors::Tensor;
use briny_dispatch::testing::config::SuiteConfig;
use briny_dispatch::testing::verify::{assert_equal, verify_copy_result};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Integer ramp `i % period - offset`.
fn ramp(shape: &[usize], period: usize, offset: f32) -> NdArray {
    let n: usize = shape.iter().product();
    let data = (0..n).map(|i| (i % period) as f32 - offset).collect();
    NdArray::from_tensor(&Tensor::new(shape.to_vec(), data))
}

fn parsed(mut attrs: NodeAttrs) -> NodeAttrs {
    attrs.parse().unwrap();
    attrs
}

/// Runs `attrs` once per dispatch mode, returning `(generic, accelerated)`.
fn run_both(attrs: &NodeAttrs, inputs: &[NdArray]) -> (Vec<NdArray>, Vec<NdArray>) {
    let params = attrs.resolved_params().unwrap();
    let in_shapes: Vec<&[usize]> = inputs.iter().map(NdArray::shape).collect();
    let shapes = attrs.op.infer_shape(&params, &in_shapes, &[]).unwrap();
    let imp = Imperative::get();
    let mut runs = Vec::new();
    for mode in DispatchMode::ALL {
        let outs: Vec<NdArray> = shapes.iter().map(|s| NdArray::zeros(s.clone())).collect();
        let req = vec![OpReqType::WriteTo; outs.len()];
        imp.invoke_op(&Context::cpu(), attrs, inputs, &outs, &req, mode).unwrap();
        runs.push(outs);
    }
    imp.engine().wait_for_all().unwrap();
    let accelerated = runs.pop().unwrap();
    (runs.pop().unwrap(), accelerated)
}

fn assert_exact(attrs: &NodeAttrs, inputs: &[NdArray]) -> Vec<NdArray> {
    let (generic, accelerated) = run_both(attrs, inputs);
    assert_eq!(generic.len(), accelerated.len());
    for (g, a) in generic.iter().zip(&accelerated) {
        verify_copy_result(slice::from_ref(g), slice::from_ref(a))
            .unwrap_or_else(|e| panic!("{}: {e}", attrs.op.name));
    }
    generic
}

fn assert_close(attrs: &NodeAttrs, inputs: &[NdArray]) -> Vec<NdArray> {
    let tol = SuiteConfig::get().tolerance;
    let (generic, accelerated) = run_both(attrs, inputs);
    for (g, a) in generic.iter().zip(&accelerated) {
        assert_equal(slice::from_ref(g), slice::from_ref(a), tol.rtol, tol.atol)
            .unwrap_or_else(|e| panic!("{}: {e}", attrs.op.name));
    }
    generic
}

fn accelerated(attrs: &NodeAttrs) -> bool {
    runs_accelerated(attrs.op, &attrs.resolved_params().unwrap(), DispatchMode::Accelerated)
}

#[test]
fn test_avg_and_sum_pooling_agree() {
    init();
    let x = ramp(&[2, 3, 6, 6], 17, 8.0);
    for pool_type in ["avg", "sum"] {
        for (kernel, stride) in [("(2,2)", "(2,2)"), ("(3,3)", "(1,1)")] {
            let attrs = parsed(
                NodeAttrs::new("Pooling")
                    .unwrap()
                    .with("kernel", kernel)
                    .with("stride", stride)
                    .with("pool_type", pool_type),
            );
            assert!(accelerated(&attrs), "{pool_type} {kernel}");
            let out = assert_exact(&attrs, slice::from_ref(&x));

            let backward = parsed(
                NodeAttrs::new("_backward_Pooling")
                    .unwrap()
                    .with("kernel", kernel)
                    .with("stride", stride)
                    .with("pool_type", pool_type),
            );
            assert_close(&backward, &[out[0].clone(), x.clone(), out[0].clone()]);
        }
    }
}

#[test]
fn test_global_pooling_agrees() {
    init();
    let x = ramp(&[2, 3, 4, 5], 13, 6.0);
    for pool_type in ["max", "avg", "sum"] {
        let attrs = parsed(
            NodeAttrs::new("Pooling")
                .unwrap()
                .with("global_pool", "true")
                .with("pool_type", pool_type),
        );
        assert!(accelerated(&attrs), "{pool_type}");
        let out = assert_exact(&attrs, slice::from_ref(&x));
        assert_eq!(out[0].shape(), &[2, 3, 1, 1]);

        let backward = parsed(
            NodeAttrs::new("_backward_Pooling")
                .unwrap()
                .with("global_pool", "true")
                .with("pool_type", pool_type),
        );
        assert_close(&backward, &[out[0].clone(), x.clone(), out[0].clone()]);
    }
}

#[test]
fn test_smooth_activations_agree() {
    init();
    let x = ramp(&[3, 4, 5], 9, 4.0);
    let grad = ramp(&[3, 4, 5], 7, 3.0);
    for act_type in ["sigmoid", "tanh", "softrelu"] {
        let forward = NodeAttrs::new("Activation").unwrap().with("act_type", act_type);
        assert_close(&forward, slice::from_ref(&x));

        let backward = NodeAttrs::new("_backward_Activation").unwrap().with("act_type", act_type);
        assert_close(&backward, &[grad.clone(), x.clone()]);
    }
}

#[test]
fn test_fully_connected_variants_agree() {
    init();
    let x = ramp(&[3, 2, 4], 11, 5.0);
    for (no_bias, flatten) in [(true, true), (false, false), (true, false)] {
        let k = if flatten { 8 } else { 4 };
        let attrs = NodeAttrs::new("FullyConnected")
            .unwrap()
            .with("num_hidden", 5)
            .with("no_bias", no_bias)
            .with("flatten", flatten);
        let weight = ramp(&[5, k], 7, 3.0);
        let mut inputs = vec![x.clone(), weight.clone()];
        if !no_bias {
            inputs.push(ramp(&[5], 5, 2.0));
        }
        let out = assert_exact(&attrs, &inputs);
        let expected: &[usize] = if flatten { &[3, 5] } else { &[3, 2, 5] };
        assert_eq!(out[0].shape(), expected);

        let backward = NodeAttrs::new("_backward_FullyConnected")
            .unwrap()
            .with("num_hidden", 5)
            .with("no_bias", no_bias)
            .with("flatten", flatten);
        let grads = assert_exact(&backward, &[out[0].clone(), x.clone(), weight]);
        assert_eq!(grads.len(), if no_bias { 2 } else { 3 });
    }
}

#[test]
fn test_convolution_without_bias_agrees() {
    init();
    let attrs = parsed(
        NodeAttrs::new("Convolution")
            .unwrap()
            .with("kernel", "(3,3)")
            .with("pad", "(1,1)")
            .with("num_filter", 2)
            .with("no_bias", "true"),
    );
    assert!(accelerated(&attrs));
    let x = ramp(&[2, 3, 5, 5], 19, 9.0);
    let w = ramp(&[2, 3, 3, 3], 11, 5.0);
    let out = assert_exact(&attrs, &[x.clone(), w.clone()]);
    assert_eq!(out[0].shape(), &[2, 2, 5, 5]);

    let backward = NodeAttrs::new("_backward_Convolution")
        .unwrap()
        .with("kernel", "(3,3)")
        .with("pad", "(1,1)")
        .with("num_filter", 2)
        .with("no_bias", "true");
    let grads = assert_exact(&backward, &[out[0].clone(), x, w]);
    assert_eq!(grads.len(), 2);
}
