use std::slice;

use briny_dispatch::array::NdArray;
use briny_dispatch::backend::DispatchMode;
use briny_dispatch::engine::{Engine, EngineKind};
use briny_dispatch::error::OpError;
use briny_dispatch::imperative::{Context, Imperative, OpReqType};
use briny_dispatch::ops::dispatch::runs_accelerated;
use briny_dispatch::ops::NodeAttrs;
use briny_dispatch::tensors::Tensor;

fn invoke(
    imp: &Imperative<'_>,
    attrs: &NodeAttrs,
    inputs: &[NdArray],
    outputs: &[NdArray],
    mode: DispatchMode,
) {
    let req = vec![OpReqType::WriteTo; outputs.len()];
    imp.invoke_op(&Context::cpu(), attrs, inputs, outputs, &req, mode).unwrap();
}

#[test]
fn test_engine_kind_parsing() {
    assert_eq!("NaiveEngine".parse::<EngineKind>().unwrap(), EngineKind::Naive);
    assert_eq!("ThreadedEnginePerDevice".parse::<EngineKind>().unwrap(), EngineKind::Threaded);
    assert!(matches!("gpu".parse::<EngineKind>(), Err(OpError::Engine(_))));
}

#[test]
fn test_padded_avg_pooling_falls_back_to_generic() {
    let mut attrs = NodeAttrs::new("Pooling")
        .unwrap()
        .with("kernel", "(2,2)")
        .with("pad", "(1,1)")
        .with("pool_type", "avg");
    let params = attrs.parse().unwrap().clone();
    assert!(!runs_accelerated(attrs.op, &params, DispatchMode::Accelerated));

    let engine = Engine::new(EngineKind::Naive).unwrap();
    let imp = Imperative::new(&engine);
    let x = NdArray::from_tensor(&Tensor::new(vec![1, 1, 2, 2], vec![4.0, 8.0, 12.0, 16.0]));
    let a = NdArray::zeros(vec![1, 1, 3, 3]);
    let b = NdArray::zeros(vec![1, 1, 3, 3]);
    invoke(&imp, &attrs, slice::from_ref(&x), slice::from_ref(&a), DispatchMode::Generic);
    invoke(&imp, &attrs, slice::from_ref(&x), slice::from_ref(&b), DispatchMode::Accelerated);
    engine.wait_for_all().unwrap();
    assert_eq!(a.to_vec(), b.to_vec());
}

#[test]
fn test_conv_with_1d_kernel_falls_back_to_generic() {
    let mut attrs = NodeAttrs::new("Convolution")
        .unwrap()
        .with("kernel", "(2)")
        .with("num_filter", 1)
        .with("no_bias", "true");
    let params = attrs.parse().unwrap().clone();
    assert!(!runs_accelerated(attrs.op, &params, DispatchMode::Accelerated));
    assert!(!runs_accelerated(attrs.op, &params, DispatchMode::Generic));

    let imp = Imperative::get();
    let x = NdArray::from_tensor(&Tensor::new(vec![1, 1, 4], vec![1.0, 2.0, 3.0, 4.0]));
    let w = NdArray::from_tensor(&Tensor::new(vec![1, 1, 2], vec![1.0, -1.0]));
    let y = NdArray::zeros(vec![1, 1, 3]);
    invoke(&imp, &attrs, &[x, w], slice::from_ref(&y), DispatchMode::Accelerated);
    imp.engine().wait_for_all().unwrap();
    assert_eq!(y.to_vec(), vec![-1.0, -1.0, -1.0]);
}

#[test]
fn test_accelerated_output_keeps_blocked_layout() {
    let engine = Engine::new(EngineKind::Threaded).unwrap();
    let imp = Imperative::new(&engine);
    let attrs = NodeAttrs::new("Activation").unwrap().with("act_type", "relu");
    let t = Tensor::new(vec![1, 4, 1, 2], vec![-1.0, 1.0, -2.0, 2.0, -3.0, 3.0, -4.0, 4.0]);
    let x = NdArray::from_tensor(&t);
    let y = NdArray::from_tensor_blocked(&Tensor::zeros(vec![1, 4, 1, 2]), 4).unwrap();
    invoke(&imp, &attrs, &[x], slice::from_ref(&y), DispatchMode::Accelerated);
    engine.wait_for_all().unwrap();
    assert!(y.is_blocked());
    assert_eq!(y.to_vec(), vec![0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0]);
}

#[test]
fn test_concat_then_split_restores_inputs() {
    let imp = Imperative::get();
    let a = NdArray::from_tensor(&Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]));
    let b = NdArray::from_tensor(&Tensor::new(vec![2, 2], vec![5.0, 6.0, 7.0, 8.0]));
    let joined = NdArray::zeros(vec![2, 4]);
    let concat = NodeAttrs::new("concat").unwrap().with("num_args", 2).with("dim", 1);
    invoke(&imp, &concat, &[a.clone(), b.clone()], slice::from_ref(&joined), DispatchMode::Accelerated);

    let parts = [NdArray::zeros(vec![2, 2]), NdArray::zeros(vec![2, 2])];
    let split = NodeAttrs::new("_backward_Concat").unwrap().with("num_args", 2).with("dim", 1);
    invoke(&imp, &split, slice::from_ref(&joined), &parts, DispatchMode::Generic);
    imp.engine().wait_for_all().unwrap();

    assert_eq!(joined.to_vec(), vec![1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0]);
    assert_eq!(parts[0].to_vec(), a.to_vec());
    assert_eq!(parts[1].to_vec(), b.to_vec());
}
