use briny_dispatch::testing::attrs;
use briny_dispatch::testing::driver::{
    test_concat_op, test_conv_op, test_fully_connected_op, test_op, test_op_ex, test_pooling_op,
};
use briny_dispatch::testing::verify::*;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Kernel, stride and pad combinations where no window lies fully in the
/// padding.
fn windows(kernels: std::ops::RangeInclusive<usize>) -> Vec<(usize, usize, usize)> {
    let mut out = Vec::new();
    for kernel in kernels {
        for stride in 1..=2 {
            for pad in 0..=1 {
                if (kernel as f32) / 2.0 < pad as f32 {
                    continue;
                }
                out.push((kernel, stride, pad));
            }
        }
    }
    out
}

#[test]
fn copy_op() {
    init();
    let report = test_op(&attrs::copy_op().unwrap(), verify_copy_result).unwrap();
    assert!(report.verified > 0);
    assert!(report.skipped > 0, "views are never written in place");
}

#[test]
fn copy_backwards_op() {
    init();
    let report = test_op(&attrs::copy_backwards_op().unwrap(), verify_copy_result).unwrap();
    assert!(report.verified > 0);
}

#[test]
fn act_op() {
    init();
    let report = test_op(&attrs::relu_op().unwrap(), verify_act_result).unwrap();
    assert!(report.verified > 0);
}

#[test]
fn act_backwards_op() {
    init();
    let report = test_op(&attrs::relu_backwards_op().unwrap(), verify_act_backwards_result).unwrap();
    assert!(report.verified > 0);
}

#[test]
fn sum_op() {
    init();
    let report = test_op(&attrs::sum_op().unwrap(), verify_sum_result).unwrap();
    assert!(report.verified > 0);
}

#[test]
fn sum_backwards_op() {
    init();
    let report = test_op(&attrs::sum_backwards_op().unwrap(), verify_sum_backwards_result).unwrap();
    assert!(report.verified > 0);
}

#[test]
fn concat_op() {
    init();
    for num_inputs in 2..=3 {
        for dim in 0..=4 {
            let op = attrs::concat_op(num_inputs, dim).unwrap();
            let report = test_concat_op(&op, verify_concat_result, false).unwrap();
            if dim < 2 {
                assert!(report.verified > 0, "{num_inputs} inputs along {dim}");
            }
        }
    }
}

#[test]
fn concat_backwards_op() {
    init();
    for num_outputs in 2..=3 {
        for dim in 0..=4 {
            let op = attrs::concat_backwards_op(num_outputs, dim).unwrap();
            let report = test_concat_op(&op, verify_concat_backwards_result, true).unwrap();
            if dim < 2 {
                assert!(report.verified > 0, "{num_outputs} outputs along {dim}");
            }
        }
    }
}

#[test]
fn lrn_op() {
    init();
    let report = test_op_ex(&attrs::lrn_op().unwrap(), &attrs::lrn_backwards_op().unwrap()).unwrap();
    assert!(report.verified > 0);
}

#[test]
fn fully_connected_op() {
    init();
    let report = test_fully_connected_op(
        &attrs::fully_connected_op().unwrap(),
        &attrs::fully_connected_backwards_op().unwrap(),
    )
    .unwrap();
    assert!(report.verified > 0);
}

#[test]
fn pooling_op() {
    init();
    for dim in 2..=3 {
        for (kernel, stride, pad) in windows(1..=3) {
            let forward = attrs::pooling_op(kernel, dim, stride, pad).unwrap();
            let backward = attrs::pooling_backwards_op(kernel, dim, stride, pad).unwrap();
            let report = test_pooling_op(&forward, &backward).unwrap();
            assert!(report.verified > 0, "{dim}d kernel {kernel} stride {stride} pad {pad}");
        }
    }
}

#[test]
fn conv_op() {
    init();
    let dim = 2;
    for num_filters in 2..=2 {
        for (kernel, stride, pad) in windows(1..=3) {
            let forward = attrs::conv_op(kernel, num_filters, dim, stride, pad).unwrap();
            let backward = attrs::conv_backwards_op(kernel, num_filters, dim, stride, pad).unwrap();
            let report = test_conv_op(&forward, &backward, false).unwrap();
            assert!(report.verified > 0, "kernel {kernel} stride {stride} pad {pad}");
        }
    }
}

#[test]
fn deconv_op() {
    init();
    let dim = 2;
    for num_filters in 2..=2 {
        for (kernel, stride, pad) in windows(1..=2) {
            let forward = attrs::deconv_op(kernel, num_filters, dim, stride, pad).unwrap();
            let backward = attrs::deconv_backwards_op(kernel, num_filters, dim, stride, pad).unwrap();
            let report = test_conv_op(&forward, &backward, true).unwrap();
            assert!(report.verified > 0, "kernel {kernel} stride {stride} pad {pad}");
        }
    }
}
