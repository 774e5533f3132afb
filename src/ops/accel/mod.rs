//! Accelerated kernels.
//!
//! # Accelerated Backend
//!
//! Parallel implementations of every registered operator, selected with
//! [`DispatchMode::Accelerated`](crate::backend::DispatchMode). Results are
//! expected to agree with the reference kernels in [`super::generic`] within
//! the verification tolerance.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Convolutions lowered to a packed GEMM through im2col
//! - Optional AVX2 ReLU (enabled via the `simd` feature flag)
//!
//! ## Coverage
//!
//! Not every configuration has an accelerated kernel; see [`supports`].
//! Unsupported configurations run on the reference kernels instead.

mod concat;
mod convolution;
mod elemwise;
mod fully_connected;
mod gemm;
mod lrn;
mod pooling;

use crate::error::OpError;
use crate::ops::params::{OpParams, PoolType};
use crate::ops::registry::{pooling_has_workspace, Op, OpKind};
use crate::tensors::Ten32;

/// Whether the accelerated path implements `op` under `params`.
///
/// Convolution and deconvolution are limited to 2-d kernels, and average or
/// sum pooling to unpadded windows. Everything else is covered.
#[must_use]
pub fn supports(op: &Op, params: &OpParams) -> bool {
    match (op.kind, params) {
        (OpKind::Pooling | OpKind::BackwardPooling, OpParams::Pooling(p)) => {
            p.global_pool || p.pool_type == PoolType::Max || p.pad.iter().all(|&x| x == 0)
        }
        (
            OpKind::Convolution | OpKind::BackwardConvolution,
            OpParams::Convolution(p),
        )
        | (
            OpKind::Deconvolution | OpKind::BackwardDeconvolution,
            OpParams::Deconvolution(p),
        ) => p.kernel.len() == 2,
        _ => true,
    }
}

/// Runs `op` on the parallel kernels. Callers check [`supports`] first.
pub(crate) fn compute(
    op: &Op,
    params: &OpParams,
    inputs: &[Ten32],
    out_shapes: &[Vec<usize>],
) -> Result<Vec<Ten32>, OpError> {
    let outs = match (op.kind, params) {
        (OpKind::Copy | OpKind::BackwardCopy, _) => vec![elemwise::copy(&inputs[0])],
        (OpKind::Activation, OpParams::Activation(p)) => vec![elemwise::activation(p, &inputs[0])],
        (OpKind::BackwardActivation, OpParams::Activation(p)) => {
            vec![elemwise::activation_backward(p, &inputs[0], &inputs[1])]
        }
        (OpKind::ElemwiseAdd, _) => vec![elemwise::add(&inputs[0], &inputs[1])],
        (OpKind::BackwardAdd, _) => {
            let (a, b) = elemwise::add_backward(&inputs[0]);
            vec![a, b]
        }
        (OpKind::Concat, OpParams::Concat(p)) => vec![concat::concat(p.dim, inputs, &out_shapes[0])],
        (OpKind::BackwardConcat, OpParams::Concat(p)) => {
            concat::concat_backward(p.dim, &inputs[0], out_shapes)
        }
        (OpKind::Pooling, OpParams::Pooling(p)) => {
            pooling::pooling(p, &inputs[0], &out_shapes[0], out_shapes.len() > 1)
        }
        (OpKind::BackwardPooling, OpParams::Pooling(p)) => {
            let grad = if pooling_has_workspace(p) {
                pooling::pooling_backward(p, &inputs[0], &inputs[2], Some(&inputs[4]))
            } else {
                pooling::pooling_backward(p, &inputs[0], &inputs[1], None)
            };
            vec![grad]
        }
        (OpKind::Lrn, OpParams::Lrn(p)) => {
            let (out, norm) = lrn::lrn(p, &inputs[0]);
            vec![out, norm]
        }
        (OpKind::BackwardLrn, OpParams::Lrn(p)) => {
            vec![lrn::lrn_backward(p, &inputs[0], &inputs[1], &inputs[2])]
        }
        (OpKind::FullyConnected, OpParams::FullyConnected(_)) => vec![fully_connected::forward(
            &inputs[0],
            &inputs[1],
            inputs.get(2),
            &out_shapes[0],
        )],
        (OpKind::BackwardFullyConnected, OpParams::FullyConnected(p)) => {
            fully_connected::backward(p, &inputs[0], &inputs[1], &inputs[2])
        }
        (OpKind::Convolution, OpParams::Convolution(p)) => vec![convolution::conv_forward(
            p,
            &inputs[0],
            &inputs[1],
            inputs.get(2),
            &out_shapes[0],
        )],
        (OpKind::BackwardConvolution, OpParams::Convolution(p)) => {
            convolution::conv_backward(p, &inputs[0], &inputs[1], &inputs[2])
        }
        (OpKind::Deconvolution, OpParams::Deconvolution(p)) => vec![convolution::deconv_forward(
            p,
            &inputs[0],
            &inputs[1],
            inputs.get(2),
            &out_shapes[0],
        )],
        (OpKind::BackwardDeconvolution, OpParams::Deconvolution(p)) => {
            convolution::deconv_backward(p, &inputs[0], &inputs[1], &inputs[2])
        }
        _ => return Err(OpError::UnparsedAttributes(op.name)),
    };
    Ok(outs)
}
