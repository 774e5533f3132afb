//! Reference kernels.
//!
//! Straight serial loops over row-major data, one function per operator
//! direction. These define the expected results: the accelerated path is
//! checked against them, and it falls back to them for any configuration
//! it does not cover.

mod concat;
mod convolution;
mod elemwise;
mod fully_connected;
mod lrn;
mod pooling;

pub(crate) use self::elemwise::{activate, activate_grad};
pub(crate) use self::lrn::channel_window;

use crate::error::OpError;
use crate::ops::params::OpParams;
use crate::ops::registry::{pooling_has_workspace, Op, OpKind};
use crate::tensors::Ten32;

/// Runs `op` serially.
///
/// `inputs` are already validated against the operator's arity and shape
/// rules; `out_shapes` are the inferred output shapes.
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
            let data = if pooling_has_workspace(p) { &inputs[2] } else { &inputs[1] };
            vec![pooling::pooling_backward(p, &inputs[0], data)]
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
