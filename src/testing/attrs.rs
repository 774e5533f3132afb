//! Operator descriptors for the drivers.
//!
//! An [`OpAttrs`] bundles an operator's attributes with the arities, dispatch
//! modes, write requests and array variants a driver should exercise.

use crate::backend::DispatchMode;
use crate::error::OpError;
use crate::imperative::OpReqType;
use crate::ops::registry::NodeAttrs;
use crate::testing::arrays::{create_shape_string, ArrayTypes};

/// What a driver runs for one operator.
#[derive(Debug, Clone)]
pub struct OpAttrs {
    /// Operator and parsed attributes.
    pub attrs: NodeAttrs,
    /// Inputs passed per invocation.
    pub num_inputs: usize,
    /// Outputs written per invocation.
    pub num_outputs: usize,
    /// Dispatch modes to run.
    pub dispatches: Vec<DispatchMode>,
    /// Write requests to exercise.
    pub requests: Vec<OpReqType>,
    /// Input variants.
    pub input_types: ArrayTypes,
    /// Output variants.
    pub output_types: ArrayTypes,
}

impl OpAttrs {
    fn new(name: &str, num_inputs: usize, num_outputs: usize) -> Result<Self, OpError> {
        Ok(Self {
            attrs: NodeAttrs::new(name)?,
            num_inputs,
            num_outputs,
            dispatches: Vec::new(),
            requests: Vec::new(),
            input_types: ArrayTypes::ALL,
            output_types: ArrayTypes::ALL,
        })
    }

    fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attrs.insert(key, value);
        self
    }

    fn parsed(mut self) -> Result<Self, OpError> {
        self.attrs.parse()?;
        Ok(self)
    }

    fn both_dispatches(mut self) -> Self {
        self.dispatches = DispatchMode::ALL.to_vec();
        self
    }

    fn all_requests(mut self) -> Self {
        self.requests = vec![OpReqType::WriteTo, OpReqType::WriteInplace, OpReqType::AddTo];
        self
    }

    fn write_to(mut self) -> Self {
        self.requests = vec![OpReqType::WriteTo];
        self
    }

    fn types(mut self, input: ArrayTypes, output: ArrayTypes) -> Self {
        self.input_types = input;
        self.output_types = output;
        self
    }

    /// Whether `req` should be exercised.
    #[must_use]
    pub fn wants(&self, req: OpReqType) -> bool {
        self.requests.contains(&req)
    }

    /// The raw value of a `usize` attribute, if present and numeric.
    #[must_use]
    pub fn usize_attr(&self, key: &str) -> Option<usize> {
        self.attrs.get(key)?.trim().parse().ok()
    }
}

fn elemwise(name: &str, num_inputs: usize, num_outputs: usize) -> Result<OpAttrs, OpError> {
    Ok(OpAttrs::new(name, num_inputs, num_outputs)?
        .both_dispatches()
        .all_requests())
}

fn spatial(attrs: OpAttrs, kernel: usize, dim: usize, stride: usize, pad: usize) -> OpAttrs {
    attrs
        .attr("kernel", create_shape_string(kernel, dim))
        .attr("stride", create_shape_string(stride, dim))
        .attr("pad", create_shape_string(pad, dim))
}

const LRN_TYPES: ArrayTypes = ArrayTypes::NORMAL
    .union(ArrayTypes::BLOCKED)
    .union(ArrayTypes::NORMAL_RESHAPED)
    .union(ArrayTypes::BLOCKED_RESHAPED);

const CONV_INPUT_TYPES: ArrayTypes = LRN_TYPES
    .union(ArrayTypes::NORMAL_REUSED)
    .union(ArrayTypes::BLOCKED_REUSED)
    .union(ArrayTypes::NORMAL_RESHAPED_REUSED);

const CONV_OUTPUT_TYPES: ArrayTypes = CONV_INPUT_TYPES.union(ArrayTypes::NORMAL_REUSED_DIFF_DTYPE);

/// `_copy`.
///
/// # Errors
/// Registry failures.
pub fn copy_op() -> Result<OpAttrs, OpError> {
    elemwise("_copy", 1, 1)
}

/// `_backward_copy`.
///
/// # Errors
/// Registry failures.
pub fn copy_backwards_op() -> Result<OpAttrs, OpError> {
    elemwise("_backward_copy", 1, 1)
}

/// `Activation` with ReLU.
///
/// # Errors
/// Registry or attribute failures.
pub fn relu_op() -> Result<OpAttrs, OpError> {
    elemwise("Activation", 1, 1)?.attr("act_type", "relu").parsed()
}

/// `_backward_Activation` with ReLU: inputs are the output gradient and the
/// forward input.
///
/// # Errors
/// Registry or attribute failures.
pub fn relu_backwards_op() -> Result<OpAttrs, OpError> {
    elemwise("_backward_Activation", 2, 1)?
        .attr("act_type", "relu")
        .parsed()
}

/// `elemwise_add`.
///
/// # Errors
/// Registry failures.
pub fn sum_op() -> Result<OpAttrs, OpError> {
    elemwise("elemwise_add", 2, 1)
}

/// `_backward_add`.
///
/// # Errors
/// Registry failures.
pub fn sum_backwards_op() -> Result<OpAttrs, OpError> {
    elemwise("_backward_add", 1, 2)
}

/// `concat` of `num_args` inputs along `dim`.
///
/// # Errors
/// Registry or attribute failures.
pub fn concat_op(num_args: usize, dim: usize) -> Result<OpAttrs, OpError> {
    OpAttrs::new("concat", num_args, 1)?
        .attr("num_args", num_args)
        .attr("dim", dim)
        .parsed()
        .map(OpAttrs::both_dispatches)
}

/// `_backward_Concat`: one joined gradient split into `num_args` pieces.
///
/// # Errors
/// Registry or attribute failures.
pub fn concat_backwards_op(num_args: usize, dim: usize) -> Result<OpAttrs, OpError> {
    OpAttrs::new("_backward_Concat", 1, num_args)?
        .attr("num_args", num_args)
        .attr("dim", dim)
        .parsed()
        .map(OpAttrs::both_dispatches)
}

/// Max `Pooling` with a `dim`-d window. Two-dimensional windows also
/// output the argmax workspace.
///
/// # Errors
/// Registry or attribute failures.
pub fn pooling_op(kernel: usize, dim: usize, stride: usize, pad: usize) -> Result<OpAttrs, OpError> {
    let num_outputs = if dim == 2 { 2 } else { 1 };
    spatial(OpAttrs::new("Pooling", 1, num_outputs)?, kernel, dim, stride, pad)
        .attr("pool_type", "max")
        .parsed()
}

/// `_backward_Pooling` matching [`pooling_op`].
///
/// # Errors
/// Registry or attribute failures.
pub fn pooling_backwards_op(
    kernel: usize,
    dim: usize,
    stride: usize,
    pad: usize,
) -> Result<OpAttrs, OpError> {
    let num_inputs = if dim == 2 { 5 } else { 3 };
    spatial(OpAttrs::new("_backward_Pooling", num_inputs, 1)?, kernel, dim, stride, pad)
        .attr("pool_type", "max")
        .parsed()
}

/// `LRN` over 3 channels.
///
/// # Errors
/// Registry or attribute failures.
pub fn lrn_op() -> Result<OpAttrs, OpError> {
    Ok(OpAttrs::new("LRN", 1, 2)?
        .attr("nsize", 3)
        .parsed()?
        .both_dispatches()
        .write_to()
        .types(LRN_TYPES, LRN_TYPES))
}

/// `_backward_LRN` matching [`lrn_op`].
///
/// # Errors
/// Registry or attribute failures.
pub fn lrn_backwards_op() -> Result<OpAttrs, OpError> {
    Ok(OpAttrs::new("_backward_LRN", 3, 1)?
        .attr("nsize", 3)
        .parsed()?
        .both_dispatches()
        .write_to())
}

/// `FullyConnected` with 20 hidden units and a bias.
///
/// # Errors
/// Registry or attribute failures.
pub fn fully_connected_op() -> Result<OpAttrs, OpError> {
    Ok(OpAttrs::new("FullyConnected", 3, 1)?
        .attr("num_hidden", 20)
        .parsed()?
        .write_to()
        .types(LRN_TYPES, LRN_TYPES))
}

/// `_backward_FullyConnected` matching [`fully_connected_op`].
///
/// # Errors
/// Registry or attribute failures.
pub fn fully_connected_backwards_op() -> Result<OpAttrs, OpError> {
    Ok(OpAttrs::new("_backward_FullyConnected", 3, 3)?
        .attr("num_hidden", 20)
        .parsed()?
        .write_to())
}

/// `Convolution` with a bias.
///
/// # Errors
/// Registry or attribute failures.
pub fn conv_op(
    kernel: usize,
    num_filters: usize,
    dim: usize,
    stride: usize,
    pad: usize,
) -> Result<OpAttrs, OpError> {
    Ok(spatial(OpAttrs::new("Convolution", 3, 1)?, kernel, dim, stride, pad)
        .attr("num_filter", num_filters)
        .parsed()?
        .types(CONV_INPUT_TYPES, CONV_OUTPUT_TYPES))
}

/// `_backward_Convolution` matching [`conv_op`].
///
/// # Errors
/// Registry or attribute failures.
pub fn conv_backwards_op(
    kernel: usize,
    num_filters: usize,
    dim: usize,
    stride: usize,
    pad: usize,
) -> Result<OpAttrs, OpError> {
    spatial(OpAttrs::new("_backward_Convolution", 4, 3)?, kernel, dim, stride, pad)
        .attr("num_filter", num_filters)
        .parsed()
}

/// `Deconvolution` (no bias).
///
/// # Errors
/// Registry or attribute failures.
pub fn deconv_op(
    kernel: usize,
    num_filters: usize,
    dim: usize,
    stride: usize,
    pad: usize,
) -> Result<OpAttrs, OpError> {
    Ok(spatial(OpAttrs::new("Deconvolution", 2, 1)?, kernel, dim, stride, pad)
        .attr("num_filter", num_filters)
        .parsed()?
        .types(CONV_INPUT_TYPES, CONV_OUTPUT_TYPES))
}

/// `_backward_Deconvolution` matching [`deconv_op`].
///
/// # Errors
/// Registry or attribute failures.
pub fn deconv_backwards_op(
    kernel: usize,
    num_filters: usize,
    dim: usize,
    stride: usize,
    pad: usize,
) -> Result<OpAttrs, OpError> {
    spatial(OpAttrs::new("_backward_Deconvolution", 3, 2)?, kernel, dim, stride, pad)
        .attr("num_filter", num_filters)
        .parsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_arities_match_the_registry() {
        let all = [
            copy_op(),
            copy_backwards_op(),
            relu_op(),
            relu_backwards_op(),
            sum_op(),
            sum_backwards_op(),
            concat_op(3, 1),
            concat_backwards_op(2, 0),
            pooling_op(2, 2, 1, 1),
            pooling_backwards_op(2, 2, 1, 1),
            pooling_op(3, 3, 2, 0),
            pooling_backwards_op(3, 3, 2, 0),
            lrn_op(),
            lrn_backwards_op(),
            fully_connected_op(),
            fully_connected_backwards_op(),
            conv_op(3, 2, 2, 1, 1),
            conv_backwards_op(3, 2, 2, 1, 1),
            deconv_op(2, 2, 2, 2, 0),
            deconv_backwards_op(2, 2, 2, 2, 0),
        ];
        for attrs in all {
            let attrs = attrs.unwrap();
            let params = attrs.attrs.resolved_params().unwrap();
            let op = attrs.attrs.op;
            assert_eq!(op.num_inputs(&params), attrs.num_inputs, "{}", op.name);
            assert_eq!(op.num_outputs(&params), attrs.num_outputs, "{}", op.name);
        }
    }

    #[test]
    fn elementwise_ops_exercise_every_request() {
        let attrs = sum_op().unwrap();
        assert!(attrs.wants(OpReqType::AddTo));
        assert!(!lrn_op().unwrap().wants(OpReqType::AddTo));
        assert_eq!(attrs.dispatches, DispatchMode::ALL);
    }
}
