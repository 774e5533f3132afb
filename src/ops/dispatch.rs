//! Compute Dispatch Layer
//!
//! Selects the kernel set for each operator invocation from the requested
//! [`DispatchMode`].
//!
//! - `Accelerated` runs the parallel kernels when they cover the operator's
//!   configuration, and otherwise falls back to the reference kernels.
//! - `Generic` always runs the reference kernels.
//!
//! # Example
//! ```rust
//! use briny_dispatch::backend::DispatchMode;
//! use briny_dispatch::ops::{dispatch, NodeAttrs};
//! use briny_dispatch::tensors::Tensor;
//!
//! let mut attrs = NodeAttrs::new("Activation").unwrap().with("act_type", "relu");
//! let params = attrs.parse().unwrap().clone();
//! let x = Tensor::new(vec![2], vec![-1.0, 2.0]);
//! let out = dispatch::compute(attrs.op, &params, DispatchMode::Accelerated, &[x], &[vec![2]]).unwrap();
//! assert_eq!(out[0].data, vec![0.0, 2.0]);
//! ```

use crate::backend::DispatchMode;
use crate::error::OpError;
use crate::ops::params::OpParams;
use crate::ops::registry::Op;
use crate::ops::{accel, generic};
use crate::tensors::Ten32;

/// Whether `mode` would actually run accelerated kernels for `op`.
#[must_use]
pub fn runs_accelerated(op: &Op, params: &OpParams, mode: DispatchMode) -> bool {
    mode == DispatchMode::Accelerated && accel::supports(op, params)
}

/// Computes `op` on row-major inputs, returning one tensor per output.
///
/// `inputs` must already satisfy the operator's arity and shape rules and
/// `out_shapes` must be the inferred output shapes;
/// [`Imperative::invoke_op`](crate::imperative::Imperative::invoke_op)
/// guarantees both.
///
/// # Errors
/// [`OpError::UnparsedAttributes`] if `params` belong to another operator.
pub fn compute(
    op: &Op,
    params: &OpParams,
    mode: DispatchMode,
    inputs: &[Ten32],
    out_shapes: &[Vec<usize>],
) -> Result<Vec<Ten32>, OpError> {
    match mode {
        DispatchMode::Accelerated => {
            if accel::supports(op, params) {
                return accel::compute(op, params, inputs, out_shapes);
            }
            log::debug!("{}: no accelerated kernel for {params:?}, using generic", op.name);
        }
        DispatchMode::Generic => {}
    }

    generic::compute(op, params, inputs, out_shapes)
}
