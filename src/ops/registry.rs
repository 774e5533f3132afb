//! Operator registry.
//!
//! Operators are looked up by name ([`Op::get`]) and configured through a
//! [`NodeAttrs`] bundle: the operator, its raw attribute dictionary, and the
//! parameters its attribute parser produced.

use core::fmt;

use crate::error::OpError;
use crate::ops::params::{self, AttrDict, OpParams, PoolType};
use crate::ops::shape;

/// Every operator the dispatcher can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OpKind {
    Copy,
    BackwardCopy,
    Activation,
    BackwardActivation,
    ElemwiseAdd,
    BackwardAdd,
    Concat,
    BackwardConcat,
    Pooling,
    BackwardPooling,
    Lrn,
    BackwardLrn,
    FullyConnected,
    BackwardFullyConnected,
    Convolution,
    BackwardConvolution,
    Deconvolution,
    BackwardDeconvolution,
}

type ParseFn = fn(&'static str, &AttrDict) -> Result<OpParams, OpError>;

/// A registered operator.
pub struct Op {
    /// Registry name.
    pub name: &'static str,
    /// What the operator computes.
    pub kind: OpKind,
    parser: ParseFn,
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Op {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

const fn op(name: &'static str, kind: OpKind, parser: ParseFn) -> Op {
    Op { name, kind, parser }
}

static REGISTRY: [Op; 19] = [
    op("_copy", OpKind::Copy, params::parse_none),
    op("_backward_copy", OpKind::BackwardCopy, params::parse_none),
    op("Activation", OpKind::Activation, params::parse_activation),
    op("_backward_Activation", OpKind::BackwardActivation, params::parse_activation),
    op("elemwise_add", OpKind::ElemwiseAdd, params::parse_none),
    op("_backward_add", OpKind::BackwardAdd, params::parse_none),
    op("concat", OpKind::Concat, params::parse_concat),
    op("Concat", OpKind::Concat, params::parse_concat),
    op("_backward_Concat", OpKind::BackwardConcat, params::parse_concat),
    op("Pooling", OpKind::Pooling, params::parse_pooling),
    op("_backward_Pooling", OpKind::BackwardPooling, params::parse_pooling),
    op("LRN", OpKind::Lrn, params::parse_lrn),
    op("_backward_LRN", OpKind::BackwardLrn, params::parse_lrn),
    op("FullyConnected", OpKind::FullyConnected, params::parse_fully_connected),
    op("_backward_FullyConnected", OpKind::BackwardFullyConnected, params::parse_fully_connected),
    op("Convolution", OpKind::Convolution, params::parse_convolution),
    op("_backward_Convolution", OpKind::BackwardConvolution, params::parse_convolution),
    op("Deconvolution", OpKind::Deconvolution, params::parse_deconvolution),
    op("_backward_Deconvolution", OpKind::BackwardDeconvolution, params::parse_deconvolution),
];

/// Whether max pooling with these parameters exposes its argmax workspace as
/// a second output.
#[must_use]
pub fn pooling_has_workspace(p: &params::PoolingParam) -> bool {
    p.pool_type == PoolType::Max && !p.global_pool && p.kernel.len() == 2
}

impl Op {
    /// Looks an operator up by registry name.
    ///
    /// # Errors
    /// [`OpError::UnknownOperator`] if nothing is registered under `name`.
    pub fn get(name: &str) -> Result<&'static Self, OpError> {
        REGISTRY
            .iter()
            .find(|op| op.name == name)
            .ok_or_else(|| OpError::UnknownOperator(name.to_owned()))
    }

    /// Names of every registered operator.
    pub fn list() -> impl Iterator<Item = &'static str> {
        REGISTRY.iter().map(|op| op.name)
    }

    /// Runs this operator's attribute parser.
    ///
    /// # Errors
    /// Propagates parse failures.
    pub fn parse_attrs(&self, dict: &AttrDict) -> Result<OpParams, OpError> {
        (self.parser)(self.name, dict)
    }

    /// Declared input count under `params`.
    #[must_use]
    pub fn num_inputs(&self, params: &OpParams) -> usize {
        match (self.kind, params) {
            (OpKind::Concat, OpParams::Concat(p)) => p.num_args,
            (OpKind::BackwardPooling, OpParams::Pooling(p)) => {
                if pooling_has_workspace(p) { 5 } else { 3 }
            }
            (OpKind::FullyConnected, OpParams::FullyConnected(p)) => {
                if p.no_bias { 2 } else { 3 }
            }
            (OpKind::Convolution, OpParams::Convolution(p)) => {
                if p.no_bias { 2 } else { 3 }
            }
            (OpKind::BackwardConvolution, OpParams::Convolution(p)) => {
                if p.no_bias { 3 } else { 4 }
            }
            (OpKind::Deconvolution, OpParams::Deconvolution(p)) => {
                if p.no_bias { 2 } else { 3 }
            }
            (OpKind::BackwardDeconvolution, OpParams::Deconvolution(p)) => {
                if p.no_bias { 3 } else { 4 }
            }
            (OpKind::ElemwiseAdd | OpKind::BackwardActivation, _) => 2,
            (OpKind::BackwardLrn | OpKind::BackwardFullyConnected, _) => 3,
            _ => 1,
        }
    }

    /// Declared output count under `params`.
    #[must_use]
    pub fn num_outputs(&self, params: &OpParams) -> usize {
        match (self.kind, params) {
            (OpKind::BackwardConcat, OpParams::Concat(p)) => p.num_args,
            (OpKind::Pooling, OpParams::Pooling(p)) => {
                if pooling_has_workspace(p) { 2 } else { 1 }
            }
            (OpKind::BackwardFullyConnected, OpParams::FullyConnected(p)) => {
                if p.no_bias { 2 } else { 3 }
            }
            (OpKind::BackwardConvolution, OpParams::Convolution(p)) => {
                if p.no_bias { 2 } else { 3 }
            }
            (OpKind::BackwardDeconvolution, OpParams::Deconvolution(p)) => {
                if p.no_bias { 2 } else { 3 }
            }
            (OpKind::BackwardAdd | OpKind::Lrn, _) => 2,
            _ => 1,
        }
    }

    /// Infers output shapes from input shapes.
    ///
    /// `out_shapes` are the shapes of the caller's output arrays; operators
    /// whose outputs are not determined by their inputs alone (the concat
    /// gradient) validate against them instead.
    ///
    /// # Errors
    /// [`OpError::ShapeMismatch`] when inputs are inconsistent.
    pub fn infer_shape(
        &self,
        params: &OpParams,
        in_shapes: &[&[usize]],
        out_shapes: &[&[usize]],
    ) -> Result<Vec<Vec<usize>>, OpError> {
        shape::infer(self, params, in_shapes, out_shapes)
    }
}

/// An operator together with its attributes.
#[derive(Debug, Clone)]
pub struct NodeAttrs {
    /// The operator.
    pub op: &'static Op,
    /// Raw attributes.
    pub dict: AttrDict,
    params: Option<OpParams>,
}

impl NodeAttrs {
    /// Attributes for the operator registered as `name`, with an empty dictionary.
    ///
    /// # Errors
    /// [`OpError::UnknownOperator`] for unregistered names.
    pub fn new(name: &str) -> Result<Self, OpError> {
        Ok(Self {
            op: Op::get(name)?,
            dict: AttrDict::new(),
            params: None,
        })
    }

    /// Adds (or replaces) an attribute, invalidating parsed parameters.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds (or replaces) an attribute, invalidating parsed parameters.
    pub fn insert(&mut self, key: &str, value: impl ToString) {
        self.dict.insert(key.to_owned(), value.to_string());
        self.params = None;
    }

    /// Runs the operator's attribute parser over the dictionary.
    ///
    /// # Errors
    /// Propagates parse failures.
    pub fn parse(&mut self) -> Result<&OpParams, OpError> {
        let parsed = self.op.parse_attrs(&self.dict)?;
        Ok(self.params.insert(parsed))
    }

    /// Parsed parameters.
    ///
    /// # Errors
    /// [`OpError::UnparsedAttributes`] if [`NodeAttrs::parse`] has not run
    /// since the dictionary last changed.
    pub fn params(&self) -> Result<&OpParams, OpError> {
        self.params
            .as_ref()
            .ok_or(OpError::UnparsedAttributes(self.op.name))
    }

    /// Parsed parameters, running the parser on a copy when needed.
    ///
    /// # Errors
    /// Propagates parse failures.
    pub fn resolved_params(&self) -> Result<OpParams, OpError> {
        match &self.params {
            Some(p) => Ok(p.clone()),
            None => self.op.parse_attrs(&self.dict),
        }
    }

    /// The raw value of an attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.dict.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(Op::get("elemwise_add").unwrap().kind, OpKind::ElemwiseAdd);
        assert_eq!(Op::get("Concat").unwrap().kind, OpKind::Concat);
        assert!(matches!(Op::get("Softmax"), Err(OpError::UnknownOperator(_))));
        assert_eq!(Op::list().count(), 19);
    }

    #[test]
    fn arity_follows_parameters() {
        let mut attrs = NodeAttrs::new("_backward_Pooling")
            .unwrap()
            .with("kernel", "(2,2)")
            .with("pool_type", "max");
        let p = attrs.parse().unwrap().clone();
        assert_eq!(attrs.op.num_inputs(&p), 5);

        let mut attrs = attrs.with("kernel", "(2,2,2)");
        assert!(attrs.params().is_err());
        let p = attrs.parse().unwrap().clone();
        assert_eq!(attrs.op.num_inputs(&p), 3);

        let mut conv = NodeAttrs::new("_backward_Convolution")
            .unwrap()
            .with("kernel", "(3,3)")
            .with("num_filter", 2)
            .with("no_bias", true);
        let p = conv.parse().unwrap().clone();
        assert_eq!(conv.op.num_inputs(&p), 3);
        assert_eq!(conv.op.num_outputs(&p), 2);
    }
}
