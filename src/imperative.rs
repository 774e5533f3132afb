//! Imperative operator invocation.
//!
//! [`Imperative::invoke_op`] is the single entry point the verification
//! drivers use. It validates an invocation synchronously (arity, attributes,
//! output shapes, in-place aliasing) and then pushes the computation onto the
//! [`Engine`]. Inspect outputs only after [`Engine::wait_for_all`].

use std::fmt;

use crate::array::NdArray;
use crate::backend::{get_dispatch_mode, DispatchMode};
use crate::engine::Engine;
use crate::error::OpError;
use crate::ops::registry::NodeAttrs;
use crate::tensors::Ten32;

/// How an operator output is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpReqType {
    /// Leave the output untouched.
    NullOp,
    /// Overwrite the output.
    #[default]
    WriteTo,
    /// Overwrite an output that aliases one of the inputs.
    WriteInplace,
    /// Add the result to the output's prior content.
    AddTo,
}

/// Device an invocation runs on. Only the CPU exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Context {
    /// Device ordinal.
    pub dev_id: usize,
}

impl Context {
    /// The default CPU device.
    #[must_use]
    pub const fn cpu() -> Self {
        Self { dev_id: 0 }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu({})", self.dev_id)
    }
}

/// Front end that turns operator invocations into engine jobs.
#[derive(Debug, Clone, Copy)]
pub struct Imperative<'e> {
    engine: &'e Engine,
}

impl Imperative<'static> {
    /// An invoker bound to the global engine.
    #[must_use]
    pub fn get() -> Self {
        Self::new(Engine::get())
    }
}

fn check_arity(
    op: &'static str,
    what: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), OpError> {
    if expected == actual {
        Ok(())
    } else {
        Err(OpError::ArityMismatch {
            op,
            what,
            expected,
            actual,
        })
    }
}

fn write_output(out: &NdArray, req: OpReqType, t: &Ten32, mode: DispatchMode) -> Result<(), OpError> {
    match req {
        OpReqType::NullOp => Ok(()),
        OpReqType::WriteTo | OpReqType::WriteInplace => out.write(t, mode),
        OpReqType::AddTo => {
            let prior = out.to_tensor();
            let sum = prior.data.iter().zip(&t.data).map(|(a, b)| a + b).collect();
            out.write(&Ten32::new(t.shape.clone(), sum), mode)
        }
    }
}

impl<'e> Imperative<'e> {
    /// An invoker pushing onto `engine`.
    #[must_use]
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// The engine jobs are pushed to.
    #[must_use]
    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// Invokes `attrs.op` on `inputs`, writing `outputs` per `req`.
    ///
    /// Attributes are parsed on a copy if [`NodeAttrs::parse`] has not run.
    /// Outputs must already carry the inferred shapes. Inputs are read when
    /// the job runs, so an in-place output sees the pre-invocation values.
    ///
    /// # Errors
    /// Attribute, arity, shape and aliasing failures are returned here;
    /// kernel failures surface from [`Engine::wait_for_all`].
    pub fn invoke_op(
        &self,
        ctx: &Context,
        attrs: &NodeAttrs,
        inputs: &[NdArray],
        outputs: &[NdArray],
        req: &[OpReqType],
        dispatch: DispatchMode,
    ) -> Result<(), OpError> {
        let op = attrs.op;
        let params = attrs.resolved_params()?;
        check_arity(op.name, "inputs", op.num_inputs(&params), inputs.len())?;
        check_arity(op.name, "outputs", op.num_outputs(&params), outputs.len())?;
        check_arity(op.name, "requests", outputs.len(), req.len())?;

        let in_shapes: Vec<&[usize]> = inputs.iter().map(NdArray::shape).collect();
        let given: Vec<&[usize]> = outputs.iter().map(NdArray::shape).collect();
        let out_shapes = op.infer_shape(&params, &in_shapes, &given)?;
        for (i, (out, shape)) in outputs.iter().zip(&out_shapes).enumerate() {
            if out.shape() != shape.as_slice() {
                return Err(OpError::ShapeMismatch {
                    op: op.name,
                    detail: format!("output {i} has shape {:?}, expected {shape:?}", out.shape()),
                });
            }
        }
        for (i, (out, r)) in outputs.iter().zip(req).enumerate() {
            if *r == OpReqType::WriteInplace && !inputs.iter().any(|x| x.shares_storage(out)) {
                return Err(OpError::UnsupportedRequest {
                    op: op.name,
                    index: i,
                    detail: "in-place output does not alias any input".into(),
                });
            }
        }

        log::debug!(
            "{}: {} input(s) -> {} output(s) on {ctx}, {dispatch} dispatch, requests {req:?}",
            op.name,
            inputs.len(),
            outputs.len()
        );

        let inputs = inputs.to_vec();
        let outputs = outputs.to_vec();
        let req = req.to_vec();
        self.engine.push(Box::new(move || {
            let snapshot: Vec<Ten32> = inputs.iter().map(NdArray::to_tensor).collect();
            let results = crate::ops::dispatch::compute(op, &params, dispatch, &snapshot, &out_shapes)?;
            for ((out, r), t) in outputs.iter().zip(&req).zip(&results) {
                write_output(out, *r, t, dispatch)?;
            }
            Ok(())
        }));
        Ok(())
    }

    /// [`Imperative::invoke_op`] on the CPU with the process-wide default
    /// dispatch mode.
    ///
    /// # Errors
    /// As [`Imperative::invoke_op`].
    pub fn invoke_default(
        &self,
        attrs: &NodeAttrs,
        inputs: &[NdArray],
        outputs: &[NdArray],
        req: &[OpReqType],
    ) -> Result<(), OpError> {
        self.invoke_op(&Context::cpu(), attrs, inputs, outputs, req, get_dispatch_mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;

    fn relu() -> NodeAttrs {
        NodeAttrs::new("Activation").unwrap().with("act_type", "relu")
    }

    #[test]
    fn add_to_accumulates_onto_prior_content() {
        let engine = Engine::new(EngineKind::Naive).unwrap();
        let imp = Imperative::new(&engine);
        let x = NdArray::from_tensor(&Ten32::new(vec![3], vec![-1.0, 2.0, 3.0]));
        let out = NdArray::from_tensor(&Ten32::new(vec![3], vec![10.0, 10.0, 10.0]));
        imp.invoke_op(
            &Context::cpu(),
            &relu(),
            &[x],
            std::slice::from_ref(&out),
            &[OpReqType::AddTo],
            DispatchMode::Generic,
        )
        .unwrap();
        engine.wait_for_all().unwrap();
        assert_eq!(out.to_vec(), vec![10.0, 12.0, 13.0]);
    }

    #[test]
    fn in_place_requires_aliasing() {
        let engine = Engine::new(EngineKind::Naive).unwrap();
        let imp = Imperative::new(&engine);
        let x = NdArray::zeros(vec![2, 2]);
        let err = imp
            .invoke_op(
                &Context::cpu(),
                &relu(),
                &[x],
                &[NdArray::zeros(vec![2, 2])],
                &[OpReqType::WriteInplace],
                DispatchMode::Accelerated,
            )
            .unwrap_err();
        assert!(matches!(err, OpError::UnsupportedRequest { index: 0, .. }));
    }

    #[test]
    fn rejects_wrong_output_shape_and_arity() {
        let engine = Engine::new(EngineKind::Naive).unwrap();
        let imp = Imperative::new(&engine);
        let x = NdArray::zeros(vec![4]);
        let bad_shape = imp.invoke_op(
            &Context::cpu(),
            &relu(),
            std::slice::from_ref(&x),
            &[NdArray::zeros(vec![5])],
            &[OpReqType::WriteTo],
            DispatchMode::Generic,
        );
        assert!(matches!(bad_shape, Err(OpError::ShapeMismatch { .. })));

        let add = NodeAttrs::new("elemwise_add").unwrap();
        let bad_arity = imp.invoke_op(
            &Context::cpu(),
            &add,
            &[x],
            &[NdArray::zeros(vec![4])],
            &[OpReqType::WriteTo],
            DispatchMode::Generic,
        );
        assert!(matches!(
            bad_arity,
            Err(OpError::ArityMismatch { what: "inputs", expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn default_invocation_follows_global_dispatch_mode() {
        use crate::backend::set_dispatch_mode;

        let x = NdArray::from_tensor(&Ten32::new(vec![1, 2, 1, 1], vec![-1.0, 3.0]));
        let run = |mode| {
            set_dispatch_mode(mode);
            let out = NdArray::from_tensor_blocked(&Ten32::zeros(vec![1, 2, 1, 1]), 4).unwrap();
            let imp = Imperative::get();
            imp.invoke_default(&relu(), std::slice::from_ref(&x), std::slice::from_ref(&out), &[OpReqType::WriteTo])
                .unwrap();
            imp.engine().wait_for_all().unwrap();
            out
        };

        let accelerated = run(DispatchMode::Accelerated);
        let generic = run(DispatchMode::Generic);
        assert!(accelerated.is_blocked());
        assert!(!generic.is_blocked());
        assert_eq!(accelerated.to_vec(), vec![0.0, 3.0]);
        assert_eq!(generic.to_vec(), vec![0.0, 3.0]);
    }

    #[test]
    fn null_op_leaves_output_alone() {
        let engine = Engine::new(EngineKind::Threaded).unwrap();
        let imp = Imperative::new(&engine);
        let x = NdArray::from_tensor(&Ten32::new(vec![2], vec![1.0, 2.0]));
        let out = NdArray::from_tensor(&Ten32::new(vec![2], vec![7.0, 7.0]));
        imp.invoke_op(
            &Context::cpu(),
            &NodeAttrs::new("_copy").unwrap(),
            &[x],
            std::slice::from_ref(&out),
            &[OpReqType::NullOp],
            DispatchMode::Accelerated,
        )
        .unwrap();
        engine.wait_for_all().unwrap();
        assert_eq!(out.to_vec(), vec![7.0, 7.0]);
    }
}
