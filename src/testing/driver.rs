//! Verification drivers.
//!
//! Two families:
//!
//! - [`test_op`] and [`test_concat_op`] run one operator over every input
//!   variant, dispatch mode and output variant, and check each result against
//!   a reference predicate. [`test_op`] also covers in-place and accumulating
//!   writes.
//! - [`test_op_ex`], [`test_fully_connected_op`], [`test_conv_op`] and
//!   [`test_pooling_op`] run the forward operator once per dispatch mode and
//!   require the results to agree, then feed the forward outputs to the
//!   backward operator and compare again.
//!
//! Every invocation is followed by [`crate::engine::Engine::wait_for_all`]
//! before outputs are read.

use std::slice;

use crate::array::NdArray;
use crate::backend::DispatchMode;
use crate::error::VerifyError;
use crate::imperative::{Context, Imperative, OpReqType};
use crate::ops::params::OpParams;
use crate::ops::registry::NodeAttrs;
use crate::testing::arrays::{
    calculate_width_conv_output, calculate_width_deconv_output, calculate_width_pool_output,
    create_bias_array, create_kernel_array, fc_weight_dim2, get_test_array_shapes,
    get_test_input_arrays, get_test_output_arrays, init_default_array, print_verify_msg,
    ArrayTypes, NdArrayAttrs, CONV_MAX, DEFAULT_MAX,
};
use crate::testing::attrs::OpAttrs;
use crate::testing::config::SuiteConfig;
use crate::testing::verify::{assert_equal, verify_add_request, verify_copy_result, VerifyFn};

/// What a driver did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverReport {
    /// Operator invocations pushed.
    pub invocations: usize,
    /// Verifications that passed.
    pub verified: usize,
    /// Input or output variants the operator does not accept.
    pub skipped: usize,
}

struct Runner {
    imp: Imperative<'static>,
    ctx: Context,
    report: DriverReport,
}

impl Runner {
    fn new() -> Self {
        Self {
            imp: Imperative::get(),
            ctx: Context::cpu(),
            report: DriverReport::default(),
        }
    }

    fn invoke(
        &mut self,
        attrs: &NodeAttrs,
        inputs: &[NdArray],
        outputs: &[NdArray],
        req: OpReqType,
        dispatch: DispatchMode,
    ) -> Result<(), VerifyError> {
        let req = vec![req; outputs.len()];
        self.imp
            .invoke_op(&self.ctx, attrs, inputs, outputs, &req, dispatch)?;
        self.report.invocations += 1;
        Ok(())
    }

    fn wait(&self) -> Result<(), VerifyError> {
        self.imp.engine().wait_for_all()?;
        Ok(())
    }

    fn skip(&mut self) {
        self.report.skipped += 1;
    }

    fn check(
        &mut self,
        result: Result<(), VerifyError>,
        attrs: &NodeAttrs,
        input: &NdArrayAttrs,
        output: &NdArrayAttrs,
    ) -> Result<(), VerifyError> {
        match result {
            Ok(()) => {
                self.report.verified += 1;
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "{}: {} {:?} -> {} {:?}: {e}",
                    attrs.op.name,
                    input.desc,
                    input.arr.shape(),
                    output.desc,
                    output.arr.shape()
                );
                Err(e)
            }
        }
    }
}

fn output_sets(
    attrs: &OpAttrs,
    shape: &[usize],
    scale: &[f32],
) -> Result<Vec<Vec<NdArrayAttrs>>, VerifyError> {
    let descs = get_test_array_shapes(false).descs;
    (0..attrs.num_outputs)
        .map(|_| get_test_output_arrays(shape, &descs, scale, attrs.output_types).map_err(Into::into))
        .collect()
}

fn column(sets: &[Vec<NdArrayAttrs>], i: usize) -> Vec<NdArray> {
    sets.iter().map(|set| set[i].arr.clone()).collect()
}

fn fresh_input(
    types: ArrayTypes,
    rand: bool,
    spatial_only: bool,
    max: i32,
    index: usize,
) -> Result<NdArrayAttrs, VerifyError> {
    get_test_input_arrays(types, rand, &[1.0], spatial_only, max)?
        .into_iter()
        .nth(index)
        .ok_or_else(|| VerifyError::Setup(format!("no input array at index {index}")))
}

fn compare_exact(a: &[NdArray], b: &[NdArray]) -> Result<(), VerifyError> {
    for (x, y) in a.iter().zip(b) {
        verify_copy_result(slice::from_ref(x), slice::from_ref(y))?;
    }
    Ok(())
}

fn compare_close(a: &[NdArray], b: &[NdArray]) -> Result<(), VerifyError> {
    let tol = SuiteConfig::get().tolerance;
    for (x, y) in a.iter().zip(b) {
        assert_equal(slice::from_ref(x), slice::from_ref(y), tol.rtol, tol.atol)?;
    }
    Ok(())
}

/// Checks `attrs` against `verify_fn` for every requested write mode.
///
/// Every input slot receives the same array. In-place runs skip views and
/// verify against a copy taken before the invocation; accumulating runs
/// subtract a copy of each output's prior content.
///
/// # Errors
/// The first failed invocation or verification.
pub fn test_op(attrs: &OpAttrs, verify_fn: VerifyFn) -> Result<DriverReport, VerifyError> {
    let mut run = Runner::new();
    let input_arrays =
        || get_test_input_arrays(attrs.input_types, false, &[1.0], false, DEFAULT_MAX);

    if attrs.wants(OpReqType::WriteTo) {
        for in_arr in &input_arrays()? {
            for &dispatch in &attrs.dispatches {
                let out_arrs = output_sets(attrs, in_arr.arr.shape(), &[1.0])?;
                let inputs = vec![in_arr.arr.clone(); attrs.num_inputs];
                for output_i in 0..out_arrs[0].len() {
                    let outputs = column(&out_arrs, output_i);
                    print_verify_msg(in_arr, &out_arrs[0][output_i]);
                    run.invoke(&attrs.attrs, &inputs, &outputs, OpReqType::WriteTo, dispatch)?;
                    run.wait()?;
                    run.check(verify_fn(&inputs, &outputs), &attrs.attrs, in_arr, &out_arrs[0][output_i])?;
                }
            }
        }
    }

    if attrs.wants(OpReqType::WriteInplace) {
        for &dispatch in &attrs.dispatches {
            for arr in &input_arrays()? {
                // views must not be written in place
                if arr.arr.is_view() {
                    run.skip();
                    continue;
                }
                let orig = NdArrayAttrs::new(arr.arr.copy(), "InPlace Copy");
                let inputs = vec![arr.arr.clone(); attrs.num_inputs];
                let outputs = vec![arr.arr.clone(); attrs.num_outputs];
                print_verify_msg(&orig, arr);
                run.invoke(&attrs.attrs, &inputs, &outputs, OpReqType::WriteInplace, dispatch)?;
                run.wait()?;
                let orig_inputs = vec![orig.arr.clone(); attrs.num_inputs];
                run.check(verify_fn(&orig_inputs, &outputs), &attrs.attrs, &orig, arr)?;
            }
        }
    }

    if attrs.wants(OpReqType::AddTo) {
        for in_arr in &input_arrays()? {
            for &dispatch in &attrs.dispatches {
                let out_arrs = output_sets(attrs, in_arr.arr.shape(), &[1.0])?;
                let inputs = vec![in_arr.arr.clone(); attrs.num_inputs];
                for output_i in 0..out_arrs[0].len() {
                    let outputs = column(&out_arrs, output_i);
                    let originals: Vec<NdArray> = outputs.iter().map(NdArray::copy).collect();
                    print_verify_msg(in_arr, &out_arrs[0][output_i]);
                    run.invoke(&attrs.attrs, &inputs, &outputs, OpReqType::AddTo, dispatch)?;
                    run.wait()?;
                    let result = verify_add_request(&inputs, &originals, &outputs, verify_fn);
                    run.check(result, &attrs.attrs, in_arr, &out_arrs[0][output_i])?;
                }
            }
        }
    }

    Ok(run.report)
}

/// Checks a concat (or, with `backwards`, its gradient) along the `dim`
/// attribute for every input and output variant.
///
/// Forward outputs are the inputs grown `num_inputs` times along `dim`; the
/// gradient starts from inputs grown `num_outputs` times and splits them
/// back.
///
/// # Errors
/// The first failed invocation or verification.
pub fn test_concat_op(
    attrs: &OpAttrs,
    verify_fn: VerifyFn,
    backwards: bool,
) -> Result<DriverReport, VerifyError> {
    let mut run = Runner::new();
    let dim = attrs
        .usize_attr("dim")
        .ok_or_else(|| VerifyError::Setup("concat needs a numeric `dim` attribute".into()))?;

    let in_arrs = if backwards {
        let mut scale = vec![1.0; dim + 1];
        scale[dim] = attrs.num_outputs as f32;
        get_test_input_arrays(ArrayTypes::ALL, false, &scale, false, DEFAULT_MAX)?
    } else {
        get_test_input_arrays(attrs.input_types, false, &[1.0], false, DEFAULT_MAX)?
    };
    let factor = if backwards {
        1.0 / attrs.num_outputs as f32
    } else {
        attrs.num_inputs as f32
    };

    for in_arr in &in_arrs {
        for &dispatch in &attrs.dispatches {
            if dim >= in_arr.arr.ndim() {
                run.skip();
                continue;
            }
            let mut scale = vec![1.0; in_arr.arr.ndim()];
            scale[dim] = factor;
            let out_arrs = output_sets(attrs, in_arr.arr.shape(), &scale)?;
            let inputs = vec![in_arr.arr.clone(); attrs.num_inputs];
            for output_i in 0..out_arrs[0].len() {
                let outputs = column(&out_arrs, output_i);
                print_verify_msg(in_arr, &out_arrs[0][output_i]);
                run.invoke(&attrs.attrs, &inputs, &outputs, OpReqType::WriteTo, dispatch)?;
                run.wait()?;
                run.check(verify_fn(&inputs, &outputs), &attrs.attrs, in_arr, &out_arrs[0][output_i])?;
            }
        }
    }
    Ok(run.report)
}

/// Runs `forward` on both dispatch modes and requires the outputs to agree
/// within tolerance, then does the same for `backward` fed with
/// `[output, input, norm]`. Used for LRN, which only accepts rank 4 data.
///
/// # Errors
/// The first failed invocation or comparison.
pub fn test_op_ex(forward: &OpAttrs, backward: &OpAttrs) -> Result<DriverReport, VerifyError> {
    let mut run = Runner::new();
    if !forward.wants(OpReqType::WriteTo) {
        return Ok(run.report);
    }
    let in_arrs = get_test_input_arrays(forward.input_types, true, &[1.0], false, DEFAULT_MAX)?;

    for (i1, in_arr) in in_arrs.iter().enumerate() {
        if in_arr.arr.ndim() != 4 {
            run.skip();
            continue;
        }
        let out_arrs = output_sets(forward, in_arr.arr.shape(), &[1.0])?;
        let ex_out_arrs = output_sets(forward, in_arr.arr.shape(), &[1.0])?;
        let inputs = vec![in_arr.arr.clone(); forward.num_inputs];

        for output_i in 0..out_arrs[0].len() {
            if out_arrs[0][output_i].arr.is_blocked() {
                run.skip();
                continue;
            }
            let outputs = column(&out_arrs, output_i);
            let ex_outputs = column(&ex_out_arrs, output_i);

            print_verify_msg(in_arr, &out_arrs[0][output_i]);
            run.invoke(&forward.attrs, &inputs, &outputs, OpReqType::WriteTo, DispatchMode::Generic)?;
            run.invoke(&forward.attrs, &inputs, &ex_outputs, OpReqType::WriteTo, DispatchMode::Accelerated)?;
            run.wait()?;
            run.check(compare_close(&outputs, &ex_outputs), &forward.attrs, in_arr, &out_arrs[0][output_i])?;

            let backward_inputs = vec![outputs[0].clone(), inputs[0].clone(), outputs[1].clone()];
            let tmp_output = fresh_input(forward.input_types, true, false, DEFAULT_MAX, i1)?;
            let tmp_output2 = fresh_input(forward.input_types, true, false, DEFAULT_MAX, i1)?;
            let backward_outputs = vec![tmp_output.arr.clone()];
            let backward_ex_outputs = vec![tmp_output2.arr.clone()];

            log::debug!("Backwards:");
            print_verify_msg(&out_arrs[0][output_i], &tmp_output);
            run.invoke(&backward.attrs, &backward_inputs, &backward_outputs, OpReqType::WriteTo, DispatchMode::Generic)?;
            run.invoke(&backward.attrs, &backward_inputs, &backward_ex_outputs, OpReqType::WriteTo, DispatchMode::Accelerated)?;
            run.wait()?;
            run.check(
                compare_close(&backward_outputs, &backward_ex_outputs),
                &backward.attrs,
                &out_arrs[0][output_i],
                &tmp_output,
            )?;
        }
    }
    Ok(run.report)
}

/// Fully connected forward and backward agreement across dispatch modes.
///
/// The weight is `[num_hidden, prod(shape[1..])]` and the bias
/// `[num_hidden]`, both filled with the deterministic ramp; the backward pass
/// gets `[output, input, weight]`.
///
/// # Errors
/// The first failed invocation or comparison.
pub fn test_fully_connected_op(
    forward: &OpAttrs,
    backward: &OpAttrs,
) -> Result<DriverReport, VerifyError> {
    let mut run = Runner::new();
    if !forward.wants(OpReqType::WriteTo) {
        return Ok(run.report);
    }
    let num_hidden = forward
        .usize_attr("num_hidden")
        .ok_or_else(|| VerifyError::Setup("fully connected needs `num_hidden`".into()))?;
    let in_arrs = get_test_input_arrays(forward.input_types, true, &[1.0], false, DEFAULT_MAX)?;

    for (i1, in_arr) in in_arrs.iter().enumerate() {
        let in_shape = in_arr.arr.shape();
        if in_shape.len() < 2 {
            run.skip();
            continue;
        }
        let wt_shape = vec![num_hidden, fc_weight_dim2(in_shape)];
        let weights = NdArray::zeros(wt_shape.clone());
        init_default_array(&weights, false)?;
        let bias = NdArray::zeros(vec![num_hidden]);
        init_default_array(&bias, false)?;
        let inputs = vec![in_arr.arr.clone(), weights, bias];

        let out_shape = [in_shape[0], num_hidden];
        let out_arrs = output_sets(forward, &out_shape, &[1.0])?;
        let ex_out_arrs = output_sets(forward, &out_shape, &[1.0])?;

        for output_i in 0..out_arrs[0].len() {
            let outputs = column(&out_arrs, output_i);
            let ex_outputs = column(&ex_out_arrs, output_i);

            print_verify_msg(in_arr, &out_arrs[0][output_i]);
            run.invoke(&forward.attrs, &inputs, &outputs, OpReqType::WriteTo, DispatchMode::Generic)?;
            run.invoke(&forward.attrs, &inputs, &ex_outputs, OpReqType::WriteTo, DispatchMode::Accelerated)?;
            run.wait()?;
            run.check(compare_close(&outputs, &ex_outputs), &forward.attrs, in_arr, &out_arrs[0][output_i])?;

            let backward_inputs = vec![outputs[0].clone(), inputs[0].clone(), inputs[1].clone()];
            let tmp_output = fresh_input(forward.input_types, true, false, DEFAULT_MAX, i1)?;
            let backward_outputs = vec![
                tmp_output.arr.clone(),
                NdArray::zeros(wt_shape.clone()),
                NdArray::zeros(vec![num_hidden]),
            ];
            let tmp_output2 = fresh_input(forward.input_types, true, false, DEFAULT_MAX, i1)?;
            let backward_ex_outputs = vec![
                tmp_output2.arr.clone(),
                NdArray::zeros(wt_shape.clone()),
                NdArray::zeros(vec![num_hidden]),
            ];

            log::debug!("Backwards:");
            print_verify_msg(&out_arrs[0][output_i], &tmp_output);
            run.invoke(&backward.attrs, &backward_inputs, &backward_outputs, OpReqType::WriteTo, DispatchMode::Generic)?;
            run.invoke(&backward.attrs, &backward_inputs, &backward_ex_outputs, OpReqType::WriteTo, DispatchMode::Accelerated)?;
            run.wait()?;
            run.check(
                compare_close(&backward_outputs, &backward_ex_outputs),
                &backward.attrs,
                &out_arrs[0][output_i],
                &tmp_output,
            )?;
        }
    }
    Ok(run.report)
}

/// Convolution (or, with `is_deconv`, deconvolution) forward and backward
/// agreement across dispatch modes.
///
/// Results must match exactly: data is bounded by [`CONV_MAX`] and kernels
/// by [`crate::testing::arrays::KERNEL_MAX`], keeping every partial sum an
/// exactly representable integer.
///
/// # Errors
/// The first failed invocation or comparison.
pub fn test_conv_op(
    forward: &OpAttrs,
    backward: &OpAttrs,
    is_deconv: bool,
) -> Result<DriverReport, VerifyError> {
    let mut run = Runner::new();
    let param = match forward.attrs.resolved_params()? {
        OpParams::Convolution(p) | OpParams::Deconvolution(p) => p,
        _ => {
            return Err(VerifyError::Setup(format!(
                "{} is not a convolution",
                forward.attrs.op.name
            )));
        }
    };
    let (kernel, pad, stride, num_filter) = (&param.kernel, &param.pad, &param.stride, param.num_filter);
    let in_arrs = get_test_input_arrays(forward.input_types, true, &[1.0], true, CONV_MAX)?;

    for (i1, in_arr) in in_arrs.iter().enumerate() {
        let input_shape = in_arr.arr.shape();
        if input_shape.len() != kernel.len() + 2 {
            run.skip();
            continue;
        }

        let width = input_shape[2];
        let out_width = if is_deconv {
            calculate_width_deconv_output(width, kernel[0], pad[0], stride[0])
        } else {
            calculate_width_conv_output(width, kernel[0], pad[0], stride[0])
        };
        let mut scale = vec![out_width as f32 / width as f32; input_shape.len()];
        scale[0] = 1.0;
        scale[1] = num_filter as f32 / input_shape[1] as f32;

        let out_arrs = output_sets(forward, input_shape, &scale)?;
        let ex_out_arrs = output_sets(forward, input_shape, &scale)?;
        let bias_shape = [num_filter];
        let mut inputs = vec![
            in_arr.arr.clone(),
            create_kernel_array(kernel, num_filter, input_shape, is_deconv)?,
        ];
        if !param.no_bias {
            inputs.push(create_bias_array(&bias_shape)?);
        }

        for output_i in 0..out_arrs[0].len() {
            let outputs = column(&out_arrs, output_i);
            let ex_outputs = column(&ex_out_arrs, output_i);

            print_verify_msg(in_arr, &out_arrs[0][output_i]);
            run.invoke(&forward.attrs, &inputs, &outputs, OpReqType::WriteTo, DispatchMode::Generic)?;
            run.invoke(&forward.attrs, &inputs, &ex_outputs, OpReqType::WriteTo, DispatchMode::Accelerated)?;
            run.wait()?;
            run.check(compare_exact(&outputs, &ex_outputs), &forward.attrs, in_arr, &out_arrs[0][output_i])?;

            let mut backward_inputs = vec![outputs[0].clone(), inputs[0].clone(), inputs[1].clone()];
            if !param.no_bias {
                backward_inputs.push(inputs[2].clone());
            }

            let fresh_outputs = |tmp: &NdArrayAttrs| -> Result<Vec<NdArray>, VerifyError> {
                let mut outs = vec![
                    tmp.arr.clone(),
                    create_kernel_array(kernel, num_filter, input_shape, is_deconv)?,
                ];
                if !param.no_bias {
                    outs.push(create_bias_array(&bias_shape)?);
                }
                Ok(outs)
            };
            let tmp_output = fresh_input(forward.input_types, true, true, CONV_MAX, i1)?;
            let backward_outputs = fresh_outputs(&tmp_output)?;
            let tmp_output2 = fresh_input(forward.input_types, true, true, CONV_MAX, i1)?;
            let backward_ex_outputs = fresh_outputs(&tmp_output2)?;

            log::debug!("Backwards:");
            print_verify_msg(&out_arrs[0][output_i], &tmp_output);
            run.invoke(&backward.attrs, &backward_inputs, &backward_outputs, OpReqType::WriteTo, DispatchMode::Generic)?;
            run.invoke(&backward.attrs, &backward_inputs, &backward_ex_outputs, OpReqType::WriteTo, DispatchMode::Accelerated)?;
            run.wait()?;
            run.check(
                compare_exact(&backward_outputs, &backward_ex_outputs),
                &backward.attrs,
                &out_arrs[0][output_i],
                &tmp_output,
            )?;
        }
    }
    Ok(run.report)
}

/// Max pooling forward and backward agreement across dispatch modes.
///
/// The backward pass gets `[grad, input, output]`, or for two-dimensional
/// windows `[grad, workspace grad, input, output, workspace]` with the
/// workspace produced by the accelerated forward pass.
///
/// # Errors
/// The first failed invocation or comparison.
pub fn test_pooling_op(forward: &OpAttrs, backward: &OpAttrs) -> Result<DriverReport, VerifyError> {
    let mut run = Runner::new();
    let OpParams::Pooling(param) = forward.attrs.resolved_params()? else {
        return Err(VerifyError::Setup(format!(
            "{} is not a pooling operator",
            forward.attrs.op.name
        )));
    };
    let in_arrs = get_test_input_arrays(forward.input_types, false, &[1.0], false, DEFAULT_MAX)?;

    for (i1, in_arr) in in_arrs.iter().enumerate() {
        let input_shape = in_arr.arr.shape();
        if input_shape.len() != param.kernel.len() + 2 || in_arr.arr.is_view() {
            run.skip();
            continue;
        }
        let scale: Vec<f32> = input_shape
            .iter()
            .enumerate()
            .map(|(i, &d)| {
                if i < 2 {
                    1.0
                } else {
                    let a = i - 2;
                    calculate_width_pool_output(d, param.kernel[a], param.pad[a], param.stride[a]) as f32
                        / d as f32
                }
            })
            .collect();

        let out_arrs = output_sets(forward, input_shape, &scale)?;
        let ex_out_arrs = output_sets(forward, input_shape, &scale)?;
        let inputs = vec![in_arr.arr.clone(); forward.num_inputs];

        for output_i in 0..out_arrs[0].len() {
            let outputs = column(&out_arrs, output_i);
            let ex_outputs = column(&ex_out_arrs, output_i);

            print_verify_msg(in_arr, &out_arrs[0][output_i]);
            run.invoke(&forward.attrs, &inputs, &outputs, OpReqType::WriteTo, DispatchMode::Generic)?;
            run.invoke(&forward.attrs, &inputs, &ex_outputs, OpReqType::WriteTo, DispatchMode::Accelerated)?;
            run.wait()?;
            run.check(compare_exact(&outputs, &ex_outputs), &forward.attrs, in_arr, &out_arrs[0][output_i])?;

            let backward_inputs = match backward.num_inputs {
                3 => vec![outputs[0].clone(), inputs[0].clone(), outputs[0].clone()],
                5 => vec![
                    outputs[0].clone(),
                    outputs[0].clone(),
                    inputs[0].clone(),
                    outputs[0].clone(),
                    ex_outputs[1].clone(),
                ],
                n => {
                    return Err(VerifyError::Setup(format!(
                        "pooling backward with {n} inputs"
                    )));
                }
            };
            let tmp_output = fresh_input(forward.input_types, false, false, DEFAULT_MAX, i1)?;
            let tmp_output2 = fresh_input(forward.input_types, false, false, DEFAULT_MAX, i1)?;
            let backward_outputs = vec![tmp_output.arr.clone()];
            let backward_ex_outputs = vec![tmp_output2.arr.clone()];

            log::debug!("Backwards:");
            print_verify_msg(&out_arrs[0][output_i], &tmp_output);
            run.invoke(&backward.attrs, &backward_inputs, &backward_outputs, OpReqType::WriteTo, DispatchMode::Generic)?;
            run.invoke(&backward.attrs, &backward_inputs, &backward_ex_outputs, OpReqType::WriteTo, DispatchMode::Accelerated)?;
            run.wait()?;
            run.check(
                compare_exact(&backward_outputs, &backward_ex_outputs),
                &backward.attrs,
                &out_arrs[0][output_i],
                &tmp_output,
            )?;
        }
    }
    Ok(run.report)
}
