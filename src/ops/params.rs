//! Attribute parsers.
//!
//! Operators are configured through a string dictionary, the way attributes
//! travel through a symbolic graph. Each operator that takes attributes has
//! a typed parameter struct built from that dictionary by its parser.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::OpError;

/// Raw operator attributes.
pub type AttrDict = BTreeMap<String, String>;

/// Parsed operator parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum OpParams {
    /// The operator takes no attributes.
    None,
    /// `Activation` / `_backward_Activation`.
    Activation(ActivationParam),
    /// `concat` / `_backward_Concat`.
    Concat(ConcatParam),
    /// `Pooling` / `_backward_Pooling`.
    Pooling(PoolingParam),
    /// `LRN` / `_backward_LRN`.
    Lrn(LrnParam),
    /// `FullyConnected` / `_backward_FullyConnected`.
    FullyConnected(FullyConnectedParam),
    /// `Convolution` / `_backward_Convolution`.
    Convolution(ConvolutionParam),
    /// `Deconvolution` / `_backward_Deconvolution`.
    Deconvolution(ConvolutionParam),
}

/// Elementwise activation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActType {
    /// `max(x, 0)`
    Relu,
    /// `1 / (1 + e^-x)`
    Sigmoid,
    /// `tanh(x)`
    Tanh,
    /// `ln(1 + e^x)`
    SoftRelu,
}

impl FromStr for ActType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relu" => Ok(Self::Relu),
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            "softrelu" => Ok(Self::SoftRelu),
            _ => Err("expected one of relu, sigmoid, tanh, softrelu".into()),
        }
    }
}

/// Parameters of `Activation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationParam {
    /// Function applied elementwise.
    pub act_type: ActType,
}

/// Parameters of `concat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatParam {
    /// Number of concatenated arrays.
    pub num_args: usize,
    /// Axis to concatenate along.
    pub dim: usize,
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolType {
    /// Window maximum.
    Max,
    /// Window mean, padding counted in the divisor.
    Avg,
    /// Window sum.
    Sum,
}

impl FromStr for PoolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            _ => Err("expected one of max, avg, sum".into()),
        }
    }
}

/// Parameters of `Pooling`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolingParam {
    /// Window extent per spatial axis.
    pub kernel: Vec<usize>,
    /// Step per spatial axis.
    pub stride: Vec<usize>,
    /// Implicit zero padding per spatial axis.
    pub pad: Vec<usize>,
    /// Reduction.
    pub pool_type: PoolType,
    /// Pool over the whole spatial extent, ignoring kernel/stride/pad.
    pub global_pool: bool,
}

/// Parameters of `LRN` (cross-channel local response normalization).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrnParam {
    /// Channels in the normalization window (odd).
    pub nsize: usize,
    /// Scale.
    pub alpha: f32,
    /// Exponent.
    pub beta: f32,
    /// Additive constant.
    pub knorm: f32,
}

/// Parameters of `FullyConnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullyConnectedParam {
    /// Output features.
    pub num_hidden: usize,
    /// Whether the bias input is absent.
    pub no_bias: bool,
    /// Collapse every axis but the first into the feature axis.
    pub flatten: bool,
}

/// Parameters of `Convolution` and `Deconvolution`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvolutionParam {
    /// Kernel extent per spatial axis.
    pub kernel: Vec<usize>,
    /// Step per spatial axis.
    pub stride: Vec<usize>,
    /// Implicit zero padding per spatial axis.
    pub pad: Vec<usize>,
    /// Output channels.
    pub num_filter: usize,
    /// Whether the bias input is absent.
    pub no_bias: bool,
}

struct Parser<'a> {
    op: &'static str,
    dict: &'a AttrDict,
}

impl<'a> Parser<'a> {
    fn invalid(&self, key: &str, value: &str, reason: impl fmt::Display) -> OpError {
        OpError::InvalidAttribute {
            op: self.op,
            key: key.to_owned(),
            value: value.to_owned(),
            reason: reason.to_string(),
        }
    }

    fn raw(&self, key: &'static str) -> Result<&'a str, OpError> {
        self.dict
            .get(key)
            .map(String::as_str)
            .ok_or(OpError::MissingAttribute { op: self.op, key })
    }

    fn value<T>(&self, key: &'static str) -> Result<T, OpError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.raw(key)?;
        raw.trim()
            .parse()
            .map_err(|e| self.invalid(key, raw, e))
    }

    fn value_or<T>(&self, key: &'static str, default: T) -> Result<T, OpError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        if self.dict.contains_key(key) {
            self.value(key)
        } else {
            Ok(default)
        }
    }

    fn flag_or(&self, key: &'static str, default: bool) -> Result<bool, OpError> {
        let Some(raw) = self.dict.get(key) else {
            return Ok(default);
        };
        match raw.trim() {
            "1" | "true" | "True" => Ok(true),
            "0" | "false" | "False" => Ok(false),
            _ => Err(self.invalid(key, raw, "expected a boolean")),
        }
    }

    fn shape(&self, key: &'static str) -> Result<Vec<usize>, OpError> {
        let raw = self.raw(key)?;
        parse_shape(raw).map_err(|e| self.invalid(key, raw, e))
    }

    fn shape_or(&self, key: &'static str, rank: usize, fill: usize) -> Result<Vec<usize>, OpError> {
        if !self.dict.contains_key(key) {
            return Ok(vec![fill; rank]);
        }
        let raw = self.raw(key)?;
        let shape = self.shape(key)?;
        if shape.len() != rank {
            return Err(self.invalid(key, raw, format!("expected {rank} values to match kernel")));
        }
        Ok(shape)
    }
}

/// Parses a shape string such as `"(2, 3)"`, `"[2,3]"`, `"(4,)"` or `"4"`.
///
/// # Errors
/// Returns a description of the first malformed entry.
pub fn parse_shape(raw: &str) -> Result<Vec<usize>, String> {
    let inner = raw
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']']);
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("`{s}`: {e}")))
        .collect()
}

/// Formats `value` repeated `dim` times as a shape string, e.g. `(2,2)`.
#[must_use]
pub fn shape_string(value: usize, dim: usize) -> String {
    let parts: Vec<String> = std::iter::repeat_n(value.to_string(), dim).collect();
    format!("({})", parts.join(","))
}

/// No attributes.
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn parse_none(_op: &'static str, _dict: &AttrDict) -> Result<OpParams, OpError> {
    Ok(OpParams::None)
}

pub(crate) fn parse_activation(op: &'static str, dict: &AttrDict) -> Result<OpParams, OpError> {
    let p = Parser { op, dict };
    Ok(OpParams::Activation(ActivationParam {
        act_type: p.value("act_type")?,
    }))
}

pub(crate) fn parse_concat(op: &'static str, dict: &AttrDict) -> Result<OpParams, OpError> {
    let p = Parser { op, dict };
    let num_args: usize = p.value("num_args")?;
    if num_args == 0 {
        return Err(p.invalid("num_args", "0", "must be positive"));
    }
    Ok(OpParams::Concat(ConcatParam {
        num_args,
        dim: p.value_or("dim", 1)?,
    }))
}

pub(crate) fn parse_pooling(op: &'static str, dict: &AttrDict) -> Result<OpParams, OpError> {
    let p = Parser { op, dict };
    let global_pool = p.flag_or("global_pool", false)?;
    let kernel = if global_pool && !dict.contains_key("kernel") {
        Vec::new()
    } else {
        p.shape("kernel")?
    };
    if !global_pool && (kernel.is_empty() || kernel.len() > 3 || kernel.contains(&0)) {
        return Err(p.invalid("kernel", p.raw("kernel")?, "expected 1 to 3 positive extents"));
    }
    let stride = p.shape_or("stride", kernel.len(), 1)?;
    if stride.contains(&0) {
        return Err(p.invalid("stride", p.raw("stride")?, "must be positive"));
    }
    Ok(OpParams::Pooling(PoolingParam {
        pad: p.shape_or("pad", kernel.len(), 0)?,
        stride,
        kernel,
        pool_type: p.value_or("pool_type", PoolType::Max)?,
        global_pool,
    }))
}

pub(crate) fn parse_lrn(op: &'static str, dict: &AttrDict) -> Result<OpParams, OpError> {
    let p = Parser { op, dict };
    let nsize: usize = p.value("nsize")?;
    if nsize % 2 == 0 {
        return Err(p.invalid("nsize", &nsize.to_string(), "must be odd"));
    }
    Ok(OpParams::Lrn(LrnParam {
        nsize,
        alpha: p.value_or("alpha", 1e-4)?,
        beta: p.value_or("beta", 0.75)?,
        knorm: p.value_or("knorm", 2.0)?,
    }))
}

pub(crate) fn parse_fully_connected(op: &'static str, dict: &AttrDict) -> Result<OpParams, OpError> {
    let p = Parser { op, dict };
    let num_hidden: usize = p.value("num_hidden")?;
    if num_hidden == 0 {
        return Err(p.invalid("num_hidden", "0", "must be positive"));
    }
    Ok(OpParams::FullyConnected(FullyConnectedParam {
        num_hidden,
        no_bias: p.flag_or("no_bias", false)?,
        flatten: p.flag_or("flatten", true)?,
    }))
}

fn parse_conv_like(p: &Parser<'_>, default_no_bias: bool) -> Result<ConvolutionParam, OpError> {
    let kernel = p.shape("kernel")?;
    if kernel.is_empty() || kernel.len() > 3 || kernel.contains(&0) {
        return Err(p.invalid("kernel", p.raw("kernel")?, "expected 1 to 3 positive extents"));
    }
    let stride = p.shape_or("stride", kernel.len(), 1)?;
    if stride.contains(&0) {
        return Err(p.invalid("stride", p.raw("stride")?, "must be positive"));
    }
    let num_filter: usize = p.value("num_filter")?;
    if num_filter == 0 {
        return Err(p.invalid("num_filter", "0", "must be positive"));
    }
    Ok(ConvolutionParam {
        pad: p.shape_or("pad", kernel.len(), 0)?,
        stride,
        kernel,
        num_filter,
        no_bias: p.flag_or("no_bias", default_no_bias)?,
    })
}

pub(crate) fn parse_convolution(op: &'static str, dict: &AttrDict) -> Result<OpParams, OpError> {
    parse_conv_like(&Parser { op, dict }, false).map(OpParams::Convolution)
}

pub(crate) fn parse_deconvolution(op: &'static str, dict: &AttrDict) -> Result<OpParams, OpError> {
    parse_conv_like(&Parser { op, dict }, true).map(OpParams::Deconvolution)
}
