//! # Operator Layer
//!
//! Operator definitions and their two compute paths.
//!
//! ## Submodules
//!
//! - [`params`]: attribute dictionaries and typed parameter structs
//! - [`registry`]: the operator table, arities and [`NodeAttrs`]
//! - [`shape`]: output shape inference
//! - [`dispatch`]: routes a computation to the generic or accelerated kernels
//!
//! The kernels themselves live in the private `generic` (serial reference
//! loops) and `accel` (rayon, im2col + GEMM) modules. Both consume and
//! produce plain row-major [`Ten32`](crate::tensors::Ten32) values; layouts
//! and write requests are handled by [`crate::imperative`].
//!
//! ## Adding an operator
//!
//! 1. Add an [`OpKind`] variant and a registry entry with its attribute parser
//! 2. Give it arities and a shape rule
//! 3. Implement it in `generic`, then in `accel` (or leave it out of
//!    `accel::supports` to fall back)
//!
//! ## Feature Flags
//!
//! - `simd`: AVX2 ReLU in the accelerated path

pub(crate) mod accel;
pub mod dispatch;
mod generic;
pub mod params;
pub mod registry;
pub mod shape;
pub(crate) mod window;

pub use self::params::{AttrDict, OpParams};
pub use self::registry::{NodeAttrs, Op, OpKind};
