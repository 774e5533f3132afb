//! briny_dispatch: operator dispatch with a generic and an accelerated
//! compute path, and a suite that checks the two agree.
//!
//! Operators (copy, activation, elementwise add, concat, pooling, LRN, fully
//! connected, convolution and deconvolution, with their gradients) are
//! invoked imperatively on [`array::NdArray`] values through
//! [`imperative::Imperative`]. Each invocation runs either the serial
//! reference kernels or the parallel, layout-aware ones, chosen per call by
//! [`backend::DispatchMode`].
//!
//! # Modules
//!
//! - [`tensors`]: plain row-major tensors.
//! - [`array`]: shared n-d arrays with views and blocked layouts.
//! - [`ops`]: operator registry, shape inference and the two kernel sets.
//! - [`engine`]: asynchronous execution of invocations.
//! - [`imperative`]: invocation front end and write requests.
//! - [`testing`]: array variants, reference checks and the drivers.
//!
//! # Example
//!
//! ```rust
//! use briny_dispatch::array::NdArray;
//! use briny_dispatch::backend::DispatchMode;
//! use briny_dispatch::imperative::{Context, Imperative, OpReqType};
//! use briny_dispatch::ops::NodeAttrs;
//! use briny_dispatch::tensors::Tensor;
//!
//! let x = NdArray::from_tensor(&Tensor::new(vec![3], vec![-1.0, 0.5, 2.0]));
//! let y = NdArray::zeros(vec![3]);
//! let relu = NodeAttrs::new("Activation")?.with("act_type", "relu");
//!
//! let imp = Imperative::get();
//! imp.invoke_op(&Context::cpu(), &relu, &[x], &[y.clone()], &[OpReqType::WriteTo], DispatchMode::Accelerated)?;
//! imp.engine().wait_for_all()?;
//! assert_eq!(y.to_vec(), vec![0.0, 0.5, 2.0]);
//! # Ok::<(), briny_dispatch::error::OpError>(())
//! ```

pub mod approx;
pub mod array;
pub mod backend;
pub mod engine;
pub mod error;
pub mod imperative;
pub mod ops;
pub mod tensors;
pub mod testing;

pub use array::NdArray;
pub use backend::DispatchMode;
pub use error::{OpError, VerifyError};
pub use tensors::{Ten32, Tensor};
