//! # Verification Suite
//!
//! Checks that the accelerated compute path of every operator agrees with
//! the generic one, over every array layout the operators accept.
//!
//! - [`config`]: seed, verbosity and tolerances from the environment
//! - [`arrays`]: test shapes, array variants and data initialization
//! - [`attrs`]: per-operator descriptors ([`attrs::OpAttrs`])
//! - [`verify`]: reference predicates
//! - [`driver`]: loops that invoke operators and run the checks
//!
//! ```no_run
//! use briny_dispatch::testing::{attrs, driver, verify};
//!
//! let report = driver::test_op(&attrs::relu_op()?, verify::verify_act_result)?;
//! assert!(report.verified > 0);
//! # Ok::<(), briny_dispatch::error::VerifyError>(())
//! ```

pub mod arrays;
pub mod attrs;
pub mod config;
pub mod driver;
pub mod verify;
