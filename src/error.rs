//! Error types for operator invocation and result verification.

use thiserror::Error;

/// Failures raised while parsing attributes, validating an invocation, or
/// running a kernel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpError {
    /// No operator is registered under the name.
    #[error("operator `{0}` is not registered")]
    UnknownOperator(String),

    /// A required attribute is absent from the attribute dictionary.
    #[error("operator `{op}`: missing required attribute `{key}`")]
    MissingAttribute {
        /// Operator name.
        op: &'static str,
        /// Attribute key.
        key: &'static str,
    },

    /// An attribute value could not be parsed or is out of range.
    #[error("operator `{op}`: invalid value `{value}` for attribute `{key}`: {reason}")]
    InvalidAttribute {
        /// Operator name.
        op: &'static str,
        /// Attribute key.
        key: String,
        /// Raw attribute value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Attributes were used before the attribute parser ran.
    #[error("operator `{0}`: attributes have not been parsed")]
    UnparsedAttributes(&'static str),

    /// Wrong number of inputs, outputs or write requests.
    #[error("operator `{op}`: expected {expected} {what}, got {actual}")]
    ArityMismatch {
        /// Operator name.
        op: &'static str,
        /// `"inputs"`, `"outputs"` or `"requests"`.
        what: &'static str,
        /// Declared count.
        expected: usize,
        /// Supplied count.
        actual: usize,
    },

    /// Input shapes are inconsistent with the operator or with each other.
    #[error("operator `{op}`: {detail}")]
    ShapeMismatch {
        /// Operator name.
        op: &'static str,
        /// Human-readable description.
        detail: String,
    },

    /// A write request that cannot be honoured for this output.
    #[error("operator `{op}`: unsupported request on output {index}: {detail}")]
    UnsupportedRequest {
        /// Operator name.
        op: &'static str,
        /// Output index.
        index: usize,
        /// Human-readable description.
        detail: String,
    },

    /// An array operation that its storage layout does not permit.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// The engine could not run the job.
    #[error("engine failure: {0}")]
    Engine(String),
}

/// Failures reported by verification predicates and drivers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    /// Two arrays that must hold the same number of elements do not.
    #[error("{context}: size mismatch ({expected} vs {actual})")]
    SizeMismatch {
        /// Which check failed.
        context: String,
        /// Expected element count.
        expected: usize,
        /// Observed element count.
        actual: usize,
    },

    /// An element fell outside the accepted bound.
    #[error("{context}: element {index} differs (expected {expected}, got {actual}, tolerance {tolerance})")]
    ValueMismatch {
        /// Which check failed.
        context: String,
        /// Flat index in default layout.
        index: usize,
        /// Reference value.
        expected: f32,
        /// Observed value.
        actual: f32,
        /// Accepted absolute difference.
        tolerance: f32,
    },

    /// Non-fatal mismatches collected during a check.
    #[error("{count} non-fatal mismatches, first: {first}")]
    Recorded {
        /// Number of recorded mismatches.
        count: usize,
        /// The first one.
        first: Box<VerifyError>,
    },

    /// A precondition of the driver itself did not hold.
    #[error("{0}")]
    Setup(String),

    /// The operator under test failed.
    #[error(transparent)]
    Op(#[from] OpError),
}
