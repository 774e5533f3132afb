//! Dispatch mode selection.
//!
//! Every registered operator has two execution paths:
//!
//! - `Generic`: the reference path, straightforward loops over row-major data.
//! - `Accelerated`: the optimized path: rayon-parallel kernels, im2col and a
//!   packed GEMM, with outputs kept in the channel-blocked layout.
//!
//! `invoke_op` takes the mode explicitly. The process-wide default stored here
//! is what [`crate::imperative::Imperative::invoke_default`] uses, and is kept
//! in an `AtomicU8` so it can be flipped cheaply at runtime.

use briny::traits::{InteriorImmutable, RawConvert, StableLayout, Unaligned};
use core::convert::TryFrom;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// Selects which compute path an operator invocation runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DispatchMode {
    /// Reference elementwise/loop compute path (default).
    #[default]
    Generic = 0,
    /// Parallel, layout-aware compute path.
    Accelerated,
}

unsafe impl StableLayout for DispatchMode {}
unsafe impl RawConvert for DispatchMode {}
unsafe impl Unaligned for DispatchMode {}
unsafe impl InteriorImmutable for DispatchMode {}

impl DispatchMode {
    /// Both modes, generic first.
    pub const ALL: [Self; 2] = [Self::Generic, Self::Accelerated];
}

impl TryFrom<u8> for DispatchMode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Generic),
            1 => Ok(Self::Accelerated),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("generic"),
            Self::Accelerated => f.write_str("accelerated"),
        }
    }
}

/// Process-wide default for [`crate::imperative::Imperative::invoke_default`].
static GLOBAL_DISPATCH_MODE: AtomicU8 = AtomicU8::new(DispatchMode::Generic as u8);

/// Sets the default dispatch mode.
///
/// # Example
///
/// ```
/// use briny_dispatch::backend::{set_dispatch_mode, get_dispatch_mode, DispatchMode};
/// set_dispatch_mode(DispatchMode::Accelerated);
/// assert_eq!(get_dispatch_mode(), DispatchMode::Accelerated);
/// set_dispatch_mode(DispatchMode::Generic);
/// ```
pub fn set_dispatch_mode(mode: DispatchMode) {
    GLOBAL_DISPATCH_MODE.store(mode as u8, Ordering::Release);
}

/// Returns the default dispatch mode.
///
/// If the stored value is invalid, defaults to [`DispatchMode::Generic`].
pub fn get_dispatch_mode() -> DispatchMode {
    DispatchMode::try_from(GLOBAL_DISPATCH_MODE.load(Ordering::Acquire)).unwrap_or_default()
}
