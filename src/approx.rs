//! Tolerance-bounded equality of floating point values.
//!
//! Two values are considered equal when `|a - b| <= atol + rtol * |b|`, where
//! `b` is the reference value. Structural operators (copy, concat, sum) are
//! checked with [`Tolerance::EXACT`] instead.

/// Default relative tolerance.
pub const DEFAULT_RTOL: f32 = 1e-5;

/// Default absolute tolerance.
pub const DEFAULT_ATOL: f32 = 1e-8;

/// A pair of relative and absolute tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Scales with the magnitude of the reference value.
    pub rtol: f32,
    /// Constant slack.
    pub atol: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: DEFAULT_RTOL,
            atol: DEFAULT_ATOL,
        }
    }
}

impl Tolerance {
    /// Bit-for-bit value equality (`-0.0 == 0.0`).
    pub const EXACT: Self = Self { rtol: 0.0, atol: 0.0 };

    /// Builds a tolerance from explicit bounds.
    #[must_use]
    pub const fn new(rtol: f32, atol: f32) -> Self {
        Self { rtol, atol }
    }

    /// The accepted absolute difference against `reference`.
    #[must_use]
    pub fn bound(&self, reference: f32) -> f32 {
        self.atol + self.rtol * reference.abs()
    }

    /// Whether `actual` is accepted against `reference`.
    ///
    /// NaN never compares equal.
    #[must_use]
    pub fn accepts(&self, actual: f32, reference: f32) -> bool {
        if *self == Self::EXACT {
            return actual == reference;
        }
        (actual - reference).abs() <= self.bound(reference)
    }
}

/// Checks closeness of `self` against a reference under a [`Tolerance`].
pub trait CloseTo<Rhs: ?Sized> {
    /// Index of the first element that is not accepted, if any.
    fn first_mismatch(&self, reference: &Rhs, tol: Tolerance) -> Option<usize>;

    /// Whether every element is accepted.
    fn close_to(&self, reference: &Rhs, tol: Tolerance) -> bool {
        self.first_mismatch(reference, tol).is_none()
    }
}

impl CloseTo<f32> for f32 {
    fn first_mismatch(&self, reference: &f32, tol: Tolerance) -> Option<usize> {
        (!tol.accepts(*self, *reference)).then_some(0)
    }
}

impl CloseTo<[f32]> for [f32] {
    fn first_mismatch(&self, reference: &[f32], tol: Tolerance) -> Option<usize> {
        if self.len() != reference.len() {
            return Some(self.len().min(reference.len()));
        }
        self.iter()
            .zip(reference)
            .position(|(a, b)| !tol.accepts(*a, *b))
    }
}

impl<const N: usize> CloseTo<[f32; N]> for [f32; N] {
    fn first_mismatch(&self, reference: &[f32; N], tol: Tolerance) -> Option<usize> {
        self.as_slice().first_mismatch(reference.as_slice(), tol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bound_scales_with_reference() {
        let tol = Tolerance::default();
        assert!(tol.accepts(1000.005, 1000.0));
        assert!(!tol.accepts(1000.1, 1000.0));
        assert!(tol.accepts(0.0, 0.0));
    }

    #[test]
    fn exact_rejects_any_difference() {
        assert!(Tolerance::EXACT.accepts(-0.0, 0.0));
        assert!(!Tolerance::EXACT.accepts(1.0, 1.000_000_1));
        assert!(!Tolerance::EXACT.accepts(f32::NAN, f32::NAN));
    }

    #[test]
    fn slices_report_first_bad_index() {
        let a = [1.0, 2.0, 3.5];
        let b = [1.0, 2.0, 3.0];
        assert_eq!(a.first_mismatch(&b, Tolerance::default()), Some(2));
        assert!(a[..2].close_to(&b[..2], Tolerance::EXACT));
        assert_eq!(a[..2].first_mismatch(&b[..], Tolerance::EXACT), Some(2));
    }
}
