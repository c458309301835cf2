//! Log-space arithmetic for numerically stable computation.
//!
//! [`LogProb`] stores a non-negative weight (a probability, a density, or a
//! count of ranked trees) as its natural logarithm. Marginal densities are
//! sums of many terms spanning hundreds of orders of magnitude, so they are
//! accumulated with [`LogProb::ln_add`] rather than in linear space.

use crate::{CalibraError, Result};

/// A non-negative weight stored as its natural logarithm: `ln(w)`.
///
/// Negative infinity represents a zero weight. Values above 0.0 are allowed,
/// since densities and tree counts are not bounded by one.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogProb(pub f64);

impl LogProb {
    /// Create a [`LogProb`] from a raw probability in `(0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `p` is not in `(0, 1]`.
    pub fn from_prob(p: f64) -> Result<Self> {
        if p <= 0.0 || p > 1.0 {
            return Err(CalibraError::InvalidInput(
                "LogProb::from_prob: p must be in (0, 1]".into(),
            ));
        }
        Ok(Self(p.ln()))
    }

    /// Convert back to linear space.
    pub fn to_prob(self) -> f64 {
        self.0.exp()
    }

    /// Log-sum-exp: compute `ln(exp(self) + exp(other))` without overflow.
    ///
    /// This is the log-space equivalent of addition in probability space.
    pub fn ln_add(self, other: Self) -> Self {
        if self.0 == f64::NEG_INFINITY {
            return other;
        }
        if other.0 == f64::NEG_INFINITY {
            return self;
        }
        let (max, min) = if self.0 >= other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        Self(max + (min - max).exp().ln_1p())
    }

    /// Multiply two weights in log-space (addition of log values).
    pub fn ln_mul(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }

    /// Certain event: `ln(1) = 0`.
    pub const fn certain() -> Self {
        Self(0.0)
    }

    /// Impossible event: `ln(0) = -∞`.
    pub const fn impossible() -> Self {
        Self(f64::NEG_INFINITY)
    }

    /// True for a zero weight.
    pub fn is_impossible(self) -> bool {
        self.0 == f64::NEG_INFINITY
    }
}

impl std::iter::Sum for LogProb {
    /// Log-sum-exp over an iterator; an empty iterator sums to zero weight.
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::impossible(), Self::ln_add)
    }
}

/// `ln(exp(a) + exp(b))` on raw log values.
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    LogProb(a).ln_add(LogProb(b)).0
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    #[test]
    fn logprob_from_prob_half() {
        let lp = LogProb::from_prob(0.5).unwrap();
        assert!((lp.0 - 0.5_f64.ln()).abs() < TOL);
    }

    #[test]
    fn logprob_invalid() {
        assert!(LogProb::from_prob(0.0).is_err());
        assert!(LogProb::from_prob(-0.5).is_err());
        assert!(LogProb::from_prob(1.5).is_err());
    }

    #[test]
    fn logprob_certain_impossible() {
        assert_eq!(LogProb::certain().to_prob(), 1.0);
        assert_eq!(LogProb::impossible().to_prob(), 0.0);
        assert!(LogProb::impossible().is_impossible());
    }

    #[test]
    fn logprob_ln_add() {
        let a = LogProb::from_prob(0.3).unwrap();
        let b = LogProb::from_prob(0.2).unwrap();
        let sum = a.ln_add(b);
        assert!((sum.to_prob() - 0.5).abs() < TOL);
    }

    #[test]
    fn logprob_ln_add_identity() {
        let a = LogProb::from_prob(0.7).unwrap();
        let sum = a.ln_add(LogProb::impossible());
        assert!((sum.to_prob() - 0.7).abs() < TOL);

        let sum2 = LogProb::impossible().ln_add(a);
        assert!((sum2.to_prob() - 0.7).abs() < TOL);
    }

    #[test]
    fn ln_add_large_values_do_not_overflow() {
        // exp(800) overflows f64; the log-space sum must not.
        let s = log_sum_exp(800.0, 800.0);
        assert!((s - (800.0 + 2.0_f64.ln())).abs() < TOL);

        let s = log_sum_exp(-800.0, 0.0);
        assert!((s - 0.0).abs() < TOL);
    }

    #[test]
    fn sum_of_iterator() {
        let total: LogProb = [0.1, 0.2, 0.3, 0.4]
            .iter()
            .map(|&p| LogProb::from_prob(p).unwrap())
            .sum();
        assert!((total.0 - 0.0).abs() < TOL);

        let empty: LogProb = std::iter::empty().sum();
        assert!(empty.is_impossible());
    }

    #[test]
    fn logprob_ln_mul() {
        let a = LogProb::from_prob(0.5).unwrap();
        let product = a.ln_mul(a);
        assert!((product.to_prob() - 0.25).abs() < TOL);
    }
}
