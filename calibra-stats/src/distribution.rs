//! Calibration densities for node ages.
//!
//! Provides the [`CalibrationDensity`] trait consumed by the calibrated tree
//! priors, and the families most often used to date fossil calibrations:
//! [`Normal`], [`LogNormal`], [`Exponential`], [`Uniform`] and the degenerate
//! [`PointMass`]. Offsets shift a distribution's support to start at a hard
//! minimum age.

use core::f64::consts::PI;
use core::fmt;

use calibra_core::{CalibraError, Result};

// ── Numerical helpers ──────────────────────────────────────────────────────

/// Error function via Abramowitz & Stegun 7.1.26 (max error ~1.5e-7).
pub fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal quantile Φ⁻¹(p) via Acklam's rational approximation
/// (relative error below 1.2e-9).
///
/// Returns negative infinity at `p = 0` and positive infinity at `p = 1`.
pub fn probit(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

fn check_probability(p: f64) -> f64 {
    if p.is_nan() {
        p
    } else {
        p.clamp(0.0, 1.0)
    }
}

// ── Calibration density trait ──────────────────────────────────────────────

/// A distribution over a node age, as used by a calibration point.
///
/// Only the log-density and the quantile function are needed: the density
/// scores the calibrated height, the quantiles bound compatible heights.
pub trait CalibrationDensity: fmt::Debug + Send + Sync {
    /// Natural log of the density at `x`; negative infinity outside the
    /// support.
    fn log_density(&self, x: f64) -> f64;

    /// Inverse cumulative distribution function. May return ±∞ at
    /// `p = 0` or `p = 1` for unbounded supports.
    fn quantile(&self, p: f64) -> f64;

    /// Density at `x`.
    fn density(&self, x: f64) -> f64 {
        self.log_density(x).exp()
    }
}

// ── Normal ─────────────────────────────────────────────────────────────────

/// Normal (Gaussian) distribution with parameters μ and σ.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Normal {
    mu: f64,
    sigma: f64,
}

impl Normal {
    /// Create a new Normal distribution. `sigma` must be positive.
    pub fn new(mu: f64, sigma: f64) -> Result<Self> {
        if !(sigma > 0.0) || !mu.is_finite() {
            return Err(CalibraError::InvalidInput(
                "Normal: sigma must be positive and mu finite".into(),
            ));
        }
        Ok(Self { mu, sigma })
    }

    /// Cumulative distribution function.
    pub fn cdf(&self, x: f64) -> f64 {
        let z = (x - self.mu) / self.sigma;
        0.5 * (1.0 + erf(z / core::f64::consts::SQRT_2))
    }
}

impl CalibrationDensity for Normal {
    fn log_density(&self, x: f64) -> f64 {
        let z = (x - self.mu) / self.sigma;
        -0.5 * z * z - self.sigma.ln() - 0.5 * (2.0 * PI).ln()
    }

    fn quantile(&self, p: f64) -> f64 {
        self.mu + self.sigma * probit(check_probability(p))
    }
}

// ── Log-normal ─────────────────────────────────────────────────────────────

/// Log-normal distribution: `ln(x - offset) ~ N(mu, sigma)`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogNormal {
    mu: f64,
    sigma: f64,
    offset: f64,
}

impl LogNormal {
    /// Log-normal with mean `mu` and standard deviation `sigma` in log space.
    pub fn new(mu: f64, sigma: f64) -> Result<Self> {
        Self::with_offset(mu, sigma, 0.0)
    }

    /// Log-normal whose support starts at `offset`.
    pub fn with_offset(mu: f64, sigma: f64, offset: f64) -> Result<Self> {
        if !(sigma > 0.0) || !mu.is_finite() || !offset.is_finite() {
            return Err(CalibraError::InvalidInput(
                "LogNormal: sigma must be positive, mu and offset finite".into(),
            ));
        }
        Ok(Self { mu, sigma, offset })
    }
}

impl CalibrationDensity for LogNormal {
    fn log_density(&self, x: f64) -> f64 {
        let y = x - self.offset;
        if y <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let z = (y.ln() - self.mu) / self.sigma;
        -0.5 * z * z - y.ln() - self.sigma.ln() - 0.5 * (2.0 * PI).ln()
    }

    fn quantile(&self, p: f64) -> f64 {
        let p = check_probability(p);
        if p <= 0.0 {
            return self.offset;
        }
        self.offset + (self.mu + self.sigma * probit(p)).exp()
    }
}

// ── Exponential ────────────────────────────────────────────────────────────

/// Exponential distribution with the given mean, shifted by `offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Exponential {
    mean: f64,
    offset: f64,
}

impl Exponential {
    /// Exponential with mean `mean` (rate `1 / mean`).
    pub fn new(mean: f64) -> Result<Self> {
        Self::with_offset(mean, 0.0)
    }

    /// Exponential whose support starts at `offset`.
    pub fn with_offset(mean: f64, offset: f64) -> Result<Self> {
        if !(mean > 0.0) || !mean.is_finite() || !offset.is_finite() {
            return Err(CalibraError::InvalidInput(
                "Exponential: mean must be positive and finite".into(),
            ));
        }
        Ok(Self { mean, offset })
    }
}

impl CalibrationDensity for Exponential {
    fn log_density(&self, x: f64) -> f64 {
        let y = x - self.offset;
        if y < 0.0 {
            return f64::NEG_INFINITY;
        }
        -y / self.mean - self.mean.ln()
    }

    fn quantile(&self, p: f64) -> f64 {
        let p = check_probability(p);
        self.offset - self.mean * (-p).ln_1p()
    }
}

// ── Uniform ────────────────────────────────────────────────────────────────

/// Uniform distribution on `[lower, upper]`. `upper` may be infinite, in
/// which case the density is improper (constant one).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Uniform {
    lower: f64,
    upper: f64,
}

impl Uniform {
    /// Uniform on `[lower, upper]`; requires `lower < upper`.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !lower.is_finite() || !(lower < upper) {
            return Err(CalibraError::InvalidInput(format!(
                "Uniform: need finite lower < upper, got [{}, {}]",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }
}

impl CalibrationDensity for Uniform {
    fn log_density(&self, x: f64) -> f64 {
        if x < self.lower || x > self.upper {
            return f64::NEG_INFINITY;
        }
        if self.upper.is_infinite() {
            0.0
        } else {
            -(self.upper - self.lower).ln()
        }
    }

    fn quantile(&self, p: f64) -> f64 {
        let p = check_probability(p);
        if self.upper.is_infinite() {
            return if p >= 1.0 { f64::INFINITY } else { self.lower };
        }
        self.lower + p * (self.upper - self.lower)
    }
}

// ── Point mass ─────────────────────────────────────────────────────────────

/// A degenerate distribution fixing the age at `value`.
///
/// The log-density is taken against counting measure: zero at the point and
/// negative infinity elsewhere. Heights within a relative `1e-12` of the
/// point are accepted to absorb rounding in branch-length sums.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointMass {
    value: f64,
}

impl PointMass {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(CalibraError::InvalidInput(
                "PointMass: value must be finite".into(),
            ));
        }
        Ok(Self { value })
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl CalibrationDensity for PointMass {
    fn log_density(&self, x: f64) -> f64 {
        if (x - self.value).abs() <= 1e-12 * self.value.abs().max(1.0) {
            0.0
        } else {
            f64::NEG_INFINITY
        }
    }

    fn quantile(&self, _p: f64) -> f64 {
        self.value
    }
}
