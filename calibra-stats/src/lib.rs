//! Calibration densities for the Calibra crates.
//!
//! - **Distributions**: [`CalibrationDensity`] and the usual node-age
//!   calibration families (normal, log-normal, exponential, uniform, point mass)
//! - **Numerical helpers**: [`erf`](distribution::erf) and
//!   [`probit`](distribution::probit)

pub mod distribution;

pub use distribution::{
    CalibrationDensity, Exponential, LogNormal, Normal, PointMass, Uniform,
};
