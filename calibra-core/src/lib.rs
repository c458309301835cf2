//! Shared primitives for the Calibra calibrated-tree-prior crates.
//!
//! - **Error types**: [`CalibraError`] and [`Result`] for structured error handling
//! - **Log-space arithmetic**: [`LogProb`] and [`log_sum_exp`] for stable sums
//!   of many small terms
//! - **Traits**: [`Summarizable`] one-line descriptions

pub mod error;
pub mod prob;
pub mod traits;

pub use error::{CalibraError, Result};
pub use prob::{log_sum_exp, LogProb};
pub use traits::*;
