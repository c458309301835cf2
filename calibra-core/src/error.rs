//! Structured error types for the Calibra crates.

use thiserror::Error;

/// Unified error type for all Calibra operations.
///
/// Only setup-time failures are errors. A tree that violates a calibration
/// during evaluation is scored as negative infinity instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibraError {
    /// Parse error (malformed input data)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Model configuration that cannot be evaluated (overlapping clades,
    /// unknown taxa, death rate not below birth rate, ...)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the Calibra crates.
pub type Result<T> = std::result::Result<T, CalibraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes() {
        let e = CalibraError::Configuration("overlapping clades".into());
        assert_eq!(e.to_string(), "configuration error: overlapping clades");
        let e = CalibraError::Parse("expected ';'".into());
        assert_eq!(e.to_string(), "parse error: expected ';'");
    }
}
