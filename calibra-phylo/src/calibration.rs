//! Calibration points: an age distribution attached to the MRCA of a clade.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use calibra_core::{CalibraError, Result};
use calibra_stats::CalibrationDensity;

/// A set of taxon names, kept sorted so containment checks and display are
/// deterministic.
pub type Clade = BTreeSet<String>;

/// An age constraint on a clade.
///
/// The distribution applies to the height of the clade's MRCA, or to the
/// height of the MRCA's parent when `for_parent` is set (the "stem age" of
/// the clade). Calibration points are immutable once built; the distribution
/// is shared rather than copied.
#[derive(Clone)]
pub struct CalibrationPoint {
    label: String,
    clade: Clade,
    density: Arc<dyn CalibrationDensity>,
    for_parent: bool,
}

impl CalibrationPoint {
    /// Calibrate the MRCA of `taxa` with `density`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `taxa` is empty.
    pub fn new<I, S>(label: impl Into<String>, taxa: I, density: Arc<dyn CalibrationDensity>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let label = label.into();
        let clade: Clade = taxa.into_iter().map(Into::into).collect();
        if clade.is_empty() {
            return Err(CalibraError::Configuration(format!(
                "calibration '{}' has an empty clade",
                label
            )));
        }
        Ok(Self {
            label,
            clade,
            density,
            for_parent: false,
        })
    }

    /// Apply the distribution to the parent of the clade's MRCA instead.
    pub fn for_parent(mut self) -> Self {
        self.for_parent = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn clade(&self) -> &Clade {
        &self.clade
    }

    pub fn size(&self) -> usize {
        self.clade.len()
    }

    pub fn is_for_parent(&self) -> bool {
        self.for_parent
    }

    pub fn density(&self) -> &Arc<dyn CalibrationDensity> {
        &self.density
    }

    /// Log-density of the calibration distribution at `height`.
    pub fn log_density(&self, height: f64) -> f64 {
        self.density.log_density(height)
    }

    /// True if every taxon of `self` is also in `other`.
    pub fn is_within(&self, other: &CalibrationPoint) -> bool {
        self.clade.is_subset(&other.clade)
    }

    /// True if the two clades share at least one taxon.
    pub fn overlaps(&self, other: &CalibrationPoint) -> bool {
        !self.clade.is_disjoint(&other.clade)
    }

    /// Height range supported by the distribution, for starting-tree
    /// construction.
    ///
    /// Infinite or negative quantiles are clamped into `[0, upper]`.
    pub fn height_bounds(&self, upper: f64) -> (f64, f64) {
        let lo = self.density.quantile(0.0);
        let hi = self.density.quantile(1.0);
        let lo = if lo.is_finite() { lo.max(0.0) } else { 0.0 };
        let hi = if hi.is_finite() { hi.min(upper) } else { upper };
        (lo.min(hi), hi)
    }
}

impl fmt::Debug for CalibrationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalibrationPoint")
            .field("label", &self.label)
            .field("clade", &self.clade)
            .field("density", &self.density)
            .field("for_parent", &self.for_parent)
            .finish()
    }
}

impl fmt::Display for CalibrationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let taxa: Vec<&str> = self.clade.iter().map(String::as_str).collect();
        write!(f, "{}{{{}}}", self.label, taxa.join(","))?;
        if self.for_parent {
            write!(f, "^")?;
        }
        Ok(())
    }
}
