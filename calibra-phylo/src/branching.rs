//! Yule and birth-death densities of ranked time trees.
//!
//! Both densities are for the node heights of an oriented, ranked tree
//! conditioned on the number of sampled taxa. The Yule density omits the
//! `n!` normalisation; the birth-death density includes it.

use calibra_core::{CalibraError, Result};

use crate::tables::NumericTables;
use crate::tree::RankedTree;

/// Parameters of a constant-rate birth-death process.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BirthDeathParams {
    /// Birth rate λ (for a birth-death process, the net diversification rate).
    pub birth_rate: f64,
    /// Death rate relative to the birth rate, `a = μ/λ`.
    pub relative_death_rate: f64,
    /// Probability that an extant lineage is sampled, ρ.
    pub sampling_probability: f64,
}

impl BirthDeathParams {
    /// Pure-birth parameters: `a = 0`, `ρ = 1`.
    pub fn yule(birth_rate: f64) -> Result<Self> {
        Self::new(birth_rate, 0.0, 1.0)
    }

    /// Validated birth-death parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless `λ > 0` is finite,
    /// `0 <= a < 1` and `0 < ρ <= 1`.
    pub fn new(birth_rate: f64, relative_death_rate: f64, sampling_probability: f64) -> Result<Self> {
        if !(birth_rate > 0.0) || !birth_rate.is_finite() {
            return Err(CalibraError::Configuration(format!(
                "birth rate must be positive and finite, got {}",
                birth_rate
            )));
        }
        if !(0.0..1.0).contains(&relative_death_rate) {
            return Err(CalibraError::Configuration(format!(
                "relative death rate must be in [0, 1), got {}",
                relative_death_rate
            )));
        }
        if !(sampling_probability > 0.0 && sampling_probability <= 1.0) {
            return Err(CalibraError::Configuration(format!(
                "sampling probability must be in (0, 1], got {}",
                sampling_probability
            )));
        }
        Ok(Self {
            birth_rate,
            relative_death_rate,
            sampling_probability,
        })
    }

    /// True when the process reduces to a Yule process.
    pub fn is_pure_birth(&self) -> bool {
        self.relative_death_rate == 0.0 && self.sampling_probability == 1.0
    }
}

/// Log-density of the internal node heights under a Yule process with rate
/// `lambda`.
///
/// `(n - 1) ln λ - λ Σ h_i - λ h_root`: the root height enters twice because
/// the process is conditioned to start with two lineages.
pub fn yule_log_likelihood<T: RankedTree>(tree: &T, lambda: f64) -> f64 {
    let n = tree.leaf_count();
    let mut log_l = (n as f64 - 1.0) * lambda.ln();
    for id in tree.internal_ids() {
        let mrh = -lambda * tree.height(id);
        log_l += mrh;
        if tree.is_root(id) {
            log_l += mrh;
        }
    }
    log_l
}

/// Log-density of the internal node heights under a birth-death process
/// with incomplete sampling.
///
/// Falls back to [`yule_log_likelihood`] when `a = 0` and `ρ = 1`.
pub fn birth_death_log_likelihood<T: RankedTree>(
    tree: &T,
    params: &BirthDeathParams,
    tables: &NumericTables,
) -> f64 {
    if params.is_pure_birth() {
        return yule_log_likelihood(tree, params.birth_rate);
    }
    full_birth_death(tree, params, tables)
}

fn full_birth_death<T: RankedTree>(tree: &T, params: &BirthDeathParams, tables: &NumericTables) -> f64 {
    let r = params.birth_rate;
    let a = params.relative_death_rate;
    let rho = params.sampling_probability;
    let n = tree.leaf_count();

    let mut log_l = tables.ln_factorial(n) + (n as f64 - 1.0) * (r * rho).ln();
    log_l += n as f64 * (1.0 - a).ln();

    for id in tree.internal_ids() {
        let mrh = -r * tree.height(id);
        let z = (rho + ((1.0 - rho) - a) * mrh.exp()).ln();
        let mut l = -2.0 * z + mrh;
        if tree.is_root(id) {
            l += mrh - z;
        }
        log_l += l;
    }
    log_l
}
