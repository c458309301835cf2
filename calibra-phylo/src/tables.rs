//! Precomputed log-scale combinatorial tables.
//!
//! Everything here is indexed by an integer lineage count and sized once per
//! tree, so the correction engine never recomputes factorials in its inner
//! loops.

use std::f64::consts::LN_2;

/// Log-integer, log-choose-2, log-factorial and log ranked-history tables.
#[derive(Debug, Clone)]
pub struct NumericTables {
    lints: Vec<f64>,
    lc2: Vec<f64>,
    lfactorials: Vec<f64>,
    lnr: Vec<f64>,
}

impl NumericTables {
    /// Tables large enough for a tree with `leaf_count` leaves.
    ///
    /// Entries run to `leaf_count + 1` inclusive, which covers the two extra
    /// lineages added for an uncalibrated root.
    pub fn new(leaf_count: usize) -> Self {
        let size = leaf_count + 2;

        let mut lints = vec![0.0f64; size];
        let mut lc2 = vec![f64::NEG_INFINITY; size];
        let mut lfactorials = vec![0.0f64; size];
        let mut lnr = vec![0.0f64; size];

        if size > 0 {
            lints[0] = f64::NEG_INFINITY;
            lnr[0] = f64::NEG_INFINITY;
        }
        for i in 2..size {
            lints[i] = (i as f64).ln();
            lc2[i] = lints[i] + lints[i - 1] - LN_2;
            lfactorials[i] = lfactorials[i - 1] + lints[i];
            lnr[i] = lnr[i - 1] + lc2[i];
        }

        Self {
            lints,
            lc2,
            lfactorials,
            lnr,
        }
    }

    /// Number of entries in each table.
    pub fn len(&self) -> usize {
        self.lints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lints.is_empty()
    }

    /// `ln i`, with `ln 0 = -inf`.
    pub fn ln_int(&self, i: usize) -> f64 {
        self.lints[i]
    }

    /// `ln C(i, 2)`, `-inf` for `i < 2`.
    pub fn ln_choose2(&self, i: usize) -> f64 {
        self.lc2[i]
    }

    /// `ln i!`.
    pub fn ln_factorial(&self, i: usize) -> f64 {
        self.lfactorials[i]
    }

    /// Log number of ranked coalescent histories of `i` lineages,
    /// `ln prod_{k=2..i} C(k, 2)`. `-inf` at zero, zero at one.
    pub fn ln_ranked_histories(&self, i: usize) -> f64 {
        self.lnr[i]
    }
}
