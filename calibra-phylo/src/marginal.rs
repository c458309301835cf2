//! Marginal densities of calibrated node heights under the uncalibrated
//! process.
//!
//! The calibrated prior divides the base density by the marginal density of
//! the calibrated heights. For one clade and for two directly nested clades
//! under a Yule process that marginal has a closed form. Everything else goes
//! through [`general_log_marginal`], which sums over the lineage-count
//! trajectories produced by a [`LineageIterator`].
//!
//! The closed forms drop factors that depend only on clade sizes and the leaf
//! count, so they differ from the general path by a constant.

use std::f64::consts::LN_2;

use calibra_core::LogProb;

use crate::branching::BirthDeathParams;
use crate::lineages::LineageIterator;
use crate::tables::NumericTables;
use crate::tree::RankedTree;

/// Substitute for `ln(1 - e^0)` when two calibrated heights coincide.
const TIED_HEIGHTS_LOG_BASE: f64 = -50.0;

/// Closed-form log marginal of a single calibrated height under a Yule
/// process.
///
/// `h` is the MRCA height of a clade of `clade_size` taxa, or the height of
/// the MRCA's parent when `for_parent` is set.
pub fn one_clade_log_marginal(
    lambda: f64,
    leaf_count: usize,
    h: f64,
    clade_size: usize,
    for_parent: bool,
) -> f64 {
    let lh = lambda * h;
    if for_parent {
        let mut lgp = -2.0 * lh + lambda.ln();
        if clade_size > 1 {
            lgp += (clade_size as f64 - 1.0) * (1.0 - (-lh).exp()).ln();
        }
        lgp
    } else {
        let mut lgp = -3.0 * lh + (clade_size as f64 - 2.0) * (1.0 - (-lh).exp()).ln() + lambda.ln();
        if clade_size == leaf_count {
            lgp += lh;
        }
        lgp
    }
}

/// Closed-form log marginal of two nested calibrated heights under a Yule
/// process.
///
/// The inner clade has `inner_size` taxa and MRCA height `h_inner`; it is the
/// only calibrated clade inside the outer clade of `outer_size` taxa at
/// `h_outer`.
pub fn two_nested_log_marginal(
    lambda: f64,
    leaf_count: usize,
    h_inner: f64,
    inner_size: usize,
    h_outer: f64,
    outer_size: usize,
) -> f64 {
    let n = inner_size as f64;
    let m = (outer_size - inner_size) as f64;

    let e2 = (-lambda * h_inner).exp();
    let e1 = (-lambda * h_outer).exp();

    let mut lgl = 2.0 * lambda.ln();
    lgl += (n - 2.0) * (1.0 - e2).ln();
    lgl += (m - 3.0) * (1.0 - e1).ln();
    lgl += (1.0 - 2.0 * m * e1 + 2.0 * (m - 1.0) * e2 - m * (m - 1.0) * e1 * e2
        + (m * (m + 1.0) / 2.0) * e1 * e1
        + ((m - 1.0) * (m - 2.0) / 2.0) * e2 * e2)
        .ln();

    if outer_size < leaf_count {
        lgl -= lambda * (h_inner + 3.0 * h_outer);
    } else {
        lgl -= lambda * (h_inner + 2.0 * h_outer);
    }
    lgl
}

/// Sort calibrated heights and rank them.
///
/// Returns the heights in increasing order and, per input position, its
/// 1-based rank. Equal heights keep their input order.
pub fn rank_heights(heights: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let n = heights.len();
    let mut sorted = vec![0.0; n];
    let mut ranks = vec![0usize; n];
    for (k, &hk) in heights.iter().enumerate() {
        let below = heights[..k].iter().filter(|&&h| h <= hk).count()
            + heights[k + 1..].iter().filter(|&&h| h < hk).count();
        ranks[k] = below + 1;
        sorted[below] = hk;
    }
    (sorted, ranks)
}

/// Log marginal of the calibrated heights by trajectory enumeration.
///
/// `sorted` holds the calibrated heights in increasing order and `ranks` the
/// rank of each ordered clade. Returns negative infinity when the ranks admit
/// no trajectories.
pub fn general_log_marginal(
    lambda: f64,
    sorted: &[f64],
    ranks: &[usize],
    iter: &mut LineageIterator,
    tables: &NumericTables,
) -> f64 {
    let enumerators = iter.setup(ranks);
    let heights = sorted.len();
    let free_root = !iter.is_root_calibrated();
    let levels = heights + usize::from(free_root);

    let mut lehs = Vec::with_capacity(heights + 1);
    lehs.push(0.0);
    lehs.extend(sorted.iter().map(|&h| -lambda * h));

    let mut lebase = vec![0.0; levels];
    for i in 0..heights {
        let d = lehs[i + 1] - lehs[i];
        lebase[i] = if d != 0.0 {
            lehs[i] + (-d.exp()).ln_1p()
        } else {
            TIED_HEIGHTS_LOG_BASE
        };
    }
    if free_root {
        lebase[heights] = lehs[heights];
    }

    let joiners = iter.joiners();
    let mut lins_at_level = vec![0usize; levels];
    let mut total = LogProb::impossible();
    let mut combos = 0usize;

    while let Some(lins) = iter.next() {
        combos += 1;
        let mut v = count_ranked_trees(levels, lins, &joiners, &mut lins_at_level, tables);
        if free_root {
            // Two extra lineages: one for the root itself, one because the
            // free-root enumerator tops out at two lineages.
            let ll = lins_at_level[levels - 1] + 2;
            lins_at_level[levels - 1] = ll;
            v -= tables.ln_choose2(ll) + LN_2;
        }
        for i in 0..levels {
            v += lins_at_level[i] as f64 * lebase[i];
        }
        total = total.ln_add(LogProb(v));
    }
    if combos == 0 {
        return f64::NEG_INFINITY;
    }

    let mut logc0 = 0.0;
    let mut tot_lin = 0usize;
    for i in 0..enumerators {
        let l = iter.start(i);
        if l > 0 {
            logc0 += tables.ln_ranked_histories(l);
            tot_lin += l;
        }
    }
    let logc1 = tables.ln_factorial(tot_lin);

    let mut logc2 = heights as f64 * lambda.ln();
    logc2 += lehs[1..].iter().sum::<f64>();
    if !free_root {
        logc2 += lehs[heights];
    }

    total.0 + logc0 + logc1 + logc2
}

/// Log number of ranked topologies compatible with the rank assignment.
///
/// Negative infinity when the ranks admit no trajectories.
pub fn log_ranked_tree_count(ranks: &[usize], iter: &mut LineageIterator, tables: &NumericTables) -> f64 {
    let levels = iter.setup(ranks);
    let free_root = !iter.is_root_calibrated();
    let joiners = iter.joiners();
    let mut lins_at_level = vec![0usize; levels];

    let mut total = LogProb::impossible();
    while let Some(lins) = iter.next() {
        let mut v = count_ranked_trees(levels, lins, &joiners, &mut lins_at_level, tables);
        if free_root {
            let ll = lins_at_level[levels - 1] + 2;
            v -= tables.ln_choose2(ll) + LN_2;
        }
        total = total.ln_add(LogProb(v));
    }
    total.0
}

/// Log count of ranked histories for one combination of trajectories; fills
/// `lins_at_level` with the number of coalescences inside each level.
fn count_ranked_trees(
    levels: usize,
    lins: &[Vec<usize>],
    joiners: &[Vec<usize>],
    lins_at_level: &mut [usize],
    tables: &NumericTables,
) -> f64 {
    let mut log_count = 0.0;
    for i in 0..levels {
        let mut sum_lins = 0;
        for k in i..levels {
            let lack = &lins[k];
            let mut cki = lack[i];
            if joiners[k][i] > 0 {
                cki += 1;
                // One lineage only when a level holds nothing but the joiner.
                if cki > 1 {
                    log_count += tables.ln_choose2(cki);
                }
            }
            let Some(l) = cki.checked_sub(lack[i + 1]) else {
                return f64::NEG_INFINITY;
            };
            log_count -= tables.ln_factorial(l);
            sum_lins += l;
        }
        lins_at_level[i] = sum_lins;
    }
    log_count
}

/// Internal nodes (root included) strictly between consecutive calibrated
/// heights.
///
/// `cs[0]` counts nodes below the lowest height, `cs[i]` those between
/// heights `i - 1` and `i`, and `cs[k]` those above the highest. Nodes sitting
/// exactly on a calibrated height are the calibrated nodes and are not
/// counted.
pub fn interval_node_counts<T: RankedTree>(tree: &T, sorted: &[f64]) -> Vec<usize> {
    let k = sorted.len();
    let mut cs = vec![0usize; k + 1];
    for id in tree.internal_ids() {
        let h = tree.height(id);
        match sorted.iter().position(|&s| s >= h) {
            None => cs[k] += 1,
            Some(i) if h < sorted[i] => cs[i] += 1,
            Some(_) => {}
        }
    }
    cs
}

/// Log marginal of the calibrated heights and interval node counts under a
/// Yule process.
pub fn restricted_yule_log_marginal(lambda: f64, sorted: &[f64], cs: &[usize], tables: &NumericTables) -> f64 {
    let k = sorted.len();
    let mut ll = cs[0] as f64 * (-(-lambda * sorted[0]).exp()).ln_1p() - lambda * sorted[0]
        - tables.ln_factorial(cs[0]);
    for i in 1..k {
        let c = cs[i];
        ll += c as f64 * ((-(-lambda * (sorted[i] - sorted[i - 1])).exp()).ln_1p() - lambda * sorted[i - 1]);
        ll += -lambda * sorted[i] - tables.ln_factorial(c);
    }
    ll += -lambda * (cs[k] + 1) as f64 * sorted[k - 1] - tables.ln_factorial(cs[k] + 1);
    ll += lambda.ln() * k as f64;
    ll
}

/// Log marginal of the calibrated heights and interval node counts under a
/// birth-death process with incomplete sampling.
pub fn restricted_birth_death_log_marginal(
    params: &BirthDeathParams,
    leaf_count: usize,
    sorted: &[f64],
    cs: &[usize],
    tables: &NumericTables,
) -> f64 {
    let r = params.birth_rate;
    let rho = params.sampling_probability;
    let ia = 1.0 - params.relative_death_rate;
    let ira = ia - rho;
    let v = ia * ia / r;
    let k = sorted.len();

    let mut ll = 0.0;
    for i in 0..k {
        let c = cs[i] as f64;
        let mrh = -r * sorted[i];
        let mrh1 = if i > 0 { -r * sorted[i - 1] } else { 0.0 };

        ll -= tables.ln_factorial(cs[i]);
        let xxo = (-(mrh - mrh1).exp()).ln_1p();
        let xx1 = rho + ira * mrh.exp();
        let xx2 = rho + ira * mrh1.exp();
        ll += c * (mrh1 + xxo + (v / (xx1 * xx2)).ln());

        // The calibrated node itself.
        let z = (ia / (rho + ira * mrh.exp())).ln();
        ll += 2.0 * z + mrh;
    }

    // From the highest calibration to infinity.
    let xu = ia / (rho + ira * (-r * sorted[k - 1]).exp());
    let n2 = cs[k];
    let rhoia = rho / ia;
    ll += -tables.ln_factorial(n2 + 1) - n2 as f64 * (r * rhoia).ln() - (n2 + 1) as f64 * r * sorted[k - 1]
        + (n2 + 1) as f64 * xu.ln();

    ll += tables.ln_factorial(leaf_count) + (leaf_count as f64 - 1.0) * (r * rhoia).ln();
    ll
}
