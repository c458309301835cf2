//! Calibrated Yule and birth-death tree priors.
//!
//! [`CalibratedTreePrior`] scores a time tree under a branching process whose
//! density has been reweighted so that the calibrated node heights follow
//! their calibration distributions exactly:
//!
//! ```text
//! log L = base(tree) + Σ log f_i(h_i) - log marginal(h_1, ..., h_k)
//! ```
//!
//! The last two terms are the *correction*. How the marginal is computed is
//! fixed once at construction (see [`MarginalStrategy`]).

use std::fmt;
use std::str::FromStr;

use log::{debug, warn};

use calibra_core::{CalibraError, Result, Summarizable};

use crate::branching::{birth_death_log_likelihood, yule_log_likelihood, BirthDeathParams};
use crate::calibration::CalibrationPoint;
use crate::lineages::LineageIterator;
use crate::marginal::{
    general_log_marginal, interval_node_counts, log_ranked_tree_count, one_clade_log_marginal,
    rank_heights, restricted_birth_death_log_marginal, restricted_yule_log_marginal,
    two_nested_log_marginal,
};
use crate::ordering::OrderedCalibrationSet;
use crate::tables::NumericTables;
use crate::tree::{NodeId, RankedTree};

/// Which marginal the correction divides by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CorrectionKind {
    /// Calibration densities only; the uncorrected product of densities.
    None,
    /// Marginal over calibrated times, summed over all topologies.
    #[default]
    Full,
    /// Marginal over calibrated times and the ranked topology counts.
    Restricted,
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CorrectionKind::None => "none",
            CorrectionKind::Full => "full",
            CorrectionKind::Restricted => "restricted",
        };
        f.write_str(s)
    }
}

impl FromStr for CorrectionKind {
    type Err = CalibraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CorrectionKind::None),
            "full" => Ok(CorrectionKind::Full),
            "restricted" => Ok(CorrectionKind::Restricted),
            other => Err(CalibraError::Configuration(format!(
                "unknown correction type '{}' (expected none, full or restricted)",
                other
            ))),
        }
    }
}

/// The uncalibrated branching process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Process {
    /// Pure birth; only the birth rate is used.
    #[default]
    Yule,
    /// Birth-death with incomplete sampling.
    BirthDeath,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process::Yule => f.write_str("yule"),
            Process::BirthDeath => f.write_str("birth-death"),
        }
    }
}

impl FromStr for Process {
    type Err = CalibraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yule" => Ok(Process::Yule),
            "birth-death" | "birthdeath" | "bd" => Ok(Process::BirthDeath),
            other => Err(CalibraError::Configuration(format!("unknown process '{}'", other))),
        }
    }
}

/// Configuration of a [`CalibratedTreePrior`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PriorConfig {
    pub process: Process,
    pub correction: CorrectionKind,
    /// Add the calibration log-densities to the correction. Turn off when the
    /// same densities are already scored by another part of the model.
    pub score_calibrations: bool,
    /// Reject trees whose leaves are not all at the same height instead of
    /// only warning about them.
    pub strict_tips: bool,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            process: Process::Yule,
            correction: CorrectionKind::Full,
            score_calibrations: true,
            strict_tips: false,
        }
    }
}

/// How the log marginal of the calibrated heights is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginalStrategy {
    /// Nothing is subtracted.
    Zero,
    /// Closed form for a single calibration under a Yule process.
    OneClade,
    /// Closed form for two directly nested calibrations under a Yule process.
    TwoNested,
    /// Enumeration over lineage trajectories.
    General,
    /// Ranked-count marginal of the restricted correction.
    Restricted,
}

/// A caller-supplied log marginal of the calibrated heights, given in
/// calibration order.
pub type UserMarginal = Box<dyn Fn(&[f64]) -> f64 + Send + Sync>;

#[derive(Debug, Clone)]
struct MarginalCache {
    rate: f64,
    heights: Vec<f64>,
    value: f64,
}

/// Tree prior with calibrated clades.
pub struct CalibratedTreePrior {
    calibrations: OrderedCalibrationSet,
    config: PriorConfig,
    strategy: MarginalStrategy,
    tables: NumericTables,
    lineages: Option<LineageIterator>,
    user_marginal: Option<UserMarginal>,
    cache: Option<MarginalCache>,
}

impl CalibratedTreePrior {
    /// Set up the prior for trees over the taxa of `tree`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid calibration family (see
    /// [`OrderedCalibrationSet::build`]), for parent-age calibrations the
    /// chosen correction cannot handle, and for dated tips when
    /// `strict_tips` is set.
    pub fn new<T: RankedTree>(tree: &T, calibrations: Vec<CalibrationPoint>, config: PriorConfig) -> Result<Self> {
        let calibrations = OrderedCalibrationSet::build(calibrations, tree)?;

        if tree.has_dated_tips() {
            if config.strict_tips {
                return Err(CalibraError::Configuration(
                    "calibrated tree priors cannot handle dated tips".into(),
                ));
            }
            warn!("calibrated tree prior cannot handle dated tips; consider a coalescent prior instead");
        }
        if calibrations.is_empty() {
            warn!("calibrated tree prior has no calibrations; the correction is zero");
        }

        let strategy = select_strategy(&calibrations, &config)?;
        let lineages = match strategy {
            MarginalStrategy::General | MarginalStrategy::Restricted => Some(LineageIterator::new(&calibrations)),
            _ => None,
        };
        debug!(
            "calibrated {} prior: {} calibrations, {} correction, {:?} marginal",
            config.process,
            calibrations.len(),
            config.correction,
            strategy
        );

        Ok(Self {
            tables: NumericTables::new(tree.leaf_count()),
            calibrations,
            config,
            strategy,
            lineages,
            user_marginal: None,
            cache: None,
        })
    }

    /// Replace the built-in marginal with `marginal`.
    ///
    /// The closure receives the calibrated heights in calibration order and
    /// returns the log marginal. A non-finite result makes the correction
    /// negative infinity. Ignored when the correction kind is `None`.
    pub fn with_user_marginal<F>(mut self, marginal: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        self.user_marginal = Some(Box::new(marginal));
        self
    }

    pub fn config(&self) -> &PriorConfig {
        &self.config
    }

    pub fn strategy(&self) -> MarginalStrategy {
        self.strategy
    }

    pub fn calibrations(&self) -> &OrderedCalibrationSet {
        &self.calibrations
    }

    /// Density of the uncalibrated process.
    ///
    /// Negative infinity for a tree over a different number of taxa than
    /// the prior was built for.
    pub fn base_log_likelihood<T: RankedTree>(&self, tree: &T, params: &BirthDeathParams) -> f64 {
        if tree.leaf_count() != self.calibrations.leaf_count() {
            return f64::NEG_INFINITY;
        }
        match self.config.process {
            Process::Yule => yule_log_likelihood(tree, params.birth_rate),
            Process::BirthDeath => birth_death_log_likelihood(tree, params, &self.tables),
        }
    }

    /// Full calibrated log-density: base process plus correction.
    pub fn log_likelihood<T: RankedTree>(&mut self, tree: &T, params: &BirthDeathParams) -> f64 {
        let correction = self.correction(tree, params);
        if correction == f64::NEG_INFINITY {
            return correction;
        }
        self.base_log_likelihood(tree, params) + correction
    }

    /// Calibration log-densities minus the log marginal of the calibrated
    /// heights.
    ///
    /// Calibrated taxa are looked up by name in `tree`, so any tree over the
    /// same taxa can be scored. Negative infinity when the taxa differ, when a
    /// calibrated clade is not monophyletic, when a parent-age calibration
    /// sits on the root, or when the calibrated heights are incompatible with
    /// the clade nesting.
    pub fn correction<T: RankedTree>(&mut self, tree: &T, params: &BirthDeathParams) -> f64 {
        if tree.leaf_count() != self.calibrations.leaf_count() {
            return f64::NEG_INFINITY;
        }
        let k = self.calibrations.len();
        if k == 0 {
            return 0.0;
        }

        let mut heights = Vec::with_capacity(k);
        let mut log_density = 0.0;
        for i in 0..k {
            let Some(node) = self.calibrated_node(tree, i, true) else {
                return f64::NEG_INFINITY;
            };
            let h = tree.height(node);
            if self.config.score_calibrations {
                log_density += self.calibrations.point(i).log_density(h);
            }
            heights.push(h);
        }

        // Some calibration out of range.
        if log_density.is_infinite() {
            return log_density;
        }
        if self.config.correction == CorrectionKind::None {
            return log_density;
        }

        if let Some(user) = &self.user_marginal {
            let value = user(&heights);
            return if value.is_finite() {
                log_density - value
            } else {
                f64::NEG_INFINITY
            };
        }

        let lambda = params.birth_rate;
        let n = tree.leaf_count();
        let marginal = match self.strategy {
            MarginalStrategy::Zero => 0.0,
            MarginalStrategy::OneClade => {
                let cp = self.calibrations.point(0);
                one_clade_log_marginal(lambda, n, heights[0], cp.size(), cp.is_for_parent())
            }
            MarginalStrategy::TwoNested => two_nested_log_marginal(
                lambda,
                n,
                heights[0],
                self.calibrations.point(0).size(),
                heights[1],
                self.calibrations.point(1).size(),
            ),
            MarginalStrategy::General => self.general_marginal(lambda, &heights),
            MarginalStrategy::Restricted => self.restricted_marginal(tree, params, &heights),
        };

        if marginal.is_finite() {
            log_density - marginal
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Per calibration, its label and the height of its calibrated node.
    ///
    /// Monophyly is not checked. The height is `None` for a parent-age
    /// calibration on the root and when a taxon is missing from `tree`.
    /// Empty when calibration densities are not scored here.
    pub fn calibrated_heights<T: RankedTree>(&self, tree: &T) -> Vec<(&str, Option<f64>)> {
        if !self.config.score_calibrations {
            return Vec::new();
        }
        (0..self.calibrations.len())
            .map(|i| {
                let label = self.calibrations.point(i).label();
                (label, self.calibrated_node(tree, i, false).map(|id| tree.height(id)))
            })
            .collect()
    }

    /// Column names matching [`calibrated_heights`](Self::calibrated_heights).
    pub fn labels(&self) -> Vec<&str> {
        if !self.config.score_calibrations {
            return Vec::new();
        }
        self.calibrations.points().iter().map(CalibrationPoint::label).collect()
    }

    /// Forget the memoised general marginal.
    pub fn invalidate_cache(&mut self) {
        self.cache = None;
    }

    fn calibrated_node<T: RankedTree>(&self, tree: &T, i: usize, check_monophyly: bool) -> Option<NodeId> {
        let leaves = self.calibrations.resolve_leaves(i, tree)?;
        let mut node = if leaves.len() > 1 {
            let mrca = tree.common_ancestor(&leaves)?;
            if check_monophyly && tree.subtree_leaf_count(mrca) != leaves.len() {
                return None;
            }
            mrca
        } else {
            *leaves.first()?
        };
        if self.calibrations.point(i).is_for_parent() {
            node = tree.parent(node)?;
        }
        Some(node)
    }

    fn general_marginal(&mut self, lambda: f64, heights: &[f64]) -> f64 {
        if let Some(cache) = &self.cache {
            if cache.rate == lambda && cache.heights == heights {
                return cache.value;
            }
        }
        let Some(iter) = self.lineages.as_mut() else {
            return f64::NEG_INFINITY;
        };
        let (sorted, ranks) = rank_heights(heights);
        let value = general_log_marginal(lambda, &sorted, &ranks, iter, &self.tables);
        self.cache = Some(MarginalCache {
            rate: lambda,
            heights: heights.to_vec(),
            value,
        });
        value
    }

    fn restricted_marginal<T: RankedTree>(&mut self, tree: &T, params: &BirthDeathParams, heights: &[f64]) -> f64 {
        let Some(iter) = self.lineages.as_mut() else {
            return f64::NEG_INFINITY;
        };
        let (sorted, ranks) = rank_heights(heights);
        let topologies = log_ranked_tree_count(&ranks, iter, &self.tables);
        if topologies == f64::NEG_INFINITY {
            return f64::NEG_INFINITY;
        }

        let cs = interval_node_counts(tree, &sorted);
        let times = if self.config.process == Process::Yule || params.is_pure_birth() {
            restricted_yule_log_marginal(params.birth_rate, &sorted, &cs, &self.tables)
        } else {
            restricted_birth_death_log_marginal(params, tree.leaf_count(), &sorted, &cs, &self.tables)
        };
        topologies + times
    }
}

fn select_strategy(set: &OrderedCalibrationSet, config: &PriorConfig) -> Result<MarginalStrategy> {
    let yule = config.process == Process::Yule;
    let strategy = match config.correction {
        CorrectionKind::None => MarginalStrategy::Zero,
        _ if set.is_empty() => MarginalStrategy::Zero,
        CorrectionKind::Full if yule && set.len() == 1 => MarginalStrategy::OneClade,
        CorrectionKind::Full => {
            if set.any_for_parent() {
                return Err(CalibraError::Configuration(
                    "calibration on a clade's parent is only implemented for a single Yule calibration".into(),
                ));
            }
            if yule && set.is_two_nested() {
                MarginalStrategy::TwoNested
            } else {
                MarginalStrategy::General
            }
        }
        CorrectionKind::Restricted => {
            if set.any_for_parent() {
                return Err(CalibraError::Configuration(
                    "calibration on a clade's parent is not supported by the restricted correction".into(),
                ));
            }
            MarginalStrategy::Restricted
        }
    };
    Ok(strategy)
}

impl fmt::Debug for CalibratedTreePrior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalibratedTreePrior")
            .field("calibrations", &self.calibrations)
            .field("config", &self.config)
            .field("strategy", &self.strategy)
            .field("user_marginal", &self.user_marginal.is_some())
            .finish_non_exhaustive()
    }
}

impl Summarizable for CalibratedTreePrior {
    fn summary(&self) -> String {
        format!(
            "CalibratedTreePrior: {} process, {} calibrations, {} correction ({:?})",
            self.config.process,
            self.calibrations.len(),
            self.config.correction,
            self.strategy
        )
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::tree::TimeTree;
    use calibra_stats::Normal;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn prior_for(tree: &TimeTree) -> CalibratedTreePrior {
        let cals = vec![
            CalibrationPoint::new("ab", ["A", "B"], Arc::new(Normal::new(0.5, 0.3).unwrap())).unwrap(),
            CalibrationPoint::new("cd", ["C", "D"], Arc::new(Normal::new(0.7, 0.3).unwrap())).unwrap(),
            CalibrationPoint::new("abcde", ["A", "B", "C", "D", "E"], Arc::new(Normal::new(1.5, 0.5).unwrap()))
                .unwrap(),
        ];
        CalibratedTreePrior::new(tree, cals, PriorConfig::default()).unwrap()
    }

    proptest! {
        #[test]
        fn correction_finite_and_idempotent(
            lambda in 0.2f64..4.0,
            ab in 0.05f64..0.9,
            cd in 0.05f64..0.9,
        ) {
            // ((((A,B),(C,D)),E),(F,G)) with the two cherries moved around.
            let mut tree = TimeTree::from_newick(
                "((((A:0.5,B:0.5):0.5,(C:0.5,D:0.5):0.5):1.0,E:2.0):1.0,(F:1.5,G:1.5):1.5);",
            ).unwrap();
            let a = tree.leaf_by_name("A").unwrap();
            let c = tree.leaf_by_name("C").unwrap();
            let ab_node = tree.parent(a).unwrap();
            let cd_node = tree.parent(c).unwrap();
            tree.set_height(ab_node, ab).unwrap();
            tree.set_height(cd_node, cd).unwrap();

            let mut prior = prior_for(&tree);
            prop_assert_eq!(prior.strategy(), MarginalStrategy::General);
            let params = BirthDeathParams::yule(lambda).unwrap();
            let first = prior.correction(&tree, &params);
            prop_assert!(first.is_finite());
            prop_assert_eq!(prior.correction(&tree, &params), first);
        }
    }
}
