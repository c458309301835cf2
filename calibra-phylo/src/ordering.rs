//! Ordering of calibrated clades by set inclusion.
//!
//! Calibrated clades must form a laminar family: any two of them are either
//! disjoint or one contains the other. Under that condition the clades can
//! be listed so that every clade comes after all the clades it contains, and
//! each clade has a well-defined list of immediate sub-clades.

use calibra_core::{CalibraError, Result, Summarizable};

use crate::calibration::CalibrationPoint;
use crate::tree::{NodeId, RankedTree};

/// Calibration points sorted smallest-first with their partial order.
#[derive(Debug, Clone)]
pub struct OrderedCalibrationSet {
    points: Vec<CalibrationPoint>,
    children: Vec<Vec<usize>>,
    free_leaves: Vec<usize>,
    maximal: Vec<bool>,
    leaf_count: usize,
}

impl OrderedCalibrationSet {
    /// Validate `points` against `tree` and order them by inclusion.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when two clades partially overlap, when
    /// two clades are identical, when a taxon is not a leaf of `tree`, or when
    /// a single-taxon clade is not a parent-age calibration.
    pub fn build<T: RankedTree>(points: Vec<CalibrationPoint>, tree: &T) -> Result<Self> {
        for (k, pk) in points.iter().enumerate() {
            if pk.size() == 1 && !pk.is_for_parent() {
                return Err(CalibraError::Configuration(format!(
                    "calibration '{}' on a single taxon must apply to its parent",
                    pk.label()
                )));
            }
            for pi in &points[k + 1..] {
                if !pi.overlaps(pk) {
                    continue;
                }
                if pi.clade() == pk.clade() {
                    return Err(CalibraError::Configuration(format!(
                        "duplicate clade in calibrations '{}' and '{}'",
                        pk.label(),
                        pi.label()
                    )));
                }
                if !(pi.is_within(pk) || pk.is_within(pi)) {
                    return Err(CalibraError::Configuration(format!(
                        "overlapping clades in calibrations '{}' and '{}'",
                        pk.label(),
                        pi.label()
                    )));
                }
            }
        }

        // Repeatedly move the first maximal remaining clade to the back.
        let mut remaining = points;
        let mut ordered: Vec<CalibrationPoint> = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let k = (0..remaining.len())
                .find(|&k| is_maximal(&remaining, k))
                .ok_or_else(|| CalibraError::Other("no maximal clade among calibrations".into()))?;
            ordered.push(remaining.remove(k));
        }
        ordered.reverse();

        for taxon in ordered.iter().flat_map(|cp| cp.clade().iter()) {
            if tree.leaf_by_name(taxon).is_none() {
                return Err(CalibraError::Configuration(format!(
                    "taxon not found in tree: {}",
                    taxon
                )));
            }
        }

        let n = ordered.len();
        let mut children = vec![Vec::new(); n];
        for k in 0..n {
            if let Some(i) = (k + 1..n).find(|&i| ordered[k].is_within(&ordered[i])) {
                children[i].push(k);
            }
        }

        let mut maximal = vec![true; n];
        for kids in &children {
            for &c in kids {
                maximal[c] = false;
            }
        }

        let free_leaves = (0..n)
            .map(|k| ordered[k].size() - children[k].iter().map(|&c| ordered[c].size()).sum::<usize>())
            .collect();

        Ok(Self {
            points: ordered,
            children,
            free_leaves,
            maximal,
            leaf_count: tree.leaf_count(),
        })
    }

    /// Number of calibrations.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The `i`-th calibration in inclusion order.
    pub fn point(&self, i: usize) -> &CalibrationPoint {
        &self.points[i]
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    /// Leaves of the `i`-th clade in `tree`, looked up by taxon name.
    ///
    /// Node ids are only meaningful within one tree, so this is resolved
    /// against every tree scored. `None` if a taxon is not a leaf of `tree`.
    pub fn resolve_leaves<T: RankedTree>(&self, i: usize, tree: &T) -> Option<Vec<NodeId>> {
        self.points[i]
            .clade()
            .iter()
            .map(|taxon| tree.leaf_by_name(taxon))
            .collect()
    }

    /// Indices of the maximal clades strictly inside clade `i`.
    pub fn children(&self, i: usize) -> &[usize] {
        &self.children[i]
    }

    /// Taxa of clade `i` not inside any of its sub-clades.
    pub fn free_leaves(&self, i: usize) -> usize {
        self.free_leaves[i]
    }

    /// True if clade `i` is not contained in any other clade.
    pub fn is_maximal(&self, i: usize) -> bool {
        self.maximal[i]
    }

    /// Indices of maximal clades, ascending.
    pub fn maximal_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.maximal[i]).collect()
    }

    /// Leaf count of the tree the set was built against.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Taxa outside every calibrated clade.
    pub fn outside_free_lineages(&self) -> usize {
        let covered: usize = self.maximal_indices().iter().map(|&i| self.points[i].size()).sum();
        self.leaf_count.saturating_sub(covered)
    }

    /// True when a single calibrated clade spans every leaf of the tree.
    pub fn is_root_calibrated(&self) -> bool {
        let max = self.maximal_indices();
        max.len() == 1 && self.points[max[0]].size() == self.leaf_count
    }

    /// True for exactly two clades where the first is the only sub-clade of
    /// the second.
    pub fn is_two_nested(&self) -> bool {
        self.len() == 2 && self.children[1].len() == 1
    }

    /// True if any calibration applies to a clade's parent.
    pub fn any_for_parent(&self) -> bool {
        self.points.iter().any(CalibrationPoint::is_for_parent)
    }
}

fn is_maximal(points: &[CalibrationPoint], k: usize) -> bool {
    points
        .iter()
        .enumerate()
        .all(|(i, p)| i == k || !points[k].is_within(p))
}

impl Summarizable for OrderedCalibrationSet {
    fn summary(&self) -> String {
        let labels: Vec<&str> = self.points.iter().map(CalibrationPoint::label).collect();
        format!(
            "OrderedCalibrationSet: {} calibrations [{}], {} maximal",
            self.len(),
            labels.join(", "),
            self.maximal.iter().filter(|&&m| m).count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TimeTree;
    use calibra_stats::PointMass;
    use std::sync::Arc;

    fn tree8() -> TimeTree {
        TimeTree::from_newick(
            "((((A:1,B:1):1,(C:1,D:1):1):1,E:3):1,((F:1,G:1):1,H:2):2);",
        )
        .unwrap()
    }

    fn cal(label: &str, taxa: &[&str]) -> CalibrationPoint {
        CalibrationPoint::new(label, taxa.iter().copied(), Arc::new(PointMass::new(1.0).unwrap())).unwrap()
    }

    fn labels(set: &OrderedCalibrationSet) -> Vec<&str> {
        set.points().iter().map(CalibrationPoint::label).collect()
    }

    #[test]
    fn orders_smallest_first() {
        let tree = tree8();
        let cals = vec![
            cal("abcde", &["A", "B", "C", "D", "E"]),
            cal("ab", &["A", "B"]),
            cal("cd", &["C", "D"]),
        ];
        let set = OrderedCalibrationSet::build(cals, &tree).unwrap();
        // Maximal clades are peeled off the back first, so "ab" lands after "cd".
        assert_eq!(labels(&set), vec!["cd", "ab", "abcde"]);
        assert_eq!(set.children(2), &[0, 1]);
        assert!(set.children(0).is_empty());
        assert_eq!(set.free_leaves(0), 2);
        assert_eq!(set.free_leaves(2), 1);
        assert_eq!(set.maximal_indices(), vec![2]);
        assert_eq!(set.outside_free_lineages(), 3);
        assert!(!set.is_root_calibrated());
        assert!(!set.is_two_nested());
        let cd = set.resolve_leaves(0, &tree).unwrap();
        assert_eq!(cd, vec![tree.leaf_by_name("C").unwrap(), tree.leaf_by_name("D").unwrap()]);
    }

    #[test]
    fn immediate_children_only() {
        let tree = tree8();
        let cals = vec![
            cal("ab", &["A", "B"]),
            cal("all", &["A", "B", "C", "D", "E", "F", "G", "H"]),
            cal("abcd", &["A", "B", "C", "D"]),
        ];
        let set = OrderedCalibrationSet::build(cals, &tree).unwrap();
        assert_eq!(labels(&set), vec!["ab", "abcd", "all"]);
        assert_eq!(set.children(1), &[0]);
        assert_eq!(set.children(2), &[1]);
        assert_eq!(set.free_leaves(1), 2);
        assert_eq!(set.free_leaves(2), 4);
        assert!(set.is_root_calibrated());
        assert_eq!(set.outside_free_lineages(), 0);
    }

    #[test]
    fn disjoint_clades_are_all_maximal() {
        let tree = tree8();
        let cals = vec![cal("fg", &["F", "G"]), cal("ab", &["A", "B"])];
        let set = OrderedCalibrationSet::build(cals, &tree).unwrap();
        assert_eq!(set.maximal_indices(), vec![0, 1]);
        assert!(!set.is_two_nested());
        assert_eq!(set.outside_free_lineages(), 4);
    }

    #[test]
    fn two_nested_detected() {
        let tree = tree8();
        let cals = vec![cal("abcd", &["A", "B", "C", "D"]), cal("ab", &["A", "B"])];
        let set = OrderedCalibrationSet::build(cals, &tree).unwrap();
        assert!(set.is_two_nested());
        assert_eq!(labels(&set), vec!["ab", "abcd"]);
    }

    #[test]
    fn rejects_partial_overlap() {
        let tree = tree8();
        let err = OrderedCalibrationSet::build(vec![cal("abc", &["A", "B", "C"]), cal("cd", &["C", "D"])], &tree)
            .unwrap_err();
        assert!(matches!(err, CalibraError::Configuration(ref m) if m.contains("overlapping")));
    }

    #[test]
    fn rejects_duplicates() {
        let tree = tree8();
        let err = OrderedCalibrationSet::build(vec![cal("x", &["A", "B"]), cal("y", &["B", "A"])], &tree)
            .unwrap_err();
        assert!(matches!(err, CalibraError::Configuration(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn rejects_unknown_taxon() {
        let tree = tree8();
        let err = OrderedCalibrationSet::build(vec![cal("az", &["A", "Z"])], &tree).unwrap_err();
        assert!(matches!(err, CalibraError::Configuration(ref m) if m.contains("taxon not found in tree: Z")));
    }

    #[test]
    fn single_taxon_needs_parent_flag() {
        let tree = tree8();
        assert!(OrderedCalibrationSet::build(vec![cal("a", &["A"])], &tree).is_err());
        let set = OrderedCalibrationSet::build(vec![cal("a", &["A"]).for_parent()], &tree).unwrap();
        assert!(set.any_for_parent());
    }

    #[test]
    fn leaves_resolve_against_each_tree() {
        let set = OrderedCalibrationSet::build(vec![cal("ab", &["A", "B"])], &tree8()).unwrap();
        let other = TimeTree::from_newick("((H:2,(G:1,F:1):1):2,(E:3,((D:1,C:1):1,(B:1,A:1):1):1):1);").unwrap();
        let ids = set.resolve_leaves(0, &other).unwrap();
        assert_eq!(ids, vec![other.leaf_by_name("A").unwrap(), other.leaf_by_name("B").unwrap()]);
        assert_ne!(ids, set.resolve_leaves(0, &tree8()).unwrap());

        let missing = TimeTree::from_newick("((A:1,C:1):1,(D:1,E:1):1);").unwrap();
        assert!(set.resolve_leaves(0, &missing).is_none());
    }

    #[test]
    fn empty_set() {
        let set = OrderedCalibrationSet::build(Vec::new(), &tree8()).unwrap();
        assert!(set.is_empty());
        assert!(!set.is_root_calibrated());
        assert_eq!(set.summary(), "OrderedCalibrationSet: 0 calibrations [], 0 maximal");
    }
}
