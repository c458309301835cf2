//! Enumeration of lineage-count trajectories through calibrated clades.
//!
//! Given a ranking of the calibrated heights, every clade sees the ranked
//! heights from its own bottom up to its MRCA. Between consecutive ranked
//! heights a clade holds some number of lineages; a trajectory lists those
//! counts level by level, from the clade's free taxa at the bottom to the two
//! lineages that join at the MRCA.
//!
//! [`LineageIterator`] walks the Cartesian product of the admissible
//! trajectories of all clades, plus a pseudo-clade for the part of the tree
//! above the maximal clades when the root is not calibrated. Each combination
//! contributes one term to the marginal density of the calibrated heights.

use crate::ordering::OrderedCalibrationSet;

/// Trajectories of a single clade.
///
/// `lins[0]` is the number of free taxa, `lins[rank]` is always 2. A joiner at
/// level `j` means a sub-clade whose MRCA is the `j`-th ranked height: it
/// adds one lineage to this clade from that level upward.
#[derive(Debug, Clone)]
struct CladeLineages {
    rank: usize,
    start: usize,
    joiners: Vec<usize>,
    last_joiner: usize,
    first: Vec<i64>,
    lins: Vec<i64>,
    done: bool,
}

impl CladeLineages {
    fn new(start: usize, rank: usize, joiner_ranks: &[usize]) -> Self {
        let mut joiners = vec![0usize; rank];
        for &j in joiner_ranks {
            joiners[j] = 1;
        }
        let last_joiner = joiner_ranks.iter().copied().max().unwrap_or(0);

        let mut first = vec![2i64; rank + 1];
        first[0] = start as i64;

        if last_joiner == 0 {
            if rank > 1 {
                // The first call to `advance` brings this back to 2.
                first[rank - 1] -= 1;
            }
        } else {
            let lowest = joiner_ranks.iter().copied().min().unwrap_or(last_joiner);
            for (i, slot) in first.iter_mut().enumerate().take(last_joiner + 1).skip(1) {
                *slot = if start == 0 && i <= lowest { 0 } else { 1 };
            }
            first[rank - 1] -= 1;
        }

        Self {
            rank,
            start,
            joiners,
            last_joiner,
            lins: first.clone(),
            first,
            done: false,
        }
    }

    fn restart(&mut self) {
        self.lins.copy_from_slice(&self.first);
        self.done = false;
    }

    /// Step to the next trajectory; false once exhausted.
    fn advance(&mut self) -> bool {
        let rank = self.rank;
        let mut i = rank - 1;

        if self.last_joiner == 0 {
            while i >= 1 && self.lins[i] == self.lins[i - 1] {
                i -= 1;
            }
            if i == 0 {
                // A rank-1 clade has exactly one trajectory.
                if rank == 1 && !self.done {
                    self.done = true;
                    return true;
                }
                return false;
            }
            self.lins[i] += 1;
            for l in &mut self.lins[i + 1..rank] {
                *l = 2;
            }
        } else {
            while i >= 1 && self.lins[i] == self.lins[i - 1] + self.joiners[i - 1] as i64 {
                i -= 1;
            }
            if i == 0 {
                return false;
            }
            self.lins[i] += 1;
            for j in i + 1..rank {
                self.lins[j] = if j <= self.last_joiner { 1 } else { 2 };
            }
        }
        true
    }

    fn copy_into(&self, out: &mut Vec<usize>) {
        debug_assert!(self.lins.iter().all(|&l| l >= 0), "negative lineage count");
        out.clear();
        out.extend(self.lins.iter().map(|&l| l as usize));
    }
}

/// Odometer over the trajectories of all calibrated clades.
///
/// Call [`setup`](Self::setup) with a rank assignment, then
/// [`next`](Self::next) until it returns `None`. The returned slice holds one
/// trajectory per ranked level: entry `r - 1` belongs to the clade of rank `r`,
/// and the last entry belongs to the free root when the root is not
/// calibrated.
#[derive(Debug, Clone)]
pub struct LineageIterator {
    children: Vec<Vec<usize>>,
    free: Vec<usize>,
    maximal: Vec<usize>,
    outside: usize,
    root_calibrated: bool,
    clades: Vec<CladeLineages>,
    values: Vec<Vec<usize>>,
    primed: bool,
    exhausted: bool,
}

impl LineageIterator {
    /// Build the iterator for an ordered calibration set.
    pub fn new(set: &OrderedCalibrationSet) -> Self {
        let n = set.len();
        Self {
            children: (0..n).map(|i| set.children(i).to_vec()).collect(),
            free: (0..n).map(|i| set.free_leaves(i)).collect(),
            maximal: set.maximal_indices(),
            outside: set.outside_free_lineages(),
            root_calibrated: set.is_root_calibrated(),
            clades: Vec::new(),
            values: Vec::new(),
            primed: false,
            exhausted: true,
        }
    }

    /// True when one calibrated clade covers every leaf.
    pub fn is_root_calibrated(&self) -> bool {
        self.root_calibrated
    }

    /// Prepare an enumeration for `ranks`, where `ranks[i]` is the rank
    /// (1-based, by increasing height) of the `i`-th ordered clade.
    ///
    /// Returns the number of per-clade enumerators, which is also the number
    /// of levels. A rank vector that is not a permutation of `1..=k`, or that
    /// ranks a clade at or below one of its sub-clades, admits no
    /// trajectories; the enumeration is then empty.
    pub fn setup(&mut self, ranks: &[usize]) -> usize {
        let n = self.free.len();
        let levels = n + usize::from(!self.root_calibrated);

        self.clades.clear();
        self.values = vec![Vec::new(); levels];
        self.primed = false;
        self.exhausted = !self.ranks_consistent(ranks);
        if self.exhausted {
            return levels;
        }

        let mut slots: Vec<Option<CladeLineages>> = vec![None; levels];
        for k in 0..n {
            let joiners: Vec<usize> = self.children[k].iter().map(|&c| ranks[c]).collect();
            slots[ranks[k] - 1] = Some(CladeLineages::new(self.free[k], ranks[k], &joiners));
        }
        if !self.root_calibrated {
            let joiners: Vec<usize> = self.maximal.iter().map(|&m| ranks[m]).collect();
            slots[n] = Some(CladeLineages::new(self.outside, n + 1, &joiners));
        }
        self.clades = slots.into_iter().flatten().collect();

        // Every enumerator but the last is positioned on its first trajectory.
        for k in 0..self.clades.len() {
            self.clades[k].restart();
            if k + 1 < self.clades.len() {
                if !self.clades[k].advance() {
                    self.exhausted = true;
                    break;
                }
                self.clades[k].copy_into(&mut self.values[k]);
            }
        }
        levels
    }

    /// The next combination of trajectories, or `None` when exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&[Vec<usize>]> {
        if self.exhausted || self.clades.is_empty() {
            return None;
        }
        let last = self.clades.len() - 1;

        if self.clades[last].advance() {
            self.primed = true;
            self.clades[last].copy_into(&mut self.values[last]);
            return Some(&self.values);
        }
        if !self.primed {
            // The last enumerator is empty, and so is the whole product.
            self.exhausted = true;
            return None;
        }

        let mut i = last;
        loop {
            if i == 0 {
                self.exhausted = true;
                return None;
            }
            i -= 1;
            if self.clades[i].advance() {
                self.clades[i].copy_into(&mut self.values[i]);
                break;
            }
        }
        for k in i + 1..=last {
            self.clades[k].restart();
            if !self.clades[k].advance() {
                self.exhausted = true;
                return None;
            }
            self.clades[k].copy_into(&mut self.values[k]);
        }
        Some(&self.values)
    }

    /// Joiner indicators per level: `joiners()[r][j]` is 1 when the clade at
    /// level `r` has a sub-clade of rank `j`.
    pub fn joiners(&self) -> Vec<Vec<usize>> {
        self.clades.iter().map(|c| c.joiners.clone()).collect()
    }

    /// Free lineages at the bottom of level `i`.
    pub fn start(&self, i: usize) -> usize {
        self.clades[i].start
    }

    fn ranks_consistent(&self, ranks: &[usize]) -> bool {
        let n = self.free.len();
        if ranks.len() != n {
            return false;
        }
        let mut seen = vec![false; n];
        for &r in ranks {
            if r == 0 || r > n || seen[r - 1] {
                return false;
            }
            seen[r - 1] = true;
        }
        (0..n).all(|k| self.children[k].iter().all(|&c| ranks[c] < ranks[k]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationPoint;
    use crate::tree::TimeTree;
    use calibra_stats::PointMass;
    use std::sync::Arc;

    /// `((..((T0,T1),T2)..),Tn-1)` with unit steps, ultrametric.
    fn ladder(n: usize) -> TimeTree {
        let mut s = "(T0:1,T1:1)".to_string();
        for i in 2..n {
            s = format!("({}:1,T{}:{})", s, i, i);
        }
        s.push(';');
        TimeTree::from_newick(&s).unwrap()
    }

    fn set_of(clades: &[&[usize]], n: usize) -> OrderedCalibrationSet {
        let tree = ladder(n);
        let cals = clades
            .iter()
            .enumerate()
            .map(|(i, taxa)| {
                CalibrationPoint::new(
                    format!("c{}", i),
                    taxa.iter().map(|t| format!("T{}", t)),
                    Arc::new(PointMass::new(1.0).unwrap()),
                )
                .unwrap()
            })
            .collect();
        OrderedCalibrationSet::build(cals, &tree).unwrap()
    }

    fn collect(iter: &mut LineageIterator, ranks: &[usize]) -> Vec<Vec<Vec<usize>>> {
        iter.setup(ranks);
        let mut out = Vec::new();
        while let Some(v) = iter.next() {
            out.push(v.to_vec());
        }
        out
    }

    #[test]
    fn single_clade() {
        let set = set_of(&[&[0, 1]], 4);
        let mut iter = LineageIterator::new(&set);
        assert!(!iter.is_root_calibrated());
        let combos = collect(&mut iter, &[1]);
        assert_eq!(
            combos,
            vec![
                vec![vec![2, 2], vec![2, 1, 2]],
                vec![vec![2, 2], vec![2, 2, 2]],
            ]
        );
        assert_eq!(iter.start(0), 2);
        assert_eq!(iter.start(1), 2);
        assert_eq!(iter.joiners(), vec![vec![0], vec![0, 1]]);
    }

    #[test]
    fn whole_tree_clade() {
        let set = set_of(&[&[0, 1, 2, 3]], 4);
        let mut iter = LineageIterator::new(&set);
        assert!(iter.is_root_calibrated());
        assert_eq!(iter.setup(&[1]), 1);
        assert_eq!(iter.next().map(|v| v.to_vec()), Some(vec![vec![4, 2]]));
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn two_nested() {
        let set = set_of(&[&[0, 1], &[0, 1, 2, 3]], 6);
        let mut iter = LineageIterator::new(&set);
        let combos = collect(&mut iter, &[1, 2]);
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], vec![vec![2, 2], vec![2, 1, 2], vec![2, 1, 1, 2]]);
        assert_eq!(combos[1], vec![vec![2, 2], vec![2, 1, 2], vec![2, 2, 1, 2]]);
        assert_eq!(combos[5], vec![vec![2, 2], vec![2, 2, 2], vec![2, 2, 2, 2]]);
    }

    #[test]
    fn three_clades() {
        // Listed so that {T0,T1} ends up first in inclusion order.
        let set = set_of(&[&[2, 3], &[0, 1], &[0, 1, 2, 3, 4]], 8);
        assert_eq!(set.point(0).size(), 2);
        assert_eq!(set.point(2).size(), 5);
        let mut iter = LineageIterator::new(&set);
        let combos = collect(&mut iter, &[1, 2, 3]);
        assert_eq!(combos.len(), 20);
        assert_eq!(
            combos[0],
            vec![vec![2, 2], vec![2, 2, 2], vec![1, 1, 1, 2], vec![3, 1, 1, 1, 2]]
        );
        assert_eq!(
            combos[2],
            vec![vec![2, 2], vec![2, 2, 2], vec![1, 1, 1, 2], vec![3, 2, 2, 1, 2]]
        );
        // Re-running the same setup reproduces the enumeration.
        assert_eq!(collect(&mut iter, &[1, 2, 3]).len(), 20);
        assert_eq!(collect(&mut iter, &[2, 1, 3]).len(), 20);
    }

    #[test]
    fn clade_without_free_leaves() {
        // {T0..T3} is exactly the union of its two sub-clades, so its
        // trajectory starts at zero lineages.
        let set = set_of(&[&[2, 3], &[0, 1], &[0, 1, 2, 3]], 6);
        assert_eq!(set.free_leaves(2), 0);
        let mut iter = LineageIterator::new(&set);
        for ranks in [[1, 2, 3], [2, 1, 3]] {
            let combos = collect(&mut iter, &ranks);
            assert_eq!(combos.len(), 4);
            assert_eq!(
                combos[0],
                vec![vec![2, 2], vec![2, 2, 2], vec![0, 0, 1, 2], vec![2, 1, 1, 1, 2]]
            );
            assert_eq!(
                combos[2],
                vec![vec![2, 2], vec![2, 2, 2], vec![0, 0, 1, 2], vec![2, 2, 2, 1, 2]]
            );
        }
    }

    #[test]
    fn inconsistent_ranks_are_empty() {
        let set = set_of(&[&[0, 1], &[0, 1, 2, 3]], 6);
        let mut iter = LineageIterator::new(&set);
        assert!(collect(&mut iter, &[2, 1]).is_empty());
        assert!(collect(&mut iter, &[1, 1]).is_empty());
        assert!(collect(&mut iter, &[1]).is_empty());
        assert!(collect(&mut iter, &[0, 2]).is_empty());
        assert_eq!(collect(&mut iter, &[1, 2]).len(), 6);
    }
}
