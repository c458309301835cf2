//! Time trees: rooted binary trees whose nodes carry heights (ages).
//!
//! Uses arena-style storage: nodes live in a flat `Vec<Node>` and are
//! referenced by `NodeId` (a `usize` index). Heights are measured backwards
//! from the present, so leaves sampled today sit at height zero and the root
//! is the oldest node.
//!
//! The calibrated priors only read trees through the [`RankedTree`] trait;
//! [`TimeTree`] is the workspace's own implementation of it.

use std::collections::HashMap;

use calibra_core::{CalibraError, Result, Summarizable};

/// Index into the tree's node arena.
pub type NodeId = usize;

/// Leaves whose heights differ by more than this are treated as dated tips.
pub const TIP_HEIGHT_TOLERANCE: f64 = 1e-8;

/// Read-only view of a rooted, binary, time-calibrated tree.
///
/// This is the whole surface the branching-process likelihoods and the
/// calibration correction need.
pub trait RankedTree {
    /// Number of leaves (taxa).
    fn leaf_count(&self) -> usize;

    /// The leaf carrying taxon `name`, if any.
    fn leaf_by_name(&self, name: &str) -> Option<NodeId>;

    /// Parent of `node` (None for the root).
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Height (age) of `node`.
    fn height(&self, node: NodeId) -> f64;

    /// Number of leaves in the subtree rooted at `node`.
    fn subtree_leaf_count(&self, node: NodeId) -> usize;

    /// All leaf ids.
    fn leaf_ids(&self) -> Vec<NodeId>;

    /// All non-leaf ids, root included.
    fn internal_ids(&self) -> Vec<NodeId>;

    /// True if `node` is the root.
    fn is_root(&self, node: NodeId) -> bool {
        self.parent(node).is_none()
    }

    /// Most recent common ancestor of a set of nodes. Returns `None` for an
    /// empty set.
    fn common_ancestor(&self, nodes: &[NodeId]) -> Option<NodeId> {
        let (&first, rest) = nodes.split_first()?;

        // Ancestors of the first node, itself included.
        let mut path = vec![first];
        let mut cur = first;
        while let Some(p) = self.parent(cur) {
            path.push(p);
            cur = p;
        }

        // Each further node meets the path somewhere; the MRCA of the whole
        // set is the highest meeting point.
        let mut lowest = 0;
        for &node in rest {
            let mut cur = node;
            loop {
                if let Some(pos) = path.iter().position(|&a| a == cur) {
                    lowest = lowest.max(pos);
                    break;
                }
                cur = self.parent(cur)?;
            }
        }
        Some(path[lowest])
    }

    /// True if any leaf height differs from the first leaf's by more than
    /// [`TIP_HEIGHT_TOLERANCE`].
    fn has_dated_tips(&self) -> bool {
        let leaves = self.leaf_ids();
        let Some(&first) = leaves.first() else {
            return false;
        };
        let h0 = self.height(first);
        leaves
            .iter()
            .any(|&id| (self.height(id) - h0).abs() > TIP_HEIGHT_TOLERANCE)
    }
}

/// A single node in a time tree.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    /// Child nodes.
    pub children: Vec<NodeId>,
    /// Taxon or clade label.
    pub name: Option<String>,
    /// Age of the node, in the same units as the birth rate's inverse.
    pub height: f64,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if this node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A rooted binary tree with node heights, stored as an arena of nodes.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeTree {
    nodes: Vec<Node>,
    root: NodeId,
    leaf_counts: Vec<usize>,
    taxa: HashMap<String, NodeId>,
}

impl TimeTree {
    /// Build a tree from pre-built nodes and a root index.
    ///
    /// Every internal node must have exactly two children, every leaf must
    /// carry a unique name, and no child may be older than its parent.
    pub fn from_nodes(nodes: Vec<Node>, root: NodeId) -> Result<Self> {
        if nodes.is_empty() {
            return Err(CalibraError::InvalidInput("empty node list".into()));
        }
        if root >= nodes.len() {
            return Err(CalibraError::InvalidInput(format!(
                "root index {} out of range ({})",
                root,
                nodes.len()
            )));
        }
        if nodes[root].parent.is_some() {
            return Err(CalibraError::InvalidInput("root has a parent".into()));
        }

        let mut taxa = HashMap::new();
        for node in &nodes {
            match node.children.len() {
                0 => {
                    let name = node.name.clone().ok_or_else(|| {
                        CalibraError::InvalidInput(format!("leaf {} has no name", node.id))
                    })?;
                    if taxa.insert(name.clone(), node.id).is_some() {
                        return Err(CalibraError::InvalidInput(format!(
                            "duplicate taxon name '{}'",
                            name
                        )));
                    }
                }
                2 => {
                    for &c in &node.children {
                        if c >= nodes.len() || nodes[c].parent != Some(node.id) {
                            return Err(CalibraError::InvalidInput(format!(
                                "inconsistent parent link below node {}",
                                node.id
                            )));
                        }
                        if nodes[c].height > node.height {
                            return Err(CalibraError::InvalidInput(format!(
                                "node {} is older than its parent {}",
                                c, node.id
                            )));
                        }
                    }
                }
                k => {
                    return Err(CalibraError::InvalidInput(format!(
                        "node {} has {} children; only binary trees are supported",
                        node.id, k
                    )));
                }
            }
        }
        if taxa.len() < 2 {
            return Err(CalibraError::InvalidInput(
                "a time tree needs at least two leaves".into(),
            ));
        }

        let mut tree = Self {
            nodes,
            root,
            leaf_counts: Vec::new(),
            taxa,
        };
        tree.leaf_counts = tree.count_leaves();
        Ok(tree)
    }

    /// Parse a Newick string with branch lengths into a time tree.
    ///
    /// Heights are derived from branch lengths: the leaf furthest from the
    /// root gets height zero.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse(input)
    }

    /// Serialize the tree to a Newick string with branch lengths.
    pub fn to_newick(&self) -> String {
        crate::newick::write(self)
    }

    /// Access a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Sorted list of taxon names.
    pub fn leaf_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.taxa.keys().cloned().collect();
        names.sort();
        names
    }

    /// Move an internal node to a new height.
    ///
    /// The new height must keep the node no younger than its children and no
    /// older than its parent. Topology is unchanged.
    pub fn set_height(&mut self, id: NodeId, height: f64) -> Result<()> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| CalibraError::InvalidInput(format!("node {} out of range", id)))?;
        if node.is_leaf() {
            return Err(CalibraError::InvalidInput(
                "leaf heights are fixed sampling times".into(),
            ));
        }
        if !height.is_finite() {
            return Err(CalibraError::InvalidInput("height must be finite".into()));
        }
        let floor = node
            .children
            .iter()
            .map(|&c| self.nodes[c].height)
            .fold(f64::NEG_INFINITY, f64::max);
        let ceiling = node.parent.map_or(f64::INFINITY, |p| self.nodes[p].height);
        if height < floor || height > ceiling {
            return Err(CalibraError::InvalidInput(format!(
                "height {} outside [{}, {}] for node {}",
                height, floor, ceiling, id
            )));
        }
        self.nodes[id].height = height;
        Ok(())
    }

    /// Branch length above `id` (None for the root).
    pub fn branch_length(&self, id: NodeId) -> Option<f64> {
        let node = self.nodes.get(id)?;
        node.parent.map(|p| self.nodes[p].height - node.height)
    }

    /// Pre-order (parent before children) traversal yielding node ids.
    pub fn iter_preorder(&self) -> PreorderIter<'_> {
        PreorderIter {
            tree: self,
            stack: vec![self.root],
        }
    }

    fn count_leaves(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.nodes.len()];
        let order: Vec<NodeId> = self.iter_preorder().collect();
        for &id in order.iter().rev() {
            let node = &self.nodes[id];
            counts[id] = if node.is_leaf() {
                1
            } else {
                node.children.iter().map(|&c| counts[c]).sum()
            };
        }
        counts
    }
}

impl RankedTree for TimeTree {
    fn leaf_count(&self) -> usize {
        self.taxa.len()
    }

    fn leaf_by_name(&self, name: &str) -> Option<NodeId> {
        self.taxa.get(name).copied()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].parent
    }

    fn height(&self, node: NodeId) -> f64 {
        self.nodes[node].height
    }

    fn subtree_leaf_count(&self, node: NodeId) -> usize {
        self.leaf_counts[node]
    }

    fn leaf_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    fn internal_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| !n.is_leaf())
            .map(|n| n.id)
            .collect()
    }

    fn is_root(&self, node: NodeId) -> bool {
        node == self.root
    }
}

impl Summarizable for TimeTree {
    fn summary(&self) -> String {
        format!(
            "TimeTree: {} taxa, root height {}",
            self.leaf_count(),
            self.nodes[self.root].height
        )
    }
}

/// Pre-order iterator over node ids.
pub struct PreorderIter<'a> {
    tree: &'a TimeTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for PreorderIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        // Push children in reverse order so leftmost is visited first.
        for &child in self.tree.nodes[id].children.iter().rev() {
            self.stack.push(child);
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    fn sample_tree() -> TimeTree {
        TimeTree::from_newick("((A:1.0,B:1.0):1.0,(C:0.5,D:0.5):1.5);").unwrap()
    }

    fn leaf(tree: &TimeTree, name: &str) -> NodeId {
        tree.leaf_by_name(name).unwrap()
    }

    #[test]
    fn heights_from_branch_lengths() {
        let tree = sample_tree();
        assert!((tree.height(tree.root()) - 2.0).abs() < TOL);
        let ab = tree.common_ancestor(&[leaf(&tree, "A"), leaf(&tree, "B")]).unwrap();
        let cd = tree.common_ancestor(&[leaf(&tree, "C"), leaf(&tree, "D")]).unwrap();
        assert!((tree.height(ab) - 1.0).abs() < TOL);
        assert!((tree.height(cd) - 0.5).abs() < TOL);
        for id in tree.leaf_ids() {
            assert!(tree.height(id).abs() < TOL);
        }
        assert!(!tree.has_dated_tips());
    }

    #[test]
    fn counts() {
        let tree = sample_tree();
        assert_eq!(tree.node_count(), 7);
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.internal_ids().len(), 3);
        assert_eq!(tree.subtree_leaf_count(tree.root()), 4);
        assert_eq!(tree.leaf_names(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn mrca_of_sets() {
        let tree = sample_tree();
        let (a, b, c) = (leaf(&tree, "A"), leaf(&tree, "B"), leaf(&tree, "C"));
        let ab = tree.common_ancestor(&[a, b]).unwrap();
        assert_eq!(tree.subtree_leaf_count(ab), 2);
        assert_eq!(tree.common_ancestor(&[a, b, c]), Some(tree.root()));
        assert_eq!(tree.common_ancestor(&[a]), Some(a));
        assert_eq!(tree.common_ancestor(&[ab, a]), Some(ab));
        assert_eq!(tree.common_ancestor(&[]), None);
        assert!(tree.is_root(tree.root()));
        assert!(!tree.is_root(ab));
    }

    #[test]
    fn dated_tips_detected() {
        let tree = TimeTree::from_newick("((A:1.0,B:0.8):1.0,C:2.0);").unwrap();
        assert!(tree.has_dated_tips());
        let b = leaf(&tree, "B");
        assert!((tree.height(b) - 0.2).abs() < TOL);
    }

    #[test]
    fn set_height_respects_neighbours() {
        let mut tree = sample_tree();
        let ab = tree.common_ancestor(&[leaf(&tree, "A"), leaf(&tree, "B")]).unwrap();
        tree.set_height(ab, 1.5).unwrap();
        assert!((tree.height(ab) - 1.5).abs() < TOL);
        assert!((tree.branch_length(ab).unwrap() - 0.5).abs() < TOL);
        assert!(tree.set_height(ab, 2.5).is_err());
        assert!(tree.set_height(ab, -0.1).is_err());
        assert!(tree.set_height(leaf(&tree, "A"), 0.1).is_err());
        let root = tree.root();
        tree.set_height(root, 10.0).unwrap();
        assert!(tree.set_height(root, 1.0).is_err());
    }

    #[test]
    fn rejects_non_binary_and_duplicates() {
        assert!(TimeTree::from_newick("(A:1,B:1,C:1);").is_err());
        assert!(TimeTree::from_newick("((A:1,B:1):1,A:2);").is_err());
        assert!(TimeTree::from_newick("A:1;").is_err());
    }

    #[test]
    fn summary_format() {
        let tree = sample_tree();
        assert_eq!(tree.summary(), "TimeTree: 4 taxa, root height 2");
    }
}
