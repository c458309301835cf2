//! Newick reader and writer for time trees.
//!
//! Supports the standard Newick grammar:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' children ')' label | label
//! children = subtree (',' subtree)*
//! label    = name? (':' length)?
//! ```
//!
//! Every non-root node must carry a branch length. Heights are recovered by
//! placing the leaf furthest from the root at height zero.

use crate::tree::{Node, NodeId, TimeTree};
use calibra_core::{CalibraError, Result};

/// Parse a Newick string into a `TimeTree`.
pub fn parse(input: &str) -> Result<TimeTree> {
    let mut parser = Parser::new(input.as_bytes());
    let root = parser.parse_tree()?;
    let nodes = parser.into_timed_nodes(root)?;
    TimeTree::from_nodes(nodes, root)
}

/// Serialize a `TimeTree` to Newick with branch lengths derived from heights.
pub fn write(tree: &TimeTree) -> String {
    let mut buf = String::new();
    write_subtree(tree, tree.root(), &mut buf);
    buf.push(';');
    buf
}

fn write_subtree(tree: &TimeTree, id: NodeId, buf: &mut String) {
    let Some(node) = tree.get_node(id) else {
        return;
    };
    if !node.children.is_empty() {
        buf.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }
            write_subtree(tree, child, buf);
        }
        buf.push(')');
    }
    if let Some(ref name) = node.name {
        buf.push_str(name);
    }
    if let Some(len) = tree.branch_length(id) {
        buf.push(':');
        let s = format!("{:.10}", len);
        let s = s.trim_end_matches('0');
        let s = s.trim_end_matches('.');
        buf.push_str(s);
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
    lengths: Vec<Option<f64>>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
            lengths: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<NodeId> {
        self.skip_whitespace();
        let root = self.parse_subtree(None)?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(CalibraError::Parse("expected ';' at end of Newick string".into()));
        }
        self.pos += 1;
        Ok(root)
    }

    fn parse_subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_whitespace();
        let id = self.alloc_node(parent);

        if self.peek() == Some(b'(') {
            self.pos += 1;
            let first_child = self.parse_subtree(Some(id))?;
            self.nodes[id].children.push(first_child);

            loop {
                self.skip_whitespace();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                    let child = self.parse_subtree(Some(id))?;
                    self.nodes[id].children.push(child);
                } else {
                    break;
                }
            }
            self.skip_whitespace();
            if self.peek() != Some(b')') {
                return Err(CalibraError::Parse("expected ')' in Newick string".into()));
            }
            self.pos += 1;
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: NodeId) -> Result<()> {
        self.skip_whitespace();
        let name = self.parse_name();
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str = self.parse_float_str();
            if len_str.is_empty() {
                return Err(CalibraError::Parse("expected number after ':'".into()));
            }
            let len: f64 = len_str.parse().map_err(|_| {
                CalibraError::Parse(format!("invalid branch length: '{}'", len_str))
            })?;
            if !len.is_finite() || len < 0.0 {
                return Err(CalibraError::Parse(format!(
                    "branch length must be finite and non-negative, got {}",
                    len
                )));
            }
            self.lengths[id] = Some(len);
        }
        Ok(())
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b':' | b',' | b')' | b'(' | b';' => break,
                b' ' | b'\t' | b'\n' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn parse_float_str(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E' => self.pos += 1,
                _ => break,
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn alloc_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent,
            children: Vec::new(),
            name: None,
            height: 0.0,
        });
        self.lengths.push(None);
        id
    }

    /// Convert root distances into heights. The root's own length is ignored.
    fn into_timed_nodes(self, root: NodeId) -> Result<Vec<Node>> {
        let Parser {
            mut nodes, lengths, ..
        } = self;

        let mut depth = vec![0.0f64; nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for &c in &nodes[id].children {
                let len = lengths[c].ok_or_else(|| {
                    CalibraError::Parse(format!(
                        "missing branch length on node {}",
                        nodes[c].name.as_deref().unwrap_or("<internal>")
                    ))
                })?;
                depth[c] = depth[id] + len;
                stack.push(c);
            }
        }

        let max_depth = nodes
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| depth[n.id])
            .fold(0.0f64, f64::max);
        for node in nodes.iter_mut() {
            node.height = max_depth - depth[node.id];
        }
        Ok(nodes)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.input.len() {
            match self.input[self.pos] {
                b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
                _ => break,
            }
        }
    }
}
