use crate::functions::registry::OperatorSet;
use serde::{Deserialize, Serialize};

/// Expression tree node. Operators are indices into an [`OperatorSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Constant(f64),
    Feature(usize),
    Unary { op: usize, child: Box<Node> },
    Binary { op: usize, left: Box<Node>, right: Box<Node> },
}

impl Node {
    pub fn unary(op: usize, child: Node) -> Self {
        Node::Unary {
            op,
            child: Box::new(child),
        }
    }

    pub fn binary(op: usize, left: Node, right: Node) -> Self {
        Node::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Constant(_) | Node::Feature(_))
    }

    /// Number of nodes. Used as the complexity measure.
    pub fn count(&self) -> usize {
        match self {
            Node::Constant(_) | Node::Feature(_) => 1,
            Node::Unary { child, .. } => 1 + child.count(),
            Node::Binary { left, right, .. } => 1 + left.count() + right.count(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Node::Constant(_) | Node::Feature(_) => 1,
            Node::Unary { child, .. } => 1 + child.depth(),
            Node::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn count_constants(&self) -> usize {
        match self {
            Node::Constant(_) => 1,
            Node::Feature(_) => 0,
            Node::Unary { child, .. } => child.count_constants(),
            Node::Binary { left, right, .. } => left.count_constants() + right.count_constants(),
        }
    }

    /// Whether every feature and operator index is in range.
    pub fn fits(&self, n_features: usize, n_unary: usize, n_binary: usize) -> bool {
        match self {
            Node::Constant(_) => true,
            Node::Feature(index) => *index < n_features,
            Node::Unary { op, child } => *op < n_unary && child.fits(n_features, n_unary, n_binary),
            Node::Binary { op, left, right } => {
                *op < n_binary
                    && left.fits(n_features, n_unary, n_binary)
                    && right.fits(n_features, n_unary, n_binary)
            }
        }
    }

    /// Node at a preorder index.
    pub fn node_at(&self, index: usize) -> Option<&Node> {
        let mut remaining = index;
        self.find(&mut remaining)
    }

    fn find(&self, remaining: &mut usize) -> Option<&Node> {
        if *remaining == 0 {
            return Some(self);
        }
        *remaining -= 1;
        match self {
            Node::Constant(_) | Node::Feature(_) => None,
            Node::Unary { child, .. } => child.find(remaining),
            Node::Binary { left, right, .. } => left.find(remaining).or_else(|| right.find(remaining)),
        }
    }

    /// Mutable node at a preorder index.
    pub fn node_at_mut(&mut self, index: usize) -> Option<&mut Node> {
        let mut remaining = index;
        self.find_mut(&mut remaining)
    }

    fn find_mut(&mut self, remaining: &mut usize) -> Option<&mut Node> {
        if *remaining == 0 {
            return Some(self);
        }
        *remaining -= 1;
        match self {
            Node::Constant(_) | Node::Feature(_) => None,
            Node::Unary { child, .. } => child.find_mut(remaining),
            Node::Binary { left, right, .. } => {
                let skip = left.count();
                if *remaining < skip {
                    left.find_mut(remaining)
                } else {
                    *remaining -= skip;
                    right.find_mut(remaining)
                }
            }
        }
    }

    /// Mutable references to every constant, in preorder.
    pub fn constants_mut(&mut self) -> Vec<&mut f64> {
        let mut out = Vec::new();
        self.collect_constants(&mut out);
        out
    }

    fn collect_constants<'a>(&'a mut self, out: &mut Vec<&'a mut f64>) {
        match self {
            Node::Constant(value) => out.push(value),
            Node::Feature(_) => {}
            Node::Unary { child, .. } => child.collect_constants(out),
            Node::Binary { left, right, .. } => {
                left.collect_constants(out);
                right.collect_constants(out);
            }
        }
    }

    /// Human readable form, e.g. `(x1 * sin(x2))`.
    pub fn render(&self, feature_names: &[String], operators: &OperatorSet) -> String {
        match self {
            Node::Constant(value) => format_constant(*value),
            Node::Feature(index) => feature_names
                .get(*index)
                .cloned()
                .unwrap_or_else(|| format!("x{}", index + 1)),
            Node::Unary { op, child } => operators
                .unary(*op)
                .render(&[child.render(feature_names, operators)]),
            Node::Binary { op, left, right } => operators.binary(*op).render(&[
                left.render(feature_names, operators),
                right.render(feature_names, operators),
            ]),
        }
    }
}

fn format_constant(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
