use crate::config::Options;
use crate::data::dataset::Dataset;
use crate::engines::evaluation::expression::score_tree;
use crate::engines::generation::ast::Node;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static BIRTH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Birth stamp used to find the oldest member. Deterministic runs use a
/// process-wide counter, others use wall-clock nanoseconds.
pub fn get_birth_order(deterministic: bool) -> u64 {
    if deterministic {
        BIRTH_COUNTER.fetch_add(1, Ordering::Relaxed)
    } else {
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .map(|nanos| nanos.max(0) as u64)
            .unwrap_or_else(|| BIRTH_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopMember {
    pub tree: Node,
    #[serde(with = "non_finite")]
    pub score: f64,
    #[serde(with = "non_finite")]
    pub loss: f64,
    pub birth: u64,
    pub complexity: usize,
}

impl PopMember {
    pub fn new(tree: Node, score: f64, loss: f64, deterministic: bool) -> Self {
        let complexity = tree.count();
        Self {
            tree,
            score,
            loss,
            birth: get_birth_order(deterministic),
            complexity,
        }
    }

    /// Score a tree against a dataset.
    pub fn from_tree(tree: Node, dataset: &Dataset, options: &Options) -> Result<Self> {
        let (score, loss) = score_tree(&tree, dataset, options)?;
        Ok(Self::new(tree, score, loss, options.runtime().deterministic))
    }

    /// Recompute score and loss against `dataset`, keeping the birth stamp.
    pub fn rescore(&mut self, dataset: &Dataset, options: &Options) -> Result<()> {
        let (score, loss) = score_tree(&self.tree, dataset, options)?;
        self.score = score;
        self.loss = loss;
        self.complexity = self.tree.count();
        Ok(())
    }

    /// Copy with a fresh birth stamp.
    pub fn reborn(&self, deterministic: bool) -> Self {
        let mut copy = self.clone();
        copy.birth = get_birth_order(deterministic);
        copy
    }
}

/// JSON has no representation for infinities, which are legitimate losses.
pub(crate) mod non_finite {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&value.to_string())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text.parse::<f64>().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infinite_loss_survives_json() {
        let member = PopMember::new(Node::Constant(1.0), f64::INFINITY, f64::INFINITY, true);
        let json = serde_json::to_string(&member).unwrap();
        let back: PopMember = serde_json::from_str(&json).unwrap();
        assert_eq!(back.loss, f64::INFINITY);
        assert_eq!(back.tree, member.tree);
    }

    #[test]
    fn test_deterministic_births_increase() {
        let a = get_birth_order(true);
        let b = get_birth_order(true);
        assert!(b > a);
    }
}
