use crate::config::Options;
use crate::data::dataset::Dataset;
use crate::engines::generation::member::PopMember;
use crate::engines::generation::operators::gen_random_tree;
use crate::error::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Initial trees get this many random operators.
const INITIAL_TREE_LENGTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub members: Vec<PopMember>,
}

impl Population {
    pub fn new(members: Vec<PopMember>) -> Self {
        Self { members }
    }

    /// Random population of `size` scored members.
    pub fn random<R: Rng + ?Sized>(size: usize, dataset: &Dataset, options: &Options, rng: &mut R) -> Result<Self> {
        let members = (0..size)
            .map(|_| {
                let tree = gen_random_tree(INITIAL_TREE_LENGTH, &options.operators, dataset.n_features(), rng);
                PopMember::from_tree(tree, dataset, options)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The `topn` lowest-score members.
    pub fn best_sub_pop(&self, topn: usize) -> Population {
        let mut sorted: Vec<&PopMember> = self.members.iter().collect();
        sorted.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        Population::new(sorted.into_iter().take(topn).cloned().collect())
    }

    pub fn oldest_index(&self) -> Option<usize> {
        self.members
            .iter()
            .enumerate()
            .min_by_key(|(_, m)| m.birth)
            .map(|(i, _)| i)
    }

    pub fn rescore(&mut self, dataset: &Dataset, options: &Options) -> Result<()> {
        for member in &mut self.members {
            member.rescore(dataset, options)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::ast::Node;

    fn member(score: f64, birth: u64) -> PopMember {
        PopMember {
            tree: Node::Constant(score),
            score,
            loss: score,
            birth,
            complexity: 1,
        }
    }

    #[test]
    fn test_best_sub_pop_sorted() {
        let pop = Population::new(vec![member(3.0, 0), member(1.0, 1), member(2.0, 2)]);
        let best = pop.best_sub_pop(2);
        assert_eq!(best.members.iter().map(|m| m.score).collect::<Vec<_>>(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_oldest_index() {
        let pop = Population::new(vec![member(3.0, 5), member(1.0, 2), member(2.0, 9)]);
        assert_eq!(pop.oldest_index(), Some(1));
    }
}
