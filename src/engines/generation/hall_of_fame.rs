use crate::config::Options;
use crate::data::dataset::Dataset;
use crate::engines::generation::member::PopMember;
use crate::engines::generation::population::Population;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Best member seen at each complexity, for complexities `1..=maxsize`.
///
/// A slot only ever holds a member of exactly its complexity, and its
/// score never increases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallOfFame {
    members: Vec<Option<PopMember>>,
}

impl HallOfFame {
    pub fn new(maxsize: usize) -> Self {
        Self {
            members: vec![None; maxsize],
        }
    }

    pub fn maxsize(&self) -> usize {
        self.members.len()
    }

    /// Offer a member. Returns whether it was stored.
    pub fn update(&mut self, member: &PopMember) -> bool {
        let size = member.complexity;
        if size == 0 || size > self.members.len() {
            return false;
        }
        let slot = &mut self.members[size - 1];
        let better = match slot {
            None => true,
            Some(existing) => member.score < existing.score,
        };
        if better {
            *slot = Some(member.clone());
        }
        better
    }

    pub fn update_from_population(&mut self, population: &Population) {
        for member in &population.members {
            self.update(member);
        }
    }

    /// Merge another archive slot by slot.
    pub fn merge(&mut self, other: &HallOfFame) {
        for member in other.members.iter().flatten() {
            self.update(member);
        }
    }

    pub fn get(&self, complexity: usize) -> Option<&PopMember> {
        if complexity == 0 {
            return None;
        }
        self.members.get(complexity - 1).and_then(|m| m.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PopMember> {
        self.members.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.members.iter().all(|m| m.is_none())
    }

    /// Members with strictly lower loss than every smaller member, in
    /// increasing complexity.
    pub fn dominating(&self) -> Vec<PopMember> {
        let mut best_loss = f64::INFINITY;
        let mut front = Vec::new();
        for member in self.iter() {
            if member.loss < best_loss {
                best_loss = member.loss;
                front.push(member.clone());
            }
        }
        front
    }

    /// Recompute every member's score against `dataset`.
    pub fn rescore(&mut self, dataset: &Dataset, options: &Options) -> Result<()> {
        for member in self.members.iter_mut().flatten() {
            member.rescore(dataset, options)?;
        }
        Ok(())
    }

    /// Adapt to a new maxsize, dropping members that no longer fit.
    pub fn resize(&mut self, maxsize: usize) {
        self.members.resize(maxsize, None);
    }
}
