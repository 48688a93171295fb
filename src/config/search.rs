use super::traits::ConfigSection;
use crate::engines::evaluation::loss::LossKind;
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};

/// Relative weights of the mutation kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationWeights {
    pub mutate_constant: f64,
    pub mutate_operator: f64,
    pub mutate_feature: f64,
    pub add_node: f64,
    pub insert_node: f64,
    pub delete_node: f64,
    pub randomize: f64,
    pub do_nothing: f64,
}

impl Default for MutationWeights {
    fn default() -> Self {
        Self {
            mutate_constant: 0.048,
            mutate_operator: 0.47,
            mutate_feature: 0.1,
            add_node: 0.79,
            insert_node: 5.1,
            delete_node: 1.7,
            randomize: 0.00023,
            do_nothing: 0.21,
        }
    }
}

impl MutationWeights {
    pub fn as_array(&self) -> [f64; 8] {
        [
            self.mutate_constant,
            self.mutate_operator,
            self.mutate_feature,
            self.add_node,
            self.insert_node,
            self.delete_node,
            self.randomize,
            self.do_nothing,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub populations: usize,
    pub population_size: usize,
    pub niterations: usize,
    pub ncycles_per_iteration: usize,
    pub maxsize: usize,
    pub maxdepth: usize,
    /// Fraction of total cycles over which maxsize grows from 3 to its
    /// configured value. Zero disables warm-up.
    pub warmup_maxsize_by: f64,
    pub tournament_selection_n: usize,
    pub tournament_selection_p: f64,
    pub parsimony: f64,
    pub use_frequency: bool,
    pub use_frequency_in_tournament: bool,
    pub adaptive_parsimony_scaling: f64,
    pub annealing: bool,
    pub alpha: f64,
    pub crossover_probability: f64,
    pub perturbation_factor: f64,
    pub probability_negate_constant: f64,
    pub mutation_weights: MutationWeights,
    pub unary_operators: Vec<String>,
    pub binary_operators: Vec<String>,
    pub loss: LossKind,
    /// Added to the loss of trees that violate the declared units.
    pub dimensional_constraint_penalty: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            populations: 15,
            population_size: 33,
            niterations: 40,
            ncycles_per_iteration: 550,
            maxsize: 20,
            maxdepth: 20,
            warmup_maxsize_by: 0.0,
            tournament_selection_n: 12,
            tournament_selection_p: 0.86,
            parsimony: 0.0032,
            use_frequency: true,
            use_frequency_in_tournament: true,
            adaptive_parsimony_scaling: 20.0,
            annealing: false,
            alpha: 0.1,
            crossover_probability: 0.066,
            perturbation_factor: 0.076,
            probability_negate_constant: 0.01,
            mutation_weights: MutationWeights::default(),
            unary_operators: Vec::new(),
            binary_operators: vec!["+".into(), "-".into(), "*".into(), "/".into()],
            loss: LossKind::default(),
            dimensional_constraint_penalty: 1000.0,
        }
    }
}

impl ConfigSection for PopulationConfig {
    fn section_name() -> &'static str {
        "population"
    }

    fn validate(&self) -> Result<()> {
        if self.populations == 0 {
            return Err(SearchError::Configuration("populations must be at least 1".to_string()));
        }
        if self.population_size < 2 {
            return Err(SearchError::Configuration(
                "population_size must be at least 2".to_string(),
            ));
        }
        if self.niterations == 0 || self.ncycles_per_iteration == 0 {
            return Err(SearchError::Configuration(
                "niterations and ncycles_per_iteration must be positive".to_string(),
            ));
        }
        if self.maxsize < 3 {
            return Err(SearchError::Configuration("maxsize must be at least 3".to_string()));
        }
        if self.maxdepth == 0 {
            return Err(SearchError::Configuration("maxdepth must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.warmup_maxsize_by) {
            return Err(SearchError::Configuration(
                "warmup_maxsize_by must be between 0 and 1".to_string(),
            ));
        }
        if self.tournament_selection_n == 0 || self.tournament_selection_n > self.population_size {
            return Err(SearchError::Configuration(format!(
                "tournament_selection_n must be between 1 and population_size ({})",
                self.population_size
            )));
        }
        if !(0.0..=1.0).contains(&self.tournament_selection_p) {
            return Err(SearchError::Configuration(
                "tournament_selection_p must be between 0 and 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.crossover_probability) {
            return Err(SearchError::Configuration(
                "crossover_probability must be between 0 and 1".to_string(),
            ));
        }
        let weights = self.mutation_weights.as_array();
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(SearchError::Configuration(
                "mutation_weights must be non-negative with a positive sum".to_string(),
            ));
        }
        if self.dimensional_constraint_penalty < 0.0 {
            return Err(SearchError::Configuration(
                "dimensional_constraint_penalty must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
