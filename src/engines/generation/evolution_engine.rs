use crate::config::Options;
use crate::data::dataset::Dataset;
use crate::engines::generation::{
    hall_of_fame::HallOfFame,
    member::{non_finite, PopMember},
    operators::{best_of_sample, crossover_within_constraints, mutate_within_constraints, MutationKind},
    population::Population,
    statistics::RunningSearchStatistics,
};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One unit of work for one (output, population) slot. Owns the
/// population and a private copy of the statistics until it returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleJob {
    pub output: usize,
    pub population_index: usize,
    pub iteration: usize,
    pub population: Population,
    pub statistics: RunningSearchStatistics,
    pub cur_maxsize: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub output: usize,
    pub population: usize,
    pub iteration: usize,
    pub cur_maxsize: usize,
    pub num_evals: u64,
    #[serde(with = "non_finite")]
    pub best_loss: f64,
    pub mutations_accepted: usize,
    pub mutations_rejected: usize,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub output: usize,
    pub population_index: usize,
    pub population: Population,
    /// Best member at each size seen at any point during the cycle.
    pub best_seen: HallOfFame,
    pub record: CycleRecord,
    pub num_evals: u64,
}

/// A bounded unit of evolutionary work on one population.
pub trait SearchCycle: Send + Sync {
    fn run(&self, job: CycleJob, dataset: &Dataset, options: &Options) -> Result<CycleOutcome>;
}

/// Age-regularized evolution: tournament winners are mutated or crossed
/// over and their children replace the oldest members.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegularizedEvolution;

struct Tally {
    evals: u64,
    accepted: usize,
    rejected: usize,
}

impl RegularizedEvolution {
    fn temperatures(options: &Options) -> Vec<f64> {
        let n = options.population().ncycles_per_iteration;
        if !options.population().annealing || n == 1 {
            return vec![1.0; n];
        }
        (0..n).map(|i| 1.0 - i as f64 / (n - 1) as f64).collect()
    }

    /// Mutate a tournament winner. Returns the child, or `None` if the
    /// mutation failed the constraints or was rejected.
    #[allow(clippy::too_many_arguments)]
    fn next_generation(
        parent: &PopMember,
        temperature: f64,
        cur_maxsize: usize,
        statistics: &RunningSearchStatistics,
        dataset: &Dataset,
        options: &Options,
        rng: &mut StdRng,
        tally: &mut Tally,
    ) -> Result<Option<PopMember>> {
        let deterministic = options.runtime().deterministic;
        let Some((tree, kind)) =
            mutate_within_constraints(&parent.tree, temperature, cur_maxsize, dataset.n_features(), options, rng)
        else {
            return Ok(None);
        };

        if kind == MutationKind::DoNothing {
            return Ok(Some(PopMember::new(tree, parent.score, parent.loss, deterministic)));
        }

        let child = PopMember::from_tree(tree, dataset, options)?;
        tally.evals += 1;

        let config = options.population();
        let mut probability = 1.0;
        if config.annealing {
            let delta = child.score - parent.score;
            probability *= (-delta / (temperature * config.alpha)).exp();
        }
        if config.use_frequency {
            let old = statistics.normalized_frequency(parent.complexity).unwrap_or(1e-6);
            let new = statistics.normalized_frequency(child.complexity).unwrap_or(1e-6);
            probability *= old / new;
        }
        if probability < rng.gen::<f64>() {
            return Ok(None);
        }
        Ok(Some(child))
    }

    fn replace_oldest(population: &mut Population, child: PopMember) {
        if let Some(oldest) = population.oldest_index() {
            population.members[oldest] = child;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reg_evol_cycle(
        population: &mut Population,
        temperature: f64,
        cur_maxsize: usize,
        statistics: &RunningSearchStatistics,
        dataset: &Dataset,
        options: &Options,
        rng: &mut StdRng,
        tally: &mut Tally,
    ) -> Result<()> {
        let config = options.population();
        let steps = population.len().div_ceil(config.tournament_selection_n);
        for _ in 0..steps {
            if rng.gen::<f64>() > config.crossover_probability {
                let parent = best_of_sample(&population.members, statistics, options, rng).clone();
                match Self::next_generation(
                    &parent,
                    temperature,
                    cur_maxsize,
                    statistics,
                    dataset,
                    options,
                    rng,
                    tally,
                )? {
                    Some(child) => {
                        tally.accepted += 1;
                        Self::replace_oldest(population, child);
                    }
                    None => tally.rejected += 1,
                }
            } else {
                let a = best_of_sample(&population.members, statistics, options, rng).tree.clone();
                let b = best_of_sample(&population.members, statistics, options, rng).tree.clone();
                let Some((tree_a, tree_b)) = crossover_within_constraints(&a, &b, cur_maxsize, options, rng) else {
                    tally.rejected += 1;
                    continue;
                };
                let child_a = PopMember::from_tree(tree_a, dataset, options)?;
                let child_b = PopMember::from_tree(tree_b, dataset, options)?;
                tally.evals += 2;
                tally.accepted += 1;
                Self::replace_oldest(population, child_a);
                Self::replace_oldest(population, child_b);
            }
        }
        Ok(())
    }
}

impl SearchCycle for RegularizedEvolution {
    fn run(&self, job: CycleJob, dataset: &Dataset, options: &Options) -> Result<CycleOutcome> {
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(job.seed);
        let mut population = job.population;
        let mut best_seen = HallOfFame::new(options.population().maxsize);
        let mut tally = Tally {
            evals: 0,
            accepted: 0,
            rejected: 0,
        };

        for temperature in Self::temperatures(options) {
            Self::reg_evol_cycle(
                &mut population,
                temperature,
                job.cur_maxsize,
                &job.statistics,
                dataset,
                options,
                &mut rng,
                &mut tally,
            )?;
            best_seen.update_from_population(&population);
        }

        let best_loss = population
            .members
            .iter()
            .map(|m| m.loss)
            .fold(f64::INFINITY, f64::min);
        let record = CycleRecord {
            output: job.output,
            population: job.population_index,
            iteration: job.iteration,
            cur_maxsize: job.cur_maxsize,
            num_evals: tally.evals,
            best_loss,
            mutations_accepted: tally.accepted,
            mutations_rejected: tally.rejected,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        };
        log::debug!(
            "Cycle done: output {} population {} evals {} best loss {:.4e}",
            job.output,
            job.population_index,
            tally.evals,
            best_loss
        );

        Ok(CycleOutcome {
            output: job.output,
            population_index: job.population_index,
            population,
            best_seen,
            record,
            num_evals: tally.evals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;

    fn setup() -> (Dataset, Options) {
        let x: Vec<f64> = (0..20).map(|i| i as f64 / 4.0).collect();
        let y: Vec<f64> = x.iter().map(|v| v * v + 1.0).collect();
        let dataset = Dataset::from_columns(vec![x], y).unwrap();
        let mut config = SearchConfig::default();
        config.population.population_size = 20;
        config.population.ncycles_per_iteration = 10;
        config.population.maxsize = 10;
        config.population.tournament_selection_n = 5;
        config.migration.topn = 5;
        config.runtime.deterministic = true;
        (dataset, Options::new(config).unwrap())
    }

    #[test]
    fn test_cycle_keeps_population_size() {
        let (dataset, options) = setup();
        let mut rng = StdRng::seed_from_u64(0);
        let population = Population::random(20, &dataset, &options, &mut rng).unwrap();
        let job = CycleJob {
            output: 0,
            population_index: 3,
            iteration: 0,
            population,
            statistics: RunningSearchStatistics::new(10),
            cur_maxsize: 10,
            seed: 42,
        };
        let outcome = RegularizedEvolution.run(job, &dataset, &options).unwrap();
        assert_eq!(outcome.population.len(), 20);
        assert_eq!(outcome.population_index, 3);
        assert_eq!(outcome.record.num_evals, outcome.num_evals);
        assert!(outcome.population.members.iter().all(|m| m.complexity <= 10));
        for member in outcome.best_seen.iter() {
            let best_in_pop = outcome
                .population
                .members
                .iter()
                .filter(|m| m.complexity == member.complexity)
                .map(|m| m.score)
                .fold(f64::INFINITY, f64::min);
            assert!(member.score <= best_in_pop);
        }
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let (dataset, options) = setup();
        let mut rng = StdRng::seed_from_u64(7);
        let population = Population::random(20, &dataset, &options, &mut rng).unwrap();
        let job = CycleJob {
            output: 0,
            population_index: 0,
            iteration: 0,
            population,
            statistics: RunningSearchStatistics::new(10),
            cur_maxsize: 10,
            seed: 9,
        };
        let a = RegularizedEvolution.run(job.clone(), &dataset, &options).unwrap();
        let b = RegularizedEvolution.run(job, &dataset, &options).unwrap();
        let trees = |o: &CycleOutcome| o.population.members.iter().map(|m| m.tree.clone()).collect::<Vec<_>>();
        assert_eq!(trees(&a), trees(&b));
    }
}
