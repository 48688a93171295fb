//! Top-level search driver.
//!
//! Owns the `outputs x populations` grid of slots. Each slot always has
//! exactly one cycle in flight; when it completes, the controller merges
//! the result into that output's archive, persists the dominating set,
//! migrates members in, and schedules the next cycle.

use crate::config::{Options, Parallelism, ResolvedRuntime, RunSettings};
use crate::data::dataset::Dataset;
use crate::engines::generation::{
    evolution_engine::{CycleJob, CycleOutcome, RegularizedEvolution, SearchCycle},
    hall_of_fame::HallOfFame,
    member::PopMember,
    migration::migrate,
    population::Population,
    statistics::RunningSearchStatistics,
};
use crate::engines::search::adapter::{ConcurrencyAdapter, CycleContext, JobHandle, SerialExecutor, ThreadPoolExecutor};
use crate::engines::search::distributed::{ProcessPoolExecutor, WorkerSource};
use crate::engines::search::monitor::ResourceMonitor;
use crate::engines::search::persistence::{default_output_file, output_path, save_dominating, RunRecord, SearchState};
use crate::engines::search::progress::{FrontEntry, LogProgressCallback, NullProgressCallback, ProgressCallback, SearchSummary};
use crate::engines::search::stopping::{spawn_quit_listener, StopChecker, StopReason, StopSignal};
use crate::error::{Result, SearchError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const MONITOR_CAPACITY: usize = 100;
const OCCUPATION_WARNING: f64 = 0.2;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Result of a finished search.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// One archive per output.
    pub halls_of_fame: Vec<HallOfFame>,
    /// Raw populations and archives, when `return_state` is set.
    pub state: Option<SearchState>,
    pub stop_reason: StopReason,
    pub total_evals: u64,
}

impl SearchOutcome {
    /// Dominating set of each output.
    pub fn dominating(&self) -> Vec<Vec<PopMember>> {
        self.halls_of_fame.iter().map(HallOfFame::dominating).collect()
    }
}

pub struct SearchOrchestrator {
    options: Options,
    settings: RunSettings,
    cycle: Option<Arc<dyn SearchCycle>>,
    progress: Option<Box<dyn ProgressCallback>>,
    stop_signal: StopSignal,
    resume: Option<SearchState>,
}

/// Run a search with the default cycle and progress reporting.
pub fn equation_search(datasets: &[Dataset], options: Options, settings: RunSettings) -> Result<SearchOutcome> {
    SearchOrchestrator::new(options).with_settings(settings).run(datasets)
}

/// Size cap for new trees: grows linearly from 3 to `maxsize` over the
/// first `warmup_maxsize_by` fraction of an output's cycles.
pub fn get_cur_maxsize(options: &Options, total_cycles: usize, cycles_remaining: usize) -> usize {
    let config = options.population();
    let elapsed = total_cycles.saturating_sub(cycles_remaining);
    let fraction = if total_cycles == 0 {
        1.0
    } else {
        elapsed as f64 / total_cycles as f64
    };
    let warmup = config.warmup_maxsize_by;
    if warmup > 0.0 && fraction <= warmup {
        let grown = ((config.maxsize - 3) as f64 * fraction / warmup).floor() as usize;
        (3 + grown).min(config.maxsize)
    } else {
        config.maxsize
    }
}

/// A resumed tree must only reference features and operators that exist
/// in this run.
fn check_resumed(member: &PopMember, output: usize, dataset: &Dataset, options: &Options) -> Result<()> {
    let operators = &options.operators;
    if member.tree.fits(dataset.n_features(), operators.n_unary(), operators.n_binary()) {
        return Ok(());
    }
    Err(SearchError::Configuration(format!(
        "Saved state for output {} does not match this run: a tree of size {} uses a feature or operator that is not available ({} features, {} unary, {} binary operators)",
        output + 1,
        member.complexity,
        dataset.n_features(),
        operators.n_unary(),
        operators.n_binary()
    )))
}

impl SearchOrchestrator {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            settings: RunSettings::default(),
            cycle: None,
            progress: None,
            stop_signal: StopSignal::new(),
            resume: None,
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the evolutionary cycle. Not available in distributed mode,
    /// where workers always run [`RegularizedEvolution`].
    pub fn with_cycle(mut self, cycle: Arc<dyn SearchCycle>) -> Self {
        self.cycle = Some(cycle);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_stop_signal(mut self, signal: StopSignal) -> Self {
        self.stop_signal = signal;
        self
    }

    pub fn resume_from(mut self, state: SearchState) -> Self {
        self.resume = Some(state);
        self
    }

    /// Handle for requesting an early stop from another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop_signal.clone()
    }

    pub fn run(self, datasets: &[Dataset]) -> Result<SearchOutcome> {
        let runtime = self.settings.resolve(self.options.runtime())?;
        if datasets.is_empty() {
            return Err(SearchError::Dataset("At least one dataset is required".to_string()));
        }
        if runtime.parallelism == Parallelism::Distributed && self.cycle.is_some() {
            return Err(SearchError::Configuration(
                "A custom search cycle cannot be used with distributed parallelism".to_string(),
            ));
        }
        log::info!(
            "Starting search: {} outputs, {} populations of {}, {:?} parallelism",
            datasets.len(),
            self.options.population().populations,
            self.options.population().population_size,
            runtime.parallelism
        );

        let progress = match self.progress {
            Some(progress) => progress,
            None if runtime.verbosity > 0 => Box::new(LogProgressCallback) as Box<dyn ProgressCallback>,
            None => Box::new(NullProgressCallback),
        };
        let options = Arc::new(self.options);
        let datasets = Arc::new(datasets.to_vec());
        let cycle = self.cycle.unwrap_or_else(|| Arc::new(RegularizedEvolution));

        let mut controller = Controller::setup(
            Arc::clone(&options),
            Arc::clone(&datasets),
            runtime,
            self.resume,
            progress,
        )?;

        let context = CycleContext {
            datasets: Arc::clone(&datasets),
            options: Arc::clone(&options),
            cycle,
        };
        let mut executor: Box<dyn ConcurrencyAdapter> = match controller.runtime.parallelism {
            Parallelism::Serial => Box::new(SerialExecutor::new(context)),
            Parallelism::Concurrent => Box::new(ThreadPoolExecutor::new(context, controller.runtime.threads)?),
            Parallelism::Distributed => {
                let source = if controller.runtime.worker_addresses.is_empty() {
                    let count = controller.runtime.workers.unwrap_or_else(|| {
                        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
                    });
                    WorkerSource::Provision {
                        count,
                        program: options.runtime().worker_command.clone(),
                    }
                } else {
                    WorkerSource::Attach {
                        addresses: controller.runtime.worker_addresses.clone(),
                    }
                };
                Box::new(ProcessPoolExecutor::connect(source, &options, &datasets)?)
            }
        };

        if options.stopping().listen_for_quit {
            spawn_quit_listener(self.stop_signal.clone());
        }
        let checker = StopChecker::new(options.stopping(), self.stop_signal);

        let result = controller
            .spawn_all(executor.as_mut())
            .and_then(|_| controller.main_loop(executor.as_mut(), &checker));
        let stop_reason = match result {
            Ok(reason) => reason,
            Err(e) => {
                log::error!("Search aborted: {}", e);
                if let Err(shutdown) = executor.shutdown(false) {
                    log::warn!("Shutdown after failure also failed: {}", shutdown);
                }
                return Err(e);
            }
        };
        log::info!("Stopping search: {}", stop_reason);

        if let Err(e) = controller.drain(executor.as_mut()) {
            if let Err(shutdown) = executor.shutdown(false) {
                log::warn!("Shutdown after failure also failed: {}", shutdown);
            }
            return Err(e);
        }
        executor.shutdown(true)?;
        controller.finish(stop_reason)
    }
}

/// Mutable state of one run. Touched only by the controller thread.
struct Controller {
    options: Arc<Options>,
    datasets: Arc<Vec<Dataset>>,
    runtime: ResolvedRuntime,
    progress: Box<dyn ProgressCallback>,
    rng: StdRng,
    archives: Vec<HallOfFame>,
    statistics: Vec<RunningSearchStatistics>,
    /// Populations waiting to be spawned. Empty once a slot's cycle is in flight.
    idle: Vec<Vec<Option<Population>>>,
    handles: Vec<Vec<Option<JobHandle>>>,
    /// Most recent population returned by each slot, before migration.
    last_pops: Vec<Vec<Population>>,
    best_sub_pops: Vec<Vec<Population>>,
    iterations: Vec<Vec<usize>>,
    cycles_remaining: Vec<usize>,
    total_cycles: usize,
    cycles_completed: usize,
    total_evals: u64,
    output_file: PathBuf,
    record: RunRecord,
    monitor: ResourceMonitor,
    start: Instant,
    last_summary: Instant,
}

impl Controller {
    fn setup(
        options: Arc<Options>,
        datasets: Arc<Vec<Dataset>>,
        runtime: ResolvedRuntime,
        resume: Option<SearchState>,
        progress: Box<dyn ProgressCallback>,
    ) -> Result<Self> {
        let config = options.population();
        let nout = datasets.len();
        let npops = config.populations;
        let mut rng = match runtime.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut total_evals = 0u64;

        let (saved_pops, saved_archives) = match resume {
            Some(state) => (state.populations, state.halls_of_fame),
            None => (Vec::new(), Vec::new()),
        };

        let mut archives = Vec::with_capacity(nout);
        for (j, dataset) in datasets.iter().enumerate() {
            let archive = match saved_archives.get(j) {
                Some(saved) => {
                    for member in saved.iter() {
                        check_resumed(member, j, dataset, &options)?;
                    }
                    let mut archive = saved.clone();
                    archive.resize(config.maxsize);
                    archive.rescore(dataset, &options)?;
                    archive
                }
                None => HallOfFame::new(config.maxsize),
            };
            archives.push(archive);
        }

        let mut idle = Vec::with_capacity(nout);
        for (j, dataset) in datasets.iter().enumerate() {
            let mut row = Vec::with_capacity(npops);
            for i in 0..npops {
                let saved = saved_pops.get(j).and_then(|pops| pops.get(i));
                let population = match saved {
                    Some(saved) if saved.len() == config.population_size => {
                        for member in &saved.members {
                            check_resumed(member, j, dataset, &options)?;
                        }
                        let mut population = saved.clone();
                        population.rescore(dataset, &options)?;
                        population
                    }
                    Some(saved) => {
                        log::warn!(
                            "Saved population {} of output {} has {} members, expected {}; starting it fresh",
                            i + 1,
                            j + 1,
                            saved.len(),
                            config.population_size
                        );
                        Population::random(config.population_size, dataset, &options, &mut rng)?
                    }
                    None => Population::random(config.population_size, dataset, &options, &mut rng)?,
                };
                total_evals += population.len() as u64;
                row.push(Some(population));
            }
            idle.push(row);
        }

        let last_pops: Vec<Vec<Population>> = idle
            .iter()
            .map(|row| row.iter().flatten().cloned().collect())
            .collect();
        let topn = options.migration().topn;
        let best_sub_pops = last_pops
            .iter()
            .map(|row| row.iter().map(|p| p.best_sub_pop(topn)).collect())
            .collect();

        let cycles_per_output = config.niterations * npops;
        let output_file = options.runtime().output_file.clone().unwrap_or_else(default_output_file);
        if options.runtime().save_to_file {
            log::info!("Saving hall of fame to {}", output_file.display());
        }
        let statistics = vec![RunningSearchStatistics::new(config.maxsize); nout];
        let record = RunRecord::new(options.config.clone());
        let now = Instant::now();

        Ok(Self {
            statistics,
            handles: (0..nout).map(|_| (0..npops).map(|_| None).collect()).collect(),
            iterations: vec![vec![0; npops]; nout],
            cycles_remaining: vec![cycles_per_output; nout],
            total_cycles: cycles_per_output * nout,
            cycles_completed: 0,
            record,
            monitor: ResourceMonitor::new(MONITOR_CAPACITY),
            start: now,
            last_summary: now,
            options,
            datasets,
            runtime,
            progress,
            rng,
            archives,
            idle,
            last_pops,
            best_sub_pops,
            total_evals,
            output_file,
        })
    }

    fn cur_maxsize(&self, output: usize) -> usize {
        let per_output = self.total_cycles / self.cycles_remaining.len().max(1);
        get_cur_maxsize(&self.options, per_output, self.cycles_remaining[output])
    }

    fn spawn_slot(&mut self, executor: &mut dyn ConcurrencyAdapter, j: usize, i: usize, population: Population) -> Result<()> {
        self.statistics[j].move_window();
        self.statistics[j].normalize();
        let job = CycleJob {
            output: j,
            population_index: i,
            iteration: self.iterations[j][i],
            population,
            statistics: self.statistics[j].clone(),
            cur_maxsize: self.cur_maxsize(j),
            seed: self.rng.gen(),
        };
        self.handles[j][i] = Some(executor.spawn(job)?);
        Ok(())
    }

    fn spawn_all(&mut self, executor: &mut dyn ConcurrencyAdapter) -> Result<()> {
        self.progress.on_search_start(self.total_cycles);
        for j in 0..self.idle.len() {
            for i in 0..self.idle[j].len() {
                if let Some(population) = self.idle[j][i].take() {
                    self.spawn_slot(executor, j, i, population)?;
                }
            }
        }
        Ok(())
    }

    fn main_loop(&mut self, executor: &mut dyn ConcurrencyAdapter, checker: &StopChecker) -> Result<StopReason> {
        let mut order: Vec<(usize, usize)> = (0..self.handles.len())
            .flat_map(|j| (0..self.handles[j].len()).map(move |i| (j, i)))
            .collect();

        loop {
            if let Some(reason) = checker.check(&self.archives, &self.cycles_remaining, self.total_evals) {
                return Ok(reason);
            }

            order.shuffle(&mut self.rng);
            let mut ready = None;
            for &(j, i) in &order {
                if self.cycles_remaining[j] == 0 {
                    continue;
                }
                let Some(handle) = self.handles[j][i].as_ref() else {
                    continue;
                };
                if executor.is_ready(handle)? {
                    ready = Some((j, i));
                    break;
                }
            }

            let Some((j, i)) = ready else {
                thread::sleep(IDLE_SLEEP);
                continue;
            };
            let Some(handle) = self.handles[j][i].take() else {
                continue;
            };

            self.monitor.start_work();
            let outcome = executor.collect(handle)?;
            let exhausted = self.absorb(executor, outcome)?;
            self.monitor.stop_work();

            if exhausted && self.cycles_remaining.len() == 1 {
                return Ok(StopReason::CyclesExhausted);
            }
            self.report();
        }
    }

    /// Merge a finished cycle and schedule the slot's next one. Returns
    /// true if the output has used up its cycles.
    fn absorb(&mut self, executor: &mut dyn ConcurrencyAdapter, outcome: CycleOutcome) -> Result<bool> {
        let CycleOutcome {
            output: j,
            population_index: i,
            mut population,
            best_seen,
            record,
            num_evals,
        } = outcome;
        let migration = self.options.migration().clone();
        let deterministic = self.options.runtime().deterministic;

        self.total_evals += num_evals;
        self.cycles_completed += 1;
        self.iterations[j][i] += 1;

        for member in &population.members {
            self.statistics[j].update_frequencies(member.complexity);
        }

        self.archives[j].update_from_population(&population);
        self.archives[j].merge(&best_seen);
        self.last_pops[j][i] = population.clone();
        self.best_sub_pops[j][i] = population.best_sub_pop(migration.topn);

        let dominating = self.archives[j].dominating();
        if self.options.runtime().save_to_file {
            let path = output_path(&self.output_file, j, self.datasets.len());
            save_dominating(&path, &dominating, &self.datasets[j], &self.options.operators)?;
        }

        if migration.migration {
            let pool: Vec<PopMember> = self.best_sub_pops[j]
                .iter()
                .flat_map(|p| p.members.iter().cloned())
                .collect();
            migrate(&pool, &mut population, migration.fraction_replaced, deterministic, &mut self.rng);
        }
        if migration.hof_migration && !dominating.is_empty() {
            migrate(
                &dominating,
                &mut population,
                migration.fraction_replaced_hof,
                deterministic,
                &mut self.rng,
            );
        }

        if self.runtime.progress {
            self.progress
                .on_cycle_complete(self.cycles_completed, self.total_cycles, &record);
        }
        self.record.cycles.push(record);

        self.cycles_remaining[j] = self.cycles_remaining[j].saturating_sub(1);
        if self.cycles_remaining[j] == 0 {
            log::debug!("Output {} has used all its cycles", j + 1);
            self.idle[j][i] = Some(population);
            return Ok(true);
        }

        self.spawn_slot(executor, j, i, population)?;
        Ok(false)
    }

    fn summary(&self) -> SearchSummary {
        let elapsed = self.start.elapsed().as_secs_f64();
        let fronts = self
            .archives
            .iter()
            .zip(self.datasets.iter())
            .map(|(archive, dataset)| {
                archive
                    .dominating()
                    .into_iter()
                    .map(|member| FrontEntry {
                        complexity: member.complexity,
                        loss: member.loss,
                        score: member.score,
                        equation: member.tree.render(dataset.feature_names(), &self.options.operators),
                    })
                    .collect()
            })
            .collect();
        SearchSummary {
            elapsed_seconds: elapsed,
            cycles_completed: self.cycles_completed,
            total_cycles: self.total_cycles,
            total_evals: self.total_evals,
            cycles_per_second: if elapsed > 0.0 {
                self.cycles_completed as f64 / elapsed
            } else {
                0.0
            },
            occupation: match self.runtime.parallelism {
                Parallelism::Serial => None,
                _ => Some(self.monitor.work_fraction()),
            },
            fronts,
        }
    }

    /// Throttled periodic summary.
    fn report(&mut self) {
        if self.runtime.verbosity == 0 {
            return;
        }
        let period = Duration::from_secs(self.options.runtime().print_every_n_seconds);
        if self.last_summary.elapsed() < period {
            return;
        }
        self.last_summary = Instant::now();
        let summary = self.summary();
        if let Some(occupation) = summary.occupation {
            if occupation > OCCUPATION_WARNING {
                log::warn!(
                    "Controller is busy {:.1}% of the time; consider raising ncycles_per_iteration",
                    occupation * 100.0
                );
            }
        }
        self.progress.on_summary(&summary);
    }

    /// Cancel every cycle still in flight. Their results are discarded.
    fn drain(&mut self, executor: &mut dyn ConcurrencyAdapter) -> Result<()> {
        let mut outstanding = 0;
        for row in self.handles.iter_mut() {
            for slot in row.iter_mut() {
                if let Some(handle) = slot.take() {
                    executor.cancel(handle)?;
                    outstanding += 1;
                }
            }
        }
        if outstanding > 0 {
            log::debug!("Drained {} outstanding cycles", outstanding);
        }
        Ok(())
    }

    fn finish(mut self, stop_reason: StopReason) -> Result<SearchOutcome> {
        self.record.finish(stop_reason, self.total_evals);
        if let Some(path) = &self.options.runtime().recorder_file {
            self.record.save_json(path)?;
            log::info!("Run record written to {}", path.display());
        }
        if self.runtime.verbosity > 0 {
            let summary = self.summary();
            self.progress.on_summary(&summary);
        }

        let state = if self.runtime.return_state {
            Some(SearchState {
                populations: self.last_pops,
                halls_of_fame: self.archives.clone(),
            })
        } else {
            None
        };
        Ok(SearchOutcome {
            halls_of_fame: self.archives,
            state,
            stop_reason,
            total_evals: self.total_evals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;

    #[test]
    fn test_cur_maxsize_warmup() {
        let mut config = SearchConfig::default();
        config.population.maxsize = 23;
        config.population.warmup_maxsize_by = 0.5;
        let options = Options::new(config).unwrap();
        assert_eq!(get_cur_maxsize(&options, 100, 100), 3);
        assert_eq!(get_cur_maxsize(&options, 100, 75), 13);
        assert_eq!(get_cur_maxsize(&options, 100, 50), 23);
        assert_eq!(get_cur_maxsize(&options, 100, 10), 23);
    }

    #[test]
    fn test_cur_maxsize_without_warmup() {
        let options = Options::new(SearchConfig::default()).unwrap();
        assert_eq!(get_cur_maxsize(&options, 100, 100), options.population().maxsize);
    }
}
