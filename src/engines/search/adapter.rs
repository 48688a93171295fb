//! One spawn/poll/collect interface over the three scheduling modes.
//!
//! A spawned [`CycleJob`] is moved into the executor; the caller gets it
//! back only as part of the collected [`CycleOutcome`].

use crate::config::Options;
use crate::data::dataset::Dataset;
use crate::engines::generation::evolution_engine::{CycleJob, CycleOutcome, SearchCycle};
use crate::error::{Result, SearchError};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;

/// Opaque ticket for a spawned job.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct JobHandle {
    id: u64,
    pub output: usize,
    pub population_index: usize,
}

impl JobHandle {
    pub(crate) fn new(id: u64, output: usize, population_index: usize) -> Self {
        Self {
            id,
            output,
            population_index,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

pub trait ConcurrencyAdapter {
    fn spawn(&mut self, job: CycleJob) -> Result<JobHandle>;

    /// Non-blocking readiness check.
    fn is_ready(&mut self, handle: &JobHandle) -> Result<bool>;

    /// Take the result. Blocks only if the job is not ready yet.
    fn collect(&mut self, handle: JobHandle) -> Result<CycleOutcome>;

    /// Give up on a job. Work that has not started is never run; work in
    /// progress is waited for and its result dropped.
    fn cancel(&mut self, handle: JobHandle) -> Result<()>;

    /// Release resources. `normal` is false when the run is aborting.
    fn shutdown(&mut self, normal: bool) -> Result<()>;
}

/// Shared read-only inputs of every cycle.
#[derive(Clone)]
pub struct CycleContext {
    pub datasets: Arc<Vec<Dataset>>,
    pub options: Arc<Options>,
    pub cycle: Arc<dyn SearchCycle>,
}

impl CycleContext {
    pub fn run(&self, job: CycleJob) -> Result<CycleOutcome> {
        let dataset = self
            .datasets
            .get(job.output)
            .ok_or_else(|| SearchError::Worker(format!("No dataset for output {}", job.output)))?;
        self.cycle.run(job, dataset, &self.options)
    }
}

/// Runs each job on the calling thread when it is collected. A job that
/// is cancelled instead never runs.
pub struct SerialExecutor {
    context: CycleContext,
    pending: HashMap<u64, CycleJob>,
    next_id: u64,
}

impl SerialExecutor {
    pub fn new(context: CycleContext) -> Self {
        Self {
            context,
            pending: HashMap::new(),
            next_id: 0,
        }
    }
}

impl ConcurrencyAdapter for SerialExecutor {
    fn spawn(&mut self, job: CycleJob) -> Result<JobHandle> {
        let handle = JobHandle::new(self.next_id, job.output, job.population_index);
        self.next_id += 1;
        self.pending.insert(handle.id, job);
        Ok(handle)
    }

    fn is_ready(&mut self, _handle: &JobHandle) -> Result<bool> {
        Ok(true)
    }

    fn collect(&mut self, handle: JobHandle) -> Result<CycleOutcome> {
        let job = self
            .pending
            .remove(&handle.id)
            .ok_or_else(|| SearchError::Worker(format!("Unknown job {}", handle.id)))?;
        self.context.run(job)
    }

    fn cancel(&mut self, handle: JobHandle) -> Result<()> {
        self.pending.remove(&handle.id);
        Ok(())
    }

    fn shutdown(&mut self, _normal: bool) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs jobs on a rayon thread pool. Each job reports back on its own
/// channel.
pub struct ThreadPoolExecutor {
    context: CycleContext,
    pool: rayon::ThreadPool,
    pending: HashMap<u64, Receiver<Result<CycleOutcome>>>,
    ready: HashMap<u64, Result<CycleOutcome>>,
    next_id: u64,
}

impl ThreadPoolExecutor {
    pub fn new(context: CycleContext, threads: Option<usize>) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("search-worker-{}", i));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| SearchError::Worker(format!("Failed to build thread pool: {}", e)))?;
        log::debug!("Thread pool with {} threads", pool.current_num_threads());
        Ok(Self {
            context,
            pool,
            pending: HashMap::new(),
            ready: HashMap::new(),
            next_id: 0,
        })
    }
}

impl ConcurrencyAdapter for ThreadPoolExecutor {
    fn spawn(&mut self, job: CycleJob) -> Result<JobHandle> {
        let handle = JobHandle::new(self.next_id, job.output, job.population_index);
        self.next_id += 1;

        let (tx, rx) = mpsc::channel();
        let context = self.context.clone();
        self.pool.spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| context.run(job)))
                .unwrap_or_else(|payload| Err(SearchError::Worker(format!("Cycle panicked: {}", panic_message(payload)))));
            let _ = tx.send(result);
        });
        self.pending.insert(handle.id, rx);
        Ok(handle)
    }

    fn is_ready(&mut self, handle: &JobHandle) -> Result<bool> {
        if self.ready.contains_key(&handle.id) {
            return Ok(true);
        }
        let rx = self
            .pending
            .get(&handle.id)
            .ok_or_else(|| SearchError::Worker(format!("Unknown job {}", handle.id)))?;
        match rx.try_recv() {
            Ok(result) => {
                self.pending.remove(&handle.id);
                self.ready.insert(handle.id, result);
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(SearchError::Worker(format!(
                "Job {} ended without a result",
                handle.id
            ))),
        }
    }

    fn collect(&mut self, handle: JobHandle) -> Result<CycleOutcome> {
        if let Some(result) = self.ready.remove(&handle.id) {
            return result;
        }
        let rx = self
            .pending
            .remove(&handle.id)
            .ok_or_else(|| SearchError::Worker(format!("Unknown job {}", handle.id)))?;
        rx.recv()
            .map_err(|_| SearchError::Worker(format!("Job {} ended without a result", handle.id)))?
    }

    fn cancel(&mut self, handle: JobHandle) -> Result<()> {
        if self.ready.remove(&handle.id).is_none() {
            if let Some(rx) = self.pending.remove(&handle.id) {
                let _ = rx.recv();
            }
        }
        Ok(())
    }

    fn shutdown(&mut self, normal: bool) -> Result<()> {
        if normal {
            for (_, rx) in self.pending.drain() {
                let _ = rx.recv();
            }
        } else {
            self.pending.clear();
        }
        self.ready.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::engines::generation::{
        hall_of_fame::HallOfFame,
        evolution_engine::CycleRecord,
        population::Population,
        statistics::RunningSearchStatistics,
    };

    struct Echo;

    impl SearchCycle for Echo {
        fn run(&self, job: CycleJob, _dataset: &Dataset, _options: &Options) -> Result<CycleOutcome> {
            Ok(CycleOutcome {
                output: job.output,
                population_index: job.population_index,
                population: job.population,
                best_seen: HallOfFame::new(3),
                record: CycleRecord {
                    output: job.output,
                    population: job.population_index,
                    iteration: job.iteration,
                    cur_maxsize: job.cur_maxsize,
                    num_evals: 0,
                    best_loss: 0.0,
                    mutations_accepted: 0,
                    mutations_rejected: 0,
                    elapsed_seconds: 0.0,
                },
                num_evals: 0,
            })
        }
    }

    struct Panics;

    impl SearchCycle for Panics {
        fn run(&self, _job: CycleJob, _dataset: &Dataset, _options: &Options) -> Result<CycleOutcome> {
            panic!("boom")
        }
    }

    fn context(cycle: Arc<dyn SearchCycle>) -> CycleContext {
        let dataset = Dataset::from_columns(vec![vec![1.0, 2.0]], vec![1.0, 2.0]).unwrap();
        CycleContext {
            datasets: Arc::new(vec![dataset]),
            options: Arc::new(Options::new(SearchConfig::default()).unwrap()),
            cycle,
        }
    }

    fn job(population_index: usize) -> CycleJob {
        CycleJob {
            output: 0,
            population_index,
            iteration: 0,
            population: Population::new(Vec::new()),
            statistics: RunningSearchStatistics::new(3),
            cur_maxsize: 3,
            seed: 0,
        }
    }

    #[test]
    fn test_serial_always_ready() {
        let mut executor = SerialExecutor::new(context(Arc::new(Echo)));
        let handle = executor.spawn(job(4)).unwrap();
        assert!(executor.is_ready(&handle).unwrap());
        assert_eq!(executor.collect(handle).unwrap().population_index, 4);
    }

    #[test]
    fn test_serial_cancel_never_runs_job() {
        let mut executor = SerialExecutor::new(context(Arc::new(Panics)));
        let handle = executor.spawn(job(0)).unwrap();
        executor.cancel(handle).unwrap();
        executor.shutdown(true).unwrap();
    }

    #[test]
    fn test_thread_pool_collects() {
        let mut executor = ThreadPoolExecutor::new(context(Arc::new(Echo)), Some(2)).unwrap();
        let handles: Vec<_> = (0..4).map(|i| executor.spawn(job(i)).unwrap()).collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(executor.collect(handle).unwrap().population_index, i);
        }
        executor.shutdown(true).unwrap();
    }

    #[test]
    fn test_thread_pool_panic_is_worker_error() {
        let mut executor = ThreadPoolExecutor::new(context(Arc::new(Panics)), Some(1)).unwrap();
        let handle = executor.spawn(job(0)).unwrap();
        assert!(matches!(executor.collect(handle), Err(SearchError::Worker(_))));
    }
}
