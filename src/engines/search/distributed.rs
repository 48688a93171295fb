//! Multi-process execution.
//!
//! The controller talks to each worker with newline-delimited JSON, either
//! over the stdio of a child it provisioned (`symsearch worker`) or over
//! TCP to an already running `symsearch worker --listen ADDR`. Each worker
//! is set up with the configuration and datasets, then validated with a
//! self-test before any cycle is scheduled on it.

use crate::config::{Options, SearchConfig};
use crate::data::dataset::Dataset;
use crate::engines::evaluation::expression::eval_loss;
use crate::engines::generation::ast::Node;
use crate::engines::generation::evolution_engine::{CycleJob, CycleOutcome, RegularizedEvolution, SearchCycle};
use crate::engines::generation::member::non_finite;
use crate::engines::search::adapter::{ConcurrencyAdapter, JobHandle};
use crate::error::{Result, SearchError};
use crate::functions::registry::OperatorSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;

const SELF_TEST_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Setup { config: SearchConfig, datasets: Vec<Dataset> },
    SelfTest { output: usize, tree: Node },
    Cycle { job_id: u64, job: CycleJob },
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Ready,
    SelfTest {
        #[serde(with = "non_finite")]
        loss: f64,
    },
    Cycle { job_id: u64, outcome: CycleOutcome },
    Error { job_id: Option<u64>, message: String },
}

fn write_message<W: Write + ?Sized, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let line = serde_json::to_string(message)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn read_message<R: BufRead + ?Sized, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(serde_json::from_str(line.trim())?));
        }
    }
}

/// Worker side: answer requests until `Shutdown` or end of input.
pub fn serve<R: BufRead, W: Write>(mut reader: R, mut writer: W) -> Result<()> {
    let mut state: Option<(Options, Vec<Dataset>)> = None;
    let cycle = RegularizedEvolution;

    while let Some(request) = read_message::<_, Request>(&mut reader)? {
        let reply = match request {
            Request::Setup { config, datasets } => match Options::new(config) {
                Ok(options) => {
                    log::debug!("Worker set up with {} datasets", datasets.len());
                    state = Some((options, datasets));
                    Reply::Ready
                }
                Err(e) => Reply::Error {
                    job_id: None,
                    message: e.to_string(),
                },
            },
            Request::SelfTest { output, tree } => match &state {
                Some((options, datasets)) => match datasets.get(output) {
                    Some(dataset) => match eval_loss(&tree, dataset, options) {
                        Ok(loss) => Reply::SelfTest { loss },
                        Err(e) => Reply::Error {
                            job_id: None,
                            message: e.to_string(),
                        },
                    },
                    None => Reply::Error {
                        job_id: None,
                        message: format!("No dataset for output {}", output),
                    },
                },
                None => Reply::Error {
                    job_id: None,
                    message: "Self-test before setup".to_string(),
                },
            },
            Request::Cycle { job_id, job } => {
                let result = match &state {
                    Some((options, datasets)) => match datasets.get(job.output) {
                        Some(dataset) => cycle.run(job, dataset, options),
                        None => Err(SearchError::Worker(format!("No dataset for output {}", job.output))),
                    },
                    None => Err(SearchError::Worker("Cycle before setup".to_string())),
                };
                match result {
                    Ok(outcome) => Reply::Cycle { job_id, outcome },
                    Err(e) => Reply::Error {
                        job_id: Some(job_id),
                        message: e.to_string(),
                    },
                }
            }
            Request::Shutdown => break,
        };
        write_message(&mut writer, &reply)?;
    }
    Ok(())
}

/// Accept controller connections forever, one session at a time.
pub fn listen<A: ToSocketAddrs>(addr: A) -> Result<()> {
    let listener = TcpListener::bind(addr)?;
    log::info!("Worker listening on {}", listener.local_addr()?);
    serve_listener(listener)
}

pub fn serve_listener(listener: TcpListener) -> Result<()> {
    for stream in listener.incoming() {
        let stream = stream?;
        log::info!("Controller connected from {:?}", stream.peer_addr().ok());
        if let Err(e) = serve_stream(stream) {
            log::warn!("Session ended with error: {}", e);
        }
    }
    Ok(())
}

pub fn serve_stream(stream: TcpStream) -> Result<()> {
    let reader = BufReader::new(stream.try_clone()?);
    serve(reader, stream)
}

/// Tree used to check a worker computes the same losses as the controller.
pub fn probe_tree(operators: &OperatorSet) -> Node {
    if operators.n_binary() > 0 {
        Node::binary(0, Node::Feature(0), Node::Constant(1.0))
    } else if operators.n_unary() > 0 {
        Node::unary(0, Node::Feature(0))
    } else {
        Node::Feature(0)
    }
}

fn losses_agree(a: f64, b: f64) -> bool {
    if a.is_finite() && b.is_finite() {
        (a - b).abs() <= SELF_TEST_TOLERANCE * a.abs().max(1.0)
    } else {
        a == b || (a.is_nan() && b.is_nan())
    }
}

struct WorkerConnection {
    label: String,
    writer: Box<dyn Write + Send>,
    child: Option<Child>,
}

/// How to reach workers.
#[derive(Debug, Clone)]
pub enum WorkerSource {
    /// Start this many child processes running `program worker`.
    Provision { count: usize, program: Option<PathBuf> },
    /// Connect to running workers.
    Attach { addresses: Vec<String> },
}

/// Executes cycles on worker processes. Slots are pinned to workers
/// round-robin, lazily, on first use.
pub struct ProcessPoolExecutor {
    workers: Vec<WorkerConnection>,
    assignments: HashMap<(usize, usize), usize>,
    next_worker: usize,
    replies: Receiver<(usize, Result<Reply>)>,
    pending: HashMap<u64, usize>,
    ready: HashMap<u64, Result<CycleOutcome>>,
    next_id: u64,
}

impl ProcessPoolExecutor {
    pub fn connect(source: WorkerSource, options: &Options, datasets: &[Dataset]) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut workers = Vec::new();

        let setup = Request::Setup {
            config: options.config.clone(),
            datasets: datasets.to_vec(),
        };
        let probe = probe_tree(&options.operators);
        let expected = match datasets.first() {
            Some(dataset) => eval_loss(&probe, dataset, options)?,
            None => return Err(SearchError::Dataset("No datasets".to_string())),
        };

        match source {
            WorkerSource::Provision { count, program } => {
                let program = match program {
                    Some(program) => program,
                    None => std::env::current_exe()?,
                };
                for index in 0..count {
                    let mut child = Command::new(&program)
                        .arg("worker")
                        .stdin(Stdio::piped())
                        .stdout(Stdio::piped())
                        .stderr(Stdio::inherit())
                        .spawn()
                        .map_err(|e| {
                            SearchError::Worker(format!("Failed to start {}: {}", program.display(), e))
                        })?;
                    let stdin = child
                        .stdin
                        .take()
                        .ok_or_else(|| SearchError::Worker("Worker stdin unavailable".to_string()))?;
                    let stdout = child
                        .stdout
                        .take()
                        .ok_or_else(|| SearchError::Worker("Worker stdout unavailable".to_string()))?;
                    let connection = WorkerConnection {
                        label: format!("worker process {} (pid {})", index, child.id()),
                        writer: Box::new(stdin),
                        child: Some(child),
                    };
                    workers.push(Self::handshake(
                        connection,
                        Box::new(BufReader::new(stdout)),
                        workers.len(),
                        &setup,
                        &probe,
                        expected,
                        tx.clone(),
                    )?);
                }
            }
            WorkerSource::Attach { addresses } => {
                for address in addresses {
                    let stream = TcpStream::connect(&address)
                        .map_err(|e| SearchError::Worker(format!("Failed to connect to {}: {}", address, e)))?;
                    let reader = BufReader::new(stream.try_clone()?);
                    let connection = WorkerConnection {
                        label: format!("worker at {}", address),
                        writer: Box::new(stream),
                        child: None,
                    };
                    workers.push(Self::handshake(
                        connection,
                        Box::new(reader),
                        workers.len(),
                        &setup,
                        &probe,
                        expected,
                        tx.clone(),
                    )?);
                }
            }
        }

        if workers.is_empty() {
            return Err(SearchError::Configuration("Distributed mode needs at least one worker".to_string()));
        }
        log::info!("{} workers ready", workers.len());

        Ok(Self {
            workers,
            assignments: HashMap::new(),
            next_worker: 0,
            replies: rx,
            pending: HashMap::new(),
            ready: HashMap::new(),
            next_id: 0,
        })
    }

    /// Set up and self-test one worker, then hand its reader to a thread
    /// that forwards replies to the shared channel.
    fn handshake(
        mut connection: WorkerConnection,
        mut reader: Box<dyn BufRead + Send>,
        index: usize,
        setup: &Request,
        probe: &Node,
        expected: f64,
        tx: Sender<(usize, Result<Reply>)>,
    ) -> Result<WorkerConnection> {
        write_message(&mut connection.writer, setup)?;
        match read_message::<_, Reply>(&mut reader)? {
            Some(Reply::Ready) => {}
            Some(Reply::Error { message, .. }) => {
                return Err(SearchError::Worker(format!("{} failed setup: {}", connection.label, message)))
            }
            other => {
                return Err(SearchError::Worker(format!(
                    "{} sent unexpected setup reply: {:?}",
                    connection.label, other
                )))
            }
        }

        write_message(
            &mut connection.writer,
            &Request::SelfTest {
                output: 0,
                tree: probe.clone(),
            },
        )?;
        match read_message::<_, Reply>(&mut reader)? {
            Some(Reply::SelfTest { loss }) if losses_agree(loss, expected) => {}
            Some(Reply::SelfTest { loss }) => {
                return Err(SearchError::Worker(format!(
                    "{} failed self-test: loss {} but expected {}",
                    connection.label, loss, expected
                )))
            }
            other => {
                return Err(SearchError::Worker(format!(
                    "{} sent unexpected self-test reply: {:?}",
                    connection.label, other
                )))
            }
        }
        log::debug!("{} passed self-test", connection.label);

        thread::Builder::new()
            .name(format!("worker-reader-{}", index))
            .spawn(move || loop {
                match read_message::<_, Reply>(&mut reader) {
                    Ok(Some(reply)) => {
                        if tx.send((index, Ok(reply))).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let closed = SearchError::Worker(format!("worker {} closed the connection", index));
                        let _ = tx.send((index, Err(closed)));
                        break;
                    }
                    Err(e) => {
                        let _ = tx.send((index, Err(e)));
                        break;
                    }
                }
            })?;
        Ok(connection)
    }

    fn worker_for(&mut self, output: usize, population: usize) -> usize {
        let n = self.workers.len();
        let next = &mut self.next_worker;
        *self.assignments.entry((output, population)).or_insert_with(|| {
            let chosen = *next % n;
            *next += 1;
            chosen
        })
    }

    /// Move every reply already received into `ready`.
    fn drain_replies(&mut self) -> Result<()> {
        loop {
            match self.replies.try_recv() {
                Ok(message) => self.accept(message)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn accept(&mut self, (worker, reply): (usize, Result<Reply>)) -> Result<()> {
        let label = self.workers.get(worker).map(|w| w.label.clone()).unwrap_or_default();
        match reply? {
            Reply::Cycle { job_id, outcome } => {
                self.pending.remove(&job_id);
                self.ready.insert(job_id, Ok(outcome));
                Ok(())
            }
            Reply::Error {
                job_id: Some(job_id),
                message,
            } => {
                self.pending.remove(&job_id);
                self.ready
                    .insert(job_id, Err(SearchError::Worker(format!("{}: {}", label, message))));
                Ok(())
            }
            other => Err(SearchError::Worker(format!("{} sent unexpected reply: {:?}", label, other))),
        }
    }
}

impl ConcurrencyAdapter for ProcessPoolExecutor {
    fn spawn(&mut self, job: CycleJob) -> Result<JobHandle> {
        let handle = JobHandle::new(self.next_id, job.output, job.population_index);
        self.next_id += 1;
        let worker = self.worker_for(job.output, job.population_index);
        write_message(
            &mut self.workers[worker].writer,
            &Request::Cycle {
                job_id: handle.id(),
                job,
            },
        )?;
        self.pending.insert(handle.id(), worker);
        Ok(handle)
    }

    fn is_ready(&mut self, handle: &JobHandle) -> Result<bool> {
        self.drain_replies()?;
        Ok(self.ready.contains_key(&handle.id()))
    }

    fn collect(&mut self, handle: JobHandle) -> Result<CycleOutcome> {
        self.drain_replies()?;
        while !self.ready.contains_key(&handle.id()) {
            let message = self
                .replies
                .recv()
                .map_err(|_| SearchError::Worker(format!("Workers disconnected before job {}", handle.id())))?;
            self.accept(message)?;
        }
        self.ready
            .remove(&handle.id())
            .unwrap_or_else(|| Err(SearchError::Worker(format!("Job {} has no result", handle.id()))))
    }

    fn cancel(&mut self, handle: JobHandle) -> Result<()> {
        // The worker is busy with it either way; wait so replies stay in step.
        self.collect(handle).map(|_| ())
    }

    fn shutdown(&mut self, normal: bool) -> Result<()> {
        let workers = std::mem::take(&mut self.workers);
        for mut worker in workers {
            if !normal {
                // Dropping the writer closes the pipe; the worker exits on EOF.
                continue;
            }
            if let Err(e) = write_message(&mut worker.writer, &Request::Shutdown) {
                log::warn!("Could not send shutdown to {}: {}", worker.label, e);
            }
            drop(worker.writer);
            if let Some(mut child) = worker.child {
                match child.wait() {
                    Ok(status) => log::debug!("{} exited with {}", worker.label, status),
                    Err(e) => log::warn!("Failed to wait for {}: {}", worker.label, e),
                }
            }
        }
        self.pending.clear();
        self.ready.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_losses_agree() {
        assert!(losses_agree(1.0, 1.0 + 1e-12));
        assert!(!losses_agree(1.0, 1.1));
        assert!(losses_agree(f64::INFINITY, f64::INFINITY));
    }

    fn offline_pool(size: usize) -> ProcessPoolExecutor {
        let (_tx, rx) = mpsc::channel();
        ProcessPoolExecutor {
            workers: (0..size)
                .map(|i| WorkerConnection {
                    label: format!("worker {}", i),
                    writer: Box::new(Vec::new()),
                    child: None,
                })
                .collect(),
            assignments: HashMap::new(),
            next_worker: 0,
            replies: rx,
            pending: HashMap::new(),
            ready: HashMap::new(),
            next_id: 0,
        }
    }

    #[test]
    fn test_slots_assigned_round_robin_on_first_use() {
        let mut pool = offline_pool(3);
        let first: Vec<usize> = [(0, 0), (0, 1), (0, 2), (0, 3), (1, 0)]
            .iter()
            .map(|&(j, i)| pool.worker_for(j, i))
            .collect();
        assert_eq!(first, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_slot_keeps_its_worker() {
        let mut pool = offline_pool(2);
        let a = pool.worker_for(0, 3);
        let b = pool.worker_for(1, 1);
        assert_ne!(a, b);
        for _ in 0..10 {
            pool.worker_for(0, 0);
            assert_eq!(pool.worker_for(0, 3), a);
            assert_eq!(pool.worker_for(1, 1), b);
        }
        assert_eq!(pool.assignments.len(), 3);
    }

    #[test]
    fn test_serve_answers_self_test() {
        let dataset = Dataset::from_columns(vec![vec![1.0, 2.0]], vec![2.0, 3.0]).unwrap();
        let mut input = Vec::new();
        write_message(
            &mut input,
            &Request::Setup {
                config: SearchConfig::default(),
                datasets: vec![dataset],
            },
        )
        .unwrap();
        write_message(
            &mut input,
            &Request::SelfTest {
                output: 0,
                tree: Node::binary(0, Node::Feature(0), Node::Constant(1.0)),
            },
        )
        .unwrap();
        write_message(&mut input, &Request::Shutdown).unwrap();

        let mut output = Vec::new();
        serve(&input[..], &mut output).unwrap();
        let mut reader = &output[..];
        assert!(matches!(read_message::<_, Reply>(&mut reader).unwrap(), Some(Reply::Ready)));
        match read_message::<_, Reply>(&mut reader).unwrap() {
            Some(Reply::SelfTest { loss }) => assert_eq!(loss, 0.0),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_setup_with_unknown_operator_is_reported() {
        let dataset = Dataset::from_columns(vec![vec![1.0]], vec![1.0]).unwrap();
        let mut config = SearchConfig::default();
        config.population.unary_operators = vec!["custom".to_string()];
        let mut input = Vec::new();
        write_message(
            &mut input,
            &Request::Setup {
                config,
                datasets: vec![dataset],
            },
        )
        .unwrap();
        let mut output = Vec::new();
        serve(&input[..], &mut output).unwrap();
        assert!(matches!(
            read_message::<_, Reply>(&mut &output[..]).unwrap(),
            Some(Reply::Error { job_id: None, .. })
        ));
    }
}
