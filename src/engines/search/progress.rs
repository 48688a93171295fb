use crate::engines::generation::evolution_engine::CycleRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontEntry {
    pub complexity: usize,
    pub loss: f64,
    pub score: f64,
    pub equation: String,
}

/// Periodic snapshot of a running search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub elapsed_seconds: f64,
    pub cycles_completed: usize,
    pub total_cycles: usize,
    pub total_evals: u64,
    pub cycles_per_second: f64,
    /// Share of controller time spent handling results. `None` in serial mode.
    pub occupation: Option<f64>,
    /// Dominating set of each output.
    pub fronts: Vec<Vec<FrontEntry>>,
}

pub trait ProgressCallback: Send {
    fn on_search_start(&mut self, total_cycles: usize);
    fn on_cycle_complete(&mut self, completed: usize, total: usize, record: &CycleRecord);
    fn on_summary(&mut self, summary: &SearchSummary);
}

/// Reports through the `log` facade.
pub struct LogProgressCallback;

impl ProgressCallback for LogProgressCallback {
    fn on_search_start(&mut self, total_cycles: usize) {
        log::info!("Starting search: {} cycles scheduled", total_cycles);
    }

    fn on_cycle_complete(&mut self, completed: usize, total: usize, record: &CycleRecord) {
        if completed % 10 == 0 || completed == total {
            log::info!(
                "  Completed {}/{} cycles (output {}, best loss {:.4e})",
                completed,
                total,
                record.output + 1,
                record.best_loss
            );
        }
    }

    fn on_summary(&mut self, summary: &SearchSummary) {
        log::info!(
            "Progress: {}/{} cycles, {:.2} cycles/s, {} evaluations, {:.1}s elapsed",
            summary.cycles_completed,
            summary.total_cycles,
            summary.cycles_per_second,
            summary.total_evals,
            summary.elapsed_seconds
        );
        if let Some(occupation) = summary.occupation {
            log::info!("Head worker occupation: {:.1}%", occupation * 100.0);
        }
        for (j, front) in summary.fronts.iter().enumerate() {
            if summary.fronts.len() > 1 {
                log::info!("Output {}:", j + 1);
            }
            log::info!("{:<12}{:<14}{}", "Complexity", "Loss", "Equation");
            for entry in front {
                log::info!("{:<12}{:<14.4e}{}", entry.complexity, entry.loss, entry.equation);
            }
        }
    }
}

/// Silent callback for runs with verbosity 0.
pub struct NullProgressCallback;

impl ProgressCallback for NullProgressCallback {
    fn on_search_start(&mut self, _total_cycles: usize) {}
    fn on_cycle_complete(&mut self, _completed: usize, _total: usize, _record: &CycleRecord) {}
    fn on_summary(&mut self, _summary: &SearchSummary) {}
}

/// Forwards progress to another thread, e.g. a front end.
pub struct ChannelProgressCallback {
    sender: std::sync::mpsc::Sender<ProgressMessage>,
}

#[derive(Debug, Clone)]
pub enum ProgressMessage {
    SearchStart(usize),
    CycleComplete { completed: usize, total: usize, record: CycleRecord },
    Summary(SearchSummary),
}

impl ChannelProgressCallback {
    pub fn new(sender: std::sync::mpsc::Sender<ProgressMessage>) -> Self {
        Self { sender }
    }
}

impl ProgressCallback for ChannelProgressCallback {
    fn on_search_start(&mut self, total_cycles: usize) {
        let _ = self.sender.send(ProgressMessage::SearchStart(total_cycles));
    }

    fn on_cycle_complete(&mut self, completed: usize, total: usize, record: &CycleRecord) {
        let _ = self.sender.send(ProgressMessage::CycleComplete {
            completed,
            total,
            record: record.clone(),
        });
    }

    fn on_summary(&mut self, summary: &SearchSummary) {
        let _ = self.sender.send(ProgressMessage::Summary(summary.clone()));
    }
}
