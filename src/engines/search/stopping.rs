use crate::config::StoppingConfig;
use crate::engines::generation::hall_of_fame::HallOfFame;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared flag polled by the control loop. Setting it asks the search to
/// stop after the cycle in progress.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Watch stdin on a detached thread; entering `q` sets the signal.
pub fn spawn_quit_listener(signal: StopSignal) {
    let spawned = thread::Builder::new()
        .name("quit-listener".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) if line.trim() == "q" => {
                        log::info!("Quit requested; stopping after the current cycle");
                        signal.request_stop();
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Could not start quit listener: {}", e);
    } else {
        log::info!("Enter 'q' then <enter> to stop the search early");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    CyclesExhausted,
    LossThreshold,
    UserInterrupt,
    Timeout,
    MaxEvals,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            StopReason::CyclesExhausted => "all cycles completed",
            StopReason::LossThreshold => "loss threshold reached",
            StopReason::UserInterrupt => "stop requested",
            StopReason::Timeout => "timeout",
            StopReason::MaxEvals => "evaluation budget exhausted",
        };
        write!(f, "{}", text)
    }
}

/// Soft stopping conditions, polled once per loop iteration.
pub struct StopChecker {
    early_stop_condition: Option<f64>,
    timeout: Option<Duration>,
    max_evals: Option<u64>,
    signal: StopSignal,
    start: Instant,
}

impl StopChecker {
    pub fn new(config: &StoppingConfig, signal: StopSignal) -> Self {
        Self {
            early_stop_condition: config.early_stop_condition,
            timeout: config.timeout_in_seconds.map(Duration::from_secs_f64),
            max_evals: config.max_evals,
            signal,
            start: Instant::now(),
        }
    }

    pub fn check(&self, archives: &[HallOfFame], cycles_remaining: &[usize], total_evals: u64) -> Option<StopReason> {
        if !cycles_remaining.is_empty() && cycles_remaining.iter().all(|c| *c == 0) {
            return Some(StopReason::CyclesExhausted);
        }
        if let Some(threshold) = self.early_stop_condition {
            let reached = !archives.is_empty()
                && archives
                    .iter()
                    .all(|hof| hof.iter().any(|member| member.loss < threshold));
            if reached {
                return Some(StopReason::LossThreshold);
            }
        }
        if self.signal.is_set() {
            return Some(StopReason::UserInterrupt);
        }
        if let Some(timeout) = self.timeout {
            if self.start.elapsed() > timeout {
                return Some(StopReason::Timeout);
            }
        }
        if let Some(max_evals) = self.max_evals {
            if total_evals > max_evals {
                return Some(StopReason::MaxEvals);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::{ast::Node, member::PopMember};

    #[test]
    fn test_signal_stops() {
        let signal = StopSignal::new();
        let checker = StopChecker::new(&StoppingConfig::default(), signal.clone());
        assert_eq!(checker.check(&[], &[3], 0), None);
        signal.request_stop();
        assert_eq!(checker.check(&[], &[3], 0), Some(StopReason::UserInterrupt));
    }

    #[test]
    fn test_max_evals_is_strict() {
        let config = StoppingConfig {
            max_evals: Some(100),
            ..Default::default()
        };
        let checker = StopChecker::new(&config, StopSignal::new());
        assert_eq!(checker.check(&[], &[1], 100), None);
        assert_eq!(checker.check(&[], &[1], 101), Some(StopReason::MaxEvals));
    }

    #[test]
    fn test_loss_threshold_needs_every_output() {
        let config = StoppingConfig {
            early_stop_condition: Some(0.5),
            ..Default::default()
        };
        let checker = StopChecker::new(&config, StopSignal::new());
        let mut good = HallOfFame::new(5);
        good.update(&PopMember::new(Node::Feature(0), 0.1, 0.1, true));
        let empty = HallOfFame::new(5);
        assert_eq!(checker.check(&[good.clone(), empty], &[1, 1], 0), None);
        assert_eq!(checker.check(&[good], &[1], 0), Some(StopReason::LossThreshold));
    }
}
