use super::traits::ConfigSection;
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::PathBuf;

/// How search cycles are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    Serial,
    #[default]
    Concurrent,
    Distributed,
}

impl std::str::FromStr for Parallelism {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "serial" => Ok(Parallelism::Serial),
            "concurrent" | "multithreading" => Ok(Parallelism::Concurrent),
            "distributed" | "multiprocessing" => Ok(Parallelism::Distributed),
            other => Err(SearchError::Configuration(format!(
                "Unknown parallelism '{}'. Expected serial, concurrent or distributed",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub parallelism: Option<Parallelism>,
    /// Thread pool size for concurrent mode.
    pub threads: Option<usize>,
    /// Worker processes to provision in distributed mode.
    pub workers: Option<usize>,
    /// Already running workers (`host:port`) for distributed mode.
    pub worker_addresses: Vec<String>,
    /// Program used to provision workers. Defaults to this executable.
    pub worker_command: Option<PathBuf>,
    pub verbosity: Option<u32>,
    pub progress: Option<bool>,
    pub return_state: Option<bool>,
    pub seed: Option<u64>,
    pub deterministic: bool,
    pub save_to_file: bool,
    pub output_file: Option<PathBuf>,
    pub recorder_file: Option<PathBuf>,
    pub print_every_n_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallelism: None,
            threads: None,
            workers: None,
            worker_addresses: Vec::new(),
            worker_command: None,
            verbosity: None,
            progress: None,
            return_state: None,
            seed: None,
            deterministic: false,
            save_to_file: true,
            output_file: None,
            recorder_file: None,
            print_every_n_seconds: 5,
        }
    }
}

impl ConfigSection for RuntimeConfig {
    fn section_name() -> &'static str {
        "runtime"
    }

    fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(SearchError::Configuration("threads must be at least 1".to_string()));
        }
        if self.workers == Some(0) {
            return Err(SearchError::Configuration("workers must be at least 1".to_string()));
        }
        if self.print_every_n_seconds == 0 {
            return Err(SearchError::Configuration(
                "print_every_n_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings passed at the call site. Each may also appear in the embedded
/// [`RuntimeConfig`]; giving both with different values is an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSettings {
    pub parallelism: Option<Parallelism>,
    pub threads: Option<usize>,
    pub workers: Option<usize>,
    pub worker_addresses: Option<Vec<String>>,
    pub verbosity: Option<u32>,
    pub progress: Option<bool>,
    pub return_state: Option<bool>,
    pub seed: Option<u64>,
}

/// Runtime settings after call-site and embedded values are reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRuntime {
    pub parallelism: Parallelism,
    pub threads: Option<usize>,
    pub workers: Option<usize>,
    pub worker_addresses: Vec<String>,
    pub verbosity: u32,
    pub progress: bool,
    pub return_state: bool,
    pub seed: Option<u64>,
    pub deterministic: bool,
}

fn resolve<T: PartialEq + Debug>(name: &str, call_site: Option<T>, embedded: Option<T>) -> Result<Option<T>> {
    match (call_site, embedded) {
        (Some(a), Some(b)) if a != b => Err(SearchError::Configuration(format!(
            "`{}` given as {:?} at the call site and {:?} in the configuration",
            name, a, b
        ))),
        (Some(a), _) => Ok(Some(a)),
        (None, b) => Ok(b),
    }
}

impl RunSettings {
    /// Reconcile with the embedded configuration and check the settings
    /// are compatible with the chosen parallelism.
    pub fn resolve(&self, runtime: &RuntimeConfig) -> Result<ResolvedRuntime> {
        let parallelism = resolve("parallelism", self.parallelism, runtime.parallelism)?.unwrap_or_default();
        let threads = resolve("threads", self.threads, runtime.threads)?;
        let workers = resolve("workers", self.workers, runtime.workers)?;
        let embedded_addresses = if runtime.worker_addresses.is_empty() {
            None
        } else {
            Some(runtime.worker_addresses.clone())
        };
        let worker_addresses =
            resolve("worker_addresses", self.worker_addresses.clone(), embedded_addresses)?.unwrap_or_default();
        let verbosity = resolve("verbosity", self.verbosity, runtime.verbosity)?.unwrap_or(1);
        let progress = resolve("progress", self.progress, runtime.progress)?.unwrap_or(false);
        let return_state = resolve("return_state", self.return_state, runtime.return_state)?.unwrap_or(false);
        let seed = resolve("seed", self.seed, runtime.seed)?;

        if parallelism != Parallelism::Distributed && (workers.is_some() || !worker_addresses.is_empty()) {
            return Err(SearchError::Configuration(format!(
                "workers and worker_addresses are only valid with distributed parallelism, not {:?}",
                parallelism
            )));
        }
        if parallelism != Parallelism::Concurrent && threads.is_some() {
            return Err(SearchError::Configuration(format!(
                "threads is only valid with concurrent parallelism, not {:?}",
                parallelism
            )));
        }
        if parallelism == Parallelism::Distributed && workers.is_some() && !worker_addresses.is_empty() {
            return Err(SearchError::Configuration(
                "Give either workers or worker_addresses, not both".to_string(),
            ));
        }
        if parallelism != Parallelism::Serial && (seed.is_some() || runtime.deterministic) {
            return Err(SearchError::Configuration(
                "A fixed seed or deterministic mode requires serial parallelism".to_string(),
            ));
        }

        Ok(ResolvedRuntime {
            parallelism,
            threads,
            workers,
            worker_addresses,
            verbosity,
            progress,
            return_state,
            seed,
            deterministic: runtime.deterministic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicting_duplicates_rejected() {
        let runtime = RuntimeConfig {
            verbosity: Some(0),
            ..Default::default()
        };
        let settings = RunSettings {
            verbosity: Some(2),
            ..Default::default()
        };
        assert!(matches!(settings.resolve(&runtime), Err(SearchError::Configuration(_))));

        let same = RunSettings {
            verbosity: Some(0),
            ..Default::default()
        };
        assert_eq!(same.resolve(&runtime).unwrap().verbosity, 0);
    }

    #[test]
    fn test_seed_requires_serial() {
        let settings = RunSettings {
            parallelism: Some(Parallelism::Concurrent),
            seed: Some(1),
            ..Default::default()
        };
        assert!(settings.resolve(&RuntimeConfig::default()).is_err());

        let serial = RunSettings {
            parallelism: Some(Parallelism::Serial),
            seed: Some(1),
            ..Default::default()
        };
        assert_eq!(serial.resolve(&RuntimeConfig::default()).unwrap().seed, Some(1));
    }

    #[test]
    fn test_workers_rejected_outside_distributed() {
        let settings = RunSettings {
            parallelism: Some(Parallelism::Serial),
            workers: Some(4),
            ..Default::default()
        };
        assert!(settings.resolve(&RuntimeConfig::default()).is_err());
    }

    #[test]
    fn test_parse_parallelism() {
        assert_eq!("serial".parse::<Parallelism>().unwrap(), Parallelism::Serial);
        assert!("gpu".parse::<Parallelism>().is_err());
    }
}
