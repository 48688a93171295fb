pub mod config;
pub mod data;
pub mod engines;
pub mod error;
pub mod functions;

pub use config::{ConfigManager, Options, Parallelism, RunSettings, SearchConfig};
pub use data::Dataset;
pub use engines::search::{equation_search, SearchOrchestrator, SearchOutcome, SearchState, StopSignal};
pub use error::{Result, SearchError};
