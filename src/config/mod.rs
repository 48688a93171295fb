pub mod traits;
pub mod search;
pub mod migration;
pub mod stopping;
pub mod runtime;
pub mod manager;

pub use manager::{ConfigManager, Options, SearchConfig};
pub use migration::MigrationConfig;
pub use runtime::{Parallelism, ResolvedRuntime, RunSettings, RuntimeConfig};
pub use search::{MutationWeights, PopulationConfig};
pub use stopping::StoppingConfig;
pub use traits::ConfigSection;
