use super::{
    migration::MigrationConfig, runtime::RuntimeConfig, search::PopulationConfig, stopping::StoppingConfig,
    traits::ConfigSection,
};
use crate::error::{Result, SearchError};
use crate::functions::registry::{OperatorRegistry, OperatorSet};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Prefix for environment overrides, e.g. `SYMSEARCH__POPULATION__MAXSIZE=25`.
pub const ENV_PREFIX: &str = "SYMSEARCH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub population: PopulationConfig,
    pub migration: MigrationConfig,
    pub stopping: StoppingConfig,
    pub runtime: RuntimeConfig,
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        self.population.validate()?;
        self.migration.validate()?;
        self.stopping.validate()?;
        self.runtime.validate()?;
        if self.migration.topn > self.population.population_size {
            return Err(SearchError::Configuration(format!(
                "topn ({}) cannot exceed population_size ({})",
                self.migration.topn, self.population.population_size
            )));
        }
        Ok(())
    }
}

pub struct ConfigManager {
    config: Arc<RwLock<SearchConfig>>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(SearchConfig::default())),
        }
    }

    /// Load a TOML or JSON file, then apply environment overrides.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config: SearchConfig = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        log::info!("Loaded configuration from {}", path.as_ref().display());

        *self.write()? = config;
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = self.get()?;
        let toml_str = toml::to_string_pretty(&config)
            .map_err(|e| SearchError::Configuration(format!("Failed to serialize: {}", e)))?;

        std::fs::write(path, toml_str)
            .map_err(|e| SearchError::Configuration(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn get(&self) -> Result<SearchConfig> {
        self.config
            .read()
            .map(|config| config.clone())
            .map_err(|_| SearchError::Configuration("Configuration lock poisoned".to_string()))
    }

    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut SearchConfig),
    {
        let mut config = self.write()?;
        let mut updated = config.clone();
        f(&mut updated);
        updated.validate()?;
        *config = updated;
        Ok(())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SearchConfig>> {
        self.config
            .write()
            .map_err(|_| SearchError::Configuration("Configuration lock poisoned".to_string()))
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated configuration plus the operators it names. Shared read-only
/// by every cycle of a run.
#[derive(Debug, Clone)]
pub struct Options {
    pub config: SearchConfig,
    pub operators: OperatorSet,
}

impl Options {
    pub fn new(config: SearchConfig) -> Result<Self> {
        Self::with_registry(config, &OperatorRegistry::new())
    }

    pub fn with_registry(config: SearchConfig, registry: &OperatorRegistry) -> Result<Self> {
        config.validate()?;
        let operators = OperatorSet::from_names(
            &config.population.unary_operators,
            &config.population.binary_operators,
            registry,
        )?;
        Ok(Self { config, operators })
    }

    /// Use an already built operator set. The configured operator names
    /// are replaced by the set's aliases.
    pub fn with_operators(mut config: SearchConfig, operators: OperatorSet) -> Result<Self> {
        config.population.unary_operators = operators.unary_names();
        config.population.binary_operators = operators.binary_names();
        config.validate()?;
        Ok(Self { config, operators })
    }

    pub fn population(&self) -> &PopulationConfig {
        &self.config.population
    }

    pub fn migration(&self) -> &MigrationConfig {
        &self.config.migration
    }

    pub fn stopping(&self) -> &StoppingConfig {
        &self.config.stopping
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.config.runtime
    }
}
