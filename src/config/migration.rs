use super::traits::ConfigSection;
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Migrate between populations of the same output.
    pub migration: bool,
    /// Also migrate from the dominating set of the archive.
    pub hof_migration: bool,
    pub fraction_replaced: f64,
    pub fraction_replaced_hof: f64,
    /// Size of each population's contribution to the migrant pool.
    pub topn: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migration: true,
            hof_migration: true,
            fraction_replaced: 0.03,
            fraction_replaced_hof: 0.035,
            topn: 12,
        }
    }
}

impl ConfigSection for MigrationConfig {
    fn section_name() -> &'static str {
        "migration"
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("fraction_replaced", self.fraction_replaced),
            ("fraction_replaced_hof", self.fraction_replaced_hof),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SearchError::Configuration(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.topn == 0 {
            return Err(SearchError::Configuration("topn must be at least 1".to_string()));
        }
        Ok(())
    }
}
