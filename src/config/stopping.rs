use super::traits::ConfigSection;
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};

/// Soft stopping conditions. Any one of them ends the run successfully.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppingConfig {
    /// Stop once every output has a dominating member with a lower loss.
    pub early_stop_condition: Option<f64>,
    pub timeout_in_seconds: Option<f64>,
    /// Stop once the cumulative evaluation count exceeds this.
    pub max_evals: Option<u64>,
    /// Watch stdin for `q` and stop when it is entered.
    pub listen_for_quit: bool,
}

impl ConfigSection for StoppingConfig {
    fn section_name() -> &'static str {
        "stopping"
    }

    fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.timeout_in_seconds {
            if !(timeout > 0.0) {
                return Err(SearchError::Configuration(format!(
                    "timeout_in_seconds must be positive, got {}",
                    timeout
                )));
            }
        }
        if let Some(threshold) = self.early_stop_condition {
            if threshold.is_nan() {
                return Err(SearchError::Configuration("early_stop_condition is NaN".to_string()));
            }
        }
        Ok(())
    }
}
