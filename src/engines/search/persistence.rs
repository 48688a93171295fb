use crate::config::SearchConfig;
use crate::data::dataset::Dataset;
use crate::engines::generation::{
    evolution_engine::CycleRecord, hall_of_fame::HallOfFame, member::PopMember, population::Population,
};
use crate::engines::search::stopping::StopReason;
use crate::error::{Result, SearchError};
use crate::functions::registry::OperatorSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CSV_HEADER: &str = "Complexity,Loss,Equation";

/// Default archive file name, stamped with the current time.
pub fn default_output_file() -> PathBuf {
    PathBuf::from(format!("hall_of_fame_{}.csv", Utc::now().format("%Y-%m-%d_%H%M%S%.3f")))
}

/// Archive file for output `output` (0-based). Several outputs get a
/// `.out<j>` suffix, 1-based.
pub fn output_path(base: &Path, output: usize, n_outputs: usize) -> PathBuf {
    if n_outputs <= 1 {
        base.to_path_buf()
    } else {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!(".out{}", output + 1));
        PathBuf::from(name)
    }
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bkup");
    PathBuf::from(name)
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

pub fn format_dominating(members: &[PopMember], feature_names: &[String], operators: &OperatorSet) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for member in members {
        out.push_str(&format!(
            "{},{},{}\n",
            member.complexity,
            member.loss,
            quote(&member.tree.render(feature_names, operators))
        ));
    }
    out
}

/// Write the dominating set to `<path>.bkup` and then to `<path>`.
pub fn save_dominating(path: &Path, members: &[PopMember], dataset: &Dataset, operators: &OperatorSet) -> Result<()> {
    let contents = format_dominating(members, dataset.feature_names(), operators);
    for target in [backup_path(path), path.to_path_buf()] {
        fs::write(&target, &contents).map_err(|e| {
            SearchError::Persistence(format!("Failed to write {}: {}", target.display(), e))
        })?;
    }
    Ok(())
}

/// Everything needed to resume a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    /// `populations[output][population]`
    pub populations: Vec<Vec<Population>>,
    pub halls_of_fame: Vec<HallOfFame>,
}

impl SearchState {
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(path.as_ref(), json).map_err(|e| {
            SearchError::Persistence(format!("Failed to write {}: {}", path.as_ref().display(), e))
        })
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref()).map_err(|e| {
            SearchError::Persistence(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Per-cycle history of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config: SearchConfig,
    pub stop_reason: Option<StopReason>,
    pub total_evals: u64,
    pub cycles: Vec<CycleRecord>,
}

impl RunRecord {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            config,
            stop_reason: None,
            total_evals: 0,
            cycles: Vec::new(),
        }
    }

    pub fn finish(&mut self, stop_reason: StopReason, total_evals: u64) {
        self.finished_at = Some(Utc::now());
        self.stop_reason = Some(stop_reason);
        self.total_evals = total_evals;
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json).map_err(|e| {
            SearchError::Persistence(format!("Failed to write {}: {}", path.as_ref().display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_suffix() {
        let base = Path::new("hof.csv");
        assert_eq!(output_path(base, 0, 1), PathBuf::from("hof.csv"));
        assert_eq!(output_path(base, 1, 3), PathBuf::from("hof.csv.out2"));
        assert_eq!(backup_path(base), PathBuf::from("hof.csv.bkup"));
    }

    #[test]
    fn test_quotes_are_doubled() {
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
