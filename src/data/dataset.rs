use crate::data::units::Unit;
use crate::engines::evaluation::loss::{compute_loss, LossKind};
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};

/// Immutable training data for one output.
///
/// Features are stored column-major so that vectorised tree evaluation can
/// borrow a whole feature at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    features: Vec<Vec<f64>>,
    targets: Vec<f64>,
    weights: Option<Vec<f64>>,
    feature_names: Vec<String>,
    feature_units: Option<Vec<Unit>>,
    target_units: Option<Unit>,
    loss: LossKind,
    baseline_loss: f64,
}

impl Dataset {
    /// Build from per-feature columns.
    pub fn from_columns(features: Vec<Vec<f64>>, targets: Vec<f64>) -> Result<Self> {
        if features.is_empty() {
            return Err(SearchError::Dataset("Dataset needs at least one feature".to_string()));
        }
        if targets.is_empty() {
            return Err(SearchError::Dataset("Dataset needs at least one row".to_string()));
        }
        for (i, column) in features.iter().enumerate() {
            if column.len() != targets.len() {
                return Err(SearchError::Dataset(format!(
                    "Feature {} has {} rows, expected {}",
                    i,
                    column.len(),
                    targets.len()
                )));
            }
            if column.iter().any(|v| !v.is_finite()) {
                return Err(SearchError::Dataset(format!("Feature {} contains non-finite values", i)));
            }
        }
        if targets.iter().any(|v| !v.is_finite()) {
            return Err(SearchError::Dataset("Targets contain non-finite values".to_string()));
        }

        let feature_names = (0..features.len()).map(|i| format!("x{}", i + 1)).collect();
        let mut dataset = Self {
            features,
            targets,
            weights: None,
            feature_names,
            feature_units: None,
            target_units: None,
            loss: LossKind::default(),
            baseline_loss: 0.0,
        };
        dataset.update_baseline();
        Ok(dataset)
    }

    /// Build from row-major samples.
    pub fn from_rows(rows: &[Vec<f64>], targets: Vec<f64>) -> Result<Self> {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != n_features) {
            return Err(SearchError::Dataset("Rows have inconsistent lengths".to_string()));
        }
        let columns = (0..n_features)
            .map(|j| rows.iter().map(|r| r[j]).collect())
            .collect();
        Self::from_columns(columns, targets)
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != self.targets.len() {
            return Err(SearchError::Dataset(format!(
                "Got {} weights for {} rows",
                weights.len(),
                self.targets.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SearchError::Dataset("Weights must be finite and non-negative".to_string()));
        }
        self.weights = Some(weights);
        self.update_baseline();
        Ok(self)
    }

    pub fn with_feature_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.features.len() {
            return Err(SearchError::Dataset(format!(
                "Got {} feature names for {} features",
                names.len(),
                self.features.len()
            )));
        }
        self.feature_names = names;
        Ok(self)
    }

    /// Attach units. `feature_units` must have one entry per feature.
    pub fn with_units(mut self, feature_units: Option<Vec<Unit>>, target_units: Option<Unit>) -> Result<Self> {
        if let Some(units) = &feature_units {
            if units.len() != self.features.len() {
                return Err(SearchError::Dataset(format!(
                    "Got {} feature units for {} features",
                    units.len(),
                    self.features.len()
                )));
            }
        }
        self.feature_units = feature_units;
        self.target_units = target_units;
        Ok(self)
    }

    pub fn with_loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self.update_baseline();
        self
    }

    fn update_baseline(&mut self) {
        let mean = match &self.weights {
            Some(w) => {
                let total: f64 = w.iter().sum();
                if total > 0.0 {
                    self.targets.iter().zip(w).map(|(y, w)| y * w).sum::<f64>() / total
                } else {
                    0.0
                }
            }
            None => self.targets.iter().sum::<f64>() / self.targets.len() as f64,
        };
        let prediction = vec![mean; self.targets.len()];
        self.baseline_loss = compute_loss(&prediction, &self.targets, self.weights.as_deref(), self.loss);
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    pub fn n_rows(&self) -> usize {
        self.targets.len()
    }

    pub fn feature(&self, index: usize) -> &[f64] {
        &self.features[index]
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn weights(&self) -> Option<&[f64]> {
        self.weights.as_deref()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_units(&self) -> Option<&[Unit]> {
        self.feature_units.as_deref()
    }

    pub fn target_units(&self) -> Option<&Unit> {
        self.target_units.as_ref()
    }

    pub fn has_units(&self) -> bool {
        self.feature_units.is_some() || self.target_units.is_some()
    }

    pub fn loss(&self) -> LossKind {
        self.loss
    }

    pub fn baseline_loss(&self) -> f64 {
        self.baseline_loss
    }

    /// One sample, row-major.
    pub fn row(&self, index: usize) -> Vec<f64> {
        self.features.iter().map(|column| column[index]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_transposes() {
        let ds = Dataset::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]], vec![0.0, 1.0]).unwrap();
        assert_eq!(ds.n_features(), 2);
        assert_eq!(ds.feature(0), &[1.0, 3.0]);
        assert_eq!(ds.row(1), vec![3.0, 4.0]);
        assert_eq!(ds.feature_names(), &["x1".to_string(), "x2".to_string()]);
    }

    #[test]
    fn test_baseline_is_variance_for_l2() {
        let ds = Dataset::from_columns(vec![vec![0.0, 0.0]], vec![1.0, 3.0]).unwrap();
        assert!((ds.baseline_loss() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_mismatched_units() {
        let ds = Dataset::from_columns(vec![vec![0.0], vec![1.0]], vec![1.0]).unwrap();
        let result = ds.with_units(Some(vec![Unit::dimensionless()]), None);
        assert!(matches!(result, Err(SearchError::Dataset(_))));
    }

    #[test]
    fn test_rejects_non_finite() {
        let result = Dataset::from_columns(vec![vec![f64::NAN]], vec![1.0]);
        assert!(result.is_err());
    }
}
