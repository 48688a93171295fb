use serde::{Deserialize, Serialize};

/// Elementwise loss, averaged (weighted if weights are given).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    L2,
    L1,
}

impl LossKind {
    fn elementwise(&self, prediction: f64, target: f64) -> f64 {
        match self {
            LossKind::L2 => (prediction - target).powi(2),
            LossKind::L1 => (prediction - target).abs(),
        }
    }
}

pub fn compute_loss(prediction: &[f64], targets: &[f64], weights: Option<&[f64]>, kind: LossKind) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let loss = match weights {
        Some(w) => {
            let total: f64 = w.iter().sum();
            if total <= 0.0 {
                return 0.0;
            }
            prediction
                .iter()
                .zip(targets)
                .zip(w)
                .filter(|(_, w)| **w != 0.0)
                .map(|((p, y), w)| w * kind.elementwise(*p, *y))
                .sum::<f64>()
                / total
        }
        None => {
            prediction
                .iter()
                .zip(targets)
                .map(|(p, y)| kind.elementwise(*p, *y))
                .sum::<f64>()
                / targets.len() as f64
        }
    };
    // A NaN loss would never compare worse than anything.
    if loss.is_nan() {
        f64::INFINITY
    } else {
        loss
    }
}

/// Combine loss and complexity into the score the search minimises.
pub fn loss_to_score(loss: f64, baseline: f64, complexity: usize, parsimony: f64) -> f64 {
    let normalized = if baseline > 0.0 { loss / baseline } else { loss };
    normalized + parsimony * complexity as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_l1() {
        let loss = compute_loss(&[1.0, 2.0], &[0.0, 0.0], Some(&[3.0, 1.0]), LossKind::L1);
        assert!((loss - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weight_row_ignores_overflow() {
        let loss = compute_loss(&[1.0, f64::MAX], &[0.0, -f64::MAX], Some(&[1.0, 0.0]), LossKind::L2);
        assert_eq!(loss, 1.0);
    }

    #[test]
    fn test_nan_loss_becomes_infinite() {
        let loss = compute_loss(&[f64::INFINITY, 0.0], &[f64::INFINITY, 0.0], None, LossKind::L1);
        assert_eq!(loss, f64::INFINITY);
    }

    #[test]
    fn test_score_normalises_by_baseline() {
        assert!((loss_to_score(2.0, 4.0, 3, 0.1) - 0.8).abs() < 1e-12);
        assert!((loss_to_score(2.0, 0.0, 0, 0.1) - 2.0).abs() < 1e-12);
    }
}
