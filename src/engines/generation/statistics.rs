use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_SIZE: f64 = 100_000.0;

const SMALLEST_FREQUENCY_ALLOWED: f64 = 1.0;
const MAX_WINDOW_LOOPS: usize = 1000;

/// Windowed histogram of the complexities explored so far. Feeds the
/// adaptive parsimony term of tournament selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningSearchStatistics {
    window_size: f64,
    frequencies: Vec<f64>,
    normalized_frequencies: Vec<f64>,
}

impl RunningSearchStatistics {
    pub fn new(maxsize: usize) -> Self {
        Self::with_window(maxsize, DEFAULT_WINDOW_SIZE)
    }

    pub fn with_window(maxsize: usize, window_size: f64) -> Self {
        let frequencies = vec![1.0; maxsize];
        let normalized_frequencies = vec![1.0 / maxsize as f64; maxsize];
        Self {
            window_size,
            frequencies,
            normalized_frequencies,
        }
    }

    pub fn maxsize(&self) -> usize {
        self.frequencies.len()
    }

    /// Count one member of `complexity`. Sizes outside 1..=maxsize are ignored.
    pub fn update_frequencies(&mut self, complexity: usize) {
        if complexity >= 1 && complexity <= self.frequencies.len() {
            self.frequencies[complexity - 1] += 1.0;
        }
    }

    /// Shrink the histogram back to the window size by subtracting evenly
    /// from every size still above the floor.
    pub fn move_window(&mut self) {
        let total: f64 = self.frequencies.iter().sum();
        if total <= self.window_size {
            return;
        }
        let mut difference = total - self.window_size;
        let mut loops = 0;
        while difference > 0.0 {
            let indices: Vec<usize> = (0..self.frequencies.len())
                .filter(|i| self.frequencies[*i] > SMALLEST_FREQUENCY_ALLOWED)
                .collect();
            if indices.is_empty() {
                break;
            }
            let smallest = indices
                .iter()
                .map(|i| self.frequencies[*i])
                .fold(f64::INFINITY, f64::min);
            let amount = (difference / indices.len() as f64).min(smallest - SMALLEST_FREQUENCY_ALLOWED);
            for i in &indices {
                self.frequencies[*i] -= amount;
            }
            let subtracted = amount * indices.len() as f64;
            difference -= subtracted;
            loops += 1;
            if loops > MAX_WINDOW_LOOPS || subtracted < 1e-6 {
                break;
            }
        }
    }

    pub fn normalize(&mut self) {
        let total: f64 = self.frequencies.iter().sum();
        self.normalized_frequencies = self.frequencies.iter().map(|f| f / total).collect();
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn normalized_frequency(&self, complexity: usize) -> Option<f64> {
        if complexity == 0 {
            return None;
        }
        self.normalized_frequencies.get(complexity - 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_ignores_out_of_range() {
        let mut stats = RunningSearchStatistics::new(5);
        stats.update_frequencies(0);
        stats.update_frequencies(6);
        stats.update_frequencies(2);
        assert_eq!(stats.frequencies(), &[1.0, 2.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_move_window_bounds_total() {
        let mut stats = RunningSearchStatistics::with_window(3, 10.0);
        for _ in 0..20 {
            stats.update_frequencies(1);
        }
        for _ in 0..5 {
            stats.update_frequencies(3);
        }
        stats.move_window();
        let total: f64 = stats.frequencies().iter().sum();
        assert!((total - 10.0).abs() < 1e-6);
        assert!(stats.frequencies().iter().all(|f| *f >= 1.0));
    }

    #[test]
    fn test_normalize_sums_to_one() {
        let mut stats = RunningSearchStatistics::new(4);
        stats.update_frequencies(4);
        stats.normalize();
        let sum: f64 = (1..=4).filter_map(|c| stats.normalized_frequency(c)).sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert_eq!(stats.normalized_frequency(4), Some(0.4));
    }
}
