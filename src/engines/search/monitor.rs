use std::collections::VecDeque;
use std::time::Instant;

/// Tracks how much of the controller's time is spent handling results,
/// over the most recent intervals.
#[derive(Debug)]
pub struct ResourceMonitor {
    capacity: usize,
    work_intervals: VecDeque<f64>,
    rest_intervals: VecDeque<f64>,
    work_started: Option<Instant>,
    rest_started: Instant,
}

impl ResourceMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            work_intervals: VecDeque::new(),
            rest_intervals: VecDeque::new(),
            work_started: None,
            rest_started: Instant::now(),
        }
    }

    fn push(buffer: &mut VecDeque<f64>, capacity: usize, value: f64) {
        if buffer.len() == capacity {
            buffer.pop_front();
        }
        buffer.push_back(value);
    }

    pub fn start_work(&mut self) {
        let now = Instant::now();
        let rest = now.duration_since(self.rest_started).as_secs_f64();
        Self::push(&mut self.rest_intervals, self.capacity, rest);
        self.work_started = Some(now);
    }

    pub fn stop_work(&mut self) {
        let now = Instant::now();
        if let Some(start) = self.work_started.take() {
            let work = now.duration_since(start).as_secs_f64();
            Self::push(&mut self.work_intervals, self.capacity, work);
        }
        self.rest_started = now;
    }

    /// Fraction of recorded time spent working, in `[0, 1]`.
    pub fn work_fraction(&self) -> f64 {
        let work: f64 = self.work_intervals.iter().sum();
        let rest: f64 = self.rest_intervals.iter().sum();
        if work + rest <= 0.0 {
            0.0
        } else {
            work / (work + rest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_fraction_in_unit_interval() {
        let mut monitor = ResourceMonitor::new(3);
        assert_eq!(monitor.work_fraction(), 0.0);
        for _ in 0..5 {
            monitor.start_work();
            sleep(Duration::from_millis(2));
            monitor.stop_work();
        }
        let fraction = monitor.work_fraction();
        assert!(fraction > 0.0 && fraction <= 1.0);
        assert_eq!(monitor.work_intervals.len(), 3);
    }
}
