use std::collections::VecDeque;

use mirror_ports::Reservoir;
use parking_lot::Mutex;

/// Keeps the most recent `capacity` samples
pub struct SlidingReservoir {
    capacity: usize,
    samples: Mutex<VecDeque<f64>>,
}

impl SlidingReservoir {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SlidingReservoir {
            capacity,
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }
}

impl Reservoir for SlidingReservoir {
    fn push(&self, value: f64) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    fn average(&self) -> Option<f64> {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Nearest-rank percentile
    fn percentile(&self, percentile: f64) -> Option<f64> {
        let mut sorted: Vec<f64> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        let rank = (percentile.clamp(0.0, 100.0) / 100.0 * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }
}
