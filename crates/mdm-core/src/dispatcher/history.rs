//! Bounded, time-windowed log of job outcomes used by the circuit breaker.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DispatchHistory {
    entries: VecDeque<(Instant, bool)>,
    capacity: usize,
    window: Duration,
}

impl DispatchHistory {
    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            window,
        }
    }

    pub fn record(&mut self, success: bool) {
        self.record_at(Instant::now(), success);
    }

    /// Append an outcome; the oldest entry is evicted once capacity is reached.
    pub fn record_at(&mut self, at: Instant, success: bool) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((at, success));
    }

    /// (samples, failure ratio) over entries recorded within the window ending at `now`.
    pub fn failure_rate_at(&self, now: Instant) -> (usize, f64) {
        let mut samples = 0usize;
        let mut failures = 0usize;
        for (at, success) in &self.entries {
            if now.saturating_duration_since(*at) <= self.window {
                samples += 1;
                if !success {
                    failures += 1;
                }
            }
        }
        let ratio = if samples == 0 {
            0.0
        } else {
            failures as f64 / samples as f64
        };
        (samples, ratio)
    }

    /// True when at least `min_samples` recent outcomes exist and their failure ratio exceeds `threshold`.
    pub fn is_tripped_at(&self, now: Instant, min_samples: usize, threshold: f64) -> bool {
        let (samples, ratio) = self.failure_rate_at(now);
        samples >= min_samples && ratio > threshold
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_oldest() {
        let mut h = DispatchHistory::new(3, Duration::from_secs(300));
        let now = Instant::now();
        h.record_at(now, false);
        h.record_at(now, true);
        h.record_at(now, true);
        h.record_at(now, true);
        assert_eq!(h.len(), 3);
        assert_eq!(h.failure_rate_at(now), (3, 0.0));
    }

    #[test]
    fn old_entries_age_out_of_window() {
        let mut h = DispatchHistory::new(50, Duration::from_secs(300));
        let start = Instant::now();
        for _ in 0..5 {
            h.record_at(start, false);
        }
        assert!(h.is_tripped_at(start, 5, 0.3));
        let later = start + Duration::from_secs(301);
        assert_eq!(h.failure_rate_at(later).0, 0);
        assert!(!h.is_tripped_at(later, 5, 0.3));
    }

    #[test]
    fn too_few_samples_never_trip() {
        let mut h = DispatchHistory::new(50, Duration::from_secs(300));
        let now = Instant::now();
        for _ in 0..4 {
            h.record_at(now, false);
        }
        assert!(!h.is_tripped_at(now, 5, 0.3));
    }

    #[test]
    fn ratio_must_exceed_threshold() {
        let mut h = DispatchHistory::new(50, Duration::from_secs(300));
        let now = Instant::now();
        // 3 of 10 failed = exactly 0.3
        for i in 0..10 {
            h.record_at(now, i >= 3);
        }
        assert!(!h.is_tripped_at(now, 5, 0.3));
        h.record_at(now, false);
        assert!(h.is_tripped_at(now, 5, 0.3));
    }
}
