use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::models::{LatencySample, ProviderStats};

pub const HISTORY_LIMIT: usize = 100;

impl ProviderStats {
    pub fn new() -> Self {
        Self {
            current: None,
            min: f64::INFINITY,
            max: 0.0,
            avg: 0.0,
            total: 0.0,
            count: 0,
            successes: 0,
            failures: 0,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    /// Folds one probe outcome into the running statistics.
    ///
    /// A success without a latency value is counted as a failure so that
    /// `current` and `history` never disagree with the counters.
    pub fn apply_result(&mut self, latency: Option<f64>, success: bool) {
        self.apply_result_at(latency, success, Utc::now());
    }

    pub fn apply_result_at(&mut self, latency: Option<f64>, success: bool, at: DateTime<Utc>) {
        self.count += 1;

        match latency.filter(|ms| success && ms.is_finite() && *ms >= 0.0) {
            Some(ms) => {
                self.successes += 1;
                self.current = Some(ms);
                self.min = self.min.min(ms);
                self.max = self.max.max(ms);
                self.total += ms;
                self.avg = (self.total / self.successes as f64).round();

                if self.history.len() == HISTORY_LIMIT {
                    self.history.pop_front();
                }
                self.history.push_back(LatencySample { timestamp: at, latency: ms });
            }
            None => {
                self.failures += 1;
                self.current = None;
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.successes as f64 / self.count as f64 * 100.0)
    }
}
