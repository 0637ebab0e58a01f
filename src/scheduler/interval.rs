//! Minimum spacing between polls of the same swap in the same status

use crate::swap::SwapStatus;

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct IntervalThrottle {
    min_interval: Duration,
    last_run: DashMap<(String, SwapStatus), Instant>,
}

impl IntervalThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_run: DashMap::new(),
        }
    }

    /// Returns true and records the attempt if the swap may be polled now
    pub fn ready(&self, swap_id: &str, status: SwapStatus) -> bool {
        let now = Instant::now();
        let key = (swap_id.to_string(), status);

        if let Some(last) = self.last_run.get(&key) {
            if now.duration_since(*last) < self.min_interval {
                return false;
            }
        }

        self.last_run.insert(key, now);
        true
    }

    /// Drop bookkeeping for a swap that left its polling statuses
    pub fn forget(&self, swap_id: &str) {
        self.last_run.retain(|(id, _), _| id != swap_id);
    }

    pub fn tracked(&self) -> usize {
        self.last_run.len()
    }
}
