//! RR interval history
//!
//! Sliding window of the most recent beat-to-beat intervals for one session.
//! Order is preserved because RMSSD depends on adjacent pairs.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::DEFAULT_RR_HISTORY_LEN;

/// Bounded, ordered window of RR intervals (ms)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrHistory {
    intervals: VecDeque<f64>,
    capacity: usize,
}

impl Default for RrHistory {
    fn default() -> Self {
        Self::new(DEFAULT_RR_HISTORY_LEN)
    }
}

impl RrHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            intervals: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append intervals, discarding the oldest beyond capacity
    pub fn extend(&mut self, rr_intervals: &[f64]) {
        self.intervals.extend(rr_intervals.iter().copied());
        while self.intervals.len() > self.capacity {
            self.intervals.pop_front();
        }
    }

    /// The window as it would look after appending `pending`, without mutating
    pub fn preview(&self, pending: &[f64]) -> Vec<f64> {
        let mut next = self.clone();
        next.extend(pending);
        next.to_vec()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.intervals.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
