//! Hop-count heuristic for outbound device messages.

use crate::config::HopConfig;
use std::collections::VecDeque;

/// Rolling window of hops observed on messages from one device.
#[derive(Debug, Clone)]
pub struct HopTracker {
    window: usize,
    default_hops: u8,
    observed: VecDeque<u8>,
}

impl HopTracker {
    pub fn new(config: &HopConfig) -> Self {
        Self {
            window: config.window.max(1),
            default_hops: config.default_hops,
            observed: VecDeque::new(),
        }
    }

    pub fn record(&mut self, hops_used: u8) {
        self.observed.push_back(hops_used);
        while self.observed.len() > self.window {
            self.observed.pop_front();
        }
    }

    /// Ceiling of the observed mean, or the default with no history.
    pub fn smart_hops(&self) -> u8 {
        if self.observed.is_empty() {
            return self.default_hops;
        }
        let sum: usize = self.observed.iter().map(|h| *h as usize).sum();
        let count = self.observed.len();
        sum.div_ceil(count) as u8
    }

    pub fn history(&self) -> impl Iterator<Item = u8> + '_ {
        self.observed.iter().copied()
    }
}
