//! Sliding window of admissible segment ids.
//!
//! Segment ids start at 1. The window always contains the current id, stays
//! within `backward + 1 + forward` entries, and holds strictly increasing
//! ids with no gaps.

use std::collections::VecDeque;

use serde::Serialize;

use crate::metrics::NetworkMetrics;
use crate::sizing::WindowSizingPolicy;

/// Point-in-time copy of a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub current: u64,
    pub backward_limit: usize,
    pub forward_limit: usize,
    pub chunks: Vec<u64>,
}

/// The sliding window of one session.
#[derive(Debug, Clone)]
pub struct SegmentBuffer {
    policy: WindowSizingPolicy,
    backward_limit: usize,
    forward_limit: usize,
    current: u64,
    window: VecDeque<u64>,
}

impl SegmentBuffer {
    /// Start at segment 1 with `1 + forward` ids admitted.
    ///
    /// ```
    /// use previewly_stream::{NetworkMetrics, SegmentBuffer, WindowSizingPolicy};
    ///
    /// let policy = WindowSizingPolicy::fixed(2, 10);
    /// let mut buf = SegmentBuffer::initialize(policy, 2, &NetworkMetrics::default());
    /// assert_eq!(buf.active_chunks(), vec![1, 2, 3]);
    /// buf.slide_forward(&NetworkMetrics::default());
    /// assert_eq!(buf.active_chunks(), vec![1, 2, 3, 4]);
    /// ```
    pub fn initialize(
        policy: WindowSizingPolicy,
        backward_limit: usize,
        metrics: &NetworkMetrics,
    ) -> Self {
        let forward_limit = policy.evaluate(metrics).max(1);
        let window = (1..=1 + forward_limit as u64).collect();
        Self {
            policy,
            backward_limit,
            forward_limit,
            current: 1,
            window,
        }
    }

    /// Advance the playhead by one segment, re-evaluating the forward limit.
    pub fn slide_forward(&mut self, metrics: &NetworkMetrics) {
        let forward_limit = self.policy.evaluate(metrics);
        self.advance(forward_limit);
    }

    fn advance(&mut self, forward_limit: usize) {
        self.forward_limit = forward_limit.max(1);
        self.current += 1;

        let target = self.current + self.forward_limit as u64;
        let mut next = self.window.back().map_or(self.current, |back| back + 1);
        while next <= target {
            self.window.push_back(next);
            next += 1;
        }

        let bound = self.bound();
        while self.window.len() > bound {
            // Drop history first; once the current id is at the front, a
            // shrunken forward limit trims the look-ahead instead.
            if self.window.front().is_some_and(|&front| front < self.current) {
                self.window.pop_front();
            } else {
                self.window.pop_back();
            }
        }
    }

    /// Maximum window length under the current forward limit.
    pub fn bound(&self) -> usize {
        self.backward_limit + 1 + self.forward_limit
    }

    /// Owned copy of the admissible ids, oldest first.
    pub fn active_chunks(&self) -> Vec<u64> {
        self.window.iter().copied().collect()
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn forward_limit(&self) -> usize {
        self.forward_limit
    }

    pub fn backward_limit(&self) -> usize {
        self.backward_limit
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            current: self.current,
            backward_limit: self.backward_limit,
            forward_limit: self.forward_limit,
            chunks: self.active_chunks(),
        }
    }
}
