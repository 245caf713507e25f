//! Sliding window rate limiting algorithm
//!
//! Keeps a log of admitted requests per key and counts the ones still inside
//! the trailing window. Strict: no `window_ms`-long interval ever admits more
//! than `max_requests`.

use super::{retry_after_secs, Algorithm, KeyState, RateLimitResult, ThrottleAlgorithm};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// Above this many entries expiry switches from popping one by one to a binary search.
pub const BINARY_SEARCH_THRESHOLD: usize = 100;

/// Requests admitted at the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowEntry {
    pub timestamp: u64,
    pub count: u32,
}

/// Entries ordered by non-decreasing timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowState {
    pub entries: VecDeque<SlidingWindowEntry>,
}

impl SlidingWindowState {
    fn evict_expired(&mut self, now: u64, window_ms: u64) {
        let expired = |entry: &SlidingWindowEntry| entry.timestamp.saturating_add(window_ms) <= now;

        if self.entries.len() > BINARY_SEARCH_THRESHOLD {
            let cut = self.entries.partition_point(expired);
            self.entries.drain(..cut);
        } else {
            while self.entries.front().map_or(false, expired) {
                self.entries.pop_front();
            }
        }
    }

    /// Number of requests recorded.
    pub fn count(&self) -> u64 {
        self.entries.iter().map(|entry| u64::from(entry.count)).sum()
    }

    fn record(&mut self, now: u64) {
        if let Some(last) = self.entries.back_mut() {
            // A clock that steps backwards folds into the newest entry so the
            // sequence stays sorted.
            if last.timestamp >= now {
                last.count += 1;
                return;
            }
        }
        self.entries.push_back(SlidingWindowEntry {
            timestamp: now,
            count: 1,
        });
    }

    fn remove_newest(&mut self) {
        if let Some(last) = self.entries.back_mut() {
            last.count = last.count.saturating_sub(1);
            if last.count == 0 {
                self.entries.pop_back();
            }
        }
    }
}

/// Sliding window rate limiter implementation
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window_ms: u64,
    max_requests: u64,
}

impl SlidingWindow {
    pub fn new(window_ms: u64, max_requests: u64) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    fn take_state(&self, state: Option<KeyState>) -> SlidingWindowState {
        match state {
            Some(KeyState::SlidingWindow(state)) => state,
            Some(other) => {
                warn!(
                    found = %other.algorithm(),
                    expected = %Algorithm::SlidingWindow,
                    "Discarding state written by a different algorithm"
                );
                SlidingWindowState::default()
            }
            None => SlidingWindowState::default(),
        }
    }
}

impl ThrottleAlgorithm for SlidingWindow {
    fn kind(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }

    fn check(&self, state: Option<KeyState>, now: u64) -> (RateLimitResult, KeyState) {
        let mut state = self.take_state(state);
        state.evict_expired(now, self.window_ms);

        let current = state.count();
        let allowed = current < self.max_requests;
        if allowed {
            state.record(now);
        }

        // Counted before this request was recorded.
        let remaining = self.max_requests.saturating_sub(current);
        let reset_time = state
            .entries
            .front()
            .map_or(now, |oldest| oldest.timestamp)
            .saturating_add(self.window_ms);

        let result = if allowed {
            RateLimitResult::allowed(self.max_requests, remaining, reset_time)
        } else {
            RateLimitResult::rejected(
                self.max_requests,
                remaining,
                reset_time,
                retry_after_secs(reset_time, now),
            )
        };

        (result, KeyState::SlidingWindow(state))
    }

    fn refund(&self, state: KeyState, _now: u64) -> KeyState {
        let mut state = self.take_state(Some(state));
        state.remove_newest();
        KeyState::SlidingWindow(state)
    }

    fn is_expired(&self, state: &KeyState, now: u64) -> bool {
        match state {
            KeyState::SlidingWindow(state) => state
                .entries
                .back()
                .map_or(true, |newest| newest.timestamp.saturating_add(self.window_ms) <= now),
            _ => true,
        }
    }
}
