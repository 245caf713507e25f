//! Fixed window counter.
//!
//! The counter hard-resets once `now` passes the window end, so a burst
//! straddling the boundary can see up to `2 * max_requests` admissions in a
//! short span. Use the sliding window when that matters.

use super::{retry_after_secs, Algorithm, KeyState, RateLimitResult, ThrottleAlgorithm};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowState {
    pub count: u64,
    pub reset_time: u64,
}

#[derive(Debug, Clone)]
pub struct FixedWindow {
    window_ms: u64,
    max_requests: u64,
}

impl FixedWindow {
    pub fn new(window_ms: u64, max_requests: u64) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    fn take_state(&self, state: Option<KeyState>, now: u64) -> FixedWindowState {
        let fresh = FixedWindowState {
            count: 0,
            reset_time: now.saturating_add(self.window_ms),
        };
        match state {
            Some(KeyState::FixedWindow(state)) => state,
            Some(other) => {
                warn!(
                    found = %other.algorithm(),
                    expected = %Algorithm::FixedWindow,
                    "Discarding state written by a different algorithm"
                );
                fresh
            }
            None => fresh,
        }
    }
}

impl ThrottleAlgorithm for FixedWindow {
    fn kind(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    fn check(&self, state: Option<KeyState>, now: u64) -> (RateLimitResult, KeyState) {
        let mut window = self.take_state(state, now);

        if now > window.reset_time {
            window.count = 0;
            window.reset_time = now.saturating_add(self.window_ms);
        }

        let allowed = window.count < self.max_requests;
        if allowed {
            window.count += 1;
        }
        let remaining = self.max_requests.saturating_sub(window.count);

        let result = if allowed {
            RateLimitResult::allowed(self.max_requests, remaining, window.reset_time)
        } else {
            RateLimitResult::rejected(
                self.max_requests,
                remaining,
                window.reset_time,
                retry_after_secs(window.reset_time, now),
            )
        };

        (result, KeyState::FixedWindow(window))
    }

    fn refund(&self, state: KeyState, now: u64) -> KeyState {
        let mut window = self.take_state(Some(state), now);
        window.count = window.count.saturating_sub(1);
        KeyState::FixedWindow(window)
    }

    fn is_expired(&self, state: &KeyState, now: u64) -> bool {
        match state {
            KeyState::FixedWindow(window) => now > window.reset_time,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(limiter: &FixedWindow, state: &mut Option<KeyState>, now: u64) -> RateLimitResult {
        let (result, next) = limiter.check(state.take(), now);
        *state = Some(next);
        result
    }

    #[test]
    fn test_third_request_rejected() {
        let limiter = FixedWindow::new(1_000, 2);
        let mut state = None;

        let results: Vec<_> = [0, 100, 200].iter().map(|now| run(&limiter, &mut state, *now)).collect();
        let allowed: Vec<bool> = results.iter().map(|r| r.allowed).collect();
        assert_eq!(allowed, vec![true, true, false]);

        let third = &results[2];
        assert_eq!(third.remaining, 0);
        assert_eq!(third.reset_time, 1_000);
        assert_eq!(third.retry_after, Some(1));
    }

    #[test]
    fn test_window_resets_after_reset_time() {
        let limiter = FixedWindow::new(1_000, 1);
        let mut state = None;

        assert!(run(&limiter, &mut state, 0).allowed);
        assert!(!run(&limiter, &mut state, 1_000).allowed);

        let next = run(&limiter, &mut state, 1_001);
        assert!(next.allowed);
        assert_eq!(next.reset_time, 2_001);
    }

    #[test]
    fn test_boundary_burst_is_bounded_by_twice_the_limit() {
        let limiter = FixedWindow::new(1_000, 3);
        let mut state = None;

        // Opens the window at t=0, ending at t=1000.
        assert!(run(&limiter, &mut state, 0).allowed);
        let late: usize = (0..5).filter(|_| run(&limiter, &mut state, 990).allowed).count();
        let early: usize = (0..5).filter(|_| run(&limiter, &mut state, 1_010).allowed).count();

        assert_eq!(late, 2);
        assert_eq!(early, 3);
        assert!(late + early <= 2 * 3);
    }

    #[test]
    fn test_refund_decrements() {
        let limiter = FixedWindow::new(1_000, 1);
        let mut state = None;
        assert!(run(&limiter, &mut state, 0).allowed);
        state = state.map(|s| limiter.refund(s, 0));
        assert!(run(&limiter, &mut state, 0).allowed);
    }

    #[test]
    fn test_huge_window_saturates() {
        let limiter = FixedWindow::new(u64::MAX, 1);
        let mut state = None;
        let first = run(&limiter, &mut state, 1_000);
        assert!(first.allowed);
        assert_eq!(first.reset_time, u64::MAX);
        assert!(!run(&limiter, &mut state, 2_000).allowed);
    }

    #[test]
    fn test_is_expired() {
        let limiter = FixedWindow::new(1_000, 1);
        let (_, state) = limiter.check(None, 0);
        assert!(!limiter.is_expired(&state, 1_000));
        assert!(limiter.is_expired(&state, 1_001));
    }
}
