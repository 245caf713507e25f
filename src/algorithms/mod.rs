//! Rate limiting algorithms module
//!
//! Each algorithm is pure decision logic over the state of a single key:
//! it receives the state read from the store (or nothing, on first sight of
//! a key), returns a verdict together with the state to write back, and
//! knows how to undo one admission and when its state has gone stale.

pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

use crate::error::ThrottlerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use fixed_window::{FixedWindow, FixedWindowState};
pub use sliding_window::{SlidingWindow, SlidingWindowEntry, SlidingWindowState};
pub use token_bucket::{TokenBucket, TokenBucketState};

/// Available throttling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    SlidingWindow,
    TokenBucket,
    FixedWindow,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::SlidingWindow,
        Algorithm::TokenBucket,
        Algorithm::FixedWindow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::FixedWindow => "fixed_window",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ThrottlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "fixed_window" => Ok(Algorithm::FixedWindow),
            _ => Err(ThrottlerError::Configuration(format!(
                "Unknown algorithm '{}'. Must be one of: sliding_window, token_bucket, fixed_window",
                s
            ))),
        }
    }
}

/// Stored state of one key, tagged with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyState {
    SlidingWindow(SlidingWindowState),
    TokenBucket(TokenBucketState),
    FixedWindow(FixedWindowState),
}

impl KeyState {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            KeyState::SlidingWindow(_) => Algorithm::SlidingWindow,
            KeyState::TokenBucket(_) => Algorithm::TokenBucket,
            KeyState::FixedWindow(_) => Algorithm::FixedWindow,
        }
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix time in milliseconds at which the quota next frees up.
    pub reset_time: u64,
    /// Seconds to wait before retrying; only set on rejection.
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    pub fn allowed(limit: u64, remaining: u64, reset_time: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_time,
            retry_after: None,
        }
    }

    pub fn rejected(limit: u64, remaining: u64, reset_time: u64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining,
            reset_time,
            retry_after: Some(retry_after),
        }
    }

    /// Reset time rounded up to whole unix seconds, as sent in `X-RateLimit-Reset`.
    pub fn reset_time_secs(&self) -> u64 {
        self.reset_time.div_ceil(1000)
    }
}

/// Whole seconds from `now` until `until`, rounded up and never below one.
pub(crate) fn retry_after_secs(until: u64, now: u64) -> u64 {
    until.saturating_sub(now).div_ceil(1000).max(1)
}

/// Trait for rate limiting algorithms
pub trait ThrottleAlgorithm: Send + Sync + fmt::Debug {
    fn kind(&self) -> Algorithm;

    /// Evaluates one request against `state` at `now` (unix ms) and returns
    /// the verdict plus the state to persist.
    fn check(&self, state: Option<KeyState>, now: u64) -> (RateLimitResult, KeyState);

    /// Reverses one earlier admission recorded in `state`.
    fn refund(&self, state: KeyState, now: u64) -> KeyState;

    /// Whether the background sweep may drop this state.
    fn is_expired(&self, state: &KeyState, now: u64) -> bool;
}

/// Builds the algorithm implementation for a validated configuration.
pub fn build(algorithm: Algorithm, window_ms: u64, max_requests: u64) -> Box<dyn ThrottleAlgorithm> {
    match algorithm {
        Algorithm::SlidingWindow => Box::new(SlidingWindow::new(window_ms, max_requests)),
        Algorithm::TokenBucket => Box::new(TokenBucket::new(window_ms, max_requests)),
        Algorithm::FixedWindow => Box::new(FixedWindow::new(window_ms, max_requests)),
    }
}
