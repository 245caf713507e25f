//! Token bucket rate limiting algorithm
//!
//! Each key holds up to `max_requests` tokens refilled continuously at
//! `max_requests` per window. Bursts up to the bucket size are admitted.

use super::{Algorithm, KeyState, RateLimitResult, ThrottleAlgorithm};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub refill_rate: f64, // tokens per second
    pub max_tokens: f64,
    pub last_refill: u64,
}

impl TokenBucketState {
    pub fn new(max_tokens: f64, refill_rate: f64, now: u64) -> Self {
        Self {
            tokens: max_tokens,
            refill_rate,
            max_tokens,
            last_refill: now,
        }
    }

    pub fn refill(&mut self, now: u64) {
        if now > self.last_refill {
            let elapsed_secs = (now - self.last_refill) as f64 / 1000.0;
            self.tokens = (self.tokens + elapsed_secs * self.refill_rate).min(self.max_tokens);
            self.last_refill = now;
        }
    }

    pub fn consume(&mut self, tokens: f64) -> bool {
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&self) -> u64 {
        self.tokens.floor() as u64
    }

    /// Milliseconds until `required` tokens are available, `None` if they already are.
    pub fn time_until_available(&self, required: f64) -> Option<u64> {
        if self.tokens >= required {
            return None;
        }
        let seconds_to_wait = (required - self.tokens) / self.refill_rate;
        Some((seconds_to_wait * 1000.0).ceil() as u64)
    }

    /// Pulls tokens back into `[0, max_tokens]` and repairs a broken rate.
    fn enforce_invariants(&mut self, default_rate: f64, default_max: f64) {
        if !(self.refill_rate.is_finite() && self.refill_rate > 0.0)
            || !(self.max_tokens.is_finite() && self.max_tokens > 0.0)
        {
            error!(
                refill_rate = self.refill_rate,
                max_tokens = self.max_tokens,
                "Token bucket parameters out of range, resetting to configured values"
            );
            self.refill_rate = default_rate;
            self.max_tokens = default_max;
        }

        if self.tokens.is_nan() || self.tokens < 0.0 || self.tokens > self.max_tokens {
            error!(
                tokens = self.tokens,
                max_tokens = self.max_tokens,
                "Token count out of range, clamping"
            );
            self.tokens = if self.tokens.is_nan() {
                0.0
            } else {
                self.tokens.clamp(0.0, self.max_tokens)
            };
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    max_tokens: f64,
    refill_rate: f64,
}

impl TokenBucket {
    pub fn new(window_ms: u64, max_requests: u64) -> Self {
        let max_tokens = max_requests as f64;
        Self {
            max_tokens,
            refill_rate: max_tokens / (window_ms as f64 / 1000.0),
        }
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn take_state(&self, state: Option<KeyState>, now: u64) -> TokenBucketState {
        let mut bucket = match state {
            Some(KeyState::TokenBucket(bucket)) => bucket,
            Some(other) => {
                warn!(
                    found = %other.algorithm(),
                    expected = %Algorithm::TokenBucket,
                    "Discarding state written by a different algorithm"
                );
                TokenBucketState::new(self.max_tokens, self.refill_rate, now)
            }
            None => TokenBucketState::new(self.max_tokens, self.refill_rate, now),
        };
        bucket.enforce_invariants(self.refill_rate, self.max_tokens);
        bucket
    }
}

impl ThrottleAlgorithm for TokenBucket {
    fn kind(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    fn check(&self, state: Option<KeyState>, now: u64) -> (RateLimitResult, KeyState) {
        let mut bucket = self.take_state(state, now);
        bucket.refill(now);

        let limit = bucket.max_tokens as u64;
        let result = if bucket.consume(1.0) {
            let until_full = bucket.time_until_available(bucket.max_tokens).unwrap_or(0);
            RateLimitResult::allowed(limit, bucket.available_tokens(), now.saturating_add(until_full))
        } else {
            let retry_after = ((1.0 - bucket.tokens) / bucket.refill_rate).ceil().max(1.0) as u64;
            RateLimitResult::rejected(
                limit,
                bucket.available_tokens(),
                now.saturating_add(retry_after.saturating_mul(1000)),
                retry_after,
            )
        };

        (result, KeyState::TokenBucket(bucket))
    }

    fn refund(&self, state: KeyState, now: u64) -> KeyState {
        let mut bucket = self.take_state(Some(state), now);
        bucket.tokens = (bucket.tokens + 1.0).min(bucket.max_tokens);
        KeyState::TokenBucket(bucket)
    }

    fn is_expired(&self, state: &KeyState, _now: u64) -> bool {
        // Refill depends only on elapsed time, so an idle bucket is never stale;
        // foreign state is.
        !matches!(state, KeyState::TokenBucket(_))
    }
}
