use crate::algorithms::Algorithm;
use crate::config_validator::ConfigValidator;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::key_generator::KeyGenerator;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// What to do when the distributed store errors or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request and log.
    #[default]
    FailOpen,
    /// Surface the backend error to the caller.
    FailClosed,
}

impl FromStr for FailurePolicy {
    type Err = ThrottlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Ok(FailurePolicy::FailOpen),
            "fail_closed" | "closed" => Ok(FailurePolicy::FailClosed),
            _ => Err(ThrottlerError::Configuration(format!(
                "Unknown failure policy '{}'. Must be fail_open or fail_closed",
                s
            ))),
        }
    }
}

/// Configuration for a [`RateLimiter`](crate::rate_limiter::RateLimiter).
///
/// Immutable once the limiter is built. Missing fields fall back to
/// [`Default`] when deserialized.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub algorithm: Algorithm,

    #[validate(range(min = 1, message = "window_ms must be greater than 0"))]
    pub window_ms: u64,

    #[validate(range(min = 1, message = "max_requests must be greater than 0"))]
    pub max_requests: u64,

    #[validate(range(min = 1, message = "max_cache_size must be greater than 0"))]
    pub max_cache_size: usize,

    /// Key derivation used by the HTTP middleware
    #[serde(skip)]
    pub key_generator: KeyGenerator,

    /// Refund admissions whose response was 2xx
    pub skip_successful_requests: bool,

    /// Refund admissions whose response was >= 400
    pub skip_failed_requests: bool,

    /// Emit `X-RateLimit-*` headers
    pub headers: bool,

    #[validate(range(min = 100, max = 599, message = "status_code must be a valid HTTP status"))]
    pub status_code: u16,

    pub message: String,

    pub failure_policy: FailurePolicy,

    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_non_zero_duration"))]
    pub backend_timeout: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_non_zero_duration"))]
    pub cleanup_interval: Duration,

    #[validate(range(min = 1, message = "cleanup_batch_size must be greater than 0"))]
    pub cleanup_batch_size: usize,

    #[validate(range(min = 1, message = "lock_shards must be greater than 0"))]
    pub lock_shards: usize,

    /// Namespace for keys written to the distributed store
    #[validate(length(min = 1, message = "key_prefix cannot be empty"))]
    pub key_prefix: String,
}

fn validate_non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("non_zero_duration"));
    }
    Ok(())
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::SlidingWindow,
            window_ms: 60_000,
            max_requests: 100,
            max_cache_size: 10_000,
            key_generator: KeyGenerator::default(),
            skip_successful_requests: false,
            skip_failed_requests: false,
            headers: true,
            status_code: 429,
            message: "Too many requests, please try again later.".to_string(),
            failure_policy: FailurePolicy::FailOpen,
            backend_timeout: Duration::from_millis(100),
            cleanup_interval: Duration::from_secs(60),
            cleanup_batch_size: 256,
            lock_shards: 64,
            key_prefix: "ratewarden".to_string(),
        }
    }
}

impl RateLimiterConfig {
    pub fn new(algorithm: Algorithm, window_ms: u64, max_requests: u64) -> Self {
        Self {
            algorithm,
            window_ms,
            max_requests,
            ..Self::default()
        }
    }

    /// Parses a JSON document, rejecting malformed or out-of-range values.
    pub fn from_json(json: &str) -> ThrottlerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ThrottlerError::Configuration(e.to_string()))?;
        config.ensure_valid()?;
        Ok(config)
    }

    pub fn ensure_valid(&self) -> ThrottlerResult<()> {
        ConfigValidator::validate_limiter_config(self)
    }

    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_skip_policies(mut self, successful: bool, failed: bool) -> Self {
        self.skip_successful_requests = successful;
        self.skip_failed_requests = failed;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn fails_open(&self) -> bool {
        self.failure_policy == FailurePolicy::FailOpen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RateLimiterConfig::default().ensure_valid().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = RateLimiterConfig::new(Algorithm::FixedWindow, 0, 10);
        let err = config.ensure_valid().unwrap_err();
        assert!(matches!(err, ThrottlerError::Configuration(_)));
        assert!(err.to_string().contains("window_ms"));
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let config = RateLimiterConfig {
            max_cache_size: 0,
            ..RateLimiterConfig::default()
        };
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn test_from_json_with_defaults() {
        let config = RateLimiterConfig::from_json(
            r#"{"algorithm": "token_bucket", "window_ms": 1000, "max_requests": 5, "backend_timeout": "250ms"}"#,
        )
        .unwrap();
        assert_eq!(config.algorithm, Algorithm::TokenBucket);
        assert_eq!(config.backend_timeout, Duration::from_millis(250));
        assert_eq!(config.status_code, 429);
        assert!(config.headers);
    }

    #[test]
    fn test_from_json_rejects_negative_and_unknown() {
        let negative = RateLimiterConfig::from_json(r#"{"max_requests": -1}"#);
        assert!(matches!(negative, Err(ThrottlerError::Configuration(_))));

        let unknown = RateLimiterConfig::from_json(r#"{"algorithm": "leaky_bucket"}"#);
        assert!(matches!(unknown, Err(ThrottlerError::Configuration(_))));
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!("fail-closed".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailClosed);
        assert_eq!("FAIL_OPEN".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailOpen);
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RateLimiterConfig {
            backend_timeout: Duration::ZERO,
            ..RateLimiterConfig::default()
        };
        assert!(config.ensure_valid().is_err());
    }
}
