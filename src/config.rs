use crate::algorithms::Algorithm;
use crate::config_validator::ConfigValidator;
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::rate_limit_config::{FailurePolicy, RateLimiterConfig};
use clap::Parser;
use humantime_serde::re::humantime;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value)
}

/// Service configuration, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "ratewarden", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1:3000")]
    pub bind_address: SocketAddr,

    /// Redis connection URL; state stays in-process when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// JSON file holding a full limiter configuration; overrides the flags below
    #[arg(long, env = "RATE_LIMIT_CONFIG_FILE")]
    pub limits_file: Option<PathBuf>,

    #[arg(long, env = "RATE_LIMIT_ALGORITHM", default_value = "sliding_window")]
    pub algorithm: Algorithm,

    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = 60_000)]
    pub window_ms: u64,

    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = 100)]
    pub max_requests: u64,

    #[arg(long, env = "RATE_LIMIT_MAX_CACHE_SIZE", default_value_t = 10_000)]
    pub max_cache_size: usize,

    #[arg(long, env = "RATE_LIMIT_SKIP_SUCCESSFUL")]
    pub skip_successful_requests: bool,

    #[arg(long, env = "RATE_LIMIT_SKIP_FAILED")]
    pub skip_failed_requests: bool,

    #[arg(long, env = "RATE_LIMIT_FAILURE_POLICY", default_value = "fail_open")]
    pub failure_policy: FailurePolicy,

    #[arg(long, env = "RATE_LIMIT_BACKEND_TIMEOUT", default_value = "100ms", value_parser = parse_duration)]
    pub backend_timeout: Duration,

    #[arg(long, env = "RATE_LIMIT_CLEANUP_INTERVAL", default_value = "60s", value_parser = parse_duration)]
    pub cleanup_interval: Duration,
}

impl Config {
    /// Builds the limiter configuration, from `limits_file` when set.
    pub fn to_limiter_config(&self) -> ThrottlerResult<RateLimiterConfig> {
        if let Some(path) = &self.limits_file {
            let json = std::fs::read_to_string(path).map_err(|e| {
                ThrottlerError::Configuration(format!("Cannot read {}: {}", path.display(), e))
            })?;
            return RateLimiterConfig::from_json(&json);
        }

        let config = RateLimiterConfig {
            max_cache_size: self.max_cache_size,
            skip_successful_requests: self.skip_successful_requests,
            skip_failed_requests: self.skip_failed_requests,
            failure_policy: self.failure_policy,
            backend_timeout: self.backend_timeout,
            cleanup_interval: self.cleanup_interval,
            ..RateLimiterConfig::new(self.algorithm, self.window_ms, self.max_requests)
        };
        config.ensure_valid()?;
        Ok(config)
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        if let Some(url) = &self.redis_url {
            ConfigValidator::validate_redis_url(url)?;
        }
        self.to_limiter_config().map(|_| ())
    }
}
