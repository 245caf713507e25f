use crate::error::ThrottlerError;
use crate::rate_limit_config::RateLimiterConfig;
use validator::Validate;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), ThrottlerError> {
        if url.is_empty() {
            return Err(ThrottlerError::Configuration(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ThrottlerError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates limiter settings; any violation is fatal.
    pub fn validate_limiter_config(config: &RateLimiterConfig) -> Result<(), ThrottlerError> {
        config
            .validate()
            .map_err(|errors| ThrottlerError::Configuration(errors.to_string()))?;

        if config.skip_successful_requests && config.skip_failed_requests {
            tracing::warn!("Both skip policies are enabled; only 1xx/3xx responses will be counted");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::Algorithm;

    #[test]
    fn test_valid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("redis://localhost:6379").is_ok());
        assert!(ConfigValidator::validate_redis_url("rediss://localhost:6379").is_ok());
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(ConfigValidator::validate_redis_url("").is_err());
        assert!(ConfigValidator::validate_redis_url("http://localhost:6379").is_err());
    }

    #[test]
    fn test_valid_limiter_config() {
        let config = RateLimiterConfig::new(Algorithm::SlidingWindow, 1_000, 10);
        assert!(ConfigValidator::validate_limiter_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_limiter_config() {
        let config = RateLimiterConfig::new(Algorithm::SlidingWindow, 1_000, 0);
        let err = ConfigValidator::validate_limiter_config(&config).unwrap_err();
        assert!(err.to_string().contains("max_requests"));

        let config = RateLimiterConfig {
            status_code: 42,
            ..RateLimiterConfig::default()
        };
        assert!(ConfigValidator::validate_limiter_config(&config).is_err());
    }
}
