use crate::error::{ThrottlerError, ThrottlerResult};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use validator::Validate;

const MAX_KEY_LEN: usize = 256;

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:@/-]+$").expect("built-in key pattern must compile"));

/// Body of `POST /rate-limit/:key/complete`.
#[derive(Debug, Deserialize, Validate)]
pub struct CompleteRequest {
    #[validate(range(min = 100, max = 599, message = "status must be a valid HTTP status"))]
    pub status: u16,
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Validates a rate limit key taken from a request path
    pub fn validate_key(key: &str) -> ThrottlerResult<String> {
        let key = key.trim();

        if key.is_empty() {
            return Err(ThrottlerError::InvalidKey(
                "Rate limit key cannot be empty".to_string(),
            ));
        }

        if key.len() > MAX_KEY_LEN {
            return Err(ThrottlerError::InvalidKey(format!(
                "Rate limit key cannot be longer than {} characters",
                MAX_KEY_LEN
            )));
        }

        if !KEY_PATTERN.is_match(key) {
            return Err(ThrottlerError::InvalidKey(
                "Rate limit key can only contain alphanumeric characters and _ . : @ / -".to_string(),
            ));
        }

        Ok(key.to_string())
    }

    pub fn validate_complete_request(request: &CompleteRequest) -> ThrottlerResult<()> {
        request
            .validate()
            .map_err(|errors| ThrottlerError::Validation(errors.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert_eq!(RequestValidator::validate_key("api-key").unwrap(), "api-key");
        assert_eq!(
            RequestValidator::validate_key(" throttle:ip:10.0.0.1:/api ").unwrap(),
            "throttle:ip:10.0.0.1:/api"
        );
    }

    #[test]
    fn test_invalid_key_format() {
        assert!(RequestValidator::validate_key("invalid key!").is_err());
        assert!(RequestValidator::validate_key("   ").is_err());
        assert!(RequestValidator::validate_key(&"a".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_complete_request() {
        assert!(RequestValidator::validate_complete_request(&CompleteRequest { status: 503 }).is_ok());
        assert!(RequestValidator::validate_complete_request(&CompleteRequest { status: 42 }).is_err());
    }
}
