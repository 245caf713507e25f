use crate::algorithms::RateLimitResult;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub key: String,
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds
    pub reset_time: u64,
    pub retry_after: Option<u64>,
}

impl RateLimitResponse {
    pub fn new(key: &str, result: &RateLimitResult) -> Self {
        Self {
            key: key.to_string(),
            allowed: result.allowed,
            limit: result.limit,
            remaining: result.remaining,
            reset_time: result.reset_time_secs(),
            retry_after: result.retry_after,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub key: String,
    pub status: u16,
    pub refunded: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ResetResponse {
    pub fn key(key: String) -> Self {
        Self {
            status: "success".to_string(),
            message: "Rate limit state reset".to_string(),
            key: Some(key),
        }
    }

    pub fn all() -> Self {
        Self {
            status: "success".to_string(),
            message: "All rate limit state reset".to_string(),
            key: None,
        }
    }
}
