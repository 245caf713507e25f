use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThrottlerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Missing user id")]
    MissingUserId,

    #[error("Invalid key strategy: {0}")]
    InvalidKeyStrategy(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

impl ThrottlerError {
    /// Errors raised by the distributed store; these are subject to the failure policy.
    pub fn is_backend(&self) -> bool {
        matches!(
            self,
            ThrottlerError::Backend(_) | ThrottlerError::Timeout(_) | ThrottlerError::Redis(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ThrottlerError::InvalidKey(_)
            | ThrottlerError::MissingApiKey
            | ThrottlerError::MissingUserId => StatusCode::BAD_REQUEST,
            ThrottlerError::InvalidKeyStrategy(_) | ThrottlerError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ThrottlerError::Backend(_) | ThrottlerError::Timeout(_) | ThrottlerError::Redis(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ThrottlerError::Configuration(_) | ThrottlerError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &ThrottlerError) -> Self {
        let code = err.status_code().as_u16();
        let message = err.to_string();
        match err {
            ThrottlerError::InvalidKey(_)
            | ThrottlerError::MissingApiKey
            | ThrottlerError::MissingUserId => Self::new("bad_request", &message, code),
            ThrottlerError::InvalidKeyStrategy(_) | ThrottlerError::Validation(_) => {
                Self::new("validation_error", &message, code)
            }
            ThrottlerError::Backend(_) | ThrottlerError::Timeout(_) | ThrottlerError::Redis(_) => {
                Self::new("service_unavailable", &message, code)
            }
            ThrottlerError::Configuration(_) => Self::new("configuration_error", &message, code),
            ThrottlerError::Serialization(_) => Self::new("internal_error", &message, code),
        }
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorResponse::from_error(&self))).into_response()
    }
}
