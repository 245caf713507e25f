use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};

use crate::error::ThrottlerError;
use crate::health::HealthChecker;
use crate::middleware::apply_rate_limit_headers;
use crate::rate_limiter::RateLimiter;
use crate::response::{CompleteResponse, RateLimitResponse, ResetResponse};
use crate::validation::{CompleteRequest, RequestValidator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: RateLimiter,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self {
            health: HealthChecker::new(rate_limiter.clone()),
            rate_limiter,
        }
    }
}

/// Check rate limit for a key
pub async fn check_rate_limit(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let key = RequestValidator::validate_key(&key)?;
    let result = state.rate_limiter.check_limit(&key).await?;

    let mut resp = Json(RateLimitResponse::new(&key, &result)).into_response();
    apply_rate_limit_headers(resp.headers_mut(), &result);

    if let Some(retry_after) = result.retry_after {
        *resp.status_mut() = StatusCode::from_u16(state.rate_limiter.config().status_code)
            .unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        resp.headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }

    Ok(resp)
}

/// Report the outcome of an admitted request so skip policies can apply
pub async fn complete_request(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(payload): Json<CompleteRequest>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let key = RequestValidator::validate_key(&key)?;
    RequestValidator::validate_complete_request(&payload)?;

    let refunded = state.rate_limiter.complete(&key, payload.status).await?;

    Ok(Json(CompleteResponse {
        key,
        status: payload.status,
        refunded,
    }))
}

/// Forget the state of one key
pub async fn reset_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ThrottlerError> {
    let key = RequestValidator::validate_key(&key)?;
    state.rate_limiter.reset_key(&key).await?;

    Ok(Json(ResetResponse::key(key)))
}

/// Forget the state of every key
pub async fn reset_all(State(state): State<AppState>) -> Result<impl IntoResponse, ThrottlerError> {
    state.rate_limiter.reset().await?;
    Ok(Json(ResetResponse::all()))
}

pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.rate_limiter.get_metrics())
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.is_ready().await {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "distributed": state.rate_limiter.is_distributed(),
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "distributed": true,
                "note": "Distributed store unreachable and failure policy is fail_closed",
            })),
        )
    }
}

/// Demo endpoint sitting behind the rate limiting middleware
pub async fn ping() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "pong" }))
}
