use crate::algorithms::RateLimitResult;
use crate::error::ErrorResponse;
use crate::key_generator::KeyGenerator;
use crate::rate_limiter::RateLimiter;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    info!(
        target: "ratewarden::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        target: "ratewarden::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

/// Admission control for every request passing through the layer.
///
/// Rejected requests never reach the inner service. Admitted requests are
/// refunded afterwards when the response status matches a skip policy.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let config = limiter.config();
    let headers = header_map(request.headers());
    let client_ip =
        KeyGenerator::extract_client_ip(&headers).unwrap_or_else(|| get_client_ip(&request));

    let key = match config
        .key_generator
        .generate_key(&headers, &client_ip, request.uri().path())
    {
        Ok(key) => key,
        Err(e) => {
            debug!(error = %e, "Could not derive rate limit key");
            return e.into_response();
        }
    };

    let result = match limiter.check_limit(&key).await {
        Ok(result) => result,
        Err(e) => return e.into_response(),
    };

    if !result.allowed {
        let status = StatusCode::from_u16(config.status_code).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        let body = ErrorResponse::new("rate_limited", &config.message, status.as_u16());
        let mut response = (status, Json(body)).into_response();

        if config.headers {
            apply_rate_limit_headers(response.headers_mut(), &result);
        }
        if let Some(retry_after) = result.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        return response;
    }

    let mut response = next.run(request).await;

    let status = response.status().as_u16();
    if let Err(e) = limiter.complete(&key, status).await {
        warn!(key = %key, status, error = %e, "Failed to refund skipped request");
    }

    if config.headers {
        apply_rate_limit_headers(response.headers_mut(), &result);
    }
    response
}

/// Writes the `X-RateLimit-*` headers for `result`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_time_secs()));
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

pub fn get_client_ip(request: &Request) -> String {
    // Try to get real IP from headers first
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    // Fallback to connection info
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else if let Some(addr) = request.extensions().get::<SocketAddr>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_client_ip_with_forwarded_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        let ip = get_client_ip(&request);
        assert_eq!(ip, "192.168.1.1");
    }

    #[test]
    fn test_get_client_ip_with_real_ip_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        let ip = get_client_ip(&request);
        assert_eq!(ip, "203.0.113.1");
    }

    #[test]
    fn test_get_client_ip_from_connect_info() {
        let mut request = Request::new(axum::body::Body::empty());
        let addr: SocketAddr = "198.51.100.7:4242".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        assert_eq!(get_client_ip(&request), "198.51.100.7");
    }

    #[test]
    fn test_get_client_ip_fallback() {
        let request = Request::new(axum::body::Body::empty());
        let ip = get_client_ip(&request);
        assert_eq!(ip, "unknown");
    }

    #[test]
    fn test_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        let result = RateLimitResult::rejected(10, 0, 1_700_000_000_500, 3);
        apply_rate_limit_headers(&mut headers, &result);

        assert_eq!(headers[&X_RATELIMIT_LIMIT], "10");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "0");
        assert_eq!(headers[&X_RATELIMIT_RESET], "1700000001");
    }

    #[test]
    fn test_header_map_lowercases_names() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(b"X-Api-Key").unwrap(),
            HeaderValue::from_static("secret"),
        );

        let map = header_map(&headers);
        assert_eq!(map.get("x-api-key").map(String::as_str), Some("secret"));
    }
}
