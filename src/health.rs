use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};

use crate::rate_limiter::RateLimiter;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

#[derive(Clone)]
pub struct HealthChecker {
    rate_limiter: RateLimiter,
}

impl HealthChecker {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        std::sync::LazyLock::force(&START_TIME);
        Self { rate_limiter }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let store = self.check_store().await;

        let overall_status = if store.status == "unavailable" {
            "degraded"
        } else {
            "healthy"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus { store },
        }
    }

    /// Whether requests can currently be decided against the configured store.
    pub async fn is_ready(&self) -> bool {
        self.rate_limiter.config().fails_open() || self.rate_limiter.is_backend_healthy().await
    }

    async fn check_store(&self) -> ServiceStatus {
        if !self.rate_limiter.is_distributed() {
            return ServiceStatus {
                status: "local".to_string(),
                response_time_ms: 0,
                error: None,
            };
        }

        let start = Instant::now();
        let healthy = self.rate_limiter.is_backend_healthy().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        if healthy {
            ServiceStatus {
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            }
        } else {
            ServiceStatus {
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some("Distributed store not reachable".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::Algorithm;
    use crate::rate_limit_config::RateLimiterConfig;

    #[test]
    fn test_health_status_serialization() {
        let status = HealthStatus {
            status: "healthy".to_string(),
            timestamp: 1234567890,
            version: "1.0.0".to_string(),
            uptime_seconds: 3600,
            dependencies: DependencyStatus {
                store: ServiceStatus {
                    status: "healthy".to_string(),
                    response_time_ms: 5,
                    error: None,
                },
            },
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("1234567890"));
    }

    #[tokio::test]
    async fn test_local_limiter_is_healthy() {
        let limiter =
            RateLimiter::new(RateLimiterConfig::new(Algorithm::FixedWindow, 1_000, 1)).unwrap();
        let checker = HealthChecker::new(limiter);

        let status = checker.check_health().await;
        assert_eq!(status.status, "healthy");
        assert_eq!(status.dependencies.store.status, "local");
        assert!(checker.is_ready().await);
    }
}
