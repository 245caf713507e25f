use crate::handlers::{
    check_rate_limit, complete_request, get_metrics, health_check, ping, readiness_check,
    reset_all, reset_key, AppState,
};
use crate::middleware::{logging_middleware, rate_limit_middleware};
use crate::rate_limiter::RateLimiter;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the admin API plus the rate limited demo routes.
pub fn create_app(limiter: RateLimiter) -> Router {
    let admin = Router::new()
        // Rate limiting endpoints
        .route("/rate-limit", delete(reset_all))
        .route("/rate-limit/:key", delete(reset_key))
        .route("/rate-limit/:key/check", post(check_rate_limit))
        .route("/rate-limit/:key/complete", post(complete_request))
        .route("/metrics", get(get_metrics))
        // Health and readiness endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(AppState::new(limiter.clone()));

    let protected = Router::new()
        .route("/api/ping", get(ping))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    admin.merge(protected).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(middleware::from_fn(logging_middleware)),
    )
}

pub struct Server {
    limiter: RateLimiter,
    addr: SocketAddr,
}

impl Server {
    pub fn new(addr: SocketAddr, limiter: RateLimiter) -> Self {
        Self { limiter, addr }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let _sweep = self.limiter.spawn_cleanup_task();
        let app = create_app(self.limiter);

        tracing::info!("ratewarden listening on {}", self.addr);
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        // Run server with graceful shutdown
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
