use anyhow::{Context, Result};
use clap::Parser;
use ratewarden::config::Config;
use ratewarden::rate_limiter::RateLimiter;
use ratewarden::redis::RedisStore;
use ratewarden::server::Server;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ratewarden={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ratewarden service");

    config.validate().context("Invalid configuration")?;
    let limiter_config = config.to_limiter_config()?;

    tracing::info!(
        bind_address = %config.bind_address,
        algorithm = %limiter_config.algorithm,
        window_ms = limiter_config.window_ms,
        max_requests = limiter_config.max_requests,
        distributed = config.redis_url.is_some(),
        "Configuration loaded"
    );

    let mut limiter = RateLimiter::new(limiter_config).context("Failed to create rate limiter")?;
    if let Some(url) = &config.redis_url {
        let store = RedisStore::new(url).context("Failed to create Redis store")?;
        limiter = limiter.with_distributed_store(Arc::new(store));
    }

    Server::new(config.bind_address, limiter)
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
