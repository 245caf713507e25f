use crate::config_validator::ConfigValidator;
use crate::error::ThrottlerResult;
use crate::store::DistributedStateStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Largest `PX` Redis accepts without overflowing its expiry clock.
const MAX_TTL_MS: u64 = i64::MAX as u64 / 2;

/// Redis-backed [`DistributedStateStore`].
///
/// The connection is opened lazily on first use and shared afterwards;
/// multiplexed connections are cheap to clone per command.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<MultiplexedConnection>,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> ThrottlerResult<Self> {
        ConfigValidator::validate_redis_url(redis_url)?;
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> ThrottlerResult<MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                debug!("Opening Redis connection");
                self.client.get_multiplexed_tokio_connection().await
            })
            .await?;
        Ok(conn.clone())
    }

    pub async fn ping(&self) -> ThrottlerResult<String> {
        let mut conn = self.connection().await?;
        let pong = redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(pong)
    }
}

#[async_trait]
impl DistributedStateStore for RedisStore {
    async fn get(&self, key: &str) -> ThrottlerResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> ThrottlerResult<()> {
        let mut conn = self.connection().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).clamp(1, MAX_TTL_MS);
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ThrottlerResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> ThrottlerResult<usize> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(256)
                .query_async::<_, (u64, Vec<String>)>(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<_, i64>(&mut conn)
                    .await?;
                removed += deleted.max(0) as usize;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn is_healthy(&self) -> bool {
        match self.ping().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Redis health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_redis_url() {
        assert!(RedisStore::new("http://localhost:6379").is_err());
    }

    #[test]
    fn test_client_creation_is_lazy() {
        // Opening the client never touches the network.
        assert!(RedisStore::new("redis://127.0.0.1:1").is_ok());
    }
}
