use crate::algorithms::{self, KeyState, RateLimitResult, ThrottleAlgorithm};
use crate::cache::BoundedStateCache;
use crate::clock::{Clock, SystemClock};
use crate::error::{ThrottlerError, ThrottlerResult};
use crate::key_generator::KeyGenerator;
use crate::lock_table::LockTable;
use crate::metrics::{Metrics, MetricsCollector};
use crate::rate_limit_config::RateLimiterConfig;
use crate::store::DistributedStateStore;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Admission control over per-key state.
///
/// Cheap to clone; clones share state, locks and metrics. Without a
/// distributed store, state lives in a bounded in-process LRU cache and the
/// check path never awaits on I/O.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimiterConfig>,
    algorithm: Arc<dyn ThrottleAlgorithm>,
    cache: Arc<BoundedStateCache<String, KeyState>>,
    local_locks: Arc<LockTable<parking_lot::Mutex<()>>>,
    remote_locks: Arc<LockTable<tokio::sync::Mutex<()>>>,
    store: Option<Arc<dyn DistributedStateStore>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> ThrottlerResult<Self> {
        config.ensure_valid()?;

        let cache = BoundedStateCache::new(config.max_cache_size)?;
        let algorithm: Arc<dyn ThrottleAlgorithm> = Arc::from(algorithms::build(
            config.algorithm,
            config.window_ms,
            config.max_requests,
        ));

        info!(
            algorithm = %config.algorithm,
            window_ms = config.window_ms,
            max_requests = config.max_requests,
            max_cache_size = config.max_cache_size,
            "Rate limiter initialized"
        );

        Ok(Self {
            local_locks: Arc::new(LockTable::new(config.lock_shards)),
            remote_locks: Arc::new(LockTable::new(config.lock_shards)),
            config: Arc::new(config),
            algorithm,
            cache: Arc::new(cache),
            store: None,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    /// Keeps state in `store` instead of the local cache.
    pub fn with_distributed_store(mut self, store: Arc<dyn DistributedStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn is_distributed(&self) -> bool {
        self.store.is_some()
    }

    /// Counts one request against `key` and returns the verdict.
    ///
    /// Only fails on an invalid key, or on a store failure under
    /// [`FailurePolicy::FailClosed`](crate::rate_limit_config::FailurePolicy).
    pub async fn check_limit(&self, key: &str) -> ThrottlerResult<RateLimitResult> {
        if key.is_empty() {
            return Err(ThrottlerError::InvalidKey("key cannot be empty".to_string()));
        }

        self.metrics.record_request();
        let result = match &self.store {
            Some(store) => self.check_distributed(store.as_ref(), key).await?,
            None => self.check_local(key),
        };

        self.metrics.record_verdict(self.algorithm.kind(), result.allowed);
        if !result.allowed {
            debug!(
                key = %key,
                algorithm = %self.algorithm.kind(),
                retry_after = ?result.retry_after,
                "Request rate limited"
            );
        }

        Ok(result)
    }

    fn check_local(&self, key: &str) -> RateLimitResult {
        let _guard = self.local_locks.shard(key).lock();
        let now = self.clock.now_ms();

        let (result, next) = self.algorithm.check(self.cache.get(key), now);
        if let Some(evicted) = self.cache.set(key.to_string(), next) {
            debug!(evicted = %evicted, "Evicted least recently used key");
        }
        result
    }

    async fn check_distributed(
        &self,
        store: &dyn DistributedStateStore,
        key: &str,
    ) -> ThrottlerResult<RateLimitResult> {
        let _guard = self.remote_locks.shard(key).lock().await;
        let store_key = self.store_key(key);
        let now = self.clock.now_ms();

        let outcome = async {
            let state = self.load(store, &store_key).await?;
            let (result, next) = self.algorithm.check(state, now);
            self.save(store, &store_key, &next).await?;
            Ok::<_, ThrottlerError>(result)
        }
        .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(e) => self.on_backend_failure(key, e).map(|()| {
                let max = self.config.max_requests;
                let reset_time = now.saturating_add(self.config.window_ms);
                RateLimitResult::allowed(max, max.saturating_sub(1), reset_time)
            }),
        }
    }

    /// Whether a response with `status` should be excluded from accounting.
    pub fn should_skip(&self, status: u16) -> bool {
        (self.config.skip_successful_requests && (200..300).contains(&status))
            || (self.config.skip_failed_requests && status >= 400)
    }

    /// Reverses one earlier admission for `key`.
    ///
    /// Returns `false` when there was no state left to refund, e.g. after
    /// eviction.
    pub async fn refund(&self, key: &str) -> ThrottlerResult<bool> {
        let refunded = match &self.store {
            Some(store) => self.refund_distributed(store.as_ref(), key).await?,
            None => self.refund_local(key),
        };

        if refunded {
            self.metrics.record_skipped();
        }
        Ok(refunded)
    }

    fn refund_local(&self, key: &str) -> bool {
        let _guard = self.local_locks.shard(key).lock();
        let now = self.clock.now_ms();

        match self.cache.get(key) {
            Some(state) => {
                self.cache.set(key.to_string(), self.algorithm.refund(state, now));
                true
            }
            None => false,
        }
    }

    async fn refund_distributed(
        &self,
        store: &dyn DistributedStateStore,
        key: &str,
    ) -> ThrottlerResult<bool> {
        let _guard = self.remote_locks.shard(key).lock().await;
        let store_key = self.store_key(key);
        let now = self.clock.now_ms();

        let outcome = async {
            match self.load(store, &store_key).await? {
                Some(state) => {
                    let next = self.algorithm.refund(state, now);
                    self.save(store, &store_key, &next).await?;
                    Ok(true)
                }
                None => Ok::<_, ThrottlerError>(false),
            }
        }
        .await;

        match outcome {
            Ok(refunded) => Ok(refunded),
            Err(e) => self.on_backend_failure(key, e).map(|()| false),
        }
    }

    /// Post-response hook: refunds the admission when a skip policy matches.
    pub async fn complete(&self, key: &str, status: u16) -> ThrottlerResult<bool> {
        if !self.should_skip(status) {
            return Ok(false);
        }
        self.refund(key).await
    }

    pub fn get_metrics(&self) -> Metrics {
        let stats = self.cache.stats();
        let active_keys = (!self.is_distributed()).then_some(stats.size);
        self.metrics.snapshot(stats, active_keys)
    }

    /// Forgets all key state, locally and in the distributed store.
    ///
    /// Holds every shard lock while clearing, so a check already in flight
    /// cannot write its pre-reset state back afterwards.
    pub async fn reset(&self) -> ThrottlerResult<()> {
        match &self.store {
            Some(store) => {
                let mut guards = Vec::with_capacity(self.remote_locks.len());
                for shard in self.remote_locks.iter() {
                    guards.push(shard.lock().await);
                }

                self.cache.clear();
                let prefix = format!("{}:", self.config.key_prefix);
                let removed = self.bounded(store.clear(&prefix)).await?;
                debug!(removed, prefix = %prefix, "Cleared distributed rate limit state");
            }
            None => {
                let _guards: Vec<_> = self.local_locks.iter().map(|shard| shard.lock()).collect();
                self.cache.clear();
            }
        }

        info!("Rate limiter state reset");
        Ok(())
    }

    pub async fn reset_key(&self, key: &str) -> ThrottlerResult<()> {
        match &self.store {
            Some(store) => {
                let _guard = self.remote_locks.shard(key).lock().await;
                self.cache.delete(key);
                self.bounded(store.delete(&self.store_key(key))).await?;
            }
            None => {
                let _guard = self.local_locks.shard(key).lock();
                self.cache.delete(key);
            }
        }

        debug!(key = %key, "Rate limit state reset");
        Ok(())
    }

    /// Drops cached state whose window has fully elapsed. Token buckets are
    /// left to LRU pressure.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let algorithm = &self.algorithm;
        self.cache.cleanup_batched(
            |_, state| algorithm.is_expired(state, now),
            self.config.cleanup_batch_size,
        )
    }

    /// Runs [`cleanup_expired`](Self::cleanup_expired) every
    /// `cleanup_interval` until the returned handle is dropped.
    pub fn spawn_cleanup_task(&self) -> CleanupTask {
        let limiter = self.clone();
        let period = self.config.cleanup_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = limiter.cleanup_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired rate limit state");
                }
            }
        });

        CleanupTask { handle }
    }

    pub async fn is_backend_healthy(&self) -> bool {
        match &self.store {
            Some(store) => tokio::time::timeout(self.config.backend_timeout, store.is_healthy())
                .await
                .unwrap_or(false),
            None => true,
        }
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, KeyGenerator::escape_key(key))
    }

    async fn bounded<T, F>(&self, call: F) -> ThrottlerResult<T>
    where
        F: Future<Output = ThrottlerResult<T>>,
    {
        let timeout = self.config.backend_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ThrottlerError::Timeout(timeout)),
        }
    }

    async fn load(
        &self,
        store: &dyn DistributedStateStore,
        store_key: &str,
    ) -> ThrottlerResult<Option<KeyState>> {
        let Some(raw) = self.bounded(store.get(store_key)).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(key = %store_key, error = %e, "Discarding unreadable rate limit state");
                Ok(None)
            }
        }
    }

    async fn save(
        &self,
        store: &dyn DistributedStateStore,
        store_key: &str,
        state: &KeyState,
    ) -> ThrottlerResult<()> {
        let json = serde_json::to_string(state)?;
        self.bounded(store.set(store_key, json, self.config.window()))
            .await
    }

    /// Applies the failure policy: `Ok(())` means carry on as if admitted.
    fn on_backend_failure(&self, key: &str, err: ThrottlerError) -> ThrottlerResult<()> {
        self.metrics.record_backend_error();

        if self.config.fails_open() {
            warn!(
                key = %key,
                algorithm = %self.algorithm.kind(),
                error = %err,
                "Distributed store failed, failing open"
            );
            return Ok(());
        }

        error!(
            key = %key,
            algorithm = %self.algorithm.kind(),
            error = %err,
            "Distributed store failed, failing closed"
        );
        if err.is_backend() {
            Err(err)
        } else {
            Err(ThrottlerError::Backend(err.to_string()))
        }
    }
}

/// Handle to the background sweep. Dropping it stops the sweep.
#[derive(Debug)]
pub struct CleanupTask {
    handle: JoinHandle<()>,
}

impl CleanupTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
