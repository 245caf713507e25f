use crate::algorithms::Algorithm;
use crate::cache::CacheStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of limiter activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    /// Admissions later refunded by a skip policy
    pub skipped_requests: u64,
    pub backend_errors: u64,
    /// Keys with local state; `None` in distributed mode
    pub active_keys: Option<usize>,
    pub blocked_by_algorithm: BTreeMap<Algorithm, u64>,
    pub cache: CacheStats,
}

/// Lock-free request counters shared by all clones of a limiter.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    total_requests: AtomicU64,
    allowed_requests: AtomicU64,
    blocked_requests: AtomicU64,
    skipped_requests: AtomicU64,
    backend_errors: AtomicU64,
    blocked_by_algorithm: [AtomicU64; 3],
}

fn slot(algorithm: Algorithm) -> usize {
    match algorithm {
        Algorithm::SlidingWindow => 0,
        Algorithm::TokenBucket => 1,
        Algorithm::FixedWindow => 2,
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a check as soon as it starts, whatever its outcome.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verdict(&self, algorithm: Algorithm, allowed: bool) {
        if allowed {
            self.allowed_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            self.blocked_by_algorithm[slot(algorithm)].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skipped(&self) {
        self.skipped_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// `active_keys` is `None` when state lives in a distributed store this
    /// instance cannot count.
    pub fn snapshot(&self, cache: CacheStats, active_keys: Option<usize>) -> Metrics {
        let blocked_by_algorithm = Algorithm::ALL
            .iter()
            .map(|&algorithm| {
                (
                    algorithm,
                    self.blocked_by_algorithm[slot(algorithm)].load(Ordering::Relaxed),
                )
            })
            .collect();

        Metrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            allowed_requests: self.allowed_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            skipped_requests: self.skipped_requests.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            active_keys,
            blocked_by_algorithm,
            cache,
        }
    }
}
