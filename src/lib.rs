pub mod algorithms;
pub mod cache;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod lock_table;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod redis;
pub mod response;
pub mod server;
pub mod store;
pub mod validation;

pub use algorithms::{Algorithm, KeyState, RateLimitResult, ThrottleAlgorithm};
pub use cache::{BoundedStateCache, CacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ThrottlerError, ThrottlerResult};
pub use key_generator::{KeyGenerator, KeyStrategy};
pub use metrics::Metrics;
pub use rate_limit_config::{FailurePolicy, RateLimiterConfig};
pub use rate_limiter::{CleanupTask, RateLimiter};
pub use server::create_app;
pub use store::{DistributedStateStore, MemoryStore};
