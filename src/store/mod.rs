//! Shared counter/TTL store and publish/subscribe bus.
//!
//! Every server instance talks to the same store: rate-limit counters,
//! presence markers and the relay bus all live here. Two backends:
//!
//! - `RedisStore`: production backend with circuit breaker and health tracking
//! - `MemoryStore`: process-local backend for tests and single-instance runs

mod backoff;
mod circuit_breaker;
mod health;
mod memory;
mod pool;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{RedisHealth, RedisHealthStatus};
pub use memory::MemoryStore;
pub use pool::RedisPool;
pub use redis_store::RedisStore;

/// Error type for shared store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out")]
    Timeout,
}

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Short backend name for health output
    fn backend(&self) -> &'static str;

    /// Atomically increment `key`; the expiry is set when the counter is created.
    /// Returns the counter value after the increment.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribe to every channel matching a glob `pattern`.
    /// The stream ends when the underlying subscription is lost.
    async fn psubscribe(&self, pattern: &str)
        -> Result<BoxStream<'static, BusMessage>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Redis connection health, when the backend has one
    fn redis_health(&self) -> Option<RedisHealthStatus> {
        None
    }
}

/// Glob match with `*` (any run) and `?` (any single char), as PSUBSCRIBE does.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }

    pi == p.len()
}
