//! Per-user fixed-window limit on chat messages.
//!
//! The counter lives in the shared store so the limit holds across every
//! instance. A store failure, or a round-trip slower than `timeout_ms`,
//! lets the message through.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::metrics::RateLimitMetrics;
use crate::store::{SharedStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Within the window budget; carries the count including this message
    Allowed(u64),
    /// Over budget for the current window
    Limited,
    /// Store unreachable, allowed without counting
    FailOpen,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateDecision::Limited)
    }
}

pub struct MessageRateLimiter {
    store: Arc<dyn SharedStore>,
    config: RateLimitConfig,
}

impl MessageRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn key(&self, user_id: Uuid) -> String {
        format!("{}:{}", self.config.key_prefix, user_id)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_seconds)
    }

    pub async fn check(&self, user_id: Uuid) -> RateDecision {
        if !self.config.enabled {
            return RateDecision::Allowed(0);
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let counted = tokio::time::timeout(
            timeout,
            self.store.incr_with_expiry(&self.key(user_id), self.window()),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout));

        match counted {
            Ok(count) if count <= self.config.max_messages => {
                RateLimitMetrics::allowed();
                RateDecision::Allowed(count)
            }
            Ok(count) => {
                RateLimitMetrics::denied();
                tracing::debug!(user_id = %user_id, count, "Message rate limit exceeded");
                RateDecision::Limited
            }
            Err(e) => {
                RateLimitMetrics::fail_open();
                tracing::warn!(user_id = %user_id, error = %e, "Rate limit store unavailable, allowing message");
                RateDecision::FailOpen
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BusMessage, MemoryStore};
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    /// Store whose every call hangs, like a blackholed Redis
    struct HangingStore;

    #[async_trait]
    impl SharedStore for HangingStore {
        fn backend(&self) -> &'static str {
            "hanging"
        }

        async fn incr_with_expiry(&self, _: &str, _: Duration) -> Result<u64, StoreError> {
            std::future::pending().await
        }

        async fn set_with_ttl(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn publish(&self, _: &str, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn psubscribe(&self, _: &str) -> Result<BoxStream<'static, BusMessage>, StoreError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    fn limiter(store: &MemoryStore, max_messages: u64) -> MessageRateLimiter {
        MessageRateLimiter::new(
            Arc::new(store.clone()),
            RateLimitConfig {
                max_messages,
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixty_first_message_in_window_is_limited() {
        let store = MemoryStore::new();
        let limiter = limiter(&store, 60);
        let user = Uuid::new_v4();

        let mut allowed = 0;
        for _ in 0..60 {
            if limiter.check(user).await.is_allowed() {
                allowed += 1;
            }
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(allowed, 60);
        assert_eq!(limiter.check(user).await, RateDecision::Limited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_allows_again() {
        let store = MemoryStore::new();
        let limiter = limiter(&store, 2);
        let user = Uuid::new_v4();

        assert_eq!(limiter.check(user).await, RateDecision::Allowed(1));
        assert_eq!(limiter.check(user).await, RateDecision::Allowed(2));
        assert_eq!(limiter.check(user).await, RateDecision::Limited);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.check(user).await, RateDecision::Allowed(1));
    }

    #[tokio::test]
    async fn test_users_are_counted_separately() {
        let store = MemoryStore::new();
        let limiter = limiter(&store, 1);

        assert!(limiter.check(Uuid::new_v4()).await.is_allowed());
        assert!(limiter.check(Uuid::new_v4()).await.is_allowed());
    }

    #[tokio::test]
    async fn test_fails_open_when_store_down() {
        let store = MemoryStore::new();
        store.set_available(false);
        let limiter = limiter(&store, 1);
        let user = Uuid::new_v4();

        assert_eq!(limiter.check(user).await, RateDecision::FailOpen);
        assert!(limiter.check(user).await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_open_when_store_hangs() {
        let limiter = MessageRateLimiter::new(Arc::new(HangingStore), RateLimitConfig::default());

        let decision = tokio::time::timeout(Duration::from_secs(120), limiter.check(Uuid::new_v4()))
            .await
            .expect("check must not wait on a hung store");
        assert_eq!(decision, RateDecision::FailOpen);
    }

    #[tokio::test]
    async fn test_disabled_limiter_never_limits() {
        let store = MemoryStore::new();
        let limiter = MessageRateLimiter::new(
            Arc::new(store),
            RateLimitConfig {
                enabled: false,
                max_messages: 0,
                ..Default::default()
            },
        );

        assert!(limiter.check(Uuid::new_v4()).await.is_allowed());
    }

    #[test]
    fn test_key_format() {
        let limiter = limiter(&MemoryStore::new(), 60);
        let user = Uuid::nil();
        assert_eq!(
            limiter.key(user),
            "rate:ws_msg:00000000-0000-0000-0000-000000000000"
        );
    }
}
