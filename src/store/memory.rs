//! Process-local store backend.
//!
//! Counters and TTL keys expire on `tokio::time` so paused-clock tests
//! can move across a window. The bus is a broadcast channel shared by
//! every handle cloned from the same store.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{glob_match, BusMessage, SharedStore, StoreError};

const BUS_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    counters: DashMap<String, (u64, Instant)>,
    values: DashMap<String, (String, Instant)>,
    bus: broadcast::Sender<BusMessage>,
    available: AtomicBool,
    published: AtomicU64,
    subscribers: Arc<AtomicUsize>,
}

/// Decrements the live subscriber count when a subscription stream is dropped
struct SubscriberGuard(Arc<AtomicUsize>);

impl SubscriberGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                counters: DashMap::new(),
                values: DashMap::new(),
                bus,
                available: AtomicBool::new(true),
                published: AtomicU64::new(0),
                subscribers: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Simulate an outage: every operation fails while unavailable.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Release);
    }

    /// Current value of a live TTL key
    pub fn get(&self, key: &str) -> Option<String> {
        let entry = self.inner.values.get(key)?;
        let (value, expires_at) = entry.value();
        (Instant::now() < *expires_at).then(|| value.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.load(Ordering::Acquire)
    }

    /// Total number of successful publishes since creation
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Acquire)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store disabled".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        self.check_available()?;
        let now = Instant::now();

        let mut entry = self
            .inner
            .counters
            .entry(key.to_string())
            .or_insert((0, now + window));
        let (count, expires_at) = entry.value_mut();
        if now >= *expires_at {
            *count = 0;
            *expires_at = now + window;
        }
        *count += 1;

        Ok(*count)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        self.inner
            .values
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.inner.values.remove(key);
        self.inner.counters.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        self.check_available()?;
        // No receivers is not an error, the same as PUBLISH returning 0
        let _ = self.inner.bus.send(BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        self.inner.published.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn psubscribe(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, BusMessage>, StoreError> {
        self.check_available()?;

        let mut rx = self.inner.bus.subscribe();
        let guard = SubscriberGuard::new(self.inner.subscribers.clone());
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            let _guard = guard;
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if glob_match(&pattern, &msg.channel) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counter_resets_after_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        assert_eq!(store.incr_with_expiry("k", window).await.unwrap(), 1);
        assert_eq!(store.incr_with_expiry("k", window).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.incr_with_expiry("k", window).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_key_expires() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("online:1", "1", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(store.get("online:1").as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(store.get("online:1").is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_available(false);

        assert!(store.ping().await.is_err());
        assert!(store
            .incr_with_expiry("k", Duration::from_secs(1))
            .await
            .is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_psubscribe_filters_by_pattern() {
        let store = MemoryStore::new();
        let mut stream = store.psubscribe("ws:channel:*").await.unwrap();
        assert_eq!(store.subscriber_count(), 1);

        store.publish("other:1", "skip").await.unwrap();
        store.publish("ws:channel:1", "hello").await.unwrap();

        let msg = stream.next().await.unwrap();
        assert_eq!(msg.channel, "ws:channel:1");
        assert_eq!(msg.payload, "hello");
        assert_eq!(store.published_count(), 2);

        drop(stream);
        assert_eq!(store.subscriber_count(), 0);
    }
}
