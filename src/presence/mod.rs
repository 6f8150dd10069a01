use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::PresenceConfig;
use crate::metrics::PresenceMetrics;
use crate::store::{SharedStore, StoreError};

/// TTL-backed online markers. Every call is bounded and never fails the caller.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn SharedStore>,
    config: PresenceConfig,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn SharedStore>, config: PresenceConfig) -> Self {
        Self { store, config }
    }

    pub fn key(&self, user_id: Uuid) -> String {
        format!("{}:{}", self.config.key_prefix, user_id)
    }

    pub async fn mark_online(&self, user_id: Uuid) {
        let key = self.key(user_id);
        let ttl = Duration::from_secs(self.config.ttl_seconds);
        let result = self.bounded(self.store.set_with_ttl(&key, "1", ttl)).await;
        Self::report("mark_online", user_id, result);
    }

    pub async fn clear(&self, user_id: Uuid) {
        let key = self.key(user_id);
        let result = self.bounded(self.store.delete(&key)).await;
        Self::report("clear", user_id, result);
    }

    async fn bounded<F>(&self, op: F) -> Result<(), StoreError>
    where
        F: std::future::Future<Output = Result<(), StoreError>>,
    {
        tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), op)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    fn report(operation: &str, user_id: Uuid, result: Result<(), StoreError>) {
        if let Err(e) = result {
            PresenceMetrics::failure(operation);
            tracing::warn!(user_id = %user_id, operation, error = %e, "Presence update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tracker(store: &MemoryStore) -> PresenceTracker {
        PresenceTracker::new(Arc::new(store.clone()), PresenceConfig::default())
    }

    #[tokio::test]
    async fn test_mark_and_clear() {
        let store = MemoryStore::new();
        let presence = tracker(&store);
        let user = Uuid::new_v4();

        presence.mark_online(user).await;
        assert_eq!(store.get(&format!("online:{}", user)).as_deref(), Some("1"));

        presence.clear(user).await;
        assert!(store.get(&presence.key(user)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_expires_without_refresh() {
        let store = MemoryStore::new();
        let presence = tracker(&store);
        let user = Uuid::new_v4();

        presence.mark_online(user).await;
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(store.get(&presence.key(user)).is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let store = MemoryStore::new();
        store.set_available(false);
        let presence = tracker(&store);

        presence.mark_online(Uuid::new_v4()).await;
        presence.clear(Uuid::new_v4()).await;
    }
}
