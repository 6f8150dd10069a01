use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::{RedisConfig, RelayConfig};
use crate::hub::Hub;
use crate::metrics::RelayMetrics;
use crate::store::{BackoffConfig, ExponentialBackoff, SharedStore, StoreError};

use super::{subscription_pattern, InstanceId, RelayEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Handed to the local hub
    Delivered,
    /// Published by this instance, already fanned out locally
    SkippedOwn,
    Malformed,
}

/// Long-lived pattern subscription feeding peer broadcasts into the hub
pub struct RelaySubscriber {
    store: Arc<dyn SharedStore>,
    hub: Hub,
    pattern: String,
    instance_id: InstanceId,
    backoff: BackoffConfig,
    shutdown: CancellationToken,
}

impl RelaySubscriber {
    pub fn new(
        store: Arc<dyn SharedStore>,
        hub: Hub,
        config: &RelayConfig,
        redis: &RedisConfig,
        instance_id: InstanceId,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            hub,
            pattern: subscription_pattern(&config.channel_prefix),
            instance_id,
            backoff: BackoffConfig::from(redis),
            shutdown,
        }
    }

    /// Subscribe and relay until shutdown, reconnecting with backoff.
    pub async fn run(self) {
        tracing::info!(pattern = %self.pattern, instance_id = %self.instance_id, "Starting relay subscriber");
        let mut backoff = ExponentialBackoff::with_config(self.backoff.clone());

        loop {
            match self.subscribe_once(&mut backoff).await {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Relay subscription lost, reconnecting"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        tracing::info!("Relay subscriber stopped");
    }

    /// Returns Ok only on shutdown. A stream that ends is an error.
    async fn subscribe_once(&self, backoff: &mut ExponentialBackoff) -> Result<(), StoreError> {
        let mut messages = self.store.psubscribe(&self.pattern).await?;
        backoff.reset();
        tracing::info!(pattern = %self.pattern, "Relay subscription established");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                message = messages.next() => match message {
                    Some(message) => {
                        tracing::trace!(channel = %message.channel, "Relay message received");
                        self.handle_payload(&message.payload).await;
                    }
                    None => {
                        return Err(StoreError::Unavailable("relay stream ended".to_string()));
                    }
                },
            }
        }
    }

    pub async fn handle_payload(&self, payload: &str) -> RelayOutcome {
        let envelope: RelayEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                RelayMetrics::malformed();
                tracing::warn!(error = %e, "Failed to parse relay envelope");
                return RelayOutcome::Malformed;
            }
        };

        if envelope.origin == self.instance_id.as_str() {
            RelayMetrics::skipped_own();
            return RelayOutcome::SkippedOwn;
        }

        RelayMetrics::received();
        self.hub.relay_broadcast(envelope.into_event()).await;
        RelayOutcome::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use crate::config::HubConfig;
    use crate::hub::{BroadcastEvent, ConnectionHandle};
    use crate::store::MemoryStore;
    use crate::websocket::ServerFrame;
    use uuid::Uuid;

    fn subscriber(store: &MemoryStore, hub: Hub, id: &str) -> RelaySubscriber {
        RelaySubscriber::new(
            Arc::new(store.clone()),
            hub,
            &RelayConfig::default(),
            &RedisConfig::default(),
            InstanceId::from_config(Some(id)),
            CancellationToken::new(),
        )
    }

    fn envelope_from(origin: &str, chat: Uuid) -> String {
        let event = BroadcastEvent::new(chat, Uuid::new_v4(), &ServerFrame::Pong).unwrap();
        let envelope = RelayEnvelope::wrap(&event, &InstanceId::from_config(Some(origin))).unwrap();
        serde_json::to_string(&envelope).unwrap()
    }

    #[tokio::test]
    async fn test_own_envelopes_skipped_peer_envelopes_delivered() {
        let (hub, _task) = Hub::spawn(&HubConfig::default(), None, CancellationToken::new());
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            role: "player".to_string(),
        };
        let chat = Uuid::new_v4();
        let (handle, mut rx) = ConnectionHandle::new(&user, 8);
        hub.register(handle).await;
        hub.join_room(chat, user.user_id).await;

        let sub = subscriber(&MemoryStore::new(), hub.clone(), "gw-b");

        assert_eq!(
            sub.handle_payload(&envelope_from("gw-b", chat)).await,
            RelayOutcome::SkippedOwn
        );
        assert_eq!(
            sub.handle_payload(&envelope_from("gw-a", chat)).await,
            RelayOutcome::Delivered
        );
        assert_eq!(sub.handle_payload("{oops").await, RelayOutcome::Malformed);

        hub.barrier().await;
        assert_eq!(rx.recv().await.unwrap().to_json().unwrap(), r#"{"type":"pong"}"#);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = MemoryStore::new();
        let (hub, _task) = Hub::spawn(&HubConfig::default(), None, CancellationToken::new());
        let shutdown = CancellationToken::new();
        let sub = RelaySubscriber::new(
            Arc::new(store.clone()),
            hub,
            &RelayConfig::default(),
            &RedisConfig::default(),
            InstanceId::from_config(None),
            shutdown.clone(),
        );

        let task = tokio::spawn(sub.run());
        while store.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(store.subscriber_count(), 0);
    }
}
