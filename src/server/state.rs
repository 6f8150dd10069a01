use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenValidator;
use crate::chat::ChatService;
use crate::config::Settings;
use crate::hub::Hub;
use crate::presence::PresenceTracker;
use crate::ratelimit::MessageRateLimiter;
use crate::relay::{InstanceId, RelayPublisher, RelaySubscriber};
use crate::store::SharedStore;

/// Everything a request or connection needs, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub token_validator: Arc<dyn TokenValidator>,
    pub chat: Arc<dyn ChatService>,
    pub store: Arc<dyn SharedStore>,
    pub hub: Hub,
    pub rate_limiter: Arc<MessageRateLimiter>,
    pub presence: PresenceTracker,
    pub instance_id: InstanceId,
    /// Cancelled on server shutdown; every connection lifetime is a child of it
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

impl AppState {
    /// Build the state and start the hub coordinator and relay publisher.
    /// Must be called inside a Tokio runtime.
    pub fn new(
        settings: Settings,
        token_validator: Arc<dyn TokenValidator>,
        chat: Arc<dyn ChatService>,
        store: Arc<dyn SharedStore>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let instance_id = InstanceId::from_config(settings.relay.instance_id.as_deref());

        let relay = settings.relay.enabled.then(|| {
            RelayPublisher::spawn(
                store.clone(),
                &settings.relay,
                instance_id.clone(),
                shutdown.clone(),
            )
            .0
        });
        let (hub, _) = Hub::spawn(&settings.hub, relay, shutdown.clone());

        let rate_limiter = Arc::new(MessageRateLimiter::new(
            store.clone(),
            settings.ratelimit.clone(),
        ));
        let presence = PresenceTracker::new(store.clone(), settings.presence.clone());

        tracing::info!(
            instance_id = %instance_id,
            store = store.backend(),
            relay_enabled = settings.relay.enabled,
            "Application state initialized"
        );

        Self {
            settings: Arc::new(settings),
            token_validator,
            chat,
            store,
            hub,
            rate_limiter,
            presence,
            instance_id,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Start the relay subscription; `None` when the relay is disabled.
    pub fn spawn_relay_subscriber(&self) -> Option<JoinHandle<()>> {
        if !self.settings.relay.enabled {
            return None;
        }

        let subscriber = RelaySubscriber::new(
            self.store.clone(),
            self.hub.clone(),
            &self.settings.relay,
            &self.settings.redis,
            self.instance_id.clone(),
            self.shutdown.clone(),
        );
        Some(tokio::spawn(subscriber.run()))
    }
}
