use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::hub::BroadcastEvent;
use crate::metrics::RelayMetrics;
use crate::store::SharedStore;

use super::{channel_for, InstanceId, RelayEnvelope};

/// Queues local broadcasts for a background task that publishes them,
/// so the hub coordinator never waits on the bus.
#[derive(Clone)]
pub struct RelayPublisher {
    queue: mpsc::Sender<BroadcastEvent>,
}

impl RelayPublisher {
    pub fn spawn(
        store: Arc<dyn SharedStore>,
        config: &RelayConfig,
        instance_id: InstanceId,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (queue, rx) = mpsc::channel(config.publish_buffer.max(1));
        let task = tokio::spawn(run(
            store,
            config.channel_prefix.clone(),
            instance_id,
            rx,
            shutdown,
        ));
        (Self { queue }, task)
    }

    /// Queue a broadcast for publishing. Drops it when the queue is full.
    pub fn publish(&self, event: &BroadcastEvent) {
        match self.queue.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                RelayMetrics::publish_dropped();
                tracing::warn!(chat_id = %event.chat_id, "Relay publish queue full, dropping broadcast");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                RelayMetrics::publish_dropped();
            }
        }
    }
}

async fn run(
    store: Arc<dyn SharedStore>,
    prefix: String,
    instance_id: InstanceId,
    mut rx: mpsc::Receiver<BroadcastEvent>,
    shutdown: CancellationToken,
) {
    tracing::info!(instance_id = %instance_id, "Relay publisher started");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let payload = match RelayEnvelope::wrap(&event, &instance_id)
            .and_then(|envelope| serde_json::to_string(&envelope))
        {
            Ok(payload) => payload,
            Err(e) => {
                RelayMetrics::publish_failed();
                tracing::error!(error = %e, chat_id = %event.chat_id, "Failed to encode relay envelope");
                continue;
            }
        };

        let channel = channel_for(&prefix, event.chat_id);
        match store.publish(&channel, &payload).await {
            Ok(()) => RelayMetrics::published(),
            Err(e) => {
                // Peers miss this broadcast; local delivery already happened
                RelayMetrics::publish_failed();
                tracing::warn!(error = %e, channel = %channel, "Relay publish failed");
            }
        }
    }

    tracing::info!("Relay publisher stopped");
}
