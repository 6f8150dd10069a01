//! Connection hub.
//!
//! One coordinator task drains a queue of [`HubCommand`]s and applies
//! register, unregister, join, leave and broadcast in submission order.
//! Point lookups (`send_to_user`, `is_online`, stats) read the same state
//! through its `RwLock` without going through the queue.

mod connection;
mod registry;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use connection::{ConnectionHandle, EnqueueOutcome};
pub use registry::{FanOutReport, HubState, HubStats, Unregistered};

use crate::config::HubConfig;
use crate::metrics::FanOutMetrics;
use crate::relay::RelayPublisher;
use crate::websocket::{OutboundFrame, ServerFrame};

/// Where a broadcast came from. Only local broadcasts go out on the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Relay,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Relay => "relay",
        }
    }
}

/// One room broadcast with its frame already serialized
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub payload: Arc<str>,
}

impl BroadcastEvent {
    pub fn new(chat_id: Uuid, sender_id: Uuid, frame: &ServerFrame) -> Result<Self, serde_json::Error> {
        Ok(Self {
            chat_id,
            sender_id,
            payload: Arc::from(serde_json::to_string(frame)?),
        })
    }
}

pub enum HubCommand {
    Register(Arc<ConnectionHandle>),
    Unregister(Arc<ConnectionHandle>),
    JoinRoom { chat_id: Uuid, user_id: Uuid },
    LeaveRoom { chat_id: Uuid, user_id: Uuid },
    Broadcast { event: BroadcastEvent, origin: Origin },
    /// Acknowledged once every earlier command has been applied
    Barrier(oneshot::Sender<()>),
}

/// Cloneable handle to the coordinator
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    state: Arc<RwLock<HubState>>,
}

impl Hub {
    /// Start the coordinator. It stops on `shutdown` or when every `Hub` clone is dropped.
    pub fn spawn(
        config: &HubConfig,
        relay: Option<RelayPublisher>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(config.command_buffer.max(1));
        let state = Arc::new(RwLock::new(HubState::new()));

        let coordinator = Coordinator {
            state: state.clone(),
            relay,
        };
        let task = tokio::spawn(coordinator.run(rx, shutdown));

        (Self { commands, state }, task)
    }

    async fn submit(&self, command: HubCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!("Hub coordinator stopped, command discarded");
        }
    }

    pub async fn register(&self, handle: Arc<ConnectionHandle>) {
        self.submit(HubCommand::Register(handle)).await;
    }

    /// Applied directly to the shared state when the coordinator has
    /// already stopped, so cleanup during shutdown is not lost.
    pub async fn unregister(&self, handle: Arc<ConnectionHandle>) {
        if let Err(mpsc::error::SendError(HubCommand::Unregister(handle))) =
            self.commands.send(HubCommand::Unregister(handle)).await
        {
            self.state.write().await.unregister(&handle);
        }
    }

    pub async fn join_room(&self, chat_id: Uuid, user_id: Uuid) {
        self.submit(HubCommand::JoinRoom { chat_id, user_id }).await;
    }

    pub async fn leave_room(&self, chat_id: Uuid, user_id: Uuid) {
        self.submit(HubCommand::LeaveRoom { chat_id, user_id }).await;
    }

    /// Fan out locally and mirror to peer instances
    pub async fn broadcast(&self, event: BroadcastEvent) {
        self.submit(HubCommand::Broadcast {
            event,
            origin: Origin::Local,
        })
        .await;
    }

    /// Fan out locally only; used for events received from the relay
    pub async fn relay_broadcast(&self, event: BroadcastEvent) {
        self.submit(HubCommand::Broadcast {
            event,
            origin: Origin::Relay,
        })
        .await;
    }

    /// Wait until every command submitted before this call has been applied.
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        self.submit(HubCommand::Barrier(tx)).await;
        let _ = rx.await;
    }

    pub async fn send_to_user(&self, user_id: Uuid, frame: ServerFrame) -> FanOutReport {
        let report = self
            .state
            .read()
            .await
            .send_to_user(user_id, &OutboundFrame::Raw(frame));
        FanOutMetrics::direct(report.delivered, report.dropped);
        report
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.state.read().await.is_online(user_id)
    }

    pub async fn room_members(&self, chat_id: Uuid) -> Vec<Uuid> {
        self.state.read().await.room_members(chat_id)
    }

    pub async fn stats(&self) -> HubStats {
        self.state.read().await.stats()
    }
}

struct Coordinator {
    state: Arc<RwLock<HubState>>,
    relay: Option<RelayPublisher>,
}

impl Coordinator {
    async fn run(self, mut rx: mpsc::Receiver<HubCommand>, shutdown: CancellationToken) {
        tracing::info!("Hub coordinator started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.apply(command).await,
                    None => break,
                },
            }
        }

        // Commands already queued still land; later senders see a closed channel
        rx.close();
        while let Some(command) = rx.recv().await {
            self.apply(command).await;
        }

        tracing::info!("Hub coordinator stopped");
    }

    async fn apply(&self, command: HubCommand) {
        match command {
            HubCommand::Register(handle) => {
                let added = self.state.write().await.register(handle.clone());
                tracing::debug!(
                    connection_id = %handle.id,
                    user_id = %handle.user_id,
                    added,
                    "Connection registered"
                );
            }
            HubCommand::Unregister(handle) => {
                let result = {
                    let mut state = self.state.write().await;
                    let result = state.unregister(&handle);
                    FanOutMetrics::rooms(state.room_count());
                    result
                };
                tracing::debug!(
                    connection_id = %handle.id,
                    user_id = %handle.user_id,
                    last_for_user = result.last_for_user,
                    rooms_left = result.rooms_left,
                    "Connection unregistered"
                );
            }
            HubCommand::JoinRoom { chat_id, user_id } => {
                let mut state = self.state.write().await;
                if state.join(chat_id, user_id) {
                    tracing::debug!(chat_id = %chat_id, user_id = %user_id, "Joined room");
                }
                FanOutMetrics::rooms(state.room_count());
            }
            HubCommand::LeaveRoom { chat_id, user_id } => {
                let mut state = self.state.write().await;
                if state.leave(chat_id, user_id) {
                    tracing::debug!(chat_id = %chat_id, user_id = %user_id, "Left room");
                }
                FanOutMetrics::rooms(state.room_count());
            }
            HubCommand::Broadcast { event, origin } => {
                let frame = OutboundFrame::Serialized(event.payload.clone());
                let report = self.state.read().await.fan_out(event.chat_id, &frame);
                FanOutMetrics::broadcast(origin.as_str(), report.delivered, report.dropped);

                if report.dropped > 0 {
                    tracing::debug!(
                        chat_id = %event.chat_id,
                        dropped = report.dropped,
                        "Dropped frames for slow connections"
                    );
                }

                if origin == Origin::Local {
                    if let Some(relay) = &self.relay {
                        relay.publish(&event);
                    }
                }
            }
            HubCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;

    fn spawn_hub() -> Hub {
        Hub::spawn(&HubConfig::default(), None, CancellationToken::new()).0
    }

    fn user(user_id: Uuid) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id,
            role: "player".to_string(),
        }
    }

    #[tokio::test]
    async fn test_commands_apply_in_order() {
        let hub = spawn_hub();
        let user_id = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let (handle, mut rx) = ConnectionHandle::new(&user(user_id), 8);

        hub.register(handle.clone()).await;
        hub.join_room(chat, user_id).await;
        let event = BroadcastEvent::new(chat, user_id, &ServerFrame::Pong).unwrap();
        hub.broadcast(event).await;
        hub.barrier().await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.to_json().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(hub.room_members(chat).await, vec![user_id]);
    }

    #[tokio::test]
    async fn test_broadcast_after_unregister_reaches_nobody() {
        let hub = spawn_hub();
        let user_id = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let (handle, mut rx) = ConnectionHandle::new(&user(user_id), 8);

        hub.register(handle.clone()).await;
        hub.join_room(chat, user_id).await;
        hub.unregister(handle.clone()).await;
        hub.broadcast(BroadcastEvent::new(chat, user_id, &ServerFrame::Pong).unwrap())
            .await;
        hub.barrier().await;

        assert!(rx.recv().await.is_none());
        assert!(!hub.is_online(user_id).await);
        assert_eq!(hub.stats().await.rooms, 0);
    }

    #[tokio::test]
    async fn test_send_to_user_direct_path() {
        let hub = spawn_hub();
        let user_id = Uuid::new_v4();
        let (handle, mut rx) = ConnectionHandle::new(&user(user_id), 8);

        hub.register(handle).await;
        hub.barrier().await;

        assert!(hub.is_online(user_id).await);
        let report = hub.send_to_user(user_id, ServerFrame::Pong).await;
        assert_eq!(report.delivered, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_coordinator_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let (hub, task) = Hub::spawn(&HubConfig::default(), None, shutdown.clone());

        shutdown.cancel();
        task.await.unwrap();

        // Commands after shutdown are discarded without panicking
        hub.join_room(Uuid::new_v4(), Uuid::new_v4()).await;
    }

    #[tokio::test]
    async fn test_unregister_lands_after_shutdown() {
        let shutdown = CancellationToken::new();
        let (hub, task) = Hub::spawn(&HubConfig::default(), None, shutdown.clone());
        let user_id = Uuid::new_v4();
        let (handle, _rx) = ConnectionHandle::new(&user(user_id), 8);

        hub.register(handle.clone()).await;
        hub.barrier().await;
        shutdown.cancel();
        task.await.unwrap();

        hub.unregister(handle.clone()).await;
        hub.barrier().await;
        assert!(!hub.is_online(user_id).await);
        assert!(handle.is_closed());
    }
}
