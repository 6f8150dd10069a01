//! Registry state: user → connections and room → joined users.
//!
//! Invariants kept by every mutation:
//! - a user key exists only while it has at least one connection
//! - a room key exists only while at least one user is joined
//! - a user with no connection is in no room

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::websocket::OutboundFrame;

use super::connection::{ConnectionHandle, EnqueueOutcome};

type Connections = SmallVec<[Arc<ConnectionHandle>; 2]>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl FanOutReport {
    fn record(&mut self, outcome: EnqueueOutcome) {
        match outcome {
            EnqueueOutcome::Queued => self.delivered += 1,
            EnqueueOutcome::Full | EnqueueOutcome::Closed => self.dropped += 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Unregistered {
    /// The connection was in the registry
    pub removed: bool,
    /// It was the user's last connection
    pub last_for_user: bool,
    /// Rooms the user was removed from by the cascade
    pub rooms_left: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub users: usize,
    pub rooms: usize,
    pub room_sizes: HashMap<Uuid, usize>,
}

#[derive(Default)]
pub struct HubState {
    connections: HashMap<Uuid, Connections>,
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

impl HubState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when this connection was already registered.
    pub fn register(&mut self, handle: Arc<ConnectionHandle>) -> bool {
        let conns = self.connections.entry(handle.user_id).or_default();
        if conns.iter().any(|c| c.id == handle.id) {
            return false;
        }
        conns.push(handle);
        true
    }

    /// Remove a connection and close its queue. The last connection of a
    /// user also removes the user from every room.
    pub fn unregister(&mut self, handle: &ConnectionHandle) -> Unregistered {
        handle.close();

        let Some(conns) = self.connections.get_mut(&handle.user_id) else {
            return Unregistered::default();
        };

        let before = conns.len();
        conns.retain(|c| c.id != handle.id);
        let removed = conns.len() != before;

        if !conns.is_empty() {
            return Unregistered {
                removed,
                ..Default::default()
            };
        }

        self.connections.remove(&handle.user_id);
        let rooms_left = self.remove_user_from_rooms(handle.user_id);

        Unregistered {
            removed,
            last_for_user: true,
            rooms_left,
        }
    }

    fn remove_user_from_rooms(&mut self, user_id: Uuid) -> usize {
        let mut left = 0;
        self.rooms.retain(|_, members| {
            if members.remove(&user_id) {
                left += 1;
            }
            !members.is_empty()
        });
        left
    }

    /// Join a room. A user with no live connection is not joined.
    pub fn join(&mut self, chat_id: Uuid, user_id: Uuid) -> bool {
        if !self.connections.contains_key(&user_id) {
            return false;
        }
        self.rooms.entry(chat_id).or_default().insert(user_id)
    }

    pub fn leave(&mut self, chat_id: Uuid, user_id: Uuid) -> bool {
        let Some(members) = self.rooms.get_mut(&chat_id) else {
            return false;
        };
        let removed = members.remove(&user_id);
        if members.is_empty() {
            self.rooms.remove(&chat_id);
        }
        removed
    }

    /// Enqueue `frame` on every connection of every user joined to `chat_id`.
    pub fn fan_out(&self, chat_id: Uuid, frame: &OutboundFrame) -> FanOutReport {
        let mut report = FanOutReport::default();
        let Some(members) = self.rooms.get(&chat_id) else {
            return report;
        };

        for user_id in members {
            for conn in self.connections.get(user_id).into_iter().flatten() {
                report.record(conn.enqueue(frame.clone()));
            }
        }
        report
    }

    pub fn send_to_user(&self, user_id: Uuid, frame: &OutboundFrame) -> FanOutReport {
        let mut report = FanOutReport::default();
        for conn in self.connections.get(&user_id).into_iter().flatten() {
            report.record(conn.enqueue(frame.clone()));
        }
        report
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.connections.contains_key(&user_id)
    }

    pub fn is_joined(&self, chat_id: Uuid, user_id: Uuid) -> bool {
        self.rooms
            .get(&chat_id)
            .is_some_and(|members| members.contains(&user_id))
    }

    pub fn room_members(&self, chat_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .get(&chat_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.values().map(|c| c.len()).sum(),
            users: self.connections.len(),
            rooms: self.rooms.len(),
            room_sizes: self
                .rooms
                .iter()
                .map(|(chat, members)| (*chat, members.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatedUser;
    use crate::websocket::ServerFrame;
    use tokio::sync::mpsc;

    fn connect(
        state: &mut HubState,
        user_id: Uuid,
        queue: usize,
    ) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundFrame>) {
        let user = AuthenticatedUser {
            user_id,
            role: "player".to_string(),
        };
        let (handle, rx) = ConnectionHandle::new(&user, queue);
        state.register(handle.clone());
        (handle, rx)
    }

    fn pong() -> OutboundFrame {
        OutboundFrame::Raw(ServerFrame::Pong)
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut state = HubState::new();
        let (handle, _rx) = connect(&mut state, Uuid::new_v4(), 4);

        assert!(!state.register(handle.clone()));
        assert_eq!(state.stats().connections, 1);
    }

    #[test]
    fn test_room_isolation() {
        let mut state = HubState::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let chat = Uuid::new_v4();

        let (_a1, mut a1_rx) = connect(&mut state, a, 4);
        let (_a2, mut a2_rx) = connect(&mut state, a, 4);
        let (_b1, mut b1_rx) = connect(&mut state, b, 4);

        state.join(chat, a);
        let report = state.fan_out(chat, &pong());

        assert_eq!(report, FanOutReport { delivered: 2, dropped: 0 });
        assert!(a1_rx.try_recv().is_ok());
        assert!(a2_rx.try_recv().is_ok());
        assert!(b1_rx.try_recv().is_err());
    }

    #[test]
    fn test_last_connection_cascades_room_removal() {
        let mut state = HubState::new();
        let user = Uuid::new_v4();
        let (chat1, chat2) = (Uuid::new_v4(), Uuid::new_v4());

        let (c1, _rx1) = connect(&mut state, user, 4);
        let (c2, _rx2) = connect(&mut state, user, 4);
        state.join(chat1, user);
        state.join(chat2, user);

        let first = state.unregister(&c1);
        assert!(first.removed && !first.last_for_user);
        assert!(c1.is_closed());
        assert!(state.is_joined(chat1, user));

        let last = state.unregister(&c2);
        assert!(last.last_for_user);
        assert_eq!(last.rooms_left, 2);
        assert!(!state.is_online(user));
        assert!(!state.is_joined(chat1, user) && !state.is_joined(chat2, user));
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn test_cascade_keeps_rooms_with_other_members() {
        let mut state = HubState::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let chat = Uuid::new_v4();

        let (a1, _ra) = connect(&mut state, a, 4);
        let (_b1, _rb) = connect(&mut state, b, 4);
        state.join(chat, a);
        state.join(chat, b);

        state.unregister(&a1);
        assert_eq!(state.room_members(chat), vec![b]);
    }

    #[test]
    fn test_unregister_twice_is_harmless() {
        let mut state = HubState::new();
        let (handle, _rx) = connect(&mut state, Uuid::new_v4(), 4);

        assert!(state.unregister(&handle).removed);
        assert_eq!(state.unregister(&handle), Unregistered::default());
    }

    #[test]
    fn test_join_leave_noops_and_empty_room_removed() {
        let mut state = HubState::new();
        let user = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let (_h, _rx) = connect(&mut state, user, 4);

        assert!(state.join(chat, user));
        assert!(!state.join(chat, user));
        assert!(state.leave(chat, user));
        assert!(!state.leave(chat, user));
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn test_offline_user_cannot_join() {
        let mut state = HubState::new();
        assert!(!state.join(Uuid::new_v4(), Uuid::new_v4()));
        assert_eq!(state.room_count(), 0);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let mut state = HubState::new();
        let user = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let (_h, mut rx) = connect(&mut state, user, 256);
        state.join(chat, user);

        for _ in 0..256 {
            assert_eq!(state.fan_out(chat, &pong()).delivered, 1);
        }
        let report = state.fan_out(chat, &pong());
        assert_eq!(report, FanOutReport { delivered: 0, dropped: 1 });

        let mut drained = 0;
        while rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, 256);
    }

    #[test]
    fn test_send_to_user_reaches_all_devices() {
        let mut state = HubState::new();
        let user = Uuid::new_v4();
        let (_h1, mut rx1) = connect(&mut state, user, 4);
        let (_h2, mut rx2) = connect(&mut state, user, 4);

        assert_eq!(state.send_to_user(user, &pong()).delivered, 2);
        assert!(rx1.try_recv().is_ok() && rx2.try_recv().is_ok());
        assert_eq!(state.send_to_user(Uuid::new_v4(), &pong()).delivered, 0);
    }
}
