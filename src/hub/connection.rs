//! Handle for one live connection

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::websocket::OutboundFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue at capacity, frame dropped for this connection
    Full,
    /// Queue already closed by unregister
    Closed,
}

pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Taken exactly once on close; dropping it ends the write task's queue
    sender: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    started: Instant,
    /// Milliseconds since `started` of the last inbound frame
    last_activity_ms: AtomicU64,
}

impl ConnectionHandle {
    /// New handle plus the receiving end of its bounded outbound queue.
    pub fn new(
        user: &AuthenticatedUser,
        queue_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: user.user_id,
            sender: Mutex::new(Some(tx)),
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        });
        (handle, rx)
    }

    fn sender(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<OutboundFrame>>> {
        self.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Non-blocking enqueue. A full queue drops the frame.
    pub fn enqueue(&self, frame: OutboundFrame) -> EnqueueOutcome {
        let guard = self.sender();
        let Some(tx) = guard.as_ref() else {
            return EnqueueOutcome::Closed;
        };

        match tx.try_send(frame) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Close the outbound queue. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        self.sender().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the peer last sent anything
    pub fn idle_for(&self) -> Duration {
        let now = self.started.elapsed();
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        now.saturating_sub(last)
    }
}
