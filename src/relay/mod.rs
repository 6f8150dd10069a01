//! Cross-instance relay over the shared bus.
//!
//! Every local broadcast is published on `<prefix>:<chat_id>`; one
//! subscription on `<prefix>:*` feeds peer broadcasts back into the local
//! hub as relay-origin events, which are never published again.

mod publisher;
mod subscriber;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

pub use publisher::RelayPublisher;
pub use subscriber::{RelayOutcome, RelaySubscriber};

use crate::hub::BroadcastEvent;

/// Identifies one server process on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId(Arc<str>);

impl InstanceId {
    /// The configured id, or a random one
    pub fn from_config(configured: Option<&str>) -> Self {
        match configured.filter(|s| !s.is_empty()) {
            Some(id) => Self(Arc::from(id)),
            None => Self(Arc::from(Uuid::new_v4().to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire format of one relayed broadcast
#[derive(Debug, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub origin: String,
    /// The outbound frame, embedded as JSON rather than as a string
    pub data: Box<RawValue>,
}

impl RelayEnvelope {
    pub fn wrap(event: &BroadcastEvent, origin: &InstanceId) -> Result<Self, serde_json::Error> {
        Ok(Self {
            chat_id: event.chat_id,
            sender_id: event.sender_id,
            origin: origin.to_string(),
            data: RawValue::from_string(event.payload.to_string())?,
        })
    }

    pub fn into_event(self) -> BroadcastEvent {
        BroadcastEvent {
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            payload: Arc::from(self.data.get()),
        }
    }
}

pub fn channel_for(prefix: &str, chat_id: Uuid) -> String {
    format!("{}:{}", prefix, chat_id)
}

pub fn subscription_pattern(prefix: &str) -> String {
    format!("{}:*", prefix)
}
