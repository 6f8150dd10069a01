use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::EnrichedMessage;

use super::CommandError;

/// Envelope of every client frame. Field presence is checked per command.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        serde_json::from_str(text).map_err(|_| CommandError::InvalidJson)
    }

    /// `chat_id`, required and a UUID
    pub fn chat_id(&self) -> Result<Uuid, CommandError> {
        let raw = self
            .chat_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CommandError::Validation("chat_id is required".to_string()))?;

        Uuid::parse_str(raw).map_err(|_| CommandError::InvalidId("chat_id".to_string()))
    }

    /// `reply_to` when present and a UUID; anything else is ignored
    pub fn reply_to(&self) -> Option<Uuid> {
        self.reply_to
            .as_deref()
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Message,
    Typing,
    Read,
    JoinRoom,
    LeaveRoom,
    Ping,
}

impl CommandKind {
    pub fn parse(kind: &str) -> Result<Self, CommandError> {
        match kind {
            "message" => Ok(CommandKind::Message),
            "typing" => Ok(CommandKind::Typing),
            "read" => Ok(CommandKind::Read),
            "join_room" => Ok(CommandKind::JoinRoom),
            "leave_room" => Ok(CommandKind::LeaveRoom),
            "ping" => Ok(CommandKind::Ping),
            other => Err(CommandError::UnknownType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Message => "message",
            CommandKind::Typing => "typing",
            CommandKind::Read => "read",
            CommandKind::JoinRoom => "join_room",
            CommandKind::LeaveRoom => "leave_room",
            CommandKind::Ping => "ping",
        }
    }
}

/// Frames sent from server to client, as `{"type": ..., "data": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    Message(EnrichedMessage),
    Typing(TypingIndicator),
    Read(ReadReceipt),
    Error(ErrorPayload),
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub chat_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub last_read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ServerFrame {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }
}

/// An item on a connection's outbound queue
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Serialized by the write task
    Raw(ServerFrame),
    /// Serialized once and shared by every recipient of a broadcast
    Serialized(Arc<str>),
}

impl OutboundFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundFrame::Raw(frame) => serde_json::to_string(frame),
            OutboundFrame::Serialized(text) => Ok(text.to_string()),
        }
    }
}
