//! Chat persistence collaborator.
//!
//! The gateway only needs membership checks, message creation and read
//! markers. `PgChatService` talks to the application database;
//! `InMemoryChatService` keeps everything in process for tests.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryChatService;
pub use postgres::PgChatService;

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("You are not a member of this chat")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Forbidden => "FORBIDDEN",
            ChatError::Validation(_) => "VALIDATION_ERROR",
            ChatError::NotFound(_) => "NOT_FOUND",
            ChatError::Database(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderBrief {
    pub id: Uuid,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl SenderBrief {
    pub fn anonymous(id: Uuid) -> Self {
        Self {
            id,
            first_name: String::new(),
            last_name: None,
            avatar_url: None,
        }
    }
}

/// A stored message with its sender resolved, as broadcast to the room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender: SenderBrief,
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Echoed back so the sender's device can match its optimistic copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn is_member(&self, user_id: Uuid, chat_id: Uuid) -> Result<bool, ChatError>;

    /// Store a message from a member and return it enriched with sender info.
    async fn send_message(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        content: &str,
        reply_to: Option<Uuid>,
    ) -> Result<EnrichedMessage, ChatError>;

    /// Record that the member has read the chat; returns the stored read time.
    async fn mark_read(&self, user_id: Uuid, chat_id: Uuid) -> Result<DateTime<Utc>, ChatError>;

    async fn ping(&self) -> Result<(), ChatError> {
        Ok(())
    }
}

pub fn validate_content(content: &str, max_chars: usize) -> Result<(), ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }
    if content.chars().count() > max_chars {
        return Err(ChatError::Validation(format!(
            "Message content too long (max {} characters)",
            max_chars
        )));
    }
    Ok(())
}

/// Last-message preview shown in chat lists
pub fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}
