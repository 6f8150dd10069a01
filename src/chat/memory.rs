use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{validate_content, ChatError, ChatService, EnrichedMessage, SenderBrief};

/// In-process chat store with the same contract as the database service
pub struct InMemoryChatService {
    members: DashMap<Uuid, HashSet<Uuid>>,
    profiles: DashMap<Uuid, SenderBrief>,
    messages: DashMap<Uuid, Vec<EnrichedMessage>>,
    read_status: DashMap<(Uuid, Uuid), DateTime<Utc>>,
    max_content_length: usize,
    failing: AtomicBool,
}

impl InMemoryChatService {
    pub fn new(max_content_length: usize) -> Self {
        Self {
            members: DashMap::new(),
            profiles: DashMap::new(),
            messages: DashMap::new(),
            read_status: DashMap::new(),
            max_content_length,
            failing: AtomicBool::new(false),
        }
    }

    pub fn add_member(&self, chat_id: Uuid, user_id: Uuid) {
        self.members.entry(chat_id).or_default().insert(user_id);
    }

    pub fn set_profile(&self, profile: SenderBrief) {
        self.profiles.insert(profile.id, profile);
    }

    /// Make every call fail as if the database were down
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn messages(&self, chat_id: Uuid) -> Vec<EnrichedMessage> {
        self.messages
            .get(&chat_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn last_read(&self, user_id: Uuid, chat_id: Uuid) -> Option<DateTime<Utc>> {
        self.read_status.get(&(chat_id, user_id)).map(|t| *t)
    }

    fn check_up(&self) -> Result<(), ChatError> {
        if self.failing.load(Ordering::Acquire) {
            Err(ChatError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    async fn require_member(&self, user_id: Uuid, chat_id: Uuid) -> Result<(), ChatError> {
        if self.is_member(user_id, chat_id).await? {
            Ok(())
        } else {
            Err(ChatError::Forbidden)
        }
    }
}

impl Default for InMemoryChatService {
    fn default() -> Self {
        Self::new(4000)
    }
}

#[async_trait]
impl ChatService for InMemoryChatService {
    async fn is_member(&self, user_id: Uuid, chat_id: Uuid) -> Result<bool, ChatError> {
        self.check_up()?;
        Ok(self
            .members
            .get(&chat_id)
            .is_some_and(|m| m.contains(&user_id)))
    }

    async fn send_message(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        content: &str,
        reply_to: Option<Uuid>,
    ) -> Result<EnrichedMessage, ChatError> {
        self.require_member(user_id, chat_id).await?;
        validate_content(content, self.max_content_length)?;

        let sender = self
            .profiles
            .get(&user_id)
            .map(|p| p.clone())
            .unwrap_or_else(|| SenderBrief::anonymous(user_id));

        let message = EnrichedMessage {
            id: Uuid::new_v4(),
            chat_id,
            sender,
            content: content.to_string(),
            reply_to,
            created_at: Utc::now(),
            client_id: None,
        };
        self.messages
            .entry(chat_id)
            .or_default()
            .push(message.clone());

        Ok(message)
    }

    async fn mark_read(&self, user_id: Uuid, chat_id: Uuid) -> Result<DateTime<Utc>, ChatError> {
        self.require_member(user_id, chat_id).await?;
        let now = Utc::now();
        self.read_status.insert((chat_id, user_id), now);
        Ok(now)
    }

    async fn ping(&self) -> Result<(), ChatError> {
        self.check_up()
    }
}
