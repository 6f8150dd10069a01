use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::config::DatabaseConfig;

use super::{preview, validate_content, ChatError, ChatService, EnrichedMessage, SenderBrief};

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    content: String,
    reply_to_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SenderRow {
    id: Uuid,
    first_name: Option<String>,
    last_name: Option<String>,
    avatar_url: Option<String>,
}

impl From<SenderRow> for SenderBrief {
    fn from(row: SenderRow) -> Self {
        Self {
            id: row.id,
            first_name: row.first_name.unwrap_or_default(),
            last_name: row.last_name,
            avatar_url: row.avatar_url,
        }
    }
}

pub struct PgChatService {
    pool: PgPool,
    max_content_length: usize,
}

impl PgChatService {
    /// The pool connects on first use, so startup does not wait on the database.
    pub fn connect_lazy(config: &DatabaseConfig, max_content_length: usize) -> Result<Self, ChatError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect_lazy(&config.url)?;

        tracing::info!(max_connections = config.max_connections, "PostgreSQL pool configured");

        Ok(Self::with_pool(pool, max_content_length))
    }

    pub fn with_pool(pool: PgPool, max_content_length: usize) -> Self {
        Self {
            pool,
            max_content_length,
        }
    }

    async fn require_member(&self, user_id: Uuid, chat_id: Uuid) -> Result<(), ChatError> {
        if self.is_member(user_id, chat_id).await? {
            Ok(())
        } else {
            Err(ChatError::Forbidden)
        }
    }

    async fn sender_brief(&self, user_id: Uuid) -> SenderBrief {
        let row = sqlx::query_as::<_, SenderRow>(
            "SELECT id, first_name, last_name, avatar_url FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some(row)) => row.into(),
            Ok(None) => SenderBrief::anonymous(user_id),
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "Failed to load sender info");
                SenderBrief::anonymous(user_id)
            }
        }
    }
}

#[async_trait]
impl ChatService for PgChatService {
    async fn is_member(&self, user_id: Uuid, chat_id: Uuid) -> Result<bool, ChatError> {
        let is_member: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM chats c
                WHERE c.id = $1 AND (
                    (c.chat_type = 'personal' AND (c.user1_id = $2 OR c.user2_id = $2))
                    OR (c.chat_type = 'community' AND EXISTS (
                        SELECT 1 FROM community_members cm
                        WHERE cm.community_id = c.community_id AND cm.user_id = $2
                    ))
                    OR (c.chat_type = 'event' AND EXISTS (
                        SELECT 1 FROM event_participants ep
                        WHERE ep.event_id = c.event_id AND ep.user_id = $2
                    ))
                )
            )
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(is_member)
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

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (chat_id, sender_id, content, reply_to_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, chat_id, sender_id, content, reply_to_id, created_at
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(content)
        .bind(reply_to)
        .fetch_one(&self.pool)
        .await?;

        // The message is stored; a stale chat-list preview is not worth failing over
        if let Err(e) = sqlx::query(
            "UPDATE chats SET last_message_at = $1, last_message_preview = $2 WHERE id = $3",
        )
        .bind(row.created_at)
        .bind(preview(content))
        .bind(chat_id)
        .execute(&self.pool)
        .await
        {
            tracing::warn!(error = %e, chat_id = %chat_id, "Failed to update chat preview");
        }

        let sender = self.sender_brief(row.sender_id).await;

        Ok(EnrichedMessage {
            id: row.id,
            chat_id: row.chat_id,
            sender,
            content: row.content,
            reply_to: row.reply_to_id,
            created_at: row.created_at,
            client_id: None,
        })
    }

    async fn mark_read(&self, user_id: Uuid, chat_id: Uuid) -> Result<DateTime<Utc>, ChatError> {
        self.require_member(user_id, chat_id).await?;

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO chat_read_status (chat_id, user_id, last_read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (chat_id, user_id) DO UPDATE SET last_read_at = EXCLUDED.last_read_at
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(now)
    }

    async fn ping(&self) -> Result<(), ChatError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect() {
        let service = PgChatService::connect_lazy(&DatabaseConfig::default(), 4000);
        assert!(service.is_ok());
    }

    #[test]
    fn test_sender_row_nulls() {
        let id = Uuid::new_v4();
        let brief: SenderBrief = SenderRow {
            id,
            first_name: None,
            last_name: Some("Smith".into()),
            avatar_url: None,
        }
        .into();
        assert_eq!(brief.first_name, "");
        assert_eq!(brief.last_name.as_deref(), Some("Smith"));
    }
}
