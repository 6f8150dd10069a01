//! Dispatch of decoded client commands.

use uuid::Uuid;

use crate::hub::{BroadcastEvent, ConnectionHandle};
use crate::server::AppState;

use super::message::{CommandKind, InboundFrame, OutboundFrame, ReadReceipt, ServerFrame, TypingIndicator};
use super::CommandError;

/// Run one command for `conn`. Errors are for the caller to report back
/// to this connection only.
pub async fn dispatch(
    state: &AppState,
    conn: &ConnectionHandle,
    kind: CommandKind,
    frame: InboundFrame,
) -> Result<(), CommandError> {
    match kind {
        CommandKind::Message => handle_message(state, conn, frame).await,
        CommandKind::Typing => handle_typing(state, conn, &frame).await,
        CommandKind::Read => handle_read(state, conn, &frame).await,
        CommandKind::JoinRoom => handle_join(state, conn, &frame).await,
        CommandKind::LeaveRoom => {
            let chat_id = frame.chat_id()?;
            state.hub.leave_room(chat_id, conn.user_id).await;
            Ok(())
        }
        CommandKind::Ping => {
            conn.enqueue(OutboundFrame::Raw(ServerFrame::Pong));
            Ok(())
        }
    }
}

#[tracing::instrument(
    name = "ws.message",
    skip_all,
    fields(connection_id = %conn.id, user_id = %conn.user_id)
)]
async fn handle_message(
    state: &AppState,
    conn: &ConnectionHandle,
    frame: InboundFrame,
) -> Result<(), CommandError> {
    // Counted before validation, so malformed messages use up the budget too
    if !state.rate_limiter.check(conn.user_id).await.is_allowed() {
        return Err(CommandError::RateLimited(state.settings.ratelimit.max_messages));
    }

    if frame.chat_id.as_deref().is_none_or(str::is_empty) {
        return Err(CommandError::Validation("chat_id is required".to_string()));
    }
    let content = match frame.content.as_deref() {
        Some(content) if !content.is_empty() => content,
        _ => return Err(CommandError::Validation("content is required".to_string())),
    };
    let chat_id = frame.chat_id()?;

    let mut message = state
        .chat
        .send_message(conn.user_id, chat_id, content, frame.reply_to())
        .await
        .inspect_err(|e| {
            if e.code() == "INTERNAL_ERROR" {
                tracing::error!(error = %e, chat_id = %chat_id, "Failed to send message");
            }
        })?;
    message.client_id = frame.client_id;

    broadcast(state, chat_id, conn.user_id, ServerFrame::Message(message)).await
}

async fn handle_typing(
    state: &AppState,
    conn: &ConnectionHandle,
    frame: &InboundFrame,
) -> Result<(), CommandError> {
    let chat_id = frame.chat_id()?;
    let indicator = TypingIndicator {
        chat_id,
        user_id: conn.user_id,
    };
    broadcast(state, chat_id, conn.user_id, ServerFrame::Typing(indicator)).await
}

async fn handle_read(
    state: &AppState,
    conn: &ConnectionHandle,
    frame: &InboundFrame,
) -> Result<(), CommandError> {
    let chat_id = frame.chat_id()?;
    let last_read_at = state
        .chat
        .mark_read(conn.user_id, chat_id)
        .await
        .inspect_err(|e| {
            if e.code() == "INTERNAL_ERROR" {
                tracing::error!(error = %e, chat_id = %chat_id, "Failed to mark chat read");
            }
        })?;

    let receipt = ReadReceipt {
        chat_id,
        user_id: conn.user_id,
        last_read_at,
    };
    broadcast(state, chat_id, conn.user_id, ServerFrame::Read(receipt)).await
}

async fn handle_join(
    state: &AppState,
    conn: &ConnectionHandle,
    frame: &InboundFrame,
) -> Result<(), CommandError> {
    let chat_id = frame.chat_id()?;

    match state.chat.is_member(conn.user_id, chat_id).await {
        Ok(true) => {}
        Ok(false) => return Err(CommandError::Forbidden),
        Err(e) => {
            tracing::error!(error = %e, chat_id = %chat_id, "Membership check failed");
            return Err(e.into());
        }
    }

    state.hub.join_room(chat_id, conn.user_id).await;
    Ok(())
}

async fn broadcast(
    state: &AppState,
    chat_id: Uuid,
    sender_id: Uuid,
    frame: ServerFrame,
) -> Result<(), CommandError> {
    let event = BroadcastEvent::new(chat_id, sender_id, &frame)
        .map_err(|e| CommandError::Internal(e.to_string()))?;
    state.hub.broadcast(event).await;
    Ok(())
}
