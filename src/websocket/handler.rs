use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthError, AuthenticatedUser};
use crate::error::AppError;
use crate::hub::ConnectionHandle;
use crate::metrics::{ConnectionMetrics, FrameMetrics};
use crate::server::AppState;

use super::commands::dispatch;
use super::message::{CommandKind, InboundFrame, OutboundFrame, ServerFrame};
use super::CommandError;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("write timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// WebSocket upgrade handler.
///
/// The token is checked before the upgrade request itself, so an
/// unauthenticated client gets a JSON 401 and no socket is ever opened.
/// Inbound messages are capped at `websocket.max_frame_size` bytes; an
/// oversized frame is a read error and ends the connection.
#[tracing::instrument(
    name = "ws.upgrade",
    skip_all,
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, AppError> {
    let user = authenticate(&state, &query, &headers).inspect_err(|e| {
        ConnectionMetrics::handshake_rejected();
        tracing::warn!(error = %e, "WebSocket handshake rejected");
    })?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    tracing::info!(user_id = %user.user_id, "WebSocket upgrade accepted");

    let max_size = state.settings.websocket.max_frame_size;
    Ok(ws
        .max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            run_session(state, user, stream, sink).await;
        }))
}

fn authenticate(
    state: &AppState,
    query: &WsQuery,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, AuthError> {
    let token = extract_token(query, headers).ok_or(AuthError::MissingToken)?;
    state.token_validator.validate(&token)
}

/// Query parameter first, then `Authorization: Bearer`
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Drive one authenticated connection until either side ends it.
///
/// Generic over the transport halves so it can run on anything that
/// yields and accepts WebSocket messages.
#[tracing::instrument(
    name = "ws.connection",
    skip_all,
    fields(user_id = %user.user_id, otel.kind = "server")
)]
pub async fn run_session<St, Si, E>(state: AppState, user: AuthenticatedUser, stream: St, sink: Si)
where
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
{
    let started = std::time::Instant::now();
    let (handle, outbound) =
        ConnectionHandle::new(&user, state.settings.websocket.outbound_queue_size);
    handle.touch();

    state.hub.register(handle.clone()).await;
    state.presence.mark_online(user.user_id).await;
    ConnectionMetrics::opened();

    tracing::info!(
        connection_id = %handle.id,
        user_id = %user.user_id,
        role = %user.role,
        "WebSocket connection established"
    );

    let lifetime = state.shutdown.child_token();

    let write_task = tokio::spawn(write_loop(
        sink,
        outbound,
        handle.clone(),
        state.clone(),
        lifetime.clone(),
    ));
    let read_task = tokio::spawn(read_loop(stream, handle.clone(), state.clone(), lifetime));

    let (write_result, read_result) = tokio::join!(write_task, read_task);

    if let Err(e) = &read_result {
        tracing::error!(connection_id = %handle.id, error = %e, "Read task panicked");
    }
    match write_result {
        Ok(mut sink) => {
            let timeout = state.settings.websocket.write_timeout();
            let _ = tokio::time::timeout(timeout, sink.close()).await;
        }
        Err(e) => tracing::error!(connection_id = %handle.id, error = %e, "Write task panicked"),
    }

    state.hub.unregister(handle.clone()).await;
    state.hub.barrier().await;
    if !state.hub.is_online(user.user_id).await {
        state.presence.clear(user.user_id).await;
    }

    let duration = started.elapsed().as_secs_f64();
    ConnectionMetrics::closed(duration);

    tracing::info!(
        connection_id = %handle.id,
        user_id = %user.user_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Drains the outbound queue and runs the keepalive probe. Returns the
/// sink so the session can close it after both tasks are done.
async fn write_loop<Si>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    handle: Arc<ConnectionHandle>,
    state: AppState,
    lifetime: CancellationToken,
) -> Si
where
    Si: Sink<Message> + Unpin + Send,
    Si::Error: Display,
{
    let _cancel_on_exit = lifetime.clone().drop_guard();
    let keepalive = state.settings.websocket.keepalive_interval();
    let write_timeout = state.settings.websocket.write_timeout();

    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = lifetime.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!(connection_id = %handle.id, "Outbound queue closed");
                    break;
                };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize outbound frame");
                        continue;
                    }
                };
                if let Err(e) = send_with_timeout(&mut sink, Message::Text(text.into()), write_timeout).await {
                    tracing::debug!(connection_id = %handle.id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            _ = ticker.tick() => {
                let idle = handle.idle_for();
                if idle > keepalive + write_timeout {
                    tracing::info!(
                        connection_id = %handle.id,
                        idle_secs = idle.as_secs(),
                        "Keepalive probe unanswered, closing connection"
                    );
                    break;
                }
                if let Err(e) = send_with_timeout(&mut sink, Message::Ping(Bytes::new()), write_timeout).await {
                    tracing::debug!(connection_id = %handle.id, error = %e, "Keepalive ping failed");
                    break;
                }

                let presence = state.presence.clone();
                let user_id = handle.user_id;
                tokio::spawn(async move { presence.mark_online(user_id).await });
            }
        }
    }

    sink
}

async fn send_with_timeout<Si>(
    sink: &mut Si,
    message: Message,
    timeout: Duration,
) -> Result<(), WriteError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    match tokio::time::timeout(timeout, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteError::Transport(e.to_string())),
        Err(_) => Err(WriteError::Timeout),
    }
}

async fn read_loop<St, E>(
    mut stream: St,
    handle: Arc<ConnectionHandle>,
    state: AppState,
    lifetime: CancellationToken,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let _cancel_on_exit = lifetime.clone().drop_guard();

    loop {
        let next = tokio::select! {
            _ = lifetime.cancelled() => break,
            next = stream.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %handle.id, error = %e, "WebSocket read error");
                break;
            }
            None => break,
        };

        handle.touch();

        match message {
            Message::Text(text) => {
                if let Err(e) = process_text(&state, &handle, text.as_str()).await {
                    report(&handle, &e);
                }
            }
            Message::Binary(_) => report(&handle, &CommandError::UnsupportedFormat),
            // Protocol pings are answered by the transport; both count as activity
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                tracing::debug!(connection_id = %handle.id, "Received close frame");
                break;
            }
        }
    }
}

async fn process_text(
    state: &AppState,
    handle: &ConnectionHandle,
    text: &str,
) -> Result<(), CommandError> {
    let frame = InboundFrame::parse(text)?;
    let kind = CommandKind::parse(&frame.kind)?;
    FrameMetrics::received(kind.as_str());
    dispatch(state, handle, kind, frame).await
}

/// Error frame to this connection only; never fatal
fn report(handle: &ConnectionHandle, error: &CommandError) {
    let code = error.code();
    FrameMetrics::error(code);
    tracing::debug!(connection_id = %handle.id, code, error = %error, "Frame rejected");
    handle.enqueue(OutboundFrame::Raw(ServerFrame::error(code, error.client_message())));
}
