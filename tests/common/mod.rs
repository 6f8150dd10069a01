#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use chat_gateway::auth::{AuthenticatedUser, JwtValidator};
use chat_gateway::chat::InMemoryChatService;
use chat_gateway::config::Settings;
use chat_gateway::server::AppState;
use chat_gateway::store::MemoryStore;
use chat_gateway::websocket::run_session;

pub const SECRET: &str = "integration-test-secret";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings with keepalive pushed out of the way of ordinary tests
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.jwt.secret = SECRET.to_string();
    settings.websocket.keepalive_interval = 3600;
    settings
}

pub struct Harness {
    pub state: AppState,
    pub store: MemoryStore,
    pub chat: Arc<InMemoryChatService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::with_store(settings, MemoryStore::new())
    }

    pub fn with_store(settings: Settings, store: MemoryStore) -> Self {
        Self::with_parts(settings, store, Arc::new(InMemoryChatService::default()))
    }

    /// Separate gateway instance over a shared store and database
    pub fn with_parts(settings: Settings, store: MemoryStore, chat: Arc<InMemoryChatService>) -> Self {
        let validator = Arc::new(JwtValidator::new(&settings.jwt));
        let state = AppState::new(settings, validator, chat.clone(), Arc::new(store.clone()));
        Self { state, store, chat }
    }

    pub fn connect(&self, user_id: Uuid) -> TestClient {
        TestClient::connect(&self.state, user_id)
    }
}

/// One client session driven over in-process channels
pub struct TestClient {
    pub user_id: Uuid,
    inbound: mpsc::UnboundedSender<Result<Message, Infallible>>,
    outbound: mpsc::Receiver<Message>,
    session: JoinHandle<()>,
}

impl TestClient {
    pub fn connect(state: &AppState, user_id: Uuid) -> Self {
        let (inbound, stream) = mpsc::unbounded();
        let (sink, outbound) = mpsc::channel(64);
        let user = AuthenticatedUser {
            user_id,
            role: "player".to_string(),
        };
        let session = tokio::spawn(run_session(state.clone(), user, stream, sink));

        Self {
            user_id,
            inbound,
            outbound,
            session,
        }
    }

    pub fn send_message(&self, message: Message) {
        self.inbound
            .unbounded_send(Ok(message))
            .expect("session stopped reading");
    }

    pub fn send(&self, frame: Value) {
        self.send_message(Message::Text(frame.to_string().into()));
    }

    /// Next raw transport message, `None` once the session closed its sink
    pub async fn next_raw(&mut self) -> Option<Message> {
        tokio::time::timeout(RECV_TIMEOUT, self.outbound.next())
            .await
            .expect("timed out waiting for a frame")
    }

    /// Next JSON frame, skipping keepalive pings
    pub async fn recv(&mut self) -> Value {
        loop {
            match self.next_raw().await {
                Some(Message::Text(text)) => {
                    return serde_json::from_str(text.as_str()).expect("server sent invalid JSON")
                }
                Some(Message::Ping(_)) | Some(Message::Pong(_)) => continue,
                Some(other) => panic!("unexpected frame: {other:?}"),
                None => panic!("session closed"),
            }
        }
    }

    /// Assert nothing but pings arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.outbound.next()).await {
                Err(_) => return,
                Ok(Some(Message::Ping(_))) => continue,
                Ok(Some(other)) => panic!("expected silence, got {other:?}"),
                Ok(None) => return,
            }
        }
    }

    /// Round-trip a ping so every earlier command from this client is queued
    pub async fn sync(&mut self) {
        self.send(json!({"type": "ping"}));
        let frame = self.recv().await;
        assert_eq!(frame["type"], "pong", "expected pong, got {frame}");
    }

    pub async fn join(&mut self, chat_id: Uuid) {
        self.send(json!({"type": "join_room", "chat_id": chat_id}));
        self.sync().await;
    }

    /// Close the client side and wait for server-side cleanup to finish
    pub async fn disconnect(self) {
        drop(self.inbound);
        tokio::time::timeout(Duration::from_secs(5), self.session)
            .await
            .expect("session did not end")
            .expect("session panicked");
    }

    pub async fn wait_closed(self) {
        tokio::time::timeout(Duration::from_secs(30), self.session)
            .await
            .expect("session did not end")
            .expect("session panicked");
    }
}

pub fn message_frame(chat_id: Uuid, content: &str, client_id: &str) -> Value {
    json!({
        "type": "message",
        "chat_id": chat_id,
        "content": content,
        "client_id": client_id,
    })
}

pub fn token_for(user_id: Uuid) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = chrono::Utc::now().timestamp();
    let claims = chat_gateway::auth::Claims {
        sub: user_id.to_string(),
        role: "player".to_string(),
        exp: now + 3600,
        iat: now,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
        .expect("token encodes")
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
