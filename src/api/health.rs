//! Health check and statistics endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::hub::HubStats;
use crate::server::AppState;
use crate::store::RedisHealthStatus;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub instance_id: String,
    pub uptime_seconds: u64,
    pub store: ComponentHealth,
    pub database: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthStatus>,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(backend: Option<&'static str>, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                healthy: true,
                backend,
                error: None,
            },
            Err(e) => Self {
                healthy: false,
                backend,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub instance_id: String,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub hub: HubStats,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = ComponentHealth::from_result(Some(state.store.backend()), state.store.ping().await);
    let database = ComponentHealth::from_result(None, state.chat.ping().await);

    let healthy = store.healthy && database.healthy;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        instance_id: state.instance_id.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store,
        database,
        redis: state.store.redis_health(),
    };

    (status, Json(body))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        instance_id: state.instance_id.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        hub: state.hub.stats().await,
    })
}
