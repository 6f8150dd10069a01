use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use chat_gateway::auth::JwtValidator;
use chat_gateway::chat::PgChatService;
use chat_gateway::config::Settings;
use chat_gateway::server::{create_app, AppState};
use chat_gateway::store::RedisStore;
use chat_gateway::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::new()?;
    let _telemetry = init_telemetry(&settings.otel)?;

    tracing::info!("Starting chat gateway");

    let store = Arc::new(RedisStore::new(&settings.redis)?);
    let chat = Arc::new(PgChatService::connect_lazy(
        &settings.database,
        settings.websocket.max_content_length,
    )?);
    let validator = Arc::new(JwtValidator::new(&settings.jwt));

    let addr = settings.server_addr();
    let state = AppState::new(settings, validator, chat, store);
    let shutdown = state.shutdown.clone();
    let relay_handle = state.spawn_relay_subscriber();

    let app = create_app(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Covers the case where serve returned without a signal
    shutdown.cancel();

    if let Some(handle) = relay_handle {
        tracing::info!("Waiting for relay subscriber to stop...");
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels every connection lifetime
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }

    // Open WebSocket sessions hold the server open until they end
    shutdown.cancel();
}
