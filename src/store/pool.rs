//! Multiplexed Redis connection guarded by the circuit breaker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RedisHealth, StoreError};

pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    breaker: Arc<CircuitBreaker>,
    health: Arc<RedisHealth>,
    url: String,
    connect_timeout: Duration,
}

impl RedisPool {
    /// Parses the URL only; the first command opens the connection.
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            breaker: Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig::from(config))),
            health: Arc::new(RedisHealth::new()),
            url: config.url.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn health(&self) -> Arc<RedisHealth> {
        self.health.clone()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        if !self.breaker.allow_request() {
            self.health.set_circuit_open();
            return Err(StoreError::CircuitOpen);
        }

        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut slot = self.connection.write().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        // The slot lock is held while connecting, so the attempt must be bounded
        self.health.set_reconnecting();
        let attempt =
            tokio::time::timeout(self.connect_timeout, self.client.get_multiplexed_async_connection())
                .await;
        match attempt {
            Ok(Ok(conn)) => {
                *slot = Some(conn.clone());
                self.breaker.record_success();
                self.health.set_connected();
                tracing::info!(url = %self.url, "Redis connection established");
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(StoreError::Redis(e))
            }
            Err(_) => {
                self.breaker.record_failure();
                tracing::error!(
                    url = %self.url,
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "Timed out connecting to Redis"
                );
                Err(StoreError::Timeout)
            }
        }
    }

    /// Run one command, recording the outcome on the breaker.
    /// A dropped connection is discarded so the next call reconnects.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;

        match f(conn).await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    *self.connection.write().await = None;
                    self.health.set_reconnecting();
                }
                self.breaker.record_failure();
                Err(StoreError::Redis(e))
            }
        }
    }
}
