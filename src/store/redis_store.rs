use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::{AsyncCommands, Script};

use crate::config::RedisConfig;

use super::{BusMessage, RedisHealthStatus, RedisPool, SharedStore, StoreError};

/// INCR the key and set its expiry only when this call created it
const INCR_WITH_EXPIRY: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

pub struct RedisStore {
    pool: RedisPool,
    incr_script: Script,
}

impl RedisStore {
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        Ok(Self {
            pool: RedisPool::new(config)?,
            incr_script: Script::new(INCR_WITH_EXPIRY),
        })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let seconds = window.as_secs().max(1);
        let script = &self.incr_script;

        self.pool
            .execute(|mut conn| async move {
                script.key(key).arg(seconds).invoke_async(&mut conn).await
            })
            .await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let seconds = ttl.as_secs().max(1);
        self.pool
            .execute(|mut conn| async move { conn.set_ex::<_, _, ()>(key, value, seconds).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.pool
            .execute(|mut conn| async move { conn.del::<_, ()>(key).await })
            .await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        self.pool
            .execute(|mut conn| async move { conn.publish::<_, _, ()>(channel, payload).await })
            .await
    }

    async fn psubscribe(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, BusMessage>, StoreError> {
        // Pub/sub needs its own connection; the multiplexed one cannot subscribe
        let mut pubsub = self.pool.client().get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;
        tracing::debug!(pattern = %pattern, "Subscribed to pattern");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(BusMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read bus payload");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.pool
            .execute(|mut conn| async move {
                let _: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(())
            })
            .await
    }

    fn redis_health(&self) -> Option<RedisHealthStatus> {
        Some(self.pool.health().status())
    }
}
