mod settings;

pub use settings::{
    DatabaseConfig, HubConfig, JwtConfig, OtelConfig, PresenceConfig, RateLimitConfig,
    RedisConfig, RelayConfig, ServerConfig, Settings, WebSocketConfig,
};
