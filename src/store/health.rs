use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisHealthStatus {
    Healthy,
    Reconnecting,
    CircuitOpen,
}

impl RedisHealthStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RedisHealthStatus::Healthy,
            2 => RedisHealthStatus::CircuitOpen,
            _ => RedisHealthStatus::Reconnecting,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RedisHealthStatus::Healthy => 0,
            RedisHealthStatus::Reconnecting => 1,
            RedisHealthStatus::CircuitOpen => 2,
        }
    }
}

/// Shared view of the Redis connection, updated by the pool and the bus subscriber
pub struct RedisHealth {
    status: AtomicU8,
    reconnects: AtomicU32,
}

impl RedisHealth {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(RedisHealthStatus::Reconnecting.as_u8()),
            reconnects: AtomicU32::new(0),
        }
    }

    pub fn set_connected(&self) {
        let previous = self
            .status
            .swap(RedisHealthStatus::Healthy.as_u8(), Ordering::AcqRel);
        if previous != RedisHealthStatus::Healthy.as_u8() {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_reconnecting(&self) {
        self.status
            .store(RedisHealthStatus::Reconnecting.as_u8(), Ordering::Release);
    }

    pub fn set_circuit_open(&self) {
        self.status
            .store(RedisHealthStatus::CircuitOpen.as_u8(), Ordering::Release);
    }

    pub fn status(&self) -> RedisHealthStatus {
        RedisHealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == RedisHealthStatus::Healthy
    }

    /// Number of transitions into the healthy state, including the first connect
    pub fn connect_count(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

impl Default for RedisHealth {
    fn default() -> Self {
        Self::new()
    }
}
