//! Real-time chat gateway.
//!
//! Authenticated WebSocket clients join chat rooms, send messages that are
//! persisted and fanned out to every room member, and exchange typing and
//! read indicators. A shared store relays room traffic between gateway
//! instances and backs rate limiting and presence.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod presence;
pub mod ratelimit;
pub mod relay;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod websocket;
