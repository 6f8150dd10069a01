//! Prometheus metrics for the chat gateway.
//!
//! Connection lifecycle, inbound frames, fan-out, rate limiting, relay
//! traffic and presence failures. Recording goes through the helper
//! structs in `helpers` so call sites stay one line.

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, FanOutMetrics, FrameMetrics, PresenceMetrics,
    RateLimitMetrics, RelayMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

const METRIC_PREFIX: &str = "chat";

lazy_static! {
    // Connections

    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of open WebSocket connections"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections accepted"
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections torn down"
    ).unwrap();

    pub static ref HANDSHAKE_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_handshake_rejected_total", METRIC_PREFIX),
        "Upgrade requests rejected for a missing or invalid token"
    ).unwrap();

    pub static ref CONNECTION_DURATION_SECONDS: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Lifetime of WebSocket connections",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();

    // Frames

    pub static ref FRAMES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Inbound frames by command type",
        &["type"]
    ).unwrap();

    pub static ref FRAME_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frame_errors_total", METRIC_PREFIX),
        "Error frames returned to senders, by code",
        &["code"]
    ).unwrap();

    // Fan-out

    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Room broadcasts processed by the hub",
        &["origin"]
    ).unwrap();

    pub static ref FANOUT_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_fanout_delivered_total", METRIC_PREFIX),
        "Frames enqueued onto connection outbound queues"
    ).unwrap();

    pub static ref FANOUT_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_fanout_dropped_total", METRIC_PREFIX),
        "Frames dropped because a connection queue was full or closed"
    ).unwrap();

    pub static ref ROOMS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_rooms_active", METRIC_PREFIX),
        "Rooms with at least one joined user"
    ).unwrap();

    // Rate limiting

    pub static ref RATELIMIT_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_decisions_total", METRIC_PREFIX),
        "Message rate limit decisions",
        &["decision"]
    ).unwrap();

    // Relay

    pub static ref RELAY_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_relay_events_total", METRIC_PREFIX),
        "Cross-instance relay traffic",
        &["event"]
    ).unwrap();

    // Presence

    pub static ref PRESENCE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_presence_failures_total", METRIC_PREFIX),
        "Presence store operations that failed or timed out",
        &["operation"]
    ).unwrap();
}
