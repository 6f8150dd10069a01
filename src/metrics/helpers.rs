use prometheus::{Encoder, TextEncoder};

use super::*;

/// Encode every registered metric in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn closed(duration_secs: f64) {
        CONNECTIONS_CLOSED_TOTAL.inc();
        CONNECTIONS_ACTIVE.dec();
        CONNECTION_DURATION_SECONDS.observe(duration_secs);
    }

    pub fn handshake_rejected() {
        HANDSHAKE_REJECTED_TOTAL.inc();
    }
}

pub struct FrameMetrics;

impl FrameMetrics {
    pub fn received(kind: &str) {
        FRAMES_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn error(code: &str) {
        FRAME_ERRORS_TOTAL.with_label_values(&[code]).inc();
    }
}

pub struct FanOutMetrics;

impl FanOutMetrics {
    pub fn broadcast(origin: &str, delivered: usize, dropped: usize) {
        BROADCASTS_TOTAL.with_label_values(&[origin]).inc();
        FANOUT_DELIVERED_TOTAL.inc_by(delivered as u64);
        FANOUT_DROPPED_TOTAL.inc_by(dropped as u64);
    }

    pub fn direct(delivered: usize, dropped: usize) {
        FANOUT_DELIVERED_TOTAL.inc_by(delivered as u64);
        FANOUT_DROPPED_TOTAL.inc_by(dropped as u64);
    }

    pub fn rooms(count: usize) {
        ROOMS_ACTIVE.set(count as i64);
    }
}

pub struct RateLimitMetrics;

impl RateLimitMetrics {
    pub fn allowed() {
        RATELIMIT_DECISIONS_TOTAL.with_label_values(&["allowed"]).inc();
    }

    pub fn denied() {
        RATELIMIT_DECISIONS_TOTAL.with_label_values(&["denied"]).inc();
    }

    pub fn fail_open() {
        RATELIMIT_DECISIONS_TOTAL.with_label_values(&["fail_open"]).inc();
    }
}

pub struct RelayMetrics;

impl RelayMetrics {
    pub fn published() {
        RELAY_EVENTS_TOTAL.with_label_values(&["published"]).inc();
    }

    pub fn publish_failed() {
        RELAY_EVENTS_TOTAL.with_label_values(&["publish_failed"]).inc();
    }

    pub fn publish_dropped() {
        RELAY_EVENTS_TOTAL.with_label_values(&["publish_dropped"]).inc();
    }

    pub fn received() {
        RELAY_EVENTS_TOTAL.with_label_values(&["received"]).inc();
    }

    pub fn skipped_own() {
        RELAY_EVENTS_TOTAL.with_label_values(&["skipped_own"]).inc();
    }

    pub fn malformed() {
        RELAY_EVENTS_TOTAL.with_label_values(&["malformed"]).inc();
    }
}

pub struct PresenceMetrics;

impl PresenceMetrics {
    pub fn failure(operation: &str) {
        PRESENCE_FAILURES_TOTAL.with_label_values(&[operation]).inc();
    }
}
