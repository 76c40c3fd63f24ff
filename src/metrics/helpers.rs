//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    API_AUTH_FAILURES_TOTAL, CHANNELS_ACTIVE, CONNECTIONS_REAPED_TOTAL, CONNECTIONS_TOTAL,
    FANOUT_DURATION, MESSAGES_DELIVERED_TOTAL, MESSAGES_FAILED_TOTAL, MESSAGES_SENT_TOTAL,
    MESSAGES_TIMED_OUT_TOTAL, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};
use crate::messenger::DeliveryReport;

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    /// Record a message published to a channel
    pub fn record_channel_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["channel"]).inc();
    }

    /// Record a message published to a user
    pub fn record_user_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["user"]).inc();
    }

    /// Record the outcome of one fanout
    pub fn record_report(report: &DeliveryReport, elapsed: Duration) {
        MESSAGES_DELIVERED_TOTAL.inc_by(report.delivered as u64);
        MESSAGES_FAILED_TOTAL.inc_by(report.failed as u64);
        MESSAGES_TIMED_OUT_TOTAL.inc_by(report.timed_out as u64);
        FANOUT_DURATION.observe(elapsed.as_secs_f64());
    }
}

/// Helper struct for connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(lifetime: Duration) {
        WS_CONNECTIONS_CLOSED.inc();
        WS_CONNECTION_DURATION.observe(lifetime.as_secs_f64());
    }

    pub fn record_reaped(count: usize) {
        CONNECTIONS_REAPED_TOTAL.inc_by(count as u64);
    }

    /// Refresh the gauges from a registry-wide snapshot
    pub fn set_totals(connections: usize, channels: usize) {
        CONNECTIONS_TOTAL.set(connections as i64);
        CHANNELS_ACTIVE.set(channels as i64);
    }
}

/// Helper struct for control API metrics
pub struct ApiMetrics;

impl ApiMetrics {
    pub fn record_auth_failure(reason: &str) {
        API_AUTH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    }
}
