//! Prometheus metrics for the push server.
//!
//! - Connection metrics (live connections, active channels)
//! - Message metrics (published by target, delivered, failed, timed out)
//! - WebSocket lifecycle metrics
//! - Control API authentication failures

mod helpers;

pub use helpers::{encode_metrics, ApiMetrics, ConnectionMetrics, MessageMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "thunder";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Live client connections across all applications
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of live client connections"
    ).unwrap();

    /// Channels with at least one member
    pub static ref CHANNELS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_channels_active", METRIC_PREFIX),
        "Total number of channels with at least one member"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 86400.0]
    ).unwrap();

    /// Connections removed by the idle reaper
    pub static ref CONNECTIONS_REAPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_reaped_total", METRIC_PREFIX),
        "Total connections removed for inactivity"
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Messages published by target type
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total messages published",
        &["target"]
    ).unwrap();

    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages handed to connections"
    ).unwrap();

    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total deliveries to closed connections"
    ).unwrap();

    pub static ref MESSAGES_TIMED_OUT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_timed_out_total", METRIC_PREFIX),
        "Total deliveries abandoned after the send timeout"
    ).unwrap();

    pub static ref FANOUT_DURATION: Histogram = register_histogram!(
        format!("{}_fanout_duration_seconds", METRIC_PREFIX),
        "Time spent delivering one published message",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ============================================================================
    // API Metrics
    // ============================================================================

    pub static ref API_AUTH_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_api_auth_failures_total", METRIC_PREFIX),
        "Control API requests rejected by the secret check",
        &["reason"]
    ).unwrap();
}
