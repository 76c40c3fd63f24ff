//! Best-effort fanout of one message to many connections.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::timeout;

use crate::config::DeliveryConfig;
use crate::websocket::OutboundMessage;

use super::ConnectionHandle;

/// Outcome of a fanout. Only `delivered` is reported to API callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Connections whose outbound queue accepted the message
    pub delivered: usize,
    /// Connections already closed
    pub failed: usize,
    /// Connections whose queue stayed full past the send timeout
    pub timed_out: usize,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed + self.timed_out
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Delivered => self.delivered += 1,
            Outcome::Closed => self.failed += 1,
            Outcome::TimedOut => self.timed_out += 1,
        }
    }
}

enum Outcome {
    Delivered,
    Closed,
    TimedOut,
}

/// Hand `message` to every connection.
///
/// Each send runs independently under `send_timeout_ms`, with at most
/// `max_concurrent_sends` in flight, so a stalled connection neither blocks
/// the others nor holds the caller longer than the timeout. Nothing is retried.
pub async fn deliver(
    connections: &[Arc<ConnectionHandle>],
    message: OutboundMessage,
    config: &DeliveryConfig,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    if connections.is_empty() {
        return report;
    }

    let send_timeout = Duration::from_millis(config.send_timeout_ms);
    let max_in_flight = config.max_concurrent_sends.max(1);
    let mut in_flight = FuturesUnordered::new();

    for conn in connections {
        let conn = conn.clone();
        let msg = message.clone();
        in_flight.push(async move {
            match timeout(send_timeout, conn.send_outbound(msg)).await {
                Ok(Ok(())) => Outcome::Delivered,
                Ok(Err(_)) => {
                    tracing::debug!(connection_id = %conn.id, "Connection closed, delivery failed");
                    Outcome::Closed
                }
                Err(_) => {
                    tracing::debug!(
                        connection_id = %conn.id,
                        timeout_ms = send_timeout.as_millis() as u64,
                        "Delivery timed out"
                    );
                    Outcome::TimedOut
                }
            }
        });

        // Drain completed sends once the concurrency limit is reached
        while in_flight.len() >= max_in_flight {
            match in_flight.next().await {
                Some(outcome) => report.record(outcome),
                None => break,
            }
        }
    }

    while let Some(outcome) = in_flight.next().await {
        report.record(outcome);
    }

    report
}
