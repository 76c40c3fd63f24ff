//! Per-application messaging: live connections, channel membership and fanout.
//!
//! A [`Messenger`] owns one application's [`ConnectionRegistry`] and
//! [`ChannelIndex`]. Every connection it holds carries the messenger's apikey;
//! every channel member is a live connection of the same messenger.

mod channel_index;
mod connection;
mod delivery;
mod registry;

pub use channel_index::ChannelIndex;
pub use connection::{ConnectionHandle, ConnectionId};
pub use delivery::{deliver, DeliveryReport};
pub use registry::ConnectionRegistry;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use tokio::sync::mpsc;

use crate::config::DeliveryConfig;
use crate::error::{AppError, Result};
use crate::metrics::MessageMetrics;
use crate::websocket::OutboundMessage;

pub const EMPTY_BODY_MESSAGE: &str = "Message body must not be empty.";

pub struct Messenger {
    apikey: String,
    apisecret: String,
    registry: ConnectionRegistry,
    channels: Arc<ChannelIndex>,
    delivery: DeliveryConfig,
}

impl Messenger {
    pub fn new(
        apikey: impl Into<String>,
        apisecret: impl Into<String>,
        delivery: DeliveryConfig,
    ) -> Self {
        let apikey = apikey.into();
        let channels = Arc::new(ChannelIndex::new());
        Self {
            registry: ConnectionRegistry::new(apikey.clone(), channels.clone()),
            apikey,
            apisecret: apisecret.into(),
            channels,
            delivery,
        }
    }

    pub fn apikey(&self) -> &str {
        &self.apikey
    }

    /// Compare a provided secret without short-circuiting on the first mismatch
    pub fn matches_secret(&self, provided: &str) -> bool {
        constant_time_eq(self.apisecret.as_bytes(), provided.as_bytes())
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn channels(&self) -> &ChannelIndex {
        &self.channels
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    pub fn register(
        &self,
        user_id: Option<String>,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Arc<ConnectionHandle> {
        self.registry.register(user_id, sender)
    }

    /// Returns false if the connection was already gone
    pub async fn unregister(&self, connection_id: ConnectionId) -> bool {
        self.registry.unregister(connection_id).await.is_some()
    }

    /// Add a live connection to a channel.
    ///
    /// Returns false if the connection is unknown (or disconnects while
    /// joining) or already a member.
    pub async fn join(&self, connection_id: ConnectionId, channel: &str) -> bool {
        let Some(handle) = self.registry.get(connection_id) else {
            return false;
        };

        // Held across the index update so a concurrent unregister sees this channel
        let mut joined_channels = handle.channels.write().await;
        let joined = self.channels.join(channel, handle.clone());
        joined_channels.insert(channel.to_string());
        drop(joined_channels);

        // Lost the race with unregister: undo so no membership dangles
        if !self.registry.contains(connection_id) {
            self.channels.leave(channel, connection_id);
            return false;
        }

        joined
    }

    pub async fn leave(&self, connection_id: ConnectionId, channel: &str) -> bool {
        if let Some(handle) = self.registry.get(connection_id) {
            handle.channels.write().await.remove(channel);
        }
        self.channels.leave(channel, connection_id)
    }

    // ------------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------------

    /// Publish `body` to every member of `channel`; returns how many were reached
    #[tracing::instrument(
        name = "messenger.send_to_channel",
        skip(self, body),
        fields(apikey = %self.apikey, body_len = body.len())
    )]
    pub async fn send_to_channel(&self, channel: &str, body: Bytes) -> Result<usize> {
        ensure_payload(&body)?;

        let start = Instant::now();
        let report = self.channels.broadcast(channel, body, &self.delivery).await;

        MessageMetrics::record_channel_sent();
        MessageMetrics::record_report(&report, start.elapsed());

        tracing::debug!(
            channel = %channel,
            delivered = report.delivered,
            failed = report.failed,
            timed_out = report.timed_out,
            "Message has been sent to channel"
        );

        Ok(report.delivered)
    }

    /// Publish `body` to every connection of one user
    #[tracing::instrument(
        name = "messenger.send_to_user",
        skip(self, body),
        fields(apikey = %self.apikey, body_len = body.len())
    )]
    pub async fn send_to_user(&self, user_id: &str, body: Bytes) -> Result<usize> {
        ensure_payload(&body)?;

        let start = Instant::now();
        let connections = self.registry.user_connections(user_id);
        let report = deliver(&connections, OutboundMessage::Payload(body), &self.delivery).await;

        MessageMetrics::record_user_sent();
        MessageMetrics::record_report(&report, start.elapsed());

        tracing::debug!(
            user_id = %user_id,
            delivered = report.delivered,
            failed = report.failed,
            timed_out = report.timed_out,
            "Message has been sent to user"
        );

        Ok(report.delivered)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Number of live connections for this application
    pub fn get_user_count(&self) -> usize {
        self.registry.count()
    }

    /// Distinct user ids present in a channel, sorted
    pub fn get_users_in_channel(&self, channel: &str) -> Vec<String> {
        self.channels
            .connections(channel)
            .iter()
            .filter_map(|conn| conn.user_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn get_channel_member_count(&self, channel: &str) -> usize {
        self.channels.member_count(channel)
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.registry.is_user_online(user_id)
    }

    // ------------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------------

    /// Close and unregister every connection of a user; returns how many were dropped
    pub async fn disconnect_user(&self, user_id: &str) -> usize {
        let connections = self.registry.user_connections(user_id);
        let mut removed = 0;

        for conn in connections {
            // The close frame is best effort; the signal reaches stalled writers too
            let _ = conn.sender.try_send(OutboundMessage::Close);
            conn.close();
            if self.registry.unregister(conn.id).await.is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(apikey = %self.apikey, user_id = %user_id, removed, "User disconnected");
        }
        removed
    }

    /// Unregister connections idle longer than `timeout_secs`
    pub async fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let mut removed = 0;

        for conn_id in self.registry.find_stale_connections(timeout_secs) {
            if let Some(handle) = self.registry.unregister(conn_id).await {
                let _ = handle.sender.try_send(OutboundMessage::Close);
                handle.close();
                tracing::info!(connection_id = %conn_id, "Removing stale connection due to timeout");
                removed += 1;
            }
        }

        removed
    }
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("apikey", &self.apikey)
            .field("connections", &self.registry.count())
            .field("channels", &self.channels.channel_count())
            .finish_non_exhaustive()
    }
}

fn ensure_payload(body: &Bytes) -> Result<()> {
    if body.is_empty() {
        return Err(AppError::InvalidPayload(EMPTY_BODY_MESSAGE.to_string()));
    }
    Ok(())
}

/// Constant-time comparison for secret validation
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
