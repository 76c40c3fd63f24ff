//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::websocket::{OutboundMessage, ServerMessage};

pub type ConnectionId = Uuid;

/// Handle for a single client connection
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Owning application
    pub apikey: String,
    /// User the client announced on connect, if any
    pub user_id: Option<String>,
    pub sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds)
    last_activity: AtomicI64,
    /// Channels this connection has joined
    pub channels: RwLock<HashSet<String>>,
    /// Fires when the server drops the connection; independent of the outbound queue
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        apikey: String,
        user_id: Option<String>,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            apikey,
            user_id,
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            channels: RwLock::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        self.last_activity.store(at.timestamp(), Ordering::Relaxed);
    }

    /// Ask the socket tasks to stop, even if the writer is stalled on a full queue
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Send a control message
    pub async fn send(
        &self,
        message: ServerMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(OutboundMessage::Control(message)).await
    }

    /// Send any outbound message (payloads, close requests)
    pub async fn send_outbound(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.sender.send(message).await
    }

    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("apikey", &self.apikey)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
