use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::body::Bytes;
use dashmap::DashMap;

use crate::config::DeliveryConfig;
use crate::websocket::OutboundMessage;

use super::delivery::{deliver, DeliveryReport};
use super::{ConnectionHandle, ConnectionId};

/// channel_name -> members, scoped to one application.
///
/// Channels exist only while they have members: the entry is created on the
/// first join and reclaimed when the last member leaves.
#[derive(Default)]
pub struct ChannelIndex {
    channels: DashMap<String, HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ChannelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a channel. Returns false if it was already a member.
    pub fn join(&self, channel: &str, handle: Arc<ConnectionHandle>) -> bool {
        let connection_id = handle.id;
        let joined = self
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(connection_id, handle)
            .is_none();

        if joined {
            tracing::debug!(connection_id = %connection_id, channel = %channel, "Joined channel");
        }
        joined
    }

    /// Remove a connection from a channel. Returns false if it was not a member.
    pub fn leave(&self, channel: &str, connection_id: ConnectionId) -> bool {
        let left = match self.channels.get_mut(channel) {
            Some(mut members) => members.remove(&connection_id).is_some(),
            None => false,
        };

        if left {
            self.channels.remove_if(channel, |_, members| members.is_empty());
            tracing::debug!(connection_id = %connection_id, channel = %channel, "Left channel");
        }
        left
    }

    /// Current member ids; unknown channels are empty
    pub fn members(&self, channel: &str) -> HashSet<ConnectionId> {
        self.channels
            .get(channel)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Current member handles; unknown channels are empty
    pub fn connections(&self, channel: &str) -> Vec<Arc<ConnectionHandle>> {
        self.channels
            .get(channel)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_member(&self, channel: &str, connection_id: ConnectionId) -> bool {
        self.channels
            .get(channel)
            .map(|m| m.contains_key(&connection_id))
            .unwrap_or(false)
    }

    /// Number of channels with at least one member
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Deliver `payload` to every member and report how many were reached.
    ///
    /// Membership is snapshotted first; the map is not locked while sending.
    pub async fn broadcast(
        &self,
        channel: &str,
        payload: Bytes,
        config: &DeliveryConfig,
    ) -> DeliveryReport {
        let connections = self.connections(channel);
        deliver(&connections, OutboundMessage::Payload(payload), config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn handle() -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(ConnectionHandle::new("abc".into(), None, tx)), rx)
    }

    #[test]
    fn test_join_and_leave() {
        let index = ChannelIndex::new();
        let (a, _rx_a) = handle();
        let (b, _rx_b) = handle();

        assert!(index.join("news", a.clone()));
        assert!(!index.join("news", a.clone()));
        assert!(index.join("news", b.clone()));
        assert_eq!(index.member_count("news"), 2);
        assert_eq!(index.members("news"), HashSet::from([a.id, b.id]));

        assert!(index.leave("news", a.id));
        assert!(!index.leave("news", a.id));
        assert!(!index.is_member("news", a.id));
        assert!(index.is_member("news", b.id));
    }

    #[test]
    fn test_empty_channel_is_reclaimed() {
        let index = ChannelIndex::new();
        let (a, _rx) = handle();

        index.join("news", a.clone());
        assert_eq!(index.channel_count(), 1);

        index.leave("news", a.id);
        assert_eq!(index.channel_count(), 0);
        assert!(index.channel_names().is_empty());
    }

    #[test]
    fn test_unknown_channel_is_empty() {
        let index = ChannelIndex::new();
        assert!(index.members("nowhere").is_empty());
        assert_eq!(index.member_count("nowhere"), 0);
        assert!(!index.leave("nowhere", uuid::Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members_only() {
        let index = ChannelIndex::new();
        let (a, mut rx_a) = handle();
        let (b, mut rx_b) = handle();
        index.join("news", a);
        index.join("sport", b);

        let report = index
            .broadcast("news", Bytes::from_static(b"hi"), &DeliveryConfig::default())
            .await;

        assert_eq!(report.delivered, 1);
        assert!(matches!(rx_a.try_recv(), Ok(OutboundMessage::Payload(_))));
        assert!(rx_b.try_recv().is_err());
    }
}
