use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::websocket::OutboundMessage;

use super::{ChannelIndex, ConnectionHandle, ConnectionId};

/// Live connections of one application
pub struct ConnectionRegistry {
    apikey: String,
    /// connection_id -> ConnectionHandle
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    /// user_id -> Set<connection_id> (a user may have several tabs/devices)
    user_index: DashMap<String, HashSet<ConnectionId>>,
    /// Mirrors `connections.len()` without walking the shards
    count: AtomicUsize,
    /// Memberships to clean up on unregister
    channels: Arc<ChannelIndex>,
}

impl ConnectionRegistry {
    pub fn new(apikey: impl Into<String>, channels: Arc<ChannelIndex>) -> Self {
        Self {
            apikey: apikey.into(),
            connections: DashMap::new(),
            user_index: DashMap::new(),
            count: AtomicUsize::new(0),
            channels,
        }
    }

    /// Admit a new connection under a fresh id
    pub fn register(
        &self,
        user_id: Option<String>,
        sender: mpsc::Sender<OutboundMessage>,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(self.apikey.clone(), user_id, sender));
        let conn_id = handle.id;

        self.connections.insert(conn_id, handle.clone());
        self.count.fetch_add(1, Ordering::Relaxed);

        if let Some(user_id) = &handle.user_id {
            self.user_index
                .entry(user_id.clone())
                .or_default()
                .insert(conn_id);
        }

        tracing::info!(
            connection_id = %conn_id,
            apikey = %self.apikey,
            user_id = ?handle.user_id,
            "Connection registered"
        );

        handle
    }

    /// Remove a connection and every channel membership it holds.
    ///
    /// Unknown ids are ignored, so repeated disconnect notifications are harmless.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        self.count.fetch_sub(1, Ordering::Relaxed);

        if let Some(user_id) = &handle.user_id {
            if let Some(mut user_conns) = self.user_index.get_mut(user_id) {
                user_conns.remove(&connection_id);
            }
            self.user_index.remove_if(user_id, |_, conns| conns.is_empty());
        }

        let channels = handle.channels.read().await;
        for channel in channels.iter() {
            self.channels.leave(channel, connection_id);
        }
        drop(channels);

        tracing::info!(
            connection_id = %connection_id,
            apikey = %self.apikey,
            user_id = ?handle.user_id,
            "Connection unregistered"
        );

        Some(handle)
    }

    /// Number of live connections
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Get all connections for a user
    pub fn user_connections(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        self.user_index
            .get(user_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.user_index.contains_key(user_id)
    }

    /// Number of distinct users with at least one connection
    pub fn user_count(&self) -> usize {
        self.user_index.len()
    }

    pub fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<ConnectionId> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (ConnectionRegistry, Arc<ChannelIndex>) {
        let channels = Arc::new(ChannelIndex::new());
        (ConnectionRegistry::new("abc", channels.clone()), channels)
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let (registry, _) = registry();
        let (tx, _rx) = mpsc::channel(1);

        let a = registry.register(None, tx.clone());
        let b = registry.register(None, tx);

        assert_ne!(a.id, b.id);
        assert_eq!(a.apikey, "abc");
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(a.id));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let (registry, _) = registry();
        let (tx, _rx) = mpsc::channel(1);
        let handle = registry.register(Some("alice".into()), tx);

        assert!(registry.unregister(handle.id).await.is_some());
        assert_eq!(registry.count(), 0);

        assert!(registry.unregister(handle.id).await.is_none());
        assert_eq!(registry.count(), 0);
        assert!(!registry.is_user_online("alice"));
    }

    #[tokio::test]
    async fn test_unregister_cascades_to_channels() {
        let (registry, channels) = registry();
        let (tx, _rx) = mpsc::channel(1);
        let handle = registry.register(None, tx);

        for channel in ["news", "sport"] {
            handle.channels.write().await.insert(channel.to_string());
            channels.join(channel, handle.clone());
        }
        assert_eq!(channels.channel_count(), 2);

        registry.unregister(handle.id).await;

        assert!(channels.members("news").is_empty());
        assert!(channels.members("sport").is_empty());
        assert_eq!(channels.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_user_index_tracks_multiple_connections() {
        let (registry, _) = registry();
        let (tx, _rx) = mpsc::channel(1);

        let first = registry.register(Some("alice".into()), tx.clone());
        let second = registry.register(Some("alice".into()), tx.clone());
        registry.register(None, tx);

        assert_eq!(registry.user_connections("alice").len(), 2);
        assert_eq!(registry.user_count(), 1);

        registry.unregister(first.id).await;
        assert!(registry.is_user_online("alice"));

        registry.unregister(second.id).await;
        assert!(!registry.is_user_online("alice"));
        assert!(registry.user_connections("alice").is_empty());
    }

    #[test]
    fn test_find_stale_connections() {
        let (registry, _) = registry();
        let (tx, _rx) = mpsc::channel(1);

        let stale = registry.register(None, tx.clone());
        let fresh = registry.register(None, tx);
        stale.set_last_activity(Utc::now() - chrono::Duration::seconds(300));

        let found = registry.find_stale_connections(120);
        assert_eq!(found, vec![stale.id]);
        assert!(!found.contains(&fresh.id));
    }
}
