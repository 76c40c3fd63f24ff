use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::messenger::{ConnectionHandle, Messenger};
use crate::metrics::ConnectionMetrics;
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub apikey: Option<String>,
    pub user: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(apikey = ?query.apikey, user_id = ?query.user)
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
) -> Response {
    // A connection may only exist under a provisioned application
    let messenger = match query
        .apikey
        .as_deref()
        .and_then(|apikey| state.sorting_station.get_messenger_by_apikey(apikey))
    {
        Some(messenger) => messenger,
        None => return AppError::Unauthorized.into_response(),
    };

    let user_id = query.user.filter(|u| !u.is_empty());
    let buffer = state.settings.websocket.channel_buffer.max(1);
    let ping_every = Duration::from_secs(state.settings.websocket.ping_interval.max(1));

    ws.on_upgrade(move |socket| handle_socket(socket, messenger, user_id, buffer, ping_every))
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, messenger, user_id, buffer, ping_every),
    fields(apikey = %messenger.apikey(), user_id = ?user_id)
)]
async fn handle_socket(
    socket: WebSocket,
    messenger: Arc<Messenger>,
    user_id: Option<String>,
    buffer: usize,
    ping_every: Duration,
) {
    let connection_start = Instant::now();

    // Create channel for sending messages to this connection
    let (tx, rx) = mpsc::channel::<OutboundMessage>(buffer);
    let handle = messenger.register(user_id, tx);
    let connection_id = handle.id;

    ConnectionMetrics::record_opened();

    // Split socket into sender and receiver
    let (ws_sender, mut ws_receiver) = socket.split();

    // Task for forwarding queued messages to the socket
    let mut send_task = tokio::spawn(write_outbound(rx, ws_sender, ping_every));

    // Task for receiving messages from the socket
    let messenger_clone = messenger.clone();
    let handle_clone = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &messenger_clone, &handle_clone).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete, or for the server to drop the connection
    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = handle.closed() => {
            tracing::debug!(connection_id = %connection_id, "Connection closed by server");
        }
    }

    // Dropping both halves closes the socket even if the writer is stuck
    send_task.abort();
    recv_task.abort();

    // No-op if the reaper or a forced disconnect got here first
    messenger.unregister(connection_id).await;

    let lifetime = connection_start.elapsed();
    ConnectionMetrics::record_closed(lifetime);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = lifetime.as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Forward queued messages to the socket, pinging it every `ping_every`.
///
/// Clients answer pings with pongs, which keeps listen-only connections from
/// being reaped as idle.
async fn write_outbound<S>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut sink: S,
    ping_every: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);

    loop {
        let frame = tokio::select! {
            msg = rx.recv() => match msg {
                Some(OutboundMessage::Payload(body)) => payload_frame(body),
                Some(OutboundMessage::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Some(control) => match control.to_json() {
                    Some(Ok(text)) => Message::Text(text.into()),
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Failed to serialize message");
                        continue;
                    }
                    None => continue,
                },
                None => break,
            },
            _ = ping.tick() => Message::Ping(axum::body::Bytes::new()),
        };

        if sink.send(frame).await.is_err() {
            break;
        }
    }
}

/// Published bodies go out as text when they are UTF-8, binary otherwise
fn payload_frame(body: axum::body::Bytes) -> Message {
    match std::str::from_utf8(&body) {
        Ok(text) => Message::Text(text.to_owned().into()),
        Err(_) => Message::Binary(body),
    }
}

/// Process a received WebSocket message
/// Returns false if the connection should be closed
async fn process_message(
    msg: Message,
    messenger: &Messenger,
    handle: &Arc<ConnectionHandle>,
) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                    return true;
                }
            };

            handle_client_message(client_msg, messenger, handle).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle
                .send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client message
#[tracing::instrument(
    name = "ws.message",
    skip(messenger, handle),
    fields(connection_id = %handle.id, message_type = ?msg)
)]
async fn handle_client_message(
    msg: ClientMessage,
    messenger: &Messenger,
    handle: &Arc<ConnectionHandle>,
) {
    match msg {
        ClientMessage::Subscribe { channels } => handle_subscribe(channels, messenger, handle).await,
        ClientMessage::Unsubscribe { channels } => {
            handle_unsubscribe(channels, messenger, handle).await
        }
        ClientMessage::Ping => {
            let _ = handle.send(ServerMessage::Pong).await;
        }
    }
}

async fn handle_subscribe(
    channels: Vec<String>,
    messenger: &Messenger,
    handle: &Arc<ConnectionHandle>,
) {
    let mut subscribed = Vec::new();
    let mut errors = Vec::new();

    for channel in channels {
        if !is_valid_channel_name(&channel) {
            tracing::warn!(connection_id = %handle.id, channel = %channel, "Invalid channel name");
            errors.push(format!("Invalid channel name: {}", channel));
            continue;
        }

        // A false join is fine for an existing member, not for a dropped connection
        if !messenger.join(handle.id, &channel).await && !messenger.registry().contains(handle.id)
        {
            tracing::debug!(connection_id = %handle.id, "Subscribe on a closed connection");
            subscribed.clear();
            errors.push("Connection is closed".to_string());
            break;
        }
        subscribed.push(channel);
    }

    if !subscribed.is_empty() {
        let _ = handle.send(ServerMessage::subscribed(subscribed)).await;
    }

    if !errors.is_empty() {
        let _ = handle
            .send(ServerMessage::error("SUBSCRIPTION_ERROR", errors.join("; ")))
            .await;
    }
}

async fn handle_unsubscribe(
    channels: Vec<String>,
    messenger: &Messenger,
    handle: &Arc<ConnectionHandle>,
) {
    for channel in &channels {
        messenger.leave(handle.id, channel).await;
    }

    if !channels.is_empty() {
        let _ = handle.send(ServerMessage::unsubscribed(channels)).await;
    }
}

/// Channel names double as URL path segments on the control API
fn is_valid_channel_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;

    #[test]
    fn test_valid_channel_names() {
        assert!(is_valid_channel_name("news"));
        assert!(is_valid_channel_name("system-alerts"));
        assert!(is_valid_channel_name("user_notifications"));
        assert!(is_valid_channel_name("v1.events"));
    }

    #[test]
    fn test_invalid_channel_names() {
        assert!(!is_valid_channel_name(""));
        assert!(!is_valid_channel_name("channel with spaces"));
        assert!(!is_valid_channel_name("channel/path"));
        assert!(!is_valid_channel_name(&"a".repeat(65)));
    }

    #[test]
    fn test_payload_frame_kind() {
        assert!(matches!(
            payload_frame(axum::body::Bytes::from_static(b"hello")),
            Message::Text(_)
        ));
        assert!(matches!(
            payload_frame(axum::body::Bytes::from_static(&[0xff, 0xfe])),
            Message::Binary(_)
        ));
    }

    #[tokio::test]
    async fn test_subscribe_flow_replies_and_joins() {
        let messenger = Messenger::new("abc", "s3cret", DeliveryConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = messenger.register(None, tx);

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","payload":{"channels":["news","bad name"]}}"#,
        )
        .unwrap();
        handle_client_message(msg, &messenger, &handle).await;

        assert_eq!(messenger.get_channel_member_count("news"), 1);
        assert!(matches!(
            rx.recv().await,
            Some(OutboundMessage::Control(ServerMessage::Subscribed { channels })) if channels == vec!["news"]
        ));
        assert!(matches!(
            rx.recv().await,
            Some(OutboundMessage::Control(ServerMessage::Error { code, .. })) if code == "SUBSCRIPTION_ERROR"
        ));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"unsubscribe","payload":{"channels":["news"]}}"#,
        )
        .unwrap();
        handle_client_message(msg, &messenger, &handle).await;
        assert_eq!(messenger.get_channel_member_count("news"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_after_disconnect_reports_error() {
        let messenger = Messenger::new("abc", "s3cret", DeliveryConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = messenger.register(None, tx);
        messenger.unregister(handle.id).await;

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","payload":{"channels":["news","sport"]}}"#,
        )
        .unwrap();
        handle_client_message(msg, &messenger, &handle).await;

        assert_eq!(messenger.get_channel_member_count("news"), 0);
        assert!(matches!(
            rx.recv().await,
            Some(OutboundMessage::Control(ServerMessage::Error { code, .. })) if code == "SUBSCRIPTION_ERROR"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resubscribe_is_still_reported() {
        let messenger = Messenger::new("abc", "s3cret", DeliveryConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        let handle = messenger.register(None, tx);
        messenger.join(handle.id, "news").await;

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","payload":{"channels":["news"]}}"#).unwrap();
        handle_client_message(msg, &messenger, &handle).await;

        assert!(matches!(
            rx.recv().await,
            Some(OutboundMessage::Control(ServerMessage::Subscribed { channels })) if channels == vec!["news"]
        ));
    }

    #[tokio::test]
    async fn test_writer_pings_idle_socket() {
        let (_tx, rx) = mpsc::channel::<OutboundMessage>(8);
        let (sink, mut frames) = futures::channel::mpsc::unbounded::<Message>();

        let writer = tokio::spawn(write_outbound(rx, sink, Duration::from_millis(20)));

        let frame = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .unwrap();
        assert!(matches!(frame, Some(Message::Ping(_))));
        writer.abort();
    }

    #[tokio::test]
    async fn test_writer_forwards_payload_and_close() {
        let (tx, rx) = mpsc::channel::<OutboundMessage>(8);
        let (sink, frames) = futures::channel::mpsc::unbounded::<Message>();

        tx.send(OutboundMessage::Payload(axum::body::Bytes::from_static(b"hello")))
            .await
            .unwrap();
        tx.send(OutboundMessage::Close).await.unwrap();
        write_outbound(rx, sink, Duration::from_secs(60)).await;

        let frames: Vec<Message> = frames.collect().await;
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Message::Text(text) if text.as_str() == "hello"));
        assert!(matches!(frames[1], Message::Close(None)));
    }
}
