use axum::body::Bytes;
use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe { channels: Vec<String> },
    Unsubscribe { channels: Vec<String> },
    Ping,
}

/// Control messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(rename = "payload")]
        channels: Vec<String>,
    },
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        #[serde(rename = "payload")]
        channels: Vec<String>,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn subscribed(channels: Vec<String>) -> Self {
        Self::Subscribed { channels }
    }

    pub fn unsubscribed(channels: Vec<String>) -> Self {
        Self::Unsubscribed { channels }
    }
}

/// What a connection's writer task receives.
///
/// Published payloads are shared `Bytes`, so a fanout to many connections
/// never copies the body.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Published message, forwarded verbatim
    Payload(Bytes),
    /// Control reply, serialized by the writer
    Control(ServerMessage),
    /// Server-initiated disconnect
    Close,
}

impl OutboundMessage {
    pub fn to_json(&self) -> Option<Result<String, serde_json::Error>> {
        match self {
            Self::Control(message) => Some(serde_json::to_string(message)),
            Self::Payload(_) | Self::Close => None,
        }
    }
}
