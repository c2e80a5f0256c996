//! Classified events exposed to application code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_shared::{
    ClosedInfo, DecoderError, InvalidEvent, Presence, PresenceDiff, SocketInfo, SocketMessage,
    Topic,
};

/// Socket lifecycle and info replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SocketEvent {
    Opened,
    Closed(ClosedInfo),
    Error { message: String },
    /// Application message delivered on the socket, outside any channel.
    Message(SocketMessage),
    ConnectionState(String),
    EndPointUrl(String),
    HasLogger(Option<bool>),
    IsConnected(bool),
    MakeRef(String),
    Protocol(String),
    Info(SocketInfo),
}

/// Outcome of a join, push or leave, or a channel lifecycle notice.
///
/// `ref` on push responses is the application's own correlation token, not
/// the dispatch ref. It is `None` when the push had no token or had already
/// been resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelResponse {
    JoinOk {
        topic: Topic,
        payload: Value,
    },
    JoinError {
        topic: Topic,
        payload: Value,
    },
    JoinTimeout {
        topic: Topic,
        payload: Value,
    },
    PushOk {
        topic: Topic,
        event: String,
        #[serde(rename = "ref")]
        r#ref: Option<String>,
        payload: Value,
    },
    PushError {
        topic: Topic,
        event: String,
        #[serde(rename = "ref")]
        r#ref: Option<String>,
        payload: Value,
    },
    PushTimeout {
        topic: Topic,
        event: String,
        #[serde(rename = "ref")]
        r#ref: Option<String>,
        payload: Value,
    },
    LeaveOk {
        topic: Topic,
    },
    Closed {
        topic: Topic,
    },
    Error {
        topic: Topic,
    },
}

impl ChannelResponse {
    pub fn topic(&self) -> &Topic {
        match self {
            ChannelResponse::JoinOk { topic, .. }
            | ChannelResponse::JoinError { topic, .. }
            | ChannelResponse::JoinTimeout { topic, .. }
            | ChannelResponse::PushOk { topic, .. }
            | ChannelResponse::PushError { topic, .. }
            | ChannelResponse::PushTimeout { topic, .. }
            | ChannelResponse::LeaveOk { topic }
            | ChannelResponse::Closed { topic }
            | ChannelResponse::Error { topic } => topic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PresenceEvent {
    Join { topic: Topic, presence: Presence },
    Leave { topic: Topic, presence: Presence },
    State { topic: Topic, presences: Vec<Presence> },
    Diff { topic: Topic, diff: PresenceDiff },
}

/// The most recent thing the gateway told us, after classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    Socket(SocketEvent),
    Channel(ChannelResponse),
    /// Application message broadcast on a joined channel.
    ChannelMessage {
        topic: Topic,
        event: String,
        payload: Value,
    },
    Presence(PresenceEvent),
    DecoderError(DecoderError),
    InvalidEvent(InvalidEvent),
}
