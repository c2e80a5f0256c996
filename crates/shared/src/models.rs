//! Shared data models for channels, pushes, presence and socket diagnostics.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --- Topics ---

/// Channel identifier, e.g. `room:lobby`.
///
/// Topics are compared byte-for-byte; no normalization is applied anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(topic: &str) -> Self {
        Self(topic.to_string())
    }
}

impl From<String> for Topic {
    fn from(topic: String) -> Self {
        Self(topic)
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Empty JSON object, the default payload for joins and pushes.
pub fn empty_payload() -> Value {
    Value::Object(Map::new())
}

// --- Retry ---

/// What to do with a push after the channel reports a timeout.
///
/// Delays are counted in retry ticks (nominally seconds). A push is due once
/// its tick count reaches the delay, so a delay of 0 retries on the very
/// next tick.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RetryStrategy {
    /// Abandon the push after its first timeout.
    #[default]
    Drop,
    /// Wait the same number of ticks before every retry, forever.
    Every(u64),
    /// Use `delays` one element per successive timeout, then `max` forever.
    Backoff { delays: Vec<u64>, max: u64 },
}

impl RetryStrategy {
    /// Ticks to wait before the next attempt, `None` for [`RetryStrategy::Drop`].
    pub fn delay(&self) -> Option<u64> {
        match self {
            RetryStrategy::Drop => None,
            RetryStrategy::Every(ticks) => Some(*ticks),
            RetryStrategy::Backoff { delays, max } => Some(delays.first().copied().unwrap_or(*max)),
        }
    }

    /// Consume the delay that was just used.
    pub fn advance(&mut self) {
        if let RetryStrategy::Backoff { delays, .. } = self {
            if !delays.is_empty() {
                delays.remove(0);
            }
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, RetryStrategy::Drop)
    }
}

// --- Channels ---

/// Parameters used when joining a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfig {
    pub topic: Topic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Join timeout in milliseconds; the transport default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Channel events the transport should forward once joined.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

impl JoinConfig {
    pub fn new(topic: impl Into<Topic>) -> Self {
        Self {
            topic: topic.into(),
            payload: None,
            timeout: None,
            events: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }
}

/// An application message for a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Push {
    pub topic: Topic,
    pub event: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
    /// Push timeout in milliseconds; the transport default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
    /// Application correlation token echoed back in channel responses.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<String>,
}

impl Push {
    pub fn new(topic: impl Into<Topic>, event: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload: empty_payload(),
            timeout: None,
            retry_strategy: RetryStrategy::Drop,
            r#ref: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    pub fn with_ref(mut self, r#ref: impl Into<String>) -> Self {
        self.r#ref = Some(r#ref.into());
        self
    }
}

// --- Socket ---

/// Options handed to the transport when it opens the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ConnectOption {
    BinaryType(String),
    HeartbeatIntervalMillis(u64),
    Logger(bool),
    LongpollerTimeout(u64),
    ReconnectAfterMillis(u64),
    RejoinAfterMillis(u64),
    Timeout(u64),
    Vsn(String),
}

impl ConnectOption {
    /// Key used for this option in the encoded options object.
    pub fn key(&self) -> &'static str {
        match self {
            ConnectOption::BinaryType(_) => "binaryType",
            ConnectOption::HeartbeatIntervalMillis(_) => "heartbeatIntervalMs",
            ConnectOption::Logger(_) => "logger",
            ConnectOption::LongpollerTimeout(_) => "longpollerTimeout",
            ConnectOption::ReconnectAfterMillis(_) => "reconnectAfterMs",
            ConnectOption::RejoinAfterMillis(_) => "rejoinAfterMs",
            ConnectOption::Timeout(_) => "timeout",
            ConnectOption::Vsn(_) => "vsn",
        }
    }

    fn value(&self) -> Value {
        match self {
            ConnectOption::BinaryType(v) | ConnectOption::Vsn(v) => Value::from(v.as_str()),
            ConnectOption::Logger(v) => Value::from(*v),
            ConnectOption::HeartbeatIntervalMillis(v)
            | ConnectOption::LongpollerTimeout(v)
            | ConnectOption::ReconnectAfterMillis(v)
            | ConnectOption::RejoinAfterMillis(v)
            | ConnectOption::Timeout(v) => Value::from(*v),
        }
    }
}

/// Encode options as one JSON object. Later options override earlier ones of the same kind.
pub fn encode_connect_options(options: &[ConnectOption]) -> Value {
    let mut map = Map::new();
    for option in options {
        map.insert(option.key().to_string(), option.value());
    }
    Value::Object(map)
}

/// Payload of a socket `Closed` event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedInfo {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub was_clean: bool,
}

/// Application message delivered on the socket rather than a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketMessage {
    #[serde(default)]
    pub join_ref: Option<String>,
    #[serde(default, rename = "ref")]
    pub r#ref: Option<String>,
    pub topic: Topic,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Passive socket diagnostics, filled in from info replies.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketInfo {
    #[serde(default)]
    pub connection_state: Option<String>,
    #[serde(default, rename = "endPointURL")]
    pub end_point_url: Option<String>,
    #[serde(default)]
    pub has_logger: Option<bool>,
    #[serde(default)]
    pub is_connected: bool,
    #[serde(default)]
    pub next_message_ref: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

// --- Presence ---

/// One client's presence on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub id: String,
    #[serde(default)]
    pub metas: Vec<Value>,
}

impl Presence {
    pub fn new(id: impl Into<String>, metas: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            metas,
        }
    }
}

/// Presence changes since the last state or diff.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDiff {
    #[serde(default)]
    pub joins: Vec<Presence>,
    #[serde(default)]
    pub leaves: Vec<Presence>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_consumes_delays_then_sticks_to_max() {
        let mut strategy = RetryStrategy::Backoff {
            delays: vec![1, 3],
            max: 10,
        };
        assert_eq!(strategy.delay(), Some(1));
        strategy.advance();
        assert_eq!(strategy.delay(), Some(3));
        strategy.advance();
        assert_eq!(strategy.delay(), Some(10));
        strategy.advance();
        assert_eq!(strategy.delay(), Some(10));
    }

    #[test]
    fn every_and_drop_delays() {
        let mut every = RetryStrategy::Every(5);
        every.advance();
        assert_eq!(every.delay(), Some(5));
        assert_eq!(RetryStrategy::Drop.delay(), None);
        assert!(RetryStrategy::default().is_drop());
    }

    #[test]
    fn later_connect_options_win() {
        let encoded = encode_connect_options(&[
            ConnectOption::Timeout(1_000),
            ConnectOption::Vsn("2.0.0".into()),
            ConnectOption::Timeout(5_000),
        ]);
        assert_eq!(encoded, json!({ "timeout": 5000, "vsn": "2.0.0" }));
    }

    #[test]
    fn push_decodes_with_defaults() {
        let push: Push = serde_json::from_value(json!({
            "topic": "room:lobby",
            "event": "msg",
            "retryStrategy": { "type": "every", "data": 2 },
            "ref": "client-1"
        }))
        .expect("push should decode");

        assert_eq!(push.topic.as_str(), "room:lobby");
        assert_eq!(push.payload, json!({}));
        assert_eq!(push.retry_strategy, RetryStrategy::Every(2));
        assert_eq!(push.r#ref.as_deref(), Some("client-1"));
    }

    #[test]
    fn socket_info_uses_transport_field_names() {
        let info: SocketInfo = serde_json::from_value(json!({
            "connectionState": "open",
            "endPointURL": "wss://example.org/socket/websocket",
            "hasLogger": null,
            "isConnected": true,
            "nextMessageRef": "7",
            "protocol": "wss"
        }))
        .expect("info should decode");

        assert_eq!(info.end_point_url.as_deref(), Some("wss://example.org/socket/websocket"));
        assert_eq!(info.has_logger, None);
        assert!(info.is_connected);
    }
}
