//! Gateway protocol: outbound commands, inbound events and their envelope.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::{encode_connect_options, ConnectOption, Topic};

/// Inbound command names, grouped by scope.
pub mod inbound {
    pub mod socket {
        pub const OPENED: &str = "Opened";
        pub const CLOSED: &str = "Closed";
        pub const ERROR: &str = "Error";
        pub const MESSAGE: &str = "Message";
        pub const CONNECTION_STATE: &str = "ConnectionState";
        pub const END_POINT_URL: &str = "EndPointURL";
        pub const HAS_LOGGER: &str = "HasLogger";
        pub const IS_CONNECTED: &str = "IsConnected";
        pub const MAKE_REF: &str = "MakeRef";
        pub const PROTOCOL: &str = "Protocol";
        pub const INFO: &str = "Info";
    }

    pub mod channel {
        pub const JOIN_OK: &str = "JoinOk";
        pub const JOIN_ERROR: &str = "JoinError";
        pub const JOIN_TIMEOUT: &str = "JoinTimeout";
        pub const PUSH_OK: &str = "PushOk";
        pub const PUSH_ERROR: &str = "PushError";
        pub const PUSH_TIMEOUT: &str = "PushTimeout";
        pub const MESSAGE: &str = "Message";
        pub const ERROR: &str = "Error";
        pub const LEAVE_OK: &str = "LeaveOk";
        pub const CLOSED: &str = "Closed";
    }

    pub mod presence {
        pub const JOIN: &str = "Join";
        pub const LEAVE: &str = "Leave";
        pub const STATE: &str = "State";
        pub const DIFF: &str = "Diff";
    }
}

/// Which part of the transport an inbound event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventScope {
    Socket,
    Channel,
    Presence,
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventScope::Socket => "socket",
            EventScope::Channel => "channel",
            EventScope::Presence => "presence",
        };
        f.write_str(name)
    }
}

/// A decoded event received from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub scope: EventScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

impl InboundEvent {
    pub fn socket(command: impl Into<String>, payload: Value) -> Self {
        Self {
            scope: EventScope::Socket,
            topic: None,
            command: command.into(),
            payload,
        }
    }

    pub fn channel(topic: impl Into<Topic>, command: impl Into<String>, payload: Value) -> Self {
        Self {
            scope: EventScope::Channel,
            topic: Some(topic.into()),
            command: command.into(),
            payload,
        }
    }

    pub fn presence(topic: impl Into<Topic>, command: impl Into<String>, payload: Value) -> Self {
        Self {
            scope: EventScope::Presence,
            topic: Some(topic.into()),
            command: command.into(),
            payload,
        }
    }
}

/// An inbound event whose command name is not part of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidEvent {
    pub scope: EventScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
    pub command: String,
}

impl From<&InboundEvent> for InvalidEvent {
    fn from(event: &InboundEvent) -> Self {
        Self {
            scope: event.scope,
            topic: event.topic.clone(),
            command: event.command.clone(),
        }
    }
}

/// Decode one field of an event payload. A missing field decodes as `null`.
pub fn decode_field<T: DeserializeOwned>(payload: &Value, field: &str) -> Result<T, serde_json::Error> {
    T::deserialize(payload.get(field).unwrap_or(&Value::Null))
}

/// Structured command for the gateway to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect {
        options: Vec<ConnectOption>,
        params: Value,
    },
    Disconnect {
        code: Option<u16>,
    },
    ConnectionState,
    EndPointUrl,
    HasLogger,
    IsConnected,
    MakeRef,
    Protocol,
    Info,
    Join {
        topic: Topic,
        payload: Option<Value>,
        timeout: Option<u64>,
    },
    Leave {
        topic: Topic,
    },
    Push {
        topic: Topic,
        event: String,
        payload: Value,
        timeout: Option<u64>,
        dispatch_ref: u64,
    },
    On {
        topic: Topic,
        event: String,
    },
    AllOn {
        topic: Topic,
        events: Vec<String>,
    },
    Off {
        topic: Topic,
        event: String,
    },
    AllOff {
        topic: Topic,
        events: Vec<String>,
    },
}

impl Command {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "connect",
            Command::Disconnect { .. } => "disconnect",
            Command::ConnectionState => "connectionState",
            Command::EndPointUrl => "endPointURL",
            Command::HasLogger => "hasLogger",
            Command::IsConnected => "isConnected",
            Command::MakeRef => "makeRef",
            Command::Protocol => "protocol",
            Command::Info => "info",
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::Push { .. } => "push",
            Command::On { .. } => "on",
            Command::AllOn { .. } => "allOn",
            Command::Off { .. } => "off",
            Command::AllOff { .. } => "allOff",
        }
    }

    /// Topic for channel-scope commands, `None` for socket-scope ones.
    pub fn topic(&self) -> Option<&Topic> {
        match self {
            Command::Join { topic, .. }
            | Command::Leave { topic }
            | Command::Push { topic, .. }
            | Command::On { topic, .. }
            | Command::AllOn { topic, .. }
            | Command::Off { topic, .. }
            | Command::AllOff { topic, .. } => Some(topic),
            _ => None,
        }
    }

    fn payload(&self) -> Value {
        match self {
            Command::Connect { options, params } => json!({
                "options": encode_connect_options(options),
                "params": params,
            }),
            Command::Disconnect { code } => match code {
                Some(code) => json!({ "code": code }),
                None => Value::Null,
            },
            Command::Join {
                payload, timeout, ..
            } => {
                let mut map = Map::new();
                if let Some(payload) = payload {
                    map.insert("payload".into(), payload.clone());
                }
                if let Some(timeout) = timeout {
                    map.insert("timeout".into(), json!(timeout));
                }
                Value::Object(map)
            }
            Command::Push {
                event,
                payload,
                timeout,
                dispatch_ref,
                ..
            } => {
                let mut map = Map::new();
                map.insert("event".into(), json!(event));
                map.insert("payload".into(), payload.clone());
                if let Some(timeout) = timeout {
                    map.insert("timeout".into(), json!(timeout));
                }
                map.insert("ref".into(), json!(dispatch_ref));
                Value::Object(map)
            }
            Command::On { event, .. } | Command::Off { event, .. } => json!({ "event": event }),
            Command::AllOn { events, .. } | Command::AllOff { events, .. } => {
                json!({ "events": events })
            }
            Command::ConnectionState
            | Command::EndPointUrl
            | Command::HasLogger
            | Command::IsConnected
            | Command::MakeRef
            | Command::Protocol
            | Command::Info
            | Command::Leave { .. } => Value::Null,
        }
    }

    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage {
            topic: self.topic().cloned(),
            command: self.name().to_string(),
            payload: self.payload(),
        }
    }
}

/// Wire shape of an outbound command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

/// Frame wrapper added when a message crosses the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            ts: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl Envelope<OutboundMessage> {
    /// Wrap a command; pushes are correlated by their dispatch ref.
    pub fn for_command(command: &Command) -> Self {
        let envelope = Self::new(command.to_message());
        match command {
            Command::Push { dispatch_ref, .. } => envelope.with_correlation(dispatch_ref.to_string()),
            _ => envelope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_command_carries_dispatch_ref() {
        let command = Command::Push {
            topic: Topic::from("room:lobby"),
            event: "msg".into(),
            payload: json!({ "body": "hi" }),
            timeout: Some(2_000),
            dispatch_ref: 7,
        };

        let message = command.to_message();
        assert_eq!(message.topic, Some(Topic::from("room:lobby")));
        assert_eq!(message.command, "push");
        assert_eq!(
            message.payload,
            json!({ "event": "msg", "payload": { "body": "hi" }, "timeout": 2000, "ref": 7 })
        );

        let envelope = Envelope::for_command(&command);
        assert_eq!(envelope.correlation_id.as_deref(), Some("7"));
    }

    #[test]
    fn socket_commands_have_no_topic() {
        let message = Command::Connect {
            options: vec![ConnectOption::Logger(true)],
            params: json!({ "token": "abc" }),
        }
        .to_message();

        assert_eq!(message.topic, None);
        assert_eq!(message.command, "connect");
        assert_eq!(
            message.payload,
            json!({ "options": { "logger": true }, "params": { "token": "abc" } })
        );
        assert_eq!(Command::EndPointUrl.name(), "endPointURL");
    }

    #[test]
    fn join_payload_omits_unset_fields() {
        let message = Command::Join {
            topic: Topic::from("room:lobby"),
            payload: None,
            timeout: None,
        }
        .to_message();
        assert_eq!(message.payload, json!({}));
    }

    #[test]
    fn envelope_flattens_message() {
        let envelope = Envelope::for_command(&Command::Leave {
            topic: Topic::from("room:1"),
        });
        let value = serde_json::to_value(&envelope).expect("envelope should serialize");
        assert_eq!(value["topic"], json!("room:1"));
        assert_eq!(value["command"], json!("leave"));
        assert!(value.get("correlationId").is_none());
    }

    #[test]
    fn inbound_event_decodes_without_topic() {
        let event: InboundEvent = serde_json::from_value(json!({
            "scope": "socket",
            "command": "Opened"
        }))
        .expect("event should decode");
        assert_eq!(event, InboundEvent::socket("Opened", Value::Null));
    }

    #[test]
    fn missing_field_decodes_as_null() {
        let payload = json!({ "event": "msg" });
        let event: String = decode_field(&payload, "event").expect("event present");
        assert_eq!(event, "msg");
        assert!(decode_field::<u64>(&payload, "ref").is_err());
        assert_eq!(decode_field::<Value>(&payload, "payload").ok(), Some(Value::Null));
    }
}
