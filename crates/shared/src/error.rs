//! Shared error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Topic;
use crate::protocol::{EventScope, InboundEvent};

/// A gateway event whose payload could not be decoded.
///
/// Decoder errors are compared by value so repeated failures on the same
/// malformed payload can be recorded once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("could not decode {scope} event `{command}`{}: {message}", field_suffix(.field))]
pub struct DecoderError {
    pub scope: EventScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<Topic>,
    pub command: String,
    /// Payload field that failed, `None` when the payload as a whole was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl DecoderError {
    pub fn new(event: &InboundEvent, field: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            scope: event.scope,
            topic: event.topic.clone(),
            command: event.command.clone(),
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    /// Build from a serde failure on one payload field.
    pub fn field(event: &InboundEvent, field: &str, err: &serde_json::Error) -> Self {
        Self::new(event, Some(field), err.to_string())
    }

    /// Build from a serde failure on the whole payload.
    pub fn payload(event: &InboundEvent, err: &serde_json::Error) -> Self {
        Self::new(event, None, err.to_string())
    }
}

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(field) => format!(" (field `{field}`)"),
        None => String::new(),
    }
}
