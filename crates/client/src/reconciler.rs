//! Inbound event classification and routing.
//!
//! [`Model::update`] is the only way gateway events and retry ticks reach the
//! engine. Each gateway event is classified into exactly one
//! [`ClientEvent`], routed to the tracker that owns the state it touches, and
//! stored as the model's last message.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use switchboard_shared::inbound::{channel, presence, socket};
use switchboard_shared::{
    decode_field, ClosedInfo, Command, DecoderError, EventScope, InboundEvent, InvalidEvent,
    Presence, PresenceDiff, SocketInfo, SocketMessage, Topic,
};
use tracing::warn;

use crate::event::{ChannelResponse, ClientEvent, PresenceEvent, SocketEvent};
use crate::model::Model;

/// Input to [`Model::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// An event received from the gateway.
    Gateway(InboundEvent),
    /// One period of the retry clock elapsed.
    RetryTick,
}

type Reconciled = Result<(ClientEvent, Vec<Command>), Vec<DecoderError>>;

struct PushReply {
    event: String,
    payload: Value,
    dispatch_ref: u64,
}

impl Model {
    /// Process one message to completion and return the commands it produced.
    pub fn update(&mut self, msg: Msg) -> Vec<Command> {
        let event = match msg {
            Msg::RetryTick => return self.on_retry_tick(),
            Msg::Gateway(event) => event,
        };

        let reconciled = match event.scope {
            EventScope::Socket => self.reconcile_socket(&event),
            EventScope::Channel => self.reconcile_channel(&event),
            EventScope::Presence => self.reconcile_presence(&event),
        };

        match reconciled {
            Ok((classified, commands)) => {
                self.last_message = Some(classified);
                commands
            }
            Err(errors) => {
                for error in errors {
                    self.record_decoder_error(error);
                }
                if let Some(error) = &self.last_decoder_error {
                    self.last_message = Some(ClientEvent::DecoderError(error.clone()));
                }
                Vec::new()
            }
        }
    }

    fn reconcile_socket(&mut self, event: &InboundEvent) -> Reconciled {
        let classified = match event.command.as_str() {
            socket::OPENED => {
                let commands = self.on_socket_opened();
                return Ok((ClientEvent::Socket(SocketEvent::Opened), commands));
            }
            socket::CLOSED => {
                let info = self.decode_closed(event);
                self.on_socket_closed(&info);
                SocketEvent::Closed(info)
            }
            socket::ERROR => SocketEvent::Error {
                message: decode_error_message(event)?,
            },
            socket::MESSAGE => SocketEvent::Message(decode_payload::<SocketMessage>(event)?),
            socket::CONNECTION_STATE => SocketEvent::ConnectionState(decode_payload(event)?),
            socket::END_POINT_URL => SocketEvent::EndPointUrl(decode_payload(event)?),
            socket::HAS_LOGGER => SocketEvent::HasLogger(decode_payload(event)?),
            socket::IS_CONNECTED => SocketEvent::IsConnected(decode_payload(event)?),
            socket::MAKE_REF => SocketEvent::MakeRef(decode_payload(event)?),
            socket::PROTOCOL => SocketEvent::Protocol(decode_payload(event)?),
            socket::INFO => SocketEvent::Info(decode_payload::<SocketInfo>(event)?),
            _ => return Ok(self.invalid(event)),
        };

        self.apply_socket_diagnostics(&classified);
        Ok((ClientEvent::Socket(classified), Vec::new()))
    }

    fn reconcile_channel(&mut self, event: &InboundEvent) -> Reconciled {
        let topic = require_topic(event)?;
        let payload = event.payload.clone();

        let (response, commands) = match event.command.as_str() {
            channel::JOIN_OK => {
                let commands = self.on_join_ok(&topic);
                (ChannelResponse::JoinOk { topic, payload }, commands)
            }
            channel::JOIN_ERROR => {
                warn!(%topic, "join rejected: {}", payload);
                (ChannelResponse::JoinError { topic, payload }, Vec::new())
            }
            channel::JOIN_TIMEOUT => {
                warn!(%topic, "join timed out");
                (ChannelResponse::JoinTimeout { topic, payload }, Vec::new())
            }
            channel::PUSH_OK => {
                let reply = decode_push_reply(event)?;
                let r#ref = self.on_push_reply(reply.dispatch_ref);
                let response = ChannelResponse::PushOk {
                    topic,
                    event: reply.event,
                    r#ref,
                    payload: reply.payload,
                };
                (response, Vec::new())
            }
            channel::PUSH_ERROR => {
                let reply = decode_push_reply(event)?;
                let r#ref = self.on_push_reply(reply.dispatch_ref);
                let response = ChannelResponse::PushError {
                    topic,
                    event: reply.event,
                    r#ref,
                    payload: reply.payload,
                };
                (response, Vec::new())
            }
            channel::PUSH_TIMEOUT => {
                let reply = decode_push_reply(event)?;
                let r#ref = self.on_push_timeout(reply.dispatch_ref);
                let response = ChannelResponse::PushTimeout {
                    topic,
                    event: reply.event,
                    r#ref,
                    payload: reply.payload,
                };
                (response, Vec::new())
            }
            channel::MESSAGE => {
                let (name, payload) = decode_channel_message(event)?;
                let classified = ClientEvent::ChannelMessage {
                    topic,
                    event: name,
                    payload,
                };
                return Ok((classified, Vec::new()));
            }
            channel::LEAVE_OK => {
                self.on_leave_ok(&topic);
                (ChannelResponse::LeaveOk { topic }, Vec::new())
            }
            channel::CLOSED => (ChannelResponse::Closed { topic }, Vec::new()),
            channel::ERROR => {
                warn!(%topic, "channel error");
                (ChannelResponse::Error { topic }, Vec::new())
            }
            _ => return Ok(self.invalid(event)),
        };

        Ok((ClientEvent::Channel(response), commands))
    }

    fn reconcile_presence(&mut self, event: &InboundEvent) -> Reconciled {
        let topic = require_topic(event)?;

        let classified = match event.command.as_str() {
            presence::JOIN => {
                let presence = decode_payload::<Presence>(event)?;
                self.presence.join(&topic, &presence);
                PresenceEvent::Join { topic, presence }
            }
            presence::LEAVE => {
                let presence = decode_payload::<Presence>(event)?;
                self.presence.leave(&topic, &presence);
                PresenceEvent::Leave { topic, presence }
            }
            presence::STATE => {
                let presences = decode_payload::<Vec<Presence>>(event)?;
                self.presence.replace(&topic, &presences);
                PresenceEvent::State { topic, presences }
            }
            presence::DIFF => {
                let diff = decode_payload::<PresenceDiff>(event)?;
                self.presence.apply_diff(&topic, &diff);
                PresenceEvent::Diff { topic, diff }
            }
            _ => return Ok(self.invalid(event)),
        };

        Ok((ClientEvent::Presence(classified), Vec::new()))
    }

    /// `Closed` always moves the socket to Disconnected; a malformed payload
    /// is recorded and replaced with an empty one.
    fn decode_closed(&mut self, event: &InboundEvent) -> ClosedInfo {
        if event.payload.is_null() {
            return ClosedInfo::default();
        }
        match ClosedInfo::deserialize(&event.payload) {
            Ok(info) => info,
            Err(err) => {
                self.record_decoder_error(DecoderError::payload(event, &err));
                ClosedInfo::default()
            }
        }
    }

    fn invalid(&mut self, event: &InboundEvent) -> (ClientEvent, Vec<Command>) {
        let invalid = InvalidEvent::from(event);
        warn!(
            scope = %invalid.scope,
            topic = ?invalid.topic,
            "unrecognised event `{}`",
            invalid.command
        );
        if !self.invalid_events.contains(&invalid) {
            self.invalid_events.push(invalid.clone());
        }
        self.last_invalid_event = Some(invalid.clone());
        (ClientEvent::InvalidEvent(invalid), Vec::new())
    }

    fn record_decoder_error(&mut self, error: DecoderError) {
        warn!("{}", error);
        if !self.decoder_errors.contains(&error) {
            self.decoder_errors.push(error.clone());
        }
        self.last_decoder_error = Some(error);
    }
}

fn decode_payload<T: DeserializeOwned>(event: &InboundEvent) -> Result<T, Vec<DecoderError>> {
    T::deserialize(&event.payload).map_err(|err| vec![DecoderError::payload(event, &err)])
}

fn require_topic(event: &InboundEvent) -> Result<Topic, Vec<DecoderError>> {
    event.topic.clone().ok_or_else(|| {
        vec![DecoderError::new(
            event,
            Some("topic"),
            format!("{} event without a topic", event.scope),
        )]
    })
}

/// Socket errors arrive either as a bare string or as `{message}` / `{reason}`.
fn decode_error_message(event: &InboundEvent) -> Result<String, Vec<DecoderError>> {
    let payload = &event.payload;
    payload
        .as_str()
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .or_else(|| payload.get("reason").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| {
            vec![DecoderError::new(
                event,
                Some("message"),
                "expected a string or an object with `message` or `reason`",
            )]
        })
}

/// Decode `{event, payload, ref}`. Each failing field is reported on its own.
fn decode_push_reply(event: &InboundEvent) -> Result<PushReply, Vec<DecoderError>> {
    let name = decode_field::<String>(&event.payload, "event");
    let payload = decode_field::<Value>(&event.payload, "payload");
    let dispatch_ref = decode_field::<u64>(&event.payload, "ref");

    match (name, payload, dispatch_ref) {
        (Ok(name), Ok(payload), Ok(dispatch_ref)) => Ok(PushReply {
            event: name,
            payload,
            dispatch_ref,
        }),
        (name, payload, dispatch_ref) => {
            let mut errors = Vec::new();
            if let Err(err) = name {
                errors.push(DecoderError::field(event, "event", &err));
            }
            if let Err(err) = payload {
                errors.push(DecoderError::field(event, "payload", &err));
            }
            if let Err(err) = dispatch_ref {
                errors.push(DecoderError::field(event, "ref", &err));
            }
            Err(errors)
        }
    }
}

fn decode_channel_message(event: &InboundEvent) -> Result<(String, Value), Vec<DecoderError>> {
    let name = decode_field::<String>(&event.payload, "event")
        .map_err(|err| vec![DecoderError::field(event, "event", &err)])?;
    let payload = decode_field::<Value>(&event.payload, "payload")
        .map_err(|err| vec![DecoderError::field(event, "payload", &err)])?;
    Ok((name, payload))
}
