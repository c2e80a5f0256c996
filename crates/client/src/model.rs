//! The engine state shared by every tracker.
//!
//! Behaviour lives next to the state it owns: socket lifecycle in
//! `socket.rs`, membership in `channel.rs`, pushes in `push.rs` and inbound
//! classification in `reconciler.rs`. This module only holds the struct and
//! its read-only accessors.

use serde_json::Value;
use switchboard_shared::{
    ConnectOption, DecoderError, InvalidEvent, JoinConfig, Presence, SocketInfo, Topic,
};

use crate::channel::Membership;
use crate::config::ClientConfig;
use crate::event::ClientEvent;
use crate::presence::PresenceStore;
use crate::push::{PushQueue, QueuedPush};
use crate::socket::{SocketState, SocketTracker};

#[derive(Debug, Clone, Default)]
pub struct Model {
    pub(crate) socket: SocketTracker,
    pub(crate) channels: Membership,
    pub(crate) pushes: PushQueue,
    pub(crate) presence: PresenceStore,
    pub(crate) last_message: Option<ClientEvent>,
    pub(crate) decoder_errors: Vec<DecoderError>,
    pub(crate) last_decoder_error: Option<DecoderError>,
    pub(crate) invalid_events: Vec<InvalidEvent>,
    pub(crate) last_invalid_event: Option<InvalidEvent>,
}

impl Model {
    pub fn new(connect_options: Vec<ConnectOption>) -> Self {
        Self {
            socket: SocketTracker::new(connect_options),
            ..Self::default()
        }
    }

    /// Model seeded with the connect options and params from `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut model = Self::new(config.connect_options.clone());
        model.set_connect_params(config.connect_params.clone());
        model
    }

    // --- Socket ---

    pub fn socket_state(&self) -> SocketState {
        self.socket.state
    }

    pub fn is_connected(&self) -> bool {
        self.socket.state.is_open()
    }

    pub fn socket_info(&self) -> &SocketInfo {
        &self.socket.info
    }

    pub fn connect_options(&self) -> &[ConnectOption] {
        &self.socket.connect_options
    }

    pub fn connect_params(&self) -> &Value {
        &self.socket.connect_params
    }

    // --- Channels ---

    pub fn is_joined(&self, topic: &str) -> bool {
        self.channels.is_joined(topic)
    }

    pub fn is_being_joined(&self, topic: &str) -> bool {
        self.channels.is_being_joined(topic)
    }

    /// Topics awaiting `JoinOk`, in ascending order.
    pub fn being_joined(&self) -> impl Iterator<Item = &Topic> {
        self.channels.being_joined()
    }

    pub fn joined(&self) -> impl Iterator<Item = &Topic> {
        self.channels.joined()
    }

    pub fn join_config(&self, topic: &str) -> Option<&JoinConfig> {
        self.channels.config(topic)
    }

    // --- Pushes ---

    /// Number of pushes admitted so far; also the last dispatch ref handed out.
    pub fn push_count(&self) -> u64 {
        self.pushes.push_count()
    }

    /// Pushes waiting for a reply, ordered by dispatch ref.
    pub fn queued_pushes(&self) -> impl Iterator<Item = &QueuedPush> {
        self.pushes.queued()
    }

    /// Pushes parked until their retry delay elapses.
    pub fn timeout_pushes(&self) -> impl Iterator<Item = &QueuedPush> {
        self.pushes.timeouts()
    }

    pub fn queued_push(&self, dispatch_ref: u64) -> Option<&QueuedPush> {
        self.pushes.queued_push(dispatch_ref)
    }

    pub fn timeout_push(&self, dispatch_ref: u64) -> Option<&QueuedPush> {
        self.pushes.timeout_push(dispatch_ref)
    }

    // --- Presence ---

    pub fn presences(&self, topic: &str) -> Vec<&Presence> {
        self.presence.list(topic)
    }

    // --- History ---

    pub fn last_message(&self) -> Option<&ClientEvent> {
        self.last_message.as_ref()
    }

    pub fn decoder_errors(&self) -> &[DecoderError] {
        &self.decoder_errors
    }

    pub fn last_decoder_error(&self) -> Option<&DecoderError> {
        self.last_decoder_error.as_ref()
    }

    pub fn invalid_events(&self) -> &[InvalidEvent] {
        &self.invalid_events
    }

    pub fn last_invalid_event(&self) -> Option<&InvalidEvent> {
        self.last_invalid_event.as_ref()
    }
}
