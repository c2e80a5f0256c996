//! Socket lifecycle: Disconnected → Opening → Open → Disconnected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_shared::{empty_payload, ClosedInfo, Command, ConnectOption, SocketInfo, Topic};
use tracing::{debug, warn};

use crate::event::SocketEvent;
use crate::model::Model;

/// Connection state of the socket as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SocketState {
    #[default]
    Disconnected,
    /// A connect command has been emitted and `Opened` has not arrived yet.
    Opening,
    Open,
}

impl SocketState {
    pub fn is_open(self) -> bool {
        matches!(self, SocketState::Open)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SocketTracker {
    pub(crate) state: SocketState,
    pub(crate) info: SocketInfo,
    pub(crate) connect_options: Vec<ConnectOption>,
    pub(crate) connect_params: Value,
}

impl SocketTracker {
    pub(crate) fn new(connect_options: Vec<ConnectOption>) -> Self {
        Self {
            state: SocketState::Disconnected,
            info: SocketInfo::default(),
            connect_options,
            connect_params: empty_payload(),
        }
    }
}

impl Default for SocketTracker {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Model {
    /// Open the socket. Does nothing unless the socket is disconnected.
    pub fn connect(&mut self) -> Vec<Command> {
        if self.socket.state != SocketState::Disconnected {
            debug!("connect ignored, socket is {:?}", self.socket.state);
            return Vec::new();
        }
        vec![self.open_socket()]
    }

    /// Ask the transport to close the socket. State changes when `Closed` arrives.
    pub fn disconnect(&mut self, code: Option<u16>) -> Vec<Command> {
        debug!(?code, "disconnect requested");
        vec![Command::Disconnect { code }]
    }

    pub fn set_connect_options(&mut self, options: Vec<ConnectOption>) {
        self.socket.connect_options = options;
    }

    /// Append options; when encoded, a later option replaces an earlier one of the same kind.
    pub fn add_connect_options(&mut self, options: impl IntoIterator<Item = ConnectOption>) {
        self.socket.connect_options.extend(options);
    }

    pub fn set_connect_params(&mut self, params: Value) {
        self.socket.connect_params = params;
    }

    pub fn request_connection_state(&self) -> Vec<Command> {
        vec![Command::ConnectionState]
    }

    pub fn request_end_point_url(&self) -> Vec<Command> {
        vec![Command::EndPointUrl]
    }

    pub fn request_has_logger(&self) -> Vec<Command> {
        vec![Command::HasLogger]
    }

    pub fn request_is_connected(&self) -> Vec<Command> {
        vec![Command::IsConnected]
    }

    pub fn request_make_ref(&self) -> Vec<Command> {
        vec![Command::MakeRef]
    }

    pub fn request_protocol(&self) -> Vec<Command> {
        vec![Command::Protocol]
    }

    pub fn request_socket_info(&self) -> Vec<Command> {
        vec![Command::Info]
    }

    pub(crate) fn open_socket(&mut self) -> Command {
        debug!("opening socket");
        self.socket.state = SocketState::Opening;
        Command::Connect {
            options: self.socket.connect_options.clone(),
            params: self.socket.connect_params.clone(),
        }
    }

    /// Socket is up: join every topic that was waiting. Queued pushes go
    /// out when each `JoinOk` arrives.
    pub(crate) fn on_socket_opened(&mut self) -> Vec<Command> {
        debug!("socket opened");
        self.socket.state = SocketState::Open;
        self.socket.info.is_connected = true;

        let pending: Vec<Topic> = self.channels.being_joined().cloned().collect();
        let mut commands = Vec::new();
        for topic in &pending {
            commands.extend(self.join_command(topic));
        }
        commands
    }

    pub(crate) fn on_socket_closed(&mut self, info: &ClosedInfo) {
        debug!(
            code = ?info.code,
            was_clean = info.was_clean,
            "socket closed: {}",
            info.reason.as_deref().unwrap_or("no reason")
        );
        self.socket.state = SocketState::Disconnected;
        self.socket.info.is_connected = false;
    }

    /// Record diagnostics carried by a socket event. Never touches the state machine.
    pub(crate) fn apply_socket_diagnostics(&mut self, event: &SocketEvent) {
        let info = &mut self.socket.info;
        match event {
            SocketEvent::Error { message } => warn!("socket error: {}", message),
            SocketEvent::ConnectionState(state) => info.connection_state = Some(state.clone()),
            SocketEvent::EndPointUrl(url) => info.end_point_url = Some(url.clone()),
            SocketEvent::HasLogger(has_logger) => info.has_logger = *has_logger,
            SocketEvent::IsConnected(connected) => info.is_connected = *connected,
            SocketEvent::MakeRef(next_ref) => info.next_message_ref = Some(next_ref.clone()),
            SocketEvent::Protocol(protocol) => info.protocol = Some(protocol.clone()),
            SocketEvent::Info(reply) => *info = reply.clone(),
            SocketEvent::Opened | SocketEvent::Closed(_) | SocketEvent::Message(_) => {}
        }
    }
}
