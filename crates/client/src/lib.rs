//! Switchboard client - pub/sub orchestration engine
//!
//! The engine tracks socket and channel state, queues and retries pushes,
//! and reconciles gateway events. It performs no I/O: [`Model::update`] and
//! the operation methods return [`Command`]s for a transport to execute.
//! [`runtime`] drives a model from a tokio task.

mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod model;
mod presence;
pub mod push;
pub mod reconciler;
pub mod runtime;
pub mod socket;

pub use config::ClientConfig;
pub use error::ClientError;
pub use event::{ChannelResponse, ClientEvent, PresenceEvent, SocketEvent};
pub use model::Model;
pub use push::QueuedPush;
pub use reconciler::Msg;
pub use runtime::{spawn, ClientHandle, EventStream, GatewayBindings, GatewayPeer, InfoRequest};
pub use socket::SocketState;
pub use switchboard_shared::Command;
