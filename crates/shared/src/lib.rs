//! Shared types for the switchboard gateway protocol.
//!
//! Both sides of the gateway use these: the orchestration engine produces
//! [`Command`]s and consumes [`InboundEvent`]s, a transport binding does the
//! reverse.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
