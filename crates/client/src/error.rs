//! Errors surfaced by the client runtime.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The runtime task has exited and can no longer take requests.
    #[error("client runtime has stopped")]
    RuntimeStopped,
}

pub type Result<T> = std::result::Result<T, ClientError>;
