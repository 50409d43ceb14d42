//! Worker communication protocol
//!
//! This module provides:
//! - [`WorkerMessage`] / [`WorkerResponse`] - the wire envelopes
//! - [`MessageOptions`] - per-call timeout and teardown policy
//! - [`Transport`] / [`TransportFactory`] - the seam to a remote execution context
//! - [`WorkerChannel`] / [`send_message`] - the call driver
//! - [`LocalTransportFactory`] - in-process backend
//! - [`worker`] - the handler that runs inside the remote context

mod channel;
mod local;
mod message;
mod transport;
pub mod worker;

use std::time::Duration;

pub use channel::{send_message, WorkerChannel};
pub use local::LocalTransportFactory;
pub use message::{MessageOptions, MessageTarget, RemoteError, WorkerMessage, WorkerResponse};
pub use transport::{Transport, TransportError, TransportEvent, TransportFactory, TransportHandle};

/// Ways a worker call can fail
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// The invoked export raised
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The response could not be reconstructed
    #[error("failed to deserialize response: {0}")]
    Deserialization(String),

    /// The transport crashed, disconnected or refused the message
    #[error("transport error: {0}")]
    Transport(String),

    /// No response within the configured duration
    #[error("worker call timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// The transport was terminated before the call settled
    #[error("transport terminated")]
    Terminated,

    /// The request envelope could not be serialized
    #[error("failed to serialize request: {0}")]
    Serialization(String),
}

impl ProtocolError {
    /// True for failures of the channel rather than of the called code
    pub fn is_message_error(&self) -> bool {
        !matches!(self, Self::Remote(_))
    }
}

impl From<TransportError> for ProtocolError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}
