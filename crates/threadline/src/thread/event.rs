//! Execution unit events and errors

use std::any::Any;

use serde_json::Value;

use crate::protocol::{ProtocolError, RemoteError};
use crate::status::ThreadStatus;

/// Which event reported a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorChannel {
    /// The work itself failed
    Error,
    /// The answer was lost or corrupted on the way back, or a handler failed
    MessageError,
}

/// What an execution unit settles with on failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThreadError {
    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Remote(RemoteError),

    #[error("{0}")]
    Protocol(ProtocolError),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("message handler panicked: {0}")]
    Handler(String),
}

impl ThreadError {
    pub fn is_message_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Handler(_))
    }

    pub fn channel(&self) -> ErrorChannel {
        if self.is_message_error() {
            ErrorChannel::MessageError
        } else {
            ErrorChannel::Error
        }
    }

    pub(crate) fn from_panic(panic: &(dyn Any + Send)) -> String {
        if let Some(message) = panic.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = panic.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        }
    }
}

impl From<ProtocolError> for ThreadError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Remote(remote) => Self::Remote(remote),
            other => Self::Protocol(other),
        }
    }
}

impl From<RemoteError> for ThreadError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

impl From<anyhow::Error> for ThreadError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{err:#}"))
    }
}

impl From<String> for ThreadError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for ThreadError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Event emitted by a [`Thread`](super::Thread)
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadEvent {
    /// The unit was started
    Init,
    /// Lifecycle transition; the payload is the result or error text on settle
    Status {
        status: ThreadStatus,
        previous: ThreadStatus,
        payload: Option<Value>,
    },
    /// The work succeeded
    Message(Value),
    /// The work failed
    Error(ThreadError),
    /// The answer could not be delivered
    MessageError(ThreadError),
    /// Always last: 0 on success, 1 on error
    Exit(i32),
}

impl ThreadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Status { .. } => "status",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
            Self::MessageError(_) => "messageerror",
            Self::Exit(_) => "exit",
        }
    }
}
