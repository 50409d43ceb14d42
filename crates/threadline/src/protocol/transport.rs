//! Transport seam
//!
//! A transport is one remote execution context (an OS worker thread, a web
//! worker, a shared worker port). Backends implement [`TransportFactory`];
//! the protocol layer only sees serialized envelopes going in and
//! [`TransportEvent`]s coming out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Notification delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A serialized [`WorkerResponse`](super::WorkerResponse)
    Message(String),
    /// The backend received something it could not deserialize
    MessageError(String),
    /// The context crashed or disconnected
    Error(String),
}

/// Errors creating or using a transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The remote context could not be created
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// The transport was already terminated
    #[error("transport is closed")]
    Closed,

    /// Posting a message failed
    #[error("failed to post message: {0}")]
    Post(String),
}

/// Sending half of a remote context
pub trait Transport: Send + Sync {
    /// Post a serialized envelope
    fn post(&self, payload: String) -> Result<(), TransportError>;

    /// Destroy the context; no notification may be delivered afterwards
    fn terminate(&self);
}

/// A freshly created transport and its notification stream
pub struct TransportHandle {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportHandle {
    pub fn new(transport: Arc<dyn Transport>, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { transport, events }
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle").finish_non_exhaustive()
    }
}

/// Creates remote contexts
///
/// `source` identifies the worker entry point. `init` is the serialized
/// startup payload: the whole envelope for an ephemeral transport, the
/// filename-only envelope for a persistent one.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, source: &str, init: Option<String>) -> Result<TransportHandle, TransportError>;
}
