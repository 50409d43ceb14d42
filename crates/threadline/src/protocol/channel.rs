//! Request/response over a single transport
//!
//! A call posts one envelope and waits for the first of:
//!
//! ```text
//!            ┌── message ─────────► decode ──► value / RemoteError
//! post() ────┼── messageerror ────► Deserialization
//!            ├── error / closed ──► Transport
//!            ├── timeout ─────────► Timeout
//!            └── terminate() ─────► Terminated
//! ```
//!
//! Every other branch is dropped at that point, so a late event can never
//! settle the call twice. The transport is destroyed afterwards unless the
//! call settled through a plain message and the options keep it alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::message::{MessageOptions, WorkerMessage, WorkerResponse};
use super::transport::{Transport, TransportEvent, TransportFactory, TransportHandle};
use super::ProtocolError;

/// How a call settled, before decoding
enum Settlement {
    Message(String),
    MessageError(String),
    Error(String),
    Timeout(Duration),
    Terminated,
}

/// One transport plus the bookkeeping to drive calls over it.
///
/// Calls on the same channel are serialized: the response stream is held for
/// the whole call, so a second caller waits instead of stealing the first
/// caller's reply.
pub struct WorkerChannel {
    transport: Arc<dyn Transport>,
    events: Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    shutdown: CancellationToken,
    terminated: AtomicBool,
    persistent: bool,
}

impl WorkerChannel {
    pub fn new(handle: TransportHandle, persistent: bool) -> Self {
        Self {
            transport: handle.transport,
            events: Mutex::new(handle.events),
            shutdown: CancellationToken::new(),
            terminated: AtomicBool::new(false),
            persistent,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Destroy the transport. Pending calls settle with
    /// [`ProtocolError::Terminated`]. Returns false if already destroyed.
    pub fn terminate(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown.cancel();
        self.transport.terminate();
        debug!(persistent = self.persistent, "Transport terminated");
        true
    }

    /// Post `message` (if any) and wait for the single response.
    ///
    /// Ephemeral transports receive their envelope as startup data, so they
    /// call this with `None`.
    #[instrument(skip_all, fields(persistent = self.persistent))]
    pub async fn request(
        &self,
        message: Option<&WorkerMessage>,
        options: &MessageOptions,
    ) -> Result<Value, ProtocolError> {
        let mut events = tokio::select! {
            guard = self.events.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(ProtocolError::Terminated),
        };
        if self.is_terminated() {
            return Err(ProtocolError::Terminated);
        }

        if let Some(message) = message {
            let payload = message
                .encode()
                .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
            if let Err(err) = self.transport.post(payload) {
                self.terminate();
                return Err(err.into());
            }
        }

        let settlement = self.wait(&mut events, options).await;
        drop(events);

        let outcome = decode(settlement, options.return_event);
        let keep_alive = matches!(outcome, Ok(_) | Err(ProtocolError::Remote(_)));
        if options.should_terminate(self.persistent) || !keep_alive {
            self.terminate();
        }
        outcome
    }

    async fn wait(
        &self,
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
        options: &MessageOptions,
    ) -> Settlement {
        let limit = options.timeout();
        let timeout = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Settlement::Terminated,
            event = events.recv() => match event {
                Some(TransportEvent::Message(raw)) => Settlement::Message(raw),
                Some(TransportEvent::MessageError(detail)) => Settlement::MessageError(detail),
                Some(TransportEvent::Error(detail)) => Settlement::Error(detail),
                None => Settlement::Error("transport closed".to_string()),
            },
            _ = timeout => {
                let limit = limit.unwrap_or_default();
                warn!(timeout_ms = limit.as_millis() as u64, "Worker call timed out");
                Settlement::Timeout(limit)
            }
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for WorkerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("persistent", &self.persistent)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

fn decode(settlement: Settlement, return_event: bool) -> Result<Value, ProtocolError> {
    match settlement {
        Settlement::Message(raw) => {
            let response = WorkerResponse::decode(&raw)
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
            match response {
                WorkerResponse::Ok { value } if !return_event => Ok(value),
                WorkerResponse::Ok { .. } => serde_json::from_str(&raw)
                    .map_err(|e| ProtocolError::Deserialization(e.to_string())),
                WorkerResponse::Err { error } => Err(ProtocolError::Remote(error)),
            }
        }
        Settlement::MessageError(detail) => Err(ProtocolError::Deserialization(detail)),
        Settlement::Error(detail) => Err(ProtocolError::Transport(detail)),
        Settlement::Timeout(timeout) => Err(ProtocolError::Timeout { timeout }),
        Settlement::Terminated => Err(ProtocolError::Terminated),
    }
}

/// Run one call on a brand-new ephemeral transport seeded with `message`
pub async fn send_message(
    factory: &dyn TransportFactory,
    source: &str,
    message: &WorkerMessage,
    options: &MessageOptions,
) -> Result<Value, ProtocolError> {
    let init = message
        .encode()
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
    let handle = factory.create(source, Some(init)).await?;
    let channel = WorkerChannel::new(handle, false);
    channel.request(None, options).await
}
