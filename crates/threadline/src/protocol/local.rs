//! In-process transport backend
//!
//! Every transport is a dedicated OS thread running its own single-threaded
//! runtime. The thread answers envelopes from a [`ModuleLoader`], the same
//! way an external worker script would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::message::{MessageTarget, WorkerMessage, WorkerResponse};
use super::transport::{Transport, TransportError, TransportEvent, TransportFactory, TransportHandle};
use super::worker::dispatch;
use crate::module::{Module, ModuleError, ModuleLoader};

/// Spawns worker threads that resolve modules from a loader
pub struct LocalTransportFactory {
    loader: Arc<dyn ModuleLoader>,
    spawned: AtomicUsize,
}

impl LocalTransportFactory {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            spawned: AtomicUsize::new(0),
        }
    }

    /// Number of transports created so far
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LocalTransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransportFactory")
            .field("spawned", &self.spawned())
            .finish()
    }
}

#[async_trait]
impl TransportFactory for LocalTransportFactory {
    async fn create(&self, source: &str, init: Option<String>) -> Result<TransportHandle, TransportError> {
        let id = self.spawned.fetch_add(1, Ordering::SeqCst);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::Spawn(e.to_string()))?;

        let worker = LocalWorker {
            loader: Arc::clone(&self.loader),
            module: None,
            events: events_tx,
            shutdown: shutdown.clone(),
        };

        std::thread::Builder::new()
            .name(format!("threadline-worker-{id}"))
            .spawn(move || runtime.block_on(worker.run(init, inbox_rx)))
            .map_err(|e| TransportError::Spawn(e.to_string()))?;

        debug!(worker = id, source, "Spawned local worker");
        let transport = LocalTransport {
            inbox: inbox_tx,
            shutdown,
        };
        Ok(TransportHandle::new(Arc::new(transport), events_rx))
    }
}

struct LocalTransport {
    inbox: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl Transport for LocalTransport {
    fn post(&self, payload: String) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.inbox.send(payload).map_err(|_| TransportError::Closed)
    }

    fn terminate(&self) {
        self.shutdown.cancel();
    }
}

struct LocalWorker {
    loader: Arc<dyn ModuleLoader>,
    module: Option<Arc<Module>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shutdown: CancellationToken,
}

impl LocalWorker {
    async fn run(mut self, init: Option<String>, mut inbox: mpsc::UnboundedReceiver<String>) {
        if let Some(init) = init {
            self.process(&init).await;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                payload = inbox.recv() => match payload {
                    Some(payload) => self.process(&payload).await,
                    None => break,
                },
            }
        }
    }

    async fn process(&mut self, raw: &str) {
        let message = match WorkerMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                self.emit(TransportEvent::MessageError(e.to_string()));
                return;
            }
        };

        let module = match self.module(&message.filename) {
            Ok(module) => module,
            Err(e) if message.target() == MessageTarget::Load => {
                warn!(error = %e, "Worker failed to load module");
                self.emit(TransportEvent::Error(e.to_string()));
                return;
            }
            Err(e) => {
                self.reply(WorkerResponse::Err { error: e.into() });
                return;
            }
        };

        if message.target() == MessageTarget::Load {
            return;
        }

        let response = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            response = dispatch(&module, &message) => response,
        };
        self.reply(response);
    }

    fn module(&mut self, filename: &str) -> Result<Arc<Module>, ModuleError> {
        if let Some(module) = self.module.as_ref().filter(|m| m.name() == filename) {
            return Ok(Arc::clone(module));
        }
        let module = self
            .loader
            .load(filename)
            .ok_or_else(|| ModuleError::UnknownModule(filename.to_string()))?;
        self.module = Some(Arc::clone(&module));
        Ok(module)
    }

    fn reply(&self, response: WorkerResponse) {
        match response.encode() {
            Ok(raw) => self.emit(TransportEvent::Message(raw)),
            Err(e) => self.emit(TransportEvent::MessageError(e.to_string())),
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleRegistry;
    use crate::protocol::{send_message, MessageOptions, ProtocolError, RemoteError, WorkerChannel};
    use serde_json::{json, Value};

    fn factory() -> LocalTransportFactory {
        let registry = ModuleRegistry::new().with_module(
            Module::new("math")
                .with_fn("square", Some(1), |args: Vec<Value>| {
                    let n = args[0].as_f64().unwrap_or_default();
                    Ok::<_, RemoteError>(json!(n * n))
                })
                .with_async_fn("sleepy", None, |_| async {
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    Ok::<_, RemoteError>(Value::Null)
                }),
        );
        LocalTransportFactory::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_ephemeral_call_round_trip() {
        let factory = factory();
        let message = WorkerMessage::method("math", "square", vec![json!(3)]);

        let value = send_message(&factory, "local", &message, &MessageOptions::default())
            .await
            .unwrap();

        assert_eq!(value, json!(9.0));
        assert_eq!(factory.spawned(), 1);
    }

    #[tokio::test]
    async fn test_persistent_worker_serves_many_calls() {
        let factory = factory();
        let init = WorkerMessage::load("math").encode().unwrap();
        let handle = factory.create("local", Some(init)).await.unwrap();
        let channel = WorkerChannel::new(handle, true);

        for n in 1..=3 {
            let message = WorkerMessage::method("math", "square", vec![json!(n)]);
            let value = channel
                .request(Some(&message), &MessageOptions::default())
                .await
                .unwrap();
            assert_eq!(value, json!((n * n) as f64));
        }
        assert_eq!(factory.spawned(), 1);
        assert!(channel.terminate());
    }

    #[tokio::test]
    async fn test_undecodable_request_is_a_message_error() {
        let factory = factory();
        let handle = factory.create("local", Some("garbage".into())).await.unwrap();
        let channel = WorkerChannel::new(handle, false);

        let err = channel
            .request(None, &MessageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }

    #[tokio::test]
    async fn test_unknown_module_on_persistent_load_is_a_transport_error() {
        let factory = factory();
        let init = WorkerMessage::load("nope").encode().unwrap();
        let handle = factory.create("local", Some(init)).await.unwrap();
        let channel = WorkerChannel::new(handle, true);

        let err = channel
            .request(Some(&WorkerMessage::method("nope", "f", vec![])), &MessageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Transport(_)));
    }

    #[tokio::test]
    async fn test_terminate_interrupts_running_export() {
        let factory = factory();
        let init = WorkerMessage::load("math").encode().unwrap();
        let handle = factory.create("local", Some(init)).await.unwrap();
        let channel = Arc::new(WorkerChannel::new(handle, true));

        let pending = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                let message = WorkerMessage::method("math", "sleepy", vec![]);
                channel.request(Some(&message), &MessageOptions::default()).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        channel.terminate();
        assert_eq!(pending.await.unwrap(), Err(ProtocolError::Terminated));
    }
}
