//! Remote-callable view of a module
//!
//! [`ModuleProxy::get`] resolves an export name against the host-side copy of
//! the export table and hands back something that runs the export inside a
//! worker context:
//!
//! ```text
//! get(name) ─┬─ terminate key (persistent only) ──► Terminator
//!            ├─ no such export ───────────────────► None, no transport created
//!            └─ method / property ────────────────► RemoteExport
//!                                                     └─ invoke(args)
//!                                                         ├─ execute_immediately ──► PendingCall
//!                                                         └─ otherwise ────────────► DeferredCall
//! ```
//!
//! An ephemeral proxy creates one transport per call, seeded with the whole
//! envelope. A persistent proxy creates one transport seeded with the
//! filename and posts every call to it; the transport is created again on
//! the next call if it was terminated. Terminating while that transport is
//! still being created discards it and settles the waiting call with
//! [`ProtocolError::Terminated`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use super::registry::{ExportKind, Module, ModuleError, ModuleLoader};
use crate::protocol::{
    send_message, MessageOptions, ProtocolError, TransportFactory, WorkerChannel, WorkerMessage,
};

/// Proxy behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Keep one transport alive across calls
    pub persistent: bool,
    /// Start the call as soon as the export is invoked
    pub execute_immediately: bool,
    /// Worker entry point handed to the transport factory
    pub source: String,
    /// Options applied to every call
    pub options: MessageOptions,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            persistent: false,
            execute_immediately: true,
            source: crate::pool::DEFAULT_WORKER_SOURCE.to_string(),
            options: MessageOptions::default(),
        }
    }
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_execute_immediately(mut self, execute_immediately: bool) -> Self {
        self.execute_immediately = execute_immediately;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_options(mut self, options: MessageOptions) -> Self {
        self.options = options;
        self
    }
}

struct ProxyInner {
    module: Arc<Module>,
    factory: Arc<dyn TransportFactory>,
    config: ProxyConfig,
    channel: parking_lot::Mutex<Option<Arc<WorkerChannel>>>,
    connecting: tokio::sync::Mutex<()>,
    /// Bumped by every terminate; a transport created across a bump is dropped
    generation: AtomicU64,
}

/// Module whose exports run in worker contexts
#[derive(Clone)]
pub struct ModuleProxy {
    inner: Arc<ProxyInner>,
}

impl ModuleProxy {
    pub fn new(module: Arc<Module>, factory: Arc<dyn TransportFactory>, config: ProxyConfig) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                module,
                factory,
                config,
                channel: parking_lot::Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Resolve `filename` through `loader` and wrap it
    pub fn load(
        loader: &dyn ModuleLoader,
        filename: &str,
        factory: Arc<dyn TransportFactory>,
        config: ProxyConfig,
    ) -> Result<Self, ModuleError> {
        let module = loader
            .load(filename)
            .ok_or_else(|| ModuleError::UnknownModule(filename.to_string()))?;
        Ok(Self::new(module, factory, config))
    }

    pub fn filename(&self) -> &str {
        self.inner.module.name()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.config.persistent
    }

    /// Look up a member by name
    pub fn get(&self, name: &str) -> Option<ProxyMember> {
        let config = &self.inner.config;
        if config.persistent && name == config.options.terminate_key {
            return Some(ProxyMember::Terminate(Terminator { proxy: self.clone() }));
        }

        let export = self.inner.module.get(name)?;
        Some(ProxyMember::Export(RemoteExport {
            proxy: self.clone(),
            name: name.to_string(),
            kind: export.kind(),
        }))
    }

    /// Look up an export, ignoring the terminate key
    pub fn export(&self, name: &str) -> Option<RemoteExport> {
        let export = self.inner.module.get(name)?;
        Some(RemoteExport {
            proxy: self.clone(),
            name: name.to_string(),
            kind: export.kind(),
        })
    }

    /// Terminate the retained transport, or the one being created.
    ///
    /// Returns false if there was nothing to terminate.
    pub fn terminate(&self) -> bool {
        let connecting = self.inner.connecting.try_lock().is_err();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let channel = self.inner.channel.lock().take();
        let terminated = channel.is_some_and(|channel| channel.terminate());
        terminated || connecting
    }

    async fn dispatch(&self, message: &WorkerMessage) -> Result<Value, ProtocolError> {
        let config = &self.inner.config;
        if !config.persistent {
            return send_message(self.inner.factory.as_ref(), &config.source, message, &config.options).await;
        }

        let channel = self.persistent_channel().await?;
        channel.request(Some(message), &config.options).await
    }

    async fn persistent_channel(&self) -> Result<Arc<WorkerChannel>, ProtocolError> {
        let _connecting = self.inner.connecting.lock().await;
        if let Some(channel) = self.live_channel() {
            return Ok(channel);
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);

        let init = WorkerMessage::load(self.filename())
            .encode()
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        let handle = self
            .inner
            .factory
            .create(&self.inner.config.source, Some(init))
            .await?;
        debug!(module = self.filename(), "Persistent transport created");

        let channel = Arc::new(WorkerChannel::new(handle, true));
        let mut slot = self.inner.channel.lock();
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            drop(slot);
            channel.terminate();
            debug!(module = self.filename(), "Terminated while connecting");
            return Err(ProtocolError::Terminated);
        }
        *slot = Some(Arc::clone(&channel));
        Ok(channel)
    }

    fn live_channel(&self) -> Option<Arc<WorkerChannel>> {
        self.inner
            .channel
            .lock()
            .as_ref()
            .filter(|channel| !channel.is_terminated())
            .cloned()
    }
}

impl std::fmt::Debug for ModuleProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleProxy")
            .field("module", &self.filename())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Result of [`ModuleProxy::get`]
#[derive(Debug, Clone)]
pub enum ProxyMember {
    Export(RemoteExport),
    Terminate(Terminator),
}

impl ProxyMember {
    pub fn into_export(self) -> Option<RemoteExport> {
        match self {
            Self::Export(export) => Some(export),
            Self::Terminate(_) => None,
        }
    }

    pub fn into_terminator(self) -> Option<Terminator> {
        match self {
            Self::Terminate(terminator) => Some(terminator),
            Self::Export(_) => None,
        }
    }
}

/// Closes a persistent proxy's transport
#[derive(Debug, Clone)]
pub struct Terminator {
    proxy: ModuleProxy,
}

impl Terminator {
    pub fn call(&self) -> bool {
        self.proxy.terminate()
    }
}

/// One export of a proxied module
#[derive(Debug, Clone)]
pub struct RemoteExport {
    proxy: ModuleProxy,
    name: String,
    kind: ExportKind,
}

impl RemoteExport {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExportKind {
        self.kind
    }

    /// Invoke the export, or read it for a property export
    pub fn invoke(&self, args: Vec<Value>) -> Invocation {
        let call = self.deferred(args);
        if self.proxy.inner.config.execute_immediately {
            Invocation::Pending(call.spawn())
        } else {
            Invocation::Deferred(call)
        }
    }

    /// Build the call without running it
    pub fn deferred(&self, args: Vec<Value>) -> DeferredCall {
        let filename = self.proxy.filename();
        let message = match self.kind {
            ExportKind::Method => WorkerMessage::method(filename, &self.name, args),
            ExportKind::Property => WorkerMessage::property(filename, &self.name),
        };
        DeferredCall {
            proxy: self.proxy.clone(),
            message,
        }
    }

    /// Run the call and wait for its result
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, ProtocolError> {
        self.deferred(args).run().await
    }
}

/// What [`RemoteExport::invoke`] produced
#[derive(Debug)]
pub enum Invocation {
    /// Already running
    Pending(PendingCall),
    /// Runs when asked to
    Deferred(DeferredCall),
}

impl Invocation {
    /// Wait for the result, starting the call first if it was deferred
    pub async fn resolve(self) -> Result<Value, ProtocolError> {
        match self {
            Self::Pending(pending) => pending.await,
            Self::Deferred(call) => call.run().await,
        }
    }
}

/// A call that has not been sent yet
#[derive(Clone)]
pub struct DeferredCall {
    proxy: ModuleProxy,
    message: WorkerMessage,
}

impl DeferredCall {
    pub fn message(&self) -> &WorkerMessage {
        &self.message
    }

    pub async fn run(self) -> Result<Value, ProtocolError> {
        self.proxy.dispatch(&self.message).await
    }

    /// Start the call on the runtime
    pub fn spawn(self) -> PendingCall {
        PendingCall {
            handle: tokio::spawn(self.run()),
        }
    }
}

impl std::fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCall")
            .field("message", &self.message)
            .finish()
    }
}

/// A call in flight
#[derive(Debug)]
pub struct PendingCall {
    handle: JoinHandle<Result<Value, ProtocolError>>,
}

impl Future for PendingCall {
    type Output = Result<Value, ProtocolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.handle.poll_unpin(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ProtocolError::Terminated),
            Err(e) => Err(ProtocolError::Transport(format!("call task failed: {e}"))),
        })
    }
}
