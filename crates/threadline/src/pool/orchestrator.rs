//! Pool orchestrator
//!
//! Binds a [`TaskPool`] of [`Thread`]s to actual execution:
//!
//! ```text
//!  add_task() ──► TaskPool::enqueue ──► tick()
//!                                         │  resources saturated? ──► back off
//!                                         │  next() ──► none ──► done
//!                                         ▼
//!                                   wire events, start()
//!                                         │
//!           worker.* ◄── rebroadcast ◄────┤
//!                                         ▼ exit
//!                                 TaskPool::complete ──► tick()
//!
//!  driver: Ping ──► tick()   CheckCompleted ──► is_completed(true) ──► complete
//! ```
//!
//! Scheduling signals from the task pool are handled by a driver task that
//! is spawned on first use and stops when the pool is dropped.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::config::PoolConfig;
use super::resources::{ResourceMonitor, Unbounded};
use crate::listeners::{ListenerControl, ListenerId, Listeners};
use crate::module::{DeferredCall, Module, ModuleProxy, ProxyConfig};
use crate::protocol::TransportFactory;
use crate::queue::{FieldSelector, PoolSignal, StatusFormat, StatusReport, TaskPool, TaskPoolError};
use crate::thread::{Thread, ThreadError, ThreadEvent};

/// Event emitted by a [`Pool`]
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// The scheduling interval started
    StartPinging,
    /// The scheduling interval stopped
    StopPinging,
    /// The pool drained; carries every completed unit
    Complete { completed: Vec<Thread> },
    /// A unit's event, rebroadcast with the unit
    Worker { event: ThreadEvent, thread: Thread },
}

impl PoolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartPinging => "start_pinging",
            Self::StopPinging => "stop_pinging",
            Self::Complete { .. } => "complete",
            Self::Worker { event, .. } => match event {
                ThreadEvent::Init => "worker.init",
                ThreadEvent::Status { .. } => "worker.status",
                ThreadEvent::Message(_) => "worker.message",
                ThreadEvent::Error(_) => "worker.error",
                ThreadEvent::MessageError(_) => "worker.messageerror",
                ThreadEvent::Exit(_) => "worker.exit",
            },
        }
    }
}

pub(super) struct PoolInner {
    config: PoolConfig,
    tasks: Mutex<TaskPool<Thread>>,
    pub(super) listeners: Listeners<PoolEvent>,
    resources: Arc<dyn ResourceMonitor>,
    signals: Mutex<Option<mpsc::UnboundedReceiver<PoolSignal>>>,
}

/// Runs units of work with a concurrency ceiling
///
/// # Example
///
/// ```no_run
/// use serde_json::json;
/// use threadline::pool::{Pool, PoolConfig};
///
/// # async fn example() {
/// let pool = Pool::new(PoolConfig::default().with_pool_size(2));
///
/// let thread = pool.add_task(|| async { Ok::<_, anyhow::Error>(42) }, json!({"job": 1}));
/// pool.then(|value, _thread| println!("result: {value}"));
///
/// assert_eq!(thread.settled().await.unwrap(), json!(42));
/// # }
/// ```
#[derive(Clone)]
pub struct Pool {
    pub(super) inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool that never backs off for resource pressure
    pub fn new(config: PoolConfig) -> Self {
        Self::with_resources(config, Arc::new(Unbounded))
    }

    pub fn with_resources(config: PoolConfig, resources: Arc<dyn ResourceMonitor>) -> Self {
        let (tasks, signals) = TaskPool::new(config.pool_size, config.ping_interval);
        Self {
            inner: Arc::new(PoolInner {
                config,
                tasks: Mutex::new(tasks),
                listeners: Listeners::new(),
                resources,
                signals: Mutex::new(Some(signals)),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn pool_size(&self) -> usize {
        self.inner.tasks.lock().pool_size()
    }

    /// Units across all buckets
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.lock().is_empty()
    }

    /// True when nothing is queued or running
    pub fn is_completed(&self) -> bool {
        self.inner.tasks.lock().is_completed(false)
    }

    pub fn status<'a>(
        &self,
        fields: impl Into<FieldSelector<'a>>,
        format: StatusFormat,
    ) -> Result<StatusReport<Thread>, TaskPoolError> {
        self.inner.tasks.lock().status(fields, format)
    }

    /// Queue an async closure.
    ///
    /// The unit is returned right away; listeners attached after it settled
    /// do not see past events. Must be called from within a tokio runtime.
    pub fn add_task<F, Fut, T, E>(&self, f: F, meta: Value) -> Thread
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<ThreadError> + Send + 'static,
    {
        self.submit(Thread::spawn(f, meta), false)
    }

    /// Queue a synchronous closure for the blocking thread pool
    pub fn add_blocking<F, T, E>(&self, f: F, meta: Value) -> Thread
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<ThreadError> + Send + 'static,
    {
        self.submit(Thread::blocking(f, meta), false)
    }

    /// Queue a module call
    pub fn add_remote(&self, call: DeferredCall, meta: Value) -> Thread {
        self.submit(Thread::remote(call, meta), false)
    }

    /// Queue an existing unit, pulling it out of the active set if needed
    pub fn add_thread(&self, thread: Thread) -> Thread {
        self.submit(thread, true)
    }

    /// Deferred-call proxy over `module` using this pool's worker source and
    /// message options
    pub fn proxy(&self, module: Arc<Module>, factory: Arc<dyn TransportFactory>) -> ModuleProxy {
        self.proxy_with(module, factory, |config| config)
    }

    /// Like [`proxy`](Self::proxy), with the configuration adjusted by `configure`
    pub fn proxy_with(
        &self,
        module: Arc<Module>,
        factory: Arc<dyn TransportFactory>,
        configure: impl FnOnce(ProxyConfig) -> ProxyConfig,
    ) -> ModuleProxy {
        let config = self.inner.config.proxy_config().with_execute_immediately(false);
        ModuleProxy::new(module, factory, configure(config))
    }

    /// Subscribe to the raw event stream
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&PoolEvent) -> ListenerControl + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    fn submit(&self, thread: Thread, check: bool) -> Thread {
        self.ensure_driver();
        self.inner.tasks.lock().enqueue(thread.clone(), check);
        self.tick();
        thread
    }

    fn ensure_driver(&self) {
        let Some(signals) = self.inner.signals.lock().take() else {
            return;
        };
        tokio::spawn(drive(Arc::downgrade(&self.inner), signals));
    }

    /// Start as many queued units as capacity and resources allow
    fn tick(&self) {
        let mut retries = self.inner.tasks.lock().len();
        loop {
            if !self.inner.tasks.lock().is_ready() {
                return;
            }
            if self
                .inner
                .resources
                .is_any_resource_below(self.inner.config.resource_threshold)
            {
                trace!("Resources saturated, skipping tick");
                return;
            }

            let Some(thread) = self.inner.tasks.lock().next() else {
                return;
            };

            if !thread.status().is_ready() {
                {
                    let mut tasks = self.inner.tasks.lock();
                    if thread.status().is_completed() {
                        tasks.complete(&thread, false);
                    } else {
                        debug!(thread_id = %thread.id(), "Unit already running, re-queued");
                        tasks.enqueue(thread, true);
                    }
                }
                if retries == 0 {
                    return;
                }
                retries -= 1;
                continue;
            }

            self.wire(&thread);
            thread.start();
        }
    }

    /// Rebroadcast the unit's events and complete it on exit
    fn wire(&self, thread: &Thread) {
        let pool = Arc::downgrade(&self.inner);
        let unit = thread.clone();
        thread.on(move |event| {
            let Some(inner) = pool.upgrade() else {
                return ListenerControl::Unsubscribe;
            };
            let pool = Pool { inner };
            pool.broadcast(&PoolEvent::Worker {
                event: event.clone(),
                thread: unit.clone(),
            });

            if !matches!(event, ThreadEvent::Exit(_)) {
                return ListenerControl::Keep;
            }
            pool.inner.tasks.lock().complete(&unit, true);
            pool.tick();
            ListenerControl::Unsubscribe
        });
    }

    fn handle(&self, signal: PoolSignal) {
        match signal {
            PoolSignal::Ping => self.tick(),
            PoolSignal::CheckCompleted => {
                // Snapshot under the same lock that observed the drain, so a
                // unit enqueued afterwards belongs to the next cycle.
                let drained = {
                    let mut tasks = self.inner.tasks.lock();
                    let pending = !tasks.is_announced();
                    (tasks.is_completed(true) && pending).then(|| tasks.completed().to_vec())
                };
                if let Some(completed) = drained {
                    debug!(completed = completed.len(), "Pool drained");
                    self.broadcast(&PoolEvent::Complete { completed });
                }
            }
            PoolSignal::StartPinging => self.broadcast(&PoolEvent::StartPinging),
            PoolSignal::StopPinging => self.broadcast(&PoolEvent::StopPinging),
            // Already announced while handling CheckCompleted
            PoolSignal::Complete => {}
        }
    }

    /// Emit to pool listeners, logging instead of unwinding if one panics
    fn broadcast(&self, event: &PoolEvent) {
        let delivered =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.listeners.emit(event)));
        if let Err(panic) = delivered {
            warn!(
                event = event.name(),
                panic = %ThreadError::from_panic(panic.as_ref()),
                "Pool listener panicked"
            );
        }
    }
}

async fn drive(pool: Weak<PoolInner>, mut signals: mpsc::UnboundedReceiver<PoolSignal>) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = pool.upgrade() else {
            break;
        };
        Pool { inner }.handle(signal);
    }
    trace!("Pool driver stopped");
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("units", &self.len())
            .finish()
    }
}
