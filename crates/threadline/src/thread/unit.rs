//! Execution unit
//!
//! ```text
//! READY ──start()──► ACTIVE ──┬── Ok ──────────────► SUCCESS ── message
//!                             │                         │
//!                             │              handler panicked
//!                             │                         ▼
//!                             ├── Err ─────────────► ERROR ──── error | messageerror
//!                             └── panic ───────────► ERROR ──── error
//!                                                    then exit(0 | 1), exactly once
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use super::event::{ErrorChannel, ThreadError, ThreadEvent};
use crate::listeners::{ListenerControl, ListenerId, Listeners};
use crate::module::DeferredCall;
use crate::status::ThreadStatus;

/// Outcome of a unit's work
pub type ThreadResult = Result<Value, ThreadError>;

type Work = Box<dyn FnOnce() -> BoxFuture<'static, ThreadResult> + Send>;

/// Where a unit's work runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    /// Async function on the runtime's worker threads
    Function,
    /// Synchronous function on the blocking thread pool
    Blocking,
    /// Module export inside a worker context
    Worker,
}

#[derive(Debug, Default)]
struct ThreadState {
    status: ThreadStatus,
    message: Option<Value>,
    error: Option<ThreadError>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

struct ThreadInner {
    id: Uuid,
    kind: ThreadKind,
    meta: Value,
    created_at: DateTime<Utc>,
    state: Mutex<ThreadState>,
    work: Mutex<Option<Work>>,
    listeners: Listeners<ThreadEvent>,
    exit: watch::Sender<Option<i32>>,
}

/// One unit of work with a lifecycle and an event stream.
///
/// Cloning is cheap and every clone refers to the same unit; equality is
/// identity.
#[derive(Clone)]
pub struct Thread(Arc<ThreadInner>);

impl Thread {
    fn with_work(kind: ThreadKind, meta: Value, work: Work) -> Self {
        let (exit, _) = watch::channel(None);
        Self(Arc::new(ThreadInner {
            id: Uuid::now_v7(),
            kind,
            meta,
            created_at: Utc::now(),
            state: Mutex::new(ThreadState {
                status: ThreadStatus::Ready,
                ..Default::default()
            }),
            work: Mutex::new(Some(work)),
            listeners: Listeners::new(),
            exit,
        }))
    }

    /// Unit running an async closure
    pub fn spawn<F, Fut, T, E>(f: F, meta: Value) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<ThreadError> + Send + 'static,
    {
        let work: Work = Box::new(move || {
            async move {
                let value = f().await.map_err(Into::into)?;
                to_value(value)
            }
            .boxed()
        });
        Self::with_work(ThreadKind::Function, meta, work)
    }

    /// Unit running a synchronous closure on the blocking pool
    pub fn blocking<F, T, E>(f: F, meta: Value) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<ThreadError> + Send + 'static,
    {
        let work: Work = Box::new(move || {
            async move {
                match tokio::task::spawn_blocking(f).await {
                    Ok(result) => to_value(result.map_err(Into::into)?),
                    Err(e) if e.is_panic() => Err(ThreadError::Panicked(ThreadError::from_panic(
                        e.into_panic().as_ref(),
                    ))),
                    Err(e) => Err(ThreadError::Failed(e.to_string())),
                }
            }
            .boxed()
        });
        Self::with_work(ThreadKind::Blocking, meta, work)
    }

    /// Unit running a module export in a worker context
    pub fn remote(call: DeferredCall, meta: Value) -> Self {
        let work: Work = Box::new(move || {
            call.run()
                .map(|result| result.map_err(ThreadError::from))
                .boxed()
        });
        Self::with_work(ThreadKind::Worker, meta, work)
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn kind(&self) -> ThreadKind {
        self.0.kind
    }

    /// Caller-supplied correlation data
    pub fn meta(&self) -> &Value {
        &self.0.meta
    }

    pub fn status(&self) -> ThreadStatus {
        self.0.state.lock().status
    }

    /// Result of a successful run
    pub fn message(&self) -> Option<Value> {
        self.0.state.lock().message.clone()
    }

    pub fn error(&self) -> Option<ThreadError> {
        self.0.state.lock().error.clone()
    }

    pub fn exit_code(&self) -> Option<i32> {
        *self.0.exit.borrow()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.0.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.0.state.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.0.state.lock().finished_at
    }

    /// Run the work. Only the first call on a ready unit does anything.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let work = {
            let mut state = self.0.state.lock();
            if !state.status.is_ready() {
                return false;
            }
            let Some(work) = self.0.work.lock().take() else {
                return false;
            };
            state.status = ThreadStatus::Active;
            state.started_at = Some(Utc::now());
            work
        };

        debug!(thread_id = %self.0.id, kind = ?self.0.kind, "Thread started");
        self.deliver(ThreadEvent::Init);
        self.emit_status(ThreadStatus::Active, ThreadStatus::Ready, None);

        let thread = self.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { work().await })
                .catch_unwind()
                .await;
            let result = outcome.unwrap_or_else(|panic| {
                Err(ThreadError::Panicked(ThreadError::from_panic(panic.as_ref())))
            });
            thread.settle(result);
        });
        true
    }

    /// Wait for the unit to exit and return its outcome
    pub async fn settled(&self) -> ThreadResult {
        let mut exit = self.0.exit.subscribe();
        let _ = exit.wait_for(Option::is_some).await;
        self.outcome()
            .unwrap_or_else(|| Err(ThreadError::Failed("thread exited without a result".into())))
    }

    /// Outcome once the unit has settled
    pub fn outcome(&self) -> Option<ThreadResult> {
        let state = self.0.state.lock();
        match state.status {
            ThreadStatus::Success => state.message.clone().map(Ok),
            ThreadStatus::Error => state.error.clone().map(Err),
            _ => None,
        }
    }

    /// Subscribe to every event
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ThreadEvent) -> ListenerControl + Send + Sync + 'static,
    {
        self.0.listeners.add(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.0.listeners.remove(id)
    }

    /// Call `f` with every successful result
    pub fn then<F>(&self, f: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on(move |event| {
            if let ThreadEvent::Message(value) = event {
                f(value);
            }
            ListenerControl::Keep
        });
        self
    }

    /// Call `f` with every failure and the event that reported it
    pub fn catch<F>(&self, f: F) -> &Self
    where
        F: Fn(&ThreadError, ErrorChannel) + Send + Sync + 'static,
    {
        self.on(move |event| {
            match event {
                ThreadEvent::Error(error) => f(error, ErrorChannel::Error),
                ThreadEvent::MessageError(error) => f(error, ErrorChannel::MessageError),
                _ => {}
            }
            ListenerControl::Keep
        });
        self
    }

    /// Call `f` with the exit code
    pub fn finally<F>(&self, f: F) -> &Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.on(move |event| {
            if let ThreadEvent::Exit(code) = event {
                f(*code);
            }
            ListenerControl::Keep
        });
        self
    }

    fn settle(&self, result: ThreadResult) {
        match result {
            Ok(value) => self.succeed(value),
            Err(error) => self.fail(error),
        }

        let code = if self.status().is_success() { 0 } else { 1 };
        self.0.state.lock().finished_at = Some(Utc::now());
        self.0.exit.send_replace(Some(code));
        debug!(thread_id = %self.0.id, code, "Thread exited");
        self.deliver(ThreadEvent::Exit(code));
    }

    fn succeed(&self, value: Value) {
        {
            let mut state = self.0.state.lock();
            state.message = Some(value.clone());
            state.status = ThreadStatus::Success;
        }
        self.emit_status(ThreadStatus::Success, ThreadStatus::Active, Some(value.clone()));

        let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.0.listeners.emit(&ThreadEvent::Message(value));
        }));
        if let Err(panic) = delivered {
            self.fail(ThreadError::Handler(ThreadError::from_panic(panic.as_ref())));
        }
    }

    fn fail(&self, error: ThreadError) {
        let previous = {
            let mut state = self.0.state.lock();
            let previous = state.status;
            state.error = Some(error.clone());
            state.status = ThreadStatus::Error;
            previous
        };
        warn!(thread_id = %self.0.id, error = %error, "Thread failed");
        self.emit_status(
            ThreadStatus::Error,
            previous,
            Some(Value::String(error.to_string())),
        );

        if error.channel() == ErrorChannel::MessageError {
            self.deliver(ThreadEvent::MessageError(error));
            return;
        }

        // A rejection handler that panics is reported on messageerror; the
        // unit keeps the original error as its outcome.
        let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.0.listeners.emit(&ThreadEvent::Error(error));
        }));
        if let Err(panic) = delivered {
            let handler = ThreadError::Handler(ThreadError::from_panic(panic.as_ref()));
            warn!(thread_id = %self.0.id, error = %handler, "Rejection handler panicked");
            self.deliver(ThreadEvent::MessageError(handler));
        }
    }

    fn emit_status(&self, status: ThreadStatus, previous: ThreadStatus, payload: Option<Value>) {
        self.deliver(ThreadEvent::Status {
            status,
            previous,
            payload,
        });
    }

    /// Emit, logging instead of unwinding if a listener panics
    fn deliver(&self, event: ThreadEvent) {
        let name = event.name();
        let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| self.0.listeners.emit(&event)));
        if let Err(panic) = delivered {
            warn!(
                thread_id = %self.0.id,
                event = name,
                panic = %ThreadError::from_panic(panic.as_ref()),
                "Thread listener panicked"
            );
        }
    }
}

fn to_value<T: Serialize>(value: T) -> ThreadResult {
    serde_json::to_value(value).map_err(|e| ThreadError::Failed(format!("unserializable result: {e}")))
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Thread {}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("status", &self.status())
            .field("meta", &self.0.meta)
            .finish()
    }
}
