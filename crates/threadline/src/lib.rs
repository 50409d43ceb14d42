//! # Threadline
//!
//! Runs units of work on separate execution threads behind one abstraction:
//! a bounded task pool, a per-unit lifecycle, and a request/response protocol
//! for work that runs inside a remote worker context.
//!
//! ## Features
//!
//! - **Admission control**: FIFO queue with a concurrency ceiling and a
//!   once-per-drain completion notification
//! - **Lifecycle events**: every unit reports `init`, `status`, `message`,
//!   `error`, `messageerror` and `exit`, with `exit` always last
//! - **Worker protocol**: one envelope, one response, timeouts, and
//!   termination-on-settle for ephemeral and persistent transports
//! - **Module proxies**: registered exports become remote-callable functions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Pool                               │
//! │  (ticks, resource backoff, event rebroadcast, combinators)  │
//! └─────────────────────────────────────────────────────────────┘
//!               │                                  │
//!               ▼                                  ▼
//! ┌───────────────────────────┐    ┌───────────────────────────┐
//! │     TaskPool<Thread>      │    │          Thread           │
//! │ (queued / active / done)  │    │ (status, events, result)  │
//! └───────────────────────────┘    └───────────────────────────┘
//!                                                  │ remote units
//!                                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              ModuleProxy  ──►  WorkerChannel                 │
//! │   (envelope, timeout, terminate)  ──►  TransportFactory      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use threadline::prelude::*;
//!
//! # async fn example() {
//! let registry = ModuleRegistry::new().with_module(
//!     Module::new("math").with_fn("square", Some(1), |args: Vec<Value>| {
//!         let n = args[0].as_f64().unwrap_or_default();
//!         Ok::<_, RemoteError>(json!(n * n))
//!     }),
//! );
//! let registry = Arc::new(registry);
//! let factory = Arc::new(LocalTransportFactory::new(registry.clone()));
//!
//! let pool = Pool::new(PoolConfig::default().with_pool_size(2));
//! let math = pool.proxy(registry.resolve("math").unwrap(), factory);
//! let square = math.export("square").unwrap();
//!
//! for n in 1..=4 {
//!     pool.add_remote(square.deferred(vec![json!(n)]), json!({ "n": n }));
//! }
//! pool.all_settled(|threads| {
//!     for thread in threads {
//!         println!("{} -> {:?}", thread.meta(), thread.message());
//!     }
//! });
//! # }
//! ```

pub mod listeners;
pub mod module;
pub mod pool;
pub mod protocol;
pub mod queue;
mod serde_duration;
pub mod status;
pub mod thread;

/// Prelude for common imports
pub mod prelude {
    pub use crate::listeners::{ListenerControl, ListenerId};
    pub use crate::module::{
        Invocation, Module, ModuleLoader, ModuleProxy, ModuleRegistry, ProxyConfig, ProxyMember,
    };
    pub use crate::pool::{
        AggregateError, Failure, Pool, PoolConfig, PoolEvent, ResourceMonitor, SystemResources,
    };
    pub use crate::protocol::{
        LocalTransportFactory, MessageOptions, ProtocolError, RemoteError, TransportFactory,
    };
    pub use crate::queue::{StatusField, StatusFormat, TaskPool};
    pub use crate::status::ThreadStatus;
    pub use crate::thread::{ErrorChannel, Thread, ThreadError, ThreadEvent};
}

// Re-export key types at crate root
pub use module::{Module, ModuleError, ModuleProxy, ModuleRegistry, ProxyConfig};
pub use pool::{Pool, PoolConfig, PoolEvent};
pub use protocol::{MessageOptions, ProtocolError, RemoteError, WorkerMessage};
pub use queue::{TaskPool, TaskPoolError};
pub use status::ThreadStatus;
pub use thread::{Thread, ThreadError, ThreadEvent};
