//! Pool orchestration
//!
//! This module provides:
//! - [`Pool`] - runs [`Thread`](crate::thread::Thread)s through a bounded task pool
//! - [`PoolConfig`] - pool size, scheduling interval, resource threshold, worker source
//! - [`ResourceMonitor`] - resource pressure oracle consulted before each start
//! - Result helpers: `then` / `catch` / `finally` / `all_settled` and the
//!   one-shot `all` / `any` / `race`

mod combinators;
mod config;
mod orchestrator;
mod resources;

pub use combinators::{AggregateError, Failure};
pub use config::{PoolConfig, DEFAULT_WORKER_SOURCE};
pub use orchestrator::{Pool, PoolEvent};
pub use resources::{ResourceMonitor, ResourceUsage, SystemResources, Unbounded};
