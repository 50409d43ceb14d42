//! Execution units
//!
//! A [`Thread`] wraps one unit of work (an async closure, a blocking closure
//! or a remote module call) in a [`ThreadStatus`](crate::status::ThreadStatus)
//! lifecycle and reports what happens through [`ThreadEvent`]s.

mod event;
mod unit;

pub use event::{ErrorChannel, ThreadError, ThreadEvent};
pub use unit::{Thread, ThreadKind, ThreadResult};
