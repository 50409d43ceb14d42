//! Pool-level result helpers
//!
//! `then`, `catch`, `finally` and `all_settled` stay subscribed across drain
//! cycles. `all`, `any` and `race` fire once and unsubscribe themselves.

use parking_lot::Mutex;
use serde_json::Value;

use super::orchestrator::{Pool, PoolEvent};
use crate::listeners::{ListenerControl, ListenerId};
use crate::thread::{ErrorChannel, Thread, ThreadError, ThreadEvent, ThreadResult};

/// A unit that failed, with its error
#[derive(Debug, Clone)]
pub struct Failure {
    pub error: ThreadError,
    pub thread: Thread,
}

/// Every unit observed by [`Pool::any`] failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("all {} units failed", .errors.len())]
pub struct AggregateError {
    pub errors: Vec<ThreadError>,
}

/// Fires `f` at most once, then reports that the listener is done
struct Once<F>(Mutex<Option<F>>);

impl<F> Once<F> {
    fn new(f: F) -> Self {
        Self(Mutex::new(Some(f)))
    }

    fn fire(&self, call: impl FnOnce(F)) -> ListenerControl {
        let taken = self.0.lock().take();
        if let Some(f) = taken {
            call(f);
        }
        ListenerControl::Unsubscribe
    }
}

fn failure(event: &ThreadEvent) -> Option<&ThreadError> {
    match event {
        ThreadEvent::Error(error) | ThreadEvent::MessageError(error) => Some(error),
        _ => None,
    }
}

impl Pool {
    /// Call `f` with every successful result
    pub fn then<F>(&self, f: F) -> &Self
    where
        F: Fn(&Value, &Thread) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let PoolEvent::Worker {
                event: ThreadEvent::Message(value),
                thread,
            } = event
            {
                f(value, thread);
            }
            ListenerControl::Keep
        });
        self
    }

    /// Call `f` with every failure and the event that reported it
    pub fn catch<F>(&self, f: F) -> &Self
    where
        F: Fn(&ThreadError, ErrorChannel, &Thread) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let PoolEvent::Worker { event, thread } = event {
                match event {
                    ThreadEvent::Error(error) => f(error, ErrorChannel::Error, thread),
                    ThreadEvent::MessageError(error) => f(error, ErrorChannel::MessageError, thread),
                    _ => {}
                }
            }
            ListenerControl::Keep
        });
        self
    }

    /// Call `f` with every unit's exit code
    pub fn finally<F>(&self, f: F) -> &Self
    where
        F: Fn(i32, &Thread) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let PoolEvent::Worker {
                event: ThreadEvent::Exit(code),
                thread,
            } = event
            {
                f(*code, thread);
            }
            ListenerControl::Keep
        });
        self
    }

    /// Call `f` with every completed unit each time the pool drains
    pub fn all_settled<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&[Thread]) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let PoolEvent::Complete { completed } = event {
                f(completed);
            }
            ListenerControl::Keep
        })
    }

    /// Call `f` once: with the first failure, or with every completed unit
    /// when the pool drains without one
    pub fn all<F>(&self, f: F) -> ListenerId
    where
        F: FnOnce(Result<Vec<Thread>, Failure>) + Send + 'static,
    {
        let once = Once::new(f);
        self.subscribe(move |event| match event {
            PoolEvent::Worker { event, thread } => match failure(event) {
                Some(error) => once.fire(|f| {
                    f(Err(Failure {
                        error: error.clone(),
                        thread: thread.clone(),
                    }))
                }),
                None => ListenerControl::Keep,
            },
            PoolEvent::Complete { completed } => once.fire(|f| {
                let failed = completed.iter().find_map(|thread| {
                    thread
                        .outcome()
                        .and_then(Result::err)
                        .map(|error| Failure {
                            error,
                            thread: thread.clone(),
                        })
                });
                match failed {
                    Some(failure) => f(Err(failure)),
                    None => f(Ok(completed.clone())),
                }
            }),
            _ => ListenerControl::Keep,
        })
    }

    /// Call `f` once: with the first successful result and its unit, or with
    /// every error and no unit if the pool drains without a success
    pub fn any<F>(&self, f: F) -> ListenerId
    where
        F: FnOnce(Result<Value, AggregateError>, Option<Thread>) + Send + 'static,
    {
        let once = Once::new(f);
        let errors = Mutex::new(Vec::new());
        self.subscribe(move |event| match event {
            PoolEvent::Worker {
                event: ThreadEvent::Message(value),
                thread,
            } => once.fire(|f| f(Ok(value.clone()), Some(thread.clone()))),
            PoolEvent::Worker { event, .. } => {
                if let Some(error) = failure(event) {
                    errors.lock().push(error.clone());
                }
                ListenerControl::Keep
            }
            PoolEvent::Complete { .. } => once.fire(|f| {
                let errors = std::mem::take(&mut *errors.lock());
                f(Err(AggregateError { errors }), None)
            }),
            _ => ListenerControl::Keep,
        })
    }

    /// Call `f` once with whichever unit settles first
    pub fn race<F>(&self, f: F) -> ListenerId
    where
        F: FnOnce(ThreadResult, Thread) + Send + 'static,
    {
        let once = Once::new(f);
        self.subscribe(move |event| {
            let PoolEvent::Worker { event, thread } = event else {
                return ListenerControl::Keep;
            };
            let result = match event {
                ThreadEvent::Message(value) => Ok(value.clone()),
                ThreadEvent::Error(error) | ThreadEvent::MessageError(error) => Err(error.clone()),
                _ => return ListenerControl::Keep,
            };
            once.fire(|f| f(result, thread.clone()))
        })
    }
}
