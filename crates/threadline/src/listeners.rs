//! Observer lists for thread and pool events
//!
//! Listeners are plain closures that return a [`ListenerControl`]; returning
//! [`ListenerControl::Unsubscribe`] deregisters the listener right after the
//! event that produced it. Emission works on a snapshot of the list, so a
//! listener may add listeners or trigger further events without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifier returned when registering a listener
pub type ListenerId = u64;

/// What a listener wants after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerControl {
    /// Stay subscribed
    Keep,
    /// Remove this listener
    Unsubscribe,
}

type Callback<E> = Arc<dyn Fn(&E) -> ListenerControl + Send + Sync>;

/// Ordered list of event listeners
pub struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Listeners<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener, returning its id
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) -> ListenerControl + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; false if it was already gone
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Deliver `event` to every listener registered at the time of the call
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<(ListenerId, Callback<E>)> = self.entries.lock().clone();
        let mut finished = Vec::new();

        for (id, listener) in snapshot {
            if listener(event) == ListenerControl::Unsubscribe {
                finished.push(id);
            }
        }

        if !finished.is_empty() {
            self.entries
                .lock()
                .retain(|(id, _)| !finished.contains(id));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_all_listeners() {
        let listeners = Listeners::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = Arc::clone(&total);
            listeners.add(move |n| {
                total.fetch_add(*n as usize, Ordering::SeqCst);
                ListenerControl::Keep
            });
        }

        listeners.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
        assert_eq!(listeners.len(), 3);
    }

    #[test]
    fn test_unsubscribe_after_event() {
        let listeners = Listeners::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        listeners.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ListenerControl::Unsubscribe
        });

        listeners.emit(&());
        listeners.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_remove_by_id() {
        let listeners = Listeners::<()>::new();
        let id = listeners.add(|_| ListenerControl::Keep);

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
    }

    #[test]
    fn test_listener_may_register_during_emit() {
        let listeners = Arc::new(Listeners::<()>::new());
        let inner = Arc::clone(&listeners);

        listeners.add(move |_| {
            inner.add(|_| ListenerControl::Keep);
            ListenerControl::Unsubscribe
        });

        listeners.emit(&());
        assert_eq!(listeners.len(), 1);
    }
}
