//! Admission-controlled task pool
//!
//! Items live in exactly one of three buckets:
//!
//! ```text
//!  enqueue()        next()           complete()
//! ─────────► queued ──────► active ───────────► completed
//!            (FIFO)        (≤ pool_size)        (append order)
//! ```
//!
//! The pool does not know what an item is. It reports scheduling activity
//! through [`PoolSignal`]s on the channel returned by [`TaskPool::new`].

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::report::{percentage, FieldSelector, StatusField, StatusFormat, StatusReport, StatusValue};
use super::TaskPoolError;

/// Notifications emitted by a [`TaskPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSignal {
    /// The scheduling interval was started
    StartPinging,
    /// One scheduling interval elapsed
    Ping,
    /// The scheduling interval was stopped
    StopPinging,
    /// Deferred drain check requested by [`TaskPool::complete`]; the receiver
    /// should answer it with `is_completed(true)`
    CheckCompleted,
    /// The pool drained; sent once per drain cycle
    Complete,
}

/// Bounded queue with queued / active / completed buckets
pub struct TaskPool<T> {
    queued: VecDeque<T>,
    active: Vec<T>,
    completed: Vec<T>,
    pool_size: usize,
    ping_interval: Duration,
    announced_complete: bool,
    pinging: bool,
    ticker: Option<JoinHandle<()>>,
    signals: mpsc::UnboundedSender<PoolSignal>,
}

impl<T: PartialEq + Clone> TaskPool<T> {
    /// Create a pool with `pool_size` slots (at least one)
    pub fn new(pool_size: usize, ping_interval: Duration) -> (Self, mpsc::UnboundedReceiver<PoolSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let pool = Self {
            queued: VecDeque::new(),
            active: Vec::new(),
            completed: Vec::new(),
            pool_size: pool_size.max(1),
            ping_interval,
            announced_complete: false,
            pinging: false,
            ticker: None,
            signals,
        };
        (pool, rx)
    }

    /// Append `item` to the queue.
    ///
    /// With `check`, an item that is currently active is pulled out of the
    /// active set first, so a running item can be re-submitted.
    pub fn enqueue(&mut self, item: T, check: bool) {
        if check {
            if let Some(pos) = self.active.iter().position(|a| *a == item) {
                self.active.remove(pos);
            }
        }
        self.queued.push_back(item);
        self.announced_complete = false;
    }

    pub fn has_available_slot(&self) -> bool {
        self.active.len() < self.pool_size
    }

    /// Whether [`next`](Self::next) would hand out an item.
    ///
    /// Starts the scheduling interval the first time it is called.
    pub fn is_ready(&mut self) -> bool {
        self.start_pinging();
        !self.queued.is_empty() && self.has_available_slot() && !self.is_completed(false)
    }

    /// Move the head of the queue into the active set
    pub fn next(&mut self) -> Option<T> {
        if !self.is_ready() {
            return None;
        }
        let item = self.queued.pop_front()?;
        self.active.push(item.clone());
        Some(item)
    }

    /// Move `item` into the completed bucket.
    ///
    /// With `check`, returns false without touching anything unless the item
    /// is active. The drain check runs later, when the signal receiver
    /// handles [`PoolSignal::CheckCompleted`].
    pub fn complete(&mut self, item: &T, check: bool) -> bool {
        if let Some(pos) = self.active.iter().position(|a| a == item) {
            let item = self.active.remove(pos);
            self.completed.push(item);
        } else if check {
            trace!("complete() on an item that is not active");
            return false;
        } else {
            if let Some(pos) = self.queued.iter().position(|q| q == item) {
                self.queued.remove(pos);
            }
            self.completed.push(item.clone());
        }

        let _ = self.signals.send(PoolSignal::CheckCompleted);
        true
    }

    /// True when nothing is queued or active.
    ///
    /// With `emit`, a drained pool stops its scheduling interval and sends
    /// [`PoolSignal::Complete`], once until the next [`enqueue`](Self::enqueue).
    pub fn is_completed(&mut self, emit: bool) -> bool {
        let drained = self.queued.is_empty() && self.active.is_empty();
        if emit && drained && !self.announced_complete {
            self.announced_complete = true;
            self.stop_pinging();
            debug!(completed = self.completed.len(), "Task pool drained");
            let _ = self.signals.send(PoolSignal::Complete);
        }
        drained
    }

    /// True once the current drain has been announced
    pub fn is_announced(&self) -> bool {
        self.announced_complete
    }

    /// Project the buckets into a [`StatusReport`]
    pub fn status<'a>(
        &self,
        fields: impl Into<FieldSelector<'a>>,
        format: StatusFormat,
    ) -> Result<StatusReport<T>, TaskPoolError> {
        let fields = fields.into().resolve()?;
        let total = self.len();

        let entries = fields
            .into_iter()
            .map(|field| {
                let value = match format {
                    StatusFormat::Raw => StatusValue::Items(self.items(field)),
                    StatusFormat::Count => StatusValue::Count(self.count(field)),
                    StatusFormat::Percent(places) => {
                        StatusValue::Percent(percentage(self.count(field), total, places))
                    }
                };
                (field, value)
            })
            .collect();

        Ok(StatusReport::new(entries))
    }

    fn count(&self, field: StatusField) -> usize {
        match field {
            StatusField::Queued => self.queued.len(),
            StatusField::Active => self.active.len(),
            StatusField::Completed => self.completed.len(),
            StatusField::Remaining => self.queued.len() + self.active.len(),
            StatusField::Started => self.active.len() + self.completed.len(),
            StatusField::Total => self.len(),
        }
    }

    fn items(&self, field: StatusField) -> Vec<T> {
        let queued = || self.queued.iter().cloned();
        let active = || self.active.iter().cloned();
        let completed = || self.completed.iter().cloned();

        match field {
            StatusField::Queued => queued().collect(),
            StatusField::Active => active().collect(),
            StatusField::Completed => completed().collect(),
            StatusField::Remaining => queued().chain(active()).collect(),
            StatusField::Started => active().chain(completed()).collect(),
            StatusField::Total => queued().chain(active()).chain(completed()).collect(),
        }
    }
}

impl<T> TaskPool<T> {
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Items across all three buckets
    pub fn len(&self) -> usize {
        self.queued.len() + self.active.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pinging(&self) -> bool {
        self.pinging
    }

    pub fn completed(&self) -> &[T] {
        &self.completed
    }

    fn start_pinging(&mut self) {
        if self.pinging {
            return;
        }
        self.pinging = true;
        let _ = self.signals.send(PoolSignal::StartPinging);

        // Without a runtime the owner drives scheduling by hand.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let signals = self.signals.clone();
        let period = self.ping_interval;
        self.ticker = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if signals.send(PoolSignal::Ping).is_err() {
                    break;
                }
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "Scheduling interval started");
    }

    fn stop_pinging(&mut self) {
        if !self.pinging {
            return;
        }
        self.pinging = false;
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let _ = self.signals.send(PoolSignal::StopPinging);
        debug!("Scheduling interval stopped");
    }
}

impl<T> Drop for TaskPool<T> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl<T> std::fmt::Debug for TaskPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("queued", &self.queued.len())
            .field("active", &self.active.len())
            .field("completed", &self.completed.len())
            .field("pool_size", &self.pool_size)
            .field("pinging", &self.pinging)
            .finish()
    }
}
