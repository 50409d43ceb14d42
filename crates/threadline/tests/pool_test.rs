//! Pool orchestration tests
//!
//! Run with: cargo test -p threadline --test pool_test

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use threadline::listeners::ListenerControl;
use threadline::pool::{AggregateError, Pool, PoolConfig, PoolEvent, ResourceMonitor};
use threadline::queue::{StatusField, StatusFormat};
use threadline::thread::{ErrorChannel, Thread, ThreadError};

const WAIT: Duration = Duration::from_secs(5);

fn pool(size: usize) -> Pool {
    Pool::new(
        PoolConfig::default()
            .with_pool_size(size)
            .with_ping_interval(Duration::from_millis(10)),
    )
}

/// Sends the number of completed units every time the pool drains
fn drains(pool: &Pool) -> mpsc::UnboundedReceiver<usize> {
    let (tx, rx) = mpsc::unbounded_channel();
    pool.all_settled(move |completed| {
        let _ = tx.send(completed.len());
    });
    rx
}

fn record(pool: &Pool) -> Arc<Mutex<Vec<&'static str>>> {
    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&names);
    pool.subscribe(move |event| {
        sink.lock().push(event.name());
        ListenerControl::Keep
    });
    names
}

type Work = futures::future::BoxFuture<'static, Result<i64, ThreadError>>;

fn sleeper(ms: u64, result: Result<i64, &'static str>) -> impl FnOnce() -> Work {
    move || {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            result.map_err(ThreadError::from)
        })
    }
}

#[test_log::test(tokio::test)]
async fn test_drain_fires_complete_once_per_cycle() {
    let pool = pool(2);
    let mut drained = drains(&pool);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let add = |n: i64| {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        pool.add_task(
            move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ThreadError>(n)
            },
            json!({ "n": n }),
        )
    };

    let threads: Vec<Thread> = (0..5).map(&add).collect();
    assert_eq!(timeout(WAIT, drained.recv()).await.unwrap(), Some(5));
    assert!(peak.load(Ordering::SeqCst) <= 2);
    for (n, thread) in threads.iter().enumerate() {
        assert_eq!(thread.message(), Some(json!(n)));
    }

    // Idle pool: no second announcement for the same drain.
    assert!(timeout(Duration::from_millis(100), drained.recv()).await.is_err());

    add(5);
    add(6);
    assert_eq!(timeout(WAIT, drained.recv()).await.unwrap(), Some(7));
    assert!(timeout(Duration::from_millis(100), drained.recv()).await.is_err());
}

#[tokio::test]
async fn test_units_leave_queue_in_fifo_order() {
    let pool = pool(1);
    let mut drained = drains(&pool);
    let order = Arc::new(Mutex::new(Vec::new()));

    for n in 0..4 {
        let order = Arc::clone(&order);
        pool.add_task(
            move || async move {
                order.lock().push(n);
                Ok::<_, ThreadError>(n)
            },
            Value::Null,
        );
    }

    timeout(WAIT, drained.recv()).await.unwrap();
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_worker_events_are_rebroadcast() {
    let pool = pool(1);
    let names = record(&pool);
    let mut drained = drains(&pool);

    let thread = pool.add_task(|| async { Ok::<_, ThreadError>("ok") }, json!("meta"));
    timeout(WAIT, drained.recv()).await.unwrap();

    let names: Vec<_> = names
        .lock()
        .iter()
        .copied()
        .filter(|name| name.starts_with("worker.") || *name == "complete")
        .collect();
    assert_eq!(
        names,
        vec![
            "worker.init",
            "worker.status",
            "worker.status",
            "worker.message",
            "worker.exit",
            "complete"
        ]
    );
    assert_eq!(thread.meta(), &json!("meta"));
}

#[tokio::test]
async fn test_pinging_starts_and_stops() {
    let pool = pool(1);
    let names = record(&pool);
    let mut drained = drains(&pool);

    let (tx, mut stopped) = mpsc::unbounded_channel();
    pool.subscribe(move |event| {
        if matches!(event, PoolEvent::StopPinging) {
            let _ = tx.send(());
        }
        ListenerControl::Keep
    });

    pool.add_task(|| async { Ok::<_, ThreadError>(1) }, Value::Null);
    timeout(WAIT, drained.recv()).await.unwrap();
    timeout(WAIT, stopped.recv()).await.unwrap();

    let names = names.lock().clone();
    let started = names.iter().position(|name| *name == "start_pinging");
    let stopped = names.iter().position(|name| *name == "stop_pinging");
    assert!(started.is_some());
    assert!(started < stopped);
}

#[tokio::test]
async fn test_failure_does_not_stop_the_pool() {
    let pool = pool(2);
    let mut drained = drains(&pool);
    let caught = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&caught);
    pool.catch(move |error, channel, _thread| sink.lock().push((error.clone(), channel)));

    let failed = pool.add_task(sleeper(1, Err("bad input")), Value::Null);
    let ok = pool.add_task(sleeper(5, Ok(3)), Value::Null);

    timeout(WAIT, drained.recv()).await.unwrap();
    assert_eq!(failed.exit_code(), Some(1));
    assert_eq!(ok.exit_code(), Some(0));
    assert_eq!(
        *caught.lock(),
        vec![(ThreadError::Failed("bad input".into()), ErrorChannel::Error)]
    );
}

#[tokio::test]
async fn test_then_and_finally_persist_across_drains() {
    let pool = pool(2);
    let mut drained = drains(&pool);
    let results = Arc::new(AtomicUsize::new(0));
    let exits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&results);
    pool.then(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = Arc::clone(&exits);
    pool.finally(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    pool.add_task(sleeper(1, Ok(1)), Value::Null);
    timeout(WAIT, drained.recv()).await.unwrap();
    pool.add_task(sleeper(1, Err("no")), Value::Null);
    timeout(WAIT, drained.recv()).await.unwrap();

    assert_eq!(results.load(Ordering::SeqCst), 1);
    assert_eq!(exits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_any_with_every_unit_failing() {
    let pool = pool(2);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    pool.any(move |result, thread| sink.lock().push((result, thread)));
    let mut drained = drains(&pool);

    pool.add_task(sleeper(1, Err("first")), Value::Null);
    pool.add_task(sleeper(3, Err("second")), Value::Null);
    timeout(WAIT, drained.recv()).await.unwrap();

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    let (result, thread) = &calls[0];
    assert_eq!(
        result,
        &Err(AggregateError {
            errors: vec![
                ThreadError::Failed("first".into()),
                ThreadError::Failed("second".into())
            ]
        })
    );
    assert!(thread.is_none());
}

#[tokio::test]
async fn test_any_fires_once_with_first_success() {
    let pool = pool(2);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    pool.any(move |result, thread| sink.lock().push((result, thread)));
    let mut drained = drains(&pool);
    let (release, gate) = oneshot::channel::<()>();

    let fast = pool.add_task(|| async { Ok::<_, ThreadError>("fast") }, Value::Null);
    let slow = pool.add_task(
        || async move {
            let _ = gate.await;
            Ok::<_, ThreadError>("slow")
        },
        Value::Null,
    );

    fast.settled().await.unwrap();
    release.send(()).unwrap();
    timeout(WAIT, drained.recv()).await.unwrap();

    assert_eq!(slow.message(), Some(json!("slow")));
    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Ok(json!("fast")));
    assert_eq!(calls[0].1.as_ref(), Some(&fast));
}

#[tokio::test]
async fn test_race_reports_first_settled_unit() {
    let pool = pool(2);
    let (tx, mut rx) = mpsc::unbounded_channel();
    pool.race(move |result, thread| {
        let _ = tx.send((result, thread));
    });
    let mut drained = drains(&pool);

    pool.add_task(sleeper(50, Ok(1)), Value::Null);
    let quick = pool.add_task(sleeper(1, Err("quick failure")), Value::Null);
    timeout(WAIT, drained.recv()).await.unwrap();

    let (result, thread) = rx.recv().await.unwrap();
    assert_eq!(result, Err(ThreadError::Failed("quick failure".into())));
    assert_eq!(thread, quick);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_all_resolves_with_every_unit() {
    let pool = pool(3);
    let (tx, rx) = oneshot::channel();
    pool.all(move |result| {
        let _ = tx.send(result);
    });

    for n in 0..3 {
        pool.add_task(sleeper(n, Ok(n as i64)), Value::Null);
    }

    let threads = timeout(WAIT, rx).await.unwrap().unwrap().unwrap();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|thread| thread.status().is_success()));
}

#[tokio::test]
async fn test_all_rejects_with_first_failure() {
    let pool = pool(3);
    let (tx, rx) = oneshot::channel();
    pool.all(move |result| {
        let _ = tx.send(result);
    });

    pool.add_task(sleeper(20, Ok(1)), Value::Null);
    let broken = pool.add_task(sleeper(1, Err("broken")), Value::Null);

    let failure = timeout(WAIT, rx).await.unwrap().unwrap().unwrap_err();
    assert_eq!(failure.error, ThreadError::Failed("broken".into()));
    assert_eq!(failure.thread, broken);
}

struct Switch(AtomicBool);

impl ResourceMonitor for Switch {
    fn is_any_resource_below(&self, _threshold_percent: f64) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_backs_off_while_resources_are_saturated() {
    let saturated = Arc::new(Switch(AtomicBool::new(true)));
    let pool = Pool::with_resources(
        PoolConfig::default()
            .with_pool_size(2)
            .with_ping_interval(Duration::from_millis(10)),
        saturated.clone(),
    );

    let thread = pool.add_task(|| async { Ok::<_, ThreadError>(1) }, Value::Null);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(thread.status().is_ready());
    let report = pool.status("*", StatusFormat::Count).unwrap();
    assert_eq!(report.count(StatusField::Queued), Some(1));

    saturated.0.store(false, Ordering::SeqCst);
    assert_eq!(timeout(WAIT, thread.settled()).await.unwrap(), Ok(json!(1)));
}

#[tokio::test]
async fn test_status_percentages() {
    let pool = pool(1);
    let (release, gate) = oneshot::channel::<()>();

    let finished = pool.add_task(|| async { Ok::<_, ThreadError>(0) }, Value::Null);
    finished.settled().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.add_task(
        || async move {
            let _ = gate.await;
            Ok::<_, ThreadError>(1)
        },
        Value::Null,
    );

    let report = pool.status("*", StatusFormat::Percent(2)).unwrap();
    assert_eq!(report.percent(StatusField::Queued), Some(0.0));
    assert_eq!(report.percent(StatusField::Active), Some(50.0));
    assert_eq!(report.percent(StatusField::Completed), Some(50.0));
    assert_eq!(report.percent(StatusField::Total), Some(100.0));

    let err = pool.status("invalidField", StatusFormat::Raw).unwrap_err();
    assert!(err.to_string().contains("\"invalidField\""));

    release.send(()).unwrap();
}

#[tokio::test]
async fn test_resubmitted_settled_unit_moves_to_completed() {
    let pool = pool(1);
    let mut drained = drains(&pool);

    let thread = pool.add_task(|| async { Ok::<_, ThreadError>(1) }, Value::Null);
    assert_eq!(timeout(WAIT, drained.recv()).await.unwrap(), Some(1));

    let again = pool.add_thread(thread.clone());
    assert_eq!(again, thread);
    assert!(!thread.start());
    assert_eq!(timeout(WAIT, drained.recv()).await.unwrap(), Some(2));
    assert_eq!(pool.len(), 2);
}

#[tokio::test]
async fn test_blocking_units_run_in_the_pool() {
    let pool = pool(2);
    let mut drained = drains(&pool);

    let thread = pool.add_blocking(
        || {
            std::thread::sleep(Duration::from_millis(5));
            Ok::<_, ThreadError>(std::thread::current().name().map(str::to_string))
        },
        Value::Null,
    );

    timeout(WAIT, drained.recv()).await.unwrap();
    tokio_test::assert_ok!(thread.outcome().unwrap());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let pool = pool(1);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let id = pool.subscribe(move |event: &PoolEvent| {
        if event.name() == "worker.exit" {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        ListenerControl::Keep
    });
    let mut drained = drains(&pool);

    pool.add_task(|| async { Ok::<_, ThreadError>(1) }, Value::Null);
    timeout(WAIT, drained.recv()).await.unwrap();
    assert!(pool.unsubscribe(id));

    pool.add_task(|| async { Ok::<_, ThreadError>(2) }, Value::Null);
    timeout(WAIT, drained.recv()).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_pool_listener_does_not_stall_the_pool() {
    let pool = pool(1);
    let mut drained = drains(&pool);
    pool.finally(|_, _| panic!("finally blew up"));

    let first = pool.add_task(|| async { Ok::<_, ThreadError>(1) }, Value::Null);
    let second = pool.add_task(|| async { Ok::<_, ThreadError>(2) }, Value::Null);

    assert_eq!(timeout(WAIT, drained.recv()).await.unwrap(), Some(2));
    assert_eq!(timeout(WAIT, second.settled()).await.unwrap(), Ok(json!(2)));
    assert_eq!(first.message(), Some(json!(1)));
    assert!(pool.is_completed());

    let report = pool.status("*", StatusFormat::Count).unwrap();
    assert_eq!(report.count(StatusField::Queued), Some(0));
    assert_eq!(report.count(StatusField::Active), Some(0));
    assert_eq!(report.count(StatusField::Completed), Some(2));
}

#[tokio::test]
async fn test_complete_reports_the_drained_cycle() {
    let pool = pool(1);
    let mut drained = drains(&pool);

    let drained_when_announced = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&drained_when_announced);
    let observer = pool.clone();
    pool.subscribe(move |event| {
        if matches!(event, PoolEvent::Complete { .. }) {
            sink.lock().push(observer.is_completed());
        }
        ListenerControl::Keep
    });

    // Enqueue more work as soon as the first cycle stops pinging
    let refilled = Arc::new(AtomicBool::new(false));
    let feeder = pool.clone();
    pool.subscribe(move |event| {
        if matches!(event, PoolEvent::StopPinging) && !refilled.swap(true, Ordering::SeqCst) {
            feeder.add_task(|| async { Ok::<_, ThreadError>(2) }, Value::Null);
        }
        ListenerControl::Keep
    });

    pool.add_task(|| async { Ok::<_, ThreadError>(1) }, Value::Null);

    assert_eq!(timeout(WAIT, drained.recv()).await.unwrap(), Some(1));
    assert_eq!(timeout(WAIT, drained.recv()).await.unwrap(), Some(2));
    assert_eq!(*drained_when_announced.lock(), vec![true, true]);
}
