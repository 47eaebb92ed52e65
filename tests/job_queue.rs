use crossbeam::channel::{bounded, unbounded};
use jobq::{ErrorKind, FnJob, JobQueue, QueueConfig, QueueState, ShutdownMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn parallel_workers_run_batches() {
    let queue = JobQueue::new(3).unwrap();
    queue.start().unwrap();

    let started = Instant::now();
    for n in 0..9 {
        queue
            .submit(FnJob::named(format!("sleep-{}", n), || {
                thread::sleep(Duration::from_millis(50))
            }))
            .unwrap();
    }
    let report = queue.stop().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.executed, 9);
    // three batches of 50ms, nowhere near nine
    assert!(elapsed >= Duration::from_millis(150), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(400), "{:?}", elapsed);
    assert!(queue.stats().peak_in_flight <= 3);
}

#[test]
fn concurrency_never_exceeds_worker_count() {
    let queue = JobQueue::with_config(QueueConfig::new(4).pool_capacity(16)).unwrap();
    queue.start().unwrap();

    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    for _ in 0..40 {
        let current = current.clone();
        let max_seen = max_seen.clone();
        queue
            .submit(FnJob::new(move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                current.fetch_sub(1, Ordering::SeqCst);
            }))
            .unwrap();
    }
    let report = queue.stop().unwrap();

    assert_eq!(report.executed, 40);
    assert!(max_seen.load(Ordering::SeqCst) <= 4);
    assert!(queue.stats().peak_in_flight <= 4);
}

#[test]
fn single_worker_keeps_submission_order() {
    let queue = JobQueue::new(1).unwrap();
    queue.start().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for n in 1..=5 {
        let seen = seen.clone();
        queue
            .submit(FnJob::new(move || seen.lock().unwrap().push(n)))
            .unwrap();
    }
    queue.stop().unwrap();

    // draining runs everything, in order
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn discard_mode_runs_a_prefix() {
    let config = QueueConfig::new(1).shutdown(ShutdownMode::Discard);
    let queue = JobQueue::with_config(config).unwrap();
    queue.start().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for n in 1..=5 {
        let seen = seen.clone();
        queue
            .submit(FnJob::new(move || seen.lock().unwrap().push(n)))
            .unwrap();
    }
    let report = queue.stop().unwrap();

    let seen = seen.lock().unwrap();
    let expected: Vec<i32> = (1..=seen.len() as i32).collect();
    assert_eq!(*seen, expected);
    assert_eq!(report.executed + report.discarded, 5);
}

#[test]
fn idle_start_then_stop_is_quick() {
    let queue = JobQueue::new(2).unwrap();
    queue.start().unwrap();

    let started = Instant::now();
    let report = queue.stop_timeout(Duration::from_secs(1)).unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.executed, 0);
    assert_eq!(report.submitted, 0);
    assert_eq!(queue.state(), QueueState::Stopped);
    assert_eq!(queue.stats().live_workers, 0);
}

#[test]
fn every_job_runs_exactly_once() {
    let queue = JobQueue::new(4).unwrap();
    queue.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect());
    let (done_tx, done_rx) = unbounded();
    for n in 0..100 {
        let counter = counter.clone();
        let runs = runs.clone();
        let done_tx = done_tx.clone();
        queue
            .submit(FnJob::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                runs[n].fetch_add(1, Ordering::SeqCst);
                done_tx.send(n).unwrap();
            }))
            .unwrap();
    }
    for _ in 0..100 {
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 100);
    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
    let report = queue.stop().unwrap();
    assert_eq!(report.executed, 100);
    assert_eq!(report.submitted, 100);
}

#[test]
fn panicking_job_does_not_shrink_the_pool() {
    let queue = JobQueue::new(2).unwrap();
    queue.start().unwrap();

    queue
        .submit(FnJob::named("faulty", || panic!("bad job")))
        .unwrap();
    let (done_tx, done_rx) = unbounded();
    for n in 0..10 {
        let done_tx = done_tx.clone();
        queue
            .submit(FnJob::new(move || done_tx.send(n).unwrap()))
            .unwrap();
    }
    for _ in 0..10 {
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    assert!(wait_until(Duration::from_secs(1), || queue.stats().panicked == 1));
    assert!(wait_until(Duration::from_secs(1), || queue
        .stats()
        .live_workers
        == 2));

    let report = queue.stop().unwrap();
    assert_eq!(report.executed, 10);
    assert_eq!(report.panicked, 1);
    assert_eq!(queue.stats().live_workers, 0);
}

#[test]
fn no_worker_survives_stop() {
    let queue = JobQueue::new(5).unwrap();
    queue.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || queue
        .stats()
        .live_workers
        == 5));

    for _ in 0..20 {
        queue
            .submit(FnJob::new(|| thread::sleep(Duration::from_millis(2))))
            .unwrap();
    }
    queue.stop().unwrap();

    let stats = queue.stats();
    assert_eq!(stats.live_workers, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.executed, 20);
}

#[test]
fn submit_is_rejected_outside_running() {
    let queue = JobQueue::new(1).unwrap();
    let err = queue.submit(FnJob::new(|| {})).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotStarted));

    queue.start().unwrap();
    queue.stop().unwrap();
    let err = queue.submit(FnJob::new(|| {})).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::QueueClosed));
    let err = queue.start().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Stopped));
}

#[test]
fn stop_twice_reports_not_running() {
    let queue = JobQueue::new(1).unwrap();
    let err = queue.stop().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotRunning));

    queue.start().unwrap();
    queue.stop().unwrap();
    let err = queue.stop().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotRunning));
}

#[test]
fn drain_runs_backlog_behind_a_busy_worker() {
    let queue = Arc::new(
        JobQueue::with_config(QueueConfig::new(1).shutdown(ShutdownMode::Drain)).unwrap(),
    );
    queue.start().unwrap();

    let (started_tx, started_rx) = bounded(1);
    let (gate_tx, gate_rx) = bounded::<()>(0);
    queue
        .submit(FnJob::new(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        }))
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let counter = counter.clone();
        queue
            .submit(FnJob::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }

    let stopper = {
        let queue = queue.clone();
        thread::spawn(move || queue.stop())
    };
    thread::sleep(Duration::from_millis(50));
    gate_tx.send(()).unwrap();
    let report = stopper.join().unwrap().unwrap();

    assert_eq!(report.executed, 6);
    assert_eq!(report.discarded, 0);
    assert_eq!(counter.load(Ordering::SeqCst), 5);
}

#[test]
fn discard_drops_backlog_behind_a_busy_worker() {
    let queue = Arc::new(
        JobQueue::with_config(QueueConfig::new(1).shutdown(ShutdownMode::Discard)).unwrap(),
    );
    queue.start().unwrap();

    let (started_tx, started_rx) = bounded(1);
    let (gate_tx, gate_rx) = bounded::<()>(0);
    queue
        .submit(FnJob::new(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        }))
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    for _ in 0..5 {
        queue.submit(FnJob::new(|| {})).unwrap();
    }
    let stopper = {
        let queue = queue.clone();
        thread::spawn(move || queue.stop())
    };
    thread::sleep(Duration::from_millis(50));
    gate_tx.send(()).unwrap();
    let report = stopper.join().unwrap().unwrap();

    // the gate job always finishes; at most one queued job slips through
    assert_eq!(report.mode, ShutdownMode::Discard);
    assert_eq!(report.executed + report.discarded, 6);
    assert!(report.executed >= 1 && report.executed <= 2);
}

#[test]
fn stop_timeout_leaves_queue_stopping() {
    let queue = JobQueue::new(1).unwrap();
    queue.start().unwrap();

    let (started_tx, started_rx) = bounded(1);
    let (gate_tx, gate_rx) = bounded::<()>(0);
    queue
        .submit(FnJob::new(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        }))
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let err = queue.stop_timeout(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Timeout));
    assert_eq!(queue.state(), QueueState::Stopping);

    gate_tx.send(()).unwrap();
    assert!(wait_until(Duration::from_secs(1), || queue
        .stats()
        .live_workers
        == 0));

    // a later stop picks the shutdown up where the timed-out one left it
    let report = queue.stop().unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(queue.state(), QueueState::Stopped);
    let err = queue.stop().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotRunning));
}

#[test]
fn stop_timeout_returns_while_the_pool_is_full() {
    let config = QueueConfig::new(1).pool_capacity(1);
    let queue = JobQueue::with_config(config).unwrap();
    queue.start().unwrap();

    let (started_tx, started_rx) = bounded(1);
    let (gate_tx, gate_rx) = bounded::<()>(0);
    queue
        .submit(FnJob::new(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        }))
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let counter = counter.clone();
        queue
            .submit(FnJob::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }
    // one job fills the pool, the dispatcher holds or still queues the rest
    assert!(wait_until(Duration::from_secs(1), || queue.ready_len() == 1));

    let started = Instant::now();
    let err = queue.stop_timeout(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_millis(500), "{:?}", started.elapsed());
    assert_eq!(queue.state(), QueueState::Stopping);

    gate_tx.send(()).unwrap();
    let report = queue.stop().unwrap();
    assert_eq!(report.executed, 5);
    assert_eq!(report.discarded, 0);
    assert_eq!(report.backlog, 3);
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[test]
fn blocked_submit_wakes_when_stop_begins() {
    let config = QueueConfig::new(1).input_capacity(0).pool_capacity(1);
    let queue = Arc::new(JobQueue::with_config(config).unwrap());
    queue.start().unwrap();

    let (started_tx, started_rx) = bounded(1);
    let (gate_tx, gate_rx) = bounded::<()>(0);
    queue
        .submit(FnJob::new(move || {
            started_tx.send(()).unwrap();
            gate_rx.recv().unwrap();
        }))
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    // the first lands in the pool, the second stays in the dispatcher's hand
    for _ in 0..2 {
        let counter = counter.clone();
        queue
            .submit(FnJob::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }
    let pending = {
        let queue = queue.clone();
        let counter = counter.clone();
        thread::spawn(move || {
            queue.submit(FnJob::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        })
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let err = queue.stop_timeout(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_millis(500), "{:?}", started.elapsed());

    let err = pending.join().unwrap().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::QueueClosed));

    gate_tx.send(()).unwrap();
    let report = queue.stop().unwrap();
    assert_eq!(report.executed, 3);
    assert_eq!(report.submitted, 3);
    assert_eq!(report.backlog, 1);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn rendezvous_input_still_delivers() {
    let config = QueueConfig::new(2).input_capacity(0).pool_capacity(1);
    let queue = JobQueue::with_config(config).unwrap();
    queue.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..25 {
        let counter = counter.clone();
        queue
            .submit(FnJob::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }
    let report = queue.stop().unwrap();

    assert_eq!(report.executed, 25);
    assert_eq!(counter.load(Ordering::SeqCst), 25);
}

#[test]
fn submit_from_many_threads() {
    let queue = Arc::new(JobQueue::new(3).unwrap());
    queue.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let producers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..25 {
                    let counter = counter.clone();
                    let id = queue
                        .submit(FnJob::new(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }))
                        .unwrap();
                    ids.push(id);
                }
                ids
            })
        })
        .collect();

    let mut ids: Vec<_> = producers
        .into_iter()
        .flat_map(|p| p.join().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 100);

    let report = queue.stop().unwrap();
    assert_eq!(report.executed, 100);
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}
