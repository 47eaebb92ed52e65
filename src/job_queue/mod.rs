//! The structured job queue: one dispatcher, a fixed set of workers and a
//! bounded ready pool between them.
//!
//! ```text
//! submit ──▶ input ──▶ dispatcher ──▶ ready pool ──▶ worker 0..n ──▶ job.run()
//! ```
//!
//! [`JobQueue::stop`] closes admission, tells the dispatcher to terminate and
//! blocks until every worker has exited. What happens to queued work is
//! decided by [`ShutdownMode`].

mod dispatcher;
mod ready_pool;
mod worker;

pub(crate) use worker::execute_guarded;

use self::dispatcher::Dispatcher;
use self::ready_pool::ReadyPool;
use self::worker::{Worker, WorkerHandle};
use crate::config::{QueueConfig, ShutdownMode};
use crate::error::{Error, ErrorKind, Result};
use crate::job::{Envelope, FnJob, Job, JobId};
use crate::stats::{Stats, StatsSnapshot};
use crate::thread_pool::ThreadPool;
use crossbeam::channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use crossbeam::sync::WaitGroup;
use serde::Serialize;
use slog::{debug, error, info, warn, Logger};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle of a [`JobQueue`]. A queue never goes back to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl QueueState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => QueueState::Created,
            1 => QueueState::Running,
            2 => QueueState::Stopping,
            _ => QueueState::Stopped,
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::Created => write!(f, "created"),
            QueueState::Running => write!(f, "running"),
            QueueState::Stopping => write!(f, "stopping"),
            QueueState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Summary returned by [`JobQueue::stop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub mode: ShutdownMode,
    pub submitted: usize,
    pub executed: usize,
    pub panicked: usize,
    pub discarded: usize,
    /// Jobs the dispatcher had not yet forwarded when stop began.
    pub backlog: usize,
    pub elapsed_ms: u64,
}

// written by the dispatcher just before it drops its `finished` sender
pub(crate) type ReportSlot = Arc<Mutex<Option<ShutdownReport>>>;

// everything the dispatcher needs, parked until `start`
struct Parked {
    workers: Vec<Worker>,
    workers_stopped: WaitGroup,
    input: Receiver<Envelope>,
    terminate: Receiver<Instant>,
    finished: Sender<()>,
}

/// A fixed-size pool of worker threads fed through a dispatcher.
///
/// # Example
///
/// ```
/// use jobq::{FnJob, JobQueue};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let queue = JobQueue::new(2).unwrap();
/// queue.start().unwrap();
///
/// let counter = Arc::new(AtomicUsize::new(0));
/// for _ in 0..10 {
///     let counter = counter.clone();
///     queue
///         .submit(FnJob::new(move || {
///             counter.fetch_add(1, Ordering::SeqCst);
///         }))
///         .unwrap();
/// }
///
/// let report = queue.stop().unwrap();
/// assert_eq!(report.executed, 10);
/// assert_eq!(counter.load(Ordering::SeqCst), 10);
/// ```
pub struct JobQueue {
    state: AtomicU8,
    // `None` once admission is closed
    input: RwLock<Option<Sender<Envelope>>>,
    // never sent on; dropping the sender wakes submitters blocked on a full input
    closing: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
    terminate: Sender<Instant>,
    // disconnects once the dispatcher has filled `report`
    finished: Receiver<()>,
    report: ReportSlot,
    parked: Mutex<Option<Parked>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    pool: ReadyPool,
    worker_count: usize,
    mode: ShutdownMode,
    next_id: AtomicU64,
    stats: Arc<Stats>,
    logger: Logger,
}

impl JobQueue {
    /// A queue with `workers` threads and a ready pool of the same size.
    pub fn new(workers: usize) -> Result<Self> {
        JobQueue::with_config(QueueConfig::new(workers))
    }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        config.validate()?;

        let pool = ReadyPool::new(config.ready_capacity());
        let stats = Arc::new(Stats::new());
        let workers_stopped = WaitGroup::new();
        let workers = (0..config.workers)
            .map(|id| {
                Worker::new(
                    id,
                    pool.receiver().clone(),
                    workers_stopped.clone(),
                    config.shutdown,
                    stats.clone(),
                    &config.logger,
                )
            })
            .collect();

        let (input_tx, input_rx) = match config.input_capacity {
            Some(cap) => bounded(cap),
            None => unbounded(),
        };
        let (closing_tx, closing_rx) = bounded(0);
        let (terminate_tx, terminate_rx) = bounded(1);
        let (finished_tx, finished_rx) = bounded(0);

        Ok(JobQueue {
            state: AtomicU8::new(QueueState::Created as u8),
            input: RwLock::new(Some(input_tx)),
            closing: Mutex::new(Some(closing_tx)),
            closed: closing_rx,
            terminate: terminate_tx,
            finished: finished_rx,
            report: Arc::new(Mutex::new(None)),
            parked: Mutex::new(Some(Parked {
                workers,
                workers_stopped,
                input: input_rx,
                terminate: terminate_rx,
                finished: finished_tx,
            })),
            dispatcher: Mutex::new(None),
            pool,
            worker_count: config.workers,
            mode: config.shutdown,
            next_id: AtomicU64::new(1),
            stats,
            logger: config.logger,
        })
    }

    pub fn state(&self) -> QueueState {
        QueueState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of jobs waiting in the ready pool right now.
    pub fn ready_len(&self) -> usize {
        self.pool.len()
    }

    fn transition(&self, from: QueueState, to: QueueState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Spawns every worker, then the dispatcher.
    pub fn start(&self) -> Result<()> {
        if !self.transition(QueueState::Created, QueueState::Running) {
            return match self.state() {
                QueueState::Running => Err(ErrorKind::AlreadyStarted.into()),
                _ => Err(ErrorKind::Stopped.into()),
            };
        }
        let parked = self
            .parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::from(ErrorKind::AlreadyStarted))?;

        match self.spawn(parked) {
            Ok(handle) => {
                *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                info!(self.logger, "job queue started";
                    "workers" => self.worker_count,
                    "pool_capacity" => self.pool.capacity(),
                    "shutdown" => %self.mode
                );
                Ok(())
            }
            Err(e) => {
                self.state
                    .store(QueueState::Stopped as u8, Ordering::SeqCst);
                self.close_admission();
                error!(self.logger, "unable to start job queue"; "error" => %e);
                Err(e)
            }
        }
    }

    fn spawn(&self, parked: Parked) -> Result<JoinHandle<()>> {
        let Parked {
            workers,
            workers_stopped,
            input,
            terminate,
            finished,
        } = parked;

        let mut handles: Vec<WorkerHandle> = Vec::with_capacity(workers.len());
        for worker in workers {
            match worker.start() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    abort_workers(handles, &self.logger);
                    return Err(e);
                }
            }
        }

        let dispatcher = Dispatcher::new(
            input,
            terminate,
            finished,
            self.report.clone(),
            self.pool.clone(),
            handles,
            workers_stopped,
            self.mode,
            self.stats.clone(),
            &self.logger,
        );
        let handle = thread::Builder::new()
            .name("jobq-dispatcher".to_string())
            .spawn(move || dispatcher.watch())?;
        Ok(handle)
    }

    /// Hands a job to the queue.
    ///
    /// Fails with `NotStarted` before [`start`](JobQueue::start) and with
    /// `QueueClosed` once [`stop`](JobQueue::stop) has begun. Blocks while a
    /// bounded submission channel is full, and wakes with `QueueClosed` if
    /// stop begins in the meantime.
    pub fn submit<J: Job>(&self, job: J) -> Result<JobId> {
        self.submit_boxed(Box::new(job))
    }

    pub fn submit_boxed(&self, job: Box<dyn Job>) -> Result<JobId> {
        match self.state() {
            QueueState::Running => {}
            QueueState::Created => return Err(ErrorKind::NotStarted.into()),
            _ => return Err(ErrorKind::QueueClosed.into()),
        }
        // the clone keeps the input connected until this call returns, so a
        // send that succeeds is still seen by the dispatcher's backlog drain
        let sender = self
            .input
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .cloned()
            .ok_or_else(|| Error::from(ErrorKind::QueueClosed))?;

        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let envelope = Envelope::new(id, job);
        debug!(self.logger, "job submitted"; "job" => %id, "name" => envelope.name());
        select! {
            send(sender, envelope) -> res => {
                res.map_err(|_| Error::from(ErrorKind::QueueClosed))?;
            },
            recv(self.closed) -> _ => {
                debug!(self.logger, "submit abandoned, queue is stopping"; "job" => %id);
                return Err(ErrorKind::QueueClosed.into());
            }
        }
        self.stats.record_submitted();
        Ok(id)
    }

    /// Stops the queue and waits for every worker to exit.
    ///
    /// Called again while a timed-out stop is still winding down, it resumes
    /// waiting and returns the same report.
    pub fn stop(&self) -> Result<ShutdownReport> {
        self.begin_stop()?;
        // nothing is ever sent; disconnect means the report is ready
        let _ = self.finished.recv();
        self.finish_stop()
    }

    /// Like [`stop`](JobQueue::stop), but gives up waiting after `timeout`.
    ///
    /// On timeout the queue stays in `Stopping` and the workers keep winding
    /// down in the background; a later `stop` collects the report.
    pub fn stop_timeout(&self, timeout: Duration) -> Result<ShutdownReport> {
        self.begin_stop()?;
        if let Err(RecvTimeoutError::Timeout) = self.finished.recv_timeout(timeout) {
            warn!(self.logger, "timed out waiting for workers"; "timeout_ms" => timeout.as_millis() as u64);
            return Err(ErrorKind::Timeout.into());
        }
        self.finish_stop()
    }

    fn begin_stop(&self) -> Result<()> {
        if !self.transition(QueueState::Running, QueueState::Stopping) {
            return match self.state() {
                QueueState::Stopping => Ok(()),
                _ => Err(ErrorKind::NotRunning.into()),
            };
        }
        let requested_at = Instant::now();
        info!(self.logger, "stopping job queue");
        self.close_admission();
        self.terminate
            .send(requested_at)
            .map_err(|_| Error::disconnected("dispatcher"))
    }

    fn close_admission(&self) {
        self.input
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.closing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn finish_stop(&self) -> Result<ShutdownReport> {
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(self.logger, "dispatcher thread panicked");
            }
        }
        let report = self
            .report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::disconnected("dispatcher"))?;
        self.state
            .store(QueueState::Stopped as u8, Ordering::SeqCst);
        info!(self.logger, "job queue stopped";
            "executed" => report.executed,
            "panicked" => report.panicked,
            "discarded" => report.discarded,
            "elapsed_ms" => report.elapsed_ms
        );
        Ok(report)
    }
}

fn abort_workers(handles: Vec<WorkerHandle>, logger: &Logger) {
    for handle in &handles {
        let _ = handle.stop();
    }
    for handle in handles {
        let id = handle.id();
        if handle.join().is_err() {
            error!(logger, "worker thread panicked"; "worker" => id);
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if let QueueState::Running | QueueState::Stopping = self.state() {
            if let Err(e) = self.stop() {
                error!(self.logger, "unable to stop job queue"; "error" => %e);
            }
        }
    }
}

impl ThreadPool for JobQueue {
    fn new(size: usize) -> Result<Self> {
        let queue = JobQueue::new(size)?;
        queue.start()?;
        Ok(queue)
    }

    fn execute<F>(&self, job: F) -> Result<()>
    where
        F: Send + FnOnce() + 'static,
    {
        self.submit(FnJob::new(job)).map(|_| ())
    }
}
