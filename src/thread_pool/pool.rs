use super::ThreadPool;
use crate::error::{Error, Result};
use crate::job::{Envelope, FnJob, JobId};
use crate::job_queue::execute_guarded;
use crate::stats::{Stats, StatsSnapshot};
use crossbeam::channel::{bounded, Receiver, Sender};
use slog::{debug, error, info, o, Discard, Logger};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// The simple variant: `size` threads all draining one bounded channel.
///
/// There is no dispatcher and no terminate signal. Dropping the pool closes
/// the channel; workers finish what is queued and exit, and the drop waits
/// for them.
pub struct SharedQueuePool {
    sender: Option<Sender<Envelope>>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
    stats: Arc<Stats>,
    logger: Logger,
}

impl ThreadPool for SharedQueuePool {
    fn new(size: usize) -> Result<Self>
    where
        Self: Sized,
    {
        SharedQueuePool::with_logger(size, Logger::root(Discard, o!()))
    }

    fn execute<F>(&self, job: F) -> Result<()>
    where
        // since function works in a thread, it must have static lifetime
        F: Send + FnOnce() + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::disconnected("thread pool"))?;
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        sender.send(Envelope::new(id, Box::new(FnJob::new(job))))?;
        self.stats.record_submitted();
        Ok(())
    }
}

impl SharedQueuePool {
    pub fn with_logger(size: usize, logger: Logger) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_config(
                "thread pool needs at least one thread".to_string(),
            ));
        }
        let (sender, receiver) = bounded::<Envelope>(size);
        let stats = Arc::new(Stats::new());

        let mut pool = SharedQueuePool {
            sender: Some(sender),
            workers: Vec::with_capacity(size),
            next_id: AtomicU64::new(1),
            stats,
            logger,
        };
        for id in 0..size {
            let receiver = receiver.clone();
            let stats = pool.stats.clone();
            let logger = pool.logger.new(o!("worker" => id));
            let spawned = thread::Builder::new()
                .name(format!("jobq-pool-{}", id))
                .spawn(move || do_job(receiver, stats, logger));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                // drop closes the channel and joins what was spawned
                Err(e) => return Err(Error::from(e)),
            }
        }
        info!(pool.logger, "thread pool started"; "threads" => size);
        Ok(pool)
    }

    /// Runs `job` on the pool and hands its value back over a channel.
    ///
    /// If the job panics the receiver sees a disconnect instead of a value.
    pub fn execute_with_result<F, T>(&self, job: F) -> Result<Receiver<T>>
    where
        F: Send + FnOnce() -> T + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        self.execute(move || {
            // the caller may have stopped listening
            let _ = tx.send(job());
        })?;
        Ok(rx)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Closes the pool, waits for queued jobs to finish and returns the final counters.
    pub fn shutdown(mut self) -> StatsSnapshot {
        self.close();
        self.stats.snapshot()
    }

    fn close(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!(self.logger, "pool thread panicked");
            }
        }
        info!(self.logger, "thread pool stopped");
    }
}

// destroy threads when pool is dead
impl Drop for SharedQueuePool {
    fn drop(&mut self) {
        self.close();
    }
}

// complete jobs until the channel is closed and empty
fn do_job(receiver: Receiver<Envelope>, stats: Arc<Stats>, logger: Logger) {
    let _alive = stats.worker_alive();
    for envelope in receiver.iter() {
        execute_guarded(envelope, &stats, &logger);
    }
    debug!(logger, "pool thread exiting");
}
