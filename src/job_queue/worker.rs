use crate::config::ShutdownMode;
use crate::error::{Error, Result};
use crate::job::Envelope;
use crate::stats::Stats;
use crossbeam::channel::{bounded, select, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use slog::{debug, error, info, o, Logger};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// An execution agent that has been built but not started.
pub(crate) struct Worker {
    id: usize,
    ready: Receiver<Envelope>,
    terminate_tx: Sender<()>,
    terminate_rx: Receiver<()>,
    // dropped exactly once, when the worker thread exits
    stopped: WaitGroup,
    mode: ShutdownMode,
    stats: Arc<Stats>,
    logger: Logger,
}

/// A running worker, as seen by the dispatcher.
pub(crate) struct WorkerHandle {
    id: usize,
    terminate: Sender<()>,
    thread: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        ready: Receiver<Envelope>,
        stopped: WaitGroup,
        mode: ShutdownMode,
        stats: Arc<Stats>,
        logger: &Logger,
    ) -> Self {
        // one slot so the dispatcher can signal a busy worker without waiting on it
        let (terminate_tx, terminate_rx) = bounded(1);
        Worker {
            id,
            ready,
            terminate_tx,
            terminate_rx,
            stopped,
            mode,
            stats,
            logger: logger.new(o!("worker" => id)),
        }
    }

    pub(crate) fn start(self) -> Result<WorkerHandle> {
        let id = self.id;
        let terminate = self.terminate_tx.clone();
        let thread = thread::Builder::new()
            .name(format!("jobq-worker-{}", id))
            .spawn(move || self.run())?;
        Ok(WorkerHandle {
            id,
            terminate,
            thread,
        })
    }

    fn run(self) {
        let Worker {
            ready,
            terminate_rx,
            stopped,
            mode,
            stats,
            logger,
            ..
        } = self;
        // dropped after `_alive`
        let _stopped = stopped;
        let _alive = stats.worker_alive();
        debug!(logger, "worker started");

        loop {
            select! {
                recv(ready) -> msg => match msg {
                    Ok(envelope) => execute_guarded(envelope, &stats, &logger),
                    Err(_) => {
                        debug!(logger, "ready pool disconnected");
                        break;
                    }
                },
                recv(terminate_rx) -> _ => {
                    if mode == ShutdownMode::Drain {
                        let mut drained = 0;
                        while let Ok(envelope) = ready.try_recv() {
                            execute_guarded(envelope, &stats, &logger);
                            drained += 1;
                        }
                        debug!(logger, "drained ready pool"; "jobs" => drained);
                    }
                    break;
                }
            }
        }
        info!(logger, "worker stopped");
    }
}

impl WorkerHandle {
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Ask the worker to leave its loop. A job it is running finishes first.
    pub(crate) fn stop(&self) -> Result<()> {
        self.terminate
            .send(())
            .map_err(|_| Error::disconnected(&format!("worker {}", self.id)))
    }

    pub(crate) fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}

/// Runs one job behind a panic boundary so the calling thread survives it.
pub(crate) fn execute_guarded(envelope: Envelope, stats: &Stats, logger: &Logger) {
    let Envelope { id, job } = envelope;
    let name = job.name().unwrap_or("anonymous").to_string();
    debug!(logger, "running job"; "job" => %id, "name" => &name);

    let _in_flight = stats.begin_job();
    match panic::catch_unwind(AssertUnwindSafe(move || job.run())) {
        Ok(()) => {
            stats.record_executed();
            debug!(logger, "job completed"; "job" => %id);
        }
        Err(payload) => {
            stats.record_panicked();
            error!(logger, "job panicked";
                "job" => %id,
                "name" => &name,
                "reason" => panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
