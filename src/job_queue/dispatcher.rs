use super::ready_pool::ReadyPool;
use super::worker::WorkerHandle;
use super::{ReportSlot, ShutdownReport};
use crate::config::ShutdownMode;
use crate::job::Envelope;
use crate::stats::Stats;
use crossbeam::channel::{select, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use slog::{debug, error, info, o, warn, Logger};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

/// Forwards submitted jobs into the ready pool and shuts the workers down.
pub(crate) struct Dispatcher {
    input: Receiver<Envelope>,
    terminate: Receiver<Instant>,
    // dropped after `report` is filled in
    finished: Sender<()>,
    report: ReportSlot,
    pool: ReadyPool,
    workers: Vec<WorkerHandle>,
    workers_stopped: WaitGroup,
    // taken off the input channel but interrupted by terminate before forwarding
    in_hand: Option<Envelope>,
    mode: ShutdownMode,
    stats: Arc<Stats>,
    logger: Logger,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        input: Receiver<Envelope>,
        terminate: Receiver<Instant>,
        finished: Sender<()>,
        report: ReportSlot,
        pool: ReadyPool,
        workers: Vec<WorkerHandle>,
        workers_stopped: WaitGroup,
        mode: ShutdownMode,
        stats: Arc<Stats>,
        logger: &Logger,
    ) -> Self {
        Dispatcher {
            input,
            terminate,
            finished,
            report,
            pool,
            workers,
            workers_stopped,
            in_hand: None,
            mode,
            stats,
            logger: logger.new(o!("component" => "dispatcher")),
        }
    }

    // listen to input and terminate
    pub(crate) fn watch(mut self) {
        info!(self.logger, "dispatcher started";
            "workers" => self.workers.len(),
            "pool_capacity" => self.pool.capacity()
        );
        let input = self.input.clone();
        let terminate = self.terminate.clone();
        let requested_at = loop {
            // termination wins over admitting more work
            if let Ok(at) = terminate.try_recv() {
                break at;
            }
            select! {
                recv(input) -> msg => match msg {
                    Ok(envelope) => {
                        if let Some(at) = self.forward(envelope) {
                            break at;
                        }
                    }
                    Err(_) => {
                        // admission closed, the terminate request follows
                        break terminate.recv().unwrap_or_else(|_| Instant::now());
                    }
                },
                recv(terminate) -> at => {
                    break at.unwrap_or_else(|_| Instant::now());
                }
            }
        };
        self.shutdown(requested_at);
    }

    // push into the ready pool; returns the stop time if terminate interrupts a full pool
    fn forward(&mut self, envelope: Envelope) -> Option<Instant> {
        let id = envelope.id;
        select! {
            send(self.pool.sender(), envelope) -> res => {
                match res {
                    Ok(()) => debug!(self.logger, "forwarded to ready pool"; "job" => %id),
                    Err(_) => {
                        self.stats.record_discarded(1);
                        warn!(self.logger, "ready pool disconnected, job dropped"; "job" => %id);
                    }
                }
                None
            },
            recv(self.terminate) -> at => {
                self.in_hand = Some(envelope);
                Some(at.unwrap_or_else(|_| Instant::now()))
            }
        }
    }

    fn shutdown(mut self, requested_at: Instant) {
        let mut backlog: Vec<Envelope> = self.in_hand.take().into_iter().collect();
        // admission is closed, so this ends once the last in-flight submit returns
        while let Ok(envelope) = self.input.recv() {
            backlog.push(envelope);
        }
        let backlog_len = backlog.len();
        info!(self.logger, "stopping";
            "mode" => %self.mode,
            "backlog" => backlog.len(),
            "ready" => self.pool.len()
        );

        match self.mode {
            ShutdownMode::Drain => {
                // workers are still running, so these sends make progress
                for envelope in backlog {
                    let id = envelope.id;
                    if self.pool.sender().send(envelope).is_err() {
                        self.stats.record_discarded(1);
                        warn!(self.logger, "ready pool disconnected, job dropped"; "job" => %id);
                    }
                }
            }
            ShutdownMode::Discard => {
                if !backlog.is_empty() {
                    warn!(self.logger, "discarding backlog"; "jobs" => backlog.len());
                    self.stats.record_discarded(backlog.len());
                }
            }
        }

        for worker in &self.workers {
            if let Err(e) = worker.stop() {
                warn!(self.logger, "unable to signal worker"; "worker" => worker.id(), "error" => %e);
            }
        }
        self.workers_stopped.wait();
        for worker in self.workers.drain(..) {
            let id = worker.id();
            if worker.join().is_err() {
                error!(self.logger, "worker thread panicked"; "worker" => id);
            }
        }

        if self.mode == ShutdownMode::Discard && !self.pool.is_empty() {
            let dropped = self.pool.receiver().try_iter().count();
            warn!(self.logger, "discarding ready pool"; "jobs" => dropped);
            self.stats.record_discarded(dropped);
        }

        let snapshot = self.stats.snapshot();
        let report = ShutdownReport {
            mode: self.mode,
            submitted: snapshot.submitted,
            executed: snapshot.executed,
            panicked: snapshot.panicked,
            discarded: snapshot.discarded,
            backlog: backlog_len,
            elapsed_ms: requested_at.elapsed().as_millis() as u64,
        };
        info!(self.logger, "dispatcher stopped";
            "executed" => report.executed,
            "panicked" => report.panicked,
            "discarded" => report.discarded
        );
        *self.report.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
        drop(self.finished);
    }
}
