use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters shared between the queue, its dispatcher and its workers.
#[derive(Debug, Default)]
pub struct Stats {
    submitted: AtomicUsize,
    executed: AtomicUsize,
    panicked: AtomicUsize,
    discarded: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    live_workers: AtomicUsize,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub submitted: usize,
    pub executed: usize,
    pub panicked: usize,
    pub discarded: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub live_workers: usize,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::SeqCst),
            executed: self.executed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            live_workers: self.live_workers.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_discarded(&self, n: usize) {
        self.discarded.fetch_add(n, Ordering::SeqCst);
    }

    /// Marks one job as executing until the guard is dropped.
    pub(crate) fn begin_job(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { stats: self }
    }

    /// Marks one worker thread as alive until the guard is dropped.
    pub(crate) fn worker_alive(&self) -> LiveWorkerGuard<'_> {
        self.live_workers.fetch_add(1, Ordering::SeqCst);
        LiveWorkerGuard { stats: self }
    }
}

pub(crate) struct InFlightGuard<'a> {
    stats: &'a Stats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct LiveWorkerGuard<'a> {
    stats: &'a Stats,
}

impl Drop for LiveWorkerGuard<'_> {
    fn drop(&mut self) {
        self.stats.live_workers.fetch_sub(1, Ordering::SeqCst);
    }
}
