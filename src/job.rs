use std::fmt;

/// Opaque identifier the queue hands out on submit. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl JobId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A unit of work.
///
/// A job is run exactly once by exactly one worker and then dropped.
/// Panics raised by `run` are caught by the worker, so a faulting job does
/// not take its worker down with it.
pub trait Job: Send + 'static {
    fn run(self: Box<Self>);

    /// Optional label used in log records.
    fn name(&self) -> Option<&str> {
        None
    }
}

/// A job backed by a closure.
pub struct FnJob {
    name: Option<String>,
    action: Box<dyn FnOnce() + Send + 'static>,
}

impl FnJob {
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        FnJob {
            name: None,
            action: Box::new(action),
        }
    }

    pub fn named<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        FnJob {
            name: Some(name.into()),
            action: Box::new(action),
        }
    }
}

impl Job for FnJob {
    fn run(self: Box<Self>) {
        (self.action)()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Debug for FnJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob").field("name", &self.name).finish()
    }
}

// what actually travels through the channels
pub(crate) struct Envelope {
    pub(crate) id: JobId,
    pub(crate) job: Box<dyn Job>,
}

impl Envelope {
    pub(crate) fn new(id: JobId, job: Box<dyn Job>) -> Self {
        Envelope { id, job }
    }

    pub(crate) fn name(&self) -> &str {
        self.job.name().unwrap_or("anonymous")
    }
}
