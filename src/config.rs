use crate::error::{Error, Result};
use serde::Serialize;
use slog::{o, Discard, Logger};
use std::fmt;
use std::str::FromStr;

/// What `stop` does with jobs that were accepted but have not started yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Run every accepted job before the workers exit.
    Drain,
    /// Drop whatever is still queued; jobs already running finish.
    Discard,
}

impl Default for ShutdownMode {
    fn default() -> Self {
        ShutdownMode::Drain
    }
}

impl FromStr for ShutdownMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "drain" => Ok(ShutdownMode::Drain),
            "discard" => Ok(ShutdownMode::Discard),
            _ => Err(Error::invalid_config(format!(
                "shutdown mode should be either drain or discard, got {}",
                s
            ))),
        }
    }
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownMode::Drain => write!(f, "drain"),
            ShutdownMode::Discard => write!(f, "discard"),
        }
    }
}

/// Settings for a [`JobQueue`](crate::JobQueue).
///
/// ```
/// use jobq::{QueueConfig, ShutdownMode};
///
/// let config = QueueConfig::new(4)
///     .pool_capacity(16)
///     .shutdown(ShutdownMode::Discard);
/// assert_eq!(config.ready_capacity(), 16);
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    /// Capacity of the ready pool. Defaults to the worker count.
    pub pool_capacity: Option<usize>,
    /// Capacity of the submission channel. `None` is unbounded, `Some(0)`
    /// makes every submit wait for the dispatcher.
    pub input_capacity: Option<usize>,
    pub shutdown: ShutdownMode,
    pub logger: Logger,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            workers: 1,
            pool_capacity: None,
            input_capacity: None,
            shutdown: ShutdownMode::default(),
            logger: Logger::root(Discard, o!()),
        }
    }
}

impl QueueConfig {
    pub fn new(workers: usize) -> Self {
        QueueConfig {
            workers,
            ..Default::default()
        }
    }

    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = Some(capacity);
        self
    }

    pub fn input_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = Some(capacity);
        self
    }

    pub fn shutdown(mut self, mode: ShutdownMode) -> Self {
        self.shutdown = mode;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn ready_capacity(&self) -> usize {
        self.pool_capacity.unwrap_or(self.workers)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.ready_capacity() == 0 {
            return Err(Error::invalid_config(
                "ready pool capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
