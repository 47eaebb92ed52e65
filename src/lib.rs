//! A single-process job queue.
//!
//! Jobs are handed to a [`JobQueue`], forwarded by a dispatcher thread into a
//! bounded ready pool and executed by a fixed set of worker threads. Stopping
//! the queue closes admission, winds the workers down and reports what
//! happened to the accepted work.
//!
//! [`SharedQueuePool`] is the lighter variant with no dispatcher: a handful
//! of threads draining one shared channel.

pub mod config;
pub mod error;
pub mod job;
pub mod job_queue;
pub mod stats;
pub mod thread_pool;

pub use config::{QueueConfig, ShutdownMode};
pub use error::{Error, ErrorKind, Result};
pub use job::{FnJob, Job, JobId};
pub use job_queue::{JobQueue, QueueState, ShutdownReport};
pub use stats::StatsSnapshot;
pub use thread_pool::{SharedQueuePool, ThreadPool};
