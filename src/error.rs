use crossbeam::channel::SendError;
use failure::{Backtrace, Context, Fail};
use std::fmt::Display;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "invalid configuration: {}", _0)]
    InvalidConfig(String),

    #[fail(display = "job queue has not been started")]
    NotStarted,

    #[fail(display = "job queue is already running")]
    AlreadyStarted,

    #[fail(display = "job queue is not running")]
    NotRunning,

    #[fail(display = "job queue is closed to new submissions")]
    QueueClosed,

    #[fail(display = "job queue has been stopped and cannot be restarted")]
    Stopped,

    #[fail(display = "timed out waiting for workers to stop")]
    Timeout,

    #[fail(display = "unable to spawn thread: {}", _0)]
    Spawn(#[cause] io::Error),

    #[fail(display = "{} disconnected", _0)]
    Disconnected(String),
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    pub fn invalid_config(msg: String) -> Self {
        Error::from(ErrorKind::InvalidConfig(msg))
    }

    pub fn disconnected(what: &str) -> Self {
        Error::from(ErrorKind::Disconnected(what.to_string()))
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        // the context itself has no cause; the kind carries it
        self.inner.get_context().cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error {
            inner: Context::new(ErrorKind::Spawn(err)),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(err: ErrorKind) -> Self {
        Error {
            inner: Context::new(err),
        }
    }
}

// the message itself is dropped with the error
impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Self {
        Error::disconnected("job channel")
    }
}
