//! Error types shared by the event loop, the socket watcher and the reactor.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

use crate::event_loop::WatcherId;

/// Main error type for pluvio_zsock operations.
#[derive(Error, Debug)]
pub enum Error {
    /// OS error raised by the host loop while waiting for events.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The native descriptor of a message-queue socket could not be queried.
    #[error("failed to query native descriptor: {0}")]
    Descriptor(#[source] io::Error),

    /// A watcher or poller was requested with no readable/writable interest.
    #[error("interest set is empty")]
    EmptyInterest,

    /// A raw descriptor poller was given a negative descriptor.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(RawFd),

    /// The id does not name a live watcher of this loop.
    #[error("unknown watcher {0:?}")]
    UnknownWatcher(WatcherId),

    /// The watcher has a close pending and can no longer be started.
    #[error("watcher {0:?} is closing")]
    Closing(WatcherId),

    /// `run` was called from inside a callback of the same loop.
    #[error("event loop is already running")]
    AlreadyRunning,

    /// A socket watcher was driven with a loop other than the one it was started on.
    #[error("watcher is registered with a different event loop")]
    ForeignLoop,

    /// A handler returned `ControlFlow::Break` during `Reactor::run`.
    #[error("run canceled by handler")]
    Canceled,
}

/// Result type alias for pluvio_zsock operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error is the handler-requested cancellation of a run.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
