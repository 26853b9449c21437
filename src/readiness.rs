//! Readiness queries against message-queue sockets.
//!
//! A message-queue socket keeps a level-triggered readiness mask that has
//! to be re-queried, while the only thing the event loop can wait on is a
//! descriptor that signals "state may have changed". Everything in this
//! crate asks the socket itself through [`readiness`] and treats the
//! descriptor as a hint.

use std::{fmt, io, ops::BitOr, os::fd::RawFd};

use crate::{
    error::{Error, Result},
    event_loop::Ready,
};

/// Poll flags in the message-queue vocabulary (`ZMQ_POLLIN` / `ZMQ_POLLOUT`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PollEvents(u8);

impl PollEvents {
    pub const EMPTY: PollEvents = PollEvents(0);
    pub const POLLIN: PollEvents = PollEvents(1);
    pub const POLLOUT: PollEvents = PollEvents(2);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: PollEvents) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for PollEvents {
    type Output = PollEvents;

    fn bitor(self, rhs: PollEvents) -> PollEvents {
        PollEvents(self.0 | rhs.0)
    }
}

impl fmt::Debug for PollEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (
            self.contains(PollEvents::POLLIN),
            self.contains(PollEvents::POLLOUT),
        ) {
            (false, false) => f.write_str("PollEvents(EMPTY)"),
            (true, false) => f.write_str("PollEvents(POLLIN)"),
            (false, true) => f.write_str("PollEvents(POLLOUT)"),
            (true, true) => f.write_str("PollEvents(POLLIN | POLLOUT)"),
        }
    }
}

impl From<PollEvents> for Ready {
    fn from(events: PollEvents) -> Ready {
        let mut ready = Ready::EMPTY;
        if events.contains(PollEvents::POLLIN) {
            ready |= Ready::READABLE;
        }
        if events.contains(PollEvents::POLLOUT) {
            ready |= Ready::WRITABLE;
        }
        ready
    }
}

impl From<Ready> for PollEvents {
    fn from(ready: Ready) -> PollEvents {
        let mut events = PollEvents::EMPTY;
        if ready.is_readable() {
            events = events | PollEvents::POLLIN;
        }
        if ready.is_writable() {
            events = events | PollEvents::POLLOUT;
        }
        events
    }
}

/// The two queries a message-queue socket has to answer.
pub trait MqSocket {
    /// Current level-triggered readiness (`ZMQ_EVENTS`).
    fn events(&self) -> io::Result<PollEvents>;

    /// Descriptor that becomes readable when the readiness may have
    /// changed (`ZMQ_FD`). Edge semantics: it says nothing about the
    /// direction nor about how many messages are pending.
    fn fd(&self) -> io::Result<RawFd>;
}

/// What to do when [`MqSocket::events`] fails on a socket that is
/// already being watched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QueryFailurePolicy {
    /// Treat the failure as a programming error and panic.
    #[default]
    Abort,
    /// Report the whole interest set as ready so the callback runs and
    /// observes the failure on its next socket operation.
    AssumeReady,
}

/// Intersect `interest` with the socket's current readiness.
pub fn readiness(socket: &dyn MqSocket, interest: Ready, policy: QueryFailurePolicy) -> Ready {
    match socket.events() {
        Ok(events) => Ready::from(events) & interest,
        Err(err) => match policy {
            QueryFailurePolicy::Abort => {
                tracing::error!("readiness query failed on a watched socket: {}", err);
                panic!("readiness query failed on a watched socket: {err}");
            }
            QueryFailurePolicy::AssumeReady => {
                tracing::warn!("readiness query failed, assuming ready: {}", err);
                interest
            }
        },
    }
}

/// Query the socket's signalling descriptor.
pub fn native_fd(socket: &dyn MqSocket) -> Result<RawFd> {
    socket.fd().map_err(Error::Descriptor)
}

#[cfg(feature = "zmq")]
impl MqSocket for zmq::Socket {
    fn events(&self) -> io::Result<PollEvents> {
        let events = self.get_events().map_err(zmq_error)?;
        let mut out = PollEvents::EMPTY;
        if events.contains(zmq::POLLIN) {
            out = out | PollEvents::POLLIN;
        }
        if events.contains(zmq::POLLOUT) {
            out = out | PollEvents::POLLOUT;
        }
        Ok(out)
    }

    fn fd(&self) -> io::Result<RawFd> {
        self.get_fd().map_err(zmq_error)
    }
}

#[cfg(feature = "zmq")]
fn zmq_error(err: zmq::Error) -> io::Error {
    io::Error::from_raw_os_error(err.to_raw())
}
