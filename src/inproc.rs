//! In-process message-queue socket pair.
//!
//! Each endpoint owns an `eventfd` that behaves like `ZMQ_FD`: it is
//! signalled when the endpoint's state may have changed and drained by
//! [`MqSocket::events`]. Messages can therefore be pending while the
//! descriptor is quiet, which is exactly the situation a watcher must
//! handle by asking the socket instead of the descriptor.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io,
    os::fd::{AsRawFd, RawFd},
    rc::Rc,
};

use crate::readiness::{MqSocket, PollEvents};

/// Non-blocking `eventfd` used as an edge signal.
struct EventFd {
    fd: RawFd,
}

impl EventFd {
    fn new() -> io::Result<Self> {
        // SAFETY: plain syscall, the result is checked below
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EventFd { fd })
    }

    fn notify(&self) {
        let one: u64 = 1;
        // SAFETY: writes 8 bytes from a live u64 to an owned descriptor
        let n = unsafe {
            libc::write(
                self.fd,
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            // EAGAIN means the counter is saturated, which still signals
            tracing::trace!("EventFd::notify: {}", io::Error::last_os_error());
        }
    }

    fn drain(&self) {
        let mut value: u64 = 0;
        // SAFETY: reads 8 bytes into a live u64 from an owned descriptor
        unsafe {
            libc::read(
                self.fd,
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        // SAFETY: the descriptor is owned and closed exactly once
        unsafe { libc::close(self.fd) };
    }
}

struct Mailbox {
    queue: RefCell<VecDeque<Vec<u8>>>,
    capacity: Option<usize>,
}

impl Mailbox {
    fn new(capacity: Option<usize>) -> Rc<Self> {
        Rc::new(Mailbox {
            queue: RefCell::new(VecDeque::new()),
            capacity,
        })
    }

    fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.queue.borrow().len() >= capacity)
    }
}

/// One end of an in-process pair created by [`pair`].
pub struct InprocSocket {
    inbox: Rc<Mailbox>,
    outbox: Rc<Mailbox>,
    signal: Rc<EventFd>,
    peer_signal: Rc<EventFd>,
    closed: Cell<bool>,
}

/// Create two connected endpoints with unbounded queues.
pub fn pair() -> io::Result<(InprocSocket, InprocSocket)> {
    pair_inner(None)
}

/// Create two connected endpoints whose inboxes hold at most `capacity`
/// messages; sending to a full peer fails with `WouldBlock`.
pub fn pair_with_capacity(capacity: usize) -> io::Result<(InprocSocket, InprocSocket)> {
    pair_inner(Some(capacity))
}

fn pair_inner(capacity: Option<usize>) -> io::Result<(InprocSocket, InprocSocket)> {
    let a_inbox = Mailbox::new(capacity);
    let b_inbox = Mailbox::new(capacity);
    let a_signal = Rc::new(EventFd::new()?);
    let b_signal = Rc::new(EventFd::new()?);

    let a = InprocSocket {
        inbox: a_inbox.clone(),
        outbox: b_inbox.clone(),
        signal: a_signal.clone(),
        peer_signal: b_signal.clone(),
        closed: Cell::new(false),
    };
    let b = InprocSocket {
        inbox: b_inbox,
        outbox: a_inbox,
        signal: b_signal,
        peer_signal: a_signal,
        closed: Cell::new(false),
    };
    tracing::debug!(
        "inproc pair created: fds {} <-> {}",
        a.signal.as_raw_fd(),
        b.signal.as_raw_fd()
    );
    Ok((a, b))
}

fn not_a_socket() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOTSOCK)
}

impl InprocSocket {
    /// Queue a message for the peer.
    pub fn send(&self, message: impl Into<Vec<u8>>) -> io::Result<()> {
        if self.closed.get() {
            return Err(not_a_socket());
        }
        if self.outbox.is_full() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.outbox.queue.borrow_mut().push_back(message.into());
        self.peer_signal.notify();
        Ok(())
    }

    /// Take the oldest pending message.
    pub fn recv(&self) -> io::Result<Vec<u8>> {
        if self.closed.get() {
            return Err(not_a_socket());
        }
        let was_full = self.inbox.is_full();
        let message = self
            .inbox
            .queue
            .borrow_mut()
            .pop_front()
            .ok_or(io::ErrorKind::WouldBlock)?;
        if was_full {
            // the peer may write again
            self.peer_signal.notify();
        }
        Ok(message)
    }

    /// Number of messages waiting in this endpoint's inbox.
    pub fn pending(&self) -> usize {
        self.inbox.queue.borrow().len()
    }

    /// Make every further operation on this endpoint fail, the way a
    /// closed ZeroMQ socket does.
    pub fn close(&self) {
        self.closed.set(true);
    }
}

impl MqSocket for InprocSocket {
    fn events(&self) -> io::Result<PollEvents> {
        if self.closed.get() {
            return Err(not_a_socket());
        }
        self.signal.drain();
        let mut events = PollEvents::EMPTY;
        if !self.inbox.queue.borrow().is_empty() {
            events = events | PollEvents::POLLIN;
        }
        if !self.outbox.is_full() {
            events = events | PollEvents::POLLOUT;
        }
        Ok(events)
    }

    fn fd(&self) -> io::Result<RawFd> {
        if self.closed.get() {
            return Err(not_a_socket());
        }
        Ok(self.signal.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fd_is_signalled(fd: RawFd) -> bool {
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one initialised pollfd, zero timeout
        let rc = unsafe { libc::poll(&mut pollfd, 1, 0) };
        rc == 1 && pollfd.revents & libc::POLLIN != 0
    }

    #[test]
    fn messages_arrive_in_order() {
        let (a, b) = pair().unwrap();
        a.send("one").unwrap();
        a.send(b"two".to_vec()).unwrap();

        assert_eq!(b.pending(), 2);
        assert_eq!(b.recv().unwrap(), b"one");
        assert_eq!(b.recv().unwrap(), b"two");
        assert_eq!(b.recv().unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn events_drain_the_edge_signal_but_not_the_queue() {
        let (a, b) = pair().unwrap();
        let fd = b.fd().unwrap();
        assert!(!fd_is_signalled(fd));

        a.send("ping").unwrap();
        a.send("pong").unwrap();
        assert!(fd_is_signalled(fd));

        assert!(b.events().unwrap().contains(PollEvents::POLLIN));
        // the level stays while the descriptor went quiet
        assert!(!fd_is_signalled(fd));
        assert!(b.events().unwrap().contains(PollEvents::POLLIN));
    }

    #[test]
    fn capacity_limits_writability() {
        let (a, b) = pair_with_capacity(1).unwrap();
        assert!(a.events().unwrap().contains(PollEvents::POLLOUT));

        a.send("first").unwrap();
        assert!(!a.events().unwrap().contains(PollEvents::POLLOUT));
        assert_eq!(a.send("second").unwrap_err().kind(), io::ErrorKind::WouldBlock);

        b.recv().unwrap();
        assert!(fd_is_signalled(a.fd().unwrap()));
        assert!(a.events().unwrap().contains(PollEvents::POLLOUT));
    }

    #[test]
    fn closed_endpoint_rejects_queries() {
        let (a, _b) = pair().unwrap();
        a.close();
        assert!(a.events().is_err());
        assert!(a.fd().is_err());
        assert!(a.send("x").is_err());
    }
}
