//! Event loop watcher for message-queue sockets.
//!
//! [`ZsockWatcher`] bridges the socket's level-triggered readiness and the
//! edge-triggered descriptor the loop can wait on, using four
//! sub-watchers:
//!
//! 1. a **prepare** watcher queries the socket before the loop waits. If
//!    the socket is already ready it arms the **idle** watcher so the wait
//!    does not block, otherwise it arms the **io** watcher on the socket's
//!    descriptor so the loop may sleep until the descriptor signals.
//! 2. the loop waits (or not).
//! 3. a **check** watcher disarms idle and io, queries the socket again
//!    and invokes the callback if the readiness intersects the interest.
//!
//! The descriptor is only a hint; readiness is always confirmed against
//! the socket. The callback fires at most once per iteration, and never
//! while nothing is ready. At most one of idle and io is armed at a time.

use std::{
    cell::{Cell, RefCell},
    os::fd::RawFd,
    rc::{Rc, Weak},
};

use crate::{
    error::{Error, Result},
    event_loop::{EventLoop, Ready, WatcherId},
    readiness::{native_fd, readiness, MqSocket, QueryFailurePolicy},
};

/// Callback receiving the readiness that matched the interest.
pub type ZsockCallback = Box<dyn FnMut(&EventLoop, Ready)>;

#[derive(Clone, Copy)]
struct SubWatchers {
    prepare: WatcherId,
    check: WatcherId,
    idle: WatcherId,
    io: WatcherId,
}

impl SubWatchers {
    fn all(self) -> [WatcherId; 4] {
        [self.prepare, self.check, self.idle, self.io]
    }
}

struct Inner {
    socket: Rc<dyn MqSocket>,
    interest: Ready,
    fd: RawFd,
    policy: Cell<QueryFailurePolicy>,
    callback: RefCell<ZsockCallback>,
    watchers: Cell<Option<SubWatchers>>,
    event_loop: RefCell<Weak<EventLoop>>,
}

impl Inner {
    fn readiness(&self) -> Ready {
        readiness(self.socket.as_ref(), self.interest, self.policy.get())
    }

    fn on_prepare(&self, ev: &EventLoop) {
        let Some(watchers) = self.watchers.get() else {
            return;
        };
        let ready = self.readiness();
        let armed = if ready.is_empty() {
            // let the loop block on the descriptor
            ev.start(watchers.io)
        } else {
            // pending state: the loop must not sleep past it
            ev.start(watchers.idle)
        };
        if let Err(err) = armed {
            tracing::error!("ZsockWatcher: failed to arm wait watcher: {}", err);
        }
        tracing::trace!("ZsockWatcher fd {}: prepare {:?}", self.fd, ready);
    }

    fn on_check(&self, ev: &EventLoop) {
        let Some(watchers) = self.watchers.get() else {
            return;
        };
        ev.stop(watchers.idle);
        ev.stop(watchers.io);

        let ready = self.readiness();
        if ready.is_empty() {
            return;
        }
        tracing::trace!("ZsockWatcher fd {}: check {:?}", self.fd, ready);
        (self.callback.borrow_mut())(ev, ready);
    }

    fn bound_to(&self, ev: &EventLoop) -> bool {
        std::ptr::eq(self.event_loop.borrow().as_ptr(), ev)
    }
}

/// Watches one message-queue socket on an [`EventLoop`].
pub struct ZsockWatcher {
    inner: Rc<Inner>,
}

impl ZsockWatcher {
    /// Prepare a watcher for `socket`; nothing is registered with a loop
    /// until [`start`](Self::start).
    ///
    /// Fails with [`Error::EmptyInterest`] if `interest` is empty and with
    /// [`Error::Descriptor`] if the socket cannot report its descriptor.
    pub fn new<F>(socket: Rc<dyn MqSocket>, interest: Ready, callback: F) -> Result<Self>
    where
        F: FnMut(&EventLoop, Ready) + 'static,
    {
        if interest.is_empty() {
            return Err(Error::EmptyInterest);
        }
        let fd = native_fd(socket.as_ref())?;
        tracing::debug!("ZsockWatcher::new fd {} interest {:?}", fd, interest);
        Ok(ZsockWatcher {
            inner: Rc::new(Inner {
                socket,
                interest,
                fd,
                policy: Cell::new(QueryFailurePolicy::default()),
                callback: RefCell::new(Box::new(callback)),
                watchers: Cell::new(None),
                event_loop: RefCell::new(Weak::new()),
            }),
        })
    }

    /// Select how a failing readiness query is handled.
    pub fn with_policy(self, policy: QueryFailurePolicy) -> Self {
        self.inner.policy.set(policy);
        self
    }

    pub fn interest(&self) -> Ready {
        self.inner.interest
    }

    pub fn fd(&self) -> RawFd {
        self.inner.fd
    }

    pub fn socket(&self) -> &Rc<dyn MqSocket> {
        &self.inner.socket
    }

    /// Whether the prepare/check bracket is armed.
    pub fn is_active(&self) -> bool {
        let Some(watchers) = self.inner.watchers.get() else {
            return false;
        };
        self.inner
            .event_loop
            .borrow()
            .upgrade()
            .is_some_and(|ev| ev.is_active(watchers.prepare))
    }

    /// Register the sub-watchers with `ev` (first start only) and arm the
    /// prepare and check watchers. The idle and io watchers are armed
    /// lazily by the prepare phase.
    #[tracing::instrument(level = "trace", skip(self, ev), fields(fd = self.inner.fd))]
    pub fn start(&self, ev: &Rc<EventLoop>) -> Result<()> {
        let watchers = match self.inner.watchers.get() {
            Some(watchers) => {
                if !self.inner.bound_to(ev) {
                    return Err(Error::ForeignLoop);
                }
                watchers
            }
            None => {
                let watchers = self.register(ev);
                self.inner.watchers.set(Some(watchers));
                *self.inner.event_loop.borrow_mut() = Rc::downgrade(ev);
                watchers
            }
        };
        ev.start(watchers.prepare)?;
        ev.start(watchers.check)?;
        Ok(())
    }

    fn register(&self, ev: &EventLoop) -> SubWatchers {
        let weak = Rc::downgrade(&self.inner);
        let prepare = ev.prepare(move |ev, _| {
            if let Some(inner) = weak.upgrade() {
                inner.on_prepare(ev);
            }
        });
        let weak = Rc::downgrade(&self.inner);
        let check = ev.check(move |ev, _| {
            if let Some(inner) = weak.upgrade() {
                inner.on_check(ev);
            }
        });
        // both only hold the loop's attention; the check phase does the work
        let idle = ev.idle(|_, _| {});
        // the descriptor only signals "changed", so read interest is enough
        let io = ev.io(self.inner.fd, Ready::READABLE, |_, _| {});
        SubWatchers {
            prepare,
            check,
            idle,
            io,
        }
    }

    /// Disarm all four sub-watchers. No callback runs after this returns
    /// until the watcher is started again.
    pub fn stop(&self, ev: &EventLoop) -> Result<()> {
        let Some(watchers) = self.inner.watchers.get() else {
            return Ok(());
        };
        if !self.inner.bound_to(ev) {
            return Err(Error::ForeignLoop);
        }
        for id in watchers.all() {
            ev.stop(id);
        }
        tracing::trace!("ZsockWatcher fd {}: stopped", self.inner.fd);
        Ok(())
    }

    /// Stop the watcher and release its sub-watchers asynchronously.
    /// `on_closed` runs once the loop has delivered all four close
    /// notifications, in whatever order they arrive.
    pub fn close<F>(self, ev: &EventLoop, on_closed: F) -> Result<()>
    where
        F: FnOnce(&EventLoop) + 'static,
    {
        let Some(watchers) = self.inner.watchers.get() else {
            on_closed(ev);
            return Ok(());
        };
        if !self.inner.bound_to(ev) {
            return Err(Error::ForeignLoop);
        }
        self.inner.watchers.set(None);

        let fd = self.inner.fd;
        let join = Rc::new(CloseJoin {
            pending: Cell::new(watchers.all().len()),
            on_closed: RefCell::new(Some(Box::new(on_closed))),
            fd,
        });
        let mut first_err = None;
        for id in watchers.all() {
            let arrival = join.clone();
            if let Err(err) = ev.close(id, move |ev| arrival.arrive(ev)) {
                // release it now so the join still completes
                tracing::warn!("ZsockWatcher fd {}: closing {:?} failed: {}", fd, id, err);
                ev.remove(id);
                join.arrive(ev);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    fn sub_watchers(&self) -> Option<SubWatchers> {
        self.inner.watchers.get()
    }
}

/// Fires the close notification once every sub-watcher has been released.
struct CloseJoin {
    pending: Cell<usize>,
    on_closed: RefCell<Option<Box<dyn FnOnce(&EventLoop)>>>,
    fd: RawFd,
}

impl CloseJoin {
    fn arrive(&self, ev: &EventLoop) {
        self.pending.set(self.pending.get() - 1);
        if self.pending.get() > 0 {
            return;
        }
        tracing::trace!("ZsockWatcher fd {}: closed", self.fd);
        let callback = self.on_closed.borrow_mut().take();
        if let Some(callback) = callback {
            callback(ev);
        }
    }
}

impl Drop for ZsockWatcher {
    fn drop(&mut self) {
        let Some(watchers) = self.inner.watchers.take() else {
            return;
        };
        if let Some(ev) = self.inner.event_loop.borrow().upgrade() {
            for id in watchers.all() {
                ev.remove(id);
            }
        }
    }
}
