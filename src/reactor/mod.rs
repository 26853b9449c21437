//! Registry of pollers and timers dispatched from an [`EventLoop`].
//!
//! Socket pollers are backed by a [`ZsockWatcher`], raw descriptor
//! pollers by the loop's own io watcher. Timers are loop timers keyed by a
//! [`TimerId`]. Handlers return [`ControlFlow::Break`] to cancel the whole
//! run; [`Reactor::run`] then reports [`Error::Canceled`].
//!
//! Handlers may register and unregister pollers and timers freely,
//! including the one currently running. Entries are looked up by key at
//! dispatch time and every handler is held through its own `Rc`, so
//! removing an entry never frees the closure on the call stack.

pub mod builder;

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    fmt,
    ops::ControlFlow,
    os::fd::RawFd,
    rc::{Rc, Weak},
    time::Duration,
};

use crate::{
    error::{Error, Result},
    event_loop::{EventLoop, Ready, WatcherId},
    readiness::{MqSocket, PollEvents, QueryFailurePolicy},
    reactor::builder::ReactorBuilder,
    zsock::ZsockWatcher,
};

/// Handler invoked with the poll item whose `revents` holds the readiness.
pub type PollerHandler = Box<dyn FnMut(&Reactor, &PollItem) -> ControlFlow<()>>;

/// Handler invoked each time a timer fires.
pub type TimerHandler = Box<dyn FnMut(&Reactor, TimerId) -> ControlFlow<()>>;

/// Identifier returned by [`Reactor::register_timer`]. Ids start at 1 and
/// increase monotonically per reactor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// What a poller watches.
#[derive(Clone)]
pub enum PollTarget {
    /// A message-queue socket, matched by identity.
    Socket(Rc<dyn MqSocket>),
    /// A plain descriptor, matched by value.
    Fd(RawFd),
}

impl PollTarget {
    fn matches(&self, other: &PollTarget) -> bool {
        match (self, other) {
            (PollTarget::Socket(a), PollTarget::Socket(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            (PollTarget::Fd(a), PollTarget::Fd(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for PollTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollTarget::Socket(socket) => f
                .debug_tuple("Socket")
                .field(&Rc::as_ptr(socket).cast::<()>())
                .finish(),
            PollTarget::Fd(fd) => f.debug_tuple("Fd").field(fd).finish(),
        }
    }
}

/// A poll item: the target, the requested events, and the events seen
/// by the last dispatch.
#[derive(Clone, Debug)]
pub struct PollItem {
    target: PollTarget,
    events: PollEvents,
    revents: PollEvents,
}

impl PollItem {
    pub fn socket(socket: Rc<dyn MqSocket>, events: PollEvents) -> Self {
        PollItem {
            target: PollTarget::Socket(socket),
            events,
            revents: PollEvents::EMPTY,
        }
    }

    pub fn fd(fd: RawFd, events: PollEvents) -> Self {
        PollItem {
            target: PollTarget::Fd(fd),
            events,
            revents: PollEvents::EMPTY,
        }
    }

    pub fn target(&self) -> &PollTarget {
        &self.target
    }

    pub fn events(&self) -> PollEvents {
        self.events
    }

    pub fn revents(&self) -> PollEvents {
        self.revents
    }

    pub fn socket_ref(&self) -> Option<&Rc<dyn MqSocket>> {
        match &self.target {
            PollTarget::Socket(socket) => Some(socket),
            PollTarget::Fd(_) => None,
        }
    }
}

enum Watch {
    Zsock(ZsockWatcher),
    Fd(WatcherId),
}

impl Watch {
    fn release(self, ev: &EventLoop) {
        match self {
            // the watcher removes its sub-watchers on drop
            Watch::Zsock(watcher) => drop(watcher),
            Watch::Fd(id) => {
                ev.remove(id);
            }
        }
    }
}

struct PollerEntry {
    item: PollItem,
    handler: Rc<RefCell<PollerHandler>>,
    watch: Watch,
}

struct TimerEntry {
    handler: Rc<RefCell<TimerHandler>>,
    watcher: WatcherId,
    // None repeats forever
    remaining: Option<usize>,
}

pub struct Reactor {
    this: Weak<Reactor>,
    event_loop: Rc<EventLoop>,
    pollers: RefCell<BTreeMap<u64, PollerEntry>>,
    next_poller_key: Cell<u64>,
    timers: RefCell<BTreeMap<TimerId, TimerEntry>>,
    next_timer_id: Cell<u64>,
    canceled: Cell<bool>,
    // timer whose handler is on the stack, and whether it cancelled itself
    executing: Cell<Option<TimerId>>,
    deferred_delete: Cell<bool>,
    policy: QueryFailurePolicy,
}

impl Reactor {
    /// Create a reactor driving a fresh [`EventLoop`].
    pub fn new() -> Result<Rc<Self>> {
        ReactorBuilder::default().build()
    }

    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    pub(crate) fn with_loop(event_loop: Rc<EventLoop>, policy: QueryFailurePolicy) -> Rc<Self> {
        Rc::new_cyclic(|this| Reactor {
            this: this.clone(),
            event_loop,
            pollers: RefCell::new(BTreeMap::new()),
            next_poller_key: Cell::new(0),
            timers: RefCell::new(BTreeMap::new()),
            next_timer_id: Cell::new(1),
            canceled: Cell::new(false),
            executing: Cell::new(None),
            deferred_delete: Cell::new(false),
            policy,
        })
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.event_loop
    }

    pub fn poller_count(&self) -> usize {
        self.pollers.borrow().len()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// The stored item of the first poller watching `target`, with the
    /// `revents` of its latest dispatch.
    pub fn poll_item(&self, target: &PollTarget) -> Option<PollItem> {
        self.pollers
            .borrow()
            .values()
            .find(|entry| entry.item.target.matches(target))
            .map(|entry| entry.item.clone())
    }

    /// Start watching `item` and call `handler` whenever it is ready.
    ///
    /// Socket items go through a [`ZsockWatcher`]; descriptor items use a
    /// plain io watcher on the loop.
    #[tracing::instrument(level = "trace", skip(self, handler))]
    pub fn register_poller<F>(&self, item: PollItem, handler: F) -> Result<()>
    where
        F: FnMut(&Reactor, &PollItem) -> ControlFlow<()> + 'static,
    {
        let interest = Ready::from(item.events);
        if interest.is_empty() {
            return Err(Error::EmptyInterest);
        }

        let key = self.next_poller_key.get();
        self.next_poller_key.set(key + 1);
        let this = self.this.clone();
        let on_ready = move |_: &EventLoop, ready: Ready| {
            if let Some(reactor) = this.upgrade() {
                reactor.dispatch_poller(key, ready);
            }
        };

        let watch = match &item.target {
            PollTarget::Socket(socket) => {
                let watcher = ZsockWatcher::new(socket.clone(), interest, on_ready)?
                    .with_policy(self.policy);
                watcher.start(&self.event_loop)?;
                Watch::Zsock(watcher)
            }
            PollTarget::Fd(fd) => {
                if *fd < 0 {
                    return Err(Error::InvalidDescriptor(*fd));
                }
                let id = self.event_loop.io(*fd, interest, on_ready);
                if let Err(err) = self.event_loop.start(id) {
                    self.event_loop.remove(id);
                    return Err(err);
                }
                Watch::Fd(id)
            }
        };

        tracing::debug!("Reactor: registered poller {} on {:?}", key, item.target);
        self.pollers.borrow_mut().insert(
            key,
            PollerEntry {
                item,
                handler: Rc::new(RefCell::new(Box::new(handler))),
                watch,
            },
        );
        Ok(())
    }

    /// Stop and drop every poller watching `target`. Unknown targets are
    /// ignored.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn unregister_poller(&self, target: &PollTarget) {
        let removed: Vec<PollerEntry> = {
            let mut pollers = self.pollers.borrow_mut();
            let keys: Vec<u64> = pollers
                .iter()
                .filter(|(_, entry)| entry.item.target.matches(target))
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| pollers.remove(&key))
                .collect()
        };
        if !removed.is_empty() {
            tracing::debug!("Reactor: unregistered {} poller(s) on {:?}", removed.len(), target);
        }
        // handlers and watchers may re-enter the reactor when dropped
        for entry in removed {
            entry.watch.release(&self.event_loop);
        }
    }

    /// Register `handler` for readable events on `socket`.
    pub fn register_reader<F>(&self, socket: Rc<dyn MqSocket>, handler: F) -> Result<()>
    where
        F: FnMut(&Reactor, &PollItem) -> ControlFlow<()> + 'static,
    {
        self.register_poller(PollItem::socket(socket, PollEvents::POLLIN), handler)
    }

    pub fn unregister_reader(&self, socket: &Rc<dyn MqSocket>) {
        self.unregister_poller(&PollTarget::Socket(socket.clone()))
    }

    fn dispatch_poller(&self, key: u64, ready: Ready) {
        let found = self.pollers.borrow_mut().get_mut(&key).map(|entry| {
            entry.item.revents = PollEvents::from(ready);
            (entry.item.clone(), entry.handler.clone())
        });
        let Some((item, handler)) = found else {
            return;
        };
        tracing::trace!("Reactor: poller {} ready {:?}", key, item.revents);

        let flow = (handler.borrow_mut())(self, &item);
        if flow.is_break() {
            self.cancel();
        }
    }

    /// Call `handler` after `delay`, `times` times in total, every `delay`.
    /// `times == 0` repeats until cancelled. A zero `delay` on a repeating
    /// timer fires once per loop iteration.
    #[tracing::instrument(level = "trace", skip(self, handler))]
    pub fn register_timer<F>(&self, delay: Duration, times: usize, handler: F) -> Result<TimerId>
    where
        F: FnMut(&Reactor, TimerId) -> ControlFlow<()> + 'static,
    {
        let id = TimerId(self.next_timer_id.get());
        self.next_timer_id.set(id.0 + 1);

        let repeat = if times == 1 { None } else { Some(delay) };
        let this = self.this.clone();
        let watcher = self.event_loop.timer(delay, repeat, move |_, _| {
            if let Some(reactor) = this.upgrade() {
                reactor.dispatch_timer(id);
            }
        });
        if let Err(err) = self.event_loop.start(watcher) {
            self.event_loop.remove(watcher);
            return Err(err);
        }

        self.timers.borrow_mut().insert(
            id,
            TimerEntry {
                handler: Rc::new(RefCell::new(Box::new(handler))),
                watcher,
                remaining: (times != 0).then_some(times),
            },
        );
        tracing::debug!("Reactor: registered timer {:?} delay {:?} times {}", id, delay, times);
        Ok(id)
    }

    /// Cancel a timer. Returns `false` if no such timer is registered.
    ///
    /// A timer cancelling itself from its own handler is released right
    /// after the handler returns.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        if self.executing.get() == Some(id) {
            tracing::trace!("Reactor: timer {:?} cancelled from its handler", id);
            self.deferred_delete.set(true);
            return true;
        }
        let removed = self.timers.borrow_mut().remove(&id);
        match removed {
            Some(entry) => {
                tracing::debug!("Reactor: cancelled timer {:?}", id);
                self.event_loop.remove(entry.watcher);
                true
            }
            None => false,
        }
    }

    fn dispatch_timer(&self, id: TimerId) {
        let handler = match self.timers.borrow().get(&id) {
            Some(entry) => entry.handler.clone(),
            None => return,
        };

        self.executing.set(Some(id));
        let flow = (handler.borrow_mut())(self, id);
        self.executing.set(None);
        let deferred = self.deferred_delete.replace(false);

        let finished = {
            let mut timers = self.timers.borrow_mut();
            let exhausted = match timers.get_mut(&id) {
                Some(entry) => match &mut entry.remaining {
                    Some(remaining) => {
                        *remaining = remaining.saturating_sub(1);
                        *remaining == 0
                    }
                    None => false,
                },
                None => false,
            };
            if deferred || exhausted {
                timers.remove(&id)
            } else {
                None
            }
        };
        if let Some(entry) = finished {
            tracing::trace!("Reactor: timer {:?} finished", id);
            self.event_loop.remove(entry.watcher);
        }

        if flow.is_break() {
            self.cancel();
        }
    }

    fn cancel(&self) {
        tracing::debug!("Reactor: run canceled by handler");
        self.canceled.set(true);
        self.event_loop.request_stop();
    }

    /// Drive the loop until it stops. Returns [`Error::Canceled`] if a
    /// handler broke the run.
    pub fn run(&self) -> Result<()> {
        self.canceled.set(false);
        self.event_loop.run()?;
        if self.canceled.get() {
            return Err(Error::Canceled);
        }
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let pollers = std::mem::take(self.pollers.get_mut());
        for (_, entry) in pollers {
            entry.watch.release(&self.event_loop);
        }
        let timers = std::mem::take(self.timers.get_mut());
        for (_, entry) in timers {
            self.event_loop.remove(entry.watcher);
        }
        tracing::trace!("Reactor dropped");
    }
}
