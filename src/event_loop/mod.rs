//! Single-threaded, callback driven host loop built on [`polling`].
//!
//! The loop offers the small set of watcher primitives the socket watcher
//! and the reactor are built on:
//!
//! - `prepare` watchers run at the top of every iteration, before the wait,
//! - `check` watchers run at the bottom of every iteration, after the wait,
//! - `idle` watchers run every iteration and force a zero wait timeout,
//! - `io` watchers report descriptor readiness (level-triggered),
//! - `timer` watchers fire after an initial delay and optionally repeat.
//!
//! Watchers are created inactive and addressed by a [`WatcherId`]. Every
//! phase snapshots the ids it is going to dispatch and re-validates each
//! id right before invoking it, so a callback may start, stop, remove or
//! close any watcher of the loop, including itself.
//!
//! Descriptors of active io watchers are registered with the poller in
//! level-triggered mode. Starting and stopping only marks the descriptor;
//! the registration is brought up to date right before the next wait.
//! Removing or closing an io watcher deregisters its descriptor at once,
//! so the descriptor may be closed as soon as that call returns.
//!
//! # Iteration order
//!
//! prepare → wait → expired timers (deadline order) → ready io → idle →
//! check → close notifications.

pub mod builder;
pub mod stat;

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashMap, VecDeque},
    fmt, io,
    num::NonZeroUsize,
    ops::{BitAnd, BitOr, BitOrAssign},
    os::fd::{BorrowedFd, RawFd},
    rc::Rc,
    time::{Duration, Instant},
};

use polling::{Event, Events, PollMode, Poller};
use slab::Slab;

use crate::{
    error::{Error, Result},
    event_loop::{builder::EventLoopBuilder, stat::LoopStat},
};

/// Longest single wait derived from a timer deadline.
const WAIT_CAP: Duration = Duration::from_millis(i32::MAX as u64);

/// Readiness flags in the event loop's vocabulary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ready(u8);

impl Ready {
    pub const EMPTY: Ready = Ready(0);
    pub const READABLE: Ready = Ready(0b01);
    pub const WRITABLE: Ready = Ready(0b10);
    pub const ALL: Ready = Ready(0b11);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub const fn contains(self, other: Ready) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersection(self, other: Ready) -> Ready {
        Ready(self.0 & other.0)
    }

    pub const fn union(self, other: Ready) -> Ready {
        Ready(self.0 | other.0)
    }
}

impl BitOr for Ready {
    type Output = Ready;

    fn bitor(self, rhs: Ready) -> Ready {
        self.union(rhs)
    }
}

impl BitOrAssign for Ready {
    fn bitor_assign(&mut self, rhs: Ready) {
        *self = self.union(rhs);
    }
}

impl BitAnd for Ready {
    type Output = Ready;

    fn bitand(self, rhs: Ready) -> Ready {
        self.intersection(rhs)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (false, false) => f.write_str("Ready(EMPTY)"),
            (true, false) => f.write_str("Ready(READABLE)"),
            (false, true) => f.write_str("Ready(WRITABLE)"),
            (true, true) => f.write_str("Ready(READABLE | WRITABLE)"),
        }
    }
}

/// Identifies a watcher registered with an [`EventLoop`].
///
/// The generation makes a stale id miss instead of aliasing a watcher
/// that was later created in the same slab slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId {
    key: usize,
    generation: u64,
}

impl WatcherId {
    // sorts after every real id sharing a deadline
    const MAX: WatcherId = WatcherId {
        key: usize::MAX,
        generation: u64::MAX,
    };
}

/// Callback invoked when a watcher fires. `io` watchers receive the
/// observed readiness, every other kind receives [`Ready::EMPTY`].
pub type Callback = Box<dyn FnMut(&EventLoop, Ready)>;

/// Notification delivered once a closed watcher has been released.
pub type CloseCallback = Box<dyn FnOnce(&EventLoop)>;

/// How far a call to [`EventLoop::run_mode`] drives the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Iterate until stopped or until nothing keeps the loop alive.
    Default,
    /// Run a single iteration, blocking if nothing is pending.
    Once,
    /// Run a single iteration without ever blocking.
    NoWait,
}

enum WatcherKind {
    Prepare,
    Check,
    Idle,
    Io {
        fd: RawFd,
        interest: Ready,
    },
    Timer {
        after: Duration,
        repeat: Option<Duration>,
        // None while inactive, or when the deadline is out of range
        deadline: Option<Instant>,
    },
}

impl WatcherKind {
    fn name(&self) -> &'static str {
        match self {
            WatcherKind::Prepare => "prepare",
            WatcherKind::Check => "check",
            WatcherKind::Idle => "idle",
            WatcherKind::Io { .. } => "io",
            WatcherKind::Timer { .. } => "timer",
        }
    }

    fn io_fd(&self) -> Option<RawFd> {
        match self {
            WatcherKind::Io { fd, .. } => Some(*fd),
            _ => None,
        }
    }
}

struct Watcher {
    generation: u64,
    kind: WatcherKind,
    active: bool,
    closing: bool,
    // None while the callback is executing
    callback: Option<Callback>,
}

/// Parameters controlling the wait primitive.
pub(crate) struct LoopParams {
    pub(crate) max_wait: Option<Duration>,
    pub(crate) poll_capacity: usize,
}

struct RunGuard<'a>(&'a Cell<bool>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Host event loop shared through `Rc` by everything registered on it.
pub struct EventLoop {
    watchers: RefCell<Slab<Watcher>>,
    next_generation: Cell<u64>,
    armed: Cell<usize>,
    armed_idles: Cell<usize>,
    deadlines: RefCell<BTreeSet<(Instant, WatcherId)>>,
    closing: RefCell<VecDeque<(WatcherId, CloseCallback)>>,
    poller: Poller,
    events: RefCell<Events>,
    // interest currently registered with the poller
    registered: RefCell<HashMap<RawFd, Ready>>,
    dirty_fds: RefCell<BTreeSet<RawFd>>,
    stop_requested: Cell<bool>,
    running: Cell<bool>,
    now: Cell<Instant>,
    params: LoopParams,
    stat: LoopStat,
}

impl EventLoop {
    /// Create a loop with default parameters.
    pub fn new() -> Result<Rc<Self>> {
        EventLoopBuilder::default().build()
    }

    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::new()
    }

    pub(crate) fn with_params(params: LoopParams) -> io::Result<Self> {
        let capacity = NonZeroUsize::new(params.poll_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(EventLoop {
            watchers: RefCell::new(Slab::new()),
            next_generation: Cell::new(0),
            armed: Cell::new(0),
            armed_idles: Cell::new(0),
            deadlines: RefCell::new(BTreeSet::new()),
            closing: RefCell::new(VecDeque::new()),
            poller: Poller::new()?,
            events: RefCell::new(Events::with_capacity(capacity)),
            registered: RefCell::new(HashMap::new()),
            dirty_fds: RefCell::new(BTreeSet::new()),
            stop_requested: Cell::new(false),
            running: Cell::new(false),
            now: Cell::new(Instant::now()),
            params,
            stat: LoopStat::new(),
        })
    }

    /// Create a watcher that runs before the loop waits.
    pub fn prepare<F>(&self, callback: F) -> WatcherId
    where
        F: FnMut(&EventLoop, Ready) + 'static,
    {
        self.insert(WatcherKind::Prepare, Box::new(callback))
    }

    /// Create a watcher that runs right after the loop waited.
    pub fn check<F>(&self, callback: F) -> WatcherId
    where
        F: FnMut(&EventLoop, Ready) + 'static,
    {
        self.insert(WatcherKind::Check, Box::new(callback))
    }

    /// Create a watcher that runs every iteration and keeps the loop
    /// from blocking while it is active.
    pub fn idle<F>(&self, callback: F) -> WatcherId
    where
        F: FnMut(&EventLoop, Ready) + 'static,
    {
        self.insert(WatcherKind::Idle, Box::new(callback))
    }

    /// Create a descriptor readiness watcher. The descriptor must stay
    /// open until the watcher is removed or closed.
    pub fn io<F>(&self, fd: RawFd, interest: Ready, callback: F) -> WatcherId
    where
        F: FnMut(&EventLoop, Ready) + 'static,
    {
        self.insert(WatcherKind::Io { fd, interest }, Box::new(callback))
    }

    /// Create a timer firing `after` the moment it is started, then every
    /// `repeat` if one is given. A one-shot timer becomes inactive once
    /// it fired. A deadline past the range of [`Instant`] never expires.
    pub fn timer<F>(&self, after: Duration, repeat: Option<Duration>, callback: F) -> WatcherId
    where
        F: FnMut(&EventLoop, Ready) + 'static,
    {
        self.insert(
            WatcherKind::Timer {
                after,
                repeat,
                deadline: None,
            },
            Box::new(callback),
        )
    }

    fn insert(&self, kind: WatcherKind, callback: Callback) -> WatcherId {
        let generation = self.next_generation.get();
        self.next_generation.set(generation + 1);
        let name = kind.name();
        let key = self.watchers.borrow_mut().insert(Watcher {
            generation,
            kind,
            active: false,
            closing: false,
            callback: Some(callback),
        });
        let id = WatcherId { key, generation };
        tracing::trace!("EventLoop: created {} watcher {:?}", name, id);
        id
    }

    fn lookup(watchers: &mut Slab<Watcher>, id: WatcherId) -> Option<&mut Watcher> {
        watchers
            .get_mut(id.key)
            .filter(|watcher| watcher.generation == id.generation)
    }

    /// Arm a watcher. Starting an active watcher is a no-op; starting an
    /// inactive timer arms it from its initial delay.
    pub fn start(&self, id: WatcherId) -> Result<()> {
        let now = if self.running.get() {
            self.now.get()
        } else {
            self.refresh_now()
        };
        let mut watchers = self.watchers.borrow_mut();
        let watcher = Self::lookup(&mut watchers, id).ok_or(Error::UnknownWatcher(id))?;
        if watcher.closing {
            return Err(Error::Closing(id));
        }
        if watcher.active {
            return Ok(());
        }
        match &mut watcher.kind {
            WatcherKind::Timer {
                after, deadline, ..
            } => {
                *deadline = now.checked_add(*after);
                match *deadline {
                    Some(due) => {
                        self.deadlines.borrow_mut().insert((due, id));
                    }
                    None => tracing::debug!("EventLoop: timer {:?} is never due", id),
                }
            }
            WatcherKind::Io { fd, .. } => {
                if *fd < 0 {
                    return Err(Error::InvalidDescriptor(*fd));
                }
                self.dirty_fds.borrow_mut().insert(*fd);
            }
            WatcherKind::Idle => self.armed_idles.set(self.armed_idles.get() + 1),
            WatcherKind::Prepare | WatcherKind::Check => {}
        }
        watcher.active = true;
        self.armed.set(self.armed.get() + 1);
        Ok(())
    }

    fn disarm(&self, watcher: &mut Watcher, id: WatcherId) {
        if !watcher.active {
            return;
        }
        watcher.active = false;
        self.armed.set(self.armed.get() - 1);
        match &mut watcher.kind {
            WatcherKind::Timer { deadline, .. } => {
                if let Some(due) = deadline.take() {
                    self.deadlines.borrow_mut().remove(&(due, id));
                }
            }
            WatcherKind::Io { fd, .. } => {
                self.dirty_fds.borrow_mut().insert(*fd);
            }
            WatcherKind::Idle => self.armed_idles.set(self.armed_idles.get() - 1),
            WatcherKind::Prepare | WatcherKind::Check => {}
        }
    }

    /// Disarm a watcher. Unknown ids and inactive watchers are ignored.
    pub fn stop(&self, id: WatcherId) {
        let mut watchers = self.watchers.borrow_mut();
        if let Some(watcher) = Self::lookup(&mut watchers, id) {
            self.disarm(watcher, id);
        }
    }

    pub fn is_active(&self, id: WatcherId) -> bool {
        let mut watchers = self.watchers.borrow_mut();
        Self::lookup(&mut watchers, id).is_some_and(|watcher| watcher.active)
    }

    /// Whether `id` still names a watcher of this loop (closing ones included).
    pub fn contains(&self, id: WatcherId) -> bool {
        let mut watchers = self.watchers.borrow_mut();
        Self::lookup(&mut watchers, id).is_some()
    }

    /// Disarm and release a watcher immediately.
    ///
    /// Returns `false` if the id is unknown.
    pub fn remove(&self, id: WatcherId) -> bool {
        let removed = {
            let mut watchers = self.watchers.borrow_mut();
            let Some(watcher) = Self::lookup(&mut watchers, id) else {
                return false;
            };
            self.disarm(watcher, id);
            watchers.remove(id.key)
        };
        tracing::trace!("EventLoop: removed {} watcher {:?}", removed.kind.name(), id);
        if let Some(fd) = removed.kind.io_fd() {
            self.release_fd(fd);
        }
        // the callback may own values whose drop re-enters the loop
        drop(removed);
        true
    }

    /// Disarm a watcher now and release it asynchronously: `on_close` runs
    /// at the end of the current iteration, or of the next one if the
    /// loop is not running.
    pub fn close<F>(&self, id: WatcherId, on_close: F) -> Result<()>
    where
        F: FnOnce(&EventLoop) + 'static,
    {
        let fd = {
            let mut watchers = self.watchers.borrow_mut();
            let watcher = Self::lookup(&mut watchers, id).ok_or(Error::UnknownWatcher(id))?;
            if watcher.closing {
                return Err(Error::Closing(id));
            }
            watcher.closing = true;
            self.disarm(watcher, id);
            watcher.kind.io_fd()
        };
        if let Some(fd) = fd {
            self.release_fd(fd);
        }
        self.closing
            .borrow_mut()
            .push_back((id, Box::new(on_close)));
        Ok(())
    }

    fn release_fd(&self, fd: RawFd) {
        self.dirty_fds.borrow_mut().remove(&fd);
        if let Err(err) = self.sync_fd(fd) {
            tracing::warn!("EventLoop: failed to update fd {}: {}", fd, err);
        }
    }

    /// Ask the running loop to return after the current iteration.
    pub fn request_stop(&self) {
        tracing::trace!("EventLoop: stop requested");
        self.stop_requested.set(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Time cached at the start of the current iteration.
    pub fn now(&self) -> Instant {
        self.now.get()
    }

    pub fn stat(&self) -> &LoopStat {
        &self.stat
    }

    pub fn active_count(&self) -> usize {
        self.armed.get()
    }

    /// Whether anything keeps the loop running: an armed watcher or a
    /// pending close notification.
    pub fn alive(&self) -> bool {
        self.armed.get() > 0 || !self.closing.borrow().is_empty()
    }

    /// Run until [`request_stop`](Self::request_stop) or until the loop is
    /// no longer alive.
    pub fn run(&self) -> Result<()> {
        self.run_mode(RunMode::Default)
    }

    pub fn run_once(&self) -> Result<()> {
        self.run_mode(RunMode::Once)
    }

    pub fn run_nowait(&self) -> Result<()> {
        self.run_mode(RunMode::NoWait)
    }

    pub fn run_mode(&self, mode: RunMode) -> Result<()> {
        if self.running.replace(true) {
            return Err(Error::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);
        self.stop_requested.set(false);
        tracing::trace!("EventLoop::run_mode {:?}", mode);

        loop {
            if !self.alive() {
                tracing::trace!("EventLoop: no active watchers left");
                return Ok(());
            }
            self.iterate(mode != RunMode::NoWait)?;
            if mode != RunMode::Default || self.stop_requested.get() {
                return Ok(());
            }
        }
    }

    fn refresh_now(&self) -> Instant {
        let now = Instant::now();
        self.now.set(now);
        now
    }

    fn iterate(&self, may_block: bool) -> Result<()> {
        self.refresh_now();
        self.stat.add_iteration();

        self.dispatch(|kind| matches!(kind, WatcherKind::Prepare));

        let timeout = self.wait_timeout(may_block);
        let ready_io = self.wait(timeout)?;
        self.refresh_now();

        self.dispatch_timers();
        for (id, ready) in ready_io {
            self.invoke_if_active(id, ready);
        }
        self.dispatch(|kind| matches!(kind, WatcherKind::Idle));
        self.dispatch(|kind| matches!(kind, WatcherKind::Check));

        self.process_closing();
        Ok(())
    }

    /// `None` means wait without a timeout.
    fn wait_timeout(&self, may_block: bool) -> Option<Duration> {
        if !may_block
            || self.stop_requested.get()
            || self.armed_idles.get() > 0
            || !self.closing.borrow().is_empty()
        {
            return Some(Duration::ZERO);
        }

        let timer = self
            .deadlines
            .borrow()
            .first()
            .map(|(due, _)| due.saturating_duration_since(self.now.get()).min(WAIT_CAP));
        match (timer, self.params.max_wait) {
            (Some(t), Some(max)) => Some(t.min(max)),
            (None, max) => max,
            (t, None) => t,
        }
    }

    /// Bring the poller registration of `fd` in line with the active io
    /// watchers on it.
    fn sync_fd(&self, fd: RawFd) -> io::Result<()> {
        let wanted = self
            .watchers
            .borrow()
            .iter()
            .filter_map(|(_, watcher)| match watcher.kind {
                WatcherKind::Io { fd: io_fd, interest } if watcher.active && io_fd == fd => {
                    Some(interest)
                }
                _ => None,
            })
            .fold(Ready::EMPTY, Ready::union);
        let current = self.registered.borrow().get(&fd).copied();
        let key = fd as usize;

        match current {
            None if wanted.is_empty() => {}
            None => {
                // SAFETY: io watchers require their descriptor to stay open
                // until they are removed, which deregisters it first.
                unsafe {
                    self.poller
                        .add_with_mode(fd, interest_event(key, wanted), PollMode::Level)?
                };
                self.registered.borrow_mut().insert(fd, wanted);
                tracing::trace!("EventLoop: registered fd {} for {:?}", fd, wanted);
            }
            Some(_) if wanted.is_empty() => {
                self.registered.borrow_mut().remove(&fd);
                // SAFETY: only borrowed for the duration of the call
                let source = unsafe { BorrowedFd::borrow_raw(fd) };
                if let Err(err) = self.poller.delete(source) {
                    // a closed descriptor already left the poller
                    tracing::trace!("EventLoop: deregistering fd {}: {}", fd, err);
                }
            }
            Some(registered) if registered != wanted => {
                // SAFETY: only borrowed for the duration of the call
                let source = unsafe { BorrowedFd::borrow_raw(fd) };
                self.poller
                    .modify_with_mode(source, interest_event(key, wanted), PollMode::Level)?;
                self.registered.borrow_mut().insert(fd, wanted);
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn sync_registrations(&self) -> Result<()> {
        let dirty = std::mem::take(&mut *self.dirty_fds.borrow_mut());
        for fd in dirty {
            if let Err(err) = self.sync_fd(fd) {
                tracing::error!("EventLoop: failed to register fd {}: {}", fd, err);
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<Vec<(WatcherId, Ready)>> {
        self.sync_registrations()?;

        if timeout == Some(Duration::ZERO) {
            self.stat.add_nonblocking_wait();
        } else {
            self.stat.add_blocking_wait();
        }
        tracing::trace!(
            "EventLoop: waiting on {} descriptors, timeout {:?}",
            self.registered.borrow().len(),
            timeout
        );

        let fired: Vec<(RawFd, Ready)> = {
            let mut events = self.events.borrow_mut();
            events.clear();
            match self.poller.wait(&mut events, timeout) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
                Err(err) => {
                    tracing::error!("EventLoop: wait failed: {}", err);
                    return Err(err.into());
                }
            }
            events
                .iter()
                .map(|event| (event.key as RawFd, ready_from_event(&event)))
                .collect()
        };

        let watchers = self.watchers.borrow();
        let mut ready_io = Vec::new();
        for (fd, ready) in fired {
            for (key, watcher) in watchers.iter() {
                let WatcherKind::Io {
                    fd: io_fd,
                    interest,
                } = watcher.kind
                else {
                    continue;
                };
                let ready = ready & interest;
                if watcher.active && io_fd == fd && !ready.is_empty() {
                    ready_io.push((
                        WatcherId {
                            key,
                            generation: watcher.generation,
                        },
                        ready,
                    ));
                }
            }
        }
        Ok(ready_io)
    }

    fn dispatch(&self, select: impl Fn(&WatcherKind) -> bool) {
        let ids: Vec<WatcherId> = self
            .watchers
            .borrow()
            .iter()
            .filter(|(_, watcher)| watcher.active && select(&watcher.kind))
            .map(|(key, watcher)| WatcherId {
                key,
                generation: watcher.generation,
            })
            .collect();
        for id in ids {
            self.invoke_if_active(id, Ready::EMPTY);
        }
    }

    fn dispatch_timers(&self) {
        let now = self.now.get();
        let expired = {
            let mut deadlines = self.deadlines.borrow_mut();
            let later = deadlines.split_off(&(now, WatcherId::MAX));
            std::mem::replace(&mut *deadlines, later)
        };

        for (_, id) in expired {
            if self.rearm_expired(id, now) {
                self.stat.add_timer_fired();
                self.invoke(id, Ready::EMPTY);
            }
        }
    }

    /// Reschedule (repeating) or disarm (one-shot) a timer that is due.
    /// Returns `false` if an earlier callback stopped or re-armed it.
    fn rearm_expired(&self, id: WatcherId, now: Instant) -> bool {
        let mut watchers = self.watchers.borrow_mut();
        let Some(watcher) = Self::lookup(&mut watchers, id) else {
            return false;
        };
        if !watcher.active {
            return false;
        }
        let WatcherKind::Timer {
            repeat, deadline, ..
        } = &mut watcher.kind
        else {
            return false;
        };
        let Some(due) = *deadline else {
            return false;
        };
        if due > now {
            return false;
        }

        let mut deadlines = self.deadlines.borrow_mut();
        deadlines.remove(&(due, id));
        match *repeat {
            Some(repeat) => {
                *deadline = due.checked_add(repeat).map(|next| next.max(now));
                match *deadline {
                    Some(next) => {
                        deadlines.insert((next, id));
                    }
                    None => tracing::debug!("EventLoop: timer {:?} is never due again", id),
                }
            }
            None => {
                *deadline = None;
                watcher.active = false;
                self.armed.set(self.armed.get() - 1);
            }
        }
        true
    }

    fn invoke_if_active(&self, id: WatcherId, ready: Ready) {
        if self.is_active(id) {
            self.invoke(id, ready);
        }
    }

    /// Take the callback out of its slot, run it, and put it back if the
    /// watcher survived its own callback.
    fn invoke(&self, id: WatcherId, ready: Ready) {
        let callback = {
            let mut watchers = self.watchers.borrow_mut();
            Self::lookup(&mut watchers, id).and_then(|watcher| watcher.callback.take())
        };
        let Some(mut callback) = callback else {
            return;
        };

        self.stat.add_callback();
        callback(self, ready);

        let orphan = {
            let mut watchers = self.watchers.borrow_mut();
            match Self::lookup(&mut watchers, id) {
                Some(watcher) => {
                    watcher.callback = Some(callback);
                    None
                }
                None => Some(callback),
            }
        };
        drop(orphan);
    }

    fn process_closing(&self) {
        loop {
            let next = self.closing.borrow_mut().pop_front();
            let Some((id, on_close)) = next else {
                break;
            };
            let released = {
                let mut watchers = self.watchers.borrow_mut();
                if Self::lookup(&mut watchers, id).is_some() {
                    Some(watchers.remove(id.key))
                } else {
                    None
                }
            };
            drop(released);
            tracing::trace!("EventLoop: closed watcher {:?}", id);
            on_close(self);
        }
    }
}

fn interest_event(key: usize, interest: Ready) -> Event {
    match (interest.is_readable(), interest.is_writable()) {
        (true, true) => Event::all(key),
        (true, false) => Event::readable(key),
        (false, true) => Event::writable(key),
        (false, false) => Event::none(key),
    }
}

fn ready_from_event(event: &Event) -> Ready {
    let mut ready = Ready::EMPTY;
    if event.readable {
        ready |= Ready::READABLE;
    }
    if event.writable {
        ready |= Ready::WRITABLE;
    }
    ready
}
