use std::cell::Cell;

/// Counters collected by an [`EventLoop`](crate::event_loop::EventLoop).
#[derive(Debug, Default)]
pub struct LoopStat {
    iterations: Cell<u64>,
    blocking_waits: Cell<u64>,
    nonblocking_waits: Cell<u64>,
    callbacks: Cell<u64>,
    timers_fired: Cell<u64>,
}

impl LoopStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.get()
    }

    /// Waits entered with a non-zero (or infinite) timeout.
    pub fn blocking_waits(&self) -> u64 {
        self.blocking_waits.get()
    }

    pub fn nonblocking_waits(&self) -> u64 {
        self.nonblocking_waits.get()
    }

    pub fn callbacks(&self) -> u64 {
        self.callbacks.get()
    }

    pub fn timers_fired(&self) -> u64 {
        self.timers_fired.get()
    }

    pub(crate) fn add_iteration(&self) {
        self.iterations.set(self.iterations.get() + 1);
    }

    pub(crate) fn add_blocking_wait(&self) {
        self.blocking_waits.set(self.blocking_waits.get() + 1);
    }

    pub(crate) fn add_nonblocking_wait(&self) {
        self.nonblocking_waits.set(self.nonblocking_waits.get() + 1);
    }

    pub(crate) fn add_callback(&self) {
        self.callbacks.set(self.callbacks.get() + 1);
    }

    pub(crate) fn add_timer_fired(&self) {
        self.timers_fired.set(self.timers_fired.get() + 1);
    }
}
