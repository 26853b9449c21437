use std::{rc::Rc, time::Duration};

use crate::{
    error::Result,
    event_loop::{EventLoop, LoopParams},
};

/// Configuration for an [`EventLoop`].
pub struct EventLoopBuilder {
    max_wait: Option<Duration>,
    poll_capacity: usize,
}

impl Default for EventLoopBuilder {
    fn default() -> Self {
        EventLoopBuilder {
            max_wait: None,
            poll_capacity: 64,
        }
    }
}

impl EventLoopBuilder {
    pub fn new() -> Self {
        EventLoopBuilder::default()
    }

    pub fn max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn poll_capacity(mut self, capacity: usize) -> Self {
        self.poll_capacity = capacity;
        self
    }

    /// Create the loop and its poller. `max_wait` bounds every blocking
    /// wait; `poll_capacity` is the number of events taken per wait.
    pub fn build(self) -> Result<Rc<EventLoop>> {
        tracing::trace!(
            "EventLoopBuilder::build max_wait: {:?}, poll_capacity: {}",
            self.max_wait,
            self.poll_capacity
        );
        let event_loop = EventLoop::with_params(LoopParams {
            max_wait: self.max_wait,
            poll_capacity: self.poll_capacity,
        })?;
        Ok(Rc::new(event_loop))
    }
}
