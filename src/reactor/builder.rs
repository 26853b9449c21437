use std::{rc::Rc, time::Duration};

use crate::{
    error::Result,
    event_loop::EventLoop,
    readiness::QueryFailurePolicy,
    reactor::Reactor,
};

/// Configuration for a [`Reactor`].
pub struct ReactorBuilder {
    event_loop: Option<Rc<EventLoop>>,
    query_failure_policy: QueryFailurePolicy,
    max_wait: Option<Duration>,
    poll_capacity: usize,
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        ReactorBuilder {
            event_loop: None,
            query_failure_policy: QueryFailurePolicy::Abort,
            max_wait: None,
            poll_capacity: 64,
        }
    }
}

impl ReactorBuilder {
    pub fn new() -> Self {
        ReactorBuilder::default()
    }

    /// Drive an existing loop instead of creating one. `max_wait` and
    /// `poll_capacity` are ignored in that case.
    pub fn event_loop(mut self, event_loop: Rc<EventLoop>) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    pub fn query_failure_policy(mut self, policy: QueryFailurePolicy) -> Self {
        self.query_failure_policy = policy;
        self
    }

    pub fn max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn poll_capacity(mut self, capacity: usize) -> Self {
        self.poll_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Rc<Reactor>> {
        tracing::trace!(
            "ReactorBuilder::build shared loop: {}, policy: {:?}",
            self.event_loop.is_some(),
            self.query_failure_policy
        );
        let event_loop = match self.event_loop {
            Some(event_loop) => event_loop,
            None => EventLoop::builder()
                .max_wait(self.max_wait)
                .poll_capacity(self.poll_capacity)
                .build()?,
        };
        Ok(Reactor::with_loop(event_loop, self.query_failure_policy))
    }
}
