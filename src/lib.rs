//! Event loop integration for level-triggered message-queue sockets.
//!
//! ZeroMQ-style sockets expose their readiness as a level (`ZMQ_EVENTS`)
//! and only hand out an edge-triggered descriptor (`ZMQ_FD`) to wait on.
//! [`ZsockWatcher`] reconciles the two on a callback driven [`EventLoop`],
//! and [`Reactor`] builds a poller/timer registry on top of it.
//!
//! ```no_run
//! use std::{ops::ControlFlow, rc::Rc, time::Duration};
//! use pluvio_zsock::{inproc, Reactor};
//!
//! let (tx, rx) = inproc::pair()?;
//! let rx = Rc::new(rx);
//! let reactor = Reactor::new()?;
//!
//! let reader = rx.clone();
//! reactor.register_reader(rx.clone(), move |_, _| {
//!     let msg = reader.recv().unwrap();
//!     println!("got {:?}", msg);
//!     ControlFlow::Break(())
//! })?;
//! reactor.register_timer(Duration::from_millis(10), 1, move |_, _| {
//!     tx.send("hello").unwrap();
//!     ControlFlow::Continue(())
//! })?;
//!
//! assert!(reactor.run().unwrap_err().is_canceled());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Development helper for enabling `tracing` output.
pub mod dev_tracing;
/// Error type shared by all modules.
pub mod error;
/// Callback driven host loop built on `polling`.
pub mod event_loop;
/// In-process socket pair with `ZMQ_FD`-like signalling.
pub mod inproc;
/// Poller and timer registry.
pub mod reactor;
/// Readiness queries and the socket abstraction.
pub mod readiness;
/// Socket watcher bridging level and edge readiness.
pub mod zsock;

pub use error::{Error, Result};
pub use event_loop::{EventLoop, Ready, RunMode, WatcherId};
pub use reactor::{PollItem, PollTarget, Reactor, TimerId};
pub use readiness::{MqSocket, PollEvents, QueryFailurePolicy};
pub use zsock::ZsockWatcher;
