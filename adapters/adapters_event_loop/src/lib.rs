//! Adapters Layer: Event Loop
//!
//! Readiness multiplexing for socket descriptors. One interface, three
//! backends selected when the crate is built:
//! - **epoll** on Linux and Android
//! - **kqueue** on macOS, iOS and the BSDs
//! - **select** on every other unix target
//!
//! ## Overview
//!
//! - [`EventLoop`]: single-owner read/write interest sets with a `run` call
//! - [`SharedEventLoop`]: cloneable, lock-guarded variant for registering
//!   descriptors from several threads
//! - [`poll_descriptors`]: one-shot readiness check over explicit lists
//! - [`wait_read`] / [`wait_write`]: register one endpoint, wait, unregister
//!
//! `run` returns a typed [`Readiness`] listing the descriptors that became ready,
//! in interest-set order.
//!
//! ## See Also
//!
//! - [`adapters_socket`](../adapters_socket/index.html): uses the one-shot poll
//!   for peer liveness checks

#[cfg(not(unix))]
compile_error!("adapters_event_loop supports unix targets only");

pub mod backend;
pub mod error;
pub mod event_loop;

pub use backend::{Readiness, BACKEND_NAME};
pub use error::EventLoopError;
pub use event_loop::{
    poll_descriptors, wait_read, wait_write, EventLoop, Interest, Multiplexer, SharedEventLoop,
    WaitStatus,
};
