//! Adapters Layer: I/O Multiplexing
//!
//! Readiness-based event multiplexing for socket descriptors: register
//! descriptors of interest, bind labeled callbacks to them, and block until
//! one or more become readable.
//!
//! ## Overview
//!
//! The `adapters_io_mux` crate provides:
//! - **Dispatch core**: [`IoMultiplexer`] with `add`, `bind_event` and
//!   `listen`, plus removal, timeouts, statistics and explicit close
//! - **Backends**: the [`MuxBackend`] trait with an `epoll(7)` implementation
//!   on Linux and a `poll(2)` implementation on every Unix
//! - **Wakeups**: a [`Waker`] handle that interrupts a blocked `listen()`
//!   from another thread and can stop [`IoMultiplexer::run`]
//!
//! ## Modules
//!
//! - **[`backend`](backend/index.html)**: Polling strategy trait and wait outcome
//! - **[`epoll`](epoll/index.html)**: Linux epoll backend
//! - **[`poll`](poll/index.html)**: Portable poll backend
//! - **[`waker`](waker/index.html)**: Cross-thread wakeup
//! - **[`mux`](mux/index.html)**: Dispatch core, configuration, errors and statistics
//!
//! ## Architecture
//!
//! This crate is part of the adapters layer. It depends on:
//! - `entities_io_operations`: For descriptors
//!
//! The multiplexer never performs I/O on user descriptors; handlers typically
//! wrap the descriptor they receive in a socket stream.
//!
//! ## See Also
//!
//! - [`adapters_socket`](../adapters_socket/index.html): Sockets and socket streams

#[cfg(unix)]
pub mod backend;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod epoll;
#[cfg(unix)]
pub mod mux;
#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod waker;

#[cfg(unix)]
pub use backend::{MuxBackend, WaitOutcome};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::EpollBackend;
#[cfg(unix)]
pub use mux::{
    DefaultBackend, IoMultiplexer, LabeledHandler, MuxConfig, MuxError, MuxStats,
    DEFAULT_MAX_EVENTS, EVENT_MESSAGE_PREFIX,
};
#[cfg(unix)]
pub use poll::PollBackend;
#[cfg(unix)]
pub use waker::Waker;
