//! API Facades Layer
//!
//! Free functions mirroring the library's original calling surface:
//! `make_socket`, `make_socket_listener`, `socket_accept`, `socket_connect`,
//! `sdopen`, `sockno` and `make_muxer`.
//!
//! All facades call into the adapters layer; they add no behaviour beyond
//! composing its operations in the usual order.

#[cfg(unix)]
pub mod mux_facades;
#[cfg(unix)]
pub mod socket_facades;

// Re-export main facade functions
#[cfg(unix)]
pub use mux_facades::*;
#[cfg(unix)]
pub use socket_facades::*;
