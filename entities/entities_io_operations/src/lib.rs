//! Entities Layer: I/O Operations
//!
//! Provides the fundamental value types shared by the socket and multiplexer
//! adapters: raw socket descriptors and the accumulated socket error flags.
//!
//! ## Overview
//!
//! The `entities_io_operations` crate is the innermost layer of the workspace.
//! It has no dependencies and holds no OS resources; everything here is plain
//! data that can be copied freely between threads.
//!
//! ## Modules
//!
//! - **[`descriptor`](descriptor/index.html)**: The `Descriptor` alias, the
//!   invalid sentinel, validity checks and the `AsDescriptor` trait.
//! - **[`sock_error`](sock_error/index.html)**: `SockErrorFlags`, a bitmask
//!   recording which stage of socket setup failed.
//!
//! ## Usage
//!
//! ```rust
//! use entities_io_operations::{is_valid_descriptor, SockErrorFlags, INVALID_DESCRIPTOR};
//!
//! assert!(!is_valid_descriptor(INVALID_DESCRIPTOR));
//!
//! let mut flags = SockErrorFlags::NONE;
//! flags |= SockErrorFlags::BIND;
//! assert!(flags.contains(SockErrorFlags::BIND));
//! ```
//!
//! ## See Also
//!
//! - [`adapters_socket`](../adapters_socket/index.html): RAII sockets built on these types
//! - [`adapters_io_mux`](../adapters_io_mux/index.html): readiness multiplexer keyed by `Descriptor`

pub mod descriptor;
pub mod sock_error;

pub use descriptor::{is_valid_descriptor, AsDescriptor, Descriptor, INVALID_DESCRIPTOR};
pub use sock_error::SockErrorFlags;
