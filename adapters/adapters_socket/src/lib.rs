//! Adapters Layer: Sockets and Socket Streams
//!
//! Provides the socket-side collaborators of the I/O multiplexer: an owning,
//! RAII-managed socket handle and a non-owning buffered byte stream that reads
//! and writes through a raw descriptor.
//!
//! ## Overview
//!
//! The `adapters_socket` crate provides:
//! - **Sockets**: IPv4, IPv6 and Unix-domain stream/datagram sockets built on
//!   `socket2`, closed (and unlinked, for path sockets) on drop
//! - **Socket operations**: bind, listen, accept, connect, send, recv
//! - **Setup error tracking**: every failed setup stage leaves a bit in the
//!   socket's [`SockErrorFlags`](entities_io_operations::SockErrorFlags)
//! - **Socket streams**: a buffered `Read`/`BufRead`/`Write` adapter with a
//!   small putback area, used by multiplexer event handlers
//!
//! ## Architecture
//!
//! This crate is part of the adapters layer. It depends on:
//! - `entities_io_operations`: For descriptors and error flags
//!
//! ## See Also
//!
//! - [`adapters_io_mux`](../adapters_io_mux/index.html): readiness multiplexer dispatching to handlers

#[cfg(unix)]
pub mod socket;
#[cfg(unix)]
pub mod sock_stream;

#[cfg(unix)]
pub use socket::{
    descriptor_family, AddressFamily, Socket, SocketAddress, SocketError, SocketOptions,
    SocketType, LISTEN_BACKLOG,
};
#[cfg(unix)]
pub use sock_stream::{sdopen, SockStream, BUFLEN, PUTBACK_LEN};
