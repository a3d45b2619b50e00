//! Descriptor Module
//!
//! A descriptor is the OS-level integer naming one open socket. The types in
//! this workspace only ever observe descriptor values; ownership stays with
//! whoever opened the socket.

/// Raw socket descriptor
#[cfg(unix)]
pub type Descriptor = std::os::unix::io::RawFd;

/// Raw socket descriptor
#[cfg(not(unix))]
pub type Descriptor = i32;

/// Value used for "no socket"
pub const INVALID_DESCRIPTOR: Descriptor = -1;

/// Check whether a descriptor value can name an open socket
///
/// This is a value check only. A non-negative descriptor may still be closed.
pub const fn is_valid_descriptor(fd: Descriptor) -> bool {
    fd >= 0
}

/// Anything that exposes the descriptor it reads from and writes to
///
/// Implementors return `INVALID_DESCRIPTOR` once the underlying socket is
/// closed or detached.
pub trait AsDescriptor {
    /// Get the raw descriptor
    fn descriptor(&self) -> Descriptor;
}

impl AsDescriptor for Descriptor {
    fn descriptor(&self) -> Descriptor {
        *self
    }
}
