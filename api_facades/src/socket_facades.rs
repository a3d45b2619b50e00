//! Socket Facades
//!
//! One-call socket construction and the small helpers event handlers use
//! around raw descriptors.

use adapters_socket::{Socket, SocketAddress, SocketError, SocketType, LISTEN_BACKLOG};
use entities_io_operations::{AsDescriptor, Descriptor};

pub use adapters_socket::{sdopen, SockStream};

/// Create a socket of type `socket_type` bound to `addr`
///
/// The address family follows from `addr`.
pub fn make_socket(socket_type: SocketType, addr: &SocketAddress) -> Result<Socket, SocketError> {
    let mut sock = Socket::new(addr.family(), socket_type)?;
    sock.bind(addr).map_err(|e| {
        log::debug!("make_socket: bind to {:?} failed: {}", addr, e);
        e
    })?;
    Ok(sock)
}

/// Create a stream socket bound to `addr` and listening with the default backlog
pub fn make_socket_listener(addr: &SocketAddress) -> Result<Socket, SocketError> {
    let mut sock = make_socket(SocketType::Stream, addr)?;
    sock.listen(LISTEN_BACKLOG)?;
    Ok(sock)
}

/// Accept one pending connection on `listener`
pub fn socket_accept(listener: &Socket) -> Result<Socket, SocketError> {
    listener.accept().map(|(sock, _)| sock)
}

/// Connect `sock` to `addr`
pub fn socket_connect(sock: &mut Socket, addr: &SocketAddress) -> Result<(), SocketError> {
    sock.connect(addr)
}

/// Connect `sock` to the address the open socket `link` is bound to
pub fn socket_connect_to(sock: &mut Socket, link: Descriptor) -> Result<(), SocketError> {
    sock.connect_to(link)
}

/// Descriptor of anything that has one
pub fn sockno<T: AsDescriptor + ?Sized>(item: &T) -> Descriptor {
    item.descriptor()
}
