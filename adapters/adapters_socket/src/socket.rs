//! Socket Module
//!
//! Provides an owning socket handle for IPv4, IPv6 and Unix-domain sockets.
//! The handle closes its descriptor when dropped and, for sockets bound to a
//! filesystem path, removes that path as well.
//!
//! Setup failures are returned as `SocketError` and also accumulated in the
//! socket's `SockErrorFlags`, so an owner can inspect every stage that failed
//! after a chain of setup calls.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::{AsRawFd, BorrowedFd, IntoRawFd};
use std::path::{Path, PathBuf};

use entities_io_operations::{
    is_valid_descriptor, AsDescriptor, Descriptor, SockErrorFlags, INVALID_DESCRIPTOR,
};
use socket2::{Domain, SockAddr, SockRef, Socket as Socket2, Type};

/// Default backlog used by listening sockets
pub const LISTEN_BACKLOG: i32 = 50;

/// Socket error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// Invalid address, or an address of the wrong family
    InvalidAddress,
    /// Address already in use
    AddressInUse,
    /// Connection refused
    ConnectionRefused,
    /// Connection reset
    ConnectionReset,
    /// Connection aborted
    ConnectionAborted,
    /// Timeout
    Timeout,
    /// Would block (non-blocking operation)
    WouldBlock,
    /// Invalid socket descriptor
    InvalidSocket,
    /// Socket has already been closed
    Closed,
    /// Unix socket path does not fit in `sun_path`
    PathTooLong,
    /// Operation not supported for this socket type
    NotSupported,
    /// I/O error
    IoError(String),
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::AddrInUse => SocketError::AddressInUse,
            ErrorKind::AddrNotAvailable => SocketError::InvalidAddress,
            ErrorKind::ConnectionRefused => SocketError::ConnectionRefused,
            ErrorKind::ConnectionReset => SocketError::ConnectionReset,
            ErrorKind::ConnectionAborted => SocketError::ConnectionAborted,
            ErrorKind::TimedOut => SocketError::Timeout,
            ErrorKind::WouldBlock => SocketError::WouldBlock,
            _ => match err.raw_os_error() {
                Some(libc::EBADF) | Some(libc::ENOTSOCK) => SocketError::InvalidSocket,
                _ => SocketError::IoError(err.to_string()),
            },
        }
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::InvalidAddress => write!(f, "invalid address"),
            SocketError::AddressInUse => write!(f, "address already in use"),
            SocketError::ConnectionRefused => write!(f, "connection refused"),
            SocketError::ConnectionReset => write!(f, "connection reset"),
            SocketError::ConnectionAborted => write!(f, "connection aborted"),
            SocketError::Timeout => write!(f, "operation timed out"),
            SocketError::WouldBlock => write!(f, "operation would block"),
            SocketError::InvalidSocket => write!(f, "invalid socket descriptor"),
            SocketError::Closed => write!(f, "socket is closed"),
            SocketError::PathTooLong => write!(f, "socket path too long"),
            SocketError::NotSupported => write!(f, "operation not supported"),
            SocketError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SocketError {}

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
    /// Unix domain (filesystem path)
    Unix,
}

impl From<AddressFamily> for Domain {
    fn from(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
            AddressFamily::Unix => Domain::UNIX,
        }
    }
}

impl AddressFamily {
    fn from_domain(domain: Domain) -> Option<Self> {
        if domain == Domain::IPV4 {
            Some(AddressFamily::Ipv4)
        } else if domain == Domain::IPV6 {
            Some(AddressFamily::Ipv6)
        } else if domain == Domain::UNIX {
            Some(AddressFamily::Unix)
        } else {
            None
        }
    }
}

/// Socket type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Stream socket
    Stream,
    /// Datagram socket
    Datagram,
}

impl From<SocketType> for Type {
    fn from(ty: SocketType) -> Self {
        match ty {
            SocketType::Stream => Type::STREAM,
            SocketType::Datagram => Type::DGRAM,
        }
    }
}

/// Local or peer address of a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    /// IPv4 or IPv6 address and port
    Inet(SocketAddr),
    /// Unix-domain socket path
    Path(PathBuf),
}

impl SocketAddress {
    /// Get the address family this address belongs to
    pub fn family(&self) -> AddressFamily {
        match self {
            SocketAddress::Inet(SocketAddr::V4(_)) => AddressFamily::Ipv4,
            SocketAddress::Inet(SocketAddr::V6(_)) => AddressFamily::Ipv6,
            SocketAddress::Path(_) => AddressFamily::Unix,
        }
    }

    /// Convert a raw `socket2` address
    ///
    /// Returns `None` for unnamed or abstract Unix addresses and for families
    /// this crate does not model.
    pub fn from_sock_addr(addr: &SockAddr) -> Option<Self> {
        addr.as_socket()
            .map(SocketAddress::Inet)
            .or_else(|| addr.as_pathname().map(|p| SocketAddress::Path(p.to_path_buf())))
    }

    pub(crate) fn to_sock_addr(&self) -> Result<SockAddr, SocketError> {
        match self {
            SocketAddress::Inet(addr) => Ok(SockAddr::from(*addr)),
            SocketAddress::Path(path) => {
                if path.as_os_str().is_empty() {
                    return Err(SocketError::InvalidAddress);
                }
                if path.as_os_str().len() > max_path_len() {
                    return Err(SocketError::PathTooLong);
                }
                SockAddr::unix(path).map_err(SocketError::from)
            }
        }
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        SocketAddress::Inet(addr)
    }
}

impl From<PathBuf> for SocketAddress {
    fn from(path: PathBuf) -> Self {
        SocketAddress::Path(path)
    }
}

impl From<&Path> for SocketAddress {
    fn from(path: &Path) -> Self {
        SocketAddress::Path(path.to_path_buf())
    }
}

/// Longest path that fits in `sun_path` with its terminating NUL
fn max_path_len() -> usize {
    // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
    let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_path.len() - 1
}

/// Options applied while setting up a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Set `SO_REUSEADDR` before binding inet sockets
    pub reuse_address: bool,
    /// Put the socket in non-blocking mode at creation
    pub nonblocking: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_address: true,
            nonblocking: false,
        }
    }
}

/// Owning socket handle
///
/// Closes the socket on drop. A socket bound to a Unix path also removes the
/// path when it is closed, so a later bind to the same path succeeds.
pub struct Socket {
    inner: Option<Socket2>,
    family: AddressFamily,
    socket_type: SocketType,
    options: SocketOptions,
    errors: SockErrorFlags,
    bound_path: Option<PathBuf>,
}

impl Socket {
    /// Create a new socket with default options
    ///
    /// # Arguments
    ///
    /// * `family` - Address family (IPv4, IPv6 or Unix)
    /// * `socket_type` - Socket type (Stream or Datagram)
    ///
    /// # Returns
    ///
    /// * `Ok(Socket)` - Created socket
    /// * `Err(SocketError)` - Error creating socket
    pub fn new(family: AddressFamily, socket_type: SocketType) -> Result<Self, SocketError> {
        Self::with_options(family, socket_type, SocketOptions::default())
    }

    /// Create a new socket with explicit options
    pub fn with_options(
        family: AddressFamily,
        socket_type: SocketType,
        options: SocketOptions,
    ) -> Result<Self, SocketError> {
        let socket = Socket2::new(family.into(), socket_type.into(), None)?;
        if options.nonblocking {
            socket.set_nonblocking(true)?;
        }
        log::debug!(
            "opened {:?} {:?} socket {}",
            family,
            socket_type,
            socket.as_raw_fd()
        );

        Ok(Self {
            inner: Some(socket),
            family,
            socket_type,
            options,
            errors: SockErrorFlags::NONE,
            bound_path: None,
        })
    }

    /// Bind socket to an address
    ///
    /// A stale socket file left at a Unix path is removed before binding.
    /// Inet sockets get `SO_REUSEADDR` when the socket options ask for it.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to bind to; must match the socket's family
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Success
    /// * `Err(SocketError)` - Error binding; `SockErrorFlags::BIND` is recorded
    pub fn bind(&mut self, addr: &SocketAddress) -> Result<(), SocketError> {
        let result = self.bind_address(addr);
        self.record(result, SockErrorFlags::BIND)
    }

    fn bind_address(&mut self, addr: &SocketAddress) -> Result<(), SocketError> {
        if addr.family() != self.family {
            return Err(SocketError::InvalidAddress);
        }
        let sock_addr = addr.to_sock_addr()?;

        match addr {
            SocketAddress::Path(path) => remove_stale_socket_file(path)?,
            SocketAddress::Inet(_) if self.options.reuse_address => {
                let reuse = self.live()?.set_reuse_address(true);
                if let Err(e) = reuse {
                    self.errors |= SockErrorFlags::SOCKET_OPTION;
                    return Err(e.into());
                }
            }
            SocketAddress::Inet(_) => {}
        }

        self.live()?.bind(&sock_addr)?;

        if let SocketAddress::Path(path) = addr {
            self.bound_path = Some(path.clone());
        }
        Ok(())
    }

    /// Listen for incoming connections (stream sockets only)
    ///
    /// # Arguments
    ///
    /// * `backlog` - Maximum number of pending connections
    pub fn listen(&mut self, backlog: i32) -> Result<(), SocketError> {
        let result = if self.socket_type != SocketType::Stream {
            Err(SocketError::NotSupported)
        } else {
            self.live()
                .and_then(|sock| sock.listen(backlog).map_err(SocketError::from))
        };
        self.record(result, SockErrorFlags::LISTEN)
    }

    /// Accept an incoming connection (stream sockets only)
    ///
    /// # Returns
    ///
    /// * `Ok((Socket, Option<SocketAddress>))` - Accepted connection and peer
    ///   address; unnamed Unix peers have no address
    /// * `Err(SocketError)` - Error accepting connection
    pub fn accept(&self) -> Result<(Socket, Option<SocketAddress>), SocketError> {
        if self.socket_type != SocketType::Stream {
            return Err(SocketError::NotSupported);
        }

        let (socket, addr) = self.live()?.accept()?;
        log::debug!(
            "accepted socket {} on {}",
            socket.as_raw_fd(),
            self.descriptor()
        );

        let accepted = Socket {
            inner: Some(socket),
            family: self.family,
            socket_type: self.socket_type,
            options: self.options,
            errors: SockErrorFlags::NONE,
            bound_path: None,
        };

        Ok((accepted, SocketAddress::from_sock_addr(&addr)))
    }

    /// Connect to a remote address
    ///
    /// Datagram sockets only record the default destination.
    pub fn connect(&mut self, addr: &SocketAddress) -> Result<(), SocketError> {
        let result = addr
            .to_sock_addr()
            .and_then(|peer| self.live()?.connect(&peer).map_err(SocketError::from));
        self.record(result, SockErrorFlags::CONNECT)
    }

    /// Connect to the address another live socket descriptor is bound to
    ///
    /// # Arguments
    ///
    /// * `link` - Descriptor of a bound socket; its local address becomes the peer
    pub fn connect_to(&mut self, link: Descriptor) -> Result<(), SocketError> {
        let result = bound_address(link)
            .and_then(|peer| self.live()?.connect(&peer).map_err(SocketError::from));
        self.record(result, SockErrorFlags::CONNECT)
    }

    /// Send a datagram to `addr`
    pub fn send_to(&self, buf: &[u8], addr: &SocketAddress) -> Result<usize, SocketError> {
        let peer = addr.to_sock_addr()?;
        Ok(self.live()?.send_to(buf, &peer)?)
    }

    /// Receive a datagram, returning the byte count and sender address
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Option<SocketAddress>), SocketError> {
        // SAFETY: `recv_from` never writes uninitialised bytes into the
        // buffer, so viewing initialised memory as `MaybeUninit` is sound.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let (n, addr) = self.live()?.recv_from(uninit)?;
        Ok((n, SocketAddress::from_sock_addr(&addr)))
    }

    /// Get the local address
    pub fn local_address(&self) -> Result<SocketAddress, SocketError> {
        let addr = self.live()?.local_addr()?;
        SocketAddress::from_sock_addr(&addr).ok_or(SocketError::InvalidAddress)
    }

    /// Get the peer address
    pub fn peer_address(&self) -> Result<SocketAddress, SocketError> {
        let addr = self.live()?.peer_addr()?;
        SocketAddress::from_sock_addr(&addr).ok_or(SocketError::InvalidAddress)
    }

    /// Switch non-blocking mode
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), SocketError> {
        Ok(self.live()?.set_nonblocking(nonblocking)?)
    }

    /// Close the socket
    ///
    /// Idempotent. Removes the bound Unix path, if any.
    pub fn close(&mut self) {
        let Some(socket) = self.inner.take() else {
            return;
        };
        log::debug!("closing socket {}", socket.as_raw_fd());
        drop(socket);

        if let Some(path) = self.bound_path.take() {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    log::warn!("could not remove socket path {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Give up ownership of the descriptor without closing it
    ///
    /// The bound path, if any, is left in place.
    pub fn into_descriptor(mut self) -> Descriptor {
        self.bound_path = None;
        self.inner
            .take()
            .map(IntoRawFd::into_raw_fd)
            .unwrap_or(INVALID_DESCRIPTOR)
    }

    /// Get the raw descriptor, or `INVALID_DESCRIPTOR` once closed
    pub fn descriptor(&self) -> Descriptor {
        self.inner
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .unwrap_or(INVALID_DESCRIPTOR)
    }

    /// Check whether the socket still owns an open descriptor
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Open and no setup failure recorded
    pub fn is_ok(&self) -> bool {
        self.is_open() && self.errors.is_empty()
    }

    /// Setup failures recorded so far
    pub fn error_flags(&self) -> SockErrorFlags {
        self.errors
    }

    /// Get the path this socket is bound to, if it is a path socket
    pub fn bound_path(&self) -> Option<&Path> {
        self.bound_path.as_deref()
    }

    /// Get the underlying socket2 socket
    pub fn inner(&self) -> Option<&Socket2> {
        self.inner.as_ref()
    }

    /// Get the address family
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Get the socket type
    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    /// Get the options the socket was created with
    pub fn options(&self) -> SocketOptions {
        self.options
    }

    fn live(&self) -> Result<&Socket2, SocketError> {
        self.inner.as_ref().ok_or(SocketError::Closed)
    }

    fn record<T>(
        &mut self,
        result: Result<T, SocketError>,
        flag: SockErrorFlags,
    ) -> Result<T, SocketError> {
        if let Err(e) = &result {
            self.errors |= flag;
            if *e == SocketError::PathTooLong {
                self.errors |= SockErrorFlags::PATH_INVALID;
            }
            log::debug!("socket {} failed ({}): {}", self.descriptor(), flag, e);
        }
        result
    }
}

impl AsDescriptor for Socket {
    fn descriptor(&self) -> Descriptor {
        Socket::descriptor(self)
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor() == other.descriptor()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("fd", &self.descriptor())
            .field("family", &self.family)
            .field("socket_type", &self.socket_type)
            .field("errors", &self.errors)
            .field("bound_path", &self.bound_path)
            .finish()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(sock) => sock.read(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket is closed")),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(sock) => sock.write(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket is closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Get the address family of an open socket descriptor
///
/// Returns `None` if the descriptor is invalid, not a socket, or of a family
/// this crate does not model.
pub fn descriptor_family(fd: Descriptor) -> Option<AddressFamily> {
    bound_address(fd)
        .ok()
        .and_then(|addr| AddressFamily::from_domain(addr.domain()))
}

fn bound_address(fd: Descriptor) -> Result<SockAddr, SocketError> {
    if !is_valid_descriptor(fd) {
        return Err(SocketError::InvalidSocket);
    }
    // SAFETY: the descriptor is non-negative and the borrow is only used for
    // one getsockname call; a closed descriptor makes that call fail with
    // EBADF rather than touching memory.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    Ok(SockRef::from(&borrowed).local_addr()?)
}

fn remove_stale_socket_file(path: &Path) -> Result<(), SocketError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(SocketError::AddressInUse),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
