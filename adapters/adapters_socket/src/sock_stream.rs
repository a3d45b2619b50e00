//! Socket Stream Module
//!
//! A buffered, bidirectional byte stream attached to a socket descriptor.
//!
//! The stream does not own the descriptor: dropping it flushes pending output
//! but never closes the socket. Input is read with `recvfrom`, so for datagram
//! sockets the sender of the most recent datagram is kept and can be answered
//! with [`SockStream::reply`].
//!
//! The input buffer keeps up to [`PUTBACK_LEN`] already-consumed bytes in
//! front of the read position, so a reader can step back over a byte it has
//! just taken even after the buffer was refilled.

use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::mem;

use entities_io_operations::{is_valid_descriptor, AsDescriptor, Descriptor, INVALID_DESCRIPTOR};
use socket2::SockAddr;

use crate::socket::SocketAddress;

/// Size of the input buffer, putback area included
pub const BUFLEN: usize = 128;

/// Number of bytes kept for putback after a refill
pub const PUTBACK_LEN: usize = 4;

/// Pending output is sent once this many bytes are buffered
const OUTPUT_LIMIT: usize = BUFLEN - 1;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Buffered stream over a socket descriptor
pub struct SockStream {
    fd: Descriptor,
    input: [u8; BUFLEN],
    /// Start of the putback area
    start: usize,
    /// Read position
    pos: usize,
    /// End of buffered input
    end: usize,
    output: Vec<u8>,
    last_peer: Option<SockAddr>,
}

impl SockStream {
    /// Attach a new stream to `fd`
    ///
    /// An invalid descriptor yields a detached stream.
    pub fn new(fd: Descriptor) -> Self {
        let mut stream = Self::default();
        stream.set_handle(fd);
        stream
    }

    /// Attach the stream to another descriptor
    ///
    /// Pending output is flushed to the previous descriptor first and any
    /// buffered input is discarded.
    ///
    /// # Returns
    ///
    /// `false` if `fd` is not a valid descriptor; the stream is left unchanged.
    pub fn set_handle(&mut self, fd: Descriptor) -> bool {
        if !is_valid_descriptor(fd) {
            return false;
        }
        if self.is_attached() && !self.output.is_empty() {
            if let Err(e) = self.flush_output() {
                log::warn!("dropping output for descriptor {}: {}", self.fd, e);
            }
        }
        self.fd = fd;
        self.start = PUTBACK_LEN;
        self.pos = PUTBACK_LEN;
        self.end = PUTBACK_LEN;
        self.output.clear();
        self.last_peer = None;
        true
    }

    /// Get the attached descriptor, or `INVALID_DESCRIPTOR` when detached
    pub fn descriptor(&self) -> Descriptor {
        self.fd
    }

    /// Check whether the stream has a descriptor
    pub fn is_attached(&self) -> bool {
        is_valid_descriptor(self.fd)
    }

    /// Sender of the most recently received data, if the socket reported one
    pub fn last_peer(&self) -> Option<SocketAddress> {
        self.last_peer.as_ref().and_then(SocketAddress::from_sock_addr)
    }

    /// Number of bytes buffered and not yet consumed
    pub fn available(&self) -> usize {
        self.end - self.pos
    }

    /// Number of output bytes waiting to be sent
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Take the next byte, or `None` at end of stream
    pub fn get_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.pos += 1;
        }
        Ok(byte)
    }

    /// Look at the next byte without consuming it
    pub fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.fill_buf()?.first().copied())
    }

    /// Step back over the last consumed byte
    ///
    /// Fails once the putback area is exhausted.
    pub fn unget(&mut self) -> bool {
        if self.pos > self.start {
            self.pos -= 1;
            true
        } else {
            false
        }
    }

    /// Put `byte` back in front of the read position
    ///
    /// Only the byte that was actually consumed there can be put back.
    pub fn putback(&mut self, byte: u8) -> bool {
        if self.pos > self.start && self.input[self.pos - 1] == byte {
            self.pos -= 1;
            true
        } else {
            false
        }
    }

    /// Read one whitespace-delimited token
    ///
    /// Leading whitespace is skipped. The whitespace that ends the token is
    /// left in the stream. Returns `None` at end of stream.
    pub fn read_token(&mut self) -> io::Result<Option<String>> {
        while let Some(byte) = self.peek_byte()? {
            if !byte.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }

        let mut token = Vec::new();
        while let Some(byte) = self.peek_byte()? {
            if byte.is_ascii_whitespace() {
                break;
            }
            token.push(byte);
            self.pos += 1;
        }

        if token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&token).into_owned()))
        }
    }

    /// Send `data` as one datagram to the sender of the last received data
    pub fn reply(&mut self, data: &[u8]) -> io::Result<usize> {
        let fd = self.attached()?;
        let peer = self
            .last_peer
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no peer to reply to"))?;

        loop {
            // SAFETY: `data` and `peer` are valid for the duration of the call.
            let rc = unsafe {
                libc::sendto(
                    fd,
                    data.as_ptr().cast(),
                    data.len(),
                    SEND_FLAGS,
                    peer.as_ptr(),
                    peer.len(),
                )
            };
            if rc >= 0 {
                return Ok(rc as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn attached(&self) -> io::Result<Descriptor> {
        if self.is_attached() {
            Ok(self.fd)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream has no socket descriptor",
            ))
        }
    }

    /// Refill the input buffer, keeping the putback bytes in front of it
    fn underflow(&mut self) -> io::Result<usize> {
        if self.pos < self.end {
            return Ok(self.end - self.pos);
        }
        let fd = self.attached()?;

        let keep = (self.pos - self.start).min(PUTBACK_LEN);
        self.input
            .copy_within(self.pos - keep..self.pos, PUTBACK_LEN - keep);

        // SAFETY: sockaddr_storage is plain old data; all-zero is valid.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let n = loop {
            let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
            let buf = &mut self.input[PUTBACK_LEN..];
            // SAFETY: the buffer and address storage outlive the call and the
            // lengths passed match their sizes.
            let rc = unsafe {
                libc::recvfrom(
                    fd,
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    0,
                    (&mut storage as *mut libc::sockaddr_storage).cast(),
                    &mut len,
                )
            };
            if rc >= 0 {
                if len > 0 && storage.ss_family != libc::AF_UNSPEC as libc::sa_family_t {
                    // SAFETY: the kernel filled `len` bytes of `storage`.
                    self.last_peer = Some(unsafe { SockAddr::new(storage, len) });
                }
                break rc as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        self.start = PUTBACK_LEN - keep;
        self.pos = PUTBACK_LEN;
        self.end = PUTBACK_LEN + n;
        Ok(n)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        let fd = self.attached()?;
        while !self.output.is_empty() {
            // SAFETY: the pointer and length describe the live output buffer.
            let rc = unsafe {
                libc::send(
                    fd,
                    self.output.as_ptr().cast(),
                    self.output.len(),
                    SEND_FLAGS,
                )
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if rc == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no data",
                ));
            }
            self.output.drain(..rc as usize);
        }
        Ok(())
    }
}

impl Default for SockStream {
    fn default() -> Self {
        Self {
            fd: INVALID_DESCRIPTOR,
            input: [0; BUFLEN],
            start: PUTBACK_LEN,
            pos: PUTBACK_LEN,
            end: PUTBACK_LEN,
            output: Vec::with_capacity(OUTPUT_LIMIT),
            last_peer: None,
        }
    }
}

impl AsDescriptor for SockStream {
    fn descriptor(&self) -> Descriptor {
        self.fd
    }
}

impl Read for SockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for SockStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.end {
            self.underflow()?;
        }
        Ok(&self.input[self.pos..self.end])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.end);
    }
}

impl Write for SockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.attached()?;

        let mut buffered = 0;
        while buffered < buf.len() {
            let room = OUTPUT_LIMIT - self.output.len();
            let take = room.min(buf.len() - buffered);
            self.output.extend_from_slice(&buf[buffered..buffered + take]);
            buffered += take;

            if self.output.len() >= OUTPUT_LIMIT {
                if let Err(e) = self.flush_output() {
                    // Bytes already taken stay queued; only a write that took none fails.
                    if buffered == 0 {
                        return Err(e);
                    }
                    return Ok(buffered);
                }
            }
        }
        Ok(buffered)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_output()
    }
}

impl fmt::Debug for SockStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SockStream")
            .field("fd", &self.fd)
            .field("available", &self.available())
            .field("pending_output", &self.output.len())
            .finish()
    }
}

impl Drop for SockStream {
    fn drop(&mut self) {
        if self.is_attached() && !self.output.is_empty() {
            if let Err(e) = self.flush_output() {
                log::warn!("unflushed output on descriptor {}: {}", self.fd, e);
            }
        }
    }
}

/// Open a stream on a socket descriptor
pub fn sdopen(fd: Descriptor) -> SockStream {
    SockStream::new(fd)
}
