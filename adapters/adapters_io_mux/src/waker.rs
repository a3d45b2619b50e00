//! Waker Module
//!
//! Cross-thread wakeup for a blocked multiplexer.
//!
//! The multiplexer owns the read end of a nonblocking Unix stream pair and
//! monitors it like any other descriptor. [`Waker`] handles write one byte to
//! the other end, which makes the pending wait return. The wake descriptor is
//! drained inside the multiplexer and never reaches user handlers.

use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use entities_io_operations::Descriptor;

use crate::mux::MuxError;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Cloneable handle that interrupts a blocked `listen()` from any thread
#[derive(Debug, Clone)]
pub struct Waker {
    writer: Arc<UnixStream>,
    stop: Arc<AtomicBool>,
}

impl Waker {
    /// Make the current or next wait return
    ///
    /// Wakes that arrive while one is already pending coalesce.
    pub fn wake(&self) -> Result<(), MuxError> {
        let byte = [1u8];
        loop {
            // SAFETY: one-byte buffer, valid for the duration of the call.
            let rc = unsafe {
                libc::send(self.writer.as_raw_fd(), byte.as_ptr().cast(), 1, SEND_FLAGS)
            };
            if rc >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(MuxError::from(err)),
            }
        }
    }

    /// Ask `run()` to return after the current cycle, waking it if blocked
    pub fn stop(&self) -> Result<(), MuxError> {
        self.stop.store(true, Ordering::SeqCst);
        self.wake()
    }
}

/// Multiplexer-side end of the wake channel
#[derive(Debug)]
pub(crate) struct MuxWaker {
    reader: UnixStream,
    handle: Waker,
}

impl MuxWaker {
    pub(crate) fn new() -> Result<Self, MuxError> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self {
            reader,
            handle: Waker {
                writer: Arc::new(writer),
                stop: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    pub(crate) fn descriptor(&self) -> Descriptor {
        self.reader.as_raw_fd()
    }

    pub(crate) fn handle(&self) -> Waker {
        self.handle.clone()
    }

    /// Consume pending wake bytes, returning how many were read
    pub(crate) fn drain(&self) -> usize {
        let mut buf = [0u8; 64];
        let mut total = 0;
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        log::warn!("failed to drain wake descriptor {}: {}", self.descriptor(), e);
                    }
                    break;
                }
            }
        }
        log::debug!("drained {} wake byte(s)", total);
        total
    }

    /// Check and clear a pending stop request
    pub(crate) fn take_stop(&self) -> bool {
        self.handle.stop.swap(false, Ordering::SeqCst)
    }
}
