//! Poll Backend Module
//!
//! Portable `poll(2)` implementation of [`MuxBackend`] for any Unix.
//!
//! The interest set is kept in user space as a `pollfd` array, so there is no
//! kernel-side context descriptor and [`MuxBackend::handle`] reports `None`.
//! Each entry remembers the file it was registered for, so a number that was
//! closed and reused can be registered again. Waits resume scanning after the
//! last reported entry, which keeps a full batch from starving later entries.

use std::time::Duration;

use entities_io_operations::Descriptor;
use nix::errno::Errno;

use crate::backend::{timeout_millis, MuxBackend, WaitOutcome};
use crate::mux::MuxError;

const HANGUP: libc::c_short = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// Device and inode of an open file
type FileId = (libc::dev_t, libc::ino_t);

fn file_id(fd: Descriptor) -> Result<FileId, Errno> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fstat writes a full `stat` on success and only reads the descriptor table.
    if unsafe { libc::fstat(fd, st.as_mut_ptr()) } < 0 {
        return Err(Errno::last());
    }
    // SAFETY: initialised by the successful fstat above.
    let st = unsafe { st.assume_init() };
    Ok((st.st_dev, st.st_ino))
}

/// Whether a hung-up descriptor with these `revents` is closed by the backend
///
/// `POLLNVAL` means the number is not open, so closing it could only hit
/// whatever file reuses it next.
fn closes_on_hangup(revents: libc::c_short, close_on_hangup: bool) -> bool {
    close_on_hangup && revents & libc::POLLNVAL == 0
}

/// `poll(2)`-backed poll context
pub struct PollBackend {
    fds: Vec<libc::pollfd>,
    files: Vec<FileId>,
    next: usize,
    capacity: usize,
    close_on_hangup: bool,
    closed: bool,
}

impl PollBackend {
    /// Create a poll context reporting up to `capacity` descriptors per wait
    ///
    /// A capacity of zero is raised to one. Creation never fails; the
    /// `Result` matches the other backends.
    pub fn new(capacity: usize, close_on_hangup: bool) -> Result<Self, MuxError> {
        Ok(Self {
            fds: Vec::new(),
            files: Vec::new(),
            next: 0,
            capacity: capacity.max(1),
            close_on_hangup,
            closed: false,
        })
    }

    fn position(&self, fd: Descriptor) -> Option<usize> {
        self.fds.iter().position(|p| p.fd == fd)
    }

    fn remove_at(&mut self, index: usize) -> libc::pollfd {
        self.files.remove(index);
        self.fds.remove(index)
    }
}

impl MuxBackend for PollBackend {
    fn handle(&self) -> Option<Descriptor> {
        None
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn register(&mut self, fd: Descriptor) -> Result<(), MuxError> {
        if self.closed {
            return Err(MuxError::Closed);
        }
        if fd <= 0 {
            return Err(MuxError::InvalidDescriptor(fd));
        }
        let file = file_id(fd).map_err(|errno| match errno {
            Errno::EBADF => MuxError::InvalidDescriptor(fd),
            errno => MuxError::RegistrationFailed { fd, errno },
        })?;
        if let Some(index) = self.position(fd) {
            if self.files[index] == file {
                return Err(MuxError::AlreadyRegistered(fd));
            }
            log::debug!("poll: descriptor {} now refers to another file", fd);
            self.files[index] = file;
            self.fds[index].revents = 0;
            return Ok(());
        }

        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
        self.files.push(file);
        log::debug!("poll: registered descriptor {}", fd);
        Ok(())
    }

    fn deregister(&mut self, fd: Descriptor) -> Result<(), MuxError> {
        if self.closed {
            return Err(MuxError::Closed);
        }
        let index = self.position(fd).ok_or(MuxError::NotRegistered(fd))?;
        self.remove_at(index);
        log::debug!("poll: deregistered descriptor {}", fd);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome, MuxError> {
        if self.closed {
            return Err(MuxError::Closed);
        }

        // SAFETY: the pollfd array holds `fds.len()` entries and outlives the call.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };
        if rc < 0 {
            return match Errno::last() {
                Errno::EINTR => {
                    log::trace!("poll: wait interrupted");
                    Ok(WaitOutcome::empty())
                }
                errno => Err(MuxError::WaitFailed(errno)),
            };
        }

        let mut outcome = WaitOutcome::empty();
        let len = self.fds.len();
        let start = if len == 0 { 0 } else { self.next % len };
        let mut last = None;
        for i in (start..len).chain(0..start) {
            if outcome.ready.len() + outcome.hung_up.len() == self.capacity {
                break;
            }
            let p = self.fds[i];
            if p.revents == 0 {
                continue;
            }
            if p.revents & HANGUP != 0 && p.fd >= 0 {
                log::debug!("poll: descriptor {} hung up (revents {:#x})", p.fd, p.revents);
                outcome.hung_up.push(p.fd);
            } else if p.fd <= 0 {
                log::trace!("poll: skipping event for descriptor {}", p.fd);
                continue;
            } else if p.revents & libc::POLLIN != 0 {
                outcome.ready.push(p.fd);
            } else {
                log::trace!("poll: ignoring revents {:#x} on descriptor {}", p.revents, p.fd);
                continue;
            }
            last = Some(i);
        }
        if let Some(i) = last {
            self.next = i + 1;
        }

        for &fd in &outcome.hung_up {
            let Some(index) = self.position(fd) else {
                continue;
            };
            let entry = self.remove_at(index);
            if closes_on_hangup(entry.revents, self.close_on_hangup) {
                if let Err(errno) = nix::unistd::close(fd) {
                    log::warn!("failed to close hung-up descriptor {}: {}", fd, errno);
                }
            }
        }
        Ok(outcome)
    }

    fn close(&mut self) {
        if !self.closed {
            self.fds.clear();
            self.files.clear();
            self.closed = true;
            log::debug!("closed poll context");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for PollBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fds: Vec<Descriptor> = self.fds.iter().map(|p| p.fd).collect();
        f.debug_struct("PollBackend")
            .field("fds", &fds)
            .field("capacity", &self.capacity)
            .field("close_on_hangup", &self.close_on_hangup)
            .field("closed", &self.closed)
            .finish()
    }
}
