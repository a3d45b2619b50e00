//! Epoll Backend Module
//!
//! Level-triggered `epoll(7)` implementation of [`MuxBackend`] for Linux.
//!
//! Every descriptor is registered for `EPOLLIN | EPOLLRDHUP`. A wait fills a
//! fixed-size event batch; the batch size is the backend capacity, not a limit
//! on how many descriptors may be registered.
//!
//! The kernel drops a registration when its file is closed, so a number
//! closed behind the backend's back can be registered again once reused.

use std::time::Duration;

use entities_io_operations::{is_valid_descriptor, Descriptor, INVALID_DESCRIPTOR};
use nix::errno::Errno;

use crate::backend::{timeout_millis, MuxBackend, WaitOutcome};
use crate::mux::MuxError;

const INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
const HANGUP: u32 = (libc::EPOLLHUP | libc::EPOLLERR) as u32;

/// Epoll-backed poll context
pub struct EpollBackend {
    epfd: Descriptor,
    events: Vec<libc::epoll_event>,
    close_on_hangup: bool,
}

impl EpollBackend {
    /// Create an epoll instance reporting up to `capacity` events per wait
    ///
    /// A capacity of zero is raised to one.
    ///
    /// # Errors
    ///
    /// * `MuxError::ResourceExhausted` - Descriptor or memory limits reached
    /// * `MuxError::PermissionDenied` - Creation refused by the system
    /// * `MuxError::CreateFailed` - Any other failure
    pub fn new(capacity: usize, close_on_hangup: bool) -> Result<Self, MuxError> {
        // SAFETY: plain syscall without pointer arguments.
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(MuxError::from(Errno::last()));
        }
        log::debug!("created epoll context {} (capacity {})", epfd, capacity.max(1));

        Ok(Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            close_on_hangup,
        })
    }

    fn control(&self, op: libc::c_int, fd: Descriptor) -> Result<(), Errno> {
        let mut event = libc::epoll_event {
            events: INTEREST,
            u64: fd as u64,
        };
        // SAFETY: `event` is valid for the duration of the call; the kernel
        // ignores it for EPOLL_CTL_DEL.
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut event) };
        if rc < 0 {
            Err(Errno::last())
        } else {
            Ok(())
        }
    }

    fn drop_hung_up(&mut self, fd: Descriptor) {
        if let Err(errno) = self.control(libc::EPOLL_CTL_DEL, fd) {
            log::warn!("failed to remove hung-up descriptor {} from epoll: {}", fd, errno);
        }
        if self.close_on_hangup {
            if let Err(errno) = nix::unistd::close(fd) {
                log::warn!("failed to close hung-up descriptor {}: {}", fd, errno);
            }
        }
    }
}

impl MuxBackend for EpollBackend {
    fn handle(&self) -> Option<Descriptor> {
        is_valid_descriptor(self.epfd).then_some(self.epfd)
    }

    fn capacity(&self) -> usize {
        self.events.len()
    }

    fn register(&mut self, fd: Descriptor) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        if fd <= 0 {
            return Err(MuxError::InvalidDescriptor(fd));
        }
        self.control(libc::EPOLL_CTL_ADD, fd).map_err(|errno| match errno {
            Errno::EEXIST => MuxError::AlreadyRegistered(fd),
            Errno::EBADF => MuxError::InvalidDescriptor(fd),
            errno => MuxError::RegistrationFailed { fd, errno },
        })?;
        log::debug!("epoll {}: registered descriptor {}", self.epfd, fd);
        Ok(())
    }

    fn deregister(&mut self, fd: Descriptor) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        self.control(libc::EPOLL_CTL_DEL, fd).map_err(|errno| match errno {
            Errno::ENOENT => MuxError::NotRegistered(fd),
            Errno::EBADF => MuxError::InvalidDescriptor(fd),
            errno => MuxError::RegistrationFailed { fd, errno },
        })?;
        log::debug!("epoll {}: deregistered descriptor {}", self.epfd, fd);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome, MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }

        // SAFETY: the event buffer holds `events.len()` entries and outlives the call.
        let rc = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_millis(timeout),
            )
        };
        if rc < 0 {
            return match Errno::last() {
                Errno::EINTR => {
                    log::trace!("epoll {}: wait interrupted", self.epfd);
                    Ok(WaitOutcome::empty())
                }
                errno => Err(MuxError::WaitFailed(errno)),
            };
        }

        let mut outcome = WaitOutcome::empty();
        for i in 0..rc as usize {
            // epoll_event is packed on some targets; copy the fields out.
            let event = self.events[i];
            let flags = event.events;
            let fd = event.u64 as Descriptor;

            if flags & HANGUP != 0 && fd >= 0 {
                log::debug!("epoll {}: descriptor {} hung up (events {:#x})", self.epfd, fd, flags);
                self.drop_hung_up(fd);
                outcome.hung_up.push(fd);
            } else if fd <= 0 {
                log::trace!("epoll {}: skipping event for descriptor {}", self.epfd, fd);
            } else if flags & libc::EPOLLIN as u32 != 0 {
                if flags & libc::EPOLLRDHUP as u32 != 0 {
                    log::debug!("epoll {}: peer of descriptor {} shut down writing", self.epfd, fd);
                }
                outcome.ready.push(fd);
            } else {
                log::trace!("epoll {}: ignoring events {:#x} on descriptor {}", self.epfd, flags, fd);
            }
        }
        Ok(outcome)
    }

    fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(errno) = nix::unistd::close(self.epfd) {
            log::warn!("failed to close epoll context {}: {}", self.epfd, errno);
        }
        log::debug!("closed epoll context {}", self.epfd);
        self.epfd = INVALID_DESCRIPTOR;
    }

    fn is_closed(&self) -> bool {
        !is_valid_descriptor(self.epfd)
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EpollBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpollBackend")
            .field("epfd", &self.epfd)
            .field("capacity", &self.events.len())
            .field("close_on_hangup", &self.close_on_hangup)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::{AsRawFd, IntoRawFd};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_epoll_backend_creation() {
        let backend = EpollBackend::new(10, true).unwrap();
        assert!(!backend.is_closed());
        assert_eq!(backend.capacity(), 10);
        assert!(backend.handle().is_some());

        let backend = EpollBackend::new(0, true).unwrap();
        assert_eq!(backend.capacity(), 1);
    }

    #[test]
    fn test_register_twice_fails() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut backend = EpollBackend::new(4, true).unwrap();

        backend.register(a.as_raw_fd()).unwrap();
        assert_eq!(
            backend.register(a.as_raw_fd()),
            Err(MuxError::AlreadyRegistered(a.as_raw_fd()))
        );
    }

    #[test]
    fn test_register_invalid_descriptor() {
        let mut backend = EpollBackend::new(4, true).unwrap();
        assert_eq!(backend.register(-1), Err(MuxError::InvalidDescriptor(-1)));
        assert_eq!(backend.register(0), Err(MuxError::InvalidDescriptor(0)));
    }

    #[test]
    fn test_reused_number_can_be_registered_again() {
        let (a, _a_peer) = UnixStream::pair().unwrap();
        let (b, mut b_peer) = UnixStream::pair().unwrap();
        let fd = a.into_raw_fd();
        let mut backend = EpollBackend::new(4, true).unwrap();
        backend.register(fd).unwrap();

        // dup2 closes the first socket and hands its number to `b`.
        assert_eq!(unsafe { libc::dup2(b.as_raw_fd(), fd) }, fd);
        backend.register(fd).unwrap();

        b_peer.write_all(b"x").unwrap();
        let outcome = backend.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(outcome.ready, vec![fd]);
        nix::unistd::close(fd).unwrap();
    }

    #[test]
    fn test_deregister_unknown_descriptor() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut backend = EpollBackend::new(4, true).unwrap();
        assert_eq!(
            backend.deregister(a.as_raw_fd()),
            Err(MuxError::NotRegistered(a.as_raw_fd()))
        );
    }

    #[test]
    fn test_wait_reports_readable_descriptor() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut backend = EpollBackend::new(4, true).unwrap();
        backend.register(a.as_raw_fd()).unwrap();

        let outcome = backend.wait(Some(Duration::ZERO)).unwrap();
        assert!(outcome.is_empty());

        b.write_all(b"x").unwrap();
        let outcome = backend.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(outcome.ready, vec![a.as_raw_fd()]);
        assert!(outcome.hung_up.is_empty());
    }

    #[test]
    fn test_wait_batch_is_bounded_by_capacity() {
        let pairs: Vec<_> = (0..3).map(|_| UnixStream::pair().unwrap()).collect();
        let mut backend = EpollBackend::new(2, true).unwrap();
        for (a, b) in &pairs {
            backend.register(a.as_raw_fd()).unwrap();
            (&*b).write_all(b"x").unwrap();
        }

        let outcome = backend.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(outcome.ready.len(), 2);
    }

    #[test]
    fn test_hangup_deregisters_and_closes() {
        let (a, b) = UnixStream::pair().unwrap();
        let fd = a.into_raw_fd();
        let mut backend = EpollBackend::new(4, true).unwrap();
        backend.register(fd).unwrap();

        drop(b);
        let outcome = backend.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(outcome.ready.is_empty());
        assert_eq!(outcome.hung_up, vec![fd]);
        assert_eq!(unsafe { libc::fcntl(fd, libc::F_GETFD) }, -1);
        assert_eq!(Errno::last(), Errno::EBADF);

        let outcome = backend.wait(Some(Duration::ZERO)).unwrap();
        assert!(outcome.is_empty());
    }

    #[test]
    fn test_hangup_without_close_leaves_descriptor_open() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut backend = EpollBackend::new(4, false).unwrap();
        backend.register(a.as_raw_fd()).unwrap();

        drop(b);
        let outcome = backend.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(outcome.hung_up, vec![a.as_raw_fd()]);
        // Still owned and open: a read reports end of stream rather than EBADF.
        let mut buf = [0u8; 1];
        assert_eq!(std::io::Read::read(&mut &a, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_closed_backend_rejects_operations() {
        let mut backend = EpollBackend::new(4, true).unwrap();
        backend.close();
        backend.close();
        assert!(backend.is_closed());
        assert_eq!(backend.handle(), None);
        assert_eq!(backend.register(3), Err(MuxError::Closed));
        assert_eq!(backend.wait(Some(Duration::ZERO)), Err(MuxError::Closed));
    }
}
