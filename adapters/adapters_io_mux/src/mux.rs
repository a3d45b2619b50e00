//! I/O Multiplexer Module
//!
//! The event dispatch core: owns the interest set and the descriptor to
//! handler bindings, and turns readiness reported by a [`MuxBackend`] into
//! synchronous handler calls.
//!
//! ## Overview
//!
//! A multiplexer is built once around one poll context. Callers register
//! descriptors with [`IoMultiplexer::add`], bind labeled callbacks with
//! [`IoMultiplexer::bind_event`], and drive the loop with
//! [`IoMultiplexer::listen`]. Each ready descriptor that has a binding is
//! passed to its callback together with the message
//! `"iomux event triggered: " + label`.
//!
//! Registration and binding are independent. A bound descriptor that was
//! never added is simply never dispatched; an added descriptor with no
//! binding is counted as ready but otherwise ignored.
//!
//! Handlers may close their own descriptor. The stale entry is noticed when
//! the number is added again: if the backend accepts the registration, the
//! number now refers to a new file and the old binding is dropped.
//!
//! ## Hang-ups
//!
//! Descriptors reporting hang-up or error are removed from the poll context
//! by the backend, closed when [`MuxConfig::close_on_hangup`] is set, and then
//! dropped from the interest set and unbound here. They are queued for
//! [`IoMultiplexer::take_removed`] so callers can tell "closed" apart from
//! "nothing happened".
//!
//! ## Threading
//!
//! A multiplexer is used from one thread. The only cross-thread entry point
//! is a [`Waker`] obtained from [`IoMultiplexer::waker`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::time::Duration;

use entities_io_operations::{is_valid_descriptor, Descriptor};
use nix::errno::Errno;

use crate::backend::MuxBackend;
use crate::waker::{MuxWaker, Waker};

#[cfg(any(target_os = "linux", target_os = "android"))]
/// Backend used by [`IoMultiplexer::new`]
pub type DefaultBackend = crate::epoll::EpollBackend;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
/// Backend used by [`IoMultiplexer::new`]
pub type DefaultBackend = crate::poll::PollBackend;

/// Prefix of the message passed to every handler
pub const EVENT_MESSAGE_PREFIX: &str = "iomux event triggered: ";

/// Default number of ready descriptors reported per wait
pub const DEFAULT_MAX_EVENTS: usize = 10;

/// Multiplexer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// Descriptor, file or memory limit reached while creating a poll context
    ResourceExhausted(Errno),
    /// Creating a poll context was refused
    PermissionDenied(Errno),
    /// Creating a poll context failed for another reason
    CreateFailed(Errno),
    /// Descriptor is negative or not open
    InvalidDescriptor(Descriptor),
    /// Descriptor is already in the interest set
    AlreadyRegistered(Descriptor),
    /// Descriptor is not in the interest set
    NotRegistered(Descriptor),
    /// The poll context refused the descriptor
    RegistrationFailed { fd: Descriptor, errno: Errno },
    /// The polling primitive failed
    WaitFailed(Errno),
    /// The poll context has been closed
    Closed,
    /// The wake channel failed
    Waker(String),
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxError::ResourceExhausted(e) => write!(f, "poll context resources exhausted: {}", e),
            MuxError::PermissionDenied(e) => write!(f, "poll context creation denied: {}", e),
            MuxError::CreateFailed(e) => write!(f, "poll context creation failed: {}", e),
            MuxError::InvalidDescriptor(fd) => write!(f, "invalid descriptor {}", fd),
            MuxError::AlreadyRegistered(fd) => write!(f, "descriptor {} already registered", fd),
            MuxError::NotRegistered(fd) => write!(f, "descriptor {} not registered", fd),
            MuxError::RegistrationFailed { fd, errno } => {
                write!(f, "registering descriptor {} failed: {}", fd, errno)
            }
            MuxError::WaitFailed(e) => write!(f, "wait for readiness failed: {}", e),
            MuxError::Closed => write!(f, "poll context is closed"),
            MuxError::Waker(msg) => write!(f, "wake channel error: {}", msg),
        }
    }
}

impl std::error::Error for MuxError {}

/// Classifies the error of a failed poll context allocation
impl From<Errno> for MuxError {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EMFILE | Errno::ENFILE | Errno::ENOMEM | Errno::ENOSPC => {
                MuxError::ResourceExhausted(errno)
            }
            Errno::EACCES | Errno::EPERM => MuxError::PermissionDenied(errno),
            errno => MuxError::CreateFailed(errno),
        }
    }
}

/// Plain I/O errors only arise on the wake channel
impl From<io::Error> for MuxError {
    fn from(err: io::Error) -> Self {
        MuxError::Waker(err.to_string())
    }
}

/// Multiplexer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxConfig {
    /// Maximum number of ready descriptors reported per wait (at least 1)
    pub max_events: usize,
    /// Wait timeout used by `listen()`; `None` blocks until something happens
    pub timeout: Option<Duration>,
    /// Close descriptors that hang up or error
    pub close_on_hangup: bool,
}

impl MuxConfig {
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_close_on_hangup(mut self, close_on_hangup: bool) -> Self {
        self.close_on_hangup = close_on_hangup;
        self
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            timeout: None,
            close_on_hangup: true,
        }
    }
}

/// Counters accumulated over the lifetime of a multiplexer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// Completed `listen()` cycles
    pub cycles: u64,
    /// Ready descriptors reported, summed over all cycles
    pub ready: u64,
    /// Handler invocations
    pub dispatched: u64,
    /// Ready descriptors that had no handler
    pub unhandled: u64,
    /// Descriptors removed after a hang-up or error
    pub hung_up: u64,
}

type Callback = Box<dyn FnMut(Descriptor, &str) + Send>;

/// A callback together with the label reported when it fires
pub struct LabeledHandler {
    label: String,
    callback: Callback,
}

impl LabeledHandler {
    pub fn new<F>(label: impl Into<String>, callback: F) -> Self
    where
        F: FnMut(Descriptor, &str) + Send + 'static,
    {
        Self {
            label: label.into(),
            callback: Box::new(callback),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Message passed to the callback
    pub fn message(&self) -> String {
        format!("{}{}", EVENT_MESSAGE_PREFIX, self.label)
    }

    fn invoke(&mut self, fd: Descriptor) {
        let message = self.message();
        (self.callback)(fd, &message);
    }
}

impl fmt::Debug for LabeledHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabeledHandler")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Readiness multiplexer dispatching to labeled handlers
pub struct IoMultiplexer<B: MuxBackend = DefaultBackend> {
    backend: B,
    config: MuxConfig,
    interest: BTreeSet<Descriptor>,
    handlers: HashMap<Descriptor, LabeledHandler>,
    removed: Vec<Descriptor>,
    waker: Option<MuxWaker>,
    stats: MuxStats,
}

impl IoMultiplexer<DefaultBackend> {
    /// Create a multiplexer on the platform's default backend
    ///
    /// # Errors
    ///
    /// Creation errors of the poll context (`ResourceExhausted`,
    /// `PermissionDenied`, `CreateFailed`).
    pub fn new() -> Result<Self, MuxError> {
        Self::with_config(MuxConfig::default())
    }

    /// Create a multiplexer on the default backend with custom configuration
    pub fn with_config(config: MuxConfig) -> Result<Self, MuxError> {
        let backend = DefaultBackend::new(config.max_events, config.close_on_hangup)?;
        Ok(Self::with_backend_config(backend, config))
    }
}

impl<B: MuxBackend> IoMultiplexer<B> {
    /// Create a multiplexer around an existing backend
    pub fn with_backend(backend: B) -> Self {
        Self::with_backend_config(backend, MuxConfig::default())
    }

    /// Create a multiplexer around an existing backend with custom configuration
    ///
    /// `max_events` and `close_on_hangup` describe the backend; they are
    /// kept for reporting and do not reconfigure it.
    pub fn with_backend_config(backend: B, config: MuxConfig) -> Self {
        log::debug!(
            "multiplexer created (listener {:?}, capacity {})",
            backend.handle(),
            backend.capacity()
        );
        Self {
            backend,
            config,
            interest: BTreeSet::new(),
            handlers: HashMap::new(),
            removed: Vec::new(),
            waker: None,
            stats: MuxStats::default(),
        }
    }

    /// Register `fd` for readiness monitoring
    ///
    /// # Returns
    ///
    /// `false` if the descriptor is invalid (negative or zero), already
    /// registered, refused by the backend, or the multiplexer is closed. State
    /// is unchanged on failure.
    pub fn add(&mut self, fd: Descriptor) -> bool {
        match self.try_add(fd) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("add({}) failed: {}", fd, e);
                false
            }
        }
    }

    /// Register `fd` for readiness monitoring, reporting why it failed
    pub fn try_add(&mut self, fd: Descriptor) -> Result<(), MuxError> {
        if self.backend.is_closed() {
            return Err(MuxError::Closed);
        }
        // Zero is never reported as ready, so it cannot be monitored.
        if !is_valid_descriptor(fd) || fd == 0 {
            return Err(MuxError::InvalidDescriptor(fd));
        }
        if self.wake_descriptor() == Some(fd) {
            return Err(MuxError::AlreadyRegistered(fd));
        }
        self.backend.register(fd)?;
        if !self.interest.insert(fd) {
            log::debug!("descriptor {} was closed and reused", fd);
            if let Some(old) = self.handlers.remove(&fd) {
                log::debug!("dropped stale handler '{}' from descriptor {}", old.label(), fd);
            }
        }
        Ok(())
    }

    /// Stop monitoring `fd` and drop its handler
    ///
    /// # Returns
    ///
    /// `true` if the descriptor was registered or bound.
    pub fn remove(&mut self, fd: Descriptor) -> bool {
        let registered = self.interest.remove(&fd);
        if registered && !self.backend.is_closed() {
            if let Err(e) = self.backend.deregister(fd) {
                log::warn!("failed to deregister descriptor {}: {}", fd, e);
            }
        }
        let bound = self.handlers.remove(&fd).is_some();
        registered || bound
    }

    /// Bind a labeled callback to `fd`, replacing any existing binding
    pub fn bind_event<F>(&mut self, fd: Descriptor, label: impl Into<String>, callback: F)
    where
        F: FnMut(Descriptor, &str) + Send + 'static,
    {
        self.bind_labeled(fd, LabeledHandler::new(label, callback));
    }

    /// Bind a prepared handler to `fd`, replacing any existing binding
    pub fn bind_labeled(&mut self, fd: Descriptor, handler: LabeledHandler) {
        log::debug!("bound handler '{}' to descriptor {}", handler.label(), fd);
        if let Some(old) = self.handlers.insert(fd, handler) {
            log::debug!("replaced handler '{}' on descriptor {}", old.label(), fd);
        }
    }

    /// Drop the handler bound to `fd`; the descriptor stays registered
    pub fn unbind(&mut self, fd: Descriptor) -> bool {
        self.handlers.remove(&fd).is_some()
    }

    /// Run one dispatch cycle with the configured timeout
    ///
    /// # Returns
    ///
    /// The number of ready descriptors reported by the backend in this cycle,
    /// whether or not they had a handler. A timeout, an interrupted wait or a
    /// cycle that only saw hang-ups or wakeups returns `Ok(0)`.
    pub fn listen(&mut self) -> Result<usize, MuxError> {
        self.listen_timeout(self.config.timeout)
    }

    /// Run one dispatch cycle, waiting at most `timeout` (`None` blocks)
    pub fn listen_timeout(&mut self, timeout: Option<Duration>) -> Result<usize, MuxError> {
        if self.backend.is_closed() {
            return Err(MuxError::Closed);
        }
        let outcome = self.backend.wait(timeout)?;
        self.stats.cycles += 1;

        for fd in outcome.hung_up {
            self.interest.remove(&fd);
            if let Some(handler) = self.handlers.remove(&fd) {
                log::debug!("unbound handler '{}' from hung-up descriptor {}", handler.label(), fd);
            }
            log::debug!("descriptor {} hung up and was removed", fd);
            self.removed.push(fd);
            self.stats.hung_up += 1;
        }

        let wake_fd = self.wake_descriptor();
        let mut ready = 0;
        for fd in outcome.ready {
            if Some(fd) == wake_fd {
                if let Some(waker) = &self.waker {
                    waker.drain();
                }
                continue;
            }
            ready += 1;
            match self.handlers.get_mut(&fd) {
                Some(handler) => {
                    log::debug!("dispatching descriptor {} to '{}'", fd, handler.label());
                    handler.invoke(fd);
                    self.stats.dispatched += 1;
                }
                None => {
                    log::trace!("descriptor {} ready without a handler", fd);
                    self.stats.unhandled += 1;
                }
            }
        }
        self.stats.ready += ready as u64;
        Ok(ready)
    }

    /// Dispatch until a [`Waker::stop`] request arrives
    ///
    /// Call [`waker`](Self::waker) first; without a waker the loop only ends
    /// on error.
    pub fn run(&mut self) -> Result<(), MuxError> {
        loop {
            if self.take_stop() {
                log::debug!("multiplexer loop stopped");
                return Ok(());
            }
            self.listen()?;
        }
    }

    /// Get a handle that can interrupt `listen()` from another thread
    ///
    /// The wake channel is created and registered on first use; every call
    /// returns a handle to the same channel.
    pub fn waker(&mut self) -> Result<Waker, MuxError> {
        if let Some(waker) = &self.waker {
            return Ok(waker.handle());
        }
        if self.backend.is_closed() {
            return Err(MuxError::Closed);
        }
        let waker = MuxWaker::new()?;
        self.backend.register(waker.descriptor())?;
        log::debug!("wake channel registered on descriptor {}", waker.descriptor());
        let handle = waker.handle();
        self.waker = Some(waker);
        Ok(handle)
    }

    /// Drain the descriptors removed after hang-ups since the last call
    pub fn take_removed(&mut self) -> Vec<Descriptor> {
        std::mem::take(&mut self.removed)
    }

    pub fn is_registered(&self, fd: Descriptor) -> bool {
        self.interest.contains(&fd)
    }

    pub fn has_handler(&self, fd: Descriptor) -> bool {
        self.handlers.contains_key(&fd)
    }

    /// Registered descriptors in ascending order
    pub fn interest_set(&self) -> Vec<Descriptor> {
        self.interest.iter().copied().collect()
    }

    /// Descriptor of the underlying poll context, if it has one
    pub fn listener_handle(&self) -> Option<Descriptor> {
        self.backend.handle()
    }

    /// Release the poll context, the wake channel and all bindings
    ///
    /// Registered descriptors stay open. Afterwards `add` returns `false` and
    /// `listen` fails with [`MuxError::Closed`].
    pub fn close(&mut self) {
        if self.backend.is_closed() {
            return;
        }
        self.backend.close();
        self.interest.clear();
        self.handlers.clear();
        self.waker = None;
        log::debug!("multiplexer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_closed()
    }

    pub fn stats(&self) -> MuxStats {
        self.stats
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn wake_descriptor(&self) -> Option<Descriptor> {
        self.waker.as_ref().map(MuxWaker::descriptor)
    }

    fn take_stop(&self) -> bool {
        self.waker.as_ref().is_some_and(MuxWaker::take_stop)
    }
}

impl<B: MuxBackend> fmt::Debug for IoMultiplexer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoMultiplexer")
            .field("listener", &self.backend.handle())
            .field("interest", &self.interest)
            .field("handlers", &self.handlers.len())
            .field("closed", &self.backend.is_closed())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockMuxBackend, WaitOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn open_mock() -> MockMuxBackend {
        let mut mock = MockMuxBackend::new();
        mock.expect_is_closed().return_const(false);
        mock.expect_handle().return_const(Some(3));
        mock.expect_capacity().return_const(DEFAULT_MAX_EVENTS);
        mock
    }

    fn scripted_waits(mock: &mut MockMuxBackend, script: Vec<WaitOutcome>) {
        let mut script = script.into_iter();
        mock.expect_wait()
            .returning(move |_| Ok(script.next().unwrap_or_else(WaitOutcome::empty)));
    }

    fn recorder() -> (Arc<Mutex<Vec<(Descriptor, String)>>>, impl FnMut(Descriptor, &str) + Send) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |fd, msg: &str| {
            sink.lock().unwrap().push((fd, msg.to_string()))
        })
    }

    #[test]
    fn test_mux_config_default() {
        let config = MuxConfig::default();
        assert_eq!(config.max_events, 10);
        assert_eq!(config.timeout, None);
        assert!(config.close_on_hangup);

        let config = MuxConfig::default()
            .with_max_events(0)
            .with_timeout(Some(Duration::from_millis(5)))
            .with_close_on_hangup(false);
        assert_eq!(config.max_events, 1);
        assert_eq!(config.timeout, Some(Duration::from_millis(5)));
        assert!(!config.close_on_hangup);
    }

    #[test]
    fn test_add_registers_once() {
        let mut mock = open_mock();
        let mut registered = false;
        mock.expect_register().times(3).returning(move |fd| {
            if std::mem::replace(&mut registered, true) {
                Err(MuxError::AlreadyRegistered(fd))
            } else {
                Ok(())
            }
        });
        let mut mux = IoMultiplexer::with_backend(mock);

        assert!(mux.add(7));
        assert!(!mux.add(7));
        assert_eq!(mux.try_add(7), Err(MuxError::AlreadyRegistered(7)));
        assert_eq!(mux.interest_set(), vec![7]);
    }

    #[test]
    fn test_add_of_reused_number_drops_stale_handler() {
        let mut mock = open_mock();
        mock.expect_register().times(2).returning(|_| Ok(()));
        let mut mux = IoMultiplexer::with_backend(mock);

        assert!(mux.add(7));
        mux.bind_event(7, "old", |_, _| {});

        // The backend accepts 7 again: the old file was closed and the number reused.
        assert!(mux.add(7));
        assert!(!mux.has_handler(7));
        assert_eq!(mux.interest_set(), vec![7]);
    }

    #[test]
    fn test_add_rejects_descriptor_zero() {
        let mut mux = IoMultiplexer::with_backend(open_mock());
        assert_eq!(mux.try_add(0), Err(MuxError::InvalidDescriptor(0)));
        assert!(mux.interest_set().is_empty());
    }

    #[test]
    fn test_failed_add_leaves_state_unchanged() {
        let mut mock = open_mock();
        mock.expect_register().returning(|fd| {
            Err(MuxError::RegistrationFailed {
                fd,
                errno: Errno::EPERM,
            })
        });
        let mut mux = IoMultiplexer::with_backend(mock);

        assert!(!mux.add(-1));
        assert!(!mux.add(8));
        assert!(mux.interest_set().is_empty());
        assert!(!mux.is_registered(8));
    }

    #[test]
    fn test_dispatch_invokes_bound_handler_once() {
        let mut mock = open_mock();
        mock.expect_register().returning(|_| Ok(()));
        scripted_waits(&mut mock, vec![WaitOutcome::ready(vec![5])]);
        let mut mux = IoMultiplexer::with_backend(mock);

        let (calls, handler) = recorder();
        assert!(mux.add(5));
        mux.bind_event(5, "listener", handler);

        assert_eq!(mux.listen().unwrap(), 1);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(5, "iomux event triggered: listener".to_string())]
        );
    }

    #[test]
    fn test_ready_without_handler_is_counted_silently() {
        let mut mock = open_mock();
        scripted_waits(&mut mock, vec![WaitOutcome::ready(vec![4, 6, 9])]);
        let mut mux = IoMultiplexer::with_backend(mock);

        let (calls, handler) = recorder();
        mux.bind_event(6, "only-six", handler);

        assert_eq!(mux.listen().unwrap(), 3);
        assert_eq!(calls.lock().unwrap().len(), 1);

        let stats = mux.stats();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.ready, 3);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.unhandled, 2);
    }

    #[test]
    fn test_dispatch_follows_ready_order() {
        let mut mock = open_mock();
        scripted_waits(&mut mock, vec![WaitOutcome::ready(vec![9, 4, 6])]);
        let mut mux = IoMultiplexer::with_backend(mock);

        let (calls, _) = recorder();
        for fd in [4, 6, 9] {
            let sink = Arc::clone(&calls);
            mux.bind_event(fd, format!("fd{}", fd), move |fd, msg| {
                sink.lock().unwrap().push((fd, msg.to_string()))
            });
        }

        assert_eq!(mux.listen().unwrap(), 3);
        let order: Vec<Descriptor> = calls.lock().unwrap().iter().map(|(fd, _)| *fd).collect();
        assert_eq!(order, vec![9, 4, 6]);
    }

    #[test]
    fn test_hangup_unbinds_and_reports() {
        let mut mock = open_mock();
        mock.expect_register().returning(|_| Ok(()));
        scripted_waits(
            &mut mock,
            vec![WaitOutcome {
                ready: vec![],
                hung_up: vec![5],
            }],
        );
        let mut mux = IoMultiplexer::with_backend(mock);

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        assert!(mux.add(5));
        mux.bind_event(5, "peer", move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(mux.listen().unwrap(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!mux.is_registered(5));
        assert!(!mux.has_handler(5));
        assert_eq!(mux.take_removed(), vec![5]);
        assert!(mux.take_removed().is_empty());
        assert_eq!(mux.stats().hung_up, 1);
    }

    #[test]
    fn test_bind_event_replaces_existing_handler() {
        let mut mock = open_mock();
        scripted_waits(&mut mock, vec![WaitOutcome::ready(vec![5])]);
        let mut mux = IoMultiplexer::with_backend(mock);

        let (first_calls, first) = recorder();
        let (second_calls, second) = recorder();
        mux.bind_event(5, "first", first);
        mux.bind_event(5, "second", second);

        mux.listen().unwrap();
        assert!(first_calls.lock().unwrap().is_empty());
        assert_eq!(second_calls.lock().unwrap()[0].1, "iomux event triggered: second");
    }

    #[test]
    fn test_unbind_and_remove() {
        let mut mock = open_mock();
        mock.expect_register().returning(|_| Ok(()));
        mock.expect_deregister().times(1).returning(|_| Ok(()));
        let mut mux = IoMultiplexer::with_backend(mock);

        assert!(mux.add(5));
        mux.bind_event(5, "a", |_, _| {});
        assert!(mux.unbind(5));
        assert!(!mux.unbind(5));
        assert!(mux.is_registered(5));

        mux.bind_event(5, "b", |_, _| {});
        assert!(mux.remove(5));
        assert!(!mux.is_registered(5));
        assert!(!mux.has_handler(5));
        assert!(!mux.remove(5));
    }

    #[test]
    fn test_wait_error_propagates() {
        let mut mock = open_mock();
        mock.expect_wait()
            .returning(|_| Err(MuxError::WaitFailed(Errno::EBADF)));
        let mut mux = IoMultiplexer::with_backend(mock);

        assert_eq!(mux.listen(), Err(MuxError::WaitFailed(Errno::EBADF)));
        assert_eq!(mux.stats().cycles, 0);
    }

    #[test]
    fn test_listen_passes_configured_timeout() {
        let mut mock = open_mock();
        mock.expect_wait()
            .withf(|timeout| *timeout == Some(Duration::from_millis(20)))
            .times(1)
            .returning(|_| Ok(WaitOutcome::empty()));
        let config = MuxConfig::default().with_timeout(Some(Duration::from_millis(20)));
        let mut mux = IoMultiplexer::with_backend_config(mock, config);

        assert_eq!(mux.listen().unwrap(), 0);
    }

    #[test]
    fn test_closed_backend_is_reported() {
        let mut mock = MockMuxBackend::new();
        mock.expect_is_closed().return_const(true);
        mock.expect_handle().return_const(None::<Descriptor>);
        mock.expect_capacity().return_const(1usize);
        let mut mux = IoMultiplexer::with_backend(mock);

        assert!(!mux.add(5));
        assert_eq!(mux.try_add(5), Err(MuxError::Closed));
        assert_eq!(mux.listen(), Err(MuxError::Closed));
        assert_eq!(mux.listener_handle(), None);
        assert!(matches!(mux.waker(), Err(MuxError::Closed)));
    }

    #[test]
    fn test_listener_handle_comes_from_backend() {
        let mux = IoMultiplexer::with_backend(open_mock());
        assert_eq!(mux.listener_handle(), Some(3));
    }

    #[test]
    fn test_errno_classification() {
        assert_eq!(MuxError::from(Errno::EMFILE), MuxError::ResourceExhausted(Errno::EMFILE));
        assert_eq!(MuxError::from(Errno::ENOMEM), MuxError::ResourceExhausted(Errno::ENOMEM));
        assert_eq!(MuxError::from(Errno::EPERM), MuxError::PermissionDenied(Errno::EPERM));
        assert_eq!(MuxError::from(Errno::EINVAL), MuxError::CreateFailed(Errno::EINVAL));
    }

    #[test]
    fn test_mux_error_display() {
        assert_eq!(MuxError::InvalidDescriptor(-1).to_string(), "invalid descriptor -1");
        assert_eq!(MuxError::Closed.to_string(), "poll context is closed");
        let err = MuxError::RegistrationFailed {
            fd: 4,
            errno: Errno::EPERM,
        };
        assert!(err.to_string().starts_with("registering descriptor 4 failed"));
    }

    #[test]
    fn test_labeled_handler_message() {
        let handler = LabeledHandler::new("client", |_, _| {});
        assert_eq!(handler.label(), "client");
        assert_eq!(handler.message(), "iomux event triggered: client");
    }
}
