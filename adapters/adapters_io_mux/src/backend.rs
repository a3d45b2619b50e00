//! Readiness Backend Module
//!
//! Defines the polling strategy the dispatch core sits on. A backend owns one
//! poll context, tracks which descriptors are monitored for input, and blocks
//! until a bounded batch of them is readable.
//!
//! Backends classify what the OS reports before the dispatch core sees it:
//! readable descriptors land in [`WaitOutcome::ready`], descriptors that hung
//! up or errored are deregistered (and closed, when configured) and land in
//! [`WaitOutcome::hung_up`]. Nothing else is reported.

use std::time::Duration;

use entities_io_operations::Descriptor;

use crate::mux::MuxError;

/// Result of one blocking wait
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Descriptors readable in this cycle, in the order the OS reported them
    pub ready: Vec<Descriptor>,
    /// Descriptors that reported hang-up or error and were dropped from the
    /// poll context
    pub hung_up: Vec<Descriptor>,
}

impl WaitOutcome {
    /// Outcome with nothing ready, as produced by a timeout or an interrupted wait
    pub fn empty() -> Self {
        Self::default()
    }

    /// Outcome with the given ready descriptors and no hang-ups
    pub fn ready(ready: Vec<Descriptor>) -> Self {
        Self {
            ready,
            hung_up: Vec::new(),
        }
    }

    /// Check whether the wait observed anything at all
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.hung_up.is_empty()
    }
}

/// Platform polling strategy
///
/// Implementations must not block in `register` or `deregister`, and must
/// never report a descriptor less than or equal to zero as ready.
#[cfg_attr(test, mockall::automock)]
pub trait MuxBackend {
    /// Descriptor of the poll context itself, when the primitive has one
    fn handle(&self) -> Option<Descriptor>;

    /// Maximum number of ready descriptors reported by one wait
    fn capacity(&self) -> usize;

    /// Start monitoring `fd` for input
    ///
    /// Registering a descriptor twice fails with `MuxError::AlreadyRegistered`.
    /// A number whose earlier file was closed and reused is a new descriptor
    /// and registers successfully. Descriptors `<= 0` are refused.
    fn register(&mut self, fd: Descriptor) -> Result<(), MuxError>;

    /// Stop monitoring `fd`
    fn deregister(&mut self, fd: Descriptor) -> Result<(), MuxError>;

    /// Block until input is ready, a monitored descriptor hangs up, or the
    /// timeout expires (`None` waits forever)
    ///
    /// An interrupted wait returns an empty outcome rather than an error.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome, MuxError>;

    /// Release the poll context; later calls fail with `MuxError::Closed`
    fn close(&mut self);

    /// Check whether the poll context has been released
    fn is_closed(&self) -> bool;
}

/// Convert a wait timeout to milliseconds, rounding up so short timeouts
/// still sleep
#[cfg(unix)]
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            let millis = t.as_nanos().div_ceil(1_000_000);
            libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
        }
    }
}
