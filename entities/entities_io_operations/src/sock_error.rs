//! Socket Error Flags
//!
//! Sockets are set up in stages (create, bind, connect, listen). Each stage
//! that fails leaves a bit in a `SockErrorFlags` value so the owner can see
//! every stage that went wrong, not only the last one.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign};

/// Accumulated socket setup failures
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SockErrorFlags(u32);

impl SockErrorFlags {
    /// No failure recorded
    pub const NONE: Self = Self(0);
    /// Socket creation failed
    pub const SOCKET: Self = Self(1 << 0);
    /// Binding to a local address failed
    pub const BIND: Self = Self(1 << 1);
    /// Connecting to a peer failed
    pub const CONNECT: Self = Self(1 << 2);
    /// Switching to listening mode failed
    pub const LISTEN: Self = Self(1 << 3);
    /// Socket path is invalid (too long or unusable)
    pub const PATH_INVALID: Self = Self(1 << 4);
    /// Setting a socket option failed
    pub const SOCKET_OPTION: Self = Self(1 << 5);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::SOCKET, "SOCKET"),
        (Self::BIND, "BIND"),
        (Self::CONNECT, "CONNECT"),
        (Self::LISTEN, "LISTEN"),
        (Self::PATH_INVALID, "PATH_INVALID"),
        (Self::SOCKET_OPTION, "SOCKET_OPTION"),
    ];

    /// Create an empty flag set
    pub const fn new() -> Self {
        Self::NONE
    }

    /// Add a flag
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    /// Check if every bit of `flag` is set
    pub const fn contains(self, flag: Self) -> bool {
        flag.0 != 0 && (self.0 & flag.0) == flag.0
    }

    /// Check whether no failure has been recorded
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Get raw value
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for SockErrorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SockErrorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SockErrorFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for SockErrorFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl fmt::Debug for SockErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SockErrorFlags({})", self)
    }
}

impl fmt::Display for SockErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}
