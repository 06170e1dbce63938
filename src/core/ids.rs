//! Identifier newtypes shared across layers.

use std::fmt;

use super::UNSECURED_SESSION_ID;

/// Session identifier carried in every packet header (16-bit, LE on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u16);

impl SessionId {
    /// The unsecured session used for handshake traffic.
    pub const UNSECURED: Self = Self(UNSECURED_SESSION_ID);

    /// Create a session ID from its raw value.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Whether this is the unsecured session.
    pub const fn is_unsecured(self) -> bool {
        self.0 == UNSECURED_SESSION_ID
    }

    /// Little-endian wire bytes.
    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl From<u16> for SessionId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Node identifier (64-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Application-facing handle for a logical session.
///
/// A handle survives rekeying: the session identifier underneath may change,
/// the handle does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub(crate) u64);

impl SessionHandle {
    /// Raw handle value (for logging).
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Handle returned for every outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageHandle(pub(crate) u64);

impl MessageHandle {
    /// Raw handle value (for logging).
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message#{}", self.0)
    }
}

/// Cancelable handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);
