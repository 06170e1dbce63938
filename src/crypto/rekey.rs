//! Rekey policy.
//!
//! A session is due for rekey once it has sent `after_messages` messages or
//! has been established for `after_time`, whichever comes first. Rekeying
//! itself is a fresh handshake driven by the transport; the old session stays
//! usable until the new one is confirmed.

use std::time::Duration;

use crate::core::{DEFAULT_REKEY_AFTER_MESSAGES, DEFAULT_REKEY_AFTER_TIME};

/// When to replace a session's keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyPolicy {
    /// Rekey after this many sends. `None` disables the count trigger.
    pub after_messages: Option<u32>,
    /// Rekey after this much time. `None` disables the time trigger.
    pub after_time: Option<Duration>,
}

impl RekeyPolicy {
    /// Never rekey.
    pub fn disabled() -> Self {
        Self {
            after_messages: None,
            after_time: None,
        }
    }

    /// Set the message-count threshold.
    pub fn with_after_messages(mut self, messages: u32) -> Self {
        self.after_messages = Some(messages);
        self
    }

    /// Set the elapsed-time threshold.
    pub fn with_after_time(mut self, after: Duration) -> Self {
        self.after_time = Some(after);
        self
    }

    /// Whether a session with this usage is due for new keys.
    pub fn is_due(&self, messages_sent: u64, age: Duration) -> bool {
        let messages_exceeded = self
            .after_messages
            .is_some_and(|limit| messages_sent >= u64::from(limit));
        let time_exceeded = self.after_time.is_some_and(|limit| age >= limit);
        messages_exceeded || time_exceeded
    }
}

impl Default for RekeyPolicy {
    fn default() -> Self {
        Self {
            after_messages: Some(DEFAULT_REKEY_AFTER_MESSAGES),
            after_time: Some(DEFAULT_REKEY_AFTER_TIME),
        }
    }
}
