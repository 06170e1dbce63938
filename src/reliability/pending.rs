//! Pending Exchanges and retransmission bookkeeping.
//!
//! The queue only decides *what* to do; the transport performs the sends and
//! owns timer registration through the scheduler.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::core::{MessageHandle, SessionId, TimerHandle};

use super::RetryPolicy;

/// An outbound message awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingExchange {
    pub handle: MessageHandle,
    pub session_id: SessionId,
    pub counter: u32,
    /// Sealed datagram, resent verbatim.
    pub datagram: Vec<u8>,
    pub retry_count: u32,
    /// Next time a retransmission is due.
    pub deadline: Instant,
    /// Timer armed for `deadline`, if any.
    pub timer: Option<TimerHandle>,
}

/// What to do when a retransmission timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Resend `datagram` and re-arm the timer after `next_delay`.
    Resend {
        datagram: Vec<u8>,
        next_delay: Duration,
    },
    /// Timer fired early; re-arm after `remaining`.
    NotYet { remaining: Duration },
    /// Retry budget exhausted. The exchange has been removed.
    Exhausted { handle: MessageHandle },
}

/// All Pending Exchanges across sessions.
#[derive(Debug)]
pub struct RetransmitQueue {
    policy: RetryPolicy,
    pending: HashMap<(SessionId, u32), PendingExchange>,
    next_handle: u64,
}

impl RetransmitQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Allocate a handle for any outbound message.
    pub fn allocate_handle(&mut self) -> MessageHandle {
        let handle = MessageHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Track a message that requires acknowledgment.
    ///
    /// Returns the delay before the first retransmission is due.
    pub fn register(
        &mut self,
        handle: MessageHandle,
        session_id: SessionId,
        counter: u32,
        datagram: Vec<u8>,
        now: Instant,
    ) -> Duration {
        let delay = self.policy.interval_after(0);
        trace!(%handle, %session_id, counter, ?delay, "pending exchange registered");
        self.pending.insert(
            (session_id, counter),
            PendingExchange {
                handle,
                session_id,
                counter,
                datagram,
                retry_count: 0,
                deadline: now + delay,
                timer: None,
            },
        );
        delay
    }

    /// Remember the timer armed for an exchange.
    pub fn set_timer(&mut self, session_id: SessionId, counter: u32, timer: TimerHandle) {
        if let Some(exchange) = self.pending.get_mut(&(session_id, counter)) {
            exchange.timer = Some(timer);
        }
    }

    /// An acknowledgment arrived. Unknown counters are ignored.
    pub fn on_ack(&mut self, session_id: SessionId, counter: u32) -> Option<PendingExchange> {
        let exchange = self.pending.remove(&(session_id, counter))?;
        trace!(handle = %exchange.handle, %session_id, counter, "exchange acknowledged");
        Some(exchange)
    }

    /// A retransmission timer fired.
    ///
    /// Returns `None` if the exchange is already gone.
    pub fn on_timer(
        &mut self,
        session_id: SessionId,
        counter: u32,
        now: Instant,
    ) -> Option<RetryAction> {
        let key = (session_id, counter);
        let exchange = self.pending.get_mut(&key)?;
        exchange.timer = None;

        if now < exchange.deadline {
            return Some(RetryAction::NotYet {
                remaining: exchange.deadline - now,
            });
        }

        if exchange.retry_count >= self.policy.max_retries {
            let handle = exchange.handle;
            self.pending.remove(&key);
            return Some(RetryAction::Exhausted { handle });
        }

        exchange.retry_count += 1;
        let next_delay = self.policy.interval_after(exchange.retry_count);
        exchange.deadline = now + next_delay;
        trace!(
            handle = %exchange.handle,
            %session_id,
            counter,
            retry = exchange.retry_count,
            ?next_delay,
            "retransmitting"
        );
        Some(RetryAction::Resend {
            datagram: exchange.datagram.clone(),
            next_delay,
        })
    }

    /// Remove every exchange belonging to a session.
    pub fn cancel_session(&mut self, session_id: SessionId) -> Vec<PendingExchange> {
        let keys: Vec<_> = self
            .pending
            .keys()
            .filter(|(sid, _)| *sid == session_id)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect()
    }

    pub fn pending_for(&self, session_id: SessionId) -> usize {
        self.pending
            .keys()
            .filter(|(sid, _)| *sid == session_id)
            .count()
    }

    pub fn get(&self, session_id: SessionId, counter: u32) -> Option<&PendingExchange> {
        self.pending.get(&(session_id, counter))
    }

    /// Earliest retransmission deadline across all exchanges.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|e| e.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
