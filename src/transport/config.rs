//! Transport configuration.

use std::time::Duration;

use crate::core::{
    DEFAULT_ACK_DELAY, DEFAULT_DUPLICATE_WINDOW_SIZE, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_PENDING_HANDSHAKES, NodeId,
};
use crate::crypto::RekeyPolicy;
use crate::reliability::RetryPolicy;

/// Secure transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Node id written into the source field of outbound headers.
    pub local_node_id: Option<NodeId>,

    /// Retransmission schedule for reliable messages.
    pub retry: RetryPolicy,

    /// When initiator-side sessions are replaced by a fresh handshake.
    pub rekey: RekeyPolicy,

    /// Counters remembered per session for duplicate suppression. Also the
    /// replay bound below the highest authenticated counter.
    pub duplicate_window_size: usize,

    /// Time a handshake may take before it fails with `Timeout`.
    pub handshake_timeout: Duration,

    /// Handshakes a peer may have open against us before new inits are dropped.
    pub max_pending_handshakes: usize,

    /// How long an acknowledgment waits for an outbound message to ride on.
    pub ack_delay: Duration,

    /// Largest datagram the transport will hand to the link.
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            local_node_id: None,
            retry: RetryPolicy::default(),
            rekey: RekeyPolicy::default(),
            duplicate_window_size: DEFAULT_DUPLICATE_WINDOW_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_pending_handshakes: DEFAULT_MAX_PENDING_HANDSHAKES,
            ack_delay: DEFAULT_ACK_DELAY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl TransportConfig {
    /// Start from the defaults.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
        }
    }

    /// Set the local node id.
    pub fn local_node_id(mut self, node_id: NodeId) -> Self {
        self.config.local_node_id = Some(node_id);
        self
    }

    /// Set the retransmission schedule.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set the rekey policy.
    pub fn rekey_policy(mut self, policy: RekeyPolicy) -> Self {
        self.config.rekey = policy;
        self
    }

    /// Set the duplicate window size. Clamped to at least one.
    pub fn duplicate_window_size(mut self, size: usize) -> Self {
        self.config.duplicate_window_size = size.max(1);
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the responder handshake limit. Clamped to at least one.
    pub fn max_pending_handshakes(mut self, limit: usize) -> Self {
        self.config.max_pending_handshakes = limit.max(1);
        self
    }

    /// Set the standalone acknowledgment delay.
    pub fn ack_delay(mut self, delay: Duration) -> Self {
        self.config.ack_delay = delay;
        self
    }

    /// Set the datagram size limit.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

impl Default for TransportConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
