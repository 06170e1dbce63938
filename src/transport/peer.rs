//! Remote peer description.

use crate::core::{NodeId, PUBLIC_KEY_SIZE};

/// Where a session goes and whom it authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer<A> {
    /// Link address datagrams are sent to.
    pub address: A,
    /// Node id written into the destination field of outbound headers.
    pub node_id: Option<NodeId>,
    /// Peer's static public key. The handshake fails unless the peer proves
    /// possession of the matching private key.
    pub static_public_key: [u8; PUBLIC_KEY_SIZE],
}

impl<A> Peer<A> {
    pub fn new(address: A, static_public_key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self {
            address,
            node_id: None,
            static_public_key,
        }
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }
}
