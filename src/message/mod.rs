//! Message framing: packet header codec and in-payload header.

mod error;
mod header;
mod payload;

pub use error::HeaderError;
pub use header::{MessageFlags, PacketHeader};
pub use payload::{ExchangeFlags, MessageType, PayloadHeader};
