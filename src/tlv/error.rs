//! TLV codec errors.
//!
//! Every variant is a malformed-encoding condition: receivers drop the message
//! without responding.

use thiserror::Error;

use super::Tag;

/// TLV encode/decode errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlvError {
    /// Input ended in the middle of an element or container.
    #[error("truncated TLV input")]
    Truncated,

    /// A length prefix points past the end of the buffer.
    #[error("length {declared} exceeds remaining {remaining} bytes")]
    LengthExceedsBuffer {
        /// Declared length.
        declared: u64,
        /// Bytes actually left.
        remaining: usize,
    },

    /// Reserved element type or a tagged end-of-container.
    #[error("invalid control byte 0x{0:02x}")]
    InvalidControlByte(u8),

    /// End-of-container with no open container.
    #[error("end of container without matching start")]
    UnmatchedEndOfContainer,

    /// Two members of one structure share a tag.
    #[error("duplicate tag {0:?} in structure")]
    DuplicateTag(Tag),

    /// Tag form not allowed here (anonymous structure member, tagged array member).
    #[error("tag {0:?} not allowed in this container")]
    InvalidTag(Tag),

    /// UTF-8 string element with invalid contents.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Containers nested too deeply.
    #[error("container nesting too deep")]
    DepthExceeded,

    /// Bytes left over after the top-level element.
    #[error("trailing bytes after element")]
    TrailingBytes,

    /// Writer finished with containers still open.
    #[error("unbalanced container")]
    UnbalancedContainer,

    /// `enter_container` called when the current element is not a container.
    #[error("current element is not a container")]
    NotAContainer,

    /// `exit_container` called at top level.
    #[error("not inside a container")]
    NotInContainer,

    /// A required structure member is absent.
    #[error("missing field {0}")]
    MissingField(u8),

    /// Element present with the wrong type.
    #[error("unexpected element type")]
    UnexpectedType,
}
