//! Tag-Length-Value codec.
//!
//! Self-describing binary encoding used for every application payload and for
//! the handshake messages. Each element starts with a control byte: the upper
//! three bits select the tag form, the lower five the element type. Integers
//! and lengths are little-endian.
//!
//! - [`TlvWriter`] encodes incrementally and enforces container rules
//! - [`TlvReader`] decodes lazily, one element at a time
//! - [`encode`] / [`decode`] convert whole [`Element`] trees

mod element;
mod error;
mod reader;
mod tag;
mod writer;

pub use element::{ContainerKind, Element, Value};
pub use error::TlvError;
pub use reader::{Item, TlvReader, ValueRef};
pub use tag::{Tag, control as tag_control};
pub use writer::TlvWriter;

/// Encode one element tree.
pub fn encode(element: &Element) -> Result<Vec<u8>, TlvError> {
    let mut writer = TlvWriter::new();
    writer.put_element(element)?;
    writer.finish()
}

/// Decode exactly one element from `bytes`.
///
/// Fails on truncated input, on malformed structure, and when bytes remain
/// after the element.
pub fn decode(bytes: &[u8]) -> Result<Element, TlvError> {
    let mut reader = TlvReader::new(bytes);
    let item = reader.next_element()?.ok_or(TlvError::Truncated)?;
    let element = reader.read_element(item)?;
    if reader.next_element()?.is_some() {
        return Err(TlvError::TrailingBytes);
    }
    Ok(element)
}
