//! Lazy, forward-only TLV reader.
//!
//! The reader yields one element at a time. Containers are reported as
//! [`ValueRef::Container`]; the caller either descends with
//! [`TlvReader::enter_container`] or moves on, in which case the container is
//! skipped. Unknown structure members can therefore be ignored without being
//! materialized.

use crate::core::MAX_CONTAINER_DEPTH;

use super::element::{ContainerScope, END_OF_CONTAINER, ElementType};
use super::{ContainerKind, Element, Tag, TlvError, Value};

/// Borrowed view of one element's value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'a> {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Float32(f32),
    Float64(f64),
    Utf8(&'a str),
    Bytes(&'a [u8]),
    Null,
    /// Start of a container; members are read after `enter_container`.
    Container(ContainerKind),
}

impl<'a> ValueRef<'a> {
    /// Owned copy of a primitive. `None` for containers.
    pub fn to_value(&self) -> Option<Value> {
        let value = match *self {
            ValueRef::Int8(v) => Value::Int8(v),
            ValueRef::Int16(v) => Value::Int16(v),
            ValueRef::Int32(v) => Value::Int32(v),
            ValueRef::Int64(v) => Value::Int64(v),
            ValueRef::UInt8(v) => Value::UInt8(v),
            ValueRef::UInt16(v) => Value::UInt16(v),
            ValueRef::UInt32(v) => Value::UInt32(v),
            ValueRef::UInt64(v) => Value::UInt64(v),
            ValueRef::Bool(v) => Value::Bool(v),
            ValueRef::Float32(v) => Value::Float32(v),
            ValueRef::Float64(v) => Value::Float64(v),
            ValueRef::Utf8(s) => Value::Utf8(s.to_owned()),
            ValueRef::Bytes(b) => Value::Bytes(b.to_vec()),
            ValueRef::Null => Value::Null,
            ValueRef::Container(_) => return None,
        };
        Some(value)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            ValueRef::UInt8(v) => Some(v.into()),
            ValueRef::UInt16(v) => Some(v.into()),
            ValueRef::UInt32(v) => Some(v.into()),
            ValueRef::UInt64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            ValueRef::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            ValueRef::Utf8(s) => Some(s),
            _ => None,
        }
    }
}

/// One element as yielded by [`TlvReader::next_element`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Item<'a> {
    pub tag: Tag,
    pub value: ValueRef<'a>,
}

/// Forward-only reader over an encoded buffer.
#[derive(Debug)]
pub struct TlvReader<'a> {
    data: &'a [u8],
    pos: usize,
    scopes: Vec<ContainerScope>,
    /// Container just yielded and not yet entered.
    pending: Option<ContainerKind>,
    /// End-of-container for the current level has been consumed.
    level_done: bool,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            scopes: Vec::new(),
            pending: None,
            level_done: false,
        }
    }

    /// Current container nesting depth.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Byte offset of the next unread element.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Next element at the current level.
    ///
    /// Returns `Ok(None)` at the end of the current container, or at the end
    /// of input when at top level.
    pub fn next_element(&mut self) -> Result<Option<Item<'a>>, TlvError> {
        if self.pending.take().is_some() {
            self.skip_container()?;
        }
        if self.level_done {
            return Ok(None);
        }
        if self.pos == self.data.len() {
            if self.scopes.is_empty() {
                return Ok(None);
            }
            return Err(TlvError::Truncated);
        }

        let control = self.take_u8()?;
        if control == END_OF_CONTAINER {
            if self.scopes.is_empty() {
                return Err(TlvError::UnmatchedEndOfContainer);
            }
            self.level_done = true;
            return Ok(None);
        }

        let (tag, value) = self.read_after_control(control)?;
        if let Some(scope) = self.scopes.last_mut() {
            scope.admit(tag)?;
        }
        if let ValueRef::Container(kind) = value {
            self.pending = Some(kind);
        }
        Ok(Some(Item { tag, value }))
    }

    /// Descend into the container just returned by `next_element`.
    pub fn enter_container(&mut self) -> Result<ContainerKind, TlvError> {
        let kind = self.pending.take().ok_or(TlvError::NotAContainer)?;
        if self.scopes.len() >= MAX_CONTAINER_DEPTH {
            return Err(TlvError::DepthExceeded);
        }
        self.scopes.push(ContainerScope::new(kind));
        self.level_done = false;
        Ok(kind)
    }

    /// Skip the rest of the current container and return to its parent.
    pub fn exit_container(&mut self) -> Result<(), TlvError> {
        if self.scopes.is_empty() {
            return Err(TlvError::NotInContainer);
        }
        while self.next_element()?.is_some() {}
        self.scopes.pop();
        self.level_done = false;
        Ok(())
    }

    /// Materialize `item` and, for a container, its whole subtree.
    pub fn read_element(&mut self, item: Item<'a>) -> Result<Element, TlvError> {
        let value = match item.value {
            ValueRef::Container(_) => {
                let kind = self.enter_container()?;
                let mut members = Vec::new();
                while let Some(member) = self.next_element()? {
                    members.push(self.read_element(member)?);
                }
                self.exit_container()?;
                match kind {
                    ContainerKind::Structure => Value::Structure(members),
                    ContainerKind::Array => Value::Array(members),
                    ContainerKind::List => Value::List(members),
                }
            }
            primitive => primitive.to_value().ok_or(TlvError::UnexpectedType)?,
        };
        Ok(Element {
            tag: item.tag,
            value,
        })
    }

    fn skip_container(&mut self) -> Result<(), TlvError> {
        let mut depth = 1usize;
        while depth > 0 {
            let control = self.take_u8()?;
            if control == END_OF_CONTAINER {
                depth -= 1;
                continue;
            }
            if let (_, ValueRef::Container(_)) = self.read_after_control(control)? {
                depth += 1;
                if self.scopes.len() + depth > MAX_CONTAINER_DEPTH {
                    return Err(TlvError::DepthExceeded);
                }
            }
        }
        Ok(())
    }

    fn read_after_control(&mut self, control: u8) -> Result<(Tag, ValueRef<'a>), TlvError> {
        let ty = ElementType::from_bits(control & 0x1F)
            .filter(|ty| *ty != ElementType::EndOfContainer)
            .ok_or(TlvError::InvalidControlByte(control))?;
        let tag_control = control >> 5;
        let tag_bytes = self.take(Tag::encoded_len(tag_control))?;
        let tag = Tag::from_parts(tag_control, tag_bytes);
        let value = self.read_value(ty)?;
        Ok((tag, value))
    }

    fn read_value(&mut self, ty: ElementType) -> Result<ValueRef<'a>, TlvError> {
        let value = match ty {
            ElementType::Int8 => ValueRef::Int8(i8::from_le_bytes(self.take_array()?)),
            ElementType::Int16 => ValueRef::Int16(i16::from_le_bytes(self.take_array()?)),
            ElementType::Int32 => ValueRef::Int32(i32::from_le_bytes(self.take_array()?)),
            ElementType::Int64 => ValueRef::Int64(i64::from_le_bytes(self.take_array()?)),
            ElementType::UInt8 => ValueRef::UInt8(self.take_u8()?),
            ElementType::UInt16 => ValueRef::UInt16(u16::from_le_bytes(self.take_array()?)),
            ElementType::UInt32 => ValueRef::UInt32(u32::from_le_bytes(self.take_array()?)),
            ElementType::UInt64 => ValueRef::UInt64(u64::from_le_bytes(self.take_array()?)),
            ElementType::False => ValueRef::Bool(false),
            ElementType::True => ValueRef::Bool(true),
            ElementType::Float32 => ValueRef::Float32(f32::from_le_bytes(self.take_array()?)),
            ElementType::Float64 => ValueRef::Float64(f64::from_le_bytes(self.take_array()?)),
            ElementType::Utf8L1
            | ElementType::Utf8L2
            | ElementType::Utf8L4
            | ElementType::Utf8L8 => {
                let width = ty.as_byte() - ElementType::Utf8L1.as_byte();
                let bytes = self.take_length_prefixed(width)?;
                let s = std::str::from_utf8(bytes).map_err(|_| TlvError::InvalidUtf8)?;
                ValueRef::Utf8(s)
            }
            ElementType::BytesL1
            | ElementType::BytesL2
            | ElementType::BytesL4
            | ElementType::BytesL8 => {
                let width = ty.as_byte() - ElementType::BytesL1.as_byte();
                ValueRef::Bytes(self.take_length_prefixed(width)?)
            }
            ElementType::Null => ValueRef::Null,
            ElementType::Structure => ValueRef::Container(ContainerKind::Structure),
            ElementType::Array => ValueRef::Container(ContainerKind::Array),
            ElementType::List => ValueRef::Container(ContainerKind::List),
            ElementType::EndOfContainer => return Err(TlvError::InvalidControlByte(ty.as_byte())),
        };
        Ok(value)
    }

    /// `width` selects a 1, 2, 4 or 8 byte length field.
    fn take_length_prefixed(&mut self, width: u8) -> Result<&'a [u8], TlvError> {
        let declared = match width {
            0 => u64::from(self.take_u8()?),
            1 => u64::from(u16::from_le_bytes(self.take_array()?)),
            2 => u64::from(u32::from_le_bytes(self.take_array()?)),
            _ => u64::from_le_bytes(self.take_array()?),
        };
        let remaining = self.data.len() - self.pos;
        match usize::try_from(declared) {
            Ok(len) if len <= remaining => self.take(len),
            _ => Err(TlvError::LengthExceedsBuffer {
                declared,
                remaining,
            }),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TlvError> {
        let data = self.data;
        let end = self.pos.checked_add(n).ok_or(TlvError::Truncated)?;
        let slice = data.get(self.pos..end).ok_or(TlvError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, TlvError> {
        Ok(self.take(1)?[0])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], TlvError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::encode;

    fn sample() -> Vec<u8> {
        // {1: "hello", 2: [1, 2], 3: {9: true}, 4: 7u8}
        let e = Element::structure(vec![
            Element::context(1, "hello"),
            Element::new(
                Tag::Context(2),
                Value::Array(vec![Element::anonymous(1u8), Element::anonymous(2u8)]),
            ),
            Element::new(
                Tag::Context(3),
                Value::Structure(vec![Element::context(9, true)]),
            ),
            Element::context(4, 7u8),
        ]);
        encode(&e).unwrap()
    }

    #[test]
    fn test_lazy_skip_of_unentered_containers() {
        let bytes = sample();
        let mut r = TlvReader::new(&bytes);
        let top = r.next_element().unwrap().unwrap();
        assert_eq!(top.value, ValueRef::Container(ContainerKind::Structure));
        r.enter_container().unwrap();

        let mut tags = Vec::new();
        while let Some(item) = r.next_element().unwrap() {
            tags.push(item.tag);
            if item.tag == Tag::Context(4) {
                assert_eq!(item.value.as_u64(), Some(7));
            }
        }
        assert_eq!(
            tags,
            vec![Tag::Context(1), Tag::Context(2), Tag::Context(3), Tag::Context(4)]
        );
        r.exit_container().unwrap();
        assert!(r.next_element().unwrap().is_none());
        assert_eq!(r.position(), bytes.len());
    }

    #[test]
    fn test_exit_container_early() {
        let bytes = sample();
        let mut r = TlvReader::new(&bytes);
        r.next_element().unwrap();
        r.enter_container().unwrap();
        let first = r.next_element().unwrap().unwrap();
        assert_eq!(first.value.as_str(), Some("hello"));
        r.exit_container().unwrap();
        assert_eq!(r.depth(), 0);
        assert!(r.next_element().unwrap().is_none());
    }

    #[test]
    fn test_nested_enter() {
        let bytes = sample();
        let mut r = TlvReader::new(&bytes);
        r.next_element().unwrap();
        r.enter_container().unwrap();
        loop {
            let item = r.next_element().unwrap().unwrap();
            if item.tag == Tag::Context(3) {
                break;
            }
        }
        assert_eq!(r.enter_container().unwrap(), ContainerKind::Structure);
        let inner = r.next_element().unwrap().unwrap();
        assert_eq!(inner.value, ValueRef::Bool(true));
        assert!(r.next_element().unwrap().is_none());
        r.exit_container().unwrap();
        let last = r.next_element().unwrap().unwrap();
        assert_eq!(last.tag, Tag::Context(4));
    }

    #[test]
    fn test_enter_primitive_fails() {
        let bytes = [0x04, 0x05];
        let mut r = TlvReader::new(&bytes);
        r.next_element().unwrap();
        assert_eq!(r.enter_container(), Err(TlvError::NotAContainer));
        assert_eq!(r.exit_container(), Err(TlvError::NotInContainer));
    }

    #[test]
    fn test_unmatched_end() {
        let mut r = TlvReader::new(&[0x18]);
        assert_eq!(r.next_element(), Err(TlvError::UnmatchedEndOfContainer));
    }

    #[test]
    fn test_reserved_element_type() {
        let mut r = TlvReader::new(&[0x1F]);
        assert_eq!(r.next_element(), Err(TlvError::InvalidControlByte(0x1F)));
    }

    #[test]
    fn test_tagged_end_of_container_rejected() {
        // context-tagged 0x18
        let mut r = TlvReader::new(&[0x15, 0x38, 0x01]);
        r.next_element().unwrap();
        r.enter_container().unwrap();
        assert_eq!(r.next_element(), Err(TlvError::InvalidControlByte(0x38)));
    }

    #[test]
    fn test_length_exceeds_buffer() {
        let mut r = TlvReader::new(&[0x10, 0x09, 0xAA]);
        assert_eq!(
            r.next_element(),
            Err(TlvError::LengthExceedsBuffer {
                declared: 9,
                remaining: 1
            })
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let mut r = TlvReader::new(&[0x0C, 0x02, 0xC3, 0x28]);
        assert_eq!(r.next_element(), Err(TlvError::InvalidUtf8));
    }

    #[test]
    fn test_duplicate_tag_on_read() {
        // {1: 1u8, 1: 2u8}
        let bytes = [0x15, 0x24, 0x01, 0x01, 0x24, 0x01, 0x02, 0x18];
        let mut r = TlvReader::new(&bytes);
        r.next_element().unwrap();
        r.enter_container().unwrap();
        r.next_element().unwrap();
        assert_eq!(
            r.next_element(),
            Err(TlvError::DuplicateTag(Tag::Context(1)))
        );
    }

    #[test]
    fn test_anonymous_structure_member_rejected() {
        let bytes = [0x15, 0x04, 0x01, 0x18];
        let mut r = TlvReader::new(&bytes);
        r.next_element().unwrap();
        r.enter_container().unwrap();
        assert_eq!(
            r.next_element(),
            Err(TlvError::InvalidTag(Tag::Anonymous))
        );
    }

    #[test]
    fn test_unterminated_container() {
        let mut r = TlvReader::new(&[0x17, 0x04, 0x01]);
        r.next_element().unwrap();
        r.enter_container().unwrap();
        r.next_element().unwrap();
        assert_eq!(r.next_element(), Err(TlvError::Truncated));
    }

    #[test]
    fn test_skip_depth_limit() {
        let mut bytes = vec![0x16; MAX_CONTAINER_DEPTH + 1];
        bytes.extend(std::iter::repeat_n(0x18, MAX_CONTAINER_DEPTH + 1));
        let mut r = TlvReader::new(&bytes);
        r.next_element().unwrap();
        assert_eq!(r.next_element(), Err(TlvError::DepthExceeded));
    }
}
