//! Owned TLV element tree.

use super::{Tag, TlvError};

/// Element-type field (lower five bits of the control byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ElementType {
    Int8 = 0x00,
    Int16 = 0x01,
    Int32 = 0x02,
    Int64 = 0x03,
    UInt8 = 0x04,
    UInt16 = 0x05,
    UInt32 = 0x06,
    UInt64 = 0x07,
    False = 0x08,
    True = 0x09,
    Float32 = 0x0A,
    Float64 = 0x0B,
    Utf8L1 = 0x0C,
    Utf8L2 = 0x0D,
    Utf8L4 = 0x0E,
    Utf8L8 = 0x0F,
    BytesL1 = 0x10,
    BytesL2 = 0x11,
    BytesL4 = 0x12,
    BytesL8 = 0x13,
    Null = 0x14,
    Structure = 0x15,
    Array = 0x16,
    List = 0x17,
    EndOfContainer = 0x18,
}

impl ElementType {
    /// Parse the lower five bits of a control byte.
    pub(crate) fn from_bits(bits: u8) -> Option<Self> {
        let ty = match bits {
            0x00 => Self::Int8,
            0x01 => Self::Int16,
            0x02 => Self::Int32,
            0x03 => Self::Int64,
            0x04 => Self::UInt8,
            0x05 => Self::UInt16,
            0x06 => Self::UInt32,
            0x07 => Self::UInt64,
            0x08 => Self::False,
            0x09 => Self::True,
            0x0A => Self::Float32,
            0x0B => Self::Float64,
            0x0C => Self::Utf8L1,
            0x0D => Self::Utf8L2,
            0x0E => Self::Utf8L4,
            0x0F => Self::Utf8L8,
            0x10 => Self::BytesL1,
            0x11 => Self::BytesL2,
            0x12 => Self::BytesL4,
            0x13 => Self::BytesL8,
            0x14 => Self::Null,
            0x15 => Self::Structure,
            0x16 => Self::Array,
            0x17 => Self::List,
            0x18 => Self::EndOfContainer,
            _ => return None,
        };
        Some(ty)
    }

    pub(crate) fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Control byte that closes the innermost open container.
pub(crate) const END_OF_CONTAINER: u8 = ElementType::EndOfContainer as u8;

/// Container flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// Members are tagged and tags are unique.
    Structure,
    /// Members are anonymous and ordered.
    Array,
    /// Members are ordered, tags optional and possibly repeated.
    List,
}

impl ContainerKind {
    pub(crate) fn element_type(self) -> ElementType {
        match self {
            ContainerKind::Structure => ElementType::Structure,
            ContainerKind::Array => ElementType::Array,
            ContainerKind::List => ElementType::List,
        }
    }
}

/// Membership rules for one open container, shared by reader and writer.
#[derive(Debug)]
pub(crate) struct ContainerScope {
    kind: ContainerKind,
    seen: Vec<Tag>,
}

impl ContainerScope {
    pub(crate) fn new(kind: ContainerKind) -> Self {
        Self {
            kind,
            seen: Vec::new(),
        }
    }

    pub(crate) fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Check that `tag` may appear as the next member.
    pub(crate) fn admit(&mut self, tag: Tag) -> Result<(), TlvError> {
        match self.kind {
            ContainerKind::Structure => {
                if tag == Tag::Anonymous {
                    return Err(TlvError::InvalidTag(tag));
                }
                if self.seen.contains(&tag) {
                    return Err(TlvError::DuplicateTag(tag));
                }
                self.seen.push(tag);
                Ok(())
            }
            ContainerKind::Array if tag != Tag::Anonymous => Err(TlvError::InvalidTag(tag)),
            ContainerKind::Array | ContainerKind::List => Ok(()),
        }
    }
}

/// A decoded or to-be-encoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 8-bit integer.
    Int8(i8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 8-bit integer.
    UInt8(u8),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// Boolean.
    Bool(bool),
    /// IEEE-754 single.
    Float32(f32),
    /// IEEE-754 double.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Octet string.
    Bytes(Vec<u8>),
    /// Null.
    Null,
    /// Tagged members, tags unique.
    Structure(Vec<Element>),
    /// Anonymous members.
    Array(Vec<Element>),
    /// Ordered members, tags optional.
    List(Vec<Element>),
}

impl Value {
    /// Container kind, if this is a container.
    pub fn container_kind(&self) -> Option<ContainerKind> {
        match self {
            Value::Structure(_) => Some(ContainerKind::Structure),
            Value::Array(_) => Some(ContainerKind::Array),
            Value::List(_) => Some(ContainerKind::List),
            _ => None,
        }
    }

    /// Members of a container.
    pub fn members(&self) -> Option<&[Element]> {
        match self {
            Value::Structure(m) | Value::Array(m) | Value::List(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a context-tagged structure member.
    pub fn field(&self, tag: u8) -> Option<&Value> {
        match self {
            Value::Structure(members) => members
                .iter()
                .find(|m| m.tag == Tag::Context(tag))
                .map(|m| &m.value),
            _ => None,
        }
    }

    /// Widen any unsigned integer.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt8(v) => Some(v.into()),
            Value::UInt16(v) => Some(v.into()),
            Value::UInt32(v) => Some(v.into()),
            Value::UInt64(v) => Some(v),
            _ => None,
        }
    }

    /// Widen any signed integer.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int8(v) => Some(v.into()),
            Value::Int16(v) => Some(v.into()),
            Value::Int32(v) => Some(v.into()),
            Value::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_primitive! {
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    bool => Bool, f32 => Float32, f64 => Float64,
    String => Utf8, Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_owned())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

/// A tagged value.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: Tag,
    pub value: Value,
}

impl Element {
    pub fn new(tag: Tag, value: impl Into<Value>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    pub fn anonymous(value: impl Into<Value>) -> Self {
        Self::new(Tag::Anonymous, value)
    }

    /// Context-tagged member.
    pub fn context(tag: u8, value: impl Into<Value>) -> Self {
        Self::new(Tag::Context(tag), value)
    }

    /// Anonymous structure with the given members.
    pub fn structure(members: Vec<Element>) -> Self {
        Self::anonymous(Value::Structure(members))
    }

    /// Anonymous array; members are forced anonymous.
    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        Self::anonymous(Value::Array(
            values.into_iter().map(Element::anonymous).collect(),
        ))
    }

    /// Shorthand for `self.value.field(tag)`.
    pub fn field(&self, tag: u8) -> Option<&Value> {
        self.value.field(tag)
    }
}
