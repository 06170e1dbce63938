//! TLV tags and the tag-control half of the control byte.

/// Tag-control values (upper three bits of the control byte).
pub mod control {
    /// No tag.
    pub const ANONYMOUS: u8 = 0;
    /// 1-byte context-specific tag.
    pub const CONTEXT: u8 = 1;
    /// Common profile, 2-byte tag number.
    pub const COMMON_PROFILE_2: u8 = 2;
    /// Common profile, 4-byte tag number.
    pub const COMMON_PROFILE_4: u8 = 3;
    /// Implicit profile, 2-byte tag number.
    pub const IMPLICIT_PROFILE_2: u8 = 4;
    /// Implicit profile, 4-byte tag number.
    pub const IMPLICIT_PROFILE_4: u8 = 5;
    /// Fully qualified (vendor, profile, 2-byte number).
    pub const FULLY_QUALIFIED_6: u8 = 6;
    /// Fully qualified (vendor, profile, 4-byte number).
    pub const FULLY_QUALIFIED_8: u8 = 7;
}

/// Element tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// No tag (array members, top-level values).
    Anonymous,
    /// Context-specific tag, unique within the enclosing structure.
    Context(u8),
    /// Tag in the common profile.
    CommonProfile(u32),
    /// Tag in the profile implied by the surrounding protocol.
    ImplicitProfile(u32),
    /// Globally qualified tag.
    FullyQualified {
        /// Vendor identifier.
        vendor: u16,
        /// Profile number within the vendor.
        profile: u16,
        /// Tag number within the profile.
        number: u32,
    },
}

impl Tag {
    /// Tag-control value for this tag, using the shortest number form.
    pub fn control(&self) -> u8 {
        match *self {
            Tag::Anonymous => control::ANONYMOUS,
            Tag::Context(_) => control::CONTEXT,
            Tag::CommonProfile(n) if n <= u16::MAX as u32 => control::COMMON_PROFILE_2,
            Tag::CommonProfile(_) => control::COMMON_PROFILE_4,
            Tag::ImplicitProfile(n) if n <= u16::MAX as u32 => control::IMPLICIT_PROFILE_2,
            Tag::ImplicitProfile(_) => control::IMPLICIT_PROFILE_4,
            Tag::FullyQualified { number, .. } if number <= u16::MAX as u32 => {
                control::FULLY_QUALIFIED_6
            }
            Tag::FullyQualified { .. } => control::FULLY_QUALIFIED_8,
        }
    }

    /// Number of tag bytes that follow the control byte for `control`.
    pub fn encoded_len(control: u8) -> usize {
        match control {
            control::ANONYMOUS => 0,
            control::CONTEXT => 1,
            control::COMMON_PROFILE_2 | control::IMPLICIT_PROFILE_2 => 2,
            control::COMMON_PROFILE_4 | control::IMPLICIT_PROFILE_4 => 4,
            control::FULLY_QUALIFIED_6 => 6,
            _ => 8,
        }
    }

    /// Append the tag bytes (not the control byte).
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        match *self {
            Tag::Anonymous => {}
            Tag::Context(n) => buf.push(n),
            Tag::CommonProfile(n) | Tag::ImplicitProfile(n) => {
                if n <= u16::MAX as u32 {
                    buf.extend_from_slice(&(n as u16).to_le_bytes());
                } else {
                    buf.extend_from_slice(&n.to_le_bytes());
                }
            }
            Tag::FullyQualified {
                vendor,
                profile,
                number,
            } => {
                buf.extend_from_slice(&vendor.to_le_bytes());
                buf.extend_from_slice(&profile.to_le_bytes());
                if number <= u16::MAX as u32 {
                    buf.extend_from_slice(&(number as u16).to_le_bytes());
                } else {
                    buf.extend_from_slice(&number.to_le_bytes());
                }
            }
        }
    }

    /// Parse tag bytes for the given control value.
    ///
    /// `bytes` must be exactly [`Tag::encoded_len`] long.
    pub(crate) fn from_parts(control: u8, bytes: &[u8]) -> Tag {
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        match control {
            control::ANONYMOUS => Tag::Anonymous,
            control::CONTEXT => Tag::Context(bytes[0]),
            control::COMMON_PROFILE_2 => Tag::CommonProfile(u16_at(0) as u32),
            control::COMMON_PROFILE_4 => Tag::CommonProfile(u32_at(0)),
            control::IMPLICIT_PROFILE_2 => Tag::ImplicitProfile(u16_at(0) as u32),
            control::IMPLICIT_PROFILE_4 => Tag::ImplicitProfile(u32_at(0)),
            control::FULLY_QUALIFIED_6 => Tag::FullyQualified {
                vendor: u16_at(0),
                profile: u16_at(2),
                number: u16_at(4) as u32,
            },
            _ => Tag::FullyQualified {
                vendor: u16_at(0),
                profile: u16_at(2),
                number: u32_at(4),
            },
        }
    }
}
