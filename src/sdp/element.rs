//! SDP Data Elements
//!
//! Data elements are the self-describing values SDP uses for every attribute.
//! Each element starts with a header byte: the top five bits carry the
//! [`DataElementType`], the bottom three bits the [`DataElementSize`] index.

use super::codec::UuidForm;
use crate::Uuid;
use crate::uuid::UuidWidth;

/// Data element type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DataElementType {
    /// Nil (null value)
    Nil = 0,
    /// Unsigned integer
    UnsignedInt = 1,
    /// Signed integer
    SignedInt = 2,
    /// UUID
    Uuid = 3,
    /// Text string
    TextString = 4,
    /// Boolean
    Boolean = 5,
    /// Data element sequence
    Sequence = 6,
    /// Data element alternative
    Alternative = 7,
    /// URL
    Url = 8,
}

impl DataElementType {
    /// Look up a type from the top five bits of a header byte
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Nil),
            1 => Some(Self::UnsignedInt),
            2 => Some(Self::SignedInt),
            3 => Some(Self::Uuid),
            4 => Some(Self::TextString),
            5 => Some(Self::Boolean),
            6 => Some(Self::Sequence),
            7 => Some(Self::Alternative),
            8 => Some(Self::Url),
            _ => None,
        }
    }

    /// Whether elements of this type carry a length field
    #[must_use]
    pub const fn is_variable_length(self) -> bool {
        matches!(
            self,
            Self::TextString | Self::Sequence | Self::Alternative | Self::Url
        )
    }
}

/// Data element size descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DataElementSize {
    /// 1 byte
    Size1 = 0,
    /// 2 bytes
    Size2 = 1,
    /// 4 bytes
    Size4 = 2,
    /// 8 bytes
    Size8 = 3,
    /// 16 bytes
    Size16 = 4,
    /// Additional 8-bit size descriptor follows
    AdditionalU8 = 5,
    /// Additional 16-bit size descriptor follows
    AdditionalU16 = 6,
    /// Additional 32-bit size descriptor follows
    AdditionalU32 = 7,
}

impl DataElementSize {
    /// Look up a size descriptor from the bottom three bits of a header byte
    #[must_use]
    pub const fn from_index(index: u8) -> Self {
        match index & 0x07 {
            0 => Self::Size1,
            1 => Self::Size2,
            2 => Self::Size4,
            3 => Self::Size8,
            4 => Self::Size16,
            5 => Self::AdditionalU8,
            6 => Self::AdditionalU16,
            _ => Self::AdditionalU32,
        }
    }

    /// Smallest length field able to describe `len` payload bytes
    #[must_use]
    pub const fn for_length(len: usize) -> Option<Self> {
        if len <= 0xFF {
            Some(Self::AdditionalU8)
        } else if len <= 0xFFFF {
            Some(Self::AdditionalU16)
        } else if len <= 0xFFFF_FFFF {
            Some(Self::AdditionalU32)
        } else {
            None
        }
    }

    /// Bytes of the length field that follows the header
    #[must_use]
    pub const fn length_field_bytes(self) -> usize {
        match self {
            Self::AdditionalU8 => 1,
            Self::AdditionalU16 => 2,
            Self::AdditionalU32 => 4,
            _ => 0,
        }
    }
}

/// SDP Data Element
///
/// 64-bit unsigned and 128-bit integers are carried as big-endian byte
/// arrays; text and URLs keep their raw bytes since servers are not bound to
/// UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataElement {
    /// Nil (null value)
    Nil,
    /// Boolean value
    Boolean(bool),
    /// Unsigned 8-bit integer
    UnsignedInt8(u8),
    /// Unsigned 16-bit integer
    UnsignedInt16(u16),
    /// Unsigned 32-bit integer
    UnsignedInt32(u32),
    /// Unsigned 64-bit integer
    UnsignedInt64([u8; 8]),
    /// Unsigned 128-bit integer
    UnsignedInt128([u8; 16]),
    /// Signed 8-bit integer
    SignedInt8(i8),
    /// Signed 16-bit integer
    SignedInt16(i16),
    /// Signed 32-bit integer
    SignedInt32(i32),
    /// Signed 64-bit integer
    SignedInt64(i64),
    /// Signed 128-bit integer
    SignedInt128([u8; 16]),
    /// UUID of any width
    Uuid(Uuid),
    /// Text string
    TextString(Vec<u8>),
    /// URL string
    Url(Vec<u8>),
    /// Data element sequence
    Sequence(Vec<DataElement>),
    /// Data element alternative
    Alternative(Vec<DataElement>),
}

impl DataElement {
    /// Text string element from UTF-8 text
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::TextString(text.as_bytes().to_vec())
    }

    /// URL element from text
    #[must_use]
    pub fn url(url: &str) -> Self {
        Self::Url(url.as_bytes().to_vec())
    }

    /// Type descriptor of the element
    #[must_use]
    pub const fn data_type(&self) -> DataElementType {
        match self {
            Self::Nil => DataElementType::Nil,
            Self::Boolean(_) => DataElementType::Boolean,
            Self::UnsignedInt8(_)
            | Self::UnsignedInt16(_)
            | Self::UnsignedInt32(_)
            | Self::UnsignedInt64(_)
            | Self::UnsignedInt128(_) => DataElementType::UnsignedInt,
            Self::SignedInt8(_)
            | Self::SignedInt16(_)
            | Self::SignedInt32(_)
            | Self::SignedInt64(_)
            | Self::SignedInt128(_) => DataElementType::SignedInt,
            Self::Uuid(_) => DataElementType::Uuid,
            Self::TextString(_) => DataElementType::TextString,
            Self::Url(_) => DataElementType::Url,
            Self::Sequence(_) => DataElementType::Sequence,
            Self::Alternative(_) => DataElementType::Alternative,
        }
    }

    /// Payload size without header and length field
    #[must_use]
    pub fn pure_size(&self) -> usize {
        self.pure_size_with(UuidForm::Declared)
    }

    /// Size on the wire including header and length field
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.encoded_size_with(UuidForm::Declared)
    }

    pub(crate) fn pure_size_with(&self, form: UuidForm) -> usize {
        match self {
            Self::Nil => 0,
            Self::Boolean(_) | Self::UnsignedInt8(_) | Self::SignedInt8(_) => 1,
            Self::UnsignedInt16(_) | Self::SignedInt16(_) => 2,
            Self::UnsignedInt32(_) | Self::SignedInt32(_) => 4,
            Self::UnsignedInt64(_) | Self::SignedInt64(_) => 8,
            Self::UnsignedInt128(_) | Self::SignedInt128(_) => 16,
            Self::Uuid(uuid) => match form {
                UuidForm::Declared => uuid.width().byte_len(),
                UuidForm::Canonical => UuidWidth::Full128.byte_len(),
            },
            Self::TextString(bytes) | Self::Url(bytes) => bytes.len(),
            Self::Sequence(children) | Self::Alternative(children) => children
                .iter()
                .map(|child| child.encoded_size_with(form))
                .sum(),
        }
    }

    pub(crate) fn encoded_size_with(&self, form: UuidForm) -> usize {
        let pure = self.pure_size_with(form);
        let length_field = if self.data_type().is_variable_length() {
            DataElementSize::for_length(pure).map_or(4, DataElementSize::length_field_bytes)
        } else {
            0
        };
        1 + length_field + pure
    }

    /// Integer value of any integer element that fits an `i64`
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::UnsignedInt8(v) => Some(i64::from(v)),
            Self::UnsignedInt16(v) => Some(i64::from(v)),
            Self::UnsignedInt32(v) => Some(i64::from(v)),
            Self::SignedInt8(v) => Some(i64::from(v)),
            Self::SignedInt16(v) => Some(i64::from(v)),
            Self::SignedInt32(v) => Some(i64::from(v)),
            Self::SignedInt64(v) => Some(v),
            _ => None,
        }
    }

    /// Value of a 16-bit unsigned element
    #[must_use]
    pub fn as_u16(&self) -> Option<u16> {
        match *self {
            Self::UnsignedInt16(v) => Some(v),
            _ => None,
        }
    }

    /// Value of a 32-bit unsigned element
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::UnsignedInt32(v) => Some(v),
            _ => None,
        }
    }

    /// Value of a boolean element
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Value of a UUID element
    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match *self {
            Self::Uuid(uuid) => Some(uuid),
            _ => None,
        }
    }

    /// Text of a string or URL element, if it is valid UTF-8
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::TextString(bytes) | Self::Url(bytes) => core::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Raw bytes of string, URL and opaque integer elements
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::TextString(bytes) | Self::Url(bytes) => Some(bytes),
            Self::UnsignedInt64(bytes) => Some(bytes),
            Self::UnsignedInt128(bytes) | Self::SignedInt128(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Children of a sequence or alternative
    #[must_use]
    pub fn elements(&self) -> Option<&[DataElement]> {
        match self {
            Self::Sequence(children) | Self::Alternative(children) => Some(children),
            _ => None,
        }
    }
}

impl From<Uuid> for DataElement {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

impl From<bool> for DataElement {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}
