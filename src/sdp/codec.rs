//! Data element encoding and decoding
//!
//! [`DataElementWriter`] serializes elements into a growing buffer, picking
//! the smallest length field for every variable-length element. [`Cursor`]
//! walks a received buffer; it keeps a stack of marks so that the decoder can
//! tell how many bytes the children of a sequence consumed and compare that
//! with the length the sequence declared.

use super::SdpError;
use super::element::{DataElement, DataElementSize, DataElementType};
use crate::constants::MAX_NESTING_DEPTH;
use crate::{Uuid, UuidWidth};

/// How UUID elements are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UuidForm {
    /// Use the width the UUID was declared with
    #[default]
    Declared,
    /// Always expand to the 128-bit form
    Canonical,
}

/// Encode one data element
///
/// # Errors
/// Returns `PayloadTooLarge` if a payload exceeds a 32-bit length field
pub fn encode(element: &DataElement) -> Result<Vec<u8>, SdpError> {
    let mut writer = DataElementWriter::new();
    writer.write(element)?;
    Ok(writer.into_bytes())
}

/// Decode exactly one data element spanning the whole buffer
///
/// # Errors
/// Returns a framing error for corrupt input, `TrailingBytes` if the element
/// ends before the buffer does
pub fn decode(bytes: &[u8]) -> Result<DataElement, SdpError> {
    let mut cursor = Cursor::new(bytes);
    let element = cursor.read_element()?;
    if !cursor.is_empty() {
        return Err(SdpError::TrailingBytes(cursor.remaining()));
    }
    Ok(element)
}

/// Serializes data elements into a byte buffer
#[derive(Debug, Default)]
pub struct DataElementWriter {
    buf: Vec<u8>,
    uuid_form: UuidForm,
}

impl DataElementWriter {
    /// Create an empty writer using declared UUID widths
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with the given UUID form
    #[must_use]
    pub fn with_uuid_form(uuid_form: UuidForm) -> Self {
        Self {
            buf: Vec::new(),
            uuid_form,
        }
    }

    /// Bytes written so far
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the writer and return the buffer
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append one element
    ///
    /// # Errors
    /// Returns `PayloadTooLarge` if a payload exceeds a 32-bit length field
    pub fn write(&mut self, element: &DataElement) -> Result<(), SdpError> {
        match element {
            DataElement::Nil => self.header(DataElementType::Nil, DataElementSize::Size1),
            DataElement::Boolean(v) => {
                self.header(DataElementType::Boolean, DataElementSize::Size1);
                self.buf.push(u8::from(*v));
            }
            DataElement::UnsignedInt8(v) => {
                self.header(DataElementType::UnsignedInt, DataElementSize::Size1);
                self.buf.push(*v);
            }
            DataElement::UnsignedInt16(v) => {
                self.header(DataElementType::UnsignedInt, DataElementSize::Size2);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            DataElement::UnsignedInt32(v) => {
                self.header(DataElementType::UnsignedInt, DataElementSize::Size4);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            DataElement::UnsignedInt64(bytes) => {
                self.header(DataElementType::UnsignedInt, DataElementSize::Size8);
                self.buf.extend_from_slice(bytes);
            }
            DataElement::UnsignedInt128(bytes) => {
                self.header(DataElementType::UnsignedInt, DataElementSize::Size16);
                self.buf.extend_from_slice(bytes);
            }
            DataElement::SignedInt8(v) => {
                self.header(DataElementType::SignedInt, DataElementSize::Size1);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            DataElement::SignedInt16(v) => {
                self.header(DataElementType::SignedInt, DataElementSize::Size2);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            DataElement::SignedInt32(v) => {
                self.header(DataElementType::SignedInt, DataElementSize::Size4);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            DataElement::SignedInt64(v) => {
                self.header(DataElementType::SignedInt, DataElementSize::Size8);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            DataElement::SignedInt128(bytes) => {
                self.header(DataElementType::SignedInt, DataElementSize::Size16);
                self.buf.extend_from_slice(bytes);
            }
            DataElement::Uuid(uuid) => self.write_uuid(*uuid),
            DataElement::TextString(bytes) => {
                self.length_header(DataElementType::TextString, bytes.len())?;
                self.buf.extend_from_slice(bytes);
            }
            DataElement::Url(bytes) => {
                self.length_header(DataElementType::Url, bytes.len())?;
                self.buf.extend_from_slice(bytes);
            }
            DataElement::Sequence(children) | DataElement::Alternative(children) => {
                let size = element.pure_size_with(self.uuid_form);
                self.length_header(element.data_type(), size)?;
                for child in children {
                    self.write(child)?;
                }
            }
        }
        Ok(())
    }

    fn write_uuid(&mut self, uuid: Uuid) {
        let uuid = match self.uuid_form {
            UuidForm::Declared => uuid,
            UuidForm::Canonical => uuid.to_canonical(),
        };
        let size = match uuid.width() {
            UuidWidth::Short16 => DataElementSize::Size2,
            UuidWidth::Short32 => DataElementSize::Size4,
            UuidWidth::Full128 => DataElementSize::Size16,
        };
        self.header(DataElementType::Uuid, size);
        self.buf.extend_from_slice(&uuid.to_be_bytes());
    }

    /// Append a raw big-endian `u16` outside any data element
    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a raw big-endian `u32` outside any data element
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn header(&mut self, data_type: DataElementType, size: DataElementSize) {
        self.buf.push(((data_type as u8) << 3) | size as u8);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn length_header(&mut self, data_type: DataElementType, len: usize) -> Result<(), SdpError> {
        let size = DataElementSize::for_length(len).ok_or(SdpError::PayloadTooLarge(len))?;
        self.header(data_type, size);
        match size {
            DataElementSize::AdditionalU8 => self.buf.push(len as u8),
            DataElementSize::AdditionalU16 => {
                self.buf.extend_from_slice(&(len as u16).to_be_bytes());
            }
            _ => self.buf.extend_from_slice(&(len as u32).to_be_bytes()),
        }
        Ok(())
    }
}

/// Read position over a received buffer
///
/// Besides data elements the cursor reads the fixed-width big-endian fields
/// of SDP PDUs.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    position: usize,
    marks: heapless::Vec<usize, MAX_NESTING_DEPTH>,
}

impl<'a> Cursor<'a> {
    /// Start reading at the beginning of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            marks: heapless::Vec::new(),
        }
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Whether every byte has been consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Remember the current position
    ///
    /// # Errors
    /// Returns `NestingTooDeep` when the mark stack is full
    pub fn push_mark(&mut self) -> Result<(), SdpError> {
        self.marks
            .push(self.position)
            .map_err(|_| SdpError::NestingTooDeep(MAX_NESTING_DEPTH))
    }

    /// Forget the most recent mark and return the bytes consumed since it
    pub fn pop_mark(&mut self) -> usize {
        self.marks
            .pop()
            .map_or(0, |mark| self.position.saturating_sub(mark))
    }

    fn consumed_since_mark(&self) -> usize {
        self.marks
            .last()
            .map_or(self.position, |mark| self.position - mark)
    }

    /// Read `len` raw bytes
    ///
    /// # Errors
    /// Returns `BufferTooSmall` if fewer bytes remain
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], SdpError> {
        if len > self.remaining() {
            return Err(SdpError::BufferTooSmall {
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    /// Read the rest of the buffer
    pub fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.position..];
        self.position = self.data.len();
        bytes
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SdpError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read one byte
    ///
    /// # Errors
    /// Returns `BufferTooSmall` at the end of the buffer
    pub fn read_u8(&mut self) -> Result<u8, SdpError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a big-endian `u16`
    ///
    /// # Errors
    /// Returns `BufferTooSmall` if fewer than 2 bytes remain
    pub fn read_u16(&mut self) -> Result<u16, SdpError> {
        self.read_array().map(u16::from_be_bytes)
    }

    /// Read a big-endian `u32`
    ///
    /// # Errors
    /// Returns `BufferTooSmall` if fewer than 4 bytes remain
    pub fn read_u32(&mut self) -> Result<u32, SdpError> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Read one data element, recursing into sequences and alternatives
    ///
    /// # Errors
    /// Returns a framing error if the element is corrupt or truncated
    pub fn read_element(&mut self) -> Result<DataElement, SdpError> {
        let header = self.read_u8()?;
        let tag = header >> 3;
        let size_index = header & 0x07;
        let data_type = DataElementType::from_tag(tag).ok_or(SdpError::UnknownHeader(header))?;
        let invalid_size = SdpError::InvalidSizeDescriptor {
            type_tag: tag,
            size_index,
        };

        let element = match (data_type, DataElementSize::from_index(size_index)) {
            (DataElementType::Nil, DataElementSize::Size1) => DataElement::Nil,
            (DataElementType::Boolean, DataElementSize::Size1) => {
                DataElement::Boolean(self.read_u8()? != 0)
            }
            (DataElementType::UnsignedInt, size) => match size {
                DataElementSize::Size1 => DataElement::UnsignedInt8(self.read_u8()?),
                DataElementSize::Size2 => DataElement::UnsignedInt16(self.read_u16()?),
                DataElementSize::Size4 => DataElement::UnsignedInt32(self.read_u32()?),
                DataElementSize::Size8 => DataElement::UnsignedInt64(self.read_array()?),
                DataElementSize::Size16 => DataElement::UnsignedInt128(self.read_array()?),
                _ => return Err(invalid_size),
            },
            (DataElementType::SignedInt, size) => match size {
                DataElementSize::Size1 => {
                    DataElement::SignedInt8(i8::from_be_bytes(self.read_array()?))
                }
                DataElementSize::Size2 => {
                    DataElement::SignedInt16(i16::from_be_bytes(self.read_array()?))
                }
                DataElementSize::Size4 => {
                    DataElement::SignedInt32(i32::from_be_bytes(self.read_array()?))
                }
                DataElementSize::Size8 => {
                    DataElement::SignedInt64(i64::from_be_bytes(self.read_array()?))
                }
                DataElementSize::Size16 => DataElement::SignedInt128(self.read_array()?),
                _ => return Err(invalid_size),
            },
            (DataElementType::Uuid, size) => match size {
                DataElementSize::Size2 => DataElement::Uuid(Uuid::from_u16(self.read_u16()?)),
                DataElementSize::Size4 => DataElement::Uuid(Uuid::from_u32(self.read_u32()?)),
                DataElementSize::Size16 => {
                    DataElement::Uuid(Uuid::from_u128(u128::from_be_bytes(self.read_array()?)))
                }
                _ => return Err(invalid_size),
            },
            (data_type, size) if data_type.is_variable_length() => {
                let len = match size {
                    DataElementSize::AdditionalU8 => usize::from(self.read_u8()?),
                    DataElementSize::AdditionalU16 => usize::from(self.read_u16()?),
                    DataElementSize::AdditionalU32 => self.read_u32()? as usize,
                    _ => return Err(invalid_size),
                };
                match data_type {
                    DataElementType::TextString => {
                        DataElement::TextString(self.read_bytes(len)?.to_vec())
                    }
                    DataElementType::Url => DataElement::Url(self.read_bytes(len)?.to_vec()),
                    DataElementType::Sequence => DataElement::Sequence(self.read_children(len)?),
                    _ => DataElement::Alternative(self.read_children(len)?),
                }
            }
            _ => return Err(invalid_size),
        };
        Ok(element)
    }

    fn read_children(&mut self, declared: usize) -> Result<Vec<DataElement>, SdpError> {
        self.push_mark()?;
        let mut children = Vec::new();
        let result = loop {
            if self.consumed_since_mark() >= declared {
                break Ok(());
            }
            match self.read_element() {
                Ok(child) => children.push(child),
                Err(err) => break Err(err),
            }
        };
        let consumed = self.pop_mark();
        result?;
        if consumed != declared {
            return Err(SdpError::LengthMismatch { declared, consumed });
        }
        Ok(children)
    }
}
