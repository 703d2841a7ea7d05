//! Service Discovery Protocol (SDP) client
//!
//! This module implements the client side of the Bluetooth Service Discovery
//! Protocol: the data element codec, the PDU formats, the transaction engine
//! with continuation handling, and the service search orchestration that turns
//! responses into [`ServiceRecord`]s.

use core::fmt;

/// SDP Protocol Service Multiplexer (PSM) for L2CAP
pub const SDP_PSM: u16 = 0x0001;

/// Service record handle type
pub type ServiceRecordHandle = u32;

/// Transaction ID carried in SDP PDU headers
pub type TransactionId = u16;

/// Identifier handed out for every started service search
pub type SearchId = u16;

/// Attribute ID type
pub type AttributeId = u16;

pub mod attribute;
pub mod client;
pub mod codec;
pub mod element;
pub mod protocol;
pub mod record;
pub mod searcher;
pub mod transaction;

pub use attribute::{AttributeList, UniversalAttributeId};
pub use client::SdpClient;
pub use codec::{Cursor, DataElementWriter, UuidForm};
pub use element::{DataElement, DataElementSize, DataElementType};
pub use protocol::{ContinuationState, SdpPduHeader};
pub use record::{SecurityLevel, ServiceClassId, ServiceRecord};
pub use searcher::ServiceDiscoverer;
pub use transaction::{ResponseListener, SdpResponse};

/// SDP Protocol Data Unit IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SdpPduId {
    /// Error Response
    ErrorResponse = 0x01,
    /// Service Search Request
    ServiceSearchRequest = 0x02,
    /// Service Search Response
    ServiceSearchResponse = 0x03,
    /// Service Attribute Request
    ServiceAttributeRequest = 0x04,
    /// Service Attribute Response
    ServiceAttributeResponse = 0x05,
    /// Service Search Attribute Request
    ServiceSearchAttributeRequest = 0x06,
    /// Service Search Attribute Response
    ServiceSearchAttributeResponse = 0x07,
}

impl SdpPduId {
    /// Look up a PDU ID from its wire value
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::ErrorResponse),
            0x02 => Some(Self::ServiceSearchRequest),
            0x03 => Some(Self::ServiceSearchResponse),
            0x04 => Some(Self::ServiceAttributeRequest),
            0x05 => Some(Self::ServiceAttributeResponse),
            0x06 => Some(Self::ServiceSearchAttributeRequest),
            0x07 => Some(Self::ServiceSearchAttributeResponse),
            _ => None,
        }
    }

    /// Response PDU that answers this request PDU
    #[must_use]
    pub const fn response(self) -> Option<Self> {
        match self {
            Self::ServiceSearchRequest => Some(Self::ServiceSearchResponse),
            Self::ServiceAttributeRequest => Some(Self::ServiceAttributeResponse),
            Self::ServiceSearchAttributeRequest => Some(Self::ServiceSearchAttributeResponse),
            _ => None,
        }
    }
}

/// SDP Error Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SdpErrorCode {
    /// Invalid/unsupported SDP version
    InvalidVersion,
    /// Invalid Service Record Handle
    InvalidServiceRecordHandle,
    /// Invalid request syntax
    InvalidRequestSyntax,
    /// Invalid PDU size
    InvalidPduSize,
    /// Invalid continuation state
    InvalidContinuationState,
    /// Insufficient resources to satisfy request
    InsufficientResources,
    /// Code outside the assigned range
    Unknown(u16),
}

impl SdpErrorCode {
    /// Decode a wire error code
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            0x0001 => Self::InvalidVersion,
            0x0002 => Self::InvalidServiceRecordHandle,
            0x0003 => Self::InvalidRequestSyntax,
            0x0004 => Self::InvalidPduSize,
            0x0005 => Self::InvalidContinuationState,
            0x0006 => Self::InsufficientResources,
            other => Self::Unknown(other),
        }
    }

    /// Wire value of the code
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::InvalidVersion => 0x0001,
            Self::InvalidServiceRecordHandle => 0x0002,
            Self::InvalidRequestSyntax => 0x0003,
            Self::InvalidPduSize => 0x0004,
            Self::InvalidContinuationState => 0x0005,
            Self::InsufficientResources => 0x0006,
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for SdpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} ({self:?})", self.to_u16())
    }
}

/// SDP Error Types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SdpError {
    /// Input ended before a field was complete
    #[error("buffer too small: needed {needed} bytes, {available} available")]
    BufferTooSmall {
        /// Bytes the field requires
        needed: usize,
        /// Bytes left in the input
        available: usize,
    },
    /// Data element header byte with an unassigned type
    #[error("unknown data element header 0x{0:02X}")]
    UnknownHeader(u8),
    /// Size index not allowed for the data element type
    #[error("invalid size index {size_index} for data element type {type_tag}")]
    InvalidSizeDescriptor {
        /// 5-bit type descriptor
        type_tag: u8,
        /// 3-bit size index
        size_index: u8,
    },
    /// Sequence children do not add up to the declared length
    #[error("data element length mismatch: declared {declared}, consumed {consumed}")]
    LengthMismatch {
        /// Length in the sequence header
        declared: usize,
        /// Bytes consumed by the children
        consumed: usize,
    },
    /// Payload longer than a 32-bit length field can describe
    #[error("data element payload of {0} bytes is too large")]
    PayloadTooLarge(usize),
    /// Sequences nested deeper than the decoder accepts
    #[error("data elements nested deeper than {0} levels")]
    NestingTooDeep(usize),
    /// Bytes left over after a complete data element
    #[error("{0} trailing bytes after data element")]
    TrailingBytes(usize),
    /// PDU parameters violate the protocol
    #[error("invalid protocol data: {0}")]
    InvalidProtocolData(&'static str),
    /// PDU that does not answer the pending request
    #[error("unexpected PDU 0x{0:02X}")]
    UnexpectedPdu(u8),
    /// Error response sent by the remote SDP server
    #[error("SDP error response {code}: {info}")]
    ProtocolError {
        /// Error code of the response
        code: SdpErrorCode,
        /// Error info bytes rendered as text
        info: String,
    },
    /// Failure of the L2CAP channel
    #[error("transport failure: {0}")]
    Transport(String),
    /// Transaction canceled before it completed
    #[error("transaction terminated")]
    Terminated,
    /// Transaction table of the connection is full
    #[error("too many outstanding transactions")]
    TooManyTransactions,
}

impl From<SdpErrorCode> for SdpError {
    fn from(code: SdpErrorCode) -> Self {
        Self::ProtocolError {
            code,
            info: String::new(),
        }
    }
}

impl From<std::io::Error> for SdpError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
