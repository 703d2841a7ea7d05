//! SDP Protocol Implementation
//!
//! This module implements the SDP PDU framing shared by every request and
//! response: the 5-byte header, the trailing continuation state, and the
//! parameter layouts of the client requests and their responses.

use super::codec::{Cursor, DataElementWriter};
use super::element::DataElement;
use super::{AttributeId, SdpError, SdpErrorCode, SdpPduId, ServiceRecordHandle, TransactionId};
use crate::Uuid;
use crate::constants::MAX_CONTINUATION_STATE;

/// Size of the PDU header in bytes
pub const PDU_HEADER_SIZE: usize = 5;

/// SDP PDU Header
///
/// All SDP messages start with this 5-byte header containing the PDU ID,
/// transaction ID, and parameter length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SdpPduHeader {
    /// PDU identifier
    pub pdu_id: SdpPduId,
    /// Transaction identifier
    pub transaction_id: TransactionId,
    /// Length of parameters following the header
    pub parameter_length: u16,
}

impl SdpPduHeader {
    /// Create new PDU header
    #[must_use]
    pub const fn new(
        pdu_id: SdpPduId,
        transaction_id: TransactionId,
        parameter_length: u16,
    ) -> Self {
        Self {
            pdu_id,
            transaction_id,
            parameter_length,
        }
    }

    /// Encode header to bytes
    #[must_use]
    pub fn encode(&self) -> [u8; PDU_HEADER_SIZE] {
        let [tid_hi, tid_lo] = self.transaction_id.to_be_bytes();
        let [len_hi, len_lo] = self.parameter_length.to_be_bytes();
        [self.pdu_id as u8, tid_hi, tid_lo, len_hi, len_lo]
    }

    /// Decode header from bytes
    ///
    /// # Errors
    /// Returns error if buffer is too small or the PDU ID is not assigned
    pub fn decode(data: &[u8]) -> Result<Self, SdpError> {
        let mut cursor = Cursor::new(data);
        let raw_id = cursor.read_u8()?;
        let pdu_id = SdpPduId::from_u8(raw_id).ok_or(SdpError::UnexpectedPdu(raw_id))?;
        let transaction_id = cursor.read_u16()?;
        let parameter_length = cursor.read_u16()?;
        Ok(Self::new(pdu_id, transaction_id, parameter_length))
    }
}

/// Split a received PDU into its header and parameters
///
/// # Errors
/// Returns error if the header is corrupt or the parameter length disagrees
/// with the PDU size
pub fn split_pdu(pdu: &[u8]) -> Result<(SdpPduHeader, &[u8]), SdpError> {
    let header = SdpPduHeader::decode(pdu)?;
    let parameters = &pdu[PDU_HEADER_SIZE..];
    if usize::from(header.parameter_length) != parameters.len() {
        return Err(SdpError::InvalidProtocolData(
            "parameter length does not match PDU size",
        ));
    }
    Ok((header, parameters))
}

/// Continuation state returned by a server whose response did not fit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuationState(heapless::Vec<u8, MAX_CONTINUATION_STATE>);

impl ContinuationState {
    /// State of a first request
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether the server has nothing more to send
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Opaque state bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Bytes the field takes in a PDU, including its length byte
    #[must_use]
    pub fn wire_len(&self) -> usize {
        1 + self.0.len()
    }

    /// Read the trailing continuation state field
    ///
    /// # Errors
    /// Returns error if the field is truncated or longer than 16 bytes
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, SdpError> {
        let len = usize::from(cursor.read_u8()?);
        if len > MAX_CONTINUATION_STATE {
            return Err(SdpError::InvalidProtocolData(
                "continuation state longer than 16 bytes",
            ));
        }
        let mut state = heapless::Vec::new();
        state
            .extend_from_slice(cursor.read_bytes(len)?)
            .map_err(|()| SdpError::InvalidProtocolData("continuation state overflow"))?;
        Ok(Self(state))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.0.len() as u8);
        out.extend_from_slice(&self.0);
    }
}

impl TryFrom<&[u8]> for ContinuationState {
    type Error = SdpError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        heapless::Vec::from_slice(bytes)
            .map(Self)
            .map_err(|()| SdpError::InvalidProtocolData("continuation state longer than 16 bytes"))
    }
}

/// Assemble a complete PDU
///
/// # Errors
/// Returns error if the parameters do not fit the 16-bit length field
pub fn build_pdu(
    pdu_id: SdpPduId,
    transaction_id: TransactionId,
    parameters: &[u8],
    continuation: &ContinuationState,
) -> Result<Vec<u8>, SdpError> {
    let parameter_length = u16::try_from(parameters.len() + continuation.wire_len())
        .map_err(|_| SdpError::InvalidProtocolData("PDU parameters too long"))?;
    let header = SdpPduHeader::new(pdu_id, transaction_id, parameter_length);

    let mut pdu = Vec::with_capacity(PDU_HEADER_SIZE + usize::from(parameter_length));
    pdu.extend_from_slice(&header.encode());
    pdu.extend_from_slice(parameters);
    continuation.write(&mut pdu);
    Ok(pdu)
}

/// Write a `ServiceSearchPattern`: a sequence of UUIDs
///
/// # Errors
/// Propagates data element encoding errors
pub fn write_search_pattern(writer: &mut DataElementWriter, uuids: &[Uuid]) -> Result<(), SdpError> {
    let pattern = uuids.iter().copied().map(DataElement::Uuid).collect();
    writer.write(&DataElement::Sequence(pattern))
}

/// Write an `AttributeIDList`: a sequence of 16-bit attribute IDs
///
/// # Errors
/// Propagates data element encoding errors
pub fn write_attribute_id_list(
    writer: &mut DataElementWriter,
    ids: &[AttributeId],
) -> Result<(), SdpError> {
    let list = ids.iter().copied().map(DataElement::UnsignedInt16).collect();
    writer.write(&DataElement::Sequence(list))
}

/// Parameters of a `ServiceSearchResponse`, without the continuation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSearchResponse {
    /// Total number of matching service records
    pub total_service_record_count: u16,
    /// Service record handles carried in this PDU
    pub service_record_handles: Vec<ServiceRecordHandle>,
}

impl ServiceSearchResponse {
    /// Parse the response parameters
    ///
    /// # Errors
    /// Returns error if the handle list is truncated or inconsistent
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, SdpError> {
        let total_service_record_count = cursor.read_u16()?;
        let current = cursor.read_u16()?;
        if current > total_service_record_count {
            return Err(SdpError::InvalidProtocolData(
                "current record count exceeds total",
            ));
        }
        let service_record_handles = (0..current)
            .map(|_| cursor.read_u32())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            total_service_record_count,
            service_record_handles,
        })
    }
}

/// Read the `AttributeListByteCount` and the attribute list fragment
///
/// # Errors
/// Returns error if the fragment is shorter than its byte count
pub fn read_attribute_list_fragment<'a>(cursor: &mut Cursor<'a>) -> Result<&'a [u8], SdpError> {
    let count = usize::from(cursor.read_u16()?);
    cursor.read_bytes(count)
}

/// Decode an `ErrorResponse` into a protocol error
///
/// # Errors
/// Returns `BufferTooSmall` if the error code is missing
pub fn read_error_response(cursor: &mut Cursor<'_>) -> Result<SdpError, SdpError> {
    let code = SdpErrorCode::from_u16(cursor.read_u16()?);
    let info = String::from_utf8_lossy(cursor.read_rest()).into_owned();
    Ok(SdpError::ProtocolError { code, info })
}
