//! Native event records
//!
//! The port reports asynchronous radio results as raw HCI-style event
//! records: an event code, a one-byte parameter length and little-endian
//! parameters. [`BluetoothEvent::parse`] decodes the records the stack
//! understands; the dispatcher thread then applies each one to the stack.

use crate::constants::{BD_ADDR_LENGTH, CLASS_OF_DEVICE_LENGTH, MAX_DEVICE_NAME_LENGTH};
use crate::stack::StackShared;
use crate::{BluetoothAddress, ClassOfDevice, InquiryStatus};

/// Inquiry Complete event code
pub const INQUIRY_COMPLETE: u8 = 0x01;
/// Inquiry Result event code
pub const INQUIRY_RESULT: u8 = 0x02;
/// Authentication Complete event code
pub const AUTHENTICATION_COMPLETE: u8 = 0x06;
/// Remote Name Request Complete event code
pub const REMOTE_NAME_REQUEST_COMPLETE: u8 = 0x07;
/// Encryption Change event code
pub const ENCRYPTION_CHANGE: u8 = 0x08;

// address, page scan repetition mode, reserved, class of device, clock offset
const INQUIRY_RESPONSE_LENGTH: usize = BD_ADDR_LENGTH + 1 + 2 + CLASS_OF_DEVICE_LENGTH + 2;

/// Errors decoding an event record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// Record without event code or length
    #[error("empty event record")]
    Empty,
    /// Event code the stack does not handle
    #[error("unknown event code 0x{0:02X}")]
    UnknownCode(u8),
    /// Parameters shorter than the event requires
    #[error("event 0x{code:02X} truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Event code
        code: u8,
        /// Bytes the parameters require
        needed: usize,
        /// Bytes present
        available: usize,
    },
}

/// A decoded native event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothEvent {
    /// The running inquiry ended
    InquiryComplete {
        /// HCI status, zero on success
        status: u8,
    },
    /// Devices answered the inquiry
    InquiryResult(Vec<(BluetoothAddress, ClassOfDevice)>),
    /// Authentication of a link finished
    AuthenticationComplete {
        /// HCI status, zero on success
        status: u8,
        /// Connection handle
        handle: u16,
    },
    /// A remote name request finished
    RemoteNameRequestComplete {
        /// HCI status, zero on success
        status: u8,
        /// Device asked
        address: BluetoothAddress,
        /// Friendly name, present on success
        name: Option<String>,
    },
    /// Encryption of a link was switched
    EncryptionChange {
        /// HCI status, zero on success
        status: u8,
        /// Connection handle
        handle: u16,
        /// Encryption state after the change
        enabled: bool,
    },
}

struct Params<'a> {
    code: u8,
    data: &'a [u8],
}

impl<'a> Params<'a> {
    fn require(&self, needed: usize) -> Result<(), EventError> {
        if self.data.len() < needed {
            return Err(EventError::Truncated {
                code: self.code,
                needed,
                available: self.data.len(),
            });
        }
        Ok(())
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn address_at(&self, offset: usize) -> BluetoothAddress {
        let mut raw = [0u8; BD_ADDR_LENGTH];
        raw.copy_from_slice(&self.data[offset..offset + BD_ADDR_LENGTH]);
        BluetoothAddress::from_le_bytes(raw)
    }

    fn class_at(&self, offset: usize) -> ClassOfDevice {
        let mut raw = [0u8; CLASS_OF_DEVICE_LENGTH];
        raw.copy_from_slice(&self.data[offset..offset + CLASS_OF_DEVICE_LENGTH]);
        ClassOfDevice::from_le_bytes(raw)
    }

    fn rest(&self, offset: usize) -> &'a [u8] {
        &self.data[offset..]
    }
}

impl BluetoothEvent {
    /// Decode one event record
    ///
    /// # Errors
    /// Returns an error for empty, unknown or truncated records
    pub fn parse(record: &[u8]) -> Result<Self, EventError> {
        let [code, length, data @ ..] = record else {
            return Err(EventError::Empty);
        };
        let params = Params { code: *code, data };
        params.require(usize::from(*length))?;
        let params = Params {
            code: *code,
            data: &data[..usize::from(*length)],
        };

        match *code {
            INQUIRY_COMPLETE => {
                params.require(1)?;
                Ok(Self::InquiryComplete {
                    status: params.data[0],
                })
            }
            INQUIRY_RESULT => Self::parse_inquiry_result(&params),
            AUTHENTICATION_COMPLETE => {
                params.require(3)?;
                Ok(Self::AuthenticationComplete {
                    status: params.data[0],
                    handle: params.u16_at(1),
                })
            }
            REMOTE_NAME_REQUEST_COMPLETE => {
                params.require(1 + BD_ADDR_LENGTH)?;
                let status = params.data[0];
                let name = (status == 0).then(|| {
                    let raw = params.rest(1 + BD_ADDR_LENGTH);
                    let raw = &raw[..raw.len().min(MAX_DEVICE_NAME_LENGTH)];
                    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                    String::from_utf8_lossy(&raw[..end]).into_owned()
                });
                Ok(Self::RemoteNameRequestComplete {
                    status,
                    address: params.address_at(1),
                    name,
                })
            }
            ENCRYPTION_CHANGE => {
                params.require(4)?;
                Ok(Self::EncryptionChange {
                    status: params.data[0],
                    handle: params.u16_at(1),
                    enabled: params.data[3] != 0,
                })
            }
            other => Err(EventError::UnknownCode(other)),
        }
    }

    // Parameters are grouped by field: all addresses, then all page scan
    // modes, and so on.
    fn parse_inquiry_result(params: &Params<'_>) -> Result<Self, EventError> {
        params.require(1)?;
        let count = usize::from(params.data[0]);
        params.require(1 + count * INQUIRY_RESPONSE_LENGTH)?;

        let addresses = 1;
        let classes = addresses + count * (BD_ADDR_LENGTH + 1 + 2);
        let devices = (0..count)
            .map(|i| {
                (
                    params.address_at(addresses + i * BD_ADDR_LENGTH),
                    params.class_at(classes + i * CLASS_OF_DEVICE_LENGTH),
                )
            })
            .collect();
        Ok(Self::InquiryResult(devices))
    }

    /// Apply the event to the stack
    pub(crate) fn process(self, stack: &StackShared) {
        match self {
            Self::InquiryComplete { status } => {
                let status = if status == 0 {
                    InquiryStatus::Completed
                } else {
                    InquiryStatus::Error
                };
                stack.inquiry_completed(status);
            }
            Self::InquiryResult(devices) => stack.devices_discovered(&devices),
            Self::AuthenticationComplete { status, handle } => {
                stack.authentication_completed(handle, status == 0);
            }
            Self::RemoteNameRequestComplete { address, name, .. } => {
                stack.name_resolved(address, name);
            }
            Self::EncryptionChange {
                status,
                handle,
                enabled,
            } => stack.encryption_changed(handle, status == 0, enabled),
        }
    }
}
