#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

mod address;
mod class_of_device;
pub mod constants;
mod discovery;
pub mod event;
mod local;
pub mod port;
pub mod sdp;
pub mod stack;
#[cfg(test)]
mod testing;
mod url;
mod uuid;

use crate::constants::{
    DEFAULT_LIAC_TIMEOUT, DEFAULT_MAX_CONCURRENT_SEARCHES, DEFAULT_POLL_INTERVAL,
    DEFAULT_RETRIEVABLE_MAX, MAX_CONCURRENT_SEARCHES,
};
use std::time::Duration;

pub use address::BluetoothAddress;
pub use class_of_device::{
    ClassOfDevice, MajorDeviceClass, MajorServiceClasses, SERVICE_CLASSES_MASK,
};
pub use discovery::{
    DeviceListKind, DiscoveryAgent, DiscoveryListener, InquiryStatus, SearchStatus,
};
pub use local::LocalDevice;
pub use port::{L2capChannel, NativePort};
pub use sdp::{SdpError, SearchId, ServiceRecord, UuidForm};
pub use stack::BluetoothStack;
pub use url::{ConnectionUrl, Endpoint, Protocol, UrlError};
pub use uuid::{BASE_UUID, Uuid, UuidWidth};

/// A remote Bluetooth device seen by an inquiry or addressed by a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDevice {
    /// Bluetooth device address (`BD_ADDR`)
    pub addr: BluetoothAddress,
    /// Friendly name, if it has been retrieved
    pub name: Option<String>,
    /// Class of Device (`CoD`) reported by the inquiry, if any
    pub class_of_device: Option<ClassOfDevice>,
}

impl RemoteDevice {
    /// Create a new remote device
    #[must_use]
    pub fn new(addr: BluetoothAddress) -> Self {
        Self {
            addr,
            name: None,
            class_of_device: None,
        }
    }

    /// Update device with name information
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Update device with class of device information
    #[must_use]
    pub fn with_class_of_device(mut self, class_of_device: ClassOfDevice) -> Self {
        self.class_of_device = Some(class_of_device);
        self
    }
}

impl From<BluetoothAddress> for RemoteDevice {
    fn from(addr: BluetoothAddress) -> Self {
        Self::new(addr)
    }
}

/// Bluetooth-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BluetoothError {
    /// Invalid parameter provided (e.g., malformed address)
    #[error("invalid parameter")]
    InvalidParameter,
    /// Invalid argument with a description of the violated rule
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation not possible in the current radio or stack state
    #[error("Bluetooth state error: {0}")]
    State(&'static str),
    /// Too many concurrent requests
    #[error("too many concurrent requests")]
    ResourceExhausted,
    /// Failure of the underlying channel
    #[error("transport failure: {0}")]
    Transport(String),
    /// Options rejected by `validate`
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// Malformed connection string
    #[error(transparent)]
    Url(#[from] UrlError),
    /// Service discovery protocol failure
    #[error(transparent)]
    Sdp(#[from] SdpError),
}

/// Configuration options for the [`BluetoothStack`]
///
/// A zero timeout waits forever.
///
/// # Example
///
/// ```rust
/// use sdpbird::StackOptions;
/// use std::time::Duration;
///
/// let options = StackOptions {
///     friendly_name_timeout: Duration::from_secs(10),
///     ..StackOptions::default()
/// };
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOptions {
    /// Interval between two polls of the native port
    pub poll_interval: Duration,
    /// How long to wait for a remote name request to complete
    pub friendly_name_timeout: Duration,
    /// How long to wait for an authentication to complete
    pub authenticate_timeout: Duration,
    /// How long to wait for an encryption change
    pub encrypt_timeout: Duration,
    /// How long limited discoverable mode lasts before reverting
    pub liac_timeout: Duration,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            friendly_name_timeout: Duration::ZERO,
            authenticate_timeout: Duration::ZERO,
            encrypt_timeout: Duration::ZERO,
            liac_timeout: DEFAULT_LIAC_TIMEOUT,
        }
    }
}

impl StackOptions {
    /// Check the options for values the stack cannot run with
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` for a zero poll interval or LIAC timeout
    pub fn validate(&self) -> Result<(), BluetoothError> {
        if self.poll_interval.is_zero() {
            return Err(BluetoothError::InvalidConfiguration(
                "poll interval must be positive",
            ));
        }
        if self.liac_timeout.is_zero() {
            return Err(BluetoothError::InvalidConfiguration(
                "LIAC timeout must be positive",
            ));
        }
        Ok(())
    }
}

/// How service searches talk to the remote SDP server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SearchProtocol {
    /// One service search attribute request per search
    #[default]
    SinglePhase,
    /// A service search request, then one attribute request per handle
    TwoPhase,
}

/// Configuration options for service discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Concurrently running searches, at most [`MAX_CONCURRENT_SEARCHES`]
    pub max_concurrent_searches: usize,
    /// Attribute IDs a caller may request on top of the standard ones
    pub retrievable_max: usize,
    /// Request flavour used by searches
    pub protocol: SearchProtocol,
    /// `MaximumServiceRecordCount` sent in service search requests
    pub max_service_record_count: u16,
    /// `MaximumAttributeByteCount` sent in attribute requests
    pub max_attribute_byte_count: u16,
    /// How UUIDs are written into search patterns; 128-bit by default
    pub uuid_form: UuidForm,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_concurrent_searches: DEFAULT_MAX_CONCURRENT_SEARCHES,
            retrievable_max: DEFAULT_RETRIEVABLE_MAX,
            protocol: SearchProtocol::default(),
            max_service_record_count: 0xFFFF,
            max_attribute_byte_count: 0xFFFF,
            uuid_form: UuidForm::Canonical,
        }
    }
}

impl DiscoveryOptions {
    /// Check the options against the stack limits
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` when a limit is zero or above its ceiling
    pub fn validate(&self) -> Result<(), BluetoothError> {
        if self.max_concurrent_searches == 0
            || self.max_concurrent_searches > MAX_CONCURRENT_SEARCHES
        {
            return Err(BluetoothError::InvalidConfiguration(
                "concurrent searches must be within 1..=16",
            ));
        }
        if self.retrievable_max == 0 {
            return Err(BluetoothError::InvalidConfiguration(
                "retrievable attribute count must be positive",
            ));
        }
        if self.max_service_record_count == 0 || self.max_attribute_byte_count < 7 {
            return Err(BluetoothError::InvalidConfiguration(
                "request limits too small",
            ));
        }
        Ok(())
    }
}
