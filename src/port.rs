//! Native radio port
//!
//! The stack never talks to a controller itself. Everything it needs from
//! the radio goes through a [`NativePort`] handed to
//! [`BluetoothStack::new`](crate::BluetoothStack::new): device control calls
//! returning plain booleans and bytes, raw event records for the event pump,
//! and L2CAP channels for SDP.
//!
//! The port can be backed by a kernel socket layer, a vendor SDK or an HCI
//! transport; test code provides a scripted implementation.

use crate::{BluetoothAddress, ConnectionUrl, RemoteDevice};
use std::io;

/// A packet-oriented L2CAP channel
///
/// Every `send` writes exactly one SDU and every `receive` returns exactly
/// one. `receive` blocks until a packet arrives or the channel fails;
/// after `close` it must return an error promptly.
pub trait L2capChannel: Send + Sync {
    /// Send one packet
    ///
    /// # Errors
    /// Returns the underlying I/O error
    fn send(&self, packet: &[u8]) -> io::Result<()>;

    /// Receive one packet
    ///
    /// # Errors
    /// Returns the underlying I/O error, or an error after `close`
    fn receive(&self) -> io::Result<Vec<u8>>;

    /// Close the channel
    ///
    /// # Errors
    /// Returns the underlying I/O error
    fn close(&self) -> io::Result<()>;
}

/// Device control operations of the local radio
///
/// Methods that start an asynchronous procedure return whether the
/// procedure was started; its result arrives later as an event record read
/// through [`read_event`](Self::read_event).
pub trait NativePort: Send + Sync {
    /// Whether the radio is powered on
    fn is_enabled(&self) -> bool;

    /// Power the radio on, returning whether it is on afterwards
    fn enable(&self) -> bool;

    /// Local `BD_ADDR`
    fn local_address(&self) -> BluetoothAddress;

    /// Local friendly name, if the radio reports one
    fn local_name(&self) -> Option<String>;

    /// Local class of device as a raw 24-bit value
    fn device_class(&self) -> u32;

    /// Set the major service class bits of the local class of device
    fn set_service_classes(&self, mask: u32) -> bool;

    /// Current inquiry access code the radio answers to
    fn access_code(&self) -> u32;

    /// Set the inquiry access code, `0` for not discoverable
    fn set_access_code(&self, code: u32) -> bool;

    /// Start an inquiry with the given access code
    fn start_inquiry(&self, access_code: u32) -> bool;

    /// Cancel the running inquiry
    fn cancel_inquiry(&self) -> bool;

    /// Start a remote name request
    fn ask_friendly_name(&self, address: BluetoothAddress) -> bool;

    /// ACL connection handle of a connected device
    fn connection_handle(&self, address: BluetoothAddress) -> Option<u16>;

    /// Whether a link key exists for the device
    fn is_paired(&self, address: BluetoothAddress) -> bool;

    /// Whether the current link to the device is authenticated
    fn is_authenticated(&self, address: BluetoothAddress) -> bool;

    /// Passkey to bond with, usually obtained from the user
    fn passkey(&self, address: BluetoothAddress) -> Option<String>;

    /// Bond with the device using the passkey
    fn bond(&self, address: BluetoothAddress, passkey: &str) -> bool;

    /// Start authentication of the link with the given handle
    fn authenticate(&self, handle: u16) -> bool;

    /// Start switching encryption of the link with the given handle
    fn set_encryption(&self, handle: u16, enable: bool) -> bool;

    /// Devices the radio already knows, such as paired ones
    fn preknown_devices(&self) -> Vec<RemoteDevice> {
        Vec::new()
    }

    /// Whether event records are waiting to be read
    fn check_events(&self) -> bool;

    /// Read the next event record
    fn read_event(&self) -> Option<Vec<u8>>;

    /// Open an L2CAP client channel to the URL's address and PSM
    ///
    /// # Errors
    /// Returns the underlying I/O error if the channel cannot be opened
    fn open_l2cap(&self, url: &ConnectionUrl) -> io::Result<Box<dyn L2capChannel>>;
}
