//! `Sdpbird` Constants
//!
//! This module contains the constants used throughout the `Sdpbird` library.
//! These constants define limits, default values, and Bluetooth-specific
//! parameters used by the discovery stack.

use std::time::Duration;

/// General Inquiry Access Code (GIAC)
pub const GIAC: u32 = 0x9E_8B33;

/// Limited Inquiry Access Code (LIAC)
pub const LIAC: u32 = 0x9E_8B00;

/// Access code meaning the local device does not answer inquiries
pub const NOT_DISCOVERABLE: u32 = 0;

/// First inquiry access code of the reserved IAC range
pub const IAC_RANGE_START: u32 = 0x9E_8B00;

/// Last inquiry access code of the reserved IAC range
pub const IAC_RANGE_END: u32 = 0x9E_8B3F;

/// `BD_ADDR` length in bytes
pub const BD_ADDR_LENGTH: usize = 6;

/// Class of Device length in bytes
pub const CLASS_OF_DEVICE_LENGTH: usize = 3;

/// Maximum remote device name length in bytes (HCI limit)
pub const MAX_DEVICE_NAME_LENGTH: usize = 248;

/// Default interval between two polls of the native port
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Time the device stays in limited discoverable mode before reverting
pub const DEFAULT_LIAC_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between two attempts to leave limited discoverable mode
pub const LIAC_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Hard ceiling of concurrently running service searches
pub const MAX_CONCURRENT_SEARCHES: usize = 16;

/// Default number of concurrently running service searches
pub const DEFAULT_MAX_CONCURRENT_SEARCHES: usize = 10;

/// Default number of caller supplied attribute IDs per search
pub const DEFAULT_RETRIEVABLE_MAX: usize = 5;

/// Maximum number of UUIDs in a service search pattern
pub const MAX_SEARCH_UUIDS: usize = 12;

/// Maximum number of live transactions on one SDP connection
pub const MAX_TRANSACTIONS: usize = 16;

/// Maximum continuation state length allowed by the SDP specification
pub const MAX_CONTINUATION_STATE: usize = 16;

/// Maximum nesting depth accepted when decoding data elements
pub const MAX_NESTING_DEPTH: usize = 32;
