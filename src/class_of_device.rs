//! Class of Device (`CoD`) for discovered and local devices
//!
//! The Class of Device is a 24-bit field reported with every inquiry result
//! and configured on the local radio:
//! - Major Service Classes (bits 23-13): 11 bits indicating supported services
//! - Major Device Class (bits 12-8): 5 bits identifying device category
//! - Minor Device Class (bits 7-2): 6 bits for device subcategory
//! - Format Type (bits 1-0): 2 bits (always 0b00)
//!
//! ```rust
//! use sdpbird::{ClassOfDevice, MajorDeviceClass};
//!
//! let cod = ClassOfDevice::from_le_bytes([0x0C, 0x02, 0x5A]);
//! assert_eq!(cod.major_device_class(), MajorDeviceClass::Phone);
//! assert!(cod.major_service_classes().telephony());
//! ```

use crate::constants::CLASS_OF_DEVICE_LENGTH;
use core::fmt;

/// Bits of the 24-bit field that belong to the major service classes
pub const SERVICE_CLASSES_MASK: u32 = 0x00FF_E000;

/// Class of Device (`CoD`) indicating device type and capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClassOfDevice {
    raw: u32,
}

impl ClassOfDevice {
    /// Create a `ClassOfDevice` from raw 24-bit value
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self {
            raw: raw & 0xFF_FFFF,
        }
    }

    /// Parse the 3-byte little-endian form carried in HCI event records
    #[must_use]
    pub fn from_le_bytes(bytes: [u8; CLASS_OF_DEVICE_LENGTH]) -> Self {
        Self::from_raw(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    /// Get the raw 24-bit value
    #[must_use]
    pub fn raw(&self) -> u32 {
        self.raw
    }

    /// Get the Major Device Class (bits 12-8)
    #[must_use]
    pub fn major_device_class(&self) -> MajorDeviceClass {
        let major = (self.raw >> 8) & 0x1F;
        MajorDeviceClass::from_raw(major as u8)
    }

    /// Get the Minor Device Class (bits 7-2)
    #[must_use]
    pub fn minor_device_class(&self) -> u8 {
        ((self.raw >> 2) & 0x3F) as u8
    }

    /// Get the Major Service Classes (bits 23-13)
    #[must_use]
    pub fn major_service_classes(&self) -> MajorServiceClasses {
        let services = (self.raw >> 13) & 0x7FF;
        MajorServiceClasses::from_raw(services as u16)
    }

    /// Check that a mask only touches the major service class bits
    ///
    /// Service classes are advertised by the radio on behalf of registered
    /// services; any other bit in the mask is a caller error.
    #[must_use]
    pub const fn is_valid_service_mask(mask: u32) -> bool {
        mask & !SERVICE_CLASSES_MASK == 0
    }

    /// Return a copy with the given service class bits set
    #[must_use]
    pub fn with_service_classes(self, mask: u32) -> Self {
        Self::from_raw(self.raw | (mask & SERVICE_CLASSES_MASK))
    }
}

impl fmt::Display for ClassOfDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (minor 0x{:02X})",
            self.major_device_class().description(),
            self.minor_device_class()
        )?;
        let services = self.major_service_classes();
        if services.raw() != 0 {
            write!(f, " - Services: 0x{:03X}", services.raw())?;
        }
        Ok(())
    }
}

/// Major Device Class enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MajorDeviceClass {
    /// Miscellaneous devices
    Miscellaneous,
    /// Computer devices (desktop, server, laptop, etc.)
    Computer,
    /// Phone devices (cellular, cordless, smartphone, etc.)
    Phone,
    /// LAN/Network Access Point devices
    LanNetworkAccessPoint,
    /// Audio/Video devices (headphones, speakers, microphones, etc.)
    AudioVideo,
    /// Peripheral devices (keyboard, mouse, etc.)
    Peripheral,
    /// Imaging devices (display, camera, scanner, printer)
    Imaging,
    /// Wearable devices (watch, glasses, etc.)
    Wearable,
    /// Toy devices (robot, vehicle, controller, etc.)
    Toy,
    /// Health devices (monitor, scale, etc.)
    Health,
    /// Uncategorized devices
    Uncategorized,
    /// Reserved or unknown device class
    Reserved(u8),
}

impl MajorDeviceClass {
    /// Create `MajorDeviceClass` from raw 5-bit value
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::Miscellaneous,
            0x01 => Self::Computer,
            0x02 => Self::Phone,
            0x03 => Self::LanNetworkAccessPoint,
            0x04 => Self::AudioVideo,
            0x05 => Self::Peripheral,
            0x06 => Self::Imaging,
            0x07 => Self::Wearable,
            0x08 => Self::Toy,
            0x09 => Self::Health,
            0x1F => Self::Uncategorized,
            other => Self::Reserved(other),
        }
    }

    /// Get human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Miscellaneous => "Miscellaneous",
            Self::Computer => "Computer",
            Self::Phone => "Phone",
            Self::LanNetworkAccessPoint => "LAN/Network Access Point",
            Self::AudioVideo => "Audio/Video",
            Self::Peripheral => "Peripheral",
            Self::Imaging => "Imaging",
            Self::Wearable => "Wearable",
            Self::Toy => "Toy",
            Self::Health => "Health",
            Self::Uncategorized => "Uncategorized",
            Self::Reserved(_) => "Reserved",
        }
    }
}

/// Major Service Classes bit field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MajorServiceClasses {
    raw: u16,
}

impl MajorServiceClasses {
    /// Create from raw 11-bit value
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self { raw: raw & 0x7FF }
    }

    /// Get raw value
    #[must_use]
    pub fn raw(&self) -> u16 {
        self.raw
    }

    /// Limited Discoverable Mode
    #[must_use]
    pub fn limited_discoverable_mode(&self) -> bool {
        (self.raw & 0x001) != 0
    }

    /// Positioning
    #[must_use]
    pub fn positioning(&self) -> bool {
        (self.raw & 0x008) != 0
    }

    /// Networking
    #[must_use]
    pub fn networking(&self) -> bool {
        (self.raw & 0x010) != 0
    }

    /// Rendering
    #[must_use]
    pub fn rendering(&self) -> bool {
        (self.raw & 0x020) != 0
    }

    /// Capturing
    #[must_use]
    pub fn capturing(&self) -> bool {
        (self.raw & 0x040) != 0
    }

    /// Object Transfer
    #[must_use]
    pub fn object_transfer(&self) -> bool {
        (self.raw & 0x080) != 0
    }

    /// Audio
    #[must_use]
    pub fn audio(&self) -> bool {
        (self.raw & 0x100) != 0
    }

    /// Telephony
    #[must_use]
    pub fn telephony(&self) -> bool {
        (self.raw & 0x200) != 0
    }

    /// Information
    #[must_use]
    pub fn information(&self) -> bool {
        (self.raw & 0x400) != 0
    }
}
