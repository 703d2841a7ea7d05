//! Bluetooth UUIDs
//!
//! A Bluetooth UUID is a 128-bit value, but most assigned numbers are
//! written as 16- or 32-bit aliases of the Bluetooth Base UUID
//! `00000000-0000-1000-8000-00805F9B34FB`. [`Uuid`] keeps the width it was
//! created or decoded with so that it can be written back in the same form,
//! while comparison always happens on the expanded 128-bit value.

use crate::BluetoothError;
use core::fmt;
use core::hash::{Hash, Hasher};

/// Bluetooth Base UUID with the 32-bit alias field cleared
pub const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Width a UUID was declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UuidWidth {
    /// 16-bit alias of the Base UUID
    Short16,
    /// 32-bit alias of the Base UUID
    Short32,
    /// Full 128-bit value
    Full128,
}

impl UuidWidth {
    /// Number of bytes this width occupies on the wire
    #[must_use]
    pub const fn byte_len(self) -> usize {
        match self {
            Self::Short16 => 2,
            Self::Short32 => 4,
            Self::Full128 => 16,
        }
    }
}

/// A Bluetooth UUID
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid {
    value: u128,
    width: UuidWidth,
}

impl Uuid {
    /// L2CAP protocol UUID
    pub const L2CAP: Uuid = Uuid::from_u16(0x0100);
    /// RFCOMM protocol UUID
    pub const RFCOMM: Uuid = Uuid::from_u16(0x0003);
    /// OBEX protocol UUID
    pub const OBEX: Uuid = Uuid::from_u16(0x0008);
    /// SDP protocol UUID
    pub const SDP: Uuid = Uuid::from_u16(0x0001);
    /// Public browse group root
    pub const PUBLIC_BROWSE_ROOT: Uuid = Uuid::from_u16(0x1002);

    /// Create a 16-bit UUID
    #[must_use]
    pub const fn from_u16(value: u16) -> Self {
        Self {
            value: value as u128,
            width: UuidWidth::Short16,
        }
    }

    /// Create a 32-bit UUID
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        Self {
            value: value as u128,
            width: UuidWidth::Short32,
        }
    }

    /// Create a full 128-bit UUID
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self {
            value,
            width: UuidWidth::Full128,
        }
    }

    /// Parse a UUID from hex digits
    ///
    /// A short UUID takes 1 to 8 digits and becomes a 16-bit UUID when it
    /// fits, a 32-bit one otherwise. A long UUID takes 1 to 32 digits.
    ///
    /// # Errors
    /// Returns an error for empty, oversized or non-hex input
    pub fn parse(text: &str, short: bool) -> Result<Self, BluetoothError> {
        let max_digits = if short { 8 } else { 32 };
        if text.is_empty()
            || text.len() > max_digits
            || !text.bytes().all(|c| c.is_ascii_hexdigit())
        {
            return Err(BluetoothError::InvalidParameter);
        }
        let value =
            u128::from_str_radix(text, 16).map_err(|_| BluetoothError::InvalidParameter)?;
        Ok(match (short, u16::try_from(value), u32::try_from(value)) {
            (true, Ok(v), _) => Self::from_u16(v),
            (true, Err(_), Ok(v)) => Self::from_u32(v),
            _ => Self::from_u128(value),
        })
    }

    /// Declared width
    #[must_use]
    pub const fn width(&self) -> UuidWidth {
        self.width
    }

    /// Value as declared, without Base UUID expansion
    #[must_use]
    pub const fn raw(&self) -> u128 {
        self.value
    }

    /// Canonical 128-bit value
    #[must_use]
    pub const fn to_u128(&self) -> u128 {
        match self.width {
            UuidWidth::Full128 => self.value,
            UuidWidth::Short16 | UuidWidth::Short32 => (self.value << 96) | BASE_UUID,
        }
    }

    /// The same UUID declared with the full 128-bit width
    #[must_use]
    pub const fn to_canonical(self) -> Self {
        Self::from_u128(self.to_u128())
    }

    /// Big-endian bytes of the declared width
    #[must_use]
    pub fn to_be_bytes(&self) -> heapless::Vec<u8, 16> {
        let bytes = self.value.to_be_bytes();
        let mut out = heapless::Vec::new();
        out.extend_from_slice(&bytes[16 - self.width.byte_len()..]).ok();
        out
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.to_u128() == other.to_u128()
    }
}

impl Eq for Uuid {}

impl Hash for Uuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_u128().hash(state);
    }
}

impl PartialOrd for Uuid {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Uuid {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.to_u128().cmp(&other.to_u128())
    }
}

/// Canonical form: 32 upper-case hex digits
impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032X}", self.to_u128())
    }
}

impl From<u16> for Uuid {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

impl From<u32> for Uuid {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl From<u128> for Uuid {
    fn from(value: u128) -> Self {
        Self::from_u128(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expands_through_base_uuid() {
        let spp = Uuid::from_u16(0x1101);
        assert_eq!(spp.to_u128(), 0x0000_1101_0000_1000_8000_0080_5F9B_34FB);
        assert_eq!(spp.to_string(), "0000110100001000800000805F9B34FB");
        assert_eq!(spp, Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB));
        assert_eq!(spp, Uuid::from_u32(0x1101));
    }

    #[test]
    fn test_full_uuid_is_kept_as_is() {
        let uuid = Uuid::from_u128(0x1234);
        assert_eq!(uuid.to_u128(), 0x1234);
        assert_eq!(uuid.to_string(), "00000000000000000000000000001234");
        assert_ne!(uuid, Uuid::from_u16(0x1234));
    }

    #[test]
    fn test_parse_uuid() {
        assert_eq!(Uuid::parse("1101", true).unwrap().width(), UuidWidth::Short16);
        assert_eq!(Uuid::parse("12345", true).unwrap().width(), UuidWidth::Short32);
        let long = Uuid::parse("0000110100001000800000805F9B34FB", false).unwrap();
        assert_eq!(long.width(), UuidWidth::Full128);
        assert_eq!(long, Uuid::from_u16(0x1101));

        assert!(Uuid::parse("", true).is_err());
        assert!(Uuid::parse("123456789", true).is_err());
        assert!(Uuid::parse("xyz", false).is_err());
        assert!(Uuid::parse("0000110100001000800000805F9B34FB0", false).is_err());
    }

    #[test]
    fn test_uuid_bytes_follow_declared_width() {
        assert_eq!(Uuid::from_u16(0x1101).to_be_bytes().as_slice(), &[0x11, 0x01]);
        assert_eq!(
            Uuid::from_u32(0x0001_1101).to_be_bytes().as_slice(),
            &[0x00, 0x01, 0x11, 0x01]
        );
        assert_eq!(Uuid::from_u16(0x1101).to_canonical().to_be_bytes().len(), 16);
    }
}
