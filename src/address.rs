use crate::BluetoothError;
use crate::constants::BD_ADDR_LENGTH;
use core::fmt;

const HEX_CHARS: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
];

/// A Bluetooth Device Address (`BD_ADDR`) wrapper for type safety
///
/// Bytes are stored most significant first, the order in which the address
/// is written in connection strings and in colon form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BluetoothAddress(pub [u8; BD_ADDR_LENGTH]);

impl BluetoothAddress {
    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }

    /// Create an address from the little-endian byte order used by HCI
    #[must_use]
    pub const fn from_le_bytes(raw: [u8; BD_ADDR_LENGTH]) -> Self {
        Self([raw[5], raw[4], raw[3], raw[2], raw[1], raw[0]])
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BD_ADDR_LENGTH] {
        &self.0
    }

    /// Format the address as a colon-separated hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            result.push(HEX_CHARS[(byte >> 4) as usize]).ok();
            result.push(HEX_CHARS[(byte & 0x0F) as usize]).ok();
        }
        result
    }

    /// Format the address as the 12 digit form used in connection strings
    #[must_use]
    pub fn format_compact(&self) -> heapless::String<12> {
        let mut result = heapless::String::new();
        for byte in &self.0 {
            result.push(HEX_CHARS[(byte >> 4) as usize]).ok();
            result.push(HEX_CHARS[(byte & 0x0F) as usize]).ok();
        }
        result
    }

    /// Parse a Bluetooth address from a colon-separated hex string
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 17 characters long or contains invalid characters
    pub fn from_hex(hex: &str) -> Result<Self, BluetoothError> {
        if hex.len() != 17 || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(BluetoothError::InvalidParameter);
        }

        let mut bytes = [0u8; BD_ADDR_LENGTH];
        for (i, byte) in hex.split(':').enumerate() {
            if i >= BD_ADDR_LENGTH || byte.len() != 2 {
                return Err(BluetoothError::InvalidParameter);
            }
            bytes[i] =
                u8::from_str_radix(byte, 16).map_err(|_| BluetoothError::InvalidParameter)?;
        }
        Ok(Self(bytes))
    }

    /// Parse the 12 hex digit address form used in connection strings
    ///
    /// # Errors
    /// Returns an error unless the input is exactly 12 hex digits
    pub fn from_compact(hex: &str) -> Result<Self, BluetoothError> {
        if hex.len() != 2 * BD_ADDR_LENGTH || !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(BluetoothError::InvalidParameter);
        }

        let mut bytes = [0u8; BD_ADDR_LENGTH];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|_| BluetoothError::InvalidParameter)?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_hex())
    }
}

impl From<[u8; BD_ADDR_LENGTH]> for BluetoothAddress {
    fn from(addr: [u8; BD_ADDR_LENGTH]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; BD_ADDR_LENGTH] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = BluetoothError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        if hex.contains(':') {
            BluetoothAddress::from_hex(hex)
        } else {
            BluetoothAddress::from_compact(hex)
        }
    }
}

impl TryFrom<&[u8]> for BluetoothAddress {
    type Error = BluetoothError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let addr: [u8; BD_ADDR_LENGTH] = bytes
            .try_into()
            .map_err(|_| BluetoothError::InvalidParameter)?;
        Ok(BluetoothAddress(addr))
    }
}
