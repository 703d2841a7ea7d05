//! SDP Attribute Processing
//!
//! This module provides the universal attribute IDs, the preparation of the
//! attribute and UUID sets sent with a search, and [`AttributeList`], the
//! decoded form of the attribute lists carried by attribute responses.

use super::element::DataElement;
use super::{AttributeId, SdpError};
use crate::constants::MAX_SEARCH_UUIDS;
use crate::{BluetoothError, Uuid};
use std::collections::BTreeSet;

/// Universal SDP Attribute IDs
///
/// These are standardized attribute IDs defined by the Bluetooth SIG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum UniversalAttributeId {
    /// Service Record Handle
    ServiceRecordHandle = 0x0000,
    /// Service Class ID List
    ServiceClassIdList = 0x0001,
    /// Service Record State
    ServiceRecordState = 0x0002,
    /// Service ID
    ServiceId = 0x0003,
    /// Protocol Descriptor List
    ProtocolDescriptorList = 0x0004,
    /// Browse Group List
    BrowseGroupList = 0x0005,
    /// Language Based Attribute ID List
    LanguageBaseAttributeIdList = 0x0006,
    /// Service Info Time To Live
    ServiceInfoTimeToLive = 0x0007,
    /// Service Availability
    ServiceAvailability = 0x0008,
    /// Bluetooth Profile Descriptor List
    BluetoothProfileDescriptorList = 0x0009,
    /// Documentation URL
    DocumentationUrl = 0x000A,
    /// Client Executable URL
    ClientExecutableUrl = 0x000B,
    /// Icon URL
    IconUrl = 0x000C,
    /// Additional Protocol Descriptor Lists
    AdditionalProtocolDescriptorLists = 0x000D,
}

impl UniversalAttributeId {
    /// Convert to u16 value
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Create from u16 value
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::ServiceRecordHandle),
            0x0001 => Some(Self::ServiceClassIdList),
            0x0002 => Some(Self::ServiceRecordState),
            0x0003 => Some(Self::ServiceId),
            0x0004 => Some(Self::ProtocolDescriptorList),
            0x0005 => Some(Self::BrowseGroupList),
            0x0006 => Some(Self::LanguageBaseAttributeIdList),
            0x0007 => Some(Self::ServiceInfoTimeToLive),
            0x0008 => Some(Self::ServiceAvailability),
            0x0009 => Some(Self::BluetoothProfileDescriptorList),
            0x000A => Some(Self::DocumentationUrl),
            0x000B => Some(Self::ClientExecutableUrl),
            0x000C => Some(Self::IconUrl),
            0x000D => Some(Self::AdditionalProtocolDescriptorLists),
            _ => None,
        }
    }
}

/// Standard Language Base ID for English
pub const ENGLISH_LANGUAGE_BASE_ID: u16 = 0x0100;

/// Offset of the service name from the language base ID
pub const SERVICE_NAME_OFFSET: u16 = 0x0000;

/// Attributes fetched by every search, whatever the caller asks for
pub const STANDARD_ATTRIBUTES: [AttributeId; 5] = [
    UniversalAttributeId::ServiceRecordHandle.to_u16(),
    UniversalAttributeId::ServiceClassIdList.to_u16(),
    UniversalAttributeId::ServiceRecordState.to_u16(),
    UniversalAttributeId::ServiceId.to_u16(),
    UniversalAttributeId::ProtocolDescriptorList.to_u16(),
];

/// Merge the caller's attribute IDs with the standard ones
///
/// The result is sorted ascending and free of duplicates.
///
/// # Errors
/// Returns `InvalidArgument` for an empty set and `ResourceExhausted` for a
/// set longer than `retrievable_max`
pub fn extend_by_standard_attrs(
    attrs: Option<&[AttributeId]>,
    retrievable_max: usize,
) -> Result<Vec<AttributeId>, BluetoothError> {
    let mut merged: BTreeSet<AttributeId> = STANDARD_ATTRIBUTES.into_iter().collect();
    if let Some(attrs) = attrs {
        if attrs.is_empty() {
            return Err(BluetoothError::InvalidArgument(
                "attribute set is empty".into(),
            ));
        }
        if attrs.len() > retrievable_max {
            return Err(BluetoothError::ResourceExhausted);
        }
        merged.extend(attrs.iter().copied());
    }
    Ok(merged.into_iter().collect())
}

/// Remove duplicate UUIDs, keeping the first occurrence
///
/// # Errors
/// Returns `InvalidArgument` for an empty set and `ResourceExhausted` when
/// more than [`MAX_SEARCH_UUIDS`] distinct UUIDs remain
pub fn dedup_uuids(uuids: &[Uuid]) -> Result<heapless::Vec<Uuid, MAX_SEARCH_UUIDS>, BluetoothError> {
    if uuids.is_empty() {
        return Err(BluetoothError::InvalidArgument("UUID set is empty".into()));
    }
    let mut unique = heapless::Vec::new();
    for uuid in uuids {
        if !unique.contains(uuid) {
            unique
                .push(*uuid)
                .map_err(|_| BluetoothError::ResourceExhausted)?;
        }
    }
    Ok(unique)
}

/// Attribute IDs and their values, in the order the server sent them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    /// Attribute IDs
    pub ids: Vec<AttributeId>,
    /// Values, parallel to `ids`
    pub values: Vec<DataElement>,
}

impl AttributeList {
    /// Create an empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attributes
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the list holds no attribute
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Append one attribute
    pub fn push(&mut self, id: AttributeId, value: DataElement) {
        self.ids.push(id);
        self.values.push(value);
    }

    /// Iterate over `(id, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (AttributeId, &DataElement)> {
        self.ids.iter().copied().zip(self.values.iter())
    }

    /// Decode an `AttributeList`: a sequence of alternating IDs and values
    ///
    /// # Errors
    /// Returns `InvalidProtocolData` if the element is not a well-formed list
    pub fn from_element(element: DataElement) -> Result<Self, SdpError> {
        let mut list = Self::new();
        list.append_pairs(element)?;
        Ok(list)
    }

    /// Decode `AttributeLists`: a sequence of attribute lists, one per record
    ///
    /// The lists are concatenated; every record starts with its handle, so
    /// [`split_records`](Self::split_records) recovers the boundaries.
    ///
    /// # Errors
    /// Returns `InvalidProtocolData` if the element is not a well-formed list
    pub fn from_nested(element: DataElement) -> Result<Self, SdpError> {
        let DataElement::Sequence(records) = element else {
            return Err(SdpError::InvalidProtocolData(
                "attribute lists are not a sequence",
            ));
        };
        let mut list = Self::new();
        for record in records {
            list.append_pairs(record)?;
        }
        Ok(list)
    }

    fn append_pairs(&mut self, element: DataElement) -> Result<(), SdpError> {
        let DataElement::Sequence(items) = element else {
            return Err(SdpError::InvalidProtocolData("attribute list is not a sequence"));
        };
        if items.len() % 2 != 0 {
            return Err(SdpError::InvalidProtocolData(
                "attribute list has an ID without value",
            ));
        }
        let mut items = items.into_iter();
        while let (Some(id), Some(value)) = (items.next(), items.next()) {
            let id = id.as_u16().ok_or(SdpError::InvalidProtocolData(
                "attribute ID is not a 16-bit unsigned integer",
            ))?;
            self.push(id, value);
        }
        Ok(())
    }

    /// Split a flattened list into one list per record
    ///
    /// A record starts at every `ServiceRecordHandle` attribute after the
    /// first position.
    #[must_use]
    pub fn split_records(self) -> Vec<AttributeList> {
        let handle_id = UniversalAttributeId::ServiceRecordHandle.to_u16();
        let mut records = Vec::new();
        let mut current = Self::new();
        for (id, value) in self.ids.into_iter().zip(self.values) {
            if id == handle_id && !current.is_empty() {
                records.push(core::mem::take(&mut current));
            }
            current.push(id, value);
        }
        if !current.is_empty() {
            records.push(current);
        }
        records
    }
}
