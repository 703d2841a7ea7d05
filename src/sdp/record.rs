//! SDP Service Record Management
//!
//! This module turns decoded attribute lists into [`ServiceRecord`]s and
//! derives connection strings from their protocol descriptor lists.

use super::attribute::{
    AttributeList, ENGLISH_LANGUAGE_BASE_ID, SERVICE_NAME_OFFSET, UniversalAttributeId,
};
use super::element::DataElement;
use super::{AttributeId, ServiceRecordHandle};
use crate::{ConnectionUrl, Protocol, RemoteDevice, Uuid};

/// Standard Bluetooth Service Classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ServiceClassId {
    /// SDP Server Service
    ServiceDiscoveryServer = 0x1000,
    /// Browse Group Descriptor
    BrowseGroupDescriptor = 0x1001,
    /// Serial Port Profile
    SerialPort = 0x1101,
    /// LAN Access Using PPP
    LanAccessPpp = 0x1102,
    /// Dialup Networking
    DialupNetworking = 0x1103,
    /// Object Push Profile
    ObjectPush = 0x1105,
    /// File Transfer Profile
    FileTransfer = 0x1106,
    /// Headset Profile
    Headset = 0x1108,
    /// Audio Source
    AudioSource = 0x110A,
    /// Audio Sink
    AudioSink = 0x110B,
    /// A/V Remote Control Target
    AvRemoteControlTarget = 0x110C,
    /// Advanced Audio Distribution Profile
    AdvancedAudioDistribution = 0x110D,
    /// A/V Remote Control
    AvRemoteControl = 0x110E,
    /// Hands-Free Profile
    HandsFree = 0x111E,
    /// Hands-Free Audio Gateway
    HandsFreeAudioGateway = 0x111F,
    /// Human Interface Device
    HumanInterfaceDevice = 0x1124,
}

impl ServiceClassId {
    const ALL: [Self; 16] = [
        Self::ServiceDiscoveryServer,
        Self::BrowseGroupDescriptor,
        Self::SerialPort,
        Self::LanAccessPpp,
        Self::DialupNetworking,
        Self::ObjectPush,
        Self::FileTransfer,
        Self::Headset,
        Self::AudioSource,
        Self::AudioSink,
        Self::AvRemoteControlTarget,
        Self::AdvancedAudioDistribution,
        Self::AvRemoteControl,
        Self::HandsFree,
        Self::HandsFreeAudioGateway,
        Self::HumanInterfaceDevice,
    ];

    /// 16-bit UUID of the class
    #[must_use]
    pub const fn to_uuid(self) -> Uuid {
        Uuid::from_u16(self as u16)
    }

    /// Look up a class by UUID, in any width
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.to_uuid() == uuid)
    }
}

/// Security requirements of a derived connection string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityLevel {
    /// Neither authentication nor encryption
    #[default]
    NoAuthNoEncrypt,
    /// Authentication without encryption
    AuthNoEncrypt,
    /// Authentication and encryption
    AuthEncrypt,
}

/// Service Record
///
/// The attributes a remote SDP server returned for one service, in the
/// order it sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    device: RemoteDevice,
    attributes: AttributeList,
}

impl ServiceRecord {
    /// Create a record of `device` from its attributes
    #[must_use]
    pub fn new(device: RemoteDevice, attributes: AttributeList) -> Self {
        Self { device, attributes }
    }

    /// Device the record was retrieved from
    #[must_use]
    pub fn host_device(&self) -> &RemoteDevice {
        &self.device
    }

    /// Service record handle, if the record carries one
    #[must_use]
    pub fn handle(&self) -> Option<ServiceRecordHandle> {
        self.attribute_value(UniversalAttributeId::ServiceRecordHandle.to_u16())
            .and_then(DataElement::as_u32)
    }

    /// IDs of the retrieved attributes
    #[must_use]
    pub fn attribute_ids(&self) -> &[AttributeId] {
        &self.attributes.ids
    }

    /// Value of one attribute
    #[must_use]
    pub fn attribute_value(&self, id: AttributeId) -> Option<&DataElement> {
        self.attributes
            .iter()
            .find_map(|(attr, value)| (attr == id).then_some(value))
    }

    /// All retrieved attributes
    #[must_use]
    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// UUIDs of the service class ID list
    #[must_use]
    pub fn service_classes(&self) -> Vec<Uuid> {
        self.attribute_value(UniversalAttributeId::ServiceClassIdList.to_u16())
            .and_then(DataElement::elements)
            .map(|classes| classes.iter().filter_map(DataElement::as_uuid).collect())
            .unwrap_or_default()
    }

    /// Service name in the primary language
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.attribute_value(ENGLISH_LANGUAGE_BASE_ID + SERVICE_NAME_OFFSET)
            .and_then(DataElement::as_str)
    }

    /// Set an attribute, replacing an earlier value with the same ID
    pub fn set_attribute(&mut self, id: AttributeId, value: DataElement) {
        match self.attributes.ids.iter().position(|&attr| attr == id) {
            Some(index) => self.attributes.values[index] = value,
            None => self.attributes.push(id, value),
        }
    }

    pub(crate) fn merge(&mut self, attributes: AttributeList) {
        for (id, value) in attributes.ids.into_iter().zip(attributes.values) {
            self.set_attribute(id, value);
        }
    }

    /// Connection string for reaching the service
    ///
    /// The protocol is the highest layer found in the protocol descriptor
    /// list: OBEX over RFCOMM gives `btgoep`, RFCOMM gives `btspp`, bare
    /// L2CAP gives `btl2cap`. Returns `None` when the list is missing or
    /// names no usable port.
    #[must_use]
    pub fn connection_url(
        &self,
        security: SecurityLevel,
        must_be_master: bool,
    ) -> Option<ConnectionUrl> {
        let (protocol, port) = self.protocol_and_port()?;
        let (authenticate, encrypt) = match security {
            SecurityLevel::NoAuthNoEncrypt => (false, false),
            SecurityLevel::AuthNoEncrypt => (true, false),
            SecurityLevel::AuthEncrypt => (true, true),
        };
        Some(
            ConnectionUrl::client(protocol, self.device.addr, port)
                .with_master(must_be_master)
                .with_security(authenticate, encrypt),
        )
    }

    fn protocol_and_port(&self) -> Option<(Protocol, u16)> {
        let descriptors = self
            .attribute_value(UniversalAttributeId::ProtocolDescriptorList.to_u16())?
            .elements()?;

        let mut best: Option<Protocol> = None;
        let mut port: Option<u16> = None;
        for descriptor in descriptors {
            // entries that are not sequences carry nothing usable
            let Some(fields) = descriptor.elements() else {
                continue;
            };
            let mut layer = None;
            let mut layer_port = None;
            for field in fields {
                match field {
                    DataElement::UnsignedInt8(value) => layer_port = Some(u16::from(*value)),
                    DataElement::UnsignedInt16(value) => layer_port = Some(*value),
                    DataElement::Uuid(uuid) => layer = protocol_layer(*uuid).or(layer),
                    _ => {}
                }
            }
            let Some(layer) = layer else {
                continue;
            };
            if best.is_none_or(|best| rank(layer) > rank(best)) {
                best = Some(layer);
                if layer != Protocol::Obex {
                    port = layer_port;
                }
            } else if layer == Protocol::Rfcomm {
                // OBEX listed before RFCOMM
                port = layer_port;
            }
        }
        Some((best?, port?))
    }
}

fn protocol_layer(uuid: Uuid) -> Option<Protocol> {
    if uuid == Uuid::L2CAP {
        Some(Protocol::L2cap)
    } else if uuid == Uuid::RFCOMM {
        Some(Protocol::Rfcomm)
    } else if uuid == Uuid::OBEX {
        Some(Protocol::Obex)
    } else {
        None
    }
}

const fn rank(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::L2cap => 0,
        Protocol::Rfcomm => 1,
        Protocol::Obex => 2,
    }
}

/// Split a flattened attribute list into the records of `device`
pub(crate) fn assemble_records(device: &RemoteDevice, attributes: AttributeList) -> Vec<ServiceRecord> {
    attributes
        .split_records()
        .into_iter()
        .map(|attributes| ServiceRecord::new(device.clone(), attributes))
        .collect()
}
