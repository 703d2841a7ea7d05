//! Device and service discovery
//!
//! [`DiscoveryAgent`] is the application entry point: it runs inquiries
//! through the [`BluetoothStack`] and service searches through a
//! [`ServiceDiscoverer`], reporting both to a [`DiscoveryListener`].

use crate::constants::{GIAC, IAC_RANGE_END, IAC_RANGE_START, LIAC};
use crate::sdp::{AttributeId, SearchId, ServiceDiscoverer, ServiceRecord};
use crate::{
    BluetoothAddress, BluetoothError, BluetoothStack, ClassOfDevice, DiscoveryOptions,
    RemoteDevice, Uuid,
};
use log::debug;
use std::sync::Arc;

/// How an inquiry ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InquiryStatus {
    /// The radio finished the inquiry
    Completed,
    /// The inquiry was canceled
    Terminated,
    /// The radio reported a failure
    Error,
}

/// How a service search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SearchStatus {
    /// All matching records were reported
    Completed,
    /// The search was canceled or its connection closed
    Terminated,
    /// The search failed
    Error,
    /// The server has no matching record
    NoRecords,
    /// The SDP channel could not be opened or broke down
    DeviceNotReachable,
}

/// Which devices [`DiscoveryAgent::retrieve_devices`] returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceListKind {
    /// Devices found by inquiries
    Cached,
    /// Devices the radio already knows, such as paired ones
    Preknown,
}

/// Receiver of discovery results
///
/// Inquiry callbacks run on the stack's dispatcher thread, except for the
/// `Terminated` completion of a canceled inquiry which runs on the
/// canceling thread. Search callbacks run on the search's worker thread.
/// Every inquiry and every search completes exactly once.
#[allow(unused_variables)]
pub trait DiscoveryListener: Send + Sync {
    /// A device answered the inquiry; reported once per inquiry
    fn device_discovered(&self, device: &RemoteDevice, class: ClassOfDevice) {}

    /// The inquiry ended
    fn inquiry_completed(&self, status: InquiryStatus) {}

    /// Records found by a search
    fn services_discovered(&self, search_id: SearchId, records: &[ServiceRecord]) {}

    /// The search ended
    fn service_search_completed(&self, search_id: SearchId, status: SearchStatus) {}
}

/// Entry point for inquiries and service searches
pub struct DiscoveryAgent {
    stack: Arc<BluetoothStack>,
    discoverer: ServiceDiscoverer,
}

impl DiscoveryAgent {
    /// Create an agent on top of `stack`
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the options do not validate
    pub fn new(stack: Arc<BluetoothStack>, options: DiscoveryOptions) -> Result<Self, BluetoothError> {
        let discoverer = ServiceDiscoverer::new(Arc::clone(stack.port()), options)?;
        Ok(Self { stack, discoverer })
    }

    /// Start an inquiry with a general, limited or reserved access code
    ///
    /// # Errors
    /// Returns `InvalidArgument` for other access codes, or a state error
    /// if the radio is off or an inquiry is already running
    pub fn start_inquiry(
        &self,
        access_code: u32,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<(), BluetoothError> {
        let valid = access_code == GIAC
            || access_code == LIAC
            || (IAC_RANGE_START..=IAC_RANGE_END).contains(&access_code);
        if !valid {
            return Err(BluetoothError::InvalidArgument(format!(
                "invalid access code 0x{access_code:06X}"
            )));
        }
        self.stack.start_inquiry(access_code, listener)
    }

    /// Cancel the inquiry started with `listener`
    pub fn cancel_inquiry(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        self.stack.cancel_inquiry(listener)
    }

    /// Devices found by inquiries, or the ones the radio already knows
    #[must_use]
    pub fn retrieve_devices(&self, kind: DeviceListKind) -> Vec<RemoteDevice> {
        match kind {
            DeviceListKind::Cached => self.stack.cached_devices(),
            DeviceListKind::Preknown => self.stack.port().preknown_devices(),
        }
    }

    /// Search `device` for records matching all `uuids`
    ///
    /// The standard attributes (handle, class IDs, record state, service
    /// ID, protocol descriptor list) are fetched in addition to `attrs`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for empty sets and `ResourceExhausted` for
    /// oversized sets or too many running searches
    pub fn search_services(
        &self,
        attrs: Option<&[AttributeId]>,
        uuids: &[Uuid],
        device: RemoteDevice,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<SearchId, BluetoothError> {
        let search_id = self.discoverer.start(attrs, uuids, device, listener)?;
        debug!("[DISCOVERY] Started search {search_id}");
        Ok(search_id)
    }

    /// Cancel a search; `false` if it already completed
    pub fn cancel_service_search(&self, search_id: SearchId) -> bool {
        self.discoverer.cancel(search_id)
    }

    /// Fetch more attributes of a record found by a search
    ///
    /// # Errors
    /// See [`ServiceDiscoverer::populate_record`]
    pub fn populate_record(
        &self,
        record: &mut ServiceRecord,
        attr_ids: &[AttributeId],
    ) -> Result<bool, BluetoothError> {
        self.discoverer.populate_record(record, attr_ids)
    }

    /// Ask a remote device for its friendly name
    #[must_use]
    pub fn friendly_name(&self, address: BluetoothAddress) -> Option<String> {
        self.stack.ask_friendly_name(address)
    }
}

impl core::fmt::Debug for DiscoveryAgent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DiscoveryAgent")
            .field("discoverer", &self.discoverer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::records;
    use crate::port::NativePort;
    use crate::testing::{self, FakeSdpServer, MockPort, Recorder};
    use crate::StackOptions;
    use std::time::Duration;

    fn agent(port: &Arc<MockPort>) -> DiscoveryAgent {
        testing::init_logging();
        let stack = BluetoothStack::new(
            Arc::clone(port) as Arc<dyn NativePort>,
            StackOptions {
                poll_interval: Duration::from_millis(5),
                friendly_name_timeout: Duration::from_secs(5),
                ..StackOptions::default()
            },
        )
        .unwrap();
        DiscoveryAgent::new(Arc::new(stack), DiscoveryOptions::default()).unwrap()
    }

    fn peer() -> BluetoothAddress {
        BluetoothAddress::new([0x00, 0x0A, 0x95, 0x12, 0x34, 0x56])
    }

    #[test]
    fn test_access_code_validation() {
        let port = Arc::new(MockPort::new());
        let agent = agent(&port);
        let listener: Arc<dyn DiscoveryListener> = Arc::new(Recorder::default());

        assert!(matches!(
            agent.start_inquiry(0x9E_8B40, Arc::clone(&listener)),
            Err(BluetoothError::InvalidArgument(_))
        ));
        assert!(agent.start_inquiry(0x9E_8B10, Arc::clone(&listener)).is_ok());
        assert!(agent.cancel_inquiry(&listener));
        assert!(agent.start_inquiry(GIAC, Arc::clone(&listener)).is_ok());
        assert_eq!(port.started_inquiries(), [0x9E_8B10, GIAC]);
    }

    #[test]
    fn test_retrieve_devices() {
        let port = Arc::new(MockPort::new());
        port.add_preknown(RemoteDevice::new(peer()).with_name("Laptop"));
        let agent = agent(&port);
        let recorder = Arc::new(Recorder::default());

        assert!(agent.retrieve_devices(DeviceListKind::Cached).is_empty());
        agent.start_inquiry(GIAC, recorder.clone()).unwrap();
        port.push_event(records::inquiry_result(&[(peer(), 0x0010_0104)]));
        port.push_event(records::inquiry_complete(0));
        assert_eq!(recorder.wait_inquiry_completed(), Some(InquiryStatus::Completed));

        let cached = agent.retrieve_devices(DeviceListKind::Cached);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].class_of_device.map(|c| c.raw()), Some(0x0010_0104));

        let preknown = agent.retrieve_devices(DeviceListKind::Preknown);
        assert_eq!(preknown[0].name.as_deref(), Some("Laptop"));
    }

    #[test]
    fn test_friendly_name_updates_cached_device() {
        let port = Arc::new(MockPort::new());
        port.set_remote_name(peer(), "Phone");
        let agent = agent(&port);
        let recorder = Arc::new(Recorder::default());

        agent.start_inquiry(GIAC, recorder.clone()).unwrap();
        port.push_event(records::inquiry_result(&[(peer(), 0x005A_020C)]));
        port.push_event(records::inquiry_complete(0));
        assert!(recorder.wait_inquiry_completed().is_some());

        assert_eq!(agent.friendly_name(peer()).as_deref(), Some("Phone"));
        assert_eq!(
            agent.retrieve_devices(DeviceListKind::Cached)[0].name.as_deref(),
            Some("Phone")
        );
    }

    #[test]
    fn test_search_and_cancel_through_agent() {
        let port = Arc::new(MockPort::new());
        port.serve_sdp(
            FakeSdpServer::new(32)
                .with_record(testing::rfcomm_record(0x0001_0002, 0x1101, 5, "COM5")),
        );
        let agent = agent(&port);
        let recorder = Arc::new(Recorder::default());

        let id = agent
            .search_services(
                None,
                &[Uuid::from_u16(0x1101)],
                RemoteDevice::new(peer()),
                recorder.clone(),
            )
            .unwrap();
        assert_eq!(recorder.wait_search_completed(id), Some(SearchStatus::Completed));
        assert!(!agent.cancel_service_search(id));

        let mut record = recorder.records(id).remove(0);
        let url = record
            .connection_url(crate::sdp::SecurityLevel::NoAuthNoEncrypt, false)
            .unwrap();
        assert_eq!(url.port(), Some(5));
        assert_eq!(record.service_name(), None);
        assert!(agent.populate_record(&mut record, &[0x0100]).unwrap());
        assert_eq!(record.service_name(), Some("COM5"));
    }
}
