//! Scripted collaborators shared by the unit tests
//!
//! [`MockPort`] plays the radio: it records calls, answers asynchronous
//! procedures with queued event records, and opens [`MockChannel`]s to an
//! in-memory [`FakeSdpServer`].

use crate::discovery::DiscoveryListener;
use crate::event::records;
use crate::port::{L2capChannel, NativePort};
use crate::sdp::codec::{Cursor, encode};
use crate::sdp::element::DataElement;
use crate::sdp::protocol::{ContinuationState, build_pdu, split_pdu};
use crate::sdp::{SdpPduId, SearchId, ServiceRecord};
use crate::{
    BluetoothAddress, ClassOfDevice, ConnectionUrl, InquiryStatus, RemoteDevice, SearchStatus, Uuid,
};
use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Attributes of a serial-port style record reachable over RFCOMM
pub(crate) fn rfcomm_record(
    handle: u32,
    class_uuid16: u16,
    channel: u8,
    name: &str,
) -> Vec<(u16, DataElement)> {
    vec![
        (0x0000, DataElement::UnsignedInt32(handle)),
        (
            0x0001,
            DataElement::Sequence(vec![DataElement::Uuid(Uuid::from_u16(class_uuid16))]),
        ),
        (
            0x0004,
            DataElement::Sequence(vec![
                DataElement::Sequence(vec![DataElement::Uuid(Uuid::L2CAP)]),
                DataElement::Sequence(vec![
                    DataElement::Uuid(Uuid::RFCOMM),
                    DataElement::UnsignedInt8(channel),
                ]),
            ]),
        ),
        (0x0100, DataElement::text(name)),
    ]
}

/// In-memory SDP server
///
/// Responses are cut into pieces of at most `chunk` bytes (handles for
/// service search responses are cut at `chunk / 4`, at least one per PDU).
/// The continuation state is the big-endian offset of the next piece.
#[derive(Clone, Default)]
pub(crate) struct FakeSdpServer {
    chunk: usize,
    records: Vec<Vec<(u16, DataElement)>>,
}

impl FakeSdpServer {
    pub(crate) fn new(chunk: usize) -> Self {
        Self {
            chunk: chunk.max(1),
            records: Vec::new(),
        }
    }

    pub(crate) fn with_record(mut self, mut attributes: Vec<(u16, DataElement)>) -> Self {
        attributes.sort_by_key(|(id, _)| *id);
        self.records.push(attributes);
        self
    }

    /// Answer one request PDU
    pub(crate) fn respond(&self, pdu: &[u8]) -> Option<Vec<u8>> {
        let (header, params) = split_pdu(pdu).ok()?;
        let tid = header.transaction_id;
        let mut cursor = Cursor::new(params);
        match header.pdu_id {
            SdpPduId::ServiceSearchRequest => {
                let pattern = uuids(&cursor.read_element().ok()?)?;
                let max = usize::from(cursor.read_u16().ok()?);
                let offset = read_offset(&mut cursor)?;
                let handles: Vec<u32> = self
                    .matching(&pattern)
                    .filter_map(|record| record.first().and_then(|(_, v)| v.as_u32()))
                    .take(max)
                    .collect();
                let end = (offset + (self.chunk / 4).max(1)).min(handles.len());
                let mut out = Vec::new();
                out.extend_from_slice(&u16::try_from(handles.len()).ok()?.to_be_bytes());
                out.extend_from_slice(&u16::try_from(end - offset).ok()?.to_be_bytes());
                for handle in handles.get(offset..end)? {
                    out.extend_from_slice(&handle.to_be_bytes());
                }
                let next = (end < handles.len()).then_some(end);
                build_pdu(SdpPduId::ServiceSearchResponse, tid, &out, &continuation(next)?).ok()
            }
            SdpPduId::ServiceAttributeRequest => {
                let handle = cursor.read_u32().ok()?;
                let max_bytes = usize::from(cursor.read_u16().ok()?);
                let ranges = ranges(&cursor.read_element().ok()?)?;
                let offset = read_offset(&mut cursor)?;
                let Some(record) = self
                    .records
                    .iter()
                    .find(|r| r.first().and_then(|(_, v)| v.as_u32()) == Some(handle))
                else {
                    return Some(error_response(tid, 0x0002));
                };
                let bytes = encode(&attribute_list(record, &ranges)).ok()?;
                self.fragment(SdpPduId::ServiceAttributeResponse, tid, &bytes, offset, max_bytes)
            }
            SdpPduId::ServiceSearchAttributeRequest => {
                let pattern = uuids(&cursor.read_element().ok()?)?;
                let max_bytes = usize::from(cursor.read_u16().ok()?);
                let ranges = ranges(&cursor.read_element().ok()?)?;
                let offset = read_offset(&mut cursor)?;
                let lists = self
                    .matching(&pattern)
                    .map(|record| attribute_list(record, &ranges))
                    .collect();
                let bytes = encode(&DataElement::Sequence(lists)).ok()?;
                self.fragment(
                    SdpPduId::ServiceSearchAttributeResponse,
                    tid,
                    &bytes,
                    offset,
                    max_bytes,
                )
            }
            _ => None,
        }
    }

    fn matching<'a>(
        &'a self,
        pattern: &'a [Uuid],
    ) -> impl Iterator<Item = &'a Vec<(u16, DataElement)>> + 'a {
        self.records.iter().filter(move |record| {
            pattern
                .iter()
                .all(|uuid| record.iter().any(|(_, value)| contains_uuid(value, *uuid)))
        })
    }

    fn fragment(
        &self,
        pdu_id: SdpPduId,
        tid: u16,
        bytes: &[u8],
        offset: usize,
        max_bytes: usize,
    ) -> Option<Vec<u8>> {
        let end = (offset + self.chunk.min(max_bytes).max(1)).min(bytes.len());
        let piece = bytes.get(offset..end)?;
        let mut out = Vec::new();
        out.extend_from_slice(&u16::try_from(piece.len()).ok()?.to_be_bytes());
        out.extend_from_slice(piece);
        let next = (end < bytes.len()).then_some(end);
        build_pdu(pdu_id, tid, &out, &continuation(next)?).ok()
    }
}

fn uuids(element: &DataElement) -> Option<Vec<Uuid>> {
    element.elements()?.iter().map(DataElement::as_uuid).collect()
}

fn ranges(element: &DataElement) -> Option<Vec<(u16, u16)>> {
    element
        .elements()?
        .iter()
        .map(|item| match item {
            DataElement::UnsignedInt16(id) => Some((*id, *id)),
            #[allow(clippy::cast_possible_truncation)]
            DataElement::UnsignedInt32(range) => Some(((range >> 16) as u16, *range as u16)),
            _ => None,
        })
        .collect()
}

fn contains_uuid(element: &DataElement, uuid: Uuid) -> bool {
    match element {
        DataElement::Uuid(value) => *value == uuid,
        DataElement::Sequence(items) | DataElement::Alternative(items) => {
            items.iter().any(|item| contains_uuid(item, uuid))
        }
        _ => false,
    }
}

fn attribute_list(record: &[(u16, DataElement)], ranges: &[(u16, u16)]) -> DataElement {
    let mut items = Vec::new();
    for (id, value) in record {
        if ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(id)) {
            items.push(DataElement::UnsignedInt16(*id));
            items.push(value.clone());
        }
    }
    DataElement::Sequence(items)
}

fn read_offset(cursor: &mut Cursor<'_>) -> Option<usize> {
    let state = ContinuationState::read(cursor).ok()?;
    match state.as_bytes() {
        [] => Some(0),
        [hi, lo] => Some(usize::from(u16::from_be_bytes([*hi, *lo]))),
        _ => None,
    }
}

fn continuation(next: Option<usize>) -> Option<ContinuationState> {
    match next {
        None => Some(ContinuationState::none()),
        Some(offset) => {
            let offset = u16::try_from(offset).ok()?;
            ContinuationState::try_from(&offset.to_be_bytes()[..]).ok()
        }
    }
}

fn error_response(tid: u16, code: u16) -> Vec<u8> {
    let mut pdu = vec![SdpPduId::ErrorResponse as u8];
    pdu.extend_from_slice(&tid.to_be_bytes());
    pdu.extend_from_slice(&2u16.to_be_bytes());
    pdu.extend_from_slice(&code.to_be_bytes());
    pdu
}

struct ChannelInner {
    server: Option<FakeSdpServer>,
    incoming: (Sender<Option<Vec<u8>>>, Receiver<Option<Vec<u8>>>),
    requests: Mutex<Vec<Vec<u8>>>,
    broken: AtomicBool,
    closed: AtomicBool,
}

/// Scripted L2CAP channel; clones share the same link
#[derive(Clone)]
pub(crate) struct MockChannel(Arc<ChannelInner>);

impl MockChannel {
    fn with_server(server: Option<FakeSdpServer>) -> Self {
        Self(Arc::new(ChannelInner {
            server,
            incoming: unbounded(),
            requests: Mutex::new(Vec::new()),
            broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    /// A channel answered by `server`
    pub(crate) fn serving(server: FakeSdpServer) -> Self {
        Self::with_server(Some(server))
    }

    /// A channel whose peer never answers
    pub(crate) fn silent() -> Self {
        Self::with_server(None)
    }

    /// Every PDU sent so far
    pub(crate) fn requests(&self) -> Vec<Vec<u8>> {
        self.0.requests.lock().clone()
    }

    /// Simulate link loss
    pub(crate) fn break_link(&self) {
        self.0.broken.store(true, Ordering::SeqCst);
        self.0.incoming.0.send(None).ok();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}

impl L2capChannel for MockChannel {
    fn send(&self, packet: &[u8]) -> io::Result<()> {
        if self.0.broken.load(Ordering::SeqCst) || self.is_closed() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.0.requests.lock().push(packet.to_vec());
        if let Some(response) = self.0.server.as_ref().and_then(|s| s.respond(packet)) {
            self.0.incoming.0.send(Some(response)).ok();
        }
        Ok(())
    }

    fn receive(&self) -> io::Result<Vec<u8>> {
        match self.0.incoming.1.recv() {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) | Err(_) => Err(io::ErrorKind::ConnectionAborted.into()),
        }
    }

    fn close(&self) -> io::Result<()> {
        if !self.0.closed.swap(true, Ordering::SeqCst) {
            self.0.incoming.0.send(None).ok();
        }
        Ok(())
    }
}

struct PortState {
    enabled: bool,
    address: BluetoothAddress,
    name: Option<String>,
    class: u32,
    access_code: u32,
    refuse_access_codes: usize,
    handles: HashMap<BluetoothAddress, u16>,
    paired: BTreeSet<BluetoothAddress>,
    authenticated: BTreeSet<BluetoothAddress>,
    passkeys: HashMap<BluetoothAddress, String>,
    bonded: Vec<(BluetoothAddress, String)>,
    remote_names: HashMap<BluetoothAddress, String>,
    fail_link_requests: bool,
    preknown: Vec<RemoteDevice>,
    events: VecDeque<Vec<u8>>,
    inquiries: Vec<u32>,
    access_code_writes: Vec<u32>,
    sdp: Option<FakeSdpServer>,
    hang_sdp: bool,
    opened: Vec<String>,
    channels: Vec<MockChannel>,
}

/// Scripted radio
pub(crate) struct MockPort {
    state: Mutex<PortState>,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(PortState {
                enabled: true,
                address: BluetoothAddress::new([0x00, 0x02, 0x72, 0xAA, 0xBB, 0xCC]),
                name: Some("sdpbird".into()),
                class: 0x0000_020C,
                access_code: crate::constants::GIAC,
                refuse_access_codes: 0,
                handles: HashMap::new(),
                paired: BTreeSet::new(),
                authenticated: BTreeSet::new(),
                passkeys: HashMap::new(),
                bonded: Vec::new(),
                remote_names: HashMap::new(),
                fail_link_requests: false,
                preknown: Vec::new(),
                events: VecDeque::new(),
                inquiries: Vec::new(),
                access_code_writes: Vec::new(),
                sdp: None,
                hang_sdp: false,
                opened: Vec::new(),
                channels: Vec::new(),
            }),
        }
    }

    pub(crate) fn serve_sdp(&self, server: FakeSdpServer) {
        self.state.lock().sdp = Some(server);
    }

    /// Open SDP channels whose peer never answers
    pub(crate) fn hang_sdp(&self) {
        self.state.lock().hang_sdp = true;
    }

    pub(crate) fn opened_urls(&self) -> Vec<String> {
        self.state.lock().opened.clone()
    }

    pub(crate) fn opened_channels(&self) -> Vec<MockChannel> {
        self.state.lock().channels.clone()
    }

    pub(crate) fn push_event(&self, record: Vec<u8>) {
        self.state.lock().events.push_back(record);
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub(crate) fn set_remote_name(&self, address: BluetoothAddress, name: &str) {
        self.state.lock().remote_names.insert(address, name.into());
    }

    pub(crate) fn connect(&self, address: BluetoothAddress, handle: u16) {
        self.state.lock().handles.insert(address, handle);
    }

    pub(crate) fn set_passkey(&self, address: BluetoothAddress, passkey: &str) {
        self.state.lock().passkeys.insert(address, passkey.into());
    }

    pub(crate) fn add_preknown(&self, device: RemoteDevice) {
        let mut state = self.state.lock();
        state.paired.insert(device.addr);
        state.preknown.push(device);
    }

    pub(crate) fn fail_link_requests(&self, fail: bool) {
        self.state.lock().fail_link_requests = fail;
    }

    /// Refuse the next `count` access code writes
    pub(crate) fn refuse_access_codes(&self, count: usize) {
        self.state.lock().refuse_access_codes = count;
    }

    pub(crate) fn bonded(&self) -> Vec<(BluetoothAddress, String)> {
        self.state.lock().bonded.clone()
    }

    pub(crate) fn started_inquiries(&self) -> Vec<u32> {
        self.state.lock().inquiries.clone()
    }

    pub(crate) fn access_code_writes(&self) -> Vec<u32> {
        self.state.lock().access_code_writes.clone()
    }
}

impl NativePort for MockPort {
    fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    fn enable(&self) -> bool {
        self.state.lock().enabled = true;
        true
    }

    fn local_address(&self) -> BluetoothAddress {
        self.state.lock().address
    }

    fn local_name(&self) -> Option<String> {
        self.state.lock().name.clone()
    }

    fn device_class(&self) -> u32 {
        self.state.lock().class
    }

    fn set_service_classes(&self, mask: u32) -> bool {
        let mut state = self.state.lock();
        state.class = ClassOfDevice::from_raw(state.class).with_service_classes(mask).raw();
        true
    }

    fn access_code(&self) -> u32 {
        self.state.lock().access_code
    }

    fn set_access_code(&self, code: u32) -> bool {
        let mut state = self.state.lock();
        state.access_code_writes.push(code);
        if state.refuse_access_codes > 0 {
            state.refuse_access_codes -= 1;
            return false;
        }
        state.access_code = code;
        true
    }

    fn start_inquiry(&self, access_code: u32) -> bool {
        let mut state = self.state.lock();
        state.inquiries.push(access_code);
        state.enabled
    }

    fn cancel_inquiry(&self) -> bool {
        true
    }

    fn ask_friendly_name(&self, address: BluetoothAddress) -> bool {
        let mut state = self.state.lock();
        if let Some(name) = state.remote_names.get(&address).cloned() {
            state.events.push_back(records::remote_name(0, address, &name));
        }
        true
    }

    fn connection_handle(&self, address: BluetoothAddress) -> Option<u16> {
        self.state.lock().handles.get(&address).copied()
    }

    fn is_paired(&self, address: BluetoothAddress) -> bool {
        self.state.lock().paired.contains(&address)
    }

    fn is_authenticated(&self, address: BluetoothAddress) -> bool {
        self.state.lock().authenticated.contains(&address)
    }

    fn passkey(&self, address: BluetoothAddress) -> Option<String> {
        self.state.lock().passkeys.get(&address).cloned()
    }

    fn bond(&self, address: BluetoothAddress, passkey: &str) -> bool {
        let mut state = self.state.lock();
        state.bonded.push((address, passkey.into()));
        state.paired.insert(address);
        true
    }

    fn authenticate(&self, handle: u16) -> bool {
        let mut state = self.state.lock();
        let status = if state.fail_link_requests { 0x05 } else { 0x00 };
        if status == 0 {
            let peer = state
                .handles
                .iter()
                .find_map(|(address, h)| (*h == handle).then_some(*address));
            if let Some(peer) = peer {
                state.authenticated.insert(peer);
            }
        }
        state.events.push_back(records::authentication_complete(status, handle));
        true
    }

    fn set_encryption(&self, handle: u16, enable: bool) -> bool {
        let mut state = self.state.lock();
        let status = if state.fail_link_requests { 0x05 } else { 0x00 };
        state.events.push_back(records::encryption_change(status, handle, enable));
        true
    }

    fn preknown_devices(&self) -> Vec<RemoteDevice> {
        self.state.lock().preknown.clone()
    }

    fn check_events(&self) -> bool {
        !self.state.lock().events.is_empty()
    }

    fn read_event(&self) -> Option<Vec<u8>> {
        self.state.lock().events.pop_front()
    }

    fn open_l2cap(&self, url: &ConnectionUrl) -> io::Result<Box<dyn L2capChannel>> {
        let mut state = self.state.lock();
        state.opened.push(url.to_string());
        let channel = match state.sdp.clone() {
            _ if state.hang_sdp => MockChannel::silent(),
            Some(server) => MockChannel::serving(server),
            None => return Err(io::ErrorKind::ConnectionRefused.into()),
        };
        state.channels.push(channel.clone());
        Ok(Box::new(channel))
    }
}

#[derive(Default)]
struct Recorded {
    devices: Vec<(RemoteDevice, ClassOfDevice)>,
    inquiries: Vec<InquiryStatus>,
    records: Vec<(SearchId, Vec<ServiceRecord>)>,
    searches: Vec<(SearchId, SearchStatus)>,
}

/// Listener that records every callback
#[derive(Default)]
pub(crate) struct Recorder {
    recorded: Mutex<Recorded>,
    changed: Condvar,
}

impl Recorder {
    pub(crate) fn devices(&self) -> Vec<(RemoteDevice, ClassOfDevice)> {
        self.recorded.lock().devices.clone()
    }

    pub(crate) fn inquiry_statuses(&self) -> Vec<InquiryStatus> {
        self.recorded.lock().inquiries.clone()
    }

    pub(crate) fn search_statuses(&self) -> Vec<(SearchId, SearchStatus)> {
        self.recorded.lock().searches.clone()
    }

    /// Records delivered for a search, across all callbacks
    pub(crate) fn records(&self, search_id: SearchId) -> Vec<ServiceRecord> {
        self.recorded
            .lock()
            .records
            .iter()
            .filter(|(id, _)| *id == search_id)
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }

    pub(crate) fn wait_inquiry_completed(&self) -> Option<InquiryStatus> {
        self.wait_for(|recorded| recorded.inquiries.first().copied())
    }

    pub(crate) fn wait_search_completed(&self, search_id: SearchId) -> Option<SearchStatus> {
        self.wait_for(|recorded| {
            recorded
                .searches
                .iter()
                .find_map(|(id, status)| (*id == search_id).then_some(*status))
        })
    }

    fn wait_for<T>(&self, probe: impl Fn(&Recorded) -> Option<T>) -> Option<T> {
        let deadline = Instant::now() + WAIT;
        let mut recorded = self.recorded.lock();
        loop {
            if let Some(value) = probe(&recorded) {
                return Some(value);
            }
            if self.changed.wait_until(&mut recorded, deadline).timed_out() {
                return probe(&recorded);
            }
        }
    }
}

impl DiscoveryListener for Recorder {
    fn device_discovered(&self, device: &RemoteDevice, class: ClassOfDevice) {
        self.recorded.lock().devices.push((device.clone(), class));
        self.changed.notify_all();
    }

    fn inquiry_completed(&self, status: InquiryStatus) {
        self.recorded.lock().inquiries.push(status);
        self.changed.notify_all();
    }

    fn services_discovered(&self, search_id: SearchId, records: &[ServiceRecord]) {
        self.recorded.lock().records.push((search_id, records.to_vec()));
        self.changed.notify_all();
    }

    fn service_search_completed(&self, search_id: SearchId, status: SearchStatus) {
        self.recorded.lock().searches.push((search_id, status));
        self.changed.notify_all();
    }
}
