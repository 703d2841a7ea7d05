//! Service search orchestration
//!
//! A [`ServiceDiscoverer`] runs each search on its own worker thread with a
//! private [`SdpClient`]. Depending on [`SearchProtocol`] a search either
//! issues one service search attribute request, or a service search request
//! followed by one service attribute request per handle. Both paths end in
//! the same record assembler.

use super::attribute::{AttributeList, dedup_uuids, extend_by_standard_attrs};
use super::client::SdpClient;
use super::record::{ServiceRecord, assemble_records};
use super::{AttributeId, SdpError, SdpErrorCode, SearchId};
use crate::constants::MAX_CONCURRENT_SEARCHES;
use crate::discovery::{DiscoveryListener, SearchStatus};
use crate::port::NativePort;
use crate::{BluetoothError, DiscoveryOptions, RemoteDevice, SearchProtocol, Uuid};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Search ID used for the private client of `populate_record`
const POPULATE_SEARCH_ID: SearchId = 0;

struct SearchEntry {
    canceled: AtomicBool,
    notified: AtomicBool,
    client: Mutex<Option<Arc<SdpClient>>>,
}

impl SearchEntry {
    fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            client: Mutex::new(None),
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Mark canceled and tear down the client; `false` if already canceled
    fn cancel(&self) -> bool {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return false;
        }
        let client = self.client.lock().clone();
        if let Some(client) = client {
            client.close();
        }
        true
    }

    /// Report completion once
    fn complete(&self, search_id: SearchId, status: SearchStatus, listener: &dyn DiscoveryListener) {
        if self.notified.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[SEARCH] Search {search_id} finished: {status:?}");
        listener.service_search_completed(search_id, status);
    }
}

#[derive(Default)]
struct SearchTable {
    entries: heapless::FnvIndexMap<SearchId, Arc<SearchEntry>, MAX_CONCURRENT_SEARCHES>,
    next_id: SearchId,
}

impl SearchTable {
    fn allocate(&mut self) -> SearchId {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != POPULATE_SEARCH_ID && !self.entries.contains_key(&self.next_id) {
                return self.next_id;
            }
        }
    }

    fn remove(&mut self, search_id: SearchId, entry: &Arc<SearchEntry>) {
        if self
            .entries
            .get(&search_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            self.entries.remove(&search_id);
        }
    }
}

struct SearchJob {
    search_id: SearchId,
    attrs: Vec<AttributeId>,
    uuids: Vec<Uuid>,
    device: RemoteDevice,
    listener: Arc<dyn DiscoveryListener>,
    entry: Arc<SearchEntry>,
}

/// Runs service searches against remote SDP servers
pub struct ServiceDiscoverer {
    port: Arc<dyn NativePort>,
    options: DiscoveryOptions,
    searches: Arc<Mutex<SearchTable>>,
}

impl ServiceDiscoverer {
    /// Create a discoverer opening its SDP channels through `port`
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if the options do not validate
    pub fn new(port: Arc<dyn NativePort>, options: DiscoveryOptions) -> Result<Self, BluetoothError> {
        options.validate()?;
        Ok(Self {
            port,
            options,
            searches: Arc::new(Mutex::new(SearchTable::default())),
        })
    }

    /// Options the discoverer runs with
    #[must_use]
    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Number of searches that have not completed yet
    #[must_use]
    pub fn active_searches(&self) -> usize {
        self.searches.lock().entries.len()
    }

    /// Start a search for records matching all `uuids`
    ///
    /// The standard attributes are always fetched in addition to `attrs`.
    /// Results and the single completion callback are delivered to
    /// `listener` on the search's worker thread.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for empty sets, `ResourceExhausted` for
    /// oversized sets or when the concurrent search limit is reached
    pub fn start(
        &self,
        attrs: Option<&[AttributeId]>,
        uuids: &[Uuid],
        device: RemoteDevice,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<SearchId, BluetoothError> {
        let attrs = extend_by_standard_attrs(attrs, self.options.retrievable_max)?;
        let uuids = dedup_uuids(uuids)?.to_vec();

        let entry = Arc::new(SearchEntry::new());
        let search_id = {
            let mut table = self.searches.lock();
            if table.entries.len() >= self.options.max_concurrent_searches {
                return Err(BluetoothError::ResourceExhausted);
            }
            let search_id = table.allocate();
            table
                .entries
                .insert(search_id, Arc::clone(&entry))
                .map_err(|_| BluetoothError::ResourceExhausted)?;
            search_id
        };

        debug!(
            "[SEARCH] Search {search_id} on {} for {} UUIDs, {} attributes",
            device.addr,
            uuids.len(),
            attrs.len()
        );
        let job = SearchJob {
            search_id,
            attrs,
            uuids,
            device,
            listener,
            entry: Arc::clone(&entry),
        };
        let port = Arc::clone(&self.port);
        let options = self.options;
        let searches = Arc::clone(&self.searches);
        let spawned = thread::Builder::new()
            .name(format!("sdp-search-{search_id}"))
            .spawn(move || run_search(port.as_ref(), options, &searches, job));
        if let Err(err) = spawned {
            self.searches.lock().remove(search_id, &entry);
            return Err(BluetoothError::Transport(err.to_string()));
        }
        Ok(search_id)
    }

    /// Cancel a running search
    ///
    /// The listener receives `Terminated` unless the search completed
    /// first. Returns `false` for unknown or already canceled searches.
    pub fn cancel(&self, search_id: SearchId) -> bool {
        let entry = self.searches.lock().entries.get(&search_id).cloned();
        match entry {
            Some(entry) => {
                let canceled = entry.cancel();
                if canceled {
                    debug!("[SEARCH] Search {search_id} canceled");
                }
                canceled
            }
            None => false,
        }
    }

    /// Fetch more attributes of a record found earlier and merge them in
    ///
    /// Returns whether the server returned any of the requested attributes.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for a record without handle or an empty ID
    /// set, `ResourceExhausted` for too many IDs, or the failure of the
    /// connection or request
    pub fn populate_record(
        &self,
        record: &mut ServiceRecord,
        attr_ids: &[AttributeId],
    ) -> Result<bool, BluetoothError> {
        let handle = record
            .handle()
            .ok_or_else(|| BluetoothError::InvalidArgument("record has no handle".into()))?;
        if attr_ids.is_empty() {
            return Err(BluetoothError::InvalidArgument("attribute set is empty".into()));
        }
        let ids: Vec<AttributeId> = attr_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.len() > self.options.retrievable_max {
            return Err(BluetoothError::ResourceExhausted);
        }

        let device = record.host_device().addr;
        let client = SdpClient::connect(self.port.as_ref(), device, self.options)?;
        let result = client.attributes(POPULATE_SEARCH_ID, handle, &ids);
        client.close();
        let attributes = result?;
        let found = !attributes.is_empty();
        record.merge(attributes);
        Ok(found)
    }
}

impl Drop for ServiceDiscoverer {
    fn drop(&mut self) {
        let entries: Vec<_> = self.searches.lock().entries.values().cloned().collect();
        for entry in entries {
            entry.cancel();
        }
    }
}

impl core::fmt::Debug for ServiceDiscoverer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceDiscoverer")
            .field("options", &self.options)
            .field("active_searches", &self.active_searches())
            .finish_non_exhaustive()
    }
}

fn run_search(
    port: &dyn NativePort,
    options: DiscoveryOptions,
    searches: &Mutex<SearchTable>,
    job: SearchJob,
) {
    let SearchJob {
        search_id,
        attrs,
        uuids,
        device,
        listener,
        entry,
    } = job;

    let status = match SdpClient::connect(port, device.addr, options) {
        Ok(client) => {
            let client = Arc::new(client);
            *entry.client.lock() = Some(Arc::clone(&client));
            let status = if entry.is_canceled() {
                SearchStatus::Terminated
            } else {
                let outcome = match options.protocol {
                    SearchProtocol::SinglePhase => {
                        single_phase(&client, search_id, &uuids, &attrs, &device, listener.as_ref())
                    }
                    SearchProtocol::TwoPhase => two_phase(
                        &client,
                        &entry,
                        search_id,
                        &uuids,
                        &attrs,
                        &device,
                        listener.as_ref(),
                    ),
                };
                match outcome {
                    Ok(status) => status,
                    Err(err) => {
                        debug!("[SEARCH] Search {search_id} failed: {err}");
                        status_for(&err)
                    }
                }
            };
            entry.client.lock().take();
            client.close();
            status
        }
        Err(err) => {
            warn!("[SEARCH] Cannot reach {}: {err}", device.addr);
            SearchStatus::DeviceNotReachable
        }
    };

    let status = if entry.is_canceled() {
        SearchStatus::Terminated
    } else {
        status
    };
    searches.lock().remove(search_id, &entry);
    entry.complete(search_id, status, listener.as_ref());
}

fn single_phase(
    client: &SdpClient,
    search_id: SearchId,
    uuids: &[Uuid],
    attrs: &[AttributeId],
    device: &RemoteDevice,
    listener: &dyn DiscoveryListener,
) -> Result<SearchStatus, SdpError> {
    let attributes = client.search_attributes(search_id, uuids, attrs)?;
    Ok(report(search_id, device, attributes, listener))
}

fn two_phase(
    client: &SdpClient,
    entry: &SearchEntry,
    search_id: SearchId,
    uuids: &[Uuid],
    attrs: &[AttributeId],
    device: &RemoteDevice,
    listener: &dyn DiscoveryListener,
) -> Result<SearchStatus, SdpError> {
    let handles = client.search(search_id, uuids)?;
    if handles.is_empty() {
        return Ok(SearchStatus::NoRecords);
    }
    for handle in handles {
        if entry.is_canceled() {
            return Ok(SearchStatus::Terminated);
        }
        let attributes = client.attributes(search_id, handle, attrs)?;
        report(search_id, device, attributes, listener);
    }
    Ok(SearchStatus::Completed)
}

fn report(
    search_id: SearchId,
    device: &RemoteDevice,
    attributes: AttributeList,
    listener: &dyn DiscoveryListener,
) -> SearchStatus {
    let records = assemble_records(device, attributes);
    if records.is_empty() {
        return SearchStatus::NoRecords;
    }
    debug!("[SEARCH] Search {search_id} found {} records", records.len());
    listener.services_discovered(search_id, &records);
    SearchStatus::Completed
}

fn status_for(err: &SdpError) -> SearchStatus {
    match err {
        SdpError::ProtocolError {
            code: SdpErrorCode::InvalidServiceRecordHandle,
            ..
        } => SearchStatus::NoRecords,
        SdpError::Terminated => SearchStatus::Terminated,
        SdpError::Transport(_) => SearchStatus::DeviceNotReachable,
        _ => SearchStatus::Error,
    }
}
