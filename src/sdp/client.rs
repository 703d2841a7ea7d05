//! SDP Client Implementation
//!
//! An [`SdpClient`] owns one L2CAP channel to a remote SDP server. Requests
//! are registered and sent on the calling thread; a receiver thread routes
//! every response PDU to its transaction by wire transaction ID. Requests
//! can be awaited on the calling thread or handed to a per-request issuing
//! thread that reports to a [`ResponseListener`].

use super::attribute::AttributeList;
use super::protocol::{SdpPduHeader, split_pdu};
use super::transaction::{
    PduLink, ResponseListener, SdpRequest, SdpResponse, ServiceAttributeRequest,
    ServiceSearchAttributeRequest, ServiceSearchRequest, Transaction, TransactionRegistry,
};
use super::{AttributeId, SDP_PSM, SdpError, SearchId, ServiceRecordHandle};
use crate::port::{L2capChannel, NativePort};
use crate::{BluetoothAddress, BluetoothError, ConnectionUrl, DiscoveryOptions, Protocol, Uuid};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

struct ClientShared {
    address: BluetoothAddress,
    channel: Box<dyn L2capChannel>,
    registry: TransactionRegistry,
    closed: AtomicBool,
    options: DiscoveryOptions,
}

impl PduLink for ClientShared {
    fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    fn send_pdu(&self, pdu: &[u8]) -> Result<(), SdpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SdpError::Terminated);
        }
        self.channel.send(pdu)?;
        Ok(())
    }
}

impl ClientShared {
    fn dispatch(&self, pdu: &[u8]) {
        match split_pdu(pdu) {
            Ok((header, params)) => match self.registry.get(header.transaction_id) {
                Some(transaction) => transaction.process_response(self, &header, params),
                None => warn!(
                    "[SDP] Response for unknown transaction {} from {}",
                    header.transaction_id, self.address
                ),
            },
            Err(err) => {
                warn!("[SDP] Corrupt PDU from {}: {err}", self.address);
                if let Ok(header) = SdpPduHeader::decode(pdu) {
                    if let Some(transaction) = self.registry.get(header.transaction_id) {
                        transaction.cancel(&self.registry, err);
                    }
                }
            }
        }
    }

    fn receive_loop(&self) {
        loop {
            match self.channel.receive() {
                Ok(pdu) => self.dispatch(&pdu),
                Err(err) => {
                    let reason = if self.closed.swap(true, Ordering::SeqCst) {
                        SdpError::Terminated
                    } else {
                        warn!("[SDP] Channel to {} failed: {err}", self.address);
                        SdpError::Transport(err.to_string())
                    };
                    let canceled = self.registry.cancel_all(&reason);
                    debug!(
                        "[SDP] Receiver for {} stopped, {canceled} transactions canceled",
                        self.address
                    );
                    return;
                }
            }
        }
    }
}

/// SDP Client
///
/// One connection to the SDP server of a remote device.
pub struct SdpClient {
    shared: Arc<ClientShared>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl SdpClient {
    /// Open the SDP channel (`btl2cap://<address>:0001`) through the port
    ///
    /// # Errors
    /// Returns `Transport` if the channel cannot be opened
    pub fn connect(
        port: &dyn NativePort,
        address: BluetoothAddress,
        options: DiscoveryOptions,
    ) -> Result<Self, BluetoothError> {
        let url = ConnectionUrl::client(Protocol::L2cap, address, SDP_PSM);
        debug!("[SDP] Opening {url}");
        let channel = port
            .open_l2cap(&url)
            .map_err(|err| BluetoothError::Transport(err.to_string()))?;
        Self::with_channel(address, channel, options)
    }

    /// Run the client over an already open channel
    ///
    /// # Errors
    /// Returns `Transport` if the receiver thread cannot be started
    pub fn with_channel(
        address: BluetoothAddress,
        channel: Box<dyn L2capChannel>,
        options: DiscoveryOptions,
    ) -> Result<Self, BluetoothError> {
        let shared = Arc::new(ClientShared {
            address,
            channel,
            registry: TransactionRegistry::new(),
            closed: AtomicBool::new(false),
            options,
        });
        let receiver = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("sdp-receiver-{}", address.format_compact()))
                .spawn(move || shared.receive_loop())
                .map_err(|err| BluetoothError::Transport(err.to_string()))?
        };
        info!("[SDP] Connected to {address}");
        Ok(Self {
            shared,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Address of the remote device
    #[must_use]
    pub fn address(&self) -> BluetoothAddress {
        self.shared.address
    }

    /// Whether the client has been closed or its channel failed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of transactions waiting for a response
    #[must_use]
    pub fn pending_transactions(&self) -> usize {
        self.shared.registry.len()
    }

    fn ensure_open(&self) -> Result<(), SdpError> {
        if self.is_closed() {
            Err(SdpError::Terminated)
        } else {
            Ok(())
        }
    }

    fn run(&self, search_id: SearchId, request: Box<dyn SdpRequest>) -> Result<SdpResponse, SdpError> {
        self.ensure_open()?;
        let transaction = Transaction::new(search_id, request);
        transaction.submit(self.shared.as_ref());
        transaction.wait()
    }

    fn start(
        &self,
        search_id: SearchId,
        request: Box<dyn SdpRequest>,
        listener: Arc<dyn ResponseListener>,
    ) -> Result<(), SdpError> {
        self.ensure_open()?;
        let transaction = Transaction::new(search_id, request);
        transaction.submit(self.shared.as_ref());

        let issuing = Arc::clone(&transaction);
        let spawned = thread::Builder::new()
            .name(format!("sdp-transaction-{search_id}"))
            .spawn(move || {
                let result = issuing.wait();
                listener.on_response(issuing.search_id(), result);
            });
        if let Err(err) = spawned {
            transaction.cancel(&self.shared.registry, SdpError::Terminated);
            return Err(err.into());
        }
        Ok(())
    }

    /// Search for records matching all `uuids`, reporting the handles
    ///
    /// # Errors
    /// Returns `Terminated` if the client is closed, or a transport error if
    /// the issuing thread cannot be started
    pub fn service_search(
        &self,
        search_id: SearchId,
        uuids: &[Uuid],
        listener: Arc<dyn ResponseListener>,
    ) -> Result<(), SdpError> {
        let options = &self.shared.options;
        let request =
            ServiceSearchRequest::new(uuids, options.max_service_record_count, options.uuid_form);
        self.start(search_id, Box::new(request), listener)
    }

    /// Fetch attributes of one record, reporting them to the listener
    ///
    /// # Errors
    /// Same as [`service_search`](Self::service_search)
    pub fn service_attribute(
        &self,
        search_id: SearchId,
        handle: ServiceRecordHandle,
        attribute_ids: &[AttributeId],
        listener: Arc<dyn ResponseListener>,
    ) -> Result<(), SdpError> {
        let request = ServiceAttributeRequest::new(
            handle,
            attribute_ids,
            self.shared.options.max_attribute_byte_count,
        );
        self.start(search_id, Box::new(request), listener)
    }

    /// Search and fetch attributes in one request, reporting to the listener
    ///
    /// # Errors
    /// Same as [`service_search`](Self::service_search)
    pub fn service_search_attribute(
        &self,
        search_id: SearchId,
        uuids: &[Uuid],
        attribute_ids: &[AttributeId],
        listener: Arc<dyn ResponseListener>,
    ) -> Result<(), SdpError> {
        let options = &self.shared.options;
        let request = ServiceSearchAttributeRequest::new(
            uuids,
            attribute_ids,
            options.max_attribute_byte_count,
            options.uuid_form,
        );
        self.start(search_id, Box::new(request), listener)
    }

    /// Blocking service search
    ///
    /// # Errors
    /// Returns the failure of the transaction
    pub fn search(
        &self,
        search_id: SearchId,
        uuids: &[Uuid],
    ) -> Result<Vec<ServiceRecordHandle>, SdpError> {
        let options = &self.shared.options;
        let request =
            ServiceSearchRequest::new(uuids, options.max_service_record_count, options.uuid_form);
        match self.run(search_id, Box::new(request))? {
            SdpResponse::ServiceSearch { handles } => Ok(handles),
            _ => Err(SdpError::InvalidProtocolData("mismatched response")),
        }
    }

    /// Blocking attribute fetch for one record
    ///
    /// # Errors
    /// Returns the failure of the transaction
    pub fn attributes(
        &self,
        search_id: SearchId,
        handle: ServiceRecordHandle,
        attribute_ids: &[AttributeId],
    ) -> Result<AttributeList, SdpError> {
        let request = ServiceAttributeRequest::new(
            handle,
            attribute_ids,
            self.shared.options.max_attribute_byte_count,
        );
        match self.run(search_id, Box::new(request))? {
            SdpResponse::ServiceAttribute { attributes, .. } => Ok(attributes),
            _ => Err(SdpError::InvalidProtocolData("mismatched response")),
        }
    }

    /// Blocking search with attribute fetch; the result is flattened
    ///
    /// # Errors
    /// Returns the failure of the transaction
    pub fn search_attributes(
        &self,
        search_id: SearchId,
        uuids: &[Uuid],
        attribute_ids: &[AttributeId],
    ) -> Result<AttributeList, SdpError> {
        let options = &self.shared.options;
        let request = ServiceSearchAttributeRequest::new(
            uuids,
            attribute_ids,
            options.max_attribute_byte_count,
            options.uuid_form,
        );
        match self.run(search_id, Box::new(request))? {
            SdpResponse::ServiceSearchAttribute { attributes } => Ok(attributes),
            _ => Err(SdpError::InvalidProtocolData("mismatched response")),
        }
    }

    /// Terminate the live transactions of a search
    ///
    /// Returns whether any transaction was still running.
    pub fn cancel_search(&self, search_id: SearchId) -> bool {
        let mut canceled = false;
        for transaction in self.shared.registry.find_search(search_id) {
            canceled |= transaction.cancel(&self.shared.registry, SdpError::Terminated);
        }
        canceled
    }

    /// Fail every live transaction with `reason`
    pub fn cancel_all(&self, reason: &SdpError) -> usize {
        self.shared.registry.cancel_all(reason)
    }

    /// Terminate all transactions and close the channel
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let canceled = self.shared.registry.cancel_all(&SdpError::Terminated);
        if let Err(err) = self.shared.channel.close() {
            warn!("[SDP] Closing channel to {} failed: {err}", self.shared.address);
        }
        info!(
            "[SDP] Closed connection to {} ({canceled} transactions terminated)",
            self.shared.address
        );
        self.join_receiver();
    }

    fn join_receiver(&self) {
        let Some(receiver) = self.receiver.lock().take() else {
            return;
        };
        if receiver.thread().id() == thread::current().id() {
            return;
        }
        if receiver.join().is_err() {
            warn!("[SDP] Receiver thread for {} panicked", self.shared.address);
        }
    }
}

impl Drop for SdpClient {
    fn drop(&mut self) {
        self.close();
        self.join_receiver();
    }
}

impl core::fmt::Debug for SdpClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SdpClient")
            .field("address", &self.shared.address)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
