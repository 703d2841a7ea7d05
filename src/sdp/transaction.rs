//! SDP transaction engine
//!
//! A [`Transaction`] carries one logical request through as many PDU
//! exchanges as the server needs: every response with a non-empty
//! continuation state re-issues the same parameters under a fresh wire
//! transaction ID. The [`TransactionRegistry`] owns wire ID allocation for a
//! connection and maps live IDs back to their transactions.
//!
//! Lock order is transaction first, registry second. The registry lock is
//! never held while a transaction lock is taken.

use super::attribute::AttributeList;
use super::codec::{self, Cursor, DataElementWriter, UuidForm};
use super::protocol::{
    self, ContinuationState, SdpPduHeader, ServiceSearchResponse, build_pdu,
};
use super::{
    AttributeId, SdpError, SdpPduId, SearchId, ServiceRecordHandle, TransactionId,
};
use crate::Uuid;
use crate::constants::MAX_TRANSACTIONS;
use heapless::FnvIndexMap;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Result of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpResponse {
    /// Handles of the records matching a service search
    ServiceSearch {
        /// Matching service record handles
        handles: Vec<ServiceRecordHandle>,
    },
    /// Attributes of one service record
    ServiceAttribute {
        /// Handle the attributes were requested for
        handle: ServiceRecordHandle,
        /// Returned attributes
        attributes: AttributeList,
    },
    /// Attributes of every matching record, flattened into one list
    ServiceSearchAttribute {
        /// Attributes of all records, each record led by its handle
        attributes: AttributeList,
    },
}

/// Receives the outcome of an asynchronous request, exactly once
pub trait ResponseListener: Send + Sync {
    /// Called from the issuing thread when the request has finished
    fn on_response(&self, search_id: SearchId, result: Result<SdpResponse, SdpError>);
}

/// Request-specific part of a transaction
pub(crate) trait SdpRequest: Send {
    /// PDU ID of the request
    fn pdu_id(&self) -> SdpPduId;

    /// Request parameters, without the continuation state
    fn write_parameters(&self) -> Result<Vec<u8>, SdpError>;

    /// Consume the request-specific part of one response
    fn read_parameters(&mut self, params: &mut Cursor<'_>) -> Result<(), SdpError>;

    /// Build the result once the server has nothing more to send
    fn complete(&mut self) -> Result<SdpResponse, SdpError>;
}

/// `ServiceSearchRequest`: collects matching record handles
#[derive(Debug)]
pub(crate) struct ServiceSearchRequest {
    uuids: Vec<Uuid>,
    max_record_count: u16,
    uuid_form: UuidForm,
    handles: Vec<ServiceRecordHandle>,
}

impl ServiceSearchRequest {
    pub(crate) fn new(uuids: &[Uuid], max_record_count: u16, uuid_form: UuidForm) -> Self {
        Self {
            uuids: uuids.to_vec(),
            max_record_count,
            uuid_form,
            handles: Vec::new(),
        }
    }
}

impl SdpRequest for ServiceSearchRequest {
    fn pdu_id(&self) -> SdpPduId {
        SdpPduId::ServiceSearchRequest
    }

    fn write_parameters(&self) -> Result<Vec<u8>, SdpError> {
        let mut writer = DataElementWriter::with_uuid_form(self.uuid_form);
        protocol::write_search_pattern(&mut writer, &self.uuids)?;
        writer.write_u16(self.max_record_count);
        Ok(writer.into_bytes())
    }

    fn read_parameters(&mut self, params: &mut Cursor<'_>) -> Result<(), SdpError> {
        let response = ServiceSearchResponse::read(params)?;
        self.handles.extend(response.service_record_handles);
        if self.handles.len() > usize::from(response.total_service_record_count) {
            return Err(SdpError::InvalidProtocolData(
                "more handles than the announced total",
            ));
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<SdpResponse, SdpError> {
        Ok(SdpResponse::ServiceSearch {
            handles: core::mem::take(&mut self.handles),
        })
    }
}

/// `ServiceAttributeRequest`: fetches attributes of one record
#[derive(Debug)]
pub(crate) struct ServiceAttributeRequest {
    handle: ServiceRecordHandle,
    max_byte_count: u16,
    attribute_ids: Vec<AttributeId>,
    fragments: Vec<u8>,
}

impl ServiceAttributeRequest {
    pub(crate) fn new(
        handle: ServiceRecordHandle,
        attribute_ids: &[AttributeId],
        max_byte_count: u16,
    ) -> Self {
        Self {
            handle,
            max_byte_count,
            attribute_ids: attribute_ids.to_vec(),
            fragments: Vec::new(),
        }
    }
}

impl SdpRequest for ServiceAttributeRequest {
    fn pdu_id(&self) -> SdpPduId {
        SdpPduId::ServiceAttributeRequest
    }

    fn write_parameters(&self) -> Result<Vec<u8>, SdpError> {
        let mut writer = DataElementWriter::new();
        writer.write_u32(self.handle);
        writer.write_u16(self.max_byte_count);
        protocol::write_attribute_id_list(&mut writer, &self.attribute_ids)?;
        Ok(writer.into_bytes())
    }

    fn read_parameters(&mut self, params: &mut Cursor<'_>) -> Result<(), SdpError> {
        let fragment = protocol::read_attribute_list_fragment(params)?;
        self.fragments.extend_from_slice(fragment);
        Ok(())
    }

    fn complete(&mut self) -> Result<SdpResponse, SdpError> {
        let attributes = if self.fragments.is_empty() {
            AttributeList::new()
        } else {
            AttributeList::from_element(codec::decode(&self.fragments)?)?
        };
        Ok(SdpResponse::ServiceAttribute {
            handle: self.handle,
            attributes,
        })
    }
}

/// `ServiceSearchAttributeRequest`: search and attribute fetch in one go
#[derive(Debug)]
pub(crate) struct ServiceSearchAttributeRequest {
    uuids: Vec<Uuid>,
    max_byte_count: u16,
    attribute_ids: Vec<AttributeId>,
    uuid_form: UuidForm,
    fragments: Vec<u8>,
}

impl ServiceSearchAttributeRequest {
    pub(crate) fn new(
        uuids: &[Uuid],
        attribute_ids: &[AttributeId],
        max_byte_count: u16,
        uuid_form: UuidForm,
    ) -> Self {
        Self {
            uuids: uuids.to_vec(),
            max_byte_count,
            attribute_ids: attribute_ids.to_vec(),
            uuid_form,
            fragments: Vec::new(),
        }
    }
}

impl SdpRequest for ServiceSearchAttributeRequest {
    fn pdu_id(&self) -> SdpPduId {
        SdpPduId::ServiceSearchAttributeRequest
    }

    fn write_parameters(&self) -> Result<Vec<u8>, SdpError> {
        let mut writer = DataElementWriter::with_uuid_form(self.uuid_form);
        protocol::write_search_pattern(&mut writer, &self.uuids)?;
        writer.write_u16(self.max_byte_count);
        protocol::write_attribute_id_list(&mut writer, &self.attribute_ids)?;
        Ok(writer.into_bytes())
    }

    fn read_parameters(&mut self, params: &mut Cursor<'_>) -> Result<(), SdpError> {
        let fragment = protocol::read_attribute_list_fragment(params)?;
        self.fragments.extend_from_slice(fragment);
        Ok(())
    }

    fn complete(&mut self) -> Result<SdpResponse, SdpError> {
        let attributes = if self.fragments.is_empty() {
            AttributeList::new()
        } else {
            AttributeList::from_nested(codec::decode(&self.fragments)?)?
        };
        Ok(SdpResponse::ServiceSearchAttribute { attributes })
    }
}

/// Where a transaction sends its PDUs
pub(crate) trait PduLink {
    /// Registry of the connection
    fn registry(&self) -> &TransactionRegistry;

    /// Write one PDU to the channel
    fn send_pdu(&self, pdu: &[u8]) -> Result<(), SdpError>;
}

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TransactionState {
    Created,
    AwaitingResponse,
    Resubmitting,
    Completed,
    Canceled,
    Errored,
}

impl TransactionState {
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Errored)
    }
}

struct TransactionInner {
    state: TransactionState,
    wire_id: TransactionId,
    parameters: Vec<u8>,
    request: Box<dyn SdpRequest>,
    outcome: Option<Result<SdpResponse, SdpError>>,
}

/// One logical request and its PDU exchanges
pub(crate) struct Transaction {
    search_id: SearchId,
    inner: Mutex<TransactionInner>,
    finished: Condvar,
}

impl Transaction {
    pub(crate) fn new(search_id: SearchId, request: Box<dyn SdpRequest>) -> Arc<Self> {
        Arc::new(Self {
            search_id,
            inner: Mutex::new(TransactionInner {
                state: TransactionState::Created,
                wire_id: 0,
                parameters: Vec::new(),
                request,
                outcome: None,
            }),
            finished: Condvar::new(),
        })
    }

    pub(crate) fn search_id(&self) -> SearchId {
        self.search_id
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Register under a fresh wire ID and send the first PDU
    ///
    /// Failures finish the transaction; [`wait`](Self::wait) reports them.
    pub(crate) fn submit(self: &Arc<Self>, link: &dyn PduLink) {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Created {
            return;
        }
        let pdu_id = inner.request.pdu_id();
        let parameters = match inner.request.write_parameters() {
            Ok(parameters) => parameters,
            Err(err) => {
                self.finish_locked(&mut inner, link.registry(), Err(err));
                return;
            }
        };
        inner.parameters = parameters;

        match link.registry().register(self) {
            Ok(wire_id) => inner.wire_id = wire_id,
            Err(err) => {
                self.finish_locked(&mut inner, link.registry(), Err(err));
                return;
            }
        }
        debug!(
            "[TRANSACTION] Search {} submits {:?} as transaction {}",
            self.search_id, pdu_id, inner.wire_id
        );
        self.send_locked(&mut inner, link, &ContinuationState::none());
    }

    fn send_locked(
        &self,
        inner: &mut TransactionInner,
        link: &dyn PduLink,
        continuation: &ContinuationState,
    ) {
        let pdu_id = inner.request.pdu_id();
        let result = build_pdu(pdu_id, inner.wire_id, &inner.parameters, continuation)
            .and_then(|pdu| {
                inner.state = TransactionState::AwaitingResponse;
                link.send_pdu(&pdu)
            });
        if let Err(err) = result {
            warn!(
                "[TRANSACTION] Sending transaction {} failed: {err}",
                inner.wire_id
            );
            self.finish_locked(inner, link.registry(), Err(err));
        }
    }

    /// Handle a response PDU routed to this transaction
    pub(crate) fn process_response(
        self: &Arc<Self>,
        link: &dyn PduLink,
        header: &SdpPduHeader,
        params: &[u8],
    ) {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::AwaitingResponse
            || inner.wire_id != header.transaction_id
        {
            debug!(
                "[TRANSACTION] Dropping stale response for transaction {}",
                header.transaction_id
            );
            return;
        }

        let continuation = match Self::read_response(&mut inner, header.pdu_id, params) {
            Ok(continuation) => continuation,
            Err(err) => {
                self.finish_locked(&mut inner, link.registry(), Err(err));
                return;
            }
        };

        if continuation.is_empty() {
            let outcome = inner.request.complete();
            self.finish_locked(&mut inner, link.registry(), outcome);
            return;
        }

        inner.state = TransactionState::Resubmitting;
        let Some(wire_id) = link.registry().rekey(inner.wire_id, self) else {
            // Removed by a concurrent cancel_all, which finishes it next.
            return;
        };
        debug!(
            "[TRANSACTION] Continuing transaction {} as {}",
            inner.wire_id, wire_id
        );
        inner.wire_id = wire_id;
        self.send_locked(&mut inner, link, &continuation);
    }

    fn read_response(
        inner: &mut TransactionInner,
        pdu_id: SdpPduId,
        params: &[u8],
    ) -> Result<ContinuationState, SdpError> {
        let mut cursor = Cursor::new(params);
        if pdu_id == SdpPduId::ErrorResponse {
            return Err(protocol::read_error_response(&mut cursor)?);
        }
        if inner.request.pdu_id().response() != Some(pdu_id) {
            return Err(SdpError::UnexpectedPdu(pdu_id as u8));
        }
        inner.request.read_parameters(&mut cursor)?;
        let continuation = ContinuationState::read(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(SdpError::TrailingBytes(cursor.remaining()));
        }
        Ok(continuation)
    }

    /// Finish with `reason` unless already finished
    pub(crate) fn cancel(&self, registry: &TransactionRegistry, reason: SdpError) -> bool {
        let mut inner = self.inner.lock();
        self.finish_locked(&mut inner, registry, Err(reason))
    }

    fn finish_locked(
        &self,
        inner: &mut TransactionInner,
        registry: &TransactionRegistry,
        outcome: Result<SdpResponse, SdpError>,
    ) -> bool {
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = match &outcome {
            Ok(_) => TransactionState::Completed,
            Err(SdpError::Terminated) => TransactionState::Canceled,
            Err(_) => TransactionState::Errored,
        };
        if inner.state != TransactionState::Completed {
            debug!(
                "[TRANSACTION] Search {} transaction {} ended {:?}",
                self.search_id, inner.wire_id, inner.state
            );
        }
        registry.remove(inner.wire_id, self);
        inner.outcome = Some(outcome);
        self.finished.notify_all();
        true
    }

    /// Block until the transaction has finished and take its outcome
    pub(crate) fn wait(&self) -> Result<SdpResponse, SdpError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = inner.outcome.take() {
                return outcome;
            }
            if inner.state.is_terminal() {
                return Err(SdpError::Terminated);
            }
            self.finished.wait(&mut inner);
        }
    }
}

impl core::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transaction")
            .field("search_id", &self.search_id)
            .finish_non_exhaustive()
    }
}

struct RegistryInner {
    live: FnvIndexMap<TransactionId, Arc<Transaction>, MAX_TRANSACTIONS>,
    next_id: TransactionId,
}

impl RegistryInner {
    fn allocate(&mut self) -> TransactionId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.live.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Live transactions of one connection, keyed by wire transaction ID
pub(crate) struct TransactionRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                live: FnvIndexMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Register under an ID no live transaction uses
    pub(crate) fn register(&self, transaction: &Arc<Transaction>) -> Result<TransactionId, SdpError> {
        let mut inner = self.inner.lock();
        if inner.live.len() == MAX_TRANSACTIONS {
            return Err(SdpError::TooManyTransactions);
        }
        let id = inner.allocate();
        inner
            .live
            .insert(id, Arc::clone(transaction))
            .map_err(|_| SdpError::TooManyTransactions)?;
        Ok(id)
    }

    /// Move a transaction to a fresh ID
    ///
    /// Returns `None` if `old` no longer maps to `transaction`.
    pub(crate) fn rekey(
        &self,
        old: TransactionId,
        transaction: &Arc<Transaction>,
    ) -> Option<TransactionId> {
        let mut inner = self.inner.lock();
        match inner.live.get(&old) {
            Some(entry) if Arc::ptr_eq(entry, transaction) => {}
            _ => return None,
        }
        inner.live.remove(&old);
        let id = inner.allocate();
        inner.live.insert(id, Arc::clone(transaction)).ok()?;
        Some(id)
    }

    /// Remove `id` if it still maps to `transaction`
    pub(crate) fn remove(&self, id: TransactionId, transaction: &Transaction) {
        let mut inner = self.inner.lock();
        if inner
            .live
            .get(&id)
            .is_some_and(|entry| core::ptr::eq(Arc::as_ptr(entry), transaction))
        {
            inner.live.remove(&id);
        }
    }

    pub(crate) fn get(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        self.inner.lock().live.get(&id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Live transactions of a search
    pub(crate) fn find_search(&self, search_id: SearchId) -> Vec<Arc<Transaction>> {
        self.inner
            .lock()
            .live
            .values()
            .filter(|transaction| transaction.search_id() == search_id)
            .cloned()
            .collect()
    }

    /// Finish every live transaction with `reason`
    ///
    /// Transactions that complete concurrently are not notified twice.
    pub(crate) fn cancel_all(&self, reason: &SdpError) -> usize {
        let drained: Vec<Arc<Transaction>> = {
            let mut inner = self.inner.lock();
            let drained = inner.live.values().cloned().collect();
            inner.live.clear();
            drained
        };
        drained
            .iter()
            .filter(|transaction| transaction.cancel(self, reason.clone()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdp::element::DataElement;
    use crate::sdp::protocol::split_pdu;

    #[derive(Default)]
    struct RecordingLink {
        registry: TransactionRegistry,
        sent: Mutex<Vec<Vec<u8>>>,
        broken: bool,
    }

    impl PduLink for RecordingLink {
        fn registry(&self) -> &TransactionRegistry {
            &self.registry
        }

        fn send_pdu(&self, pdu: &[u8]) -> Result<(), SdpError> {
            if self.broken {
                return Err(SdpError::Transport("link down".into()));
            }
            self.sent.lock().push(pdu.to_vec());
            Ok(())
        }
    }

    fn respond(
        transaction: &Arc<Transaction>,
        link: &RecordingLink,
        pdu_id: SdpPduId,
        wire_id: TransactionId,
        params: &[u8],
        continuation: &[u8],
    ) {
        let continuation = ContinuationState::try_from(continuation).unwrap();
        let pdu = build_pdu(pdu_id, wire_id, params, &continuation).unwrap();
        let (header, params) = split_pdu(&pdu).unwrap();
        transaction.process_response(link, &header, params);
    }

    fn search_transaction() -> Arc<Transaction> {
        Transaction::new(
            9,
            Box::new(ServiceSearchRequest::new(
                &[Uuid::from_u16(0x1101)],
                10,
                UuidForm::Declared,
            )),
        )
    }

    #[test]
    fn test_continuation_resubmits_same_request_under_new_id() {
        let link = RecordingLink::default();
        let transaction = search_transaction();
        transaction.submit(&link);
        assert_eq!(
            link.sent.lock()[0],
            [0x02, 0x00, 0x01, 0x00, 0x08, 0x35, 0x03, 0x19, 0x11, 0x01, 0x00, 0x0A, 0x00]
        );

        respond(
            &transaction,
            &link,
            SdpPduId::ServiceSearchResponse,
            1,
            &[0x00, 0x02, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00],
            &[0xAA, 0xBB],
        );
        assert_eq!(link.sent.lock().len(), 2);
        assert_eq!(
            link.sent.lock()[1],
            [
                0x02, 0x00, 0x02, 0x00, 0x0A, 0x35, 0x03, 0x19, 0x11, 0x01, 0x00, 0x0A, 0x02,
                0xAA, 0xBB
            ]
        );
        assert_eq!(link.registry.len(), 1);
        assert!(link.registry.get(1).is_none());
        assert!(link.registry.get(2).is_some());

        // A late duplicate under the old ID changes nothing.
        respond(
            &transaction,
            &link,
            SdpPduId::ServiceSearchResponse,
            1,
            &[0x00, 0x02, 0x00, 0x00],
            &[],
        );
        assert_eq!(transaction.state(), TransactionState::AwaitingResponse);

        respond(
            &transaction,
            &link,
            SdpPduId::ServiceSearchResponse,
            2,
            &[0x00, 0x02, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01],
            &[],
        );
        assert_eq!(
            transaction.wait(),
            Ok(SdpResponse::ServiceSearch {
                handles: vec![0x0001_0000, 0x0001_0001]
            })
        );
        assert_eq!(link.registry.len(), 0);
    }

    #[test]
    fn test_error_response_fails_transaction() {
        let link = RecordingLink::default();
        let transaction = search_transaction();
        transaction.submit(&link);
        respond(&transaction, &link, SdpPduId::ErrorResponse, 1, &[0x00, 0x03], &[]);
        assert!(matches!(
            transaction.wait(),
            Err(SdpError::ProtocolError {
                code: crate::sdp::SdpErrorCode::InvalidRequestSyntax,
                ..
            })
        ));
        assert_eq!(transaction.state(), TransactionState::Errored);
    }

    #[test]
    fn test_unexpected_response_pdu() {
        let link = RecordingLink::default();
        let transaction = search_transaction();
        transaction.submit(&link);
        respond(
            &transaction,
            &link,
            SdpPduId::ServiceAttributeResponse,
            1,
            &[0x00, 0x00],
            &[],
        );
        assert_eq!(transaction.wait(), Err(SdpError::UnexpectedPdu(0x05)));
    }

    #[test]
    fn test_attribute_fragments_are_joined() {
        let link = RecordingLink::default();
        let transaction = Transaction::new(
            1,
            Box::new(ServiceAttributeRequest::new(0x0001_0000, &[0x0000, 0x0100], 0xFFFF)),
        );
        transaction.submit(&link);
        assert_eq!(
            link.sent.lock()[0][5..],
            [
                0x00, 0x01, 0x00, 0x00, 0xFF, 0xFF, 0x35, 0x06, 0x09, 0x00, 0x00, 0x09, 0x01,
                0x00, 0x00
            ]
        );

        let list = codec::encode(&DataElement::Sequence(vec![
            DataElement::UnsignedInt16(0x0000),
            DataElement::UnsignedInt32(0x0001_0000),
            DataElement::UnsignedInt16(0x0100),
            DataElement::text("Chat"),
        ]))
        .unwrap();
        let (first, second) = list.split_at(5);

        let mut params = vec![0x00, 0x05];
        params.extend_from_slice(first);
        respond(&transaction, &link, SdpPduId::ServiceAttributeResponse, 1, &params, &[0x01]);

        #[allow(clippy::cast_possible_truncation)]
        let mut params = vec![0x00, second.len() as u8];
        params.extend_from_slice(second);
        respond(&transaction, &link, SdpPduId::ServiceAttributeResponse, 2, &params, &[]);

        let Ok(SdpResponse::ServiceAttribute { handle, attributes }) = transaction.wait() else {
            panic!("attribute response expected");
        };
        assert_eq!(handle, 0x0001_0000);
        assert_eq!(attributes.ids, [0x0000, 0x0100]);
        assert_eq!(attributes.values[1].as_str(), Some("Chat"));
    }

    #[test]
    fn test_cancel_after_completion_is_a_no_op() {
        let link = RecordingLink::default();
        let transaction = search_transaction();
        transaction.submit(&link);
        respond(
            &transaction,
            &link,
            SdpPduId::ServiceSearchResponse,
            1,
            &[0x00, 0x00, 0x00, 0x00],
            &[],
        );
        assert!(!transaction.cancel(&link.registry, SdpError::Terminated));
        assert_eq!(transaction.state(), TransactionState::Completed);
        assert_eq!(
            transaction.wait(),
            Ok(SdpResponse::ServiceSearch { handles: vec![] })
        );
    }

    #[test]
    fn test_send_failure_finishes_with_transport_error() {
        let link = RecordingLink {
            broken: true,
            ..RecordingLink::default()
        };
        let transaction = search_transaction();
        transaction.submit(&link);
        assert!(matches!(transaction.wait(), Err(SdpError::Transport(_))));
        assert_eq!(link.registry.len(), 0);
    }

    #[test]
    fn test_registry_capacity_and_unique_ids() {
        let link = RecordingLink::default();
        let transactions: Vec<_> = (0..MAX_TRANSACTIONS).map(|_| search_transaction()).collect();
        for transaction in &transactions {
            transaction.submit(&link);
        }
        assert_eq!(link.registry.len(), MAX_TRANSACTIONS);

        let mut ids: Vec<u16> = link
            .sent
            .lock()
            .iter()
            .map(|pdu| u16::from_be_bytes([pdu[1], pdu[2]]))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), MAX_TRANSACTIONS);

        let overflow = search_transaction();
        overflow.submit(&link);
        assert_eq!(overflow.wait(), Err(SdpError::TooManyTransactions));

        assert_eq!(link.registry.find_search(9).len(), MAX_TRANSACTIONS);
        assert_eq!(link.registry.cancel_all(&SdpError::Terminated), MAX_TRANSACTIONS);
        assert_eq!(link.registry.len(), 0);
        for transaction in &transactions {
            assert_eq!(transaction.wait(), Err(SdpError::Terminated));
            assert_eq!(transaction.state(), TransactionState::Canceled);
        }
    }

    #[test]
    fn test_wait_wakes_on_cancel_from_other_thread() {
        let link = Arc::new(RecordingLink::default());
        let transaction = search_transaction();
        transaction.submit(link.as_ref());

        let canceller = {
            let link = Arc::clone(&link);
            std::thread::spawn(move || link.registry.cancel_all(&SdpError::Transport("reset".into())))
        };
        assert_eq!(
            transaction.wait(),
            Err(SdpError::Transport("reset".into()))
        );
        assert_eq!(canceller.join().unwrap(), 1);
    }
}
