//! ATT Client implementation
//!
//! The client owns one link and serializes every request through a FIFO
//! queue: only the head is ever on the wire, and inbound PDUs are matched
//! against that head by opcode alone (ATT responses carry no correlation
//! id). Notifications and indications bypass the queue.
//!
//! The client never blocks. Requests return a [`RequestId`] immediately and
//! the decoded result comes back later as an [`AttEvent::Completed`] from
//! [`AttClient::handle_pdu`], carrying the caller's context value.
use super::codec;
use super::constants::*;
use super::error::{AttError, AttResult};
use super::transport::AttTransport;
use super::types::*;
use crate::gap::BdAddr;
use crate::uuid::Uuid;
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// ATT client configuration
#[derive(Debug, Clone)]
pub struct AttClientConfig {
    /// Rx MTU offered in the MTU exchange
    pub client_mtu: u16,
    /// Deadline for the in-flight request; `None` waits forever
    pub request_timeout: Option<Duration>,
    /// Upper bound on queued requests; `None` is unbounded
    pub max_pending_requests: Option<usize>,
}

impl Default for AttClientConfig {
    fn default() -> Self {
        Self {
            client_mtu: ATT_MAX_MTU,
            request_timeout: Some(Duration::from_millis(ATT_TRANSACTION_TIMEOUT_MS)),
            max_pending_requests: None,
        }
    }
}

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Something the caller has to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttEvent<C> {
    /// A queued request was resolved
    Completed {
        id: RequestId,
        context: C,
        outcome: AttOutcome,
    },
    /// The MTU exchange issued on connect finished
    MtuExchanged(u16),
    /// Handle Value Notification or Indication
    AttributeUpdated {
        handle: u16,
        value: Vec<u8>,
        /// Set for indications, which have already been confirmed
        confirmed: bool,
    },
    /// The client closed the link after a transaction timeout
    LinkClosed,
}

/// Who gets the result of a pending request
#[derive(Debug)]
enum Continuation<C> {
    /// Internal MTU exchange
    ExchangeMtu,
    Caller(C),
    /// Cancelled while on the wire; the response is consumed and dropped
    Cancelled,
}

#[derive(Debug)]
struct PendingRequest<C> {
    id: RequestId,
    /// Request opcode, used to match the response
    opcode: u8,
    /// Encoded PDU, opcode included
    pdu: Vec<u8>,
    continuation: Continuation<C>,
    /// When the PDU went out; `None` until it reaches the head
    sent_at: Option<Instant>,
}

/// ATT Client
pub struct AttClient<T: AttTransport, C> {
    transport: T,
    config: AttClientConfig,
    state: LinkState,
    /// Negotiated MTU
    mtu: u16,
    queue: VecDeque<PendingRequest<C>>,
    /// Next id to hand out; `None` once the id space is used up
    next_id: Option<u32>,
}

impl<T: AttTransport, C> AttClient<T, C> {
    /// Create a new ATT client
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, AttClientConfig::default())
    }

    /// Create a new ATT client with custom configuration
    pub fn with_config(transport: T, config: AttClientConfig) -> Self {
        Self {
            transport,
            config,
            state: LinkState::Disconnected,
            mtu: ATT_DEFAULT_MTU,
            queue: VecDeque::new(),
            next_id: Some(1),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Current MTU; the ATT default until an exchange succeeds
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn config(&self) -> &AttClientConfig {
        &self.config
    }

    /// Number of queued requests, the in-flight one included
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Start connecting. Does nothing unless the link is disconnected.
    pub fn connect(&mut self, address: BdAddr) -> AttResult<()> {
        if self.state != LinkState::Disconnected {
            debug!("Connect to {} ignored, link is {:?}", address, self.state);
            return Ok(());
        }

        info!("Connecting to {}", address);
        self.state = LinkState::Connecting;
        if let Err(e) = self.transport.connect_to(address) {
            error!("Failed to connect to {}: {}", address, e);
            self.state = LinkState::Disconnected;
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the link and abandon every queued request.
    pub fn disconnect(&mut self) {
        if self.state == LinkState::Disconnected {
            debug!("Disconnect ignored, link already down");
            return;
        }
        self.transport.close();
        self.reset();
    }

    /// The transport finished connecting; kicks off the MTU exchange.
    pub fn handle_connected(&mut self) {
        if self.state == LinkState::Connected {
            debug!("Duplicate connected notification");
            return;
        }

        info!("ATT link up");
        self.state = LinkState::Connected;
        self.mtu = ATT_DEFAULT_MTU;

        let request = ExchangeMtuRequest {
            client_mtu: self.config.client_mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU),
        };
        let result = request
            .payload()
            .and_then(|payload| self.enqueue(ATT_EXCHANGE_MTU_REQ, &payload, Continuation::ExchangeMtu));
        if let Err(e) = result {
            error!("Failed to start MTU exchange: {}", e);
        }
    }

    /// The transport lost the link. Returns `false` if it was already down.
    pub fn handle_disconnected(&mut self) -> bool {
        if self.state == LinkState::Disconnected {
            return false;
        }
        info!("ATT link down, dropping {} pending requests", self.queue.len());
        self.reset();
        true
    }

    fn reset(&mut self) {
        self.state = LinkState::Disconnected;
        self.mtu = ATT_DEFAULT_MTU;
        self.queue.clear();
    }

    /// Queue a request. It goes on the wire right away if nothing else is
    /// pending, otherwise once everything ahead of it has been answered.
    pub fn request(&mut self, opcode: u8, payload: &[u8], context: C) -> AttResult<RequestId> {
        self.enqueue(opcode, payload, Continuation::Caller(context))
    }

    /// Queue a typed request.
    pub fn send_request<R: AttRequest>(&mut self, request: &R, context: C) -> AttResult<RequestId> {
        let payload = request.payload()?;
        self.request(R::opcode(), &payload, context)
    }

    /// Send a PDU that never gets a response, bypassing the queue.
    pub fn command(&mut self, opcode: u8, payload: &[u8]) -> AttResult<()> {
        if !self.is_connected() {
            warn!("Command 0x{:02x} while not connected", opcode);
            return Err(AttError::InvalidState);
        }
        let pdu = codec::encode(opcode, payload);
        trace!("ATT tx {}", hex::encode(&pdu));
        self.transport.send(&pdu)?;
        Ok(())
    }

    pub fn find_information(&mut self, start_handle: u16, end_handle: u16, context: C) -> AttResult<RequestId> {
        self.send_request(&FindInformationRequest { start_handle, end_handle }, context)
    }

    pub fn find_by_type_value(
        &mut self,
        start_handle: u16,
        end_handle: u16,
        attribute_type: Uuid,
        attribute_value: Vec<u8>,
        context: C,
    ) -> AttResult<RequestId> {
        let request = FindByTypeValueRequest {
            start_handle,
            end_handle,
            attribute_type,
            attribute_value,
        };
        self.send_request(&request, context)
    }

    pub fn read_by_type(
        &mut self,
        start_handle: u16,
        end_handle: u16,
        attribute_type: Uuid,
        context: C,
    ) -> AttResult<RequestId> {
        let request = ReadByTypeRequest {
            start_handle,
            end_handle,
            attribute_type,
        };
        self.send_request(&request, context)
    }

    pub fn read_by_group_type(
        &mut self,
        start_handle: u16,
        end_handle: u16,
        group_type: Uuid,
        context: C,
    ) -> AttResult<RequestId> {
        let request = ReadByGroupTypeRequest {
            start_handle,
            end_handle,
            group_type,
        };
        self.send_request(&request, context)
    }

    pub fn read(&mut self, handle: u16, context: C) -> AttResult<RequestId> {
        self.send_request(&ReadRequest { handle }, context)
    }

    pub fn write(&mut self, handle: u16, value: &[u8], context: C) -> AttResult<RequestId> {
        let request = WriteRequest {
            handle,
            value: value.to_vec(),
        };
        self.send_request(&request, context)
    }

    pub fn write_command(&mut self, handle: u16, value: &[u8]) -> AttResult<()> {
        let command = WriteCommand {
            handle,
            value: value.to_vec(),
        };
        self.command(WriteCommand::opcode(), &command.payload()?)
    }

    /// Remove a request from the queue.
    ///
    /// A request already on the wire stays queued so its response is still
    /// consumed, but the response is discarded. Returns whether `id` was
    /// found and not already cancelled.
    pub fn cancel_request(&mut self, id: RequestId) -> bool {
        let before = self.queue.len();
        let mut at_head = true;
        let mut detached = false;

        self.queue.retain_mut(|entry| {
            let head = std::mem::replace(&mut at_head, false);
            if entry.id != id {
                return true;
            }
            if head && entry.sent_at.is_some() {
                if !matches!(entry.continuation, Continuation::Cancelled) {
                    entry.continuation = Continuation::Cancelled;
                    detached = true;
                }
                return true;
            }
            false
        });

        let found = detached || self.queue.len() != before;
        if found {
            debug!("Cancelled request {}", id.0);
        }
        found
    }

    /// Feed one inbound PDU.
    ///
    /// Anything that is neither an asynchronous event nor the response to
    /// the head request is logged and dropped.
    pub fn handle_pdu(&mut self, pdu: &[u8]) -> Option<AttEvent<C>> {
        trace!("ATT rx {}", hex::encode(pdu));

        let Some((opcode, body)) = codec::decode(pdu) else {
            debug!("Dropping empty PDU");
            return None;
        };

        if is_async_event(opcode) {
            return self.handle_value(opcode, body);
        }

        let Some(head_opcode) = self.queue.front().map(|head| head.opcode) else {
            debug!("Unrecognized PDU with nothing pending: {}", hex::encode(pdu));
            return None;
        };

        let Some(outcome) = codec::decode_response(head_opcode, pdu) else {
            debug!(
                "Unrecognized PDU 0x{:02x} while awaiting response to 0x{:02x}",
                opcode, head_opcode
            );
            return None;
        };

        let entry = self.queue.pop_front()?;
        self.send_head();

        match entry.continuation {
            Continuation::ExchangeMtu => Some(AttEvent::MtuExchanged(self.apply_mtu(outcome))),
            Continuation::Caller(context) => Some(AttEvent::Completed {
                id: entry.id,
                context,
                outcome,
            }),
            Continuation::Cancelled => {
                debug!("Discarding response to cancelled request {}", entry.id.0);
                None
            }
        }
    }

    /// Fail the in-flight request if its deadline passed.
    ///
    /// A timed out bearer cannot carry further requests, so the link is
    /// closed as well and [`AttEvent::LinkClosed`] ends the returned list.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<AttEvent<C>> {
        let Some(timeout) = self.config.request_timeout else {
            return Vec::new();
        };

        let expired = match self.queue.front() {
            Some(PendingRequest {
                sent_at: Some(sent_at),
                ..
            }) => now.saturating_duration_since(*sent_at) >= timeout,
            _ => false,
        };
        if !expired {
            return Vec::new();
        }

        let mut events = Vec::new();
        if let Some(entry) = self.queue.pop_front() {
            error!(
                "Request {} (opcode 0x{:02x}) timed out, closing link",
                entry.id.0, entry.opcode
            );
            if let Continuation::Caller(context) = entry.continuation {
                events.push(AttEvent::Completed {
                    id: entry.id,
                    context,
                    outcome: AttOutcome::TimedOut,
                });
            }
        }

        self.transport.close();
        self.reset();
        events.push(AttEvent::LinkClosed);
        events
    }

    fn handle_value(&mut self, opcode: u8, body: &[u8]) -> Option<AttEvent<C>> {
        let Some((handle, value)) = codec::parse_handle_value(body) else {
            debug!("Truncated handle value PDU 0x{:02x}", opcode);
            return None;
        };

        let confirmed = opcode == ATT_HANDLE_VALUE_IND;
        if confirmed {
            if let Err(e) = self.command(ATT_HANDLE_VALUE_CONF, &[]) {
                error!("Failed to confirm indication on 0x{:04x}: {}", handle, e);
            }
        }

        Some(AttEvent::AttributeUpdated {
            handle,
            value: value.to_vec(),
            confirmed,
        })
    }

    fn apply_mtu(&mut self, outcome: AttOutcome) -> u16 {
        match outcome {
            AttOutcome::Response(AttResponse::Mtu(server_mtu)) if server_mtu > 0 => {
                let client_mtu = self.config.client_mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU);
                self.mtu = client_mtu.min(server_mtu).max(ATT_DEFAULT_MTU);
                debug!("MTU negotiated: {}", self.mtu);
            }
            other => {
                debug!("MTU exchange failed ({:?}), keeping {}", other, ATT_DEFAULT_MTU);
                self.mtu = ATT_DEFAULT_MTU;
            }
        }
        self.mtu
    }

    fn enqueue(&mut self, opcode: u8, payload: &[u8], continuation: Continuation<C>) -> AttResult<RequestId> {
        if !self.is_connected() {
            warn!("Request 0x{:02x} while not connected", opcode);
            return Err(AttError::InvalidState);
        }
        if response_opcode_for(opcode).is_none() {
            warn!("Opcode 0x{:02x} has no response, send it with command()", opcode);
            return Err(AttError::InvalidPdu);
        }
        if let Some(max) = self.config.max_pending_requests {
            if self.queue.len() >= max {
                warn!("Request queue full, rejecting 0x{:02x}", opcode);
                return Err(AttError::QueueFull(self.queue.len()));
            }
        }

        let id = self.next_request_id()?;
        self.queue.push_back(PendingRequest {
            id,
            opcode,
            pdu: codec::encode(opcode, payload),
            continuation,
            sent_at: None,
        });

        if self.queue.len() == 1 {
            let pdu = self.mark_head_sent();
            trace!("ATT tx {}", hex::encode(&pdu));
            if let Err(e) = self.transport.send(&pdu) {
                error!("Failed to send request {}: {}", id.0, e);
                self.queue.pop_back();
                return Err(e.into());
            }
        }

        Ok(id)
    }

    /// Put the new head on the wire after the previous one was answered.
    fn send_head(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let pdu = self.mark_head_sent();
        trace!("ATT tx {}", hex::encode(&pdu));
        // The transport reports the dead link on its own; until then the
        // deadline still covers this request.
        if let Err(e) = self.transport.send(&pdu) {
            error!("Failed to send queued request: {}", e);
        }
    }

    fn mark_head_sent(&mut self) -> Vec<u8> {
        match self.queue.front_mut() {
            Some(head) => {
                head.sent_at = Some(Instant::now());
                head.pdu.clone()
            }
            None => Vec::new(),
        }
    }

    fn next_request_id(&mut self) -> AttResult<RequestId> {
        let id = self.next_id.ok_or(AttError::RequestIdsExhausted)?;
        self.next_id = id.checked_add(1);
        Ok(RequestId(id))
    }

    #[cfg(test)]
    pub(crate) fn set_next_request_id(&mut self, id: u32) {
        self.next_id = Some(id);
    }
}
