//! GATT peripheral model and discovery
//!
//! A [`Peripheral`] drives an [`AttClient`] to walk the remote attribute
//! table in three cascaded phases: primary services, the characteristics
//! of one service, the descriptors of one characteristic. Each phase pages
//! through its handle range, restarting one past the last handle the server
//! actually returned, until the server reports nothing left.
//!
//! Results land in a handle-indexed model plus reverse indices that map a
//! bare handle (as carried by notifications) back to its characteristic.
//! Nothing here blocks: feed transport activity in through
//! [`Peripheral::handle_connected`], [`Peripheral::handle_pdu`] and friends,
//! then drain [`Peripheral::poll_event`].

use super::error::{GattError, GattResult};
use super::event::PeripheralEvent;
use super::types::*;
use crate::att::{
    AttClient, AttClientConfig, AttEvent, AttOutcome, AttResponse, AttTransport, LinkState,
    RequestId, ATT_HANDLE_MAX, ATT_HANDLE_MIN, ATT_READ_REQ, ATT_WRITE_HEADER_SIZE,
};
use crate::gap::{AdvertisingData, BdAddr};
use crate::uuid::Uuid;
use log::{debug, error, info, trace, warn};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Instant;

/// What a queued ATT request was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    PrimaryServices,
    PrimaryServicesByUuid(Uuid),
    Characteristics { service: u16 },
    Descriptors { characteristic: u16 },
    ReadCharacteristic(u16),
    ReadDescriptor(u16),
    WriteCharacteristic(u16),
    WriteDescriptor(u16),
}

/// One discovery phase in progress over `[start, end]`
#[derive(Debug, Clone, Copy)]
struct Pagination {
    /// Request currently on the wire for this phase
    request: RequestId,
    /// Start handle of that request
    start: u16,
    end: u16,
}

impl Pagination {
    /// Start handle of the page after one whose last handle was `last`,
    /// or `None` once the range is exhausted.
    ///
    /// A server that does not move past the previous start ends the phase.
    fn next_start(&self, last: u16) -> Option<u16> {
        let next = last.checked_add(1)?;
        if next <= self.start {
            warn!(
                "Server did not advance past 0x{:04x}, ending discovery",
                self.start
            );
            return None;
        }
        (next <= self.end).then_some(next)
    }

    fn advance(&mut self, request: RequestId, start: u16) {
        self.request = request;
        self.start = start;
    }
}

#[derive(Debug)]
struct CharacteristicSession {
    page: Pagination,
    /// Last declaration seen; its end handle is final only once the next
    /// declaration or the end of the phase is known
    tail: Option<Characteristic>,
    /// Only characteristics with these UUIDs are published
    filter: Option<HashSet<Uuid>>,
}

/// One discovery page, classified
enum Page<R> {
    Records(Vec<R>),
    /// Nothing left in the range, or the server refused
    Done,
    /// Transaction timed out; the phase ends without an event
    Aborted,
}

impl<R> Page<R> {
    fn from_outcome(
        outcome: AttOutcome,
        phase: &str,
        extract: impl FnOnce(AttResponse) -> Option<Vec<R>>,
    ) -> Self {
        match outcome {
            AttOutcome::Response(response) => match extract(response) {
                Some(records) if !records.is_empty() => Page::Records(records),
                Some(_) => Page::Done,
                None => {
                    warn!("Unexpected response during {} discovery", phase);
                    Page::Done
                }
            },
            AttOutcome::EndOfRange => Page::Done,
            AttOutcome::Rejected { handle, error_code } => {
                warn!(
                    "{} discovery rejected at 0x{:04x}: {:?}",
                    phase, handle, error_code
                );
                Page::Done
            }
            AttOutcome::TimedOut => {
                warn!("{} discovery timed out", phase);
                Page::Aborted
            }
        }
    }
}

/// A remote GATT server reached over one ATT link
pub struct Peripheral<T: AttTransport> {
    address: BdAddr,
    att: AttClient<T, Operation>,
    advertising: AdvertisingData,
    /// Services keyed by start handle
    services: BTreeMap<u16, Service>,
    /// Characteristic declaration handle to service start handle
    characteristic_to_service: HashMap<u16, u16>,
    /// Value handle to characteristic declaration handle
    value_to_characteristic: HashMap<u16, u16>,
    /// Descriptor handle to characteristic declaration handle
    descriptor_to_characteristic: HashMap<u16, u16>,
    primary_session: Option<Pagination>,
    uuid_sessions: HashMap<Uuid, Pagination>,
    /// Keyed by service start handle
    characteristic_sessions: HashMap<u16, CharacteristicSession>,
    /// Keyed by characteristic declaration handle
    descriptor_sessions: HashMap<u16, Pagination>,
    /// Notification state to write once a CCCD turns up, by characteristic
    pub(super) pending_notifications: HashMap<u16, bool>,
    events: VecDeque<PeripheralEvent>,
}

impl<T: AttTransport> Peripheral<T> {
    pub fn new(address: BdAddr, transport: T) -> Self {
        Self::with_config(address, transport, AttClientConfig::default())
    }

    pub fn with_config(address: BdAddr, transport: T, config: AttClientConfig) -> Self {
        Self {
            address,
            att: AttClient::with_config(transport, config),
            advertising: AdvertisingData::default(),
            services: BTreeMap::new(),
            characteristic_to_service: HashMap::new(),
            value_to_characteristic: HashMap::new(),
            descriptor_to_characteristic: HashMap::new(),
            primary_session: None,
            uuid_sessions: HashMap::new(),
            characteristic_sessions: HashMap::new(),
            descriptor_sessions: HashMap::new(),
            pending_notifications: HashMap::new(),
            events: VecDeque::new(),
        }
    }

    pub fn address(&self) -> BdAddr {
        self.address
    }

    pub fn state(&self) -> LinkState {
        self.att.state()
    }

    pub fn is_connected(&self) -> bool {
        self.att.is_connected()
    }

    pub fn mtu(&self) -> u16 {
        self.att.mtu()
    }

    /// Local name from advertising data
    pub fn name(&self) -> Option<&str> {
        self.advertising.name.as_deref()
    }

    pub fn advertising(&self) -> &AdvertisingData {
        &self.advertising
    }

    /// Whether the service was advertised or has been discovered
    pub fn advertises_service(&self, uuid: &Uuid) -> bool {
        self.advertising.service_uuids.contains(uuid)
    }

    pub fn transport(&self) -> &T {
        self.att.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.att.transport_mut()
    }

    /// Next pending event, oldest first
    pub fn poll_event(&mut self) -> Option<PeripheralEvent> {
        self.events.pop_front()
    }

    /// Merge an EIR / advertising data block into the summary.
    pub fn parse_eir(&mut self, data: &[u8]) {
        for name in self.advertising.merge(data) {
            self.events.push_back(PeripheralEvent::NameChanged(name));
        }
    }

    /// All known services, in handle order
    pub fn services(&self) -> Vec<Service> {
        self.services.values().cloned().collect()
    }

    pub fn service(&self, start_handle: u16) -> Option<Service> {
        self.services.get(&start_handle).cloned()
    }

    /// Look up a characteristic by its declaration handle
    pub fn characteristic(&self, handle: u16) -> Option<Characteristic> {
        self.find_characteristic(handle).cloned()
    }

    pub fn descriptor(&self, handle: u16) -> Option<Descriptor> {
        self.find_descriptor(handle).copied()
    }

    pub fn connect(&mut self) -> GattResult<()> {
        self.att.connect(self.address)?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.att.state() == LinkState::Disconnected {
            debug!("{} already disconnected", self.address);
            return;
        }
        let was_connected = self.att.is_connected();
        self.att.disconnect();
        self.link_down(was_connected);
    }

    /// The transport finished connecting.
    pub fn handle_connected(&mut self) {
        if self.att.is_connected() {
            debug!("{} already connected", self.address);
            return;
        }
        info!("Connected to {}", self.address);
        self.att.handle_connected();
        self.events.push_back(PeripheralEvent::Connected);
    }

    /// The transport lost the link.
    pub fn handle_disconnected(&mut self) {
        let was_connected = self.att.is_connected();
        if self.att.handle_disconnected() {
            self.link_down(was_connected);
        }
    }

    /// Feed one PDU received on the ATT channel.
    pub fn handle_pdu(&mut self, pdu: &[u8]) {
        if let Some(event) = self.att.handle_pdu(pdu) {
            self.dispatch(event);
        }
    }

    /// Fail a request that has been on the wire past its deadline.
    pub fn check_timeouts(&mut self, now: Instant) {
        for event in self.att.check_timeouts(now) {
            self.dispatch(event);
        }
    }

    /// Discover every primary service, replacing the current model.
    pub fn discover_services(&mut self) -> GattResult<()> {
        self.ensure_connected()?;

        self.cancel_discovery();
        self.clear_services();

        let request = self.att.read_by_group_type(
            ATT_HANDLE_MIN,
            ATT_HANDLE_MAX,
            Uuid::PRIMARY_SERVICE,
            Operation::PrimaryServices,
        )?;
        self.primary_session = Some(Pagination {
            request,
            start: ATT_HANDLE_MIN,
            end: ATT_HANDLE_MAX,
        });
        Ok(())
    }

    /// Discover only the primary services with the given UUIDs.
    ///
    /// Each UUID is paged on its own; `ServicesDiscovered` fires once the
    /// last of them completes. An empty list does nothing.
    pub fn discover_services_by_uuid(&mut self, uuids: &[Uuid]) -> GattResult<()> {
        if uuids.is_empty() {
            debug!("No service UUIDs to discover");
            return Ok(());
        }
        self.ensure_connected()?;

        for uuid in uuids {
            if let Some(old) = self.uuid_sessions.remove(uuid) {
                self.att.cancel_request(old.request);
            }
            let request = self.att.find_by_type_value(
                ATT_HANDLE_MIN,
                ATT_HANDLE_MAX,
                Uuid::PRIMARY_SERVICE,
                uuid.to_att_bytes(),
                Operation::PrimaryServicesByUuid(*uuid),
            )?;
            self.uuid_sessions.insert(
                *uuid,
                Pagination {
                    request,
                    start: ATT_HANDLE_MIN,
                    end: ATT_HANDLE_MAX,
                },
            );
        }
        Ok(())
    }

    /// Discover the characteristics of the service starting at `service`.
    ///
    /// The service's previous characteristics are dropped first. With a
    /// non-empty `filter` the whole service is still walked, but only
    /// matching characteristics are kept.
    pub fn discover_characteristics(&mut self, service: u16, filter: &[Uuid]) -> GattResult<()> {
        let (start, end) = match self.services.get(&service) {
            Some(s) => (s.start_handle, s.end_handle),
            None => {
                warn!("Unknown service 0x{:04x} for {}", service, self.address);
                return Err(GattError::UnknownService(service));
            }
        };
        self.ensure_connected()?;

        self.clear_characteristics(service);
        if let Some(old) = self.characteristic_sessions.remove(&service) {
            self.att.cancel_request(old.page.request);
        }

        let request = self.att.read_by_type(
            start,
            end,
            Uuid::CHARACTERISTIC,
            Operation::Characteristics { service },
        )?;
        self.characteristic_sessions.insert(
            service,
            CharacteristicSession {
                page: Pagination { request, start, end },
                tail: None,
                filter: (!filter.is_empty()).then(|| filter.iter().copied().collect()),
            },
        );
        Ok(())
    }

    /// Discover the descriptors of the characteristic declared at
    /// `characteristic`, replacing any already known.
    pub fn discover_descriptors(&mut self, characteristic: u16) -> GattResult<()> {
        let (start, end) = {
            let found = self.lookup_characteristic(characteristic)?;
            (found.start_handle, found.end_handle)
        };
        self.ensure_connected()?;

        self.clear_descriptors(characteristic);
        if let Some(old) = self.descriptor_sessions.remove(&characteristic) {
            self.att.cancel_request(old.request);
        }

        let Some(first) = start.checked_add(1).filter(|first| *first <= end) else {
            // Declaration and value fill the whole range
            self.finish_descriptors(characteristic);
            return Ok(());
        };

        let request = self.att.find_information(
            first,
            end,
            Operation::Descriptors { characteristic },
        )?;
        self.descriptor_sessions.insert(
            characteristic,
            Pagination {
                request,
                start: first,
                end,
            },
        );
        Ok(())
    }

    /// Read a characteristic value; the result arrives as `ValueUpdated`.
    pub fn read_characteristic(&mut self, characteristic: u16) -> GattResult<()> {
        let value_handle = self.lookup_characteristic(characteristic)?.value_handle;
        self.ensure_connected()?;
        self.att
            .read(value_handle, Operation::ReadCharacteristic(characteristic))?;
        Ok(())
    }

    /// Read a descriptor value; the result arrives as `DescriptorValueUpdated`.
    pub fn read_descriptor(&mut self, descriptor: u16) -> GattResult<()> {
        self.lookup_descriptor(descriptor)?;
        self.ensure_connected()?;
        self.att
            .read(descriptor, Operation::ReadDescriptor(descriptor))?;
        Ok(())
    }

    pub fn write_characteristic(
        &mut self,
        characteristic: u16,
        value: &[u8],
        write_type: WriteType,
    ) -> GattResult<()> {
        let value_handle = self.lookup_characteristic(characteristic)?.value_handle;
        self.ensure_connected()?;
        self.check_length(value)?;

        match write_type {
            WriteType::WithResponse => {
                self.att.write(
                    value_handle,
                    value,
                    Operation::WriteCharacteristic(characteristic),
                )?;
            }
            WriteType::WithoutResponse => self.att.write_command(value_handle, value)?,
        }
        Ok(())
    }

    pub fn write_descriptor(&mut self, descriptor: u16, value: &[u8]) -> GattResult<()> {
        self.lookup_descriptor(descriptor)?;
        self.ensure_connected()?;
        self.check_length(value)?;
        self.att
            .write(descriptor, value, Operation::WriteDescriptor(descriptor))?;
        Ok(())
    }

    pub(super) fn ensure_connected(&self) -> GattResult<()> {
        if self.att.is_connected() {
            Ok(())
        } else {
            warn!("Not connected to {}", self.address);
            Err(GattError::NotConnected)
        }
    }

    pub(super) fn lookup_characteristic(&self, handle: u16) -> GattResult<&Characteristic> {
        self.find_characteristic(handle).ok_or_else(|| {
            warn!("Unknown characteristic 0x{:04x} for {}", handle, self.address);
            GattError::UnknownCharacteristic(handle)
        })
    }

    fn lookup_descriptor(&self, handle: u16) -> GattResult<&Descriptor> {
        self.find_descriptor(handle).ok_or_else(|| {
            warn!("Unknown descriptor 0x{:04x} for {}", handle, self.address);
            GattError::UnknownDescriptor(handle)
        })
    }

    fn check_length(&self, value: &[u8]) -> GattResult<()> {
        let max = usize::from(self.att.mtu()) - ATT_WRITE_HEADER_SIZE;
        if value.len() > max {
            warn!("Value of {} bytes does not fit MTU {}", value.len(), self.att.mtu());
            return Err(GattError::ValueTooLong {
                len: value.len(),
                max,
            });
        }
        Ok(())
    }

    fn find_characteristic(&self, handle: u16) -> Option<&Characteristic> {
        let service = self.characteristic_to_service.get(&handle)?;
        self.services.get(service)?.characteristic(handle)
    }

    fn find_characteristic_mut(&mut self, handle: u16) -> Option<&mut Characteristic> {
        let service = self.characteristic_to_service.get(&handle)?;
        self.services
            .get_mut(service)?
            .characteristics
            .iter_mut()
            .find(|c| c.start_handle == handle)
    }

    fn find_descriptor(&self, handle: u16) -> Option<&Descriptor> {
        let characteristic = self.descriptor_to_characteristic.get(&handle)?;
        self.find_characteristic(*characteristic)?.descriptor(handle)
    }

    fn dispatch(&mut self, event: AttEvent<Operation>) {
        match event {
            AttEvent::Completed {
                id,
                context,
                outcome,
            } => self.complete(id, context, outcome),
            AttEvent::MtuExchanged(mtu) => debug!("MTU for {} is {}", self.address, mtu),
            AttEvent::AttributeUpdated {
                handle,
                value,
                confirmed,
            } => self.attribute_updated(handle, value, confirmed),
            AttEvent::LinkClosed => self.link_down(true),
        }
    }

    fn complete(&mut self, id: RequestId, operation: Operation, outcome: AttOutcome) {
        trace!("Request {} for {:?} finished: {:?}", id.0, operation, outcome);
        match operation {
            Operation::PrimaryServices => self.on_primary_services(id, outcome),
            Operation::PrimaryServicesByUuid(uuid) => {
                self.on_primary_services_by_uuid(id, uuid, outcome)
            }
            Operation::Characteristics { service } => self.on_characteristics(id, service, outcome),
            Operation::Descriptors { characteristic } => {
                self.on_descriptors(id, characteristic, outcome)
            }
            Operation::ReadCharacteristic(handle) => self.on_characteristic_read(handle, outcome),
            Operation::ReadDescriptor(handle) => self.on_descriptor_read(handle, outcome),
            Operation::WriteCharacteristic(handle) => self.on_write("characteristic", handle, outcome),
            Operation::WriteDescriptor(handle) => self.on_write("descriptor", handle, outcome),
        }
    }

    /// `Disconnected` is only reported for a link that reported `Connected`.
    fn link_down(&mut self, was_connected: bool) {
        self.cancel_discovery();
        self.clear_services();
        if was_connected {
            info!("Disconnected from {}", self.address);
            self.events.push_back(PeripheralEvent::Disconnected);
        } else {
            debug!("Connection attempt to {} abandoned", self.address);
        }
    }

    fn attribute_updated(&mut self, handle: u16, value: Vec<u8>, confirmed: bool) {
        let characteristic = self
            .value_to_characteristic
            .get(&handle)
            .and_then(|c| self.find_characteristic(*c))
            .cloned();

        match characteristic {
            Some(characteristic) => self.events.push_back(PeripheralEvent::ValueUpdated {
                characteristic,
                value,
                confirmed,
            }),
            None => debug!("Value update for unknown handle 0x{:04x}", handle),
        }
    }

    fn on_primary_services(&mut self, id: RequestId, outcome: AttOutcome) {
        let Some(mut session) = self.primary_session.filter(|s| s.request == id) else {
            debug!("Ignoring stale primary service response {}", id.0);
            return;
        };
        self.primary_session = None;

        let groups = match Page::from_outcome(outcome, "Primary service", |response| match response {
            AttResponse::GroupList(groups) => Some(groups),
            _ => None,
        }) {
            Page::Records(groups) => groups,
            Page::Done => return self.finish_services(),
            Page::Aborted => return,
        };

        for group in &groups {
            match Uuid::try_from_slice_le(&group.value) {
                Some(uuid) => self.add_service(Service::new(uuid, group.start, group.end)),
                None => warn!(
                    "Service at 0x{:04x} has a {}-byte UUID",
                    group.start,
                    group.value.len()
                ),
            }
        }

        let last = groups.last().map_or(session.end, |g| g.end);
        let Some(start) = session.next_start(last) else {
            return self.finish_services();
        };

        match self.att.read_by_group_type(
            start,
            session.end,
            Uuid::PRIMARY_SERVICE,
            Operation::PrimaryServices,
        ) {
            Ok(request) => {
                session.advance(request, start);
                self.primary_session = Some(session);
            }
            Err(e) => error!("Primary service discovery stopped: {}", e),
        }
    }

    fn on_primary_services_by_uuid(&mut self, id: RequestId, uuid: Uuid, outcome: AttOutcome) {
        let Some(mut session) = self.uuid_sessions.get(&uuid).copied().filter(|s| s.request == id)
        else {
            debug!("Ignoring stale response {} for service {}", id.0, uuid);
            return;
        };
        self.uuid_sessions.remove(&uuid);

        let found = match Page::from_outcome(outcome, "Primary service", |response| match response {
            AttResponse::HandleList(found) => Some(found),
            _ => None,
        }) {
            Page::Records(found) => found,
            Page::Done => return self.finish_services_by_uuid(),
            Page::Aborted => return,
        };

        for range in &found {
            self.add_service(Service::new(uuid, range.start, range.end));
        }

        let last = found.last().map_or(session.end, |r| r.end);
        let Some(start) = session.next_start(last) else {
            return self.finish_services_by_uuid();
        };

        match self.att.find_by_type_value(
            start,
            session.end,
            Uuid::PRIMARY_SERVICE,
            uuid.to_att_bytes(),
            Operation::PrimaryServicesByUuid(uuid),
        ) {
            Ok(request) => {
                session.advance(request, start);
                self.uuid_sessions.insert(uuid, session);
            }
            Err(e) => error!("Discovery of service {} stopped: {}", uuid, e),
        }
    }

    fn on_characteristics(&mut self, id: RequestId, service: u16, outcome: AttOutcome) {
        let Some(mut session) = self.characteristic_sessions.remove(&service) else {
            debug!("Ignoring characteristics for service 0x{:04x}", service);
            return;
        };
        if session.page.request != id {
            debug!("Ignoring stale characteristic response {}", id.0);
            self.characteristic_sessions.insert(service, session);
            return;
        }

        let records = match Page::from_outcome(outcome, "Characteristic", |response| match response {
            AttResponse::AttributeList(records) => Some(records),
            _ => None,
        }) {
            Page::Records(records) => records,
            Page::Done => return self.finish_characteristics(service, session),
            Page::Aborted => return,
        };

        for record in &records {
            if record.handle < session.page.start || record.handle > session.page.end {
                debug!("Declaration 0x{:04x} outside requested range", record.handle);
                continue;
            }
            if session
                .tail
                .as_ref()
                .is_some_and(|tail| record.handle <= tail.start_handle)
            {
                debug!("Declaration 0x{:04x} out of order", record.handle);
                continue;
            }
            if let Some(mut tail) = session.tail.take() {
                tail.end_handle = record.handle.saturating_sub(1);
                self.publish_characteristic(service, tail, session.filter.as_ref());
            }

            match CharacteristicDeclaration::parse(&record.value) {
                Some(declaration) => {
                    session.tail = Some(Characteristic {
                        uuid: declaration.uuid,
                        start_handle: record.handle,
                        value_handle: declaration.value_handle,
                        end_handle: session.page.end,
                        properties: declaration.properties,
                        descriptors: Vec::new(),
                    })
                }
                None => warn!("Malformed characteristic declaration at 0x{:04x}", record.handle),
            }
        }

        let last = records.last().map_or(session.page.end, |r| r.handle);
        let Some(start) = session.page.next_start(last) else {
            return self.finish_characteristics(service, session);
        };

        match self.att.read_by_type(
            start,
            session.page.end,
            Uuid::CHARACTERISTIC,
            Operation::Characteristics { service },
        ) {
            Ok(request) => {
                session.page.advance(request, start);
                self.characteristic_sessions.insert(service, session);
            }
            Err(e) => error!("Characteristic discovery for 0x{:04x} stopped: {}", service, e),
        }
    }

    fn on_descriptors(&mut self, id: RequestId, characteristic: u16, outcome: AttOutcome) {
        let Some(mut session) = self
            .descriptor_sessions
            .get(&characteristic)
            .copied()
            .filter(|s| s.request == id)
        else {
            debug!("Ignoring stale descriptor response {}", id.0);
            return;
        };
        self.descriptor_sessions.remove(&characteristic);

        let records = match Page::from_outcome(outcome, "Descriptor", |response| match response {
            AttResponse::InformationList(records) => Some(records),
            _ => None,
        }) {
            Page::Records(records) => records,
            Page::Done => return self.finish_descriptors(characteristic),
            Page::Aborted => return,
        };

        let Some(value_handle) = self.find_characteristic(characteristic).map(|c| c.value_handle)
        else {
            debug!("Characteristic 0x{:04x} gone during descriptor discovery", characteristic);
            return;
        };

        for info in &records {
            if info.handle == value_handle {
                continue;
            }
            if info.handle < session.start || info.handle > session.end {
                debug!("Descriptor 0x{:04x} outside requested range", info.handle);
                continue;
            }
            self.add_descriptor(
                characteristic,
                Descriptor {
                    handle: info.handle,
                    uuid: info.uuid,
                },
            );
        }

        let last = records.last().map_or(session.end, |r| r.handle);
        let Some(start) = session.next_start(last) else {
            return self.finish_descriptors(characteristic);
        };

        match self.att.find_information(
            start,
            session.end,
            Operation::Descriptors { characteristic },
        ) {
            Ok(request) => {
                session.advance(request, start);
                self.descriptor_sessions.insert(characteristic, session);
            }
            Err(e) => error!(
                "Descriptor discovery for 0x{:04x} stopped: {}",
                characteristic, e
            ),
        }
    }

    fn on_characteristic_read(&mut self, handle: u16, outcome: AttOutcome) {
        let Some(value) = read_value(outcome, "characteristic", handle) else {
            return;
        };
        match self.find_characteristic(handle).cloned() {
            Some(characteristic) => self.events.push_back(PeripheralEvent::ValueUpdated {
                characteristic,
                value,
                confirmed: false,
            }),
            None => debug!("Read result for unknown characteristic 0x{:04x}", handle),
        }
    }

    fn on_descriptor_read(&mut self, handle: u16, outcome: AttOutcome) {
        let Some(value) = read_value(outcome, "descriptor", handle) else {
            return;
        };
        match self.find_descriptor(handle).copied() {
            Some(descriptor) => self
                .events
                .push_back(PeripheralEvent::DescriptorValueUpdated { descriptor, value }),
            None => debug!("Read result for unknown descriptor 0x{:04x}", handle),
        }
    }

    fn on_write(&mut self, kind: &str, handle: u16, outcome: AttOutcome) {
        if !outcome.is_success() {
            warn!("Write to {} 0x{:04x} failed: {:?}", kind, handle, outcome);
        }
    }

    fn finish_services(&mut self) {
        debug!("Found {} services on {}", self.services.len(), self.address);
        self.events
            .push_back(PeripheralEvent::ServicesDiscovered(self.services()));
    }

    fn finish_services_by_uuid(&mut self) {
        if self.uuid_sessions.is_empty() {
            self.finish_services();
        }
    }

    fn finish_characteristics(&mut self, service: u16, session: CharacteristicSession) {
        if let Some(tail) = session.tail {
            self.publish_characteristic(service, tail, session.filter.as_ref());
        }
        match self.services.get(&service) {
            Some(found) => self
                .events
                .push_back(PeripheralEvent::CharacteristicsDiscovered(found.clone())),
            None => debug!("Service 0x{:04x} gone after characteristic discovery", service),
        }
    }

    fn finish_descriptors(&mut self, characteristic: u16) {
        let Some(found) = self.find_characteristic(characteristic).cloned() else {
            debug!("Characteristic 0x{:04x} gone after descriptor discovery", characteristic);
            return;
        };
        self.resolve_pending_notification(&found);
        self.events
            .push_back(PeripheralEvent::DescriptorsDiscovered(found));
    }

    fn add_service(&mut self, service: Service) {
        if service.start_handle == 0 || service.start_handle > service.end_handle {
            warn!(
                "Ignoring service {} with bad range 0x{:04x}-0x{:04x}",
                service.uuid, service.start_handle, service.end_handle
            );
            return;
        }

        let overlapping = self.services.values().find(|known| {
            known.start_handle <= service.end_handle && service.start_handle <= known.end_handle
        });
        if let Some(known) = overlapping {
            if known.start_handle != service.start_handle
                || known.end_handle != service.end_handle
                || known.uuid != service.uuid
            {
                warn!(
                    "Service {} at 0x{:04x}-0x{:04x} overlaps {} at 0x{:04x}-0x{:04x}",
                    service.uuid,
                    service.start_handle,
                    service.end_handle,
                    known.uuid,
                    known.start_handle,
                    known.end_handle
                );
            }
            return;
        }

        trace!(
            "Service {} at 0x{:04x}-0x{:04x}",
            service.uuid,
            service.start_handle,
            service.end_handle
        );
        self.advertising.service_uuids.insert(service.uuid);
        self.services.insert(service.start_handle, service);
    }

    fn publish_characteristic(
        &mut self,
        service: u16,
        characteristic: Characteristic,
        filter: Option<&HashSet<Uuid>>,
    ) {
        if filter.is_some_and(|uuids| !uuids.contains(&characteristic.uuid)) {
            trace!(
                "Skipping characteristic {} at 0x{:04x}",
                characteristic.uuid,
                characteristic.start_handle
            );
            return;
        }
        let Some(owner) = self.services.get_mut(&service) else {
            return;
        };

        self.characteristic_to_service
            .insert(characteristic.start_handle, service);
        self.value_to_characteristic
            .insert(characteristic.value_handle, characteristic.start_handle);
        owner.characteristics.push(characteristic);
    }

    fn add_descriptor(&mut self, characteristic: u16, descriptor: Descriptor) {
        let Some(owner) = self.find_characteristic_mut(characteristic) else {
            return;
        };
        owner.descriptors.push(descriptor);
        self.descriptor_to_characteristic
            .insert(descriptor.handle, characteristic);
    }

    fn clear_services(&mut self) {
        self.services.clear();
        self.characteristic_to_service.clear();
        self.value_to_characteristic.clear();
        self.descriptor_to_characteristic.clear();
        self.pending_notifications.clear();
    }

    fn clear_characteristics(&mut self, service: u16) {
        let Some(owner) = self.services.get_mut(&service) else {
            return;
        };
        for characteristic in owner.characteristics.drain(..) {
            self.characteristic_to_service
                .remove(&characteristic.start_handle);
            self.value_to_characteristic
                .remove(&characteristic.value_handle);
            for descriptor in &characteristic.descriptors {
                self.descriptor_to_characteristic.remove(&descriptor.handle);
            }
            if let Some(session) = self.descriptor_sessions.remove(&characteristic.start_handle) {
                self.att.cancel_request(session.request);
            }
            self.pending_notifications
                .remove(&characteristic.start_handle);
        }
    }

    fn clear_descriptors(&mut self, characteristic: u16) {
        let Some(owner) = self.find_characteristic_mut(characteristic) else {
            return;
        };
        let removed = std::mem::take(&mut owner.descriptors);
        for descriptor in removed {
            self.descriptor_to_characteristic.remove(&descriptor.handle);
        }
    }

    /// Drop every discovery phase in progress, cancelling its request.
    fn cancel_discovery(&mut self) {
        let mut requests: Vec<RequestId> = Vec::new();
        requests.extend(self.primary_session.take().map(|s| s.request));
        requests.extend(self.uuid_sessions.drain().map(|(_, s)| s.request));
        requests.extend(
            self.characteristic_sessions
                .drain()
                .map(|(_, s)| s.page.request),
        );
        requests.extend(self.descriptor_sessions.drain().map(|(_, s)| s.request));

        for request in requests {
            self.att.cancel_request(request);
        }
    }
}

/// Value carried by a read outcome; `None` if the read timed out.
fn read_value(outcome: AttOutcome, kind: &str, handle: u16) -> Option<Vec<u8>> {
    match outcome {
        AttOutcome::TimedOut => {
            warn!("Read of {} 0x{:04x} timed out", kind, handle);
            None
        }
        outcome => {
            if !outcome.is_success() {
                warn!("Read of {} 0x{:04x} failed: {:?}", kind, handle, outcome);
            }
            match outcome.into_response(ATT_READ_REQ) {
                AttResponse::ReadValue(value) => Some(value),
                _ => Some(Vec::new()),
            }
        }
    }
}
