//! Unit tests for GATT discovery and attribute access

use super::*;
use crate::att::codec;
use crate::att::mock::MockTransport;
use crate::att::*;
use crate::gap::BdAddr;
use crate::uuid::Uuid;
use std::time::{Duration, Instant};

const HEART_RATE: u16 = 0x180D;
const BATTERY: u16 = 0x180F;
const MEASUREMENT: u16 = 0x2A37;

type TestPeripheral = Peripheral<MockTransport>;

fn address() -> BdAddr {
    BdAddr::new([0x55, 0x44, 0x33, 0x22, 0x11, 0x00])
}

fn connected_peripheral_with(config: AttClientConfig) -> TestPeripheral {
    let _ = env_logger::try_init();
    let mut peripheral = Peripheral::with_config(address(), MockTransport::new(), config);
    peripheral.connect().unwrap();
    peripheral.handle_connected();
    peripheral.handle_pdu(&[ATT_EXCHANGE_MTU_RSP, 0x17, 0x00]);
    assert_eq!(peripheral.poll_event(), Some(PeripheralEvent::Connected));
    assert_eq!(peripheral.mtu(), ATT_DEFAULT_MTU);
    peripheral.transport_mut().take_sent();
    peripheral
}

fn connected_peripheral() -> TestPeripheral {
    connected_peripheral_with(AttClientConfig::default())
}

fn events(peripheral: &mut TestPeripheral) -> Vec<PeripheralEvent> {
    std::iter::from_fn(|| peripheral.poll_event()).collect()
}

fn last_sent(peripheral: &TestPeripheral) -> Vec<u8> {
    peripheral.transport().last_sent().unwrap_or_default().to_vec()
}

fn not_found(request_opcode: u8, handle: u16) -> Vec<u8> {
    let [lo, hi] = handle.to_le_bytes();
    vec![ATT_ERROR_RSP, request_opcode, lo, hi, ATT_ERROR_ATTRIBUTE_NOT_FOUND]
}

/// Read By Group Type Response for `(start, end, uuid16)` services
fn services_response(services: &[(u16, u16, u16)]) -> Vec<u8> {
    let records: Vec<_> = services
        .iter()
        .map(|&(start, end, uuid)| AttributeGroupData {
            start,
            end,
            value: uuid.to_le_bytes().to_vec(),
        })
        .collect();
    codec::encode(
        ATT_READ_BY_GROUP_TYPE_RSP,
        &codec::encode_attribute_group_list(&records).unwrap(),
    )
}

/// Read By Type Response for `(handle, properties, value handle, uuid16)` declarations
fn characteristics_response(declarations: &[(u16, u8, u16, u16)]) -> Vec<u8> {
    let records: Vec<_> = declarations
        .iter()
        .map(|&(handle, properties, value_handle, uuid)| {
            let mut value = vec![properties];
            value.extend_from_slice(&value_handle.to_le_bytes());
            value.extend_from_slice(&uuid.to_le_bytes());
            AttributeData { handle, value }
        })
        .collect();
    codec::encode(
        ATT_READ_BY_TYPE_RSP,
        &codec::encode_attribute_list(&records).unwrap(),
    )
}

/// Find Information Response for `(handle, uuid16)` records
fn information_response(records: &[(u16, u16)]) -> Vec<u8> {
    let records: Vec<_> = records
        .iter()
        .map(|&(handle, uuid)| InformationData {
            handle,
            uuid: Uuid::from_u16(uuid),
        })
        .collect();
    codec::encode(ATT_FIND_INFO_RSP, &codec::encode_information_list(&records))
}

fn read_by_group_type(start: u16) -> Vec<u8> {
    let [lo, hi] = start.to_le_bytes();
    vec![ATT_READ_BY_GROUP_TYPE_REQ, lo, hi, 0xFF, 0xFF, 0x00, 0x28]
}

fn read_by_type(start: u16, end: u16) -> Vec<u8> {
    let [s_lo, s_hi] = start.to_le_bytes();
    let [e_lo, e_hi] = end.to_le_bytes();
    vec![ATT_READ_BY_TYPE_REQ, s_lo, s_hi, e_lo, e_hi, 0x03, 0x28]
}

fn find_information(start: u16, end: u16) -> Vec<u8> {
    let [s_lo, s_hi] = start.to_le_bytes();
    let [e_lo, e_hi] = end.to_le_bytes();
    vec![ATT_FIND_INFO_REQ, s_lo, s_hi, e_lo, e_hi]
}

/// Two services, the first with one notifiable characteristic at 0x0002
fn discovered_peripheral() -> TestPeripheral {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0005, HEART_RATE), (0x0006, 0x000A, BATTERY)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x000B));

    peripheral.discover_characteristics(0x0001, &[]).unwrap();
    peripheral.handle_pdu(&characteristics_response(&[(0x0002, 0x10, 0x0003, MEASUREMENT)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_TYPE_REQ, 0x0003));

    events(&mut peripheral);
    peripheral.transport_mut().take_sent();
    peripheral
}

#[test]
fn test_discover_services() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    assert_eq!(peripheral.transport().sent, vec![read_by_group_type(0x0001)]);

    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0005, HEART_RATE), (0x0006, 0x000A, BATTERY)]));
    assert_eq!(last_sent(&peripheral), read_by_group_type(0x000B));
    assert!(events(&mut peripheral).is_empty());

    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x000B));
    let expected = vec![
        Service::new(Uuid::from_u16(HEART_RATE), 0x0001, 0x0005),
        Service::new(Uuid::from_u16(BATTERY), 0x0006, 0x000A),
    ];
    assert_eq!(
        events(&mut peripheral),
        vec![PeripheralEvent::ServicesDiscovered(expected.clone())]
    );
    assert_eq!(peripheral.services(), expected);
    assert!(peripheral.advertises_service(&Uuid::from_u16(BATTERY)));
    assert_eq!(peripheral.transport().sent.len(), 2);
}

#[test]
fn test_service_pagination_terminates() {
    const TOTAL: u16 = 7;
    const PER_PAGE: usize = 3;

    let all: Vec<(u16, u16, u16)> = (0..TOTAL)
        .map(|i| (i * 0x10 + 1, i * 0x10 + 0x10, 0x1800 + i))
        .collect();

    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();

    let mut requests = 0;
    while let Some(request) = peripheral.transport_mut().sent.pop() {
        requests += 1;
        assert_eq!(request[0], ATT_READ_BY_GROUP_TYPE_REQ);
        let start = u16::from_le_bytes([request[1], request[2]]);
        let page: Vec<_> = all
            .iter()
            .copied()
            .filter(|&(s, _, _)| s >= start)
            .take(PER_PAGE)
            .collect();
        if page.is_empty() {
            peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, start));
        } else {
            peripheral.handle_pdu(&services_response(&page));
        }
    }

    assert_eq!(requests, (TOTAL as usize).div_ceil(PER_PAGE) + 1);
    let services = peripheral.services();
    assert_eq!(services.len(), TOTAL as usize);
    assert!(services
        .windows(2)
        .all(|pair| pair[0].end_handle < pair[1].start_handle));
    assert!(matches!(
        events(&mut peripheral).as_slice(),
        [PeripheralEvent::ServicesDiscovered(s)] if s.len() == TOTAL as usize
    ));
}

#[test]
fn test_service_pagination_stops_without_progress() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0005, HEART_RATE)]));
    assert_eq!(last_sent(&peripheral), read_by_group_type(0x0006));

    // A server that keeps answering with the same range
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0005, HEART_RATE)]));
    assert_eq!(peripheral.transport().sent.len(), 2);
    assert!(matches!(
        events(&mut peripheral).as_slice(),
        [PeripheralEvent::ServicesDiscovered(s)] if s.len() == 1
    ));
}

#[test]
fn test_service_ending_at_last_handle_completes() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0xFFFF, HEART_RATE)]));

    assert_eq!(peripheral.transport().sent.len(), 1);
    assert_eq!(events(&mut peripheral).len(), 1);
}

#[test]
fn test_discover_services_by_uuid() {
    let mut peripheral = connected_peripheral();
    peripheral
        .discover_services_by_uuid(&[Uuid::from_u16(HEART_RATE), Uuid::from_u16(BATTERY)])
        .unwrap();
    assert_eq!(
        peripheral.transport().sent,
        vec![vec![ATT_FIND_BY_TYPE_VALUE_REQ, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28, 0x0D, 0x18]]
    );

    peripheral.handle_pdu(&[ATT_FIND_BY_TYPE_VALUE_RSP, 0x01, 0x00, 0x05, 0x00]);
    // The battery request was queued first
    assert_eq!(
        last_sent(&peripheral),
        vec![ATT_FIND_BY_TYPE_VALUE_REQ, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28, 0x0F, 0x18]
    );

    peripheral.handle_pdu(&[ATT_FIND_BY_TYPE_VALUE_RSP, 0x06, 0x00, 0x0A, 0x00]);
    assert_eq!(
        last_sent(&peripheral),
        vec![ATT_FIND_BY_TYPE_VALUE_REQ, 0x06, 0x00, 0xFF, 0xFF, 0x00, 0x28, 0x0D, 0x18]
    );

    peripheral.handle_pdu(&not_found(ATT_FIND_BY_TYPE_VALUE_REQ, 0x0006));
    assert!(events(&mut peripheral).is_empty());

    assert_eq!(
        last_sent(&peripheral),
        vec![ATT_FIND_BY_TYPE_VALUE_REQ, 0x0B, 0x00, 0xFF, 0xFF, 0x00, 0x28, 0x0F, 0x18]
    );
    peripheral.handle_pdu(&not_found(ATT_FIND_BY_TYPE_VALUE_REQ, 0x000B));

    assert!(matches!(
        events(&mut peripheral).as_slice(),
        [PeripheralEvent::ServicesDiscovered(s)] if s.len() == 2
    ));
    assert_eq!(
        peripheral.service(0x0006).map(|s| s.uuid),
        Some(Uuid::from_u16(BATTERY))
    );
}

#[test]
fn test_discover_services_by_empty_list_is_noop() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services_by_uuid(&[]).unwrap();

    assert!(peripheral.transport().sent.is_empty());
    assert!(events(&mut peripheral).is_empty());
}

#[test]
fn test_discover_characteristics() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0005, HEART_RATE), (0x0006, 0x000A, BATTERY)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x000B));
    events(&mut peripheral);
    peripheral.transport_mut().take_sent();

    peripheral.discover_characteristics(0x0001, &[]).unwrap();
    assert_eq!(peripheral.transport().sent, vec![read_by_type(0x0001, 0x0005)]);

    peripheral.handle_pdu(&characteristics_response(&[(0x0002, 0x10, 0x0003, MEASUREMENT)]));
    assert_eq!(last_sent(&peripheral), read_by_type(0x0003, 0x0005));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_TYPE_REQ, 0x0003));

    let expected = Characteristic {
        uuid: Uuid::from_u16(MEASUREMENT),
        start_handle: 0x0002,
        value_handle: 0x0003,
        end_handle: 0x0005,
        properties: CharacteristicProperties::NOTIFY,
        descriptors: Vec::new(),
    };
    match events(&mut peripheral).as_slice() {
        [PeripheralEvent::CharacteristicsDiscovered(service)] => {
            assert_eq!(service.start_handle, 0x0001);
            assert_eq!(service.characteristics, vec![expected.clone()]);
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert_eq!(peripheral.characteristic(0x0002), Some(expected));
}

#[test]
fn test_characteristic_boundary_across_pages() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0020, HEART_RATE)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x0021));
    events(&mut peripheral);

    peripheral.discover_characteristics(0x0001, &[]).unwrap();
    peripheral.handle_pdu(&characteristics_response(&[(0x0002, 0x02, 0x0003, 0x2A00)]));

    // Still provisional: its end depends on the next page
    assert_eq!(peripheral.characteristic(0x0002), None);
    assert_eq!(last_sent(&peripheral), read_by_type(0x0003, 0x0020));

    peripheral.handle_pdu(&characteristics_response(&[(0x000A, 0x02, 0x000B, 0x2A01)]));
    assert_eq!(peripheral.characteristic(0x0002).map(|c| c.end_handle), Some(0x0009));
    assert_eq!(last_sent(&peripheral), read_by_type(0x000B, 0x0020));

    peripheral.handle_pdu(&not_found(ATT_READ_BY_TYPE_REQ, 0x000B));
    assert_eq!(peripheral.characteristic(0x000A).map(|c| c.end_handle), Some(0x0020));
    assert_eq!(events(&mut peripheral).len(), 1);
}

#[test]
fn test_characteristic_filter() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0010, HEART_RATE)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x0011));
    events(&mut peripheral);

    peripheral
        .discover_characteristics(0x0001, &[Uuid::from_u16(0x2A01)])
        .unwrap();
    peripheral.handle_pdu(&characteristics_response(&[
        (0x0002, 0x02, 0x0003, 0x2A00),
        (0x0004, 0x02, 0x0005, 0x2A01),
        (0x0006, 0x02, 0x0007, 0x2A02),
    ]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_TYPE_REQ, 0x0007));

    let service = peripheral.service(0x0001).unwrap();
    assert_eq!(service.characteristics.len(), 1);
    assert_eq!(service.characteristics[0].start_handle, 0x0004);
    assert_eq!(service.characteristics[0].end_handle, 0x0005);
    assert_eq!(peripheral.characteristic(0x0002), None);
    assert_eq!(peripheral.characteristic(0x0006), None);
    assert_eq!(
        service
            .characteristic_by_uuid(&Uuid::from_u16(0x2A01))
            .map(|c| c.value_handle),
        Some(0x0005)
    );
    assert_eq!(service.characteristic_by_uuid(&Uuid::from_u16(0x2A00)), None);
}

#[test]
fn test_characteristics_stay_inside_service() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0005, HEART_RATE), (0x0006, 0x000A, BATTERY)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x000B));
    events(&mut peripheral);
    peripheral.transport_mut().take_sent();

    peripheral.discover_characteristics(0x0001, &[]).unwrap();
    // Out of order, then past the end of the service
    peripheral.handle_pdu(&characteristics_response(&[
        (0x0004, 0x02, 0x0005, 0x2A00),
        (0x0002, 0x02, 0x0003, 0x2A01),
        (0x0007, 0x02, 0x0008, 0x2A02),
    ]));

    // Nothing left to ask for inside 0x0001..=0x0005
    assert_eq!(peripheral.transport().sent, vec![read_by_type(0x0001, 0x0005)]);
    assert_eq!(events(&mut peripheral).len(), 1);

    let service = peripheral.service(0x0001).unwrap();
    assert_eq!(service.characteristics.len(), 1);
    assert_eq!(service.characteristics[0].start_handle, 0x0004);
    assert_eq!(service.characteristics[0].end_handle, 0x0005);
    assert_eq!(peripheral.characteristic(0x0002), None);
    assert_eq!(peripheral.characteristic(0x0007), None);

    for service in peripheral.services() {
        for characteristic in &service.characteristics {
            assert!(
                service.start_handle <= characteristic.start_handle
                    && characteristic.start_handle <= characteristic.end_handle
                    && characteristic.end_handle <= service.end_handle,
                "{:?} escapes service 0x{:04x}..0x{:04x}",
                characteristic,
                service.start_handle,
                service.end_handle
            );
        }
    }
}

#[test]
fn test_rediscovering_characteristics_clears_service() {
    let mut peripheral = discovered_peripheral();
    assert!(peripheral.characteristic(0x0002).is_some());

    peripheral.discover_characteristics(0x0001, &[]).unwrap();
    assert!(peripheral.service(0x0001).unwrap().characteristics.is_empty());
    assert_eq!(peripheral.characteristic(0x0002), None);

    // Notifications for the dropped value handle are no longer resolved
    peripheral.handle_pdu(&[ATT_HANDLE_VALUE_NTF, 0x03, 0x00, 0x01]);
    assert!(events(&mut peripheral).is_empty());
}

#[test]
fn test_descriptor_discovery_skips_value_handle() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0006, HEART_RATE)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x0007));
    peripheral.discover_characteristics(0x0001, &[]).unwrap();
    peripheral.handle_pdu(&characteristics_response(&[(0x0002, 0x12, 0x0003, MEASUREMENT)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_TYPE_REQ, 0x0003));
    events(&mut peripheral);
    peripheral.transport_mut().take_sent();

    peripheral.discover_descriptors(0x0002).unwrap();
    assert_eq!(peripheral.transport().sent, vec![find_information(0x0003, 0x0006)]);

    peripheral.handle_pdu(&information_response(&[(0x0003, MEASUREMENT), (0x0004, 0x2902), (0x0005, 0x2901)]));
    assert_eq!(last_sent(&peripheral), find_information(0x0006, 0x0006));

    // The last handle of the range ends the phase without another request
    peripheral.handle_pdu(&information_response(&[(0x0006, 0x2904)]));
    assert_eq!(peripheral.transport().sent.len(), 2);

    let handles: Vec<u16> = peripheral
        .characteristic(0x0002)
        .unwrap()
        .descriptors
        .iter()
        .map(|d| d.handle)
        .collect();
    assert_eq!(handles, vec![0x0004, 0x0005, 0x0006]);
    assert_eq!(
        peripheral.descriptor(0x0005).map(|d| d.uuid),
        Some(Uuid::from_u16(0x2901))
    );
    assert!(matches!(
        events(&mut peripheral).as_slice(),
        [PeripheralEvent::DescriptorsDiscovered(c)] if c.descriptors.len() == 3
    ));
}

#[test]
fn test_descriptor_discovery_with_empty_range() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0003, HEART_RATE)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x0004));
    peripheral.discover_characteristics(0x0001, &[]).unwrap();
    peripheral.handle_pdu(&characteristics_response(&[(0x0002, 0x02, 0x0003, 0x2A00)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_TYPE_REQ, 0x0003));
    events(&mut peripheral);
    peripheral.transport_mut().take_sent();

    // Only the value attribute follows the declaration
    peripheral.discover_descriptors(0x0002).unwrap();
    assert_eq!(peripheral.transport().sent, vec![find_information(0x0003, 0x0003)]);
    peripheral.handle_pdu(&information_response(&[(0x0003, 0x2A00)]));

    assert_eq!(peripheral.transport().sent.len(), 1);
    assert!(matches!(
        events(&mut peripheral).as_slice(),
        [PeripheralEvent::DescriptorsDiscovered(c)] if c.descriptors.is_empty()
    ));
}

#[test]
fn test_set_notification_discovers_cccd() {
    let mut peripheral = discovered_peripheral();

    peripheral.set_notification(0x0002, true).unwrap();
    assert_eq!(peripheral.transport().sent, vec![find_information(0x0003, 0x0005)]);

    peripheral.handle_pdu(&information_response(&[(0x0003, MEASUREMENT), (0x0004, 0x2902)]));
    assert_eq!(last_sent(&peripheral), find_information(0x0005, 0x0005));
    peripheral.handle_pdu(&not_found(ATT_FIND_INFO_REQ, 0x0005));

    assert_eq!(last_sent(&peripheral), vec![ATT_WRITE_REQ, 0x04, 0x00, 0x01, 0x00]);
    assert!(matches!(
        events(&mut peripheral).as_slice(),
        [PeripheralEvent::DescriptorsDiscovered(c)] if c.client_configuration().is_some()
    ));

    peripheral.handle_pdu(&[ATT_WRITE_RSP]);
    peripheral.handle_pdu(&[ATT_HANDLE_VALUE_NTF, 0x03, 0x00, 0x48]);
    match events(&mut peripheral).as_slice() {
        [PeripheralEvent::ValueUpdated {
            characteristic,
            value,
            confirmed: false,
        }] => {
            assert_eq!(characteristic.start_handle, 0x0002);
            assert_eq!(value, &vec![0x48]);
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn test_set_notification_with_known_cccd() {
    let mut peripheral = discovered_peripheral();
    peripheral.discover_descriptors(0x0002).unwrap();
    peripheral.handle_pdu(&information_response(&[(0x0003, MEASUREMENT), (0x0004, 0x2902), (0x0005, 0x2901)]));
    events(&mut peripheral);
    peripheral.transport_mut().take_sent();

    peripheral.set_notification(0x0002, false).unwrap();
    assert_eq!(
        peripheral.transport().sent,
        vec![vec![ATT_WRITE_REQ, 0x04, 0x00, 0x00, 0x00]]
    );
}

#[test]
fn test_set_notification_without_cccd() {
    let mut peripheral = discovered_peripheral();
    peripheral.set_notification(0x0002, true).unwrap();
    peripheral.handle_pdu(&information_response(&[(0x0003, MEASUREMENT), (0x0005, 0x2901)]));

    // Discovery finished without a configuration descriptor: nothing is written
    assert_eq!(peripheral.transport().sent.len(), 1);
    assert_eq!(events(&mut peripheral).len(), 1);
}

#[test]
fn test_set_notification_requires_connection() {
    let mut peripheral = discovered_peripheral();
    peripheral.disconnect();
    events(&mut peripheral);
    peripheral.transport_mut().take_sent();

    assert!(matches!(
        peripheral.set_notification(0x0002, true),
        Err(GattError::NotConnected)
    ));
    assert!(peripheral.transport().sent.is_empty());
    assert!(events(&mut peripheral).is_empty());
}

#[test]
fn test_set_notification_requires_notify_property() {
    let mut peripheral = connected_peripheral();
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0005, HEART_RATE)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_GROUP_TYPE_REQ, 0x0006));
    peripheral.discover_characteristics(0x0001, &[]).unwrap();
    peripheral.handle_pdu(&characteristics_response(&[(0x0002, 0x02, 0x0003, 0x2A00)]));
    peripheral.handle_pdu(&not_found(ATT_READ_BY_TYPE_REQ, 0x0003));
    peripheral.transport_mut().take_sent();

    assert!(matches!(
        peripheral.set_notification(0x0002, true),
        Err(GattError::NotSupported(_))
    ));
    assert!(peripheral.transport().sent.is_empty());
}

#[test]
fn test_indication_resolves_characteristic() {
    let mut peripheral = discovered_peripheral();
    peripheral.handle_pdu(&[ATT_HANDLE_VALUE_IND, 0x03, 0x00, 0x07]);

    assert_eq!(peripheral.transport().sent, vec![vec![ATT_HANDLE_VALUE_CONF]]);
    assert!(matches!(
        events(&mut peripheral).as_slice(),
        [PeripheralEvent::ValueUpdated { confirmed: true, .. }]
    ));
}

#[test]
fn test_read_characteristic() {
    let mut peripheral = discovered_peripheral();

    peripheral.read_characteristic(0x0002).unwrap();
    assert_eq!(peripheral.transport().sent, vec![vec![ATT_READ_REQ, 0x03, 0x00]]);
    peripheral.handle_pdu(&[ATT_READ_RSP, 0x01, 0x02]);

    peripheral.read_characteristic(0x0002).unwrap();
    peripheral.handle_pdu(&[ATT_ERROR_RSP, ATT_READ_REQ, 0x03, 0x00, ATT_ERROR_READ_NOT_PERMITTED]);

    let values: Vec<Vec<u8>> = events(&mut peripheral)
        .into_iter()
        .map(|event| match event {
            PeripheralEvent::ValueUpdated { value, .. } => value,
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(values, vec![vec![0x01, 0x02], Vec::new()]);
}

#[test]
fn test_read_descriptor() {
    let mut peripheral = discovered_peripheral();
    peripheral.discover_descriptors(0x0002).unwrap();
    peripheral.handle_pdu(&information_response(&[(0x0003, MEASUREMENT), (0x0004, 0x2902), (0x0005, 0x2901)]));
    events(&mut peripheral);
    peripheral.transport_mut().take_sent();

    peripheral.read_descriptor(0x0005).unwrap();
    assert_eq!(peripheral.transport().sent, vec![vec![ATT_READ_REQ, 0x05, 0x00]]);
    peripheral.handle_pdu(&[ATT_READ_RSP, b'b', b'p', b'm']);

    assert_eq!(
        events(&mut peripheral),
        vec![PeripheralEvent::DescriptorValueUpdated {
            descriptor: Descriptor {
                handle: 0x0005,
                uuid: Uuid::from_u16(0x2901)
            },
            value: b"bpm".to_vec()
        }]
    );
}

#[test]
fn test_writes() {
    let mut peripheral = discovered_peripheral();

    peripheral
        .write_characteristic(0x0002, &[0x01], WriteType::WithResponse)
        .unwrap();
    peripheral
        .write_characteristic(0x0002, &[0x02], WriteType::WithoutResponse)
        .unwrap();
    assert_eq!(
        peripheral.transport().sent,
        vec![
            vec![ATT_WRITE_REQ, 0x03, 0x00, 0x01],
            vec![ATT_WRITE_CMD, 0x03, 0x00, 0x02]
        ]
    );

    peripheral.handle_pdu(&[ATT_ERROR_RSP, ATT_WRITE_REQ, 0x03, 0x00, ATT_ERROR_WRITE_NOT_PERMITTED]);
    assert!(events(&mut peripheral).is_empty());
}

#[test]
fn test_write_longer_than_mtu_is_rejected() {
    let mut peripheral = discovered_peripheral();
    let value = [0u8; 21];

    assert!(matches!(
        peripheral.write_characteristic(0x0002, &value, WriteType::WithResponse),
        Err(GattError::ValueTooLong { len: 21, max: 20 })
    ));
    assert!(peripheral
        .write_characteristic(0x0002, &value[..20], WriteType::WithResponse)
        .is_ok());
}

#[test]
fn test_usage_errors() {
    let _ = env_logger::try_init();
    let mut peripheral: TestPeripheral = Peripheral::new(address(), MockTransport::new());
    assert!(matches!(peripheral.discover_services(), Err(GattError::NotConnected)));
    assert!(matches!(
        peripheral.discover_characteristics(0x0001, &[]),
        Err(GattError::UnknownService(0x0001))
    ));

    let mut peripheral = discovered_peripheral();
    assert!(matches!(
        peripheral.read_characteristic(0x0099),
        Err(GattError::UnknownCharacteristic(0x0099))
    ));
    assert!(matches!(
        peripheral.read_descriptor(0x0004),
        Err(GattError::UnknownDescriptor(0x0004))
    ));
    assert!(peripheral.transport().sent.is_empty());
    assert!(events(&mut peripheral).is_empty());
}

#[test]
fn test_disconnect_clears_model() {
    let mut peripheral = discovered_peripheral();
    peripheral.read_characteristic(0x0002).unwrap();

    peripheral.handle_disconnected();
    assert_eq!(events(&mut peripheral), vec![PeripheralEvent::Disconnected]);
    assert!(peripheral.services().is_empty());
    assert_eq!(peripheral.characteristic(0x0002), None);
    assert_eq!(peripheral.state(), LinkState::Disconnected);

    // Late traffic from the old link is ignored
    peripheral.handle_pdu(&[ATT_READ_RSP, 0x01]);
    peripheral.handle_disconnected();
    assert!(events(&mut peripheral).is_empty());
}

#[test]
fn test_local_disconnect() {
    let mut peripheral = discovered_peripheral();
    peripheral.disconnect();

    assert!(peripheral.transport().closed);
    assert_eq!(events(&mut peripheral), vec![PeripheralEvent::Disconnected]);
    assert!(peripheral.services().is_empty());

    peripheral.disconnect();
    assert!(events(&mut peripheral).is_empty());
}

#[test]
fn test_abandoned_connection_is_not_reported() {
    let _ = env_logger::try_init();
    let mut peripheral: TestPeripheral = Peripheral::new(address(), MockTransport::new());
    peripheral.connect().unwrap();
    assert_eq!(peripheral.state(), LinkState::Connecting);
    peripheral.disconnect();
    assert_eq!(peripheral.state(), LinkState::Disconnected);
    assert!(events(&mut peripheral).is_empty());

    peripheral.connect().unwrap();
    peripheral.handle_disconnected();
    assert_eq!(peripheral.state(), LinkState::Disconnected);
    assert!(events(&mut peripheral).is_empty());
}

#[test]
fn test_timeout_aborts_discovery() {
    let config = AttClientConfig {
        request_timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let mut peripheral = connected_peripheral_with(config);
    peripheral.discover_services().unwrap();
    peripheral.handle_pdu(&services_response(&[(0x0001, 0x0005, HEART_RATE)]));

    peripheral.check_timeouts(Instant::now() + Duration::from_secs(10));
    assert_eq!(events(&mut peripheral), vec![PeripheralEvent::Disconnected]);
    assert!(peripheral.transport().closed);
    assert!(peripheral.services().is_empty());
}

#[test]
fn test_advertising_data() {
    let _ = env_logger::try_init();
    let mut peripheral: TestPeripheral = Peripheral::new(address(), MockTransport::new());
    peripheral.parse_eir(&[0x03, 0x03, 0x0D, 0x18, 0x04, 0x08, b'h', b'r', b'm']);
    peripheral.parse_eir(&[0x07, 0x09, b'h', b'r', b'm', b'-', b'0', b'1']);

    assert_eq!(
        events(&mut peripheral),
        vec![
            PeripheralEvent::NameChanged("hrm".to_string()),
            PeripheralEvent::NameChanged("hrm-01".to_string())
        ]
    );
    assert_eq!(peripheral.name(), Some("hrm-01"));
    assert!(peripheral.advertises_service(&Uuid::from_u16(HEART_RATE)));
    assert!(!peripheral.advertises_service(&Uuid::from_u16(BATTERY)));
}
