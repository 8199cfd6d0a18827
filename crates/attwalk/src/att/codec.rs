//! ATT wire codec
//!
//! Every PDU is `[opcode][body]` with little-endian integers. The list
//! decoders take a response body with the opcode already stripped and never
//! fail: malformed input yields an empty list and a trailing partial item is
//! dropped.

use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use super::types::*;
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use log::warn;
use std::io::Cursor;

/// Prepends `opcode` to `payload`.
pub fn encode(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(1 + payload.len());
    pdu.push(opcode);
    pdu.extend_from_slice(payload);
    pdu
}

/// Splits a PDU into its opcode and body. `None` for an empty buffer.
pub fn decode(pdu: &[u8]) -> Option<(u8, &[u8])> {
    pdu.split_first().map(|(opcode, body)| (*opcode, body))
}

fn read_handle(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Decodes a Find Information Response body into `(handle, uuid)` records.
pub fn parse_information_list(body: &[u8]) -> Vec<InformationData> {
    let Some((&format, data)) = body.split_first() else {
        return Vec::new();
    };

    let uuid_len = match format {
        ATT_FIND_INFO_RSP_FORMAT_16BIT => 2,
        ATT_FIND_INFO_RSP_FORMAT_128BIT => 16,
        _ => {
            warn!("Unknown information data format 0x{:02x}", format);
            return Vec::new();
        }
    };

    data.chunks_exact(2 + uuid_len)
        .filter_map(|item| {
            Uuid::try_from_slice_le(&item[2..]).map(|uuid| InformationData {
                handle: read_handle(item),
                uuid,
            })
        })
        .collect()
}

/// Decodes a Find By Type Value Response body into handle ranges.
pub fn parse_handle_information_list(body: &[u8]) -> Vec<HandleInformation> {
    body.chunks_exact(4)
        .map(|item| HandleInformation {
            start: read_handle(item),
            end: read_handle(&item[2..]),
        })
        .collect()
}

/// Decodes a Read By Type Response body into `(handle, value)` records.
pub fn parse_attribute_list(body: &[u8]) -> Vec<AttributeData> {
    let Some((&item_len, data)) = body.split_first() else {
        return Vec::new();
    };
    if item_len < 2 {
        return Vec::new();
    }

    data.chunks_exact(item_len as usize)
        .map(|item| AttributeData {
            handle: read_handle(item),
            value: item[2..].to_vec(),
        })
        .collect()
}

/// Decodes a Read By Group Type Response body into `(start, end, value)` records.
pub fn parse_attribute_group_list(body: &[u8]) -> Vec<AttributeGroupData> {
    let Some((&item_len, data)) = body.split_first() else {
        return Vec::new();
    };
    if item_len < 4 {
        return Vec::new();
    }

    data.chunks_exact(item_len as usize)
        .map(|item| AttributeGroupData {
            start: read_handle(item),
            end: read_handle(&item[2..]),
            value: item[4..].to_vec(),
        })
        .collect()
}

/// Decodes an Error Response body.
///
/// Only the request opcode is mandatory; a truncated body reports handle 0
/// and an unknown error code.
pub fn parse_error_response(body: &[u8]) -> Option<ErrorResponse> {
    let mut cursor = Cursor::new(body);
    let request_opcode = cursor.read_u8().ok()?;
    let handle = cursor.read_u16::<LittleEndian>().unwrap_or(0);
    let error_code = cursor
        .read_u8()
        .map(AttErrorCode::from)
        .unwrap_or(AttErrorCode::Unknown(0));

    Some(ErrorResponse {
        request_opcode,
        handle,
        error_code,
    })
}

/// Decodes a notification or indication body into `(handle, value)`.
pub fn parse_handle_value(body: &[u8]) -> Option<(u16, &[u8])> {
    if body.len() < 2 {
        return None;
    }
    Some((read_handle(body), &body[2..]))
}

/// Decodes `pdu` as the answer to a request with `request_opcode`.
///
/// Returns `None` when the PDU is neither the expected response nor an Error
/// Response naming `request_opcode`.
pub fn decode_response(request_opcode: u8, pdu: &[u8]) -> Option<AttOutcome> {
    let (opcode, body) = decode(pdu)?;

    if opcode == ATT_ERROR_RSP {
        let error = parse_error_response(body)?;
        if error.request_opcode != request_opcode {
            return None;
        }
        return Some(match error.error_code {
            AttErrorCode::AttributeNotFound => AttOutcome::EndOfRange,
            error_code => AttOutcome::Rejected {
                handle: error.handle,
                error_code,
            },
        });
    }

    if response_opcode_for(request_opcode) != Some(opcode) {
        return None;
    }

    let response = match request_opcode {
        ATT_EXCHANGE_MTU_REQ => {
            AttResponse::Mtu(Cursor::new(body).read_u16::<LittleEndian>().unwrap_or(0))
        }
        ATT_FIND_INFO_REQ => AttResponse::InformationList(parse_information_list(body)),
        ATT_FIND_BY_TYPE_VALUE_REQ => {
            AttResponse::HandleList(parse_handle_information_list(body))
        }
        ATT_READ_BY_TYPE_REQ => AttResponse::AttributeList(parse_attribute_list(body)),
        ATT_READ_REQ => AttResponse::ReadValue(body.to_vec()),
        ATT_READ_BY_GROUP_TYPE_REQ => {
            AttResponse::GroupList(parse_attribute_group_list(body))
        }
        ATT_WRITE_REQ => AttResponse::WriteAck(true),
        _ => AttResponse::Raw(pdu.to_vec()),
    };

    Some(AttOutcome::Response(response))
}

/// Encodes a Find Information Response body.
///
/// Falls back to the 128-bit format for every record as soon as one UUID has
/// no 16-bit form.
pub fn encode_information_list(records: &[InformationData]) -> Vec<u8> {
    let wide = records.iter().any(|r| r.uuid.as_u16().is_none());
    let mut body = vec![if wide {
        ATT_FIND_INFO_RSP_FORMAT_128BIT
    } else {
        ATT_FIND_INFO_RSP_FORMAT_16BIT
    }];

    for record in records {
        body.extend_from_slice(&record.handle.to_le_bytes());
        if wide {
            body.extend_from_slice(record.uuid.as_bytes_le());
        } else {
            body.extend_from_slice(&record.uuid.to_att_bytes());
        }
    }
    body
}

/// Encodes a Find By Type Value Response body.
pub fn encode_handle_information_list(records: &[HandleInformation]) -> Vec<u8> {
    let mut body = Vec::with_capacity(records.len() * 4);
    for record in records {
        body.extend_from_slice(&record.start.to_le_bytes());
        body.extend_from_slice(&record.end.to_le_bytes());
    }
    body
}

fn common_item_len<'a>(
    values: impl Iterator<Item = &'a Vec<u8>>,
    header: usize,
) -> AttResult<u8> {
    let mut item_len = None;
    for value in values {
        let len = header + value.len();
        match item_len {
            None => item_len = Some(len),
            Some(expected) if expected != len => return Err(AttError::InvalidPdu),
            Some(_) => {}
        }
    }
    let len = item_len.unwrap_or(header);
    u8::try_from(len).map_err(|_| AttError::InvalidPdu)
}

/// Encodes a Read By Type Response body. Every value must have the same length.
pub fn encode_attribute_list(records: &[AttributeData]) -> AttResult<Vec<u8>> {
    let item_len = common_item_len(records.iter().map(|r| &r.value), 2)?;
    let mut body = vec![item_len];
    for record in records {
        body.extend_from_slice(&record.handle.to_le_bytes());
        body.extend_from_slice(&record.value);
    }
    Ok(body)
}

/// Encodes a Read By Group Type Response body. Every value must have the same length.
pub fn encode_attribute_group_list(records: &[AttributeGroupData]) -> AttResult<Vec<u8>> {
    let item_len = common_item_len(records.iter().map(|r| &r.value), 4)?;
    let mut body = vec![item_len];
    for record in records {
        body.extend_from_slice(&record.start.to_le_bytes());
        body.extend_from_slice(&record.end.to_le_bytes());
        body.extend_from_slice(&record.value);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_uuid(seed: u8) -> Uuid {
        let mut bytes = [0u8; 16];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8).wrapping_mul(7) | 0x01;
        }
        Uuid::from_bytes_le(bytes)
    }

    #[test]
    fn test_encode_decode_pdu() {
        let pdu = encode(ATT_READ_REQ, &[0x03, 0x00]);
        assert_eq!(pdu, vec![0x0A, 0x03, 0x00]);
        assert_eq!(decode(&pdu), Some((ATT_READ_REQ, &[0x03u8, 0x00][..])));
        assert_eq!(decode(&[]), None);
    }

    #[test]
    fn test_information_list_round_trip() {
        for n in [0usize, 1, 17] {
            let narrow: Vec<_> = (0..n)
                .map(|i| InformationData {
                    handle: 0x0010 + i as u16,
                    uuid: Uuid::from_u16(0x2900 + i as u16),
                })
                .collect();
            let body = encode_information_list(&narrow);
            assert_eq!(parse_information_list(&body), narrow);

            let wide: Vec<_> = (0..n)
                .map(|i| InformationData {
                    handle: 0x0100 + i as u16,
                    uuid: custom_uuid(i as u8),
                })
                .collect();
            let body = encode_information_list(&wide);
            assert_eq!(parse_information_list(&body), wide);
        }
    }

    #[test]
    fn test_handle_information_list_round_trip() {
        for n in [0usize, 1, 17] {
            let records: Vec<_> = (0..n)
                .map(|i| HandleInformation {
                    start: 1 + 10 * i as u16,
                    end: 9 + 10 * i as u16,
                })
                .collect();
            let body = encode_handle_information_list(&records);
            assert_eq!(parse_handle_information_list(&body), records);
        }
    }

    #[test]
    fn test_attribute_lists_round_trip() {
        for n in [0usize, 1, 17] {
            for value_len in [2usize, 16] {
                let records: Vec<_> = (0..n)
                    .map(|i| AttributeData {
                        handle: 0x0002 + 3 * i as u16,
                        value: vec![i as u8; value_len],
                    })
                    .collect();
                let body = encode_attribute_list(&records).unwrap();
                assert_eq!(parse_attribute_list(&body), records);

                let groups: Vec<_> = (0..n)
                    .map(|i| AttributeGroupData {
                        start: 1 + 8 * i as u16,
                        end: 8 + 8 * i as u16,
                        value: vec![0xA0 | i as u8; value_len],
                    })
                    .collect();
                let body = encode_attribute_group_list(&groups).unwrap();
                assert_eq!(parse_attribute_group_list(&body), groups);
            }
        }
    }

    #[test]
    fn test_malformed_lists_are_empty() {
        assert!(parse_information_list(&[]).is_empty());
        assert!(parse_information_list(&[0x07, 0x01, 0x00, 0x02, 0x29]).is_empty());
        assert!(parse_attribute_list(&[0x00, 0x01, 0x02, 0x03]).is_empty());
        assert!(parse_attribute_list(&[0x01, 0x01, 0x02, 0x03]).is_empty());
        assert!(parse_attribute_group_list(&[0x03, 0x01, 0x00, 0x05]).is_empty());
        assert!(parse_attribute_group_list(&[]).is_empty());
    }

    #[test]
    fn test_trailing_partial_item_is_dropped() {
        // Two full 4-byte items followed by 3 stray bytes
        let body = [0x04, 0x01, 0x00, 0xAA, 0xBB, 0x05, 0x00, 0xCC, 0xDD, 0x09, 0x00, 0xEE];
        let records = parse_attribute_list(&body);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].handle, 0x0005);
        assert_eq!(records[1].value, vec![0xCC, 0xDD]);

        assert_eq!(parse_handle_information_list(&[0x01, 0x00, 0x05, 0x00, 0x06]).len(), 1);
    }

    #[test]
    fn test_mixed_value_lengths_cannot_be_encoded() {
        let records = vec![
            AttributeData { handle: 1, value: vec![1] },
            AttributeData { handle: 2, value: vec![1, 2] },
        ];
        assert!(matches!(encode_attribute_list(&records), Err(AttError::InvalidPdu)));
    }

    #[test]
    fn test_decode_response_matches_by_opcode() {
        let rsp = encode(ATT_READ_RSP, &[0x01, 0x02]);
        assert_eq!(
            decode_response(ATT_READ_REQ, &rsp),
            Some(AttOutcome::Response(AttResponse::ReadValue(vec![0x01, 0x02])))
        );
        assert_eq!(decode_response(ATT_WRITE_REQ, &rsp), None);

        let err = encode(ATT_ERROR_RSP, &[ATT_READ_BY_TYPE_REQ, 0x05, 0x00, ATT_ERROR_ATTRIBUTE_NOT_FOUND]);
        assert_eq!(decode_response(ATT_READ_BY_TYPE_REQ, &err), Some(AttOutcome::EndOfRange));
        assert_eq!(decode_response(ATT_READ_REQ, &err), None);

        let err = encode(ATT_ERROR_RSP, &[ATT_WRITE_REQ, 0x07, 0x00, ATT_ERROR_WRITE_NOT_PERMITTED]);
        let outcome = decode_response(ATT_WRITE_REQ, &err).unwrap();
        assert_eq!(
            outcome,
            AttOutcome::Rejected { handle: 7, error_code: AttErrorCode::WriteNotPermitted }
        );
        assert_eq!(outcome.into_response(ATT_WRITE_REQ), AttResponse::WriteAck(false));
    }

    #[test]
    fn test_decode_mtu_response() {
        let rsp = encode(ATT_EXCHANGE_MTU_RSP, &247u16.to_le_bytes());
        assert_eq!(
            decode_response(ATT_EXCHANGE_MTU_REQ, &rsp),
            Some(AttOutcome::Response(AttResponse::Mtu(247)))
        );
    }
}
