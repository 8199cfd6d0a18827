//! Type definitions for the ATT client
use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use crate::uuid::Uuid;

/// Identifier handed out for every queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

/// An ATT request whose body can be serialized.
///
/// The body never includes the opcode; the transaction manager prepends it.
pub trait AttRequest {
    /// Opcode for this request
    fn opcode() -> u8;

    /// Serialize the request body
    fn payload(&self) -> AttResult<Vec<u8>>;
}

/// Exchange MTU Request
#[derive(Debug, Clone)]
pub struct ExchangeMtuRequest {
    /// Client Rx MTU size
    pub client_mtu: u16,
}

impl AttRequest for ExchangeMtuRequest {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_REQ
    }

    fn payload(&self) -> AttResult<Vec<u8>> {
        Ok(self.client_mtu.to_le_bytes().to_vec())
    }
}

/// Find Information Request
#[derive(Debug, Clone)]
pub struct FindInformationRequest {
    pub start_handle: u16,
    pub end_handle: u16,
}

impl AttRequest for FindInformationRequest {
    fn opcode() -> u8 {
        ATT_FIND_INFO_REQ
    }

    fn payload(&self) -> AttResult<Vec<u8>> {
        let mut body = Vec::with_capacity(4);
        body.extend_from_slice(&self.start_handle.to_le_bytes());
        body.extend_from_slice(&self.end_handle.to_le_bytes());
        Ok(body)
    }
}

/// Find By Type Value Request
#[derive(Debug, Clone)]
pub struct FindByTypeValueRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    /// Attribute type; ATT only carries 16-bit types here
    pub attribute_type: Uuid,
    /// Attribute value to match
    pub attribute_value: Vec<u8>,
}

impl AttRequest for FindByTypeValueRequest {
    fn opcode() -> u8 {
        ATT_FIND_BY_TYPE_VALUE_REQ
    }

    fn payload(&self) -> AttResult<Vec<u8>> {
        let attribute_type = self
            .attribute_type
            .as_u16()
            .ok_or(AttError::UnsupportedUuid(self.attribute_type))?;

        let mut body = Vec::with_capacity(6 + self.attribute_value.len());
        body.extend_from_slice(&self.start_handle.to_le_bytes());
        body.extend_from_slice(&self.end_handle.to_le_bytes());
        body.extend_from_slice(&attribute_type.to_le_bytes());
        body.extend_from_slice(&self.attribute_value);
        Ok(body)
    }
}

/// Read By Type Request
#[derive(Debug, Clone)]
pub struct ReadByTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub attribute_type: Uuid,
}

impl AttRequest for ReadByTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_REQ
    }

    fn payload(&self) -> AttResult<Vec<u8>> {
        Ok(range_with_type(
            self.start_handle,
            self.end_handle,
            &self.attribute_type,
        ))
    }
}

/// Read By Group Type Request
#[derive(Debug, Clone)]
pub struct ReadByGroupTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub group_type: Uuid,
}

impl AttRequest for ReadByGroupTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_REQ
    }

    fn payload(&self) -> AttResult<Vec<u8>> {
        Ok(range_with_type(
            self.start_handle,
            self.end_handle,
            &self.group_type,
        ))
    }
}

fn range_with_type(start_handle: u16, end_handle: u16, uuid: &Uuid) -> Vec<u8> {
    let mut body = Vec::with_capacity(20);
    body.extend_from_slice(&start_handle.to_le_bytes());
    body.extend_from_slice(&end_handle.to_le_bytes());
    body.extend_from_slice(&uuid.to_att_bytes());
    body
}

/// Read Request
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub handle: u16,
}

impl AttRequest for ReadRequest {
    fn opcode() -> u8 {
        ATT_READ_REQ
    }

    fn payload(&self) -> AttResult<Vec<u8>> {
        Ok(self.handle.to_le_bytes().to_vec())
    }
}

/// Write Request
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttRequest for WriteRequest {
    fn opcode() -> u8 {
        ATT_WRITE_REQ
    }

    fn payload(&self) -> AttResult<Vec<u8>> {
        Ok(handle_and_value(self.handle, &self.value))
    }
}

/// Write Command; never answered, so it bypasses the request queue
#[derive(Debug, Clone)]
pub struct WriteCommand {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttRequest for WriteCommand {
    fn opcode() -> u8 {
        ATT_WRITE_CMD
    }

    fn payload(&self) -> AttResult<Vec<u8>> {
        Ok(handle_and_value(self.handle, &self.value))
    }
}

fn handle_and_value(handle: u16, value: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + value.len());
    body.extend_from_slice(&handle.to_le_bytes());
    body.extend_from_slice(value);
    body
}

/// One `(handle, uuid)` record of a Find Information Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationData {
    pub handle: u16,
    pub uuid: Uuid,
}

/// One `(found handle, group end handle)` record of a Find By Type Value Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleInformation {
    pub start: u16,
    pub end: u16,
}

/// One `(handle, value)` record of a Read By Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeData {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// One `(start, end, value)` record of a Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeGroupData {
    pub start: u16,
    pub end: u16,
    pub value: Vec<u8>,
}

/// Decoded Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Opcode of the request that failed
    pub request_opcode: u8,
    /// Attribute handle in error
    pub handle: u16,
    pub error_code: AttErrorCode,
}

/// Successful response, decoded according to the request that was sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttResponse {
    /// Server Rx MTU; 0 when the exchange failed
    Mtu(u16),
    InformationList(Vec<InformationData>),
    HandleList(Vec<HandleInformation>),
    AttributeList(Vec<AttributeData>),
    GroupList(Vec<AttributeGroupData>),
    ReadValue(Vec<u8>),
    WriteAck(bool),
    /// Whole PDU, for requests this client does not decode
    Raw(Vec<u8>),
}

impl AttResponse {
    /// The empty/false/zero value a failed request of this opcode resolves to.
    pub fn empty_for(request_opcode: u8) -> Self {
        match request_opcode {
            ATT_EXCHANGE_MTU_REQ => AttResponse::Mtu(0),
            ATT_FIND_INFO_REQ => AttResponse::InformationList(Vec::new()),
            ATT_FIND_BY_TYPE_VALUE_REQ => AttResponse::HandleList(Vec::new()),
            ATT_READ_BY_TYPE_REQ => AttResponse::AttributeList(Vec::new()),
            ATT_READ_REQ => AttResponse::ReadValue(Vec::new()),
            ATT_READ_BY_GROUP_TYPE_REQ => AttResponse::GroupList(Vec::new()),
            ATT_WRITE_REQ => AttResponse::WriteAck(false),
            _ => AttResponse::Raw(Vec::new()),
        }
    }
}

/// How a request was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttOutcome {
    Response(AttResponse),
    /// The server reported Attribute Not Found: nothing left in the range
    EndOfRange,
    /// Any other Error Response
    Rejected { handle: u16, error_code: AttErrorCode },
    /// No response within the configured transaction timeout
    TimedOut,
}

impl AttOutcome {
    /// Collapses failures into the empty value for `request_opcode`.
    pub fn into_response(self, request_opcode: u8) -> AttResponse {
        match self {
            AttOutcome::Response(response) => response,
            _ => AttResponse::empty_for(request_opcode),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttOutcome::Response(_))
    }
}
