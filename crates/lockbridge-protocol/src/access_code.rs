//! Access Code Control Point messages.
//!
//! The control point exchanges base64-encoded TLV8 buffers. A request starts
//! with the operation item and is followed by zero or more parameter
//! sub-records:
//!
//! ```text
//! 01 01 <op>                      operation
//! 03 <len> <params>               parameters (repeated, 00 00 between)
//!     01 01 <slot>                identifier (slot index)
//!     02 <len> <digits>           access code
//! ```
//!
//! Responses echo the operation and carry one sub-record per passcode:
//!
//! ```text
//! 01 01 <op>
//! 03 <len> 01 01 <slot> 02 <len> <digits> 03 01 00 04 01 00
//! 00 00
//! 03 <len> ...
//! ```
//!
//! # Slot indices
//!
//! The identifier is the position of the passcode in the most recently fetched
//! listing. It is not stable: another client adding or deleting a passcode
//! shifts every later slot. Identifiers are therefore only valid against the
//! snapshot they were produced from.
//!
//! # Examples
//!
//! ```
//! use lockbridge_protocol::access_code::{
//!     AccessCodeOperation, AccessCodeRecord, AccessCodeRequest, AccessCodeResponse,
//! };
//!
//! let request = AccessCodeRequest::add("4321");
//! let decoded = AccessCodeRequest::decode(&request.encode()).unwrap();
//! assert_eq!(decoded.operation, AccessCodeOperation::AddOrChange);
//! assert_eq!(decoded.params[0].access_code.as_deref(), Some("4321"));
//!
//! let response = AccessCodeResponse::new(
//!     AccessCodeOperation::List,
//!     vec![Some(AccessCodeRecord::new(0, "1111"))],
//! );
//! let bytes = response.encode();
//! assert_eq!(&bytes[..3], &[0x01, 0x01, 0x01]);
//! ```

use crate::tlv8::{self, Tlv8Writer};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use lockbridge_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outer tag carrying the operation code.
pub const TAG_OPERATION: u8 = 0x01;
/// Outer tag carrying one parameter or record sub-record.
pub const TAG_RECORD: u8 = 0x03;

/// Inner tag: slot identifier.
pub const TAG_IDENTIFIER: u8 = 0x01;
/// Inner tag: access code digits.
pub const TAG_ACCESS_CODE: u8 = 0x02;
/// Inner tag: flags, reserved and always `00`.
pub const TAG_FLAGS: u8 = 0x03;
/// Inner tag: status, reserved and always `00`.
pub const TAG_STATUS: u8 = 0x04;

/// Operations understood by the control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessCodeOperation {
    List = 1,
    Read = 2,
    AddOrChange = 3,
    Delete = 5,
}

impl AccessCodeOperation {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Whether the operation modifies passcodes on the lock.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::AddOrChange | Self::Delete)
    }
}

impl TryFrom<u8> for AccessCodeOperation {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::List),
            2 => Ok(Self::Read),
            3 => Ok(Self::AddOrChange),
            5 => Ok(Self::Delete),
            other => Err(Error::protocol(format!("unknown access code operation {other}"))),
        }
    }
}

impl fmt::Display for AccessCodeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::List => "list",
            Self::Read => "read",
            Self::AddOrChange => "add_or_change",
            Self::Delete => "delete",
        };
        write!(f, "{name}")
    }
}

/// Parameters of one request sub-record.
///
/// For add/change, an `identifier` selects a change of the passcode at that
/// slot; without one the sub-record is an add.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessCodeParams {
    pub identifier: Option<u8>,
    pub access_code: Option<String>,
}

impl AccessCodeParams {
    fn decode(value: &[u8]) -> Result<Self> {
        let mut params = AccessCodeParams::default();
        for item in tlv8::decode(value)? {
            match item.tag {
                TAG_IDENTIFIER => params.identifier = Some(item.as_u8()?),
                TAG_ACCESS_CODE => params.access_code = Some(parse_access_code(&item.value)?),
                // flags and status are reserved
                _ => {}
            }
        }
        Ok(params)
    }

    fn encode(&self) -> Bytes {
        let mut writer = Tlv8Writer::new();
        if let Some(identifier) = self.identifier {
            writer.write(TAG_IDENTIFIER, &[identifier]);
        }
        if let Some(code) = &self.access_code {
            writer.write(TAG_ACCESS_CODE, code.as_bytes());
        }
        writer.finish()
    }

    /// The identifier, or a decode error naming the operation that needs it.
    pub fn require_identifier(&self, operation: AccessCodeOperation) -> Result<u8> {
        self.identifier
            .ok_or_else(|| Error::protocol(format!("{operation} parameters lack an identifier")))
    }

    /// The access code, or a decode error naming the operation that needs it.
    pub fn require_access_code(&self, operation: AccessCodeOperation) -> Result<&str> {
        self.access_code
            .as_deref()
            .ok_or_else(|| Error::protocol(format!("{operation} parameters lack an access code")))
    }
}

fn parse_access_code(value: &[u8]) -> Result<String> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return Err(Error::protocol("access code must be a non-empty digit string"));
    }
    // ASCII digits are valid UTF-8
    Ok(value.iter().map(|&b| b as char).collect())
}

/// A decoded control point command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCodeRequest {
    pub operation: AccessCodeOperation,
    pub params: Vec<AccessCodeParams>,
}

impl AccessCodeRequest {
    pub fn list() -> Self {
        Self {
            operation: AccessCodeOperation::List,
            params: Vec::new(),
        }
    }

    pub fn read(slots: &[u8]) -> Self {
        Self {
            operation: AccessCodeOperation::Read,
            params: slots
                .iter()
                .map(|&slot| AccessCodeParams {
                    identifier: Some(slot),
                    access_code: None,
                })
                .collect(),
        }
    }

    pub fn add(code: &str) -> Self {
        Self {
            operation: AccessCodeOperation::AddOrChange,
            params: vec![AccessCodeParams {
                identifier: None,
                access_code: Some(code.to_string()),
            }],
        }
    }

    pub fn change(slot: u8, code: &str) -> Self {
        Self {
            operation: AccessCodeOperation::AddOrChange,
            params: vec![AccessCodeParams {
                identifier: Some(slot),
                access_code: Some(code.to_string()),
            }],
        }
    }

    pub fn delete(slot: u8) -> Self {
        Self {
            operation: AccessCodeOperation::Delete,
            params: vec![AccessCodeParams {
                identifier: Some(slot),
                access_code: None,
            }],
        }
    }

    /// Decode a raw TLV8 command.
    ///
    /// The operation is taken from the first decoded item.
    ///
    /// # Errors
    /// Returns `Error::ProtocolDecode` for an empty buffer, a malformed TLV8
    /// structure, an unknown operation or a malformed parameter sub-record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let items = tlv8::decode(bytes)?;
        let (first, rest) = items
            .split_first()
            .ok_or_else(|| Error::protocol("empty access code command"))?;
        let opcode = *first
            .value
            .first()
            .ok_or_else(|| Error::protocol("access code command has no operation byte"))?;
        let operation = AccessCodeOperation::try_from(opcode)?;

        let params = rest
            .iter()
            .filter(|item| item.tag == TAG_RECORD)
            .map(|item| AccessCodeParams::decode(&item.value))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { operation, params })
    }

    /// Decode a base64-encoded command.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::decode(&decode_base64(encoded)?)
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = Tlv8Writer::new().put_u8(TAG_OPERATION, self.operation.code());
        write_records(&mut writer, self.params.iter().map(|p| Some(p.encode())));
        writer.finish()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.encode())
    }
}

/// One passcode as reported to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCodeRecord {
    pub identifier: u8,
    pub access_code: String,
    pub flags: u8,
    pub status: u8,
}

impl AccessCodeRecord {
    pub fn new(identifier: u8, access_code: impl Into<String>) -> Self {
        Self {
            identifier,
            access_code: access_code.into(),
            flags: 0,
            status: 0,
        }
    }

    fn encode(&self) -> Bytes {
        Tlv8Writer::new()
            .put_u8(TAG_IDENTIFIER, self.identifier)
            .put(TAG_ACCESS_CODE, self.access_code.as_bytes())
            .put_u8(TAG_FLAGS, self.flags)
            .put_u8(TAG_STATUS, self.status)
            .finish()
    }

    fn decode(value: &[u8]) -> Result<Option<Self>> {
        if value.is_empty() {
            return Ok(None);
        }

        let mut identifier = None;
        let mut access_code = None;
        let mut flags = 0;
        let mut status = 0;
        for item in tlv8::decode(value)? {
            match item.tag {
                TAG_IDENTIFIER => identifier = Some(item.as_u8()?),
                TAG_ACCESS_CODE => access_code = Some(parse_access_code(&item.value)?),
                TAG_FLAGS => flags = item.as_u8()?,
                TAG_STATUS => status = item.as_u8()?,
                _ => {}
            }
        }

        match (identifier, access_code) {
            (Some(identifier), Some(access_code)) => Ok(Some(Self {
                identifier,
                access_code,
                flags,
                status,
            })),
            _ => Err(Error::protocol("access code record lacks identifier or code")),
        }
    }
}

/// A control point response. `None` entries encode as empty sub-records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCodeResponse {
    pub operation: AccessCodeOperation,
    pub records: Vec<Option<AccessCodeRecord>>,
}

impl AccessCodeResponse {
    pub fn new(operation: AccessCodeOperation, records: Vec<Option<AccessCodeRecord>>) -> Self {
        Self { operation, records }
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = Tlv8Writer::new().put_u8(TAG_OPERATION, self.operation.code());
        write_records(
            &mut writer,
            self.records.iter().map(|r| r.as_ref().map(AccessCodeRecord::encode)),
        );
        writer.finish()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.encode())
    }

    /// Decode a response, mainly useful to hub-side tooling and tests.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let items = tlv8::decode(bytes)?;
        let (first, rest) = items
            .split_first()
            .ok_or_else(|| Error::protocol("empty access code response"))?;
        if first.tag != TAG_OPERATION {
            return Err(Error::protocol(format!(
                "response starts with tag {:02x}, expected operation",
                first.tag
            )));
        }
        let operation = AccessCodeOperation::try_from(first.as_u8()?)?;

        let records = rest
            .iter()
            .filter(|item| item.tag == TAG_RECORD)
            .map(|item| AccessCodeRecord::decode(&item.value))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { operation, records })
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        Self::decode(&decode_base64(encoded)?)
    }
}

/// Write sub-records with `00 00` between all but the last.
fn write_records(writer: &mut Tlv8Writer, records: impl Iterator<Item = Option<Bytes>>) {
    let mut first = true;
    for record in records {
        if !first {
            writer.write(tlv8::SEPARATOR_TAG, &[]);
        }
        first = false;
        writer.write(TAG_RECORD, record.as_deref().unwrap_or_default());
    }
}

/// Decode base64 into raw bytes.
///
/// # Errors
/// Returns `Error::ProtocolDecode` if the input is not valid base64.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::protocol(format!("invalid base64: {e}")))
}

/// Base64 of the benign empty response returned on malformed input.
pub fn empty_response_base64() -> String {
    String::new()
}
