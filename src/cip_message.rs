//! CIP message framing.
//!
//! Requests and responses share a two-byte prelude (service, then either a
//! path length or a reserved byte) but diverge after it. The response form
//! sets bit 7 of the service code and carries a general status; this
//! simulator never emits extended status words, though the decoder accepts
//! them for robustness.

/// Bit 7 of the service byte distinguishes responses from requests.
pub const RESPONSE_BIT: u8 = 0x80;

// General status codes the simulator produces.
pub const SUCCESS: u8 = 0x00;
pub const PATH_SEGMENT_ERROR: u8 = 0x04;
pub const PATH_DESTINATION_UNKNOWN: u8 = 0x05;
pub const SERVICE_NOT_SUPPORTED: u8 = 0x08;
pub const NOT_ENOUGH_DATA: u8 = 0x13;
pub const ATTRIBUTE_NOT_SUPPORTED: u8 = 0x14;
pub const OBJECT_DOES_NOT_EXIST: u8 = 0x16;
/// "Embedded service error" in the CIP status table; doubles as the
/// catch-all for internal failures.
pub const GENERAL_ERROR: u8 = 0x1E;

/// A decoded CIP request: service, raw path bytes, service data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipRequest {
    pub service: u8,
    pub path: Vec<u8>,
    pub data: Vec<u8>,
}

impl CipRequest {
    /// Decodes `{service, path_words, path, data}`. Returns `None` when the
    /// buffer cannot hold the path the header declares.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        let service = bytes[0];
        let path_len = bytes[1] as usize * 2;
        if bytes.len() < 2 + path_len {
            return None;
        }
        Some(Self {
            service,
            path: bytes[2..2 + path_len].to_vec(),
            data: bytes[2 + path_len..].to_vec(),
        })
    }

    /// Encodes the request form. The path is padded to a word boundary if a
    /// caller hands in an odd-length path.
    pub fn encode(&self) -> Vec<u8> {
        let mut path = self.path.clone();
        if path.len() % 2 != 0 {
            path.push(0x00);
        }
        let mut out = Vec::with_capacity(2 + path.len() + self.data.len());
        out.push(self.service);
        out.push((path.len() / 2) as u8);
        out.extend_from_slice(&path);
        out.extend_from_slice(&self.data);
        out
    }
}

/// A CIP response ready to encode: the service it answers (request form,
/// bit 7 clear), the general status, and the response data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipResponse {
    pub service: u8,
    pub status: u8,
    pub data: Vec<u8>,
}

impl CipResponse {
    pub fn success(service: u8, data: Vec<u8>) -> Self {
        Self {
            service,
            status: SUCCESS,
            data,
        }
    }

    pub fn error(service: u8, status: u8) -> Self {
        Self {
            service,
            status,
            data: Vec::new(),
        }
    }

    /// Encodes `[service|0x80, reserved, status, 0 extended words, data]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        out.push(self.service | RESPONSE_BIT);
        out.push(0x00); // Reserved
        out.push(self.status);
        out.push(0x00); // Extended status words
        out.extend_from_slice(&self.data);
        out
    }

    /// Decodes a response buffer, tolerating extended status words.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let extended_words = bytes[3] as usize;
        let data_start = 4 + extended_words * 2;
        if bytes.len() < data_start {
            return None;
        }
        Some(Self {
            service: bytes[0] & !RESPONSE_BIT,
            status: bytes[2],
            data: bytes[data_start..].to_vec(),
        })
    }
}

/// Human-readable text for a CIP general status code, for log lines.
pub fn general_status_message(status: u8) -> &'static str {
    match status {
        0x00 => "Success",
        0x01 => "Connection failure",
        0x02 => "Resource unavailable",
        0x03 => "Invalid parameter value",
        0x04 => "Path segment error",
        0x05 => "Path destination unknown",
        0x06 => "Partial transfer",
        0x07 => "Connection lost",
        0x08 => "Service not supported",
        0x09 => "Invalid attribute value",
        0x0A => "Attribute list error",
        0x0B => "Already in requested mode/state",
        0x0C => "Object state conflict",
        0x0D => "Object already exists",
        0x0E => "Attribute not settable",
        0x0F => "Privilege violation",
        0x10 => "Device state conflict",
        0x11 => "Reply data too large",
        0x12 => "Fragmentation of a primitive value",
        0x13 => "Not enough data",
        0x14 => "Attribute not supported",
        0x15 => "Too much data",
        0x16 => "Object does not exist",
        0x17 => "Service fragmentation sequence not in progress",
        0x18 => "No stored attribute data",
        0x19 => "Store operation failure",
        0x1A => "Routing failure, request packet too large",
        0x1B => "Routing failure, response packet too large",
        0x1C => "Missing attribute list entry data",
        0x1D => "Invalid attribute value list",
        0x1E => "Embedded service error",
        0x1F => "Vendor specific error",
        0x20 => "Invalid parameter",
        0x21 => "Write-once value or medium already written",
        0x22 => "Invalid reply received",
        0x23 => "Buffer overflow",
        0x24 => "Invalid message format",
        0x25 => "Key failure in path",
        0x26 => "Path size invalid",
        0x27 => "Unexpected attribute in list",
        0x28 => "Invalid member ID",
        0x29 => "Member not settable",
        _ => "Unknown CIP status",
    }
}
