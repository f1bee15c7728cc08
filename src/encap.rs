//! EtherNet/IP encapsulation layer.
//!
//! Everything that happens before a CIP message exists lives here: the
//! 24-byte encapsulation header codec, the per-frame byte-order probe, and
//! the stream reassembler that turns a TCP byte stream into whole frames.
//!
//! The encapsulation specification mandates big-endian headers, but a
//! number of real clients emit little-endian ones. The probe accepts both:
//! a frame is read as little-endian only when that interpretation, and not
//! the big-endian one, resolves the command field to a well-known command.

use tracing::warn;

// Encapsulation commands handled by the dispatcher.
pub const LIST_SERVICES: u16 = 0x0004;
pub const LIST_IDENTITY: u16 = 0x0063;
pub const REGISTER_SESSION: u16 = 0x0065;
pub const UNREGISTER_SESSION: u16 = 0x0066;
pub const SEND_RR_DATA: u16 = 0x006F;

/// Commands the byte-order probe treats as evidence of a valid frame.
pub const WELL_KNOWN_COMMANDS: [u16; 5] = [
    LIST_SERVICES,
    LIST_IDENTITY,
    REGISTER_SESSION,
    UNREGISTER_SESSION,
    SEND_RR_DATA,
];

// Encapsulation status codes.
pub const STATUS_SUCCESS: u32 = 0x0000;
pub const STATUS_INVALID_COMMAND: u32 = 0x0001;
pub const STATUS_INSUFFICIENT_MEMORY: u32 = 0x0002;
/// Numerically identical to the REGISTER_SESSION command code; the
/// encapsulation specification assigns them independently.
pub const STATUS_INVALID_SESSION_HANDLE: u32 = 0x0065;
pub const STATUS_INVALID_LENGTH: u32 = 0x0069;
pub const STATUS_UNSUPPORTED_PROTOCOL: u32 = 0x006A;

/// Encapsulation header size on the wire.
pub const HEADER_LEN: usize = 24;

/// Largest frame the reassembler will buffer before declaring the stream
/// unrecoverable.
pub const MAX_FRAME_LEN: usize = 65_535;

/// Version accepted in REGISTER_SESSION payloads.
pub const PROTOCOL_VERSION: u16 = 1;

/// Byte order of one encapsulation frame.
///
/// Detected per frame, so a single connection that (unusually) alternates
/// orders still gets every response in the order of the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Network order, as the encapsulation specification mandates.
    #[default]
    Big,
    /// The order many PC-based clients actually emit.
    Little,
}

impl ByteOrder {
    pub fn read_u16(self, bytes: &[u8], at: usize) -> u16 {
        let pair = [bytes[at], bytes[at + 1]];
        match self {
            ByteOrder::Big => u16::from_be_bytes(pair),
            ByteOrder::Little => u16::from_le_bytes(pair),
        }
    }

    pub fn read_u32(self, bytes: &[u8], at: usize) -> u32 {
        let quad = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        match self {
            ByteOrder::Big => u32::from_be_bytes(quad),
            ByteOrder::Little => u32::from_le_bytes(quad),
        }
    }

    pub fn put_u16(self, out: &mut Vec<u8>, value: u16) {
        match self {
            ByteOrder::Big => out.extend_from_slice(&value.to_be_bytes()),
            ByteOrder::Little => out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    pub fn put_u32(self, out: &mut Vec<u8>, value: u32) {
        match self {
            ByteOrder::Big => out.extend_from_slice(&value.to_be_bytes()),
            ByteOrder::Little => out.extend_from_slice(&value.to_le_bytes()),
        }
    }
}

/// Decides the byte order of a frame from its first header bytes.
///
/// Deliberately conservative: flips to little-endian only when that reading
/// uniquely resolves to a well-known command.
pub fn detect_byte_order(header: &[u8]) -> ByteOrder {
    let cmd_be = u16::from_be_bytes([header[0], header[1]]);
    let cmd_le = u16::from_le_bytes([header[0], header[1]]);
    let be_known = WELL_KNOWN_COMMANDS.contains(&cmd_be);
    let le_known = WELL_KNOWN_COMMANDS.contains(&cmd_le);

    if le_known && !be_known {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    }
}

/// One decoded encapsulation packet.
///
/// The header's length field is derived from `payload` at encode time, and
/// the options field is always written as zero, so neither is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapPacket {
    pub command: u16,
    pub session_handle: u32,
    pub status: u32,
    /// Opaque client bytes, echoed verbatim in the response.
    pub sender_context: [u8; 8],
    pub payload: Vec<u8>,
}

impl EncapPacket {
    /// Decodes a whole frame as produced by [`FrameBuffer::next_frame`].
    ///
    /// Strict about length: the payload must be exactly what the header
    /// declares.
    pub fn decode(frame: &[u8], order: ByteOrder) -> Option<Self> {
        if frame.len() < HEADER_LEN {
            return None;
        }
        let length = order.read_u16(frame, 2) as usize;
        if frame.len() != HEADER_LEN + length {
            return None;
        }

        let mut sender_context = [0u8; 8];
        sender_context.copy_from_slice(&frame[12..20]);

        Some(Self {
            command: order.read_u16(frame, 0),
            session_handle: order.read_u32(frame, 4),
            status: order.read_u32(frame, 8),
            sender_context,
            payload: frame[HEADER_LEN..].to_vec(),
        })
    }

    /// Encodes header plus payload in the given byte order.
    pub fn encode(&self, order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        order.put_u16(&mut out, self.command);
        order.put_u16(&mut out, self.payload.len() as u16);
        order.put_u32(&mut out, self.session_handle);
        order.put_u32(&mut out, self.status);
        out.extend_from_slice(&self.sender_context);
        order.put_u32(&mut out, 0); // Options: always zero
        out.extend_from_slice(&self.payload);
        out
    }

    /// Builds the response skeleton for this request: same command, same
    /// session handle, sender context copied verbatim.
    pub fn reply(&self, status: u32, payload: Vec<u8>) -> Self {
        Self {
            command: self.command,
            session_handle: self.session_handle,
            status,
            sender_context: self.sender_context,
            payload,
        }
    }
}

/// Outcome of one extraction attempt against the inbound buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameStep {
    /// Not enough bytes buffered yet; wait for the socket.
    Incomplete,
    /// One whole frame, together with the byte order it was framed in.
    Frame { bytes: Vec<u8>, order: ByteOrder },
    /// The buffer could not be framed and was dropped wholesale.
    Desync { dropped: usize },
}

/// Accumulates TCP bytes and carves them into encapsulation frames.
///
/// Without framing delimiters there is no cheap way to resynchronize a
/// corrupt stream, so an unframeable header drops everything buffered and
/// reports [`FrameStep::Desync`]; what to do with the connection is the
/// caller's policy (the server closes it).
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the socket.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Attempts to extract the next frame. Call in a loop until it returns
    /// [`FrameStep::Incomplete`].
    pub fn next_frame(&mut self) -> FrameStep {
        if self.buf.len() < HEADER_LEN {
            return FrameStep::Incomplete;
        }

        let order = detect_byte_order(&self.buf[..4]);
        let length = order.read_u16(&self.buf, 2) as usize;
        let frame_len = HEADER_LEN + length;

        if frame_len > MAX_FRAME_LEN {
            let dropped = self.buf.len();
            warn!(
                frame_len,
                dropped, "unframeable encapsulation header, dropping buffer"
            );
            self.buf.clear();
            return FrameStep::Desync { dropped };
        }

        if self.buf.len() < frame_len {
            return FrameStep::Incomplete;
        }

        let bytes = self.buf.drain(..frame_len).collect();
        FrameStep::Frame { bytes, order }
    }
}

/// LIST_SERVICES response payload: one Communications service descriptor.
///
/// Capability flags 0x0120 advertise CIP over TCP and class 0/1 transport
/// over UDP, matching the two ports the simulator opens.
pub fn list_services_payload(order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(26);
    order.put_u16(&mut out, 1); // Item count
    order.put_u16(&mut out, 0x0100); // Item type: Communications
    order.put_u16(&mut out, 20); // Item length
    order.put_u16(&mut out, PROTOCOL_VERSION);
    order.put_u16(&mut out, 0x0120); // Capability flags
    out.extend_from_slice(b"Communications\0\0"); // 16-byte padded name
    out
}
