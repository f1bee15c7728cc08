//! CIP service dispatcher.
//!
//! `dispatch` is a pure function of the request bytes and the shared server
//! state: no I/O, no suspension. Two services re-enter the dispatcher with
//! an embedded message (Unconnected Send forwards one request, Multiple
//! Service Packet batches several), so recursion depth is bounded to keep a
//! hostile message from nesting without limit.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::cip_message::{
    general_status_message, CipRequest, CipResponse, GENERAL_ERROR, NOT_ENOUGH_DATA,
    OBJECT_DOES_NOT_EXIST, PATH_DESTINATION_UNKNOWN, PATH_SEGMENT_ERROR, RESPONSE_BIT,
    SERVICE_NOT_SUPPORTED,
};
use crate::cip_path::RequestPath;
use crate::objects::{self, DeviceIdentity, CLASS_IDENTITY};
use crate::session::SessionRegistry;
use crate::tag_store::{TagReading, TagStore, DINT_TYPE_CODE};

// Service codes.
pub const GET_ATTRIBUTE_ALL: u8 = 0x01;
pub const MULTIPLE_SERVICE_PACKET: u8 = 0x0A;
pub const GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
pub const READ_TAG: u8 = 0x4C;
pub const UNCONNECTED_SEND: u8 = 0x52;

/// Deepest allowed chain of embedded requests.
pub const MAX_RECURSION_DEPTH: usize = 4;

/// Shared state every CIP handler works against. Passed explicitly from
/// the listener; nothing here is a process-wide singleton.
#[derive(Debug)]
pub struct ServerState {
    pub identity: DeviceIdentity,
    pub sessions: Arc<SessionRegistry>,
    pub tags: Arc<TagStore>,
    /// Conformance gate: wrap Unconnected Send responses in a 0xD2 reply
    /// envelope instead of returning the embedded response verbatim.
    pub wrap_unconnected_send: bool,
}

/// Dispatches one CIP request and returns the encoded CIP response.
pub fn dispatch(request: &[u8], state: &ServerState) -> Vec<u8> {
    dispatch_at_depth(request, state, 0)
}

fn dispatch_at_depth(bytes: &[u8], state: &ServerState, depth: usize) -> Vec<u8> {
    if depth > MAX_RECURSION_DEPTH {
        debug!(depth, "refusing over-nested embedded request");
        let service = bytes.first().copied().unwrap_or(0) & !RESPONSE_BIT;
        return CipResponse::error(service, GENERAL_ERROR).encode();
    }

    let Some(request) = CipRequest::decode(bytes) else {
        let service = bytes.first().copied().unwrap_or(0) & !RESPONSE_BIT;
        return CipResponse::error(service, NOT_ENOUGH_DATA).encode();
    };
    let service = request.service & !RESPONSE_BIT;
    let path = RequestPath::parse(&request.path);
    trace!(service, path_len = request.path.len(), "dispatching CIP request");

    let response = match service {
        GET_ATTRIBUTE_ALL => get_attribute_all(&path, state),
        GET_ATTRIBUTE_SINGLE => get_attribute_single(&path, state),
        READ_TAG => read_tag(&path, state),
        MULTIPLE_SERVICE_PACKET => multiple_service_packet(&request.data, state, depth),
        UNCONNECTED_SEND => return unconnected_send(&request.data, state, depth),
        _ => {
            debug!(service, "service not supported");
            CipResponse::error(service, SERVICE_NOT_SUPPORTED)
        }
    };
    if response.status != 0 {
        debug!(
            service,
            status = response.status,
            "CIP error response: {}",
            general_status_message(response.status)
        );
    }
    response.encode()
}

/// Get_Attribute_All (0x01). Identity is the only class that answers it.
fn get_attribute_all(path: &RequestPath, state: &ServerState) -> CipResponse {
    match path.class_id() {
        Some(CLASS_IDENTITY) => {
            CipResponse::success(GET_ATTRIBUTE_ALL, state.identity.attribute_all())
        }
        _ => CipResponse::error(GET_ATTRIBUTE_ALL, SERVICE_NOT_SUPPORTED),
    }
}

/// Get_Attribute_Single (0x0E) against the object model, with a symbolic
/// fallback: some clients phrase tag reads as Get_Attribute_Single.
fn get_attribute_single(path: &RequestPath, state: &ServerState) -> CipResponse {
    if path.is_empty() {
        return CipResponse::error(GET_ATTRIBUTE_SINGLE, PATH_SEGMENT_ERROR);
    }

    let Some(class) = path.class_id() else {
        // No class segment at all: only a symbolic path can still succeed.
        if path.tag_name().is_none() {
            return CipResponse::error(GET_ATTRIBUTE_SINGLE, PATH_SEGMENT_ERROR);
        }
        return match state.tags.read_path(path) {
            Some(reading) => CipResponse::success(GET_ATTRIBUTE_SINGLE, dint_payload(reading)),
            None => CipResponse::error(GET_ATTRIBUTE_SINGLE, OBJECT_DOES_NOT_EXIST),
        };
    };

    if !objects::is_known_class(class) {
        return match state.tags.read_path(path) {
            Some(reading) => CipResponse::success(GET_ATTRIBUTE_SINGLE, dint_payload(reading)),
            None => CipResponse::error(GET_ATTRIBUTE_SINGLE, OBJECT_DOES_NOT_EXIST),
        };
    }

    let instance = path.instance_id().unwrap_or(1);
    let Some(attribute) = path.attribute_id() else {
        return CipResponse::error(GET_ATTRIBUTE_SINGLE, PATH_SEGMENT_ERROR);
    };
    match objects::get_attribute_single(
        &state.identity,
        class,
        instance,
        attribute,
        state.sessions.len(),
    ) {
        Ok(data) => CipResponse::success(GET_ATTRIBUTE_SINGLE, data),
        Err(status) => CipResponse::error(GET_ATTRIBUTE_SINGLE, status),
    }
}

/// Read_Tag (0x4C): symbolic name, positional address, or numeric ordinal.
fn read_tag(path: &RequestPath, state: &ServerState) -> CipResponse {
    match state.tags.read_path(path) {
        Some(reading) => {
            trace!(index = reading.index, value = reading.value, "tag read");
            CipResponse::success(READ_TAG, dint_payload(reading))
        }
        None => CipResponse::error(READ_TAG, PATH_DESTINATION_UNKNOWN),
    }
}

/// A DINT read reply: type code, then the value, both little-endian.
fn dint_payload(reading: TagReading) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&DINT_TYPE_CODE.to_le_bytes());
    out.extend_from_slice(&reading.value.to_le_bytes());
    out
}

/// Multiple Service Packet (0x0A).
///
/// The request data is a count, an offset table (offsets measured from the
/// start of the data block), then the embedded request bodies. Children
/// dispatch independently; a malformed child still produces a response
/// body, so the reply's offset table always lines up with its count.
fn multiple_service_packet(data: &[u8], state: &ServerState, depth: usize) -> CipResponse {
    if data.len() < 2 {
        return CipResponse::error(MULTIPLE_SERVICE_PACKET, NOT_ENOUGH_DATA);
    }
    let count = u16::from_le_bytes([data[0], data[1]]) as usize;
    let table_end = 2 + count * 2;
    if data.len() < table_end {
        return CipResponse::error(MULTIPLE_SERVICE_PACKET, NOT_ENOUGH_DATA);
    }

    let offsets: Vec<usize> = (0..count)
        .map(|i| u16::from_le_bytes([data[2 + i * 2], data[3 + i * 2]]) as usize)
        .collect();

    let mut replies = Vec::with_capacity(count);
    for i in 0..count {
        let start = offsets[i];
        if start < table_end || start >= data.len() {
            // Keep the reply slot: the offset table must stay consistent
            // even when one child is unreachable.
            let service = data.get(start).copied().unwrap_or(0) & !RESPONSE_BIT;
            replies.push(CipResponse::error(service, NOT_ENOUGH_DATA).encode());
            continue;
        }
        // A corrupt next-offset only damages its own child; this one ends
        // at the nearest in-range boundary.
        let end = if i + 1 < count {
            offsets[i + 1].clamp(start, data.len())
        } else {
            data.len()
        };
        replies.push(dispatch_at_depth(&data[start..end], state, depth + 1));
    }

    // Reply data mirrors the request shape: count, offsets, bodies.
    let mut out = Vec::new();
    out.extend_from_slice(&(count as u16).to_le_bytes());
    let mut offset = 2 + count * 2;
    for reply in &replies {
        out.extend_from_slice(&(offset as u16).to_le_bytes());
        offset += reply.len();
    }
    for reply in &replies {
        out.extend_from_slice(reply);
    }
    CipResponse::success(MULTIPLE_SERVICE_PACKET, out)
}

/// Unconnected Send (0x52).
///
/// The embedded request is dispatched and its response returned verbatim,
/// with no 0x52 reply envelope, unless the wrap gate is on. The route path
/// trailing the embedded request is irrelevant to a single simulated
/// device and is ignored.
fn unconnected_send(data: &[u8], state: &ServerState, depth: usize) -> Vec<u8> {
    if data.len() < 4 {
        return CipResponse::error(UNCONNECTED_SEND, NOT_ENOUGH_DATA).encode();
    }
    // priority_ticks and timeout_ticks occupy the first two bytes; a
    // simulator that answers synchronously has no use for either.
    let embedded_size = u16::from_le_bytes([data[2], data[3]]) as usize;
    if 4 + embedded_size > data.len() {
        return CipResponse::error(UNCONNECTED_SEND, NOT_ENOUGH_DATA).encode();
    }

    let inner = dispatch_at_depth(&data[4..4 + embedded_size], state, depth + 1);
    if state.wrap_unconnected_send {
        let mut out = Vec::with_capacity(4 + inner.len());
        out.push(UNCONNECTED_SEND | RESPONSE_BIT);
        out.push(0x00);
        out.push(0x00); // forwarding itself succeeded
        out.push(0x00);
        out.extend_from_slice(&inner);
        out
    } else {
        inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cip_message::{ATTRIBUTE_NOT_SUPPORTED, SUCCESS};
    use crate::cip_path::{build_logical, build_symbolic};
    use crate::config::ServerConfig;

    fn state() -> ServerState {
        let config = ServerConfig::default();
        ServerState {
            identity: DeviceIdentity::from_config(&config),
            sessions: Arc::new(SessionRegistry::new()),
            tags: Arc::new(TagStore::generate(10)),
            wrap_unconnected_send: false,
        }
    }

    fn encode_request(service: u8, path: Vec<u8>, data: Vec<u8>) -> Vec<u8> {
        CipRequest {
            service,
            path,
            data,
        }
        .encode()
    }

    #[test]
    fn test_get_attribute_all_identity() {
        let state = state();
        let request = encode_request(
            GET_ATTRIBUTE_ALL,
            build_logical(0x01, 0x01, None),
            Vec::new(),
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.service, GET_ATTRIBUTE_ALL);
        assert_eq!(reply.status, SUCCESS);
        assert_eq!(&reply.data[0..2], &state.identity.vendor_id.to_le_bytes());
        assert_eq!(&reply.data[6..8], &[1, 0]);
        assert_eq!(&reply.data[10..14], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_get_attribute_all_rejects_other_classes() {
        let state = state();
        let request = encode_request(
            GET_ATTRIBUTE_ALL,
            build_logical(0x02, 0x01, None),
            Vec::new(),
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, SERVICE_NOT_SUPPORTED);
    }

    #[test]
    fn test_get_attribute_single_vendor_id() {
        let state = state();
        let request = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x01, 0x01, Some(1)),
            Vec::new(),
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, SUCCESS);
        assert_eq!(reply.data, state.identity.vendor_id.to_le_bytes().to_vec());
    }

    #[test]
    fn test_get_attribute_single_session_count() {
        let state = state();
        state.sessions.create();
        state.sessions.create();
        let request = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x06, 0x01, Some(2)),
            Vec::new(),
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.data, 2u16.to_le_bytes().to_vec());
    }

    #[test]
    fn test_get_attribute_single_errors() {
        let state = state();

        // Unknown attribute on a known object.
        let request = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x01, 0x01, Some(9)),
            Vec::new(),
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, ATTRIBUTE_NOT_SUPPORTED);

        // Unknown instance on a known class.
        let request = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x01, 0x05, Some(1)),
            Vec::new(),
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, OBJECT_DOES_NOT_EXIST);

        // Empty path.
        let request = encode_request(GET_ATTRIBUTE_SINGLE, Vec::new(), Vec::new());
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, PATH_SEGMENT_ERROR);
    }

    #[test]
    fn test_get_attribute_single_symbolic_fallback() {
        let state = state();
        let request = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_symbolic("Sensor1A"),
            Vec::new(),
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, SUCCESS);
        assert_eq!(&reply.data[0..2], &DINT_TYPE_CODE.to_le_bytes());
        assert_eq!(reply.data.len(), 6);

        // Unknown class with no matching tag.
        let request = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x77, 0x01, Some(1)),
            Vec::new(),
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, OBJECT_DOES_NOT_EXIST);
    }

    #[test]
    fn test_read_tag_by_name_address_and_ordinal() {
        let state = state();
        for symbol in ["Sensor1A", "Tag_7", "Conveyor3"] {
            let request = encode_request(READ_TAG, build_symbolic(symbol), vec![0x01, 0x00]);
            let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
            assert_eq!(reply.status, SUCCESS, "symbol {}", symbol);
            assert_eq!(&reply.data[0..2], &[0xC4, 0x00]);
            let value = i32::from_le_bytes(reply.data[2..6].try_into().unwrap());
            assert!((-1_000_000..=1_000_000).contains(&value));
        }
    }

    #[test]
    fn test_read_tag_miss() {
        let state = state();
        let request = encode_request(READ_TAG, build_symbolic("Bogus"), vec![0x01, 0x00]);
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, PATH_DESTINATION_UNKNOWN);
        assert!(reply.data.is_empty());
    }

    #[test]
    fn test_read_tag_shape_is_stable_across_reads() {
        let state = state();
        let request = encode_request(READ_TAG, build_symbolic("Sensor1A"), vec![0x01, 0x00]);
        let first = dispatch(&request, &state);
        let second = dispatch(&request, &state);
        assert_eq!(first.len(), second.len());
        assert_eq!(&first[..6], &second[..6]); // header + type code match
    }

    #[test]
    fn test_unknown_service() {
        let state = state();
        let request = encode_request(0x19, build_logical(0x01, 0x01, None), Vec::new());
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.service, 0x19);
        assert_eq!(reply.status, SERVICE_NOT_SUPPORTED);
    }

    #[test]
    fn test_truncated_request() {
        let state = state();
        let reply = CipResponse::decode(&dispatch(&[0x4C], &state)).unwrap();
        assert_eq!(reply.status, NOT_ENOUGH_DATA);
    }

    fn msp_request(children: &[Vec<u8>]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(children.len() as u16).to_le_bytes());
        let mut offset = 2 + children.len() * 2;
        for child in children {
            data.extend_from_slice(&(offset as u16).to_le_bytes());
            offset += child.len();
        }
        for child in children {
            data.extend_from_slice(child);
        }
        encode_request(MULTIPLE_SERVICE_PACKET, Vec::new(), data)
    }

    /// Walks an MSP reply's offset table, asserting the declared offsets
    /// tile the data exactly, and returns the decoded children.
    fn split_msp_reply(data: &[u8]) -> Vec<CipResponse> {
        let count = u16::from_le_bytes([data[0], data[1]]) as usize;
        let mut children = Vec::new();
        let mut expected = 2 + count * 2;
        for i in 0..count {
            let offset = u16::from_le_bytes([data[2 + i * 2], data[3 + i * 2]]) as usize;
            assert_eq!(offset, expected, "offset {} out of place", i);
            let end = if i + 1 < count {
                u16::from_le_bytes([data[4 + i * 2], data[5 + i * 2]]) as usize
            } else {
                data.len()
            };
            children.push(CipResponse::decode(&data[offset..end]).unwrap());
            expected = end;
        }
        children
    }

    #[test]
    fn test_multiple_service_packet() {
        let state = state();
        let request = msp_request(&[
            encode_request(
                GET_ATTRIBUTE_SINGLE,
                build_logical(0x01, 0x01, Some(1)),
                Vec::new(),
            ),
            encode_request(READ_TAG, build_symbolic("Sensor1A"), vec![0x01, 0x00]),
        ]);
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, SUCCESS);

        let children = split_msp_reply(&reply.data);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].status, SUCCESS);
        assert_eq!(
            children[0].data,
            state.identity.vendor_id.to_le_bytes().to_vec()
        );
        assert_eq!(children[1].status, SUCCESS);
        assert_eq!(&children[1].data[0..2], &[0xC4, 0x00]);
    }

    #[test]
    fn test_multiple_service_packet_bad_child_keeps_table_consistent() {
        let state = state();
        // Second child's offset points past the end of the data block.
        let good = encode_request(READ_TAG, build_symbolic("Sensor1A"), vec![0x01, 0x00]);
        let mut data = Vec::new();
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&6u16.to_le_bytes());
        data.extend_from_slice(&0xFFu16.to_le_bytes());
        data.extend_from_slice(&good);
        let request = encode_request(MULTIPLE_SERVICE_PACKET, Vec::new(), data);

        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, SUCCESS);
        let children = split_msp_reply(&reply.data);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].status, SUCCESS);
        assert_eq!(children[1].status, NOT_ENOUGH_DATA);
    }

    #[test]
    fn test_multiple_service_packet_truncated_table() {
        let state = state();
        let request = encode_request(
            MULTIPLE_SERVICE_PACKET,
            Vec::new(),
            vec![0x02, 0x00, 0x06, 0x00], // claims 2 children, one offset
        );
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, NOT_ENOUGH_DATA);
    }

    fn unconnected_send_request(embedded: &[u8]) -> Vec<u8> {
        let mut data = vec![0x07, 0x0A]; // priority ticks, timeout ticks
        data.extend_from_slice(&(embedded.len() as u16).to_le_bytes());
        data.extend_from_slice(embedded);
        if embedded.len() % 2 != 0 {
            data.push(0x00);
        }
        data.push(0x01); // route path size in words
        data.push(0x00); // reserved
        data.extend_from_slice(&[0x01, 0x00]); // port 1, slot 0
        encode_request(
            UNCONNECTED_SEND,
            build_logical(0x06, 0x01, None),
            data,
        )
    }

    #[test]
    fn test_unconnected_send_returns_inner_response_verbatim() {
        let state = state();
        let embedded = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x01, 0x01, Some(1)),
            Vec::new(),
        );
        let direct = dispatch(&embedded, &state);
        let forwarded = dispatch(&unconnected_send_request(&embedded), &state);
        assert_eq!(forwarded, direct);
    }

    #[test]
    fn test_unconnected_send_wrap_gate() {
        let mut state = state();
        state.wrap_unconnected_send = true;
        let embedded = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x01, 0x01, Some(1)),
            Vec::new(),
        );
        let direct = dispatch(&embedded, &state);
        let forwarded = dispatch(&unconnected_send_request(&embedded), &state);
        assert_eq!(forwarded[0], 0xD2);
        assert_eq!(forwarded[2], SUCCESS);
        assert_eq!(&forwarded[4..], &direct[..]);
    }

    #[test]
    fn test_unconnected_send_truncated_embedded() {
        let state = state();
        let mut data = vec![0x07, 0x0A];
        data.extend_from_slice(&20u16.to_le_bytes()); // declares more than present
        data.extend_from_slice(&[0x4C, 0x00]);
        let request = encode_request(UNCONNECTED_SEND, Vec::new(), data);
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.service, UNCONNECTED_SEND);
        assert_eq!(reply.status, NOT_ENOUGH_DATA);
    }

    #[test]
    fn test_recursion_depth_is_bounded() {
        let state = state();
        let mut request = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x01, 0x01, Some(1)),
            Vec::new(),
        );
        for _ in 0..8 {
            request = unconnected_send_request(&request);
        }
        let reply = CipResponse::decode(&dispatch(&request, &state)).unwrap();
        assert_eq!(reply.status, GENERAL_ERROR);
    }

    #[test]
    fn test_nested_unconnected_send_within_limit() {
        let state = state();
        let embedded = encode_request(
            GET_ATTRIBUTE_SINGLE,
            build_logical(0x01, 0x01, Some(1)),
            Vec::new(),
        );
        let direct = dispatch(&embedded, &state);
        let nested = unconnected_send_request(&unconnected_send_request(&embedded));
        assert_eq!(dispatch(&nested, &state), direct);
    }
}
