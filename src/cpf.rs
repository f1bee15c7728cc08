//! Common Packet Format codec.
//!
//! SendRRData payloads wrap their CIP message in a short item list. For
//! unconnected explicit messaging the list is a Null Address item followed
//! by an Unconnected Data item, but clients are not required to keep that
//! order, so the decoder collects every item and lets the dispatcher pick
//! the 0x00B2 carrier. Item headers follow the connection's byte order; the
//! CIP bytes inside the carrier do not (CIP is little-endian by its own
//! specification).

use crate::encap::ByteOrder;

/// Address item carrying no routing information.
pub const ITEM_NULL_ADDRESS: u16 = 0x0000;
/// Data item carrying an unconnected CIP message.
pub const ITEM_UNCONNECTED_DATA: u16 = 0x00B2;

/// One `{type, length, data}` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpfItem {
    pub item_type: u16,
    pub data: Vec<u8>,
}

/// A decoded SendRRData payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpfPacket {
    pub interface_handle: u32,
    pub timeout: u16,
    pub items: Vec<CpfItem>,
}

impl CpfPacket {
    /// Decodes the payload of a SendRRData request.
    ///
    /// Unknown item types are kept (their bytes must be consumed to reach
    /// later items); truncation anywhere is a decode failure.
    pub fn decode(payload: &[u8], order: ByteOrder) -> Option<Self> {
        if payload.len() < 8 {
            return None;
        }
        let interface_handle = order.read_u32(payload, 0);
        let timeout = order.read_u16(payload, 4);
        let item_count = order.read_u16(payload, 6) as usize;

        let mut items = Vec::with_capacity(item_count);
        let mut pos = 8;
        for _ in 0..item_count {
            if pos + 4 > payload.len() {
                return None;
            }
            let item_type = order.read_u16(payload, pos);
            let item_length = order.read_u16(payload, pos + 2) as usize;
            pos += 4;
            if pos + item_length > payload.len() {
                return None;
            }
            items.push(CpfItem {
                item_type,
                data: payload[pos..pos + item_length].to_vec(),
            });
            pos += item_length;
        }

        Some(Self {
            interface_handle,
            timeout,
            items,
        })
    }

    /// The CIP message carried by the first Unconnected Data item, if any.
    pub fn unconnected_data(&self) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|item| item.item_type == ITEM_UNCONNECTED_DATA)
            .map(|item| item.data.as_slice())
    }

    /// Builds the response payload: interface handle and timeout echoed
    /// from the request, then exactly a Null Address item and an
    /// Unconnected Data item wrapping `cip`.
    pub fn encode_response(&self, cip: &[u8], order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + cip.len());
        order.put_u32(&mut out, self.interface_handle);
        order.put_u16(&mut out, self.timeout);
        order.put_u16(&mut out, 2); // Item count
        order.put_u16(&mut out, ITEM_NULL_ADDRESS);
        order.put_u16(&mut out, 0);
        order.put_u16(&mut out, ITEM_UNCONNECTED_DATA);
        order.put_u16(&mut out, cip.len() as u16);
        out.extend_from_slice(cip);
        out
    }
}
