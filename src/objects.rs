//! CIP object model: Identity, Message Router, Connection Manager.
//!
//! Three small static objects back the explicit-messaging surface. Values
//! inside CIP responses are little-endian per the CIP specification; the
//! LIST_IDENTITY block is the historical exception and is written
//! big-endian.

use std::net::Ipv4Addr;

use crate::cip_message::{ATTRIBUTE_NOT_SUPPORTED, OBJECT_DOES_NOT_EXIST};
use crate::config::{ServerConfig, PRODUCT_NAME_MAX};

pub const CLASS_IDENTITY: u16 = 0x01;
pub const CLASS_MESSAGE_ROUTER: u16 = 0x02;
pub const CLASS_CONNECTION_MANAGER: u16 = 0x06;

/// Static identity of the simulated device.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u32,
    pub revision_major: u8,
    pub revision_minor: u8,
    pub status: u16,
    pub serial: u32,
    pub product_name: String,
}

impl DeviceIdentity {
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut product_name = config.product_name.clone();
        product_name.truncate(PRODUCT_NAME_MAX);
        Self {
            vendor_id: config.vendor_id,
            device_type: config.device_type,
            product_code: config.product_code,
            revision_major: 1,
            revision_minor: 0,
            status: 0x0001,
            serial: 0x1234_5678,
            product_name,
        }
    }

    /// SHORT_STRING form of the product name: length byte, then ASCII.
    fn short_string_name(&self) -> Vec<u8> {
        let bytes = self.product_name.as_bytes();
        let mut out = Vec::with_capacity(1 + bytes.len());
        out.push(bytes.len() as u8);
        out.extend_from_slice(bytes);
        out
    }

    /// Get_Attribute_All response data for the Identity object.
    pub fn attribute_all(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.product_name.len());
        out.extend_from_slice(&self.vendor_id.to_le_bytes());
        out.extend_from_slice(&self.device_type.to_le_bytes());
        out.extend_from_slice(&(self.product_code as u16).to_le_bytes());
        out.push(self.revision_major);
        out.push(self.revision_minor);
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.short_string_name());
        out
    }

    /// LIST_IDENTITY response payload.
    ///
    /// Big-endian integers, two legacy zero bytes up front, serial always
    /// zero, one trailing NUL after the name. This matches what fielded
    /// scanners of this simulator family parse; it is not the strict
    /// item-list framing of the encapsulation specification.
    pub fn list_identity_payload(&self, ip: Ipv4Addr) -> Vec<u8> {
        let name = self.product_name.as_bytes();
        let mut out = Vec::with_capacity(0x1F + name.len());
        out.extend_from_slice(&[0x00, 0x00]); // legacy header bytes
        out.extend_from_slice(&0u16.to_be_bytes()); // port
        out.extend_from_slice(&u32::from(ip).to_be_bytes());
        out.extend_from_slice(&[0x00; 4]); // reserved
        out.extend_from_slice(&self.vendor_id.to_be_bytes());
        out.extend_from_slice(&self.device_type.to_be_bytes());
        out.extend_from_slice(&self.product_code.to_be_bytes());
        out.push(self.revision_major);
        out.push(self.revision_minor);
        out.extend_from_slice(&self.status.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // serial: zero here
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name);
        out.push(0x00);
        out
    }
}

/// Whether Get_Attribute_Single recognizes the class at all. Unknown
/// classes fall through to the symbolic tag-read path before erroring.
pub fn is_known_class(class: u16) -> bool {
    matches!(
        class,
        CLASS_IDENTITY | CLASS_MESSAGE_ROUTER | CLASS_CONNECTION_MANAGER
    )
}

/// Fetches one attribute of one object instance.
///
/// `session_count` feeds the Connection Manager's active-connection
/// attribute. Errors are CIP general status codes.
pub fn get_attribute_single(
    identity: &DeviceIdentity,
    class: u16,
    instance: u16,
    attribute: u16,
    session_count: usize,
) -> Result<Vec<u8>, u8> {
    // Instance 0 (the class object) and instance 1 answer identically for
    // these singletons.
    if instance > 1 {
        return Err(OBJECT_DOES_NOT_EXIST);
    }

    match class {
        CLASS_IDENTITY => match attribute {
            1 => Ok(identity.vendor_id.to_le_bytes().to_vec()),
            2 => Ok(identity.device_type.to_le_bytes().to_vec()),
            3 => Ok((identity.product_code as u16).to_le_bytes().to_vec()),
            4 => Ok(vec![identity.revision_major, identity.revision_minor]),
            5 => Ok(identity.status.to_le_bytes().to_vec()),
            6 => Ok(0u32.to_le_bytes().to_vec()),
            7 => Ok(identity.short_string_name()),
            _ => Err(ATTRIBUTE_NOT_SUPPORTED),
        },
        CLASS_MESSAGE_ROUTER => match attribute {
            1 => Ok(3u16.to_le_bytes().to_vec()),
            2 | 3 => Ok(0u16.to_le_bytes().to_vec()),
            _ => Err(ATTRIBUTE_NOT_SUPPORTED),
        },
        CLASS_CONNECTION_MANAGER => match attribute {
            1 => Ok(128u16.to_le_bytes().to_vec()),
            2 => Ok((session_count.min(u16::MAX as usize) as u16)
                .to_le_bytes()
                .to_vec()),
            _ => Err(ATTRIBUTE_NOT_SUPPORTED),
        },
        _ => Err(OBJECT_DOES_NOT_EXIST),
    }
}
