//! CIP request path parsing and construction.
//!
//! A request path is a sequence of word-aligned segments. The simulator
//! understands the two families explicit messaging actually uses: logical
//! segments (class / instance / member / connection point / attribute) and
//! ANSI extended symbolic segments (tag names). Everything else is skipped
//! byte by byte so a partially understood path still yields its usable
//! segments.

/// High-3-bit pattern of a logical segment.
const LOGICAL_SEGMENT: u8 = 0x20;
const LOGICAL_MASK: u8 = 0xE0;
/// Leading byte of an ANSI extended symbolic segment.
const ANSI_SYMBOLIC: u8 = 0x91;

/// Logical types, from bits 4-2 of the segment byte.
const LOGICAL_TYPE_CLASS: u8 = 0;
const LOGICAL_TYPE_INSTANCE: u8 = 1;
const LOGICAL_TYPE_MEMBER: u8 = 2;
const LOGICAL_TYPE_CONNECTION_POINT: u8 = 3;
const LOGICAL_TYPE_ATTRIBUTE: u8 = 4;

/// One parsed path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Class(u16),
    Instance(u16),
    Member(u16),
    ConnectionPoint(u16),
    Attribute(u16),
    /// ANSI extended symbolic segment: a tag name.
    Symbolic(String),
}

/// A parsed request path with convenience accessors for the common lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPath {
    pub segments: Vec<PathSegment>,
}

impl RequestPath {
    /// Parses a path byte sequence.
    ///
    /// Best-effort: unknown leading bytes are skipped one at a time and a
    /// truncated trailing segment terminates parsing silently, so this
    /// never fails; it just yields fewer segments.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut segments = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            let lead = bytes[pos];
            if lead & LOGICAL_MASK == LOGICAL_SEGMENT {
                let logical_type = (lead >> 2) & 0x07;
                let wide = lead & 0x01 != 0;
                let value = if wide {
                    // Pad byte, then a little-endian u16 (CIP's own order,
                    // independent of the encapsulation framing).
                    if pos + 4 > bytes.len() {
                        break;
                    }
                    let value = u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]);
                    pos += 4;
                    value
                } else {
                    if pos + 2 > bytes.len() {
                        break;
                    }
                    let value = bytes[pos + 1] as u16;
                    pos += 2;
                    value
                };
                if let Some(segment) = logical_segment(logical_type, value) {
                    segments.push(segment);
                }
            } else if lead == ANSI_SYMBOLIC {
                if pos + 2 > bytes.len() {
                    break;
                }
                let len = bytes[pos + 1] as usize;
                if pos + 2 + len > bytes.len() {
                    break;
                }
                let name = String::from_utf8_lossy(&bytes[pos + 2..pos + 2 + len]).into_owned();
                segments.push(PathSegment::Symbolic(name));
                pos += 2 + len + (len & 1); // odd-length names carry a pad byte
            } else {
                pos += 1;
            }
        }

        Self { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn class_id(&self) -> Option<u16> {
        self.segments.iter().find_map(|s| match s {
            PathSegment::Class(id) => Some(*id),
            _ => None,
        })
    }

    pub fn instance_id(&self) -> Option<u16> {
        self.segments.iter().find_map(|s| match s {
            PathSegment::Instance(id) => Some(*id),
            _ => None,
        })
    }

    pub fn attribute_id(&self) -> Option<u16> {
        self.segments.iter().find_map(|s| match s {
            PathSegment::Attribute(id) => Some(*id),
            _ => None,
        })
    }

    /// The first symbolic segment, if the path names a tag.
    pub fn tag_name(&self) -> Option<&str> {
        self.segments.iter().find_map(|s| match s {
            PathSegment::Symbolic(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

fn logical_segment(logical_type: u8, value: u16) -> Option<PathSegment> {
    match logical_type {
        LOGICAL_TYPE_CLASS => Some(PathSegment::Class(value)),
        LOGICAL_TYPE_INSTANCE => Some(PathSegment::Instance(value)),
        LOGICAL_TYPE_MEMBER => Some(PathSegment::Member(value)),
        LOGICAL_TYPE_CONNECTION_POINT => Some(PathSegment::ConnectionPoint(value)),
        LOGICAL_TYPE_ATTRIBUTE => Some(PathSegment::Attribute(value)),
        _ => None,
    }
}

fn push_logical(out: &mut Vec<u8>, logical_type: u8, value: u16) {
    let lead = LOGICAL_SEGMENT | (logical_type << 2);
    if value <= 0xFF {
        out.push(lead);
        out.push(value as u8);
    } else {
        out.push(lead | 0x01);
        out.push(0x00); // pad
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Builds a logical path addressing `class` / `instance`, optionally down
/// to an attribute.
pub fn build_logical(class: u16, instance: u16, attribute: Option<u16>) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    push_logical(&mut out, LOGICAL_TYPE_CLASS, class);
    push_logical(&mut out, LOGICAL_TYPE_INSTANCE, instance);
    if let Some(attribute) = attribute {
        push_logical(&mut out, LOGICAL_TYPE_ATTRIBUTE, attribute);
    }
    out
}

/// Builds an ANSI extended symbolic path for a tag name, padded to a word
/// boundary.
pub fn build_symbolic(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + name.len() + 1);
    out.push(ANSI_SYMBOLIC);
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    if name.len() % 2 != 0 {
        out.push(0x00);
    }
    out
}
