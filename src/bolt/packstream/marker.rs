//! PackStream marker bytes.
//!
//! Every encoded value starts with a marker byte. Small integers, and the
//! sizes of short strings, lists, maps and structures, are packed into the
//! marker itself; everything else uses a fixed marker followed by an explicit
//! 8/16/32-bit size.

/// Null marker
pub const NULL: u8 = 0xC0;

/// Float marker (64-bit IEEE 754)
pub const FLOAT_64: u8 = 0xC1;

/// Boolean markers
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

/// Integer markers.
/// Tiny integers (-16 to 127) are the marker byte itself.
pub const TINY_INT_MIN: i64 = -16;
pub const TINY_INT_MAX: i64 = 127;
pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

/// String markers. Tiny strings (0-15 bytes) use 0x80-0x8F.
pub const TINY_STRING_BASE: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;
pub const STRING_32: u8 = 0xD2;

/// List markers. Tiny lists (0-15 items) use 0x90-0x9F.
pub const TINY_LIST_BASE: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;
pub const LIST_32: u8 = 0xD6;

/// Map markers. Tiny maps (0-15 entries) use 0xA0-0xAF.
pub const TINY_MAP_BASE: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;
pub const MAP_32: u8 = 0xDA;

/// Structure markers. Tiny structures (0-15 fields) use 0xB0-0xBF.
pub const TINY_STRUCT_BASE: u8 = 0xB0;
pub const STRUCT_8: u8 = 0xDC;
pub const STRUCT_16: u8 = 0xDD;

/// Largest size that fits in the low nibble of a tiny marker.
pub const TINY_SIZE_MAX: usize = 15;

/// Structure signatures for graph values
pub const NODE: u8 = 0x4E; // 'N'
pub const RELATIONSHIP: u8 = 0x52; // 'R'
pub const UNBOUND_RELATIONSHIP: u8 = 0x72; // 'r'
pub const PATH: u8 = 0x50; // 'P'

/// Field counts the graph structures must be serialized with.
pub const NODE_FIELDS: usize = 3;
pub const RELATIONSHIP_FIELDS: usize = 5;
pub const UNBOUND_RELATIONSHIP_FIELDS: usize = 3;
pub const PATH_FIELDS: usize = 3;

/// Decoded meaning of a marker byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Tiny integer carried in the marker
    TinyInt(i8),
    /// Tiny string with its byte length
    TinyString(usize),
    /// Tiny list with its item count
    TinyList(usize),
    /// Tiny map with its entry count
    TinyMap(usize),
    /// Tiny structure with its field count
    TinyStruct(usize),
    /// Any other marker, interpreted by the decoder
    Other(u8),
}

/// Classify a marker byte.
#[inline]
pub fn classify(marker: u8) -> MarkerKind {
    let low = (marker & 0x0F) as usize;
    match marker & 0xF0 {
        0x80 => MarkerKind::TinyString(low),
        0x90 => MarkerKind::TinyList(low),
        0xA0 => MarkerKind::TinyMap(low),
        0xB0 => MarkerKind::TinyStruct(low),
        0xF0 => MarkerKind::TinyInt(marker as i8),
        _ if marker <= 0x7F => MarkerKind::TinyInt(marker as i8),
        _ => MarkerKind::Other(marker),
    }
}

/// Check if an integer can be encoded as a tiny int
#[inline]
pub fn can_encode_tiny_int(value: i64) -> bool {
    (TINY_INT_MIN..=TINY_INT_MAX).contains(&value)
}

/// Name used in error messages for a structure signature.
pub fn structure_name(signature: u8) -> &'static str {
    match signature {
        NODE => "NODE",
        RELATIONSHIP => "RELATIONSHIP",
        UNBOUND_RELATIONSHIP => "UNBOUND_RELATIONSHIP",
        PATH => "PATH",
        _ => "UNKNOWN",
    }
}
