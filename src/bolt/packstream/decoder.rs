//! PackStream decoder.
//!
//! Declared sizes are never trusted beyond the available input: containers
//! preallocate at most one slot per remaining byte, and every read checks
//! for truncation first. Nesting of lists, maps and structures is limited
//! to [`MAX_DEPTH`] levels.

use std::collections::HashMap;

use super::marker::*;
use super::structures::{Node, Path, PathParts, Relationship, UnboundRelationship};
use super::types::PackStreamValue;
use super::PackStreamError;

/// Maximum nesting depth of decoded values
pub const MAX_DEPTH: usize = 256;

/// PackStream decoder that reads values from a byte buffer.
pub struct PackStreamDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> PackStreamDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Get the current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get remaining bytes count.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if all data has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> Result<PackStreamValue, PackStreamError> {
        if self.depth >= MAX_DEPTH {
            return Err(PackStreamError::InvalidStructure(format!(
                "values nested deeper than {} levels",
                MAX_DEPTH
            )));
        }
        self.depth += 1;
        let value = self.decode_value();
        self.depth -= 1;
        value
    }

    fn decode_value(&mut self) -> Result<PackStreamValue, PackStreamError> {
        let marker = self.read_u8()?;
        match classify(marker) {
            MarkerKind::TinyInt(v) => Ok(PackStreamValue::Integer(v as i64)),
            MarkerKind::TinyString(len) => self.read_string_data(len).map(PackStreamValue::String),
            MarkerKind::TinyList(len) => self.read_list_data(len),
            MarkerKind::TinyMap(len) => self.read_map_data(len).map(PackStreamValue::Map),
            MarkerKind::TinyStruct(fields) => self.read_struct_data(fields),
            MarkerKind::Other(marker) => self.decode_other(marker),
        }
    }

    fn decode_other(&mut self, marker: u8) -> Result<PackStreamValue, PackStreamError> {
        match marker {
            NULL => Ok(PackStreamValue::Null),
            TRUE => Ok(PackStreamValue::Boolean(true)),
            FALSE => Ok(PackStreamValue::Boolean(false)),
            FLOAT_64 => Ok(PackStreamValue::Float(f64::from_be_bytes(self.read_array()?))),

            INT_8 => Ok(PackStreamValue::Integer(self.read_u8()? as i8 as i64)),
            INT_16 => Ok(PackStreamValue::Integer(i16::from_be_bytes(self.read_array()?) as i64)),
            INT_32 => Ok(PackStreamValue::Integer(i32::from_be_bytes(self.read_array()?) as i64)),
            INT_64 => Ok(PackStreamValue::Integer(i64::from_be_bytes(self.read_array()?))),

            STRING_8 | STRING_16 | STRING_32 => {
                let len = self.read_size(marker, STRING_8)?;
                self.read_string_data(len).map(PackStreamValue::String)
            }
            LIST_8 | LIST_16 | LIST_32 => {
                let len = self.read_size(marker, LIST_8)?;
                self.read_list_data(len)
            }
            MAP_8 | MAP_16 | MAP_32 => {
                let len = self.read_size(marker, MAP_8)?;
                self.read_map_data(len).map(PackStreamValue::Map)
            }
            STRUCT_8 | STRUCT_16 => {
                let len = self.read_size(marker, STRUCT_8)?;
                self.read_struct_data(len)
            }

            _ => Err(PackStreamError::UnknownMarker(marker)),
        }
    }

    /// Read a structure header, returning `(field_count, signature)`.
    ///
    /// Used by the message reader, which interprets the fields itself.
    pub fn read_struct_header(&mut self) -> Result<(usize, u8), PackStreamError> {
        let marker = self.read_u8()?;
        let fields = match classify(marker) {
            MarkerKind::TinyStruct(fields) => fields,
            MarkerKind::Other(STRUCT_8) | MarkerKind::Other(STRUCT_16) => {
                self.read_size(marker, STRUCT_8)?
            }
            _ => {
                return Err(PackStreamError::InvalidStructure(format!(
                    "expected structure marker, got 0x{:02X}",
                    marker
                )))
            }
        };
        let signature = self.read_u8()?;
        Ok((fields, signature))
    }

    /// Read the header of a list, returning its item count.
    pub fn read_list_header(&mut self) -> Result<usize, PackStreamError> {
        let marker = self.read_u8()?;
        match classify(marker) {
            MarkerKind::TinyList(len) => Ok(len),
            MarkerKind::Other(LIST_8 | LIST_16 | LIST_32) => self.read_size(marker, LIST_8),
            _ => Err(PackStreamError::InvalidStructure(format!(
                "expected list marker, got 0x{:02X}",
                marker
            ))),
        }
    }

    /// Decode the next value, which must be a map.
    pub fn decode_map(&mut self) -> Result<HashMap<String, PackStreamValue>, PackStreamError> {
        match self.decode()? {
            PackStreamValue::Map(map) => Ok(map),
            other => Err(PackStreamError::InvalidStructure(format!(
                "expected Map, got {}",
                other.type_name()
            ))),
        }
    }

    /// Decode the next value, which must be a list.
    pub fn decode_list(&mut self) -> Result<Vec<PackStreamValue>, PackStreamError> {
        match self.decode()? {
            PackStreamValue::List(list) => Ok(list),
            other => Err(PackStreamError::InvalidStructure(format!(
                "expected List, got {}",
                other.type_name()
            ))),
        }
    }

    /// Decode the next value, which must be a string.
    pub fn decode_string(&mut self) -> Result<String, PackStreamError> {
        match self.decode()? {
            PackStreamValue::String(s) => Ok(s),
            other => Err(PackStreamError::InvalidStructure(format!(
                "expected String, got {}",
                other.type_name()
            ))),
        }
    }

    fn decode_int(&mut self) -> Result<i64, PackStreamError> {
        match self.decode()? {
            PackStreamValue::Integer(i) => Ok(i),
            other => Err(PackStreamError::InvalidStructure(format!(
                "expected Integer, got {}",
                other.type_name()
            ))),
        }
    }

    fn read_string_data(&mut self, len: usize) -> Result<String, PackStreamError> {
        let bytes = self.read_bytes(len)?;
        let s = std::str::from_utf8(bytes).map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))?;
        Ok(s.to_string())
    }

    fn read_list_data(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        Ok(PackStreamValue::List(items))
    }

    fn read_map_data(&mut self, len: usize) -> Result<HashMap<String, PackStreamValue>, PackStreamError> {
        let mut map = HashMap::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            let key = match self.decode()? {
                PackStreamValue::String(s) => s,
                _ => return Err(PackStreamError::InvalidMapKey),
            };
            let value = self.decode()?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn read_struct_data(&mut self, fields: usize) -> Result<PackStreamValue, PackStreamError> {
        let signature = self.read_u8()?;
        match signature {
            NODE => self.read_node_fields(fields).map(PackStreamValue::Node),
            RELATIONSHIP => self
                .read_relationship_fields(fields)
                .map(PackStreamValue::Relationship),
            PATH => self.read_path_fields(fields).map(PackStreamValue::Path),
            // Only valid inside a path
            UNBOUND_RELATIONSHIP => Err(PackStreamError::InvalidStructure(
                "unbound relationship outside of a path".into(),
            )),
            other => Err(PackStreamError::UnknownStructure(other)),
        }
    }

    /// Read the next value as a node structure.
    fn read_node(&mut self) -> Result<Node, PackStreamError> {
        let (fields, signature) = self.read_struct_header()?;
        if signature != NODE {
            return Err(PackStreamError::InvalidStructure(format!(
                "expected NODE in path, got 0x{:02X}",
                signature
            )));
        }
        self.read_node_fields(fields)
    }

    fn read_node_fields(&mut self, fields: usize) -> Result<Node, PackStreamError> {
        check_arity(NODE, NODE_FIELDS, fields)?;
        let id = self.decode_int()?;
        let labels = self
            .decode_list()?
            .into_iter()
            .map(|v| match v {
                PackStreamValue::String(s) => Ok(s),
                other => Err(PackStreamError::InvalidStructure(format!(
                    "Node label must be String, got {}",
                    other.type_name()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let properties = self.decode_map()?;
        Ok(Node::new(id, labels, properties))
    }

    fn read_relationship_fields(&mut self, fields: usize) -> Result<Relationship, PackStreamError> {
        check_arity(RELATIONSHIP, RELATIONSHIP_FIELDS, fields)?;
        let id = self.decode_int()?;
        let start = self.decode_int()?;
        let end = self.decode_int()?;
        let rel_type = self.decode_string()?;
        let properties = self.decode_map()?;
        Ok(Relationship::new(id, start, end, rel_type, properties))
    }

    fn read_unbound_relationship(&mut self) -> Result<UnboundRelationship, PackStreamError> {
        let (fields, signature) = self.read_struct_header()?;
        if signature != UNBOUND_RELATIONSHIP {
            return Err(PackStreamError::InvalidStructure(format!(
                "expected UNBOUND_RELATIONSHIP in path, got 0x{:02X}",
                signature
            )));
        }
        check_arity(UNBOUND_RELATIONSHIP, UNBOUND_RELATIONSHIP_FIELDS, fields)?;
        Ok(UnboundRelationship {
            id: self.decode_int()?,
            rel_type: self.decode_string()?,
            properties: self.decode_map()?,
        })
    }

    fn read_path_fields(&mut self, fields: usize) -> Result<Path, PackStreamError> {
        check_arity(PATH, PATH_FIELDS, fields)?;

        let count = self.read_list_header()?;
        let mut nodes = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            nodes.push(self.read_node()?);
        }

        let count = self.read_list_header()?;
        let mut relationships = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            relationships.push(self.read_unbound_relationship()?);
        }

        let count = self.read_list_header()?;
        let mut indices = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            indices.push(self.decode_int()?);
        }

        Path::from_wire(PathParts {
            nodes,
            relationships,
            indices,
        })
    }

    /// Read the explicit size that follows a sized marker. `base` is the
    /// 8-bit variant of the marker family; the 16- and 32-bit variants follow
    /// it directly.
    fn read_size(&mut self, marker: u8, base: u8) -> Result<usize, PackStreamError> {
        match marker - base {
            0 => Ok(self.read_u8()? as usize),
            1 => Ok(u16::from_be_bytes(self.read_array()?) as usize),
            _ => Ok(u32::from_be_bytes(self.read_array()?) as usize),
        }
    }

    fn read_u8(&mut self) -> Result<u8, PackStreamError> {
        let byte = *self.data.get(self.pos).ok_or(PackStreamError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PackStreamError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PackStreamError> {
        if self.remaining() < len {
            return Err(PackStreamError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

fn check_arity(signature: u8, expected: usize, actual: usize) -> Result<(), PackStreamError> {
    if expected != actual {
        return Err(PackStreamError::StructureArity {
            name: structure_name(signature),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Decode a single value from bytes.
///
/// Trailing bytes after the value are an error.
pub fn decode(data: &[u8]) -> Result<PackStreamValue, PackStreamError> {
    let mut decoder = PackStreamDecoder::new(data);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(PackStreamError::InvalidStructure(format!(
            "{} trailing bytes after value",
            decoder.remaining()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tiny_values() {
        assert_eq!(decode(&[0xC0]).unwrap(), PackStreamValue::Null);
        assert_eq!(decode(&[0x2A]).unwrap(), PackStreamValue::Integer(42));
        assert_eq!(decode(&[0xFF]).unwrap(), PackStreamValue::Integer(-1));
        assert_eq!(decode(&[0x81, 0x41]).unwrap(), PackStreamValue::String("A".into()));
        assert_eq!(decode(&[0x90]).unwrap(), PackStreamValue::List(Vec::new()));
    }

    #[test]
    fn test_decode_sized_ints() {
        assert_eq!(decode(&[0xC8, 0xEF]).unwrap(), PackStreamValue::Integer(-17));
        assert_eq!(decode(&[0xC9, 0x00, 0x80]).unwrap(), PackStreamValue::Integer(128));
        assert_eq!(
            decode(&[0xCA, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            PackStreamValue::Integer(-1)
        );
    }

    #[test]
    fn test_truncated_input_fails() {
        assert!(matches!(decode(&[]), Err(PackStreamError::UnexpectedEof)));
        assert!(matches!(decode(&[0xC9, 0x00]), Err(PackStreamError::UnexpectedEof)));
        assert!(matches!(decode(&[0x83, 0x41]), Err(PackStreamError::UnexpectedEof)));
        assert!(matches!(decode(&[0x92, 0x01]), Err(PackStreamError::UnexpectedEof)));
    }

    #[test]
    fn test_huge_declared_length_does_not_allocate() {
        // LIST_32 claiming u32::MAX items with no payload
        let result = decode(&[0xD6, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(PackStreamError::UnexpectedEof)));
        let result = decode(&[0xD2, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(PackStreamError::UnexpectedEof)));
    }

    #[test]
    fn test_unknown_marker() {
        assert!(matches!(decode(&[0xE0]), Err(PackStreamError::UnknownMarker(0xE0))));
        assert!(matches!(decode(&[0xCC]), Err(PackStreamError::UnknownMarker(0xCC))));
    }

    #[test]
    fn test_invalid_map_key() {
        // {1: 1}
        assert!(matches!(decode(&[0xA1, 0x01, 0x01]), Err(PackStreamError::InvalidMapKey)));
    }

    #[test]
    fn test_invalid_utf8() {
        assert!(matches!(decode(&[0x81, 0xFF]), Err(PackStreamError::InvalidUtf8(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        assert!(decode(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_node_arity_mismatch() {
        let err = decode(&[0xB0, NODE]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid message received, serialized NODE structures should have 3 fields, \
             received NODE structure has 0 fields."
        );
    }

    #[test]
    fn test_relationship_arity_mismatch() {
        let err = decode(&[0xB3, RELATIONSHIP, 0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(
            err,
            PackStreamError::StructureArity {
                name: "RELATIONSHIP",
                expected: 5,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_unknown_structure() {
        assert!(matches!(
            decode(&[0xB0, 0x44]),
            Err(PackStreamError::UnknownStructure(0x44))
        ));
    }

    #[test]
    fn test_read_struct_header() {
        let mut decoder = PackStreamDecoder::new(&[0xB2, 0x10, 0x80, 0xA0]);
        assert_eq!(decoder.read_struct_header().unwrap(), (2, 0x10));
        assert_eq!(decoder.decode_string().unwrap(), "");
        assert!(decoder.decode_map().unwrap().is_empty());
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_node_label_type_checked() {
        // Node(1, [1], {})
        let err = decode(&[0xB3, NODE, 0x01, 0x91, 0x01, 0xA0]).unwrap_err();
        assert!(matches!(err, PackStreamError::InvalidStructure(_)));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let mut data = vec![0x91; 2_000_000];
        data.push(0xC0);
        let err = decode(&data).unwrap_err();
        assert!(err.to_string().contains("nested deeper than 256 levels"));

        let mut data = vec![0xA1, 0x81, 0x6B].repeat(MAX_DEPTH);
        data.push(0xC0);
        assert!(matches!(decode(&data), Err(PackStreamError::InvalidStructure(_))));
    }

    #[test]
    fn test_nesting_within_limit() {
        let mut data = vec![0x91; MAX_DEPTH - 1];
        data.push(0x01);
        let mut value = decode(&data).unwrap();
        for _ in 0..MAX_DEPTH - 1 {
            value = match value {
                PackStreamValue::List(mut items) => items.remove(0),
                other => panic!("expected list, got {:?}", other),
            };
        }
        assert_eq!(value, PackStreamValue::Integer(1));
    }
}
