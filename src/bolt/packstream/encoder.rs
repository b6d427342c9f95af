//! PackStream encoder.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use super::marker::*;
use super::structures::{Node, Path, Relationship, UnboundRelationship};
use super::types::PackStreamValue;
use super::PackStreamError;

/// PackStream encoder that writes values to a byte buffer.
///
/// The buffer is kept between calls; [`clear`](Self::clear) resets it
/// without giving the allocation back.
#[derive(Debug)]
pub struct PackStreamEncoder {
    buffer: BytesMut,
}

impl Default for PackStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PackStreamEncoder {
    /// Create a new encoder with default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new encoder with specified buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Consume the encoder and return the bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buffer
    }

    /// Get the bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Move the encoded bytes out, leaving the encoder empty.
    pub fn split(&mut self) -> BytesMut {
        self.buffer.split()
    }

    /// Encode a PackStreamValue.
    pub fn encode(&mut self, value: &PackStreamValue) -> Result<(), PackStreamError> {
        match value {
            PackStreamValue::Null => {
                self.encode_null();
                Ok(())
            }
            PackStreamValue::Boolean(b) => {
                self.encode_bool(*b);
                Ok(())
            }
            PackStreamValue::Integer(i) => {
                self.encode_int(*i);
                Ok(())
            }
            PackStreamValue::Float(f) => {
                self.encode_float(*f);
                Ok(())
            }
            PackStreamValue::String(s) => self.encode_string(s),
            PackStreamValue::List(l) => self.encode_list(l),
            PackStreamValue::Map(m) => self.encode_map(m),
            PackStreamValue::Node(n) => self.encode_node(n),
            PackStreamValue::Relationship(r) => self.encode_relationship(r),
            PackStreamValue::Path(p) => self.encode_path(p),
        }
    }

    /// Encode null.
    pub fn encode_null(&mut self) {
        self.buffer.put_u8(NULL);
    }

    /// Encode a boolean.
    pub fn encode_bool(&mut self, value: bool) {
        self.buffer.put_u8(if value { TRUE } else { FALSE });
    }

    /// Encode an integer using the smallest representation.
    pub fn encode_int(&mut self, value: i64) {
        if can_encode_tiny_int(value) {
            self.buffer.put_u8(value as u8);
        } else if value >= i8::MIN as i64 && value <= i8::MAX as i64 {
            self.buffer.put_u8(INT_8);
            self.buffer.put_i8(value as i8);
        } else if value >= i16::MIN as i64 && value <= i16::MAX as i64 {
            self.buffer.put_u8(INT_16);
            self.buffer.put_i16(value as i16);
        } else if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
            self.buffer.put_u8(INT_32);
            self.buffer.put_i32(value as i32);
        } else {
            self.buffer.put_u8(INT_64);
            self.buffer.put_i64(value);
        }
    }

    /// Encode a float (always 64-bit).
    pub fn encode_float(&mut self, value: f64) {
        self.buffer.put_u8(FLOAT_64);
        self.buffer.put_f64(value);
    }

    /// Encode a string.
    pub fn encode_string(&mut self, value: &str) -> Result<(), PackStreamError> {
        let bytes = value.as_bytes();
        self.encode_size_header("string", bytes.len(), TINY_STRING_BASE, STRING_8, STRING_16, STRING_32)?;
        self.buffer.put_slice(bytes);
        Ok(())
    }

    /// Encode a list.
    pub fn encode_list(&mut self, values: &[PackStreamValue]) -> Result<(), PackStreamError> {
        self.encode_list_header(values.len())?;
        for value in values {
            self.encode(value)?;
        }
        Ok(())
    }

    /// Encode only the header of a list with `len` items.
    pub fn encode_list_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        self.encode_size_header("list", len, TINY_LIST_BASE, LIST_8, LIST_16, LIST_32)
    }

    /// Encode a map.
    pub fn encode_map(
        &mut self,
        map: &HashMap<String, PackStreamValue>,
    ) -> Result<(), PackStreamError> {
        self.encode_map_header(map.len())?;
        for (key, value) in map {
            self.encode_string(key)?;
            self.encode(value)?;
        }
        Ok(())
    }

    /// Encode only the header of a map with `len` entries.
    pub fn encode_map_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        self.encode_size_header("map", len, TINY_MAP_BASE, MAP_8, MAP_16, MAP_32)
    }

    /// Encode a structure header: marker with field count, then signature.
    pub fn encode_struct_header(&mut self, signature: u8, fields: usize) -> Result<(), PackStreamError> {
        if fields <= TINY_SIZE_MAX {
            self.buffer.put_u8(TINY_STRUCT_BASE + fields as u8);
        } else if fields <= u8::MAX as usize {
            self.buffer.put_u8(STRUCT_8);
            self.buffer.put_u8(fields as u8);
        } else if fields <= u16::MAX as usize {
            self.buffer.put_u8(STRUCT_16);
            self.buffer.put_u16(fields as u16);
        } else {
            return Err(PackStreamError::ValueTooLarge("structure fields", fields));
        }
        self.buffer.put_u8(signature);
        Ok(())
    }

    /// Encode a node.
    pub fn encode_node(&mut self, node: &Node) -> Result<(), PackStreamError> {
        self.encode_struct_header(NODE, NODE_FIELDS)?;
        self.encode_int(node.id);
        self.encode_list_header(node.labels.len())?;
        for label in &node.labels {
            self.encode_string(label)?;
        }
        self.encode_map(&node.properties)
    }

    /// Encode a relationship.
    pub fn encode_relationship(&mut self, rel: &Relationship) -> Result<(), PackStreamError> {
        self.encode_struct_header(RELATIONSHIP, RELATIONSHIP_FIELDS)?;
        self.encode_int(rel.id);
        self.encode_int(rel.start_node_id);
        self.encode_int(rel.end_node_id);
        self.encode_string(&rel.rel_type)?;
        self.encode_map(&rel.properties)
    }

    fn encode_unbound_relationship(&mut self, rel: &UnboundRelationship) -> Result<(), PackStreamError> {
        self.encode_struct_header(UNBOUND_RELATIONSHIP, UNBOUND_RELATIONSHIP_FIELDS)?;
        self.encode_int(rel.id);
        self.encode_string(&rel.rel_type)?;
        self.encode_map(&rel.properties)
    }

    /// Encode a path in its compressed wire form.
    pub fn encode_path(&mut self, path: &Path) -> Result<(), PackStreamError> {
        let parts = path.to_wire();
        self.encode_struct_header(PATH, PATH_FIELDS)?;
        self.encode_list_header(parts.nodes.len())?;
        for node in &parts.nodes {
            self.encode_node(node)?;
        }
        self.encode_list_header(parts.relationships.len())?;
        for rel in &parts.relationships {
            self.encode_unbound_relationship(rel)?;
        }
        self.encode_list_header(parts.indices.len())?;
        for index in &parts.indices {
            self.encode_int(*index);
        }
        Ok(())
    }

    fn encode_size_header(
        &mut self,
        kind: &'static str,
        len: usize,
        tiny_base: u8,
        marker_8: u8,
        marker_16: u8,
        marker_32: u8,
    ) -> Result<(), PackStreamError> {
        if len <= TINY_SIZE_MAX {
            self.buffer.put_u8(tiny_base + len as u8);
        } else if len <= u8::MAX as usize {
            self.buffer.put_u8(marker_8);
            self.buffer.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buffer.put_u8(marker_16);
            self.buffer.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buffer.put_u8(marker_32);
            self.buffer.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge(kind, len));
        }
        Ok(())
    }
}

/// Encode a single value to bytes.
pub fn encode(value: &PackStreamValue) -> Result<BytesMut, PackStreamError> {
    let mut encoder = PackStreamEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}
