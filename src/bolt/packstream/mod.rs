//! PackStream serialization format.
//!
//! PackStream is the binary serialization format used by the Bolt protocol
//! to encode values for transmission between client and server.
//!
//! # Supported Types
//!
//! - **Null**: Single byte marker
//! - **Boolean**: True/False markers
//! - **Integer**: Variable-length encoding (-2^63 to 2^63-1)
//! - **Float**: 64-bit IEEE 754
//! - **String**: UTF-8 encoded, variable length prefix
//! - **List**: Heterogeneous collections
//! - **Map**: String keys to arbitrary values
//!
//! # Graph Structures
//!
//! - **Node**: id, labels, properties
//! - **Relationship**: id, start_id, end_id, type, properties
//! - **Path**: unique nodes, unique unbound relationships, index sequence
//!
//! Every structure is checked against its fixed field count when decoded.

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod structures;
pub mod types;

pub use decoder::{decode, PackStreamDecoder};
pub use encoder::{encode, PackStreamEncoder};
pub use structures::{Node, Path, Relationship};
pub use types::PackStreamValue;

use std::fmt;

/// PackStream errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Unexpected end of input
    UnexpectedEof,
    /// Unknown marker byte
    UnknownMarker(u8),
    /// Invalid UTF-8 in string
    InvalidUtf8(String),
    /// Invalid map key (must be string)
    InvalidMapKey,
    /// Value too large to encode
    ValueTooLarge(&'static str, usize),
    /// Invalid structure format
    InvalidStructure(String),
    /// Structure with the wrong number of fields for its signature
    StructureArity {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Structure signature with no known meaning
    UnknownStructure(u8),
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => write!(f, "Unknown PackStream marker: 0x{:02X}", m),
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey => write!(f, "Map keys must be strings"),
            PackStreamError::ValueTooLarge(t, s) => write!(f, "{} too large: {} bytes", t, s),
            PackStreamError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
            PackStreamError::StructureArity {
                name,
                expected,
                actual,
            } => write!(
                f,
                "Invalid message received, serialized {name} structures should have {expected} fields, \
                 received {name} structure has {actual} fields."
            ),
            PackStreamError::UnknownStructure(sig) => {
                write!(f, "Unknown structure signature: 0x{:02X}", sig)
            }
        }
    }
}

impl std::error::Error for PackStreamError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn roundtrip(value: PackStreamValue) {
        let bytes = encode(&value).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_roundtrip_scalars() {
        roundtrip(PackStreamValue::Null);
        roundtrip(PackStreamValue::Boolean(true));
        for v in [0i64, -16, -17, 127, 128, -129, 32_768, -2_147_483_649, i64::MAX, i64::MIN] {
            roundtrip(PackStreamValue::Integer(v));
        }
        for v in [0.0f64, -1.25, f64::MAX, f64::MIN_POSITIVE] {
            roundtrip(PackStreamValue::Float(v));
        }
    }

    #[test]
    fn test_roundtrip_string_boundaries() {
        for len in [0usize, 15, 16, 255, 256, 65_535, 65_536] {
            roundtrip(PackStreamValue::String("x".repeat(len)));
        }
        roundtrip(PackStreamValue::String("héllo wörld ✓".into()));
    }

    #[test]
    fn test_roundtrip_containers() {
        let mut inner = HashMap::new();
        inner.insert("items".to_string(), PackStreamValue::List(vec![1.into(), 2.into()]));
        inner.insert("none".to_string(), PackStreamValue::Null);

        roundtrip(PackStreamValue::List(vec![
            PackStreamValue::Map(inner.clone()),
            PackStreamValue::String("two".into()),
            PackStreamValue::Map(inner),
        ]));

        let big: HashMap<String, PackStreamValue> =
            (0..300).map(|i| (format!("k{i}"), PackStreamValue::Integer(i))).collect();
        roundtrip(PackStreamValue::Map(big));
    }

    #[test]
    fn test_roundtrip_graph_values() {
        let mut props = HashMap::new();
        props.insert("name".to_string(), PackStreamValue::String("Alice".into()));

        let alice = Node::new(1, vec!["Person".into()], props.clone());
        let bob = Node::new(2, vec!["Person".into(), "Admin".into()], HashMap::new());
        let knows = Relationship::new(10, 1, 2, "KNOWS", props);

        roundtrip(alice.clone().into());
        roundtrip(knows.clone().into());

        let path = Path::new(vec![alice, bob], vec![knows]).unwrap();
        roundtrip(path.into());
    }

    #[test]
    fn test_roundtrip_path_against_direction() {
        let a = Node::new(1, Vec::new(), HashMap::new());
        let b = Node::new(2, Vec::new(), HashMap::new());
        let c = Node::new(3, Vec::new(), HashMap::new());
        let path = Path::new(
            vec![a.clone(), b, c, a],
            vec![
                Relationship::new(7, 2, 1, "R", HashMap::new()),
                Relationship::new(8, 2, 3, "R", HashMap::new()),
                Relationship::new(9, 1, 3, "R", HashMap::new()),
            ],
        )
        .unwrap();
        roundtrip(PackStreamValue::List(vec![path.into(), PackStreamValue::Null]));
    }

    #[test]
    fn test_path_arity_enforced() {
        // PATH with 2 fields
        let err = decode(&[0xB2, marker::PATH, 0x90, 0x90]).unwrap_err();
        assert_eq!(
            err,
            PackStreamError::StructureArity {
                name: "PATH",
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_unbound_relationship_arity_enforced() {
        // PATH([Node(1,[],{})], [r with 1 field], [])
        let bytes = [
            0xB3,
            marker::PATH,
            0x91,
            0xB3,
            marker::NODE,
            0x01,
            0x90,
            0xA0,
            0x91,
            0xB1,
            marker::UNBOUND_RELATIONSHIP,
            0x01,
            0x90,
        ];
        let err = decode(&bytes).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid message received, serialized UNBOUND_RELATIONSHIP structures should have \
             3 fields, received UNBOUND_RELATIONSHIP structure has 1 fields."
        );
    }
}
