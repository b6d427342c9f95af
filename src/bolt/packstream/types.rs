//! PackStream value types.

use std::collections::HashMap;

use super::structures::{Node, Path, Relationship};

/// A value that can be carried by PackStream.
///
/// Encoding is total over this type. Graph values are fixed-shape
/// structures on the wire and get their own variants here instead of a
/// generic tag + fields form.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamValue {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// List of values
    List(Vec<PackStreamValue>),
    /// Map of string keys to values
    Map(HashMap<String, PackStreamValue>),
    /// Graph node
    Node(Node),
    /// Graph relationship
    Relationship(Relationship),
    /// Alternating node/relationship sequence
    Path(Path),
}

impl PackStreamValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, PackStreamValue::Null)
    }

    /// Try to get as boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PackStreamValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PackStreamValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as float. Integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PackStreamValue::Float(f) => Some(*f),
            PackStreamValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PackStreamValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as list reference.
    pub fn as_list(&self) -> Option<&[PackStreamValue]> {
        match self {
            PackStreamValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Try to get as map reference.
    pub fn as_map(&self) -> Option<&HashMap<String, PackStreamValue>> {
        match self {
            PackStreamValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Try to get as node reference.
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            PackStreamValue::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Try to get as relationship reference.
    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            PackStreamValue::Relationship(r) => Some(r),
            _ => None,
        }
    }

    /// Try to get as path reference.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            PackStreamValue::Path(p) => Some(p),
            _ => None,
        }
    }

    /// Get the type name for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            PackStreamValue::Null => "Null",
            PackStreamValue::Boolean(_) => "Boolean",
            PackStreamValue::Integer(_) => "Integer",
            PackStreamValue::Float(_) => "Float",
            PackStreamValue::String(_) => "String",
            PackStreamValue::List(_) => "List",
            PackStreamValue::Map(_) => "Map",
            PackStreamValue::Node(_) => "Node",
            PackStreamValue::Relationship(_) => "Relationship",
            PackStreamValue::Path(_) => "Path",
        }
    }
}

impl From<bool> for PackStreamValue {
    fn from(v: bool) -> Self {
        PackStreamValue::Boolean(v)
    }
}

impl From<i64> for PackStreamValue {
    fn from(v: i64) -> Self {
        PackStreamValue::Integer(v)
    }
}

impl From<i32> for PackStreamValue {
    fn from(v: i32) -> Self {
        PackStreamValue::Integer(v as i64)
    }
}

impl From<f64> for PackStreamValue {
    fn from(v: f64) -> Self {
        PackStreamValue::Float(v)
    }
}

impl From<String> for PackStreamValue {
    fn from(v: String) -> Self {
        PackStreamValue::String(v)
    }
}

impl From<&str> for PackStreamValue {
    fn from(v: &str) -> Self {
        PackStreamValue::String(v.to_string())
    }
}

impl From<Vec<PackStreamValue>> for PackStreamValue {
    fn from(v: Vec<PackStreamValue>) -> Self {
        PackStreamValue::List(v)
    }
}

impl From<HashMap<String, PackStreamValue>> for PackStreamValue {
    fn from(v: HashMap<String, PackStreamValue>) -> Self {
        PackStreamValue::Map(v)
    }
}

impl From<Node> for PackStreamValue {
    fn from(v: Node) -> Self {
        PackStreamValue::Node(v)
    }
}

impl From<Relationship> for PackStreamValue {
    fn from(v: Relationship) -> Self {
        PackStreamValue::Relationship(v)
    }
}

impl From<Path> for PackStreamValue {
    fn from(v: Path) -> Self {
        PackStreamValue::Path(v)
    }
}

impl<T: Into<PackStreamValue>> From<Option<T>> for PackStreamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PackStreamValue::Null)
    }
}
