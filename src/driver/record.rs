//! Record - one row of a query result

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::{DriverError, DriverResult};
use super::Value;
use crate::bolt::{Node, Path, Relationship};

/// Query result record
///
/// Records of one result share their key list.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    /// Create a record
    pub fn new(keys: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// Column keys
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Values in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record has no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|i| self.values.get(i))
    }

    /// Value by index
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Whether `key` is a column
    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    pub fn get_bool(&self, key: &str) -> DriverResult<bool> {
        self.typed(key, "Boolean", Value::as_bool)
    }

    pub fn get_int(&self, key: &str) -> DriverResult<i64> {
        self.typed(key, "Integer", Value::as_int)
    }

    /// Float value; integers widen.
    pub fn get_float(&self, key: &str) -> DriverResult<f64> {
        self.typed(key, "Float", Value::as_float)
    }

    pub fn get_string(&self, key: &str) -> DriverResult<String> {
        self.typed(key, "String", |v| v.as_str().map(str::to_string))
    }

    pub fn get_node(&self, key: &str) -> DriverResult<Node> {
        self.typed(key, "Node", |v| v.as_node().cloned())
    }

    pub fn get_relationship(&self, key: &str) -> DriverResult<Relationship> {
        self.typed(key, "Relationship", |v| v.as_relationship().cloned())
    }

    pub fn get_path(&self, key: &str) -> DriverResult<Path> {
        self.typed(key, "Path", |v| v.as_path().cloned())
    }

    /// Keys and values as a map
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    fn typed<T>(
        &self,
        key: &str,
        expected: &str,
        convert: impl FnOnce(&Value) -> Option<T>,
    ) -> DriverResult<T> {
        let value = self
            .get(key)
            .ok_or_else(|| DriverError::type_conversion(format!("Key '{}' not found", key)))?;
        convert(value).ok_or_else(|| {
            DriverError::type_conversion(format!(
                "Cannot convert {} to {} for key '{}'",
                value.type_name(),
                expected,
                key
            ))
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {:?}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::iter::Zip<std::slice::Iter<'a, String>, std::slice::Iter<'a, Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter().zip(self.values.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new(
            Arc::from(vec!["name".to_string(), "age".to_string(), "nick".to_string()]),
            vec![Value::from("Alice"), Value::from(30i64), Value::Null],
        )
    }

    #[test]
    fn test_record_get() {
        let record = record();
        assert_eq!(record.len(), 3);
        assert_eq!(record.get("name"), Some(&Value::from("Alice")));
        assert_eq!(record.get_by_index(1), Some(&Value::Integer(30)));
        assert!(record.get("missing").is_none());
        assert!(record.contains_key("nick"));
    }

    #[test]
    fn test_record_get_typed() {
        let record = record();
        assert_eq!(record.get_string("name").unwrap(), "Alice");
        assert_eq!(record.get_int("age").unwrap(), 30);
        assert_eq!(record.get_float("age").unwrap(), 30.0);
    }

    #[test]
    fn test_record_get_typed_error() {
        let record = record();
        let err = record.get_int("name").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Type conversion error: Cannot convert String to Integer for key 'name'"
        );
        assert!(record.get_bool("missing").is_err());
    }

    #[test]
    fn test_record_to_map_and_display() {
        let record = record();
        assert_eq!(record.to_map().len(), 3);
        assert!(record.to_string().starts_with("{name: String(\"Alice\")"));
    }

    #[test]
    fn test_record_ref_iterator() {
        let record = record();
        let keys: Vec<&String> = (&record).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["name", "age", "nick"]);
    }
}
