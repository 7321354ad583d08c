//! # Property bag - ordered, typed configuration for one service instance.
//!
//! A [`PropertyBag`] maps string keys to tagged scalar values. It is
//! attached to a service at creation time and is immutable afterwards
//! except via explicit replace ([`PropertyBag::set`] before install, or
//! a full bag swap by the owning registry).
//!
//! ## Rules
//! - Keys are ordered (BTreeMap), so iteration and `Debug` output are stable.
//! - Reads are typed and fallible: a missing key or a type mismatch is a
//!   [`PropertyError`], which callers surface as a `start()` failure.
//! - Values are cheap to clone (`Arc<str>` for strings, `Copy` scalars).
//!
//! ## Example
//! ```rust
//! use compvisor::{PropertyBag, PropertyValue};
//!
//! let props = PropertyBag::new()
//!     .with("address", "127.0.0.1:8001")
//!     .with("priority", 10i64)
//!     .with("scope", "partition-a");
//!
//! assert_eq!(props.get_str("address").unwrap().as_ref(), "127.0.0.1:8001");
//! assert_eq!(props.get_int("priority").unwrap(), 10);
//! assert!(props.get_bool("priority").is_err()); // type mismatch
//! assert!(props.get_str("missing").is_err());   // missing key
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PropertyError;

/// Tagged scalar value stored in a [`PropertyBag`].
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// UTF-8 string (shared, cheap to clone).
    Str(Arc<str>),
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit integer.
    Uint(u64),
    /// Boolean flag.
    Bool(bool),
    /// 64-bit float.
    Float(f64),
}

impl PropertyValue {
    /// Returns the stable type name used in mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Str(_) => "str",
            PropertyValue::Int(_) => "int",
            PropertyValue::Uint(_) => "uint",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Float(_) => "float",
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(Arc::from(v))
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(Arc::from(v.as_str()))
    }
}

impl From<Arc<str>> for PropertyValue {
    fn from(v: Arc<str>) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::Uint(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

/// Ordered mapping from string key to a tagged scalar value.
///
/// Configures one service instance. Read access is typed and fallible;
/// see the module docs for the error contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    entries: BTreeMap<Arc<str>, PropertyValue>,
}

impl PropertyBag {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<Arc<str>>, value: impl Into<PropertyValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<Arc<str>>, value: impl Into<PropertyValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the raw tagged value, if present.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the bag has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &PropertyValue)> {
        self.entries.iter()
    }

    /// Reads a string value.
    pub fn get_str(&self, key: &str) -> Result<Arc<str>, PropertyError> {
        match self.lookup(key)? {
            PropertyValue::Str(s) => Ok(s.clone()),
            other => Err(self.mismatch(key, "str", other)),
        }
    }

    /// Reads a signed integer value.
    pub fn get_int(&self, key: &str) -> Result<i64, PropertyError> {
        match self.lookup(key)? {
            PropertyValue::Int(v) => Ok(*v),
            other => Err(self.mismatch(key, "int", other)),
        }
    }

    /// Reads an unsigned integer value.
    pub fn get_uint(&self, key: &str) -> Result<u64, PropertyError> {
        match self.lookup(key)? {
            PropertyValue::Uint(v) => Ok(*v),
            other => Err(self.mismatch(key, "uint", other)),
        }
    }

    /// Reads a boolean value.
    pub fn get_bool(&self, key: &str) -> Result<bool, PropertyError> {
        match self.lookup(key)? {
            PropertyValue::Bool(v) => Ok(*v),
            other => Err(self.mismatch(key, "bool", other)),
        }
    }

    /// Reads a float value.
    pub fn get_float(&self, key: &str) -> Result<f64, PropertyError> {
        match self.lookup(key)? {
            PropertyValue::Float(v) => Ok(*v),
            other => Err(self.mismatch(key, "float", other)),
        }
    }

    fn lookup(&self, key: &str) -> Result<&PropertyValue, PropertyError> {
        self.entries.get(key).ok_or_else(|| PropertyError::MissingKey {
            key: key.to_string(),
        })
    }

    fn mismatch(&self, key: &str, expected: &'static str, found: &PropertyValue) -> PropertyError {
        PropertyError::TypeMismatch {
            key: key.to_string(),
            expected,
            found: found.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_reads_succeed() {
        let bag = PropertyBag::new()
            .with("name", "conn-1")
            .with("port", 8001u64)
            .with("retries", -1i64)
            .with("verbose", true)
            .with("ratio", 0.5f64);

        assert_eq!(bag.get_str("name").unwrap(), "conn-1".into());
        assert_eq!(bag.get_uint("port").unwrap(), 8001);
        assert_eq!(bag.get_int("retries").unwrap(), -1);
        assert!(bag.get_bool("verbose").unwrap());
        assert_eq!(bag.get_float("ratio").unwrap(), 0.5);
    }

    #[test]
    fn missing_key_is_reported() {
        let bag = PropertyBag::new();
        let err = bag.get_str("absent").unwrap_err();
        assert_eq!(err.as_label(), "property_missing_key");
    }

    #[test]
    fn type_mismatch_names_both_types() {
        let bag = PropertyBag::new().with("port", 8001u64);
        match bag.get_str("port").unwrap_err() {
            PropertyError::TypeMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, "str");
                assert_eq!(found, "uint");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn replace_overwrites() {
        let mut bag = PropertyBag::new().with("scope", "a");
        bag.set("scope", "b");
        assert_eq!(bag.get_str("scope").unwrap(), "b".into());
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn iteration_is_key_ordered() {
        let bag = PropertyBag::new().with("b", 1i64).with("a", 2i64);
        let keys: Vec<_> = bag.iter().map(|(k, _)| k.as_ref()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
