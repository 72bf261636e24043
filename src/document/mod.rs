//! Documents - ordered field maps, values and store identifiers.
//!
//! A [`Document`] keeps insertion order, so filters and projections built
//! by the compiler reach the store in the order they were written.
//!
//! ## Example
//!
//! ```ignore
//! use docquery::{doc, Document, Value};
//!
//! let d = doc!({"x": 1, "_outputs": {"m1": [0.1, 0.2]}});
//! assert_eq!(d.get("x"), Some(&Value::Int(1)));
//! ```

mod key_codec;
mod value;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use key_codec::{decode_keys, encode_keys};
pub use value::Value;

pub const ID_KEY: &str = "_id";
pub const OUTPUTS_KEY: &str = "_outputs";
pub const BUILDS_KEY: &str = "_builds";
pub const FILES_KEY: &str = "_files";
pub const BLOBS_KEY: &str = "_blobs";
pub const FOLD_KEY: &str = "_fold";
pub const SOURCE_KEY: &str = "_source";
pub const SCHEMA_KEY: &str = "_schema";

/// Ordered mapping of field names to values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(IndexMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Value::as_document)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert a field, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a field, preserving the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overwrite fields of `self` with those of `other` (last write wins).
    pub fn merge(&mut self, other: Document) {
        for (key, value) in other {
            self.0.insert(key, value);
        }
    }

    /// Build a document from a JSON value. Non-object JSON yields `None`.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        Value::from(value).into_document()
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Document(self.clone()).into()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Document {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The store's primary key.
///
/// Wraps a scalar value. The string form round-trips through [`Identifier::parse`]:
/// integers come back as integers, everything else as strings. A string key
/// that looks like an integer does not; use [`Identifier::matching`] when the
/// key type is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Value);

impl Identifier {
    /// A fresh random identifier (uuid v4, simple form).
    pub fn generate() -> Self {
        Identifier(Value::String(Uuid::new_v4().simple().to_string()))
    }

    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(i) => Identifier(Value::Int(i)),
            Err(_) => Identifier(Value::String(raw.to_string())),
        }
    }

    /// Every identifier whose string form is `raw`. A canonical integer
    /// string may name an integer or a string key, so it yields both.
    pub fn matching(raw: &str) -> Vec<Self> {
        let text = Identifier::from(raw);
        match Identifier::parse(raw) {
            int @ Identifier(Value::Int(_)) if int.to_string() == raw => vec![int, text],
            _ => vec![text],
        }
    }

    /// Wrap a scalar value. Null, arrays and documents are not identifiers.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null | Value::Array(_) | Value::Document(_) => None,
            scalar => Some(Identifier(scalar)),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl From<i64> for Identifier {
    fn from(i: i64) -> Self {
        Identifier(Value::Int(i))
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier(Value::String(s.to_string()))
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier(Value::String(s))
    }
}

impl From<Identifier> for Value {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

/// Collect identifiers into an array value, as used in `{"$in": [...]}`.
pub fn id_array(ids: &[Identifier]) -> Value {
    Value::Array(ids.iter().map(|id| id.as_value().clone()).collect())
}
