//! Typed payload encoding and schema lookup.
//!
//! Writes go through [`DocumentCodec::encode`] with the table's schema and
//! reads through [`DocumentCodec::decode`]. A failed schema lookup is never
//! fatal: callers pass `None` and the codec writes the raw value.

mod bytes_codec;
mod registry;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::document::Document;

pub use bytes_codec::Base64Codec;
pub use registry::InMemorySchemaRegistry;

/// Wire type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Stored as-is.
    Raw,
    /// Binary payload, stored as a base64 string.
    Bytes,
}

/// Field types of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub identifier: String,
    pub fields: IndexMap<String, FieldType>,
}

impl Schema {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    pub fn field_type(&self, name: &str) -> FieldType {
        self.fields.get(name).copied().unwrap_or(FieldType::Raw)
    }
}

/// No schema is registered for a table. Non-fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaLookupMiss {
    pub table: String,
}

impl fmt::Display for SchemaLookupMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no schema registered for table {}", self.table)
    }
}

impl std::error::Error for SchemaLookupMiss {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A field did not have the shape its schema type requires.
    FieldType {
        field: String,
        expected: FieldType,
        found: &'static str,
    },
    Decode { field: String, message: String },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::FieldType {
                field,
                expected,
                found,
            } => write!(f, "field {} expected {:?}, found {}", field, expected, found),
            CodecError::Decode { field, message } => {
                write!(f, "failed to decode field {}: {}", field, message)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Lookup of table schemas.
pub trait SchemaRegistry: Send + Sync {
    fn schema_for(&self, table: &str) -> Result<Schema, SchemaLookupMiss>;
}

/// Encoding of typed payloads to their wire form and back.
pub trait DocumentCodec: Send + Sync {
    fn encode(&self, document: Document, schema: Option<&Schema>) -> Result<Document, CodecError>;

    fn decode(&self, document: Document, schema: Option<&Schema>) -> Result<Document, CodecError>;
}

/// Passes documents through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl DocumentCodec for RawCodec {
    fn encode(&self, document: Document, _schema: Option<&Schema>) -> Result<Document, CodecError> {
        Ok(document)
    }

    fn decode(&self, document: Document, _schema: Option<&Schema>) -> Result<Document, CodecError> {
        Ok(document)
    }
}
