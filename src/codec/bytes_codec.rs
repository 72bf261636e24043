use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{CodecError, DocumentCodec, FieldType, Schema};
use crate::document::{Document, Value, SCHEMA_KEY};

/// Stores `Bytes` fields as base64 strings and stamps encoded documents with
/// the schema identifier under `_schema`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl DocumentCodec for Base64Codec {
    fn encode(&self, document: Document, schema: Option<&Schema>) -> Result<Document, CodecError> {
        let Some(schema) = schema else {
            return Ok(document);
        };

        let mut encoded = Document::new();
        for (field, value) in document {
            let value = match (schema.field_type(&field), value) {
                (FieldType::Bytes, Value::Bytes(data)) => Value::String(STANDARD.encode(data)),
                (FieldType::Bytes, Value::Null) => Value::Null,
                (FieldType::Bytes, other) => {
                    return Err(CodecError::FieldType {
                        field,
                        expected: FieldType::Bytes,
                        found: other.type_name(),
                    })
                }
                (FieldType::Raw, other) => other,
            };
            encoded.insert(field, value);
        }
        encoded.insert(SCHEMA_KEY, schema.identifier.as_str());
        Ok(encoded)
    }

    fn decode(&self, document: Document, schema: Option<&Schema>) -> Result<Document, CodecError> {
        let Some(schema) = schema else {
            return Ok(document);
        };

        let mut decoded = Document::new();
        for (field, value) in document {
            let value = match (schema.field_type(&field), value) {
                (FieldType::Bytes, Value::String(text)) => {
                    let data = STANDARD.decode(text).map_err(|e| CodecError::Decode {
                        field: field.clone(),
                        message: e.to_string(),
                    })?;
                    Value::Bytes(data)
                }
                (_, other) => other,
            };
            decoded.insert(field, value);
        }
        Ok(decoded)
    }
}
