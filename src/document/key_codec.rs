//! Reversible escaping of field names that collide with store-reserved characters.
//!
//! Every reserved character `c` in a key is written as `<c>`; decoding turns
//! each `<c>` marker back into `c`. Keys that already contain a marker are not
//! guaranteed to survive a round trip.
//!
//! This is deliberately stricter than escaping only a leading reserved
//! character: `a.b` is stored as `a<.>b`, not left as a dotted path. Keys
//! written by a leading-only encoder still decode the same way.

use super::{Document, Value};

const RESERVED: &[char] = &['$', '.'];

/// Escape reserved characters in every key, recursing through nested
/// documents and arrays of documents.
pub fn encode_keys(doc: Document) -> Document {
    transform(doc, encode_key)
}

/// Reverse [`encode_keys`].
pub fn decode_keys(doc: Document) -> Document {
    transform(doc, decode_key)
}

fn transform(doc: Document, rename: fn(String) -> String) -> Document {
    doc.into_iter()
        .map(|(key, value)| (rename(key), transform_value(value, rename)))
        .collect()
}

fn transform_value(value: Value, rename: fn(String) -> String) -> Value {
    match value {
        Value::Document(doc) => Value::Document(transform(doc, rename)),
        // only documents directly inside an array are rewritten
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Document(doc) => Value::Document(transform(doc, rename)),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

fn encode_key(key: String) -> String {
    if !key.contains(RESERVED) {
        return key;
    }
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if RESERVED.contains(&c) {
            out.push('<');
            out.push(c);
            out.push('>');
        } else {
            out.push(c);
        }
    }
    out
}

fn decode_key(key: String) -> String {
    if !key.contains('<') {
        return key;
    }
    let mut out = String::with_capacity(key.len());
    let mut rest = key.as_str();
    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let bytes = tail.as_bytes();
        if bytes.len() >= 3 && RESERVED.contains(&(bytes[1] as char)) && bytes[2] == b'>' {
            out.push(bytes[1] as char);
            rest = &tail[3..];
        } else {
            out.push('<');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
