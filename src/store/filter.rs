//! Filter matching, projection and update operators for the in-memory store.
//!
//! Covers the subset the compiler emits: dotted paths (traversing arrays of
//! documents), `$and`/`$or`/`$nor`, comparison operators, `$in`/`$nin`,
//! `$exists`, `$size`, and the `$set`/`$unset`/`$inc` update operators.

use std::cmp::Ordering;

use super::StoreError;
use crate::document::{Document, Value, ID_KEY};

/// Does `doc` satisfy `filter`?
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, cond) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, cond)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, cond)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, cond)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(StoreError::InvalidFilter(format!(
                    "unknown top-level operator {}",
                    op
                )))
            }
            path => condition_holds(&resolve(doc, path), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, cond: &'a Value) -> Result<Vec<&'a Document>, StoreError> {
    cond.as_array()
        .ok_or_else(|| StoreError::InvalidFilter(format!("{} expects an array", op)))?
        .iter()
        .map(|clause| {
            clause
                .as_document()
                .ok_or_else(|| StoreError::InvalidFilter(format!("{} clauses must be documents", op)))
        })
        .collect()
}

/// All values reachable through a dotted path. Arrays of documents met on the
/// way are traversed element-wise.
fn resolve<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut segments = path.split('.');
    let mut current: Vec<&Value> = segments
        .next()
        .and_then(|first| doc.get(first))
        .into_iter()
        .collect();

    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Document(inner) => next.extend(inner.get(segment)),
                Value::Array(items) => {
                    for item in items {
                        if let Value::Document(inner) = item {
                            next.extend(inner.get(segment));
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

fn is_operator_document(cond: &Value) -> Option<&Document> {
    match cond {
        Value::Document(doc) if !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')) => {
            Some(doc)
        }
        _ => None,
    }
}

fn condition_holds(values: &[&Value], cond: &Value) -> Result<bool, StoreError> {
    let Some(ops) = is_operator_document(cond) else {
        return Ok(eq_any(values, cond));
    };

    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => eq_any(values, arg),
            "$ne" => !eq_any(values, arg),
            "$gt" => cmp_any(values, arg, |o| o == Ordering::Greater),
            "$gte" => cmp_any(values, arg, |o| o != Ordering::Less),
            "$lt" => cmp_any(values, arg, |o| o == Ordering::Less),
            "$lte" => cmp_any(values, arg, |o| o != Ordering::Greater),
            "$in" => in_any(values, op, arg)?,
            "$nin" => !in_any(values, op, arg)?,
            "$exists" => arg.is_truthy() != values.is_empty(),
            "$size" => {
                let size = arg
                    .as_i64()
                    .ok_or_else(|| StoreError::InvalidFilter("$size expects an integer".into()))?;
                values
                    .iter()
                    .any(|v| matches!(v, Value::Array(items) if items.len() as i64 == size))
            }
            other => {
                return Err(StoreError::InvalidFilter(format!(
                    "unknown operator {}",
                    other
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eq_any(values: &[&Value], target: &Value) -> bool {
    if values.is_empty() {
        return target.is_null();
    }
    values.iter().any(|value| {
        value.loose_eq(target)
            || matches!(value, Value::Array(items) if items.iter().any(|i| i.loose_eq(target)))
    })
}

fn cmp_any(values: &[&Value], target: &Value, accept: fn(Ordering) -> bool) -> bool {
    let holds = |v: &Value| v.compare(target).map_or(false, accept);
    values.iter().any(|value| match *value {
        Value::Array(items) => items.iter().any(holds),
        other => holds(other),
    })
}

fn in_any(values: &[&Value], op: &str, arg: &Value) -> Result<bool, StoreError> {
    let candidates = arg
        .as_array()
        .ok_or_else(|| StoreError::InvalidFilter(format!("{} expects an array", op)))?;
    Ok(candidates.iter().any(|candidate| eq_any(values, candidate)))
}

/// Apply a projection. Inclusion projections keep `_id` unless it is set to
/// a false value; exclusion projections drop the listed fields.
pub fn project(doc: &Document, projection: &Document) -> Document {
    let inclusive = projection.iter().any(|(_, flag)| flag.is_truthy());

    if !inclusive {
        let mut out = doc.clone();
        for (path, flag) in projection {
            if !flag.is_truthy() {
                remove_path(&mut out, path);
            }
        }
        return out;
    }

    let mut out = Document::new();
    let keep_id = projection.get(ID_KEY).map_or(true, Value::is_truthy);
    if keep_id {
        if let Some(id) = doc.get(ID_KEY) {
            out.insert(ID_KEY, id.clone());
        }
    }
    for (path, flag) in projection {
        if path != ID_KEY && flag.is_truthy() {
            copy_path(doc, &mut out, path);
        }
    }
    out
}

fn copy_path(src: &Document, dst: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(value) = src.get(path) {
                dst.insert(path, value.clone());
            }
        }
        Some((head, tail)) => {
            let Some(Value::Document(inner)) = src.get(head) else {
                return;
            };
            if !matches!(dst.get(head), Some(Value::Document(_))) {
                dst.insert(head, Document::new());
            }
            if let Some(Value::Document(sub)) = dst.get_mut(head) {
                copy_path(inner, sub, tail);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, tail)) => match doc.get_mut(head) {
            Some(Value::Document(inner)) => remove_path(inner, tail),
            _ => None,
        },
    }
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, tail)) => {
            if !matches!(doc.get(head), Some(Value::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Value::Document(inner)) = doc.get_mut(head) {
                set_path(inner, tail, value);
            }
        }
    }
}

fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, tail)) => doc.get_document(head).and_then(|inner| get_path(inner, tail)),
    }
}

/// Apply `$set`, `$unset` and `$inc` to `doc`. Returns whether anything changed.
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<bool, StoreError> {
    if update.is_empty() {
        return Err(StoreError::InvalidUpdate("update document is empty".into()));
    }
    let before = doc.clone();

    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| StoreError::InvalidUpdate(format!("{} expects a document", op)))?;
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    if path == ID_KEY {
                        return Err(StoreError::InvalidUpdate("_id is immutable".into()));
                    }
                    set_path(doc, path, value.clone());
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    remove_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let next = match (get_path(doc, path), delta) {
                        (None, d) => d.clone(),
                        (Some(Value::Int(a)), Value::Int(b)) => Value::Int(a + b),
                        (Some(current), d) => match (current.as_f64(), d.as_f64()) {
                            (Some(a), Some(b)) => Value::Float(a + b),
                            _ => {
                                return Err(StoreError::InvalidUpdate(format!(
                                    "cannot increment non-numeric field {}",
                                    path
                                )))
                            }
                        },
                    };
                    set_path(doc, path, next);
                }
            }
            other => {
                return Err(StoreError::InvalidUpdate(format!(
                    "unsupported update operator {}",
                    other
                )))
            }
        }
    }

    Ok(*doc != before)
}
