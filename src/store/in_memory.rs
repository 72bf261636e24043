//! InMemoryDocumentStore - Vec-backed document store for testing and development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    apply_update, matches, project, BulkWriteResult, DocumentStore, RawCursor, Stage,
    StoreError, UpdateResult, WriteModel,
};
use crate::document::{Document, Identifier, Value, ID_KEY};

type Collections = HashMap<String, Vec<Document>>;

/// In-memory document store. Collections keep insertion order.
///
/// One lock guards all collections, so every call (including `bulk_write`)
/// is atomic. Clone-friendly via Arc.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<Collections>>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of documents in a collection (0 if it does not exist).
    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self.read()?.get(collection).map_or(0, Vec::len))
    }

    pub fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>, StoreError> {
        self.collections
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>, StoreError> {
        self.collections
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))
    }
}

fn cursor(documents: Vec<Document>) -> RawCursor {
    Box::new(documents.into_iter().map(Ok))
}

fn id_of(doc: &Document) -> Option<&Value> {
    doc.get(ID_KEY)
}

/// Put `_id` first, generating one when missing, and reject duplicates.
fn prepare_insert(
    collection: &str,
    existing: &[Document],
    pending: &[Document],
    document: Document,
) -> Result<(Identifier, Document), StoreError> {
    let id = match document.get(ID_KEY) {
        Some(value) => Identifier::from_value(value.clone()).ok_or_else(|| {
            StoreError::Storage(format!("invalid _id of type {}", value.type_name()))
        })?,
        None => Identifier::generate(),
    };

    let taken = existing
        .iter()
        .chain(pending)
        .any(|doc| id_of(doc).map_or(false, |v| v.loose_eq(id.as_value())));
    if taken {
        return Err(StoreError::DuplicateKey {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    let mut stored = Document::new();
    stored.insert(ID_KEY, id.clone());
    for (key, value) in document {
        if key != ID_KEY {
            stored.insert(key, value);
        }
    }
    Ok((id, stored))
}

fn first_match(docs: &[Document], filter: &Document) -> Result<Option<usize>, StoreError> {
    for (index, doc) in docs.iter().enumerate() {
        if matches(doc, filter)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn replace_at(docs: &mut [Document], index: usize, replacement: Document) -> Result<bool, StoreError> {
    if replacement.keys().any(|k| k.starts_with('$')) {
        return Err(StoreError::InvalidUpdate(
            "replacement must not contain update operators".into(),
        ));
    }
    let current_id = docs[index].get(ID_KEY).cloned().unwrap_or_default();
    if let Some(new_id) = replacement.get(ID_KEY) {
        if !new_id.loose_eq(&current_id) {
            return Err(StoreError::InvalidUpdate("_id is immutable".into()));
        }
    }

    let mut stored = Document::new();
    stored.insert(ID_KEY, current_id);
    for (key, value) in replacement {
        if key != ID_KEY {
            stored.insert(key, value);
        }
    }
    let changed = docs[index] != stored;
    docs[index] = stored;
    Ok(changed)
}

fn lookup(
    docs: Vec<Document>,
    foreign: &[Document],
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
) -> Vec<Document> {
    docs.into_iter()
        .map(|mut doc| {
            let local = doc.get(local_field).cloned().unwrap_or_default();
            let joined: Vec<Value> = foreign
                .iter()
                .filter(|f| {
                    f.get(foreign_field)
                        .map_or(local.is_null(), |v| v.loose_eq(&local))
                })
                .map(|f| Value::Document(f.clone()))
                .collect();
            doc.insert(as_field, Value::Array(joined));
            doc
        })
        .collect()
}

fn unwind(docs: Vec<Document>, path: &str, preserve: bool) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        match doc.get(path).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut row = doc.clone();
                    row.insert(path, item);
                    out.push(row);
                }
            }
            Some(Value::Array(_)) | None => {
                if preserve {
                    doc.remove(path);
                    out.push(doc);
                }
            }
            Some(Value::Null) => {
                if preserve {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    out
}

impl DocumentStore for InMemoryDocumentStore {
    fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
        limit: Option<usize>,
    ) -> Result<RawCursor, StoreError> {
        let collections = self.read()?;
        let mut found = Vec::new();
        for doc in collections.get(collection).into_iter().flatten() {
            if limit.map_or(false, |n| found.len() >= n) {
                break;
            }
            if matches(doc, filter)? {
                found.push(match projection {
                    Some(p) => project(doc, p),
                    None => doc.clone(),
                });
            }
        }
        Ok(cursor(found))
    }

    fn find_one(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> Result<Option<Document>, StoreError> {
        let mut found = self.find(collection, filter, projection, Some(1))?;
        found.next().transpose()
    }

    fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Identifier>, StoreError> {
        let mut collections = self.write()?;
        let docs = collections.entry(collection.to_string()).or_default();

        let mut ids = Vec::with_capacity(documents.len());
        let mut pending = Vec::with_capacity(documents.len());
        for document in documents {
            let (id, stored) = prepare_insert(collection, docs, &pending, document)?;
            ids.push(id);
            pending.push(stored);
        }
        docs.extend(pending);
        Ok(ids)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, StoreError> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        let mut updated = docs.clone();
        let mut result = UpdateResult::default();
        for doc in updated.iter_mut() {
            if matches(doc, filter)? {
                result.matched_count += 1;
                if apply_update(doc, update)? {
                    result.modified_count += 1;
                }
            }
        }
        *docs = updated;
        Ok(result)
    }

    fn replace_one(
        &self,
        collection: &str,
        filter: &Document,
        replacement: Document,
    ) -> Result<UpdateResult, StoreError> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };
        match first_match(docs, filter)? {
            Some(index) => {
                let changed = replace_at(docs, index, replacement)?;
                Ok(UpdateResult {
                    matched_count: 1,
                    modified_count: changed as u64,
                })
            }
            None => Ok(UpdateResult::default()),
        }
    }

    fn delete_one(&self, collection: &str, filter: &Document) -> Result<u64, StoreError> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        match first_match(docs, filter)? {
            Some(index) => {
                docs.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64, StoreError> {
        let mut collections = self.write()?;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut doomed = Vec::with_capacity(docs.len());
        for doc in docs.iter() {
            doomed.push(matches(doc, filter)?);
        }
        let before = docs.len();
        let mut flags = doomed.into_iter();
        docs.retain(|_| !flags.next().unwrap_or(false));
        Ok((before - docs.len()) as u64)
    }

    fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteModel>,
    ) -> Result<BulkWriteResult, StoreError> {
        let mut collections = self.write()?;
        let mut docs = collections.get(collection).cloned().unwrap_or_default();
        let mut result = BulkWriteResult::default();

        for operation in operations {
            match operation {
                WriteModel::InsertOne { document } => {
                    let (_, stored) = prepare_insert(collection, &docs, &[], document)?;
                    docs.push(stored);
                    result.inserted_count += 1;
                }
                WriteModel::UpdateOne { filter, update } => {
                    if let Some(index) = first_match(&docs, &filter)? {
                        result.matched_count += 1;
                        if apply_update(&mut docs[index], &update)? {
                            result.modified_count += 1;
                        }
                    }
                }
                WriteModel::DeleteOne { filter } => {
                    if let Some(index) = first_match(&docs, &filter)? {
                        docs.remove(index);
                        result.deleted_count += 1;
                    }
                }
                WriteModel::ReplaceOne {
                    filter,
                    replacement,
                } => {
                    if let Some(index) = first_match(&docs, &filter)? {
                        result.matched_count += 1;
                        if replace_at(&mut docs, index, replacement)? {
                            result.modified_count += 1;
                        }
                    }
                }
            }
        }

        collections.insert(collection.to_string(), docs);
        Ok(result)
    }

    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> Result<RawCursor, StoreError> {
        let collections = self.read()?;
        let mut docs = collections.get(collection).cloned().unwrap_or_default();

        for stage in pipeline {
            docs = match stage {
                Stage::Match(filter) => {
                    let mut kept = Vec::with_capacity(docs.len());
                    for doc in docs {
                        if matches(&doc, filter)? {
                            kept.push(doc);
                        }
                    }
                    kept
                }
                Stage::Lookup {
                    from,
                    local_field,
                    foreign_field,
                    as_field,
                } => {
                    let foreign = collections.get(from).map(Vec::as_slice).unwrap_or(&[]);
                    lookup(docs, foreign, local_field, foreign_field, as_field)
                }
                Stage::Unwind {
                    path,
                    preserve_null_and_empty_arrays,
                } => unwind(docs, path, *preserve_null_and_empty_arrays),
                Stage::Project(projection) => {
                    docs.iter().map(|doc| project(doc, projection)).collect()
                }
                Stage::Limit(n) => {
                    docs.truncate(*n);
                    docs
                }
            };
        }

        Ok(cursor(docs))
    }

    fn drop_collection(&self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.write()?.remove(collection).is_some())
    }
}
