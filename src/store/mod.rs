//! DocumentStore - the native operations the query compiler targets.
//!
//! The compiler never talks to a database directly. Every flavour bottoms
//! out in one of the calls below, and aggregation is expressed as an ordered
//! list of [`Stage`]s. `InMemoryDocumentStore` implements the protocol for
//! tests and development.

mod filter;
mod in_memory;

use std::fmt;

use crate::document::{Document, Identifier, Value};

pub use filter::{apply_update, matches, project};
pub use in_memory::InMemoryDocumentStore;

/// Lazily produced documents from a read call.
pub type RawCursor = Box<dyn Iterator<Item = Result<Document, StoreError>> + Send>;

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Storage-level error.
    Storage(String),
    /// An insert reused an existing `_id`.
    DuplicateKey { collection: String, id: String },
    InvalidFilter(String),
    InvalidUpdate(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Storage(msg) => write!(f, "storage error: {}", msg),
            StoreError::DuplicateKey { collection, id } => {
                write!(f, "duplicate key {} in {}", id, collection)
            }
            StoreError::InvalidFilter(msg) => write!(f, "invalid filter: {}", msg),
            StoreError::InvalidUpdate(msg) => write!(f, "invalid update: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// One stage of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Document),
    /// Left-outer join: every document gets an array field `as_field` holding
    /// the `from` documents whose `foreign_field` equals its `local_field`.
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// Fan an array field out into one document per element. `path` is a
    /// field name without the leading `$`.
    Unwind {
        path: String,
        preserve_null_and_empty_arrays: bool,
    },
    Project(Document),
    Limit(usize),
}

impl Stage {
    /// The stage in its native document form, e.g. `{"$limit": 5}`.
    pub fn to_document(&self) -> Document {
        let mut stage = Document::new();
        match self {
            Stage::Match(filter) => {
                stage.insert("$match", filter.clone());
            }
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => {
                let mut lookup = Document::new();
                lookup.insert("from", from.as_str());
                lookup.insert("localField", local_field.as_str());
                lookup.insert("foreignField", foreign_field.as_str());
                lookup.insert("as", as_field.as_str());
                stage.insert("$lookup", lookup);
            }
            Stage::Unwind {
                path,
                preserve_null_and_empty_arrays,
            } => {
                let mut unwind = Document::new();
                unwind.insert("path", format!("${}", path));
                unwind.insert("preserveNullAndEmptyArrays", *preserve_null_and_empty_arrays);
                stage.insert("$unwind", unwind);
            }
            Stage::Project(projection) => {
                stage.insert("$project", projection.clone());
            }
            Stage::Limit(n) => {
                stage.insert("$limit", *n);
            }
        }
        stage
    }
}

/// One store-native write of a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne { document: Document },
    UpdateOne { filter: Document, update: Document },
    DeleteOne { filter: Document },
    ReplaceOne { filter: Document, replacement: Document },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Counts reported by the store for a bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
}

/// Native operations of a document store.
///
/// Every call is a single blocking round trip. Cancellation and timeouts
/// belong to the implementation.
pub trait DocumentStore: Send + Sync {
    fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
        limit: Option<usize>,
    ) -> Result<RawCursor, StoreError>;

    fn find_one(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> Result<Option<Document>, StoreError>;

    /// Insert documents, returning assigned ids in input order.
    fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<Identifier>, StoreError>;

    fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
    ) -> Result<UpdateResult, StoreError>;

    fn replace_one(
        &self,
        collection: &str,
        filter: &Document,
        replacement: Document,
    ) -> Result<UpdateResult, StoreError>;

    /// Delete the first match. Returns the number of deleted documents.
    fn delete_one(&self, collection: &str, filter: &Document) -> Result<u64, StoreError>;

    fn delete_many(&self, collection: &str, filter: &Document) -> Result<u64, StoreError>;

    /// Apply a heterogeneous batch atomically.
    fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteModel>,
    ) -> Result<BulkWriteResult, StoreError>;

    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> Result<RawCursor, StoreError>;

    /// Drop a collection. Returns true if it existed.
    fn drop_collection(&self, collection: &str) -> Result<bool, StoreError>;
}

/// `{"_id": {"$in": ids}}`
pub fn ids_filter(ids: &[Identifier]) -> Document {
    let mut cond = Document::new();
    cond.insert("$in", crate::document::id_array(ids));
    let mut filter = Document::new();
    filter.insert(crate::document::ID_KEY, cond);
    filter
}

/// `{"_id": id}`
pub fn id_filter(id: &Identifier) -> Document {
    let mut filter = Document::new();
    filter.insert(crate::document::ID_KEY, Value::from(id.clone()));
    filter
}
