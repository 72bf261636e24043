//! Operation sequences and their compilation into store calls.
//!
//! A query is an immutable [`OperationSequence`]; its [`Flavour`] picks the
//! execution strategy. Reads come back as a [`QueryCursor`](crate::QueryCursor),
//! writes as the affected ids.
//!
//! ## Example
//!
//! ```ignore
//! let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new()));
//! let docs = db.table("documents");
//!
//! docs.insert_many(vec![doc!({"x": 1}), doc!({"x": 2})]).execute()?;
//! let ids = docs.update_many(doc!({"x": {"$gt": 1}}), doc!({"$set": {"y": true}}))
//!     .execute()?
//!     .into_ids()?;
//! ```

mod executor;
mod flavour;
mod operation;
pub(crate) mod outputs;
mod sequence;
mod similarity;

pub use flavour::{classify, Flavour, QueryType};
pub use operation::{Method, Operation};
pub use outputs::{join_alias, outputs_collection, OutputsPlan, ResultFolder};
pub use sequence::{restrict_to_ids, OperationSequence};
pub use similarity::{LikeParams, SimilarityError, SimilaritySearch};

pub(crate) use executor::execute;

use crate::bulk::BulkWriteOutcome;
use crate::cursor::QueryCursor;
use crate::document::{Document, Identifier};
use crate::error::QueryError;

/// What executing a sequence produced. The variant follows the flavour.
#[derive(Debug)]
pub enum QueryResult {
    Cursor(QueryCursor),
    Document(Option<Document>),
    Ids(Vec<Identifier>),
    Bulk(BulkWriteOutcome),
}

impl QueryResult {
    fn kind(&self) -> &'static str {
        match self {
            QueryResult::Cursor(_) => "cursor",
            QueryResult::Document(_) => "document",
            QueryResult::Ids(_) => "ids",
            QueryResult::Bulk(_) => "bulk outcome",
        }
    }

    fn mismatch(&self, wanted: &str) -> QueryError {
        QueryError::InvalidArgument(format!("expected {}, query produced {}", wanted, self.kind()))
    }

    pub fn into_cursor(self) -> Result<QueryCursor, QueryError> {
        match self {
            QueryResult::Cursor(cursor) => Ok(cursor),
            other => Err(other.mismatch("cursor")),
        }
    }

    pub fn into_document(self) -> Result<Option<Document>, QueryError> {
        match self {
            QueryResult::Document(doc) => Ok(doc),
            other => Err(other.mismatch("document")),
        }
    }

    pub fn into_ids(self) -> Result<Vec<Identifier>, QueryError> {
        match self {
            QueryResult::Ids(ids) => Ok(ids),
            other => Err(other.mismatch("ids")),
        }
    }

    pub fn into_bulk(self) -> Result<BulkWriteOutcome, QueryError> {
        match self {
            QueryResult::Bulk(outcome) => Ok(outcome),
            other => Err(other.mismatch("bulk outcome")),
        }
    }

    /// Drain a cursor into documents; a single document reads as a
    /// one-element (or empty) list.
    pub fn into_documents(self) -> Result<Vec<Document>, QueryError> {
        match self {
            QueryResult::Cursor(cursor) => cursor.try_collect(),
            QueryResult::Document(doc) => Ok(doc.into_iter().collect()),
            other => Err(other.mismatch("documents")),
        }
    }
}
