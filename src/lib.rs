//! A declarative query compiler for document stores.
//!
//! Queries are immutable operation sequences (`find`, `like`, `outputs`,
//! `update_many`, `bulk_write`, ...). Executing one classifies it into a
//! flavour and compiles it to native store calls: id-resolving two-phase
//! writes, similarity pre/post filters, and aggregation pipelines that join
//! model outputs back onto their source documents.

pub mod bulk;
pub mod codec;
mod config;
mod cursor;
mod datalayer;
pub mod document;
mod error;
pub mod notify;
pub mod query;
pub mod store;

pub use bulk::{BulkBatcher, BulkOp, BulkOpKind, BulkWriteOutcome, PartialBatchWarning};
pub use codec::{
    Base64Codec, DocumentCodec, FieldType, InMemorySchemaRegistry, RawCodec, Schema,
    SchemaRegistry,
};
pub use config::DatalayerConfig;
pub use cursor::QueryCursor;
pub use datalayer::Datalayer;
pub use document::{decode_keys, encode_keys, Document, Identifier, Value};
pub use error::QueryError;
#[cfg(feature = "emitter")]
pub use notify::EmitterChangePublisher;
pub use notify::{Change, ChangePublisher, LogChangePublisher};
pub use query::{
    Flavour, LikeParams, OperationSequence, QueryResult, QueryType, SimilarityError,
    SimilaritySearch,
};
pub use store::{DocumentStore, InMemoryDocumentStore, StoreError};

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;

#[doc(hidden)]
pub use serde_json as __json;

/// Build a [`Document`] from JSON object syntax.
///
/// ```
/// let filter = docquery::doc!({"x": {"$gt": 1}});
/// assert_eq!(filter.len(), 1);
/// ```
///
/// Only object literals are accepted; anything else is a compile error
/// rather than an empty filter that matches every document.
///
/// ```compile_fail
/// let filter = docquery::doc!([{"_id": 1}]);
/// ```
#[macro_export]
macro_rules! doc {
    ({ $($body:tt)* }) => {
        // an object literal always converts
        $crate::Document::from_json($crate::__json::json!({ $($body)* })).unwrap_or_default()
    };
}
