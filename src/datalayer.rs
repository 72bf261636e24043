//! Datalayer - the handle queries are built from and executed against.
//!
//! Bundles the document store with its collaborators: the value codec and
//! schema registry applied on writes and reads, an optional similarity
//! ranker for `like`, and an optional publisher notified after mutations.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docquery::{doc, Datalayer, InMemoryDocumentStore};
//!
//! let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new()));
//! let docs = db.table("documents");
//! docs.insert_one(doc!({"x": 1})).execute()?;
//! let found = docs.find_one(doc!({"x": 1})).execute()?.into_document()?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::codec::{Base64Codec, DocumentCodec, Schema, SchemaRegistry};
use crate::config::DatalayerConfig;
use crate::error::QueryError;
use crate::notify::{Change, ChangePublisher};
use crate::query::{outputs_collection, OperationSequence, QueryResult, SimilaritySearch};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct Datalayer {
    store: Arc<dyn DocumentStore>,
    codec: Arc<dyn DocumentCodec>,
    schemas: Option<Arc<dyn SchemaRegistry>>,
    similarity: Option<Arc<dyn SimilaritySearch>>,
    publisher: Option<Arc<Mutex<dyn ChangePublisher>>>,
    config: DatalayerConfig,
}

impl Datalayer {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            codec: Arc::new(Base64Codec),
            schemas: None,
            similarity: None,
            publisher: None,
            config: DatalayerConfig::default(),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn DocumentCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_schemas(mut self, schemas: Arc<dyn SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn SimilaritySearch>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn with_publisher<P: ChangePublisher + 'static>(mut self, publisher: P) -> Self {
        self.publisher = Some(Arc::new(Mutex::new(publisher)));
        self
    }

    pub fn with_config(mut self, config: DatalayerConfig) -> Self {
        self.config = config;
        self
    }

    /// An empty query on `name`, bound to this datalayer.
    pub fn table(&self, name: impl Into<String>) -> OperationSequence {
        OperationSequence::bound(name, self.clone())
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn codec(&self) -> Arc<dyn DocumentCodec> {
        Arc::clone(&self.codec)
    }

    pub fn similarity(&self) -> Option<&dyn SimilaritySearch> {
        self.similarity.as_deref()
    }

    pub fn config(&self) -> &DatalayerConfig {
        &self.config
    }

    /// The schema registered for `table`. Values of tables without one are
    /// stored as given.
    pub fn schema_for(&self, table: &str) -> Option<Schema> {
        let registry = self.schemas.as_ref()?;
        match registry.schema_for(table) {
            Ok(schema) => Some(schema),
            Err(miss) => {
                tracing::debug!(table, "{}; storing values raw", miss);
                None
            }
        }
    }

    /// Execute `query` here, whatever datalayer it was built from.
    pub fn execute(&self, query: &OperationSequence) -> Result<QueryResult, QueryError> {
        let result = crate::query::execute(query, self)?;
        if self.config.notify_changes && query.query_type().is_mutation() {
            self.notify(query, &result);
        }
        Ok(result)
    }

    fn notify(&self, query: &OperationSequence, result: &QueryResult) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let ids: Vec<String> = match result {
            QueryResult::Ids(ids) => ids.iter().map(ToString::to_string).collect(),
            QueryResult::Bulk(outcome) => outcome
                .updated_ids
                .iter()
                .chain(&outcome.deleted_ids)
                .map(ToString::to_string)
                .collect(),
            _ => return,
        };
        if ids.is_empty() {
            return;
        }

        let change = Change {
            table: query.table().to_string(),
            kind: query.query_type(),
            ids,
        };
        let published = match publisher.lock() {
            Ok(mut publisher) => publisher.publish(&change).map_err(|e| e.to_string()),
            Err(_) => Err("publisher lock poisoned".to_string()),
        };
        if let Err(err) = published {
            tracing::warn!(table = change.table.as_str(), "change not published: {}", err);
        }
    }

    /// Drop the outputs collection of `predict_id`. Returns true if it existed.
    pub fn drop_outputs(&self, predict_id: &str) -> Result<bool, QueryError> {
        let collection = outputs_collection(predict_id);
        let dropped = self.store.drop_collection(&collection)?;
        tracing::info!(collection = collection.as_str(), dropped, "dropped outputs");
        Ok(dropped)
    }
}

impl fmt::Debug for Datalayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datalayer")
            .field("schemas", &self.schemas.is_some())
            .field("similarity", &self.similarity.is_some())
            .field("publisher", &self.publisher.is_some())
            .field("config", &self.config)
            .finish()
    }
}
