use std::collections::HashMap;
use std::fmt;

use crate::document::{Document, Identifier};
use crate::error::QueryError;
use crate::store::RawCursor;

/// Per-document post-processing applied as the cursor is drained.
pub type Processor = Box<dyn FnMut(Document) -> Result<Document, QueryError> + Send>;

/// Lazy result of a read. Wraps the store cursor, runs every document through
/// the read path (fold, key decode, codec decode) and carries similarity
/// scores keyed by the string form of `_id`.
pub struct QueryCursor {
    raw: RawCursor,
    process: Option<Processor>,
    scores: HashMap<String, f64>,
}

impl QueryCursor {
    pub fn new(raw: RawCursor) -> Self {
        Self {
            raw,
            process: None,
            scores: HashMap::new(),
        }
    }

    pub fn from_documents(documents: Vec<Document>) -> Self {
        Self::new(Box::new(documents.into_iter().map(Ok)))
    }

    pub fn with_processor(mut self, process: Processor) -> Self {
        self.process = Some(process);
        self
    }

    pub fn with_scores(mut self, scores: HashMap<String, f64>) -> Self {
        self.scores = scores;
        self
    }

    pub fn scores(&self) -> &HashMap<String, f64> {
        &self.scores
    }

    pub fn score(&self, id: &Identifier) -> Option<f64> {
        self.scores.get(&id.to_string()).copied()
    }

    /// Drain the cursor, stopping at the first error.
    pub fn try_collect(self) -> Result<Vec<Document>, QueryError> {
        self.collect()
    }
}

impl Iterator for QueryCursor {
    type Item = Result<Document, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        let doc = match self.raw.next()? {
            Ok(doc) => doc,
            Err(err) => return Some(Err(err.into())),
        };
        Some(match self.process.as_mut() {
            Some(process) => process(doc),
            None => Ok(doc),
        })
    }
}

impl fmt::Debug for QueryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCursor")
            .field("processed", &self.process.is_some())
            .field("scores", &self.scores)
            .finish()
    }
}
