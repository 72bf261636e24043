use std::fmt;

use crate::codec::CodecError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A mutating bulk operation has no derivable target ids.
    MissingTargetIds { operation: String },
    /// More than one operation of a kind that must appear at most once.
    AmbiguousOperation { method: String },
    InvalidArgument(String),
    /// The operation sequence maps to no executable flavour.
    Unsupported { chain: String },
    /// The sequence was built without a datalayer and cannot execute.
    Unbound,
    SimilarityUnavailable,
    Similarity(String),
    Codec(String),
    Store(StoreError),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::MissingTargetIds { operation } => write!(
                f,
                "{} requires target ids in its filter; selecting all documents is not supported",
                operation
            ),
            QueryError::AmbiguousOperation { method } => {
                write!(f, "multiple {} operations found", method)
            }
            QueryError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            QueryError::Unsupported { chain } => {
                write!(f, "unsupported operation sequence: {}", chain)
            }
            QueryError::Unbound => write!(f, "query is not bound to a datalayer"),
            QueryError::SimilarityUnavailable => {
                write!(f, "no similarity search configured on the datalayer")
            }
            QueryError::Similarity(msg) => write!(f, "similarity search error: {}", msg),
            QueryError::Codec(msg) => write!(f, "codec error: {}", msg),
            QueryError::Store(err) => write!(f, "store error: {}", err),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        QueryError::Store(err)
    }
}

impl From<CodecError> for QueryError {
    fn from(err: CodecError) -> Self {
        QueryError::Codec(err.to_string())
    }
}
