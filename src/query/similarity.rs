//! Similarity-filtered reads.
//!
//! `like(..)` never runs on its own; it narrows a find through an external
//! ranker. Before the find (`like(..).find(..)`) the ranker searches the
//! whole index and the find is restricted to the ranked ids. After the find
//! (`find(..).like(..)`) the find's matches are the candidates the ranker may
//! choose from.

use std::collections::HashMap;
use std::fmt;

use super::{executor, restrict_to_ids, Method, Operation, OperationSequence, QueryResult};
use crate::datalayer::Datalayer;
use crate::document::{Document, Identifier, Value, ID_KEY};
use crate::error::QueryError;

/// Error type for similarity rankers.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityError {
    pub message: String,
}

impl SimilarityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SimilarityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SimilarityError {}

impl From<SimilarityError> for QueryError {
    fn from(err: SimilarityError) -> Self {
        QueryError::Similarity(err.message)
    }
}

/// A vector index that ranks document ids by similarity to a query value.
pub trait SimilaritySearch: Send + Sync {
    /// Up to `top_n` ids with their scores, best first. With
    /// `candidate_ids`, only those ids may be returned.
    fn rank(
        &self,
        query: &Value,
        candidate_ids: Option<&[String]>,
        index: &str,
        top_n: usize,
    ) -> Result<(Vec<String>, Vec<f64>), SimilarityError>;
}

const VECTOR_INDEX: &str = "vector_index";
const TOP_N: &str = "n";
const RANGE: &str = "range";
const QUERY: &str = "r";

/// Keyword arguments of `like`.
#[derive(Debug, Clone, PartialEq)]
pub struct LikeParams {
    vector_index: String,
    top_n: Option<usize>,
    range: Option<usize>,
}

impl LikeParams {
    pub fn new(vector_index: impl Into<String>) -> Self {
        Self {
            vector_index: vector_index.into(),
            top_n: None,
            range: None,
        }
    }

    pub fn top_n(mut self, n: usize) -> Self {
        self.top_n = Some(n);
        self
    }

    /// Bound the number of candidates a post-filter hands to the ranker.
    pub fn range(mut self, range: usize) -> Self {
        self.range = Some(range);
        self
    }

    pub(crate) fn apply(self, mut op: Operation) -> Operation {
        op = op.kwarg(VECTOR_INDEX, self.vector_index);
        if let Some(n) = self.top_n {
            op = op.kwarg(TOP_N, n);
        }
        if let Some(range) = self.range {
            op = op.kwarg(RANGE, range);
        }
        op
    }
}

/// A parsed `like` call.
struct LikeCall {
    query: Value,
    index: String,
    top_n: usize,
    range: Option<usize>,
}

fn count_kwarg(op: &Operation, key: &str) -> Result<Option<usize>, QueryError> {
    match op.kwargs().get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                QueryError::InvalidArgument(format!("like: {} must be a non-negative integer", key))
            }),
    }
}

impl LikeCall {
    fn parse(op: &Operation, default_top_n: usize) -> Result<Self, QueryError> {
        let query = op
            .args()
            .first()
            .or_else(|| op.kwargs().get(QUERY))
            .cloned()
            .ok_or_else(|| QueryError::InvalidArgument("like requires a query value".into()))?;
        let index = op
            .kwargs()
            .get(VECTOR_INDEX)
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::InvalidArgument("like requires a vector_index".into()))?
            .to_string();

        Ok(Self {
            query,
            index,
            top_n: count_kwarg(op, TOP_N)?.unwrap_or(default_top_n),
            range: count_kwarg(op, RANGE)?,
        })
    }

    fn rank(
        &self,
        db: &Datalayer,
        candidates: Option<&[String]>,
    ) -> Result<(Vec<String>, HashMap<String, f64>), QueryError> {
        let ranker = db.similarity().ok_or(QueryError::SimilarityUnavailable)?;
        let (ids, scores) = ranker.rank(&self.query, candidates, &self.index, self.top_n)?;
        if ids.len() != scores.len() {
            return Err(QueryError::Similarity(format!(
                "ranker returned {} ids but {} scores",
                ids.len(),
                scores.len()
            )));
        }
        tracing::debug!(
            index = self.index.as_str(),
            candidates = candidates.map(<[String]>::len),
            ranked = ids.len(),
            "ranked by similarity"
        );

        let scores = ids.iter().cloned().zip(scores).collect();
        Ok((ids, scores))
    }
}

fn like_at(query: &OperationSequence, index: usize) -> Result<&Operation, QueryError> {
    query
        .get(index)
        .filter(|op| matches!(op.method(), Method::Like))
        .ok_or_else(|| QueryError::InvalidArgument(format!("expected like at position {}", index)))
}

fn with_scores(result: QueryResult, scores: HashMap<String, f64>) -> QueryResult {
    match result {
        QueryResult::Cursor(cursor) => QueryResult::Cursor(cursor.with_scores(scores)),
        other => other,
    }
}

/// `like(..).find(..)`: rank first, then find among the ranked ids.
pub(crate) fn pre_like(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let call = LikeCall::parse(like_at(query, 0)?, db.config().default_top_n)?;
    let find = query
        .get(1)
        .filter(|op| op.method().is_find_like())
        .ok_or_else(|| {
            QueryError::InvalidArgument("like must be directly followed by a find".into())
        })?;

    let (ranked, scores) = call.rank(db, None)?;
    let ids: Vec<Identifier> = ranked.iter().flat_map(|id| Identifier::matching(id)).collect();
    let narrowed = find.with_filter(restrict_to_ids(find.filter()?, &ids));
    let rest = query.slice(1..query.len()).replace_at(0, narrowed);
    Ok(with_scores(executor::execute(&rest, db)?, scores))
}

/// `find(..).like(..)`: the find's matches, up to `range`, are the
/// candidates; the result is the find restricted to the ranked ids.
pub(crate) fn post_like(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let call = LikeCall::parse(like_at(query, 1)?, db.config().default_top_n)?;
    let find = query.slice(0..1);

    let mut select = find.select_ids()?;
    if let Some(range) = call.range {
        select = select.limit(range);
    }
    let matched: Vec<Identifier> = executor::execute(&select, db)?
        .into_documents()?
        .into_iter()
        .filter_map(|mut doc: Document| doc.remove(ID_KEY).and_then(Identifier::from_value))
        .collect();
    let candidates: Vec<String> = matched.iter().map(ToString::to_string).collect();
    let native: HashMap<&str, &Identifier> = candidates
        .iter()
        .map(String::as_str)
        .zip(&matched)
        .collect();

    let (ranked, scores) = call.rank(db, Some(candidates.as_slice()))?;
    let ids: Vec<Identifier> = ranked
        .iter()
        .flat_map(|id| match native.get(id.as_str()) {
            Some(&known) => vec![known.clone()],
            None => Identifier::matching(id),
        })
        .collect();
    let selected = find.select_using_ids(&ids)?;
    Ok(with_scores(executor::execute(&selected, db)?, scores))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_call_reads_keywords_and_defaults() {
        let op = LikeParams::new("idx")
            .range(5)
            .apply(Operation::new(Method::Like).arg("cat"));
        let call = LikeCall::parse(&op, 100).unwrap();
        assert_eq!(call.query, Value::from("cat"));
        assert_eq!(call.index, "idx");
        assert_eq!(call.top_n, 100);
        assert_eq!(call.range, Some(5));
    }

    #[test]
    fn query_value_may_come_from_r() {
        let op = Operation::new(Method::Like)
            .kwarg("r", "dog")
            .kwarg("vector_index", "idx")
            .kwarg("n", 3);
        let call = LikeCall::parse(&op, 100).unwrap();
        assert_eq!(call.query, Value::from("dog"));
        assert_eq!(call.top_n, 3);
    }

    #[test]
    fn vector_index_is_required() {
        let op = Operation::new(Method::Like).arg("cat");
        assert!(matches!(
            LikeCall::parse(&op, 100),
            Err(QueryError::InvalidArgument(_))
        ));
    }
}
