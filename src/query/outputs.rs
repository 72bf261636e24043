//! Outputs join: attach model outputs stored in side collections to the
//! documents they were computed from.
//!
//! Outputs for predict id `p` live in the collection `_outputs.p`, one row per
//! source document: `{"_source": <base _id>, "_outputs": {"p": <value>}}`.
//! A find carrying `outputs(p, ..)` markers, or filtering on `_outputs.p...`,
//! compiles to an aggregation:
//!
//! ```text
//! $match(base filter)?
//! for each predict id:
//!     $lookup(from "_outputs.p", _id == _source, as "_outputs__p")
//!     $match(deferred constraints on p)?
//!     $unwind("_outputs__p", preserve null and empty arrays)
//! $project?
//! $limit?
//! ```
//!
//! The alias replaces every `.` with `__` because some stores reject dots in
//! `as`. [`ResultFolder`] turns the joined aliases back into one `_outputs`
//! mapping per result.

use indexmap::{IndexMap, IndexSet};

use super::{Method, OperationSequence, QueryResult};
use crate::cursor::QueryCursor;
use crate::datalayer::Datalayer;
use crate::document::{
    Document, Value, BLOBS_KEY, BUILDS_KEY, FILES_KEY, ID_KEY, OUTPUTS_KEY, SCHEMA_KEY, SOURCE_KEY,
};
use crate::error::QueryError;
use crate::store::Stage;

const DEFERRED_PREFIX: &str = "_outputs.";
const ALIAS_PREFIX: &str = "_outputs__";

/// Name of the side collection holding the outputs of `predict_id`.
pub fn outputs_collection(predict_id: &str) -> String {
    format!("{}.{}", OUTPUTS_KEY, predict_id)
}

/// Field the joined rows of `predict_id` are attached under.
pub fn join_alias(predict_id: &str) -> String {
    outputs_collection(predict_id).replace('.', "__")
}

/// Does executing this read need the join pipeline?
pub(crate) fn requires_join(query: &OperationSequence) -> bool {
    query
        .operations()
        .any(|op| matches!(op.method(), Method::Outputs))
        || query
            .operations()
            .filter(|op| op.method().is_find_like())
            .filter_map(|op| op.document_arg(0).ok().flatten())
            .any(|filter| filter.keys().any(|key| key.starts_with(DEFERRED_PREFIX)))
}

/// Split a find filter into the constraints on base documents and the ones
/// that can only be checked after joining, grouped by predict id.
///
/// Only keys that start with `_outputs.` are deferred; `_outputs.` anywhere
/// else in a key is an ordinary base field path.
fn split_filter(filter: Document) -> (Document, IndexMap<String, Document>) {
    let mut base = Document::new();
    let mut deferred: IndexMap<String, Document> = IndexMap::new();
    for (key, value) in filter {
        match key.strip_prefix(DEFERRED_PREFIX) {
            Some(rest) => {
                let predict_id = rest.split('.').next().unwrap_or_default().to_string();
                deferred.entry(predict_id).or_default().insert(key, value);
            }
            None => {
                base.insert(key, value);
            }
        }
    }
    (base, deferred)
}

/// The compiled aggregation for an outputs query.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputsPlan {
    pub pipeline: Vec<Stage>,
    /// Joined predict ids: requested ones first, then those only named in
    /// the filter.
    pub predict_ids: Vec<String>,
    /// The query was a `find_one`; at most one document is read.
    pub single: bool,
}

impl OutputsPlan {
    pub fn compile(query: &OperationSequence) -> Result<Self, QueryError> {
        let index = query
            .single("find", |m| m.is_find_like())?
            .ok_or_else(|| QueryError::InvalidArgument("outputs join needs a find".into()))?;
        let find = query.get(index).ok_or_else(|| {
            QueryError::InvalidArgument("outputs join needs a find".into())
        })?;
        let single = matches!(find.method(), Method::FindOne);
        let limit = match (single, query.limit_value()?) {
            (true, _) => Some(1),
            (false, limit) => limit,
        };

        let mut predict_ids: IndexSet<String> = IndexSet::new();
        for op in query.operations().filter(|op| matches!(op.method(), Method::Outputs)) {
            for arg in op.args() {
                let id = arg.as_str().ok_or_else(|| {
                    QueryError::InvalidArgument(format!(
                        "outputs expects predict ids, got {}",
                        arg.type_name()
                    ))
                })?;
                predict_ids.insert(id.to_string());
            }
        }

        let (base, deferred) = split_filter(find.filter()?);
        predict_ids.extend(deferred.keys().cloned());

        let mut pipeline = Vec::new();
        if !base.is_empty() {
            pipeline.push(Stage::Match(base.clone()));
        }

        let mut aliases = Vec::with_capacity(predict_ids.len());
        for predict_id in &predict_ids {
            let alias = join_alias(predict_id);
            pipeline.push(Stage::Lookup {
                from: outputs_collection(predict_id),
                local_field: ID_KEY.to_string(),
                foreign_field: SOURCE_KEY.to_string(),
                as_field: alias.clone(),
            });
            if let Some(constraints) = deferred.get(predict_id) {
                let joined = constraints
                    .iter()
                    .map(|(key, value)| (format!("{}.{}", alias, key), value.clone()))
                    .collect();
                pipeline.push(Stage::Match(joined));
            }
            pipeline.push(Stage::Unwind {
                path: alias.clone(),
                preserve_null_and_empty_arrays: true,
            });
            aliases.push(alias);
        }

        if let Some(projection) = join_projection(find.document_arg(1)?, &base, &aliases) {
            pipeline.push(Stage::Project(projection));
        }
        if let Some(n) = limit {
            pipeline.push(Stage::Limit(n));
        }

        Ok(Self {
            pipeline,
            predict_ids: predict_ids.into_iter().collect(),
            single,
        })
    }

    /// A folder that knows the aliases this plan joins under.
    pub fn folder(&self) -> ResultFolder {
        ResultFolder::new(&self.predict_ids)
    }
}

/// The `$project` of a join. Inclusion projections are widened so the
/// folder still sees metadata, base filter fields and the joined aliases.
fn join_projection(
    requested: Option<&Document>,
    base: &Document,
    aliases: &[String],
) -> Option<Document> {
    let requested = requested?;
    let id_only = requested.len() == 1 && requested.contains_key(ID_KEY);
    let inclusive = requested.iter().any(|(_, flag)| flag.is_truthy());
    if id_only || !inclusive {
        return Some(requested.clone());
    }

    let mut projection = requested.clone();
    for key in [SCHEMA_KEY, BUILDS_KEY, FILES_KEY, BLOBS_KEY] {
        projection.insert(key, 1);
    }
    for key in base.keys().filter(|key| !key.starts_with('$')) {
        projection.insert(key.as_str(), 1);
    }
    for alias in aliases {
        projection.insert(alias.as_str(), 1);
    }
    Some(projection)
}

/// Folds joined aliases of one result back into `_outputs`.
///
/// The alias mangling is not reversible on its own (`a__b` and `a.b` share
/// an alias), so the folder maps aliases back through the predict ids it
/// was built with. Unknown aliases fall back to undoing the mangling.
#[derive(Debug, Clone, Default)]
pub struct ResultFolder {
    predict_ids: IndexMap<String, String>,
}

impl ResultFolder {
    pub fn new<I, S>(predict_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let predict_ids = predict_ids
            .into_iter()
            .map(|id| (join_alias(id.as_ref()), id.as_ref().to_string()))
            .collect();
        Self { predict_ids }
    }

    fn predict_id(&self, alias: &str) -> String {
        if let Some(predict_id) = self.predict_ids.get(alias) {
            return predict_id.clone();
        }
        let unmangled = alias.replace("__", ".");
        unmangled
            .strip_prefix(DEFERRED_PREFIX)
            .unwrap_or(&unmangled)
            .to_string()
    }

    pub fn fold(&self, mut doc: Document) -> Document {
        let aliases: Vec<String> = doc
            .keys()
            .filter(|key| key.starts_with(ALIAS_PREFIX))
            .cloned()
            .collect();
        if aliases.is_empty() {
            return doc;
        }

        let mut outputs = take_document(&mut doc, OUTPUTS_KEY);
        let mut builds = take_document(&mut doc, BUILDS_KEY);
        let mut files = take_document(&mut doc, FILES_KEY);
        let mut blobs = take_document(&mut doc, BLOBS_KEY);

        for alias in aliases {
            let joined = doc.remove(&alias);
            let predict_id = self.predict_id(&alias);

            // a preserved null means nothing was joined
            let Some(Value::Document(row)) = joined else {
                continue;
            };
            if let Some(output) = row.get_document(OUTPUTS_KEY).and_then(|o| o.get(&predict_id)) {
                outputs.insert(predict_id.as_str(), output.clone());
            }
            if let Some(sub) = row.get_document(BUILDS_KEY) {
                builds.merge(sub.clone());
            }
            if let Some(sub) = row.get_document(FILES_KEY) {
                files.merge(sub.clone());
            }
            if let Some(sub) = row.get_document(BLOBS_KEY) {
                blobs.merge(sub.clone());
            }
        }

        doc.insert(OUTPUTS_KEY, outputs);
        doc.insert(BUILDS_KEY, builds);
        doc.insert(FILES_KEY, files);
        doc.insert(BLOBS_KEY, blobs);
        doc
    }
}

fn take_document(doc: &mut Document, key: &str) -> Document {
    doc.remove(key)
        .and_then(Value::into_document)
        .unwrap_or_default()
}

/// Run an outputs query as an aggregation.
pub(crate) fn execute(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let plan = OutputsPlan::compile(query)?;
    tracing::debug!(
        table = query.table(),
        predict_ids = ?plan.predict_ids,
        stages = plan.pipeline.len(),
        "compiled outputs join"
    );

    let raw = db.store().aggregate(query.table(), &plan.pipeline)?;
    let mut cursor = QueryCursor::new(raw).with_processor(super::executor::reader(
        db,
        query.table(),
        Some(plan.folder()),
    ));
    if plan.single {
        return Ok(QueryResult::Document(cursor.next().transpose()?));
    }
    Ok(QueryResult::Cursor(cursor))
}
