use std::fmt;
use std::sync::Arc;

use super::flavour::{classify, Flavour, QueryType};
use super::similarity::LikeParams;
use super::{outputs, Method, Operation, QueryResult};
use crate::bulk::BulkOp;
use crate::datalayer::Datalayer;
use crate::document::{
    decode_keys, encode_keys, Document, Identifier, Value, ID_KEY, OUTPUTS_KEY, SOURCE_KEY,
};
use crate::error::QueryError;
use crate::store::ids_filter;

/// An immutable, ordered list of operations against one table.
///
/// Builder methods return a new sequence and never touch `self`. Operations
/// are shared by pointer, so deriving a query from a prefix (e.g. the id-only
/// projection of a find) copies nothing but the pointers.
#[derive(Clone)]
pub struct OperationSequence {
    table: String,
    operations: Vec<Arc<Operation>>,
    db: Option<Datalayer>,
}

impl OperationSequence {
    /// An empty sequence that is not bound to a datalayer. It can be
    /// classified and compiled but not executed.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operations: Vec::new(),
            db: None,
        }
    }

    pub(crate) fn bound(table: impl Into<String>, db: Datalayer) -> Self {
        Self {
            table: table.into(),
            operations: Vec::new(),
            db: Some(db),
        }
    }

    /// Attach a datalayer, e.g. to a sequence read back with [`Self::from_document`].
    pub fn bind(mut self, db: Datalayer) -> Self {
        self.db = Some(db);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn datalayer(&self) -> Option<&Datalayer> {
        self.db.as_ref()
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.operations.get(index).map(Arc::as_ref)
    }

    pub fn last(&self) -> Option<&Operation> {
        self.operations.last().map(Arc::as_ref)
    }

    pub fn flavour(&self) -> Flavour {
        let methods: Vec<&Method> = self.operations().map(Operation::method).collect();
        classify(&methods)
    }

    pub fn query_type(&self) -> QueryType {
        self.flavour().query_type()
    }

    /// Execute against the bound datalayer.
    pub fn execute(&self) -> Result<QueryResult, QueryError> {
        let db = self.db.as_ref().ok_or(QueryError::Unbound)?;
        db.execute(self)
    }

    /// A new sequence with `operation` appended.
    pub fn push(&self, operation: Operation) -> Self {
        let mut operations = self.operations.clone();
        operations.push(Arc::new(operation));
        self.with_shared(operations)
    }

    fn with_shared(&self, operations: Vec<Arc<Operation>>) -> Self {
        Self {
            table: self.table.clone(),
            operations,
            db: self.db.clone(),
        }
    }

    /// A new sequence on the same table with the given operations.
    pub fn with_operations(&self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.with_shared(operations.into_iter().map(Arc::new).collect())
    }

    /// A new sequence keeping only `operations[range]`.
    pub(crate) fn slice(&self, range: std::ops::Range<usize>) -> Self {
        self.with_shared(self.operations[range].to_vec())
    }

    /// A new sequence with the operation at `index` replaced.
    pub(crate) fn replace_at(&self, index: usize, operation: Operation) -> Self {
        let mut operations = self.operations.clone();
        operations[index] = Arc::new(operation);
        self.with_shared(operations)
    }

    /// Replace the first operation satisfying `select`. Unchanged when none does.
    pub fn replace_part(
        &self,
        select: impl Fn(&Method) -> bool,
        replace: impl FnOnce(&Operation) -> Operation,
    ) -> Self {
        match self.operations().position(|op| select(op.method())) {
            Some(index) => {
                let replacement = replace(&self.operations[index]);
                self.replace_at(index, replacement)
            }
            None => self.clone(),
        }
    }

    /// Index of the only operation satisfying `select`, failing when there
    /// is more than one.
    pub(crate) fn single(
        &self,
        name: &str,
        select: impl Fn(&Method) -> bool,
    ) -> Result<Option<usize>, QueryError> {
        let mut found = None;
        for (index, op) in self.operations().enumerate() {
            if select(op.method()) {
                if found.is_some() {
                    return Err(QueryError::AmbiguousOperation {
                        method: name.to_string(),
                    });
                }
                found = Some(index);
            }
        }
        Ok(found)
    }

    /// The `limit` argument, if the sequence carries one.
    pub(crate) fn limit_value(&self) -> Result<Option<usize>, QueryError> {
        let Some(index) = self.single("limit", |m| matches!(m, Method::Limit))? else {
            return Ok(None);
        };
        let op = &self.operations[index];
        op.args()
            .first()
            .and_then(Value::as_i64)
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                QueryError::InvalidArgument("limit expects a non-negative integer".into())
            })
    }

    pub fn find(&self, filter: Document) -> Self {
        self.push(Operation::new(Method::Find).arg(filter))
    }

    pub fn find_all(&self) -> Self {
        self.push(Operation::new(Method::Find))
    }

    pub fn find_projected(&self, filter: Document, projection: Document) -> Self {
        self.push(Operation::new(Method::Find).arg(filter).arg(projection))
    }

    pub fn find_one(&self, filter: Document) -> Self {
        self.push(Operation::new(Method::FindOne).arg(filter))
    }

    pub fn find_one_projected(&self, filter: Document, projection: Document) -> Self {
        self.push(Operation::new(Method::FindOne).arg(filter).arg(projection))
    }

    /// Similarity filter. Before a find it narrows the find to the ranked
    /// ids; after a find it ranks among the find's matches.
    pub fn like(&self, query: impl Into<Value>, params: LikeParams) -> Self {
        self.push(params.apply(Operation::new(Method::Like).arg(query)))
    }

    /// Join the outputs of the given predict ids onto each result.
    pub fn outputs<I, S>(&self, predict_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args = predict_ids
            .into_iter()
            .map(|id| Value::String(id.into()))
            .collect();
        self.push(Operation::new(Method::Outputs).with_args(args))
    }

    pub fn limit(&self, n: usize) -> Self {
        self.push(Operation::new(Method::Limit).arg(n))
    }

    pub fn insert_one(&self, document: Document) -> Self {
        self.push(Operation::new(Method::InsertOne).arg(document))
    }

    pub fn insert_many(&self, documents: Vec<Document>) -> Self {
        let docs = documents.into_iter().map(Value::Document).collect::<Vec<_>>();
        self.push(Operation::new(Method::InsertMany).arg(docs))
    }

    pub fn update_one(&self, filter: Document, update: Document) -> Self {
        self.push(Operation::new(Method::UpdateOne).arg(filter).arg(update))
    }

    pub fn update_many(&self, filter: Document, update: Document) -> Self {
        self.push(Operation::new(Method::UpdateMany).arg(filter).arg(update))
    }

    pub fn replace_one(&self, filter: Document, replacement: Document) -> Self {
        self.push(Operation::new(Method::ReplaceOne).arg(filter).arg(replacement))
    }

    pub fn delete_one(&self, filter: Document) -> Self {
        self.push(Operation::new(Method::DeleteOne).arg(filter))
    }

    pub fn delete_many(&self, filter: Document) -> Self {
        self.push(Operation::new(Method::DeleteMany).arg(filter))
    }

    pub fn bulk_write(&self, operations: Vec<BulkOp>) -> Self {
        self.push(Operation::new(Method::BulkWrite(operations)))
    }

    /// Append an operation this compiler has no plan for.
    pub fn call(&self, name: impl Into<String>, args: Vec<Value>) -> Self {
        self.push(Operation::new(Method::Other(name.into())).with_args(args))
    }

    /// The documents carried by an insert.
    pub fn documents(&self) -> Result<Vec<Document>, QueryError> {
        let op = self
            .operations()
            .find(|op| matches!(op.method(), Method::InsertOne | Method::InsertMany))
            .ok_or_else(|| QueryError::InvalidArgument("not an insert query".into()))?;

        match (op.method(), op.args().first()) {
            (Method::InsertOne, Some(Value::Document(doc))) => Ok(vec![doc.clone()]),
            (Method::InsertMany, Some(Value::Array(items))) => items
                .iter()
                .map(|item| {
                    item.as_document().cloned().ok_or_else(|| {
                        QueryError::InvalidArgument(
                            "insert_many expects an array of documents".into(),
                        )
                    })
                })
                .collect(),
            _ => Err(QueryError::InvalidArgument(format!(
                "{} expects documents as its first argument",
                op.name()
            ))),
        }
    }

    /// Select only `_id` of the documents matched by this query's filter.
    ///
    /// Outputs markers are dropped: ids never depend on joined data.
    pub fn select_ids(&self) -> Result<Self, QueryError> {
        let first = self
            .operations()
            .next()
            .filter(|op| op.method().takes_filter())
            .ok_or_else(|| {
                QueryError::InvalidArgument(format!(
                    "select_ids does not apply to {}",
                    self.operations().next().map_or("an empty query", Operation::name)
                ))
            })?;

        let mut projection = Document::new();
        projection.insert(ID_KEY, 1);
        let find = Operation::new(Method::Find)
            .arg(first.filter()?)
            .arg(projection);
        Ok(self.with_operations([find]))
    }

    /// Restrict the leading find to the given ids.
    pub fn select_using_ids(&self, ids: &[Identifier]) -> Result<Self, QueryError> {
        let (filter, projection, rest) = match self.operations().next() {
            Some(op) if op.method().is_find_like() => {
                (op.filter()?, op.document_arg(1)?.cloned(), 1)
            }
            _ => (Document::new(), None, 0),
        };

        let mut find = Operation::new(Method::Find).arg(restrict_to_ids(filter, ids));
        if let Some(projection) = projection {
            find = find.arg(projection);
        }
        let mut operations = vec![Arc::new(find)];
        operations.extend(self.operations[rest..].iter().cloned());
        Ok(self.with_shared(operations))
    }

    /// Ids of documents matched by the leading find that have no output
    /// for `predict_id` yet.
    pub fn select_ids_of_missing_outputs(&self, predict_id: &str) -> Result<Self, QueryError> {
        let find = self.leading_find("select_ids_of_missing_outputs")?;
        let mut filter = find.filter()?;
        let mut absent = Document::new();
        absent.insert("$exists", false);
        filter.insert(format!("{}.{}", OUTPUTS_KEY, predict_id), absent);

        let mut projection = Document::new();
        projection.insert(ID_KEY, 1);
        Ok(self.with_operations([Operation::new(Method::Find).arg(filter).arg(projection)]))
    }

    /// A `find_one` for a single id, keeping the leading find's filter.
    pub fn select_single_id(&self, id: &Identifier) -> Result<Self, QueryError> {
        let find = self.leading_find("select_single_id")?;
        let mut filter = find.filter()?;
        filter.insert(ID_KEY, id.clone());
        let mut op = Operation::new(Method::FindOne).arg(filter);
        if let Some(projection) = find.document_arg(1)? {
            op = op.arg(projection.clone());
        }
        Ok(self.with_operations([op]))
    }

    /// Select every document of the table.
    pub fn select_table(&self) -> Self {
        self.with_operations([Operation::new(Method::Find)])
    }

    /// Restrict the leading find to one fold (`_fold` field).
    pub fn add_fold(&self, fold: &str) -> Result<Self, QueryError> {
        let mut extra = Document::new();
        extra.insert(crate::document::FOLD_KEY, fold);
        self.filter(extra)
    }

    /// Merge `extra` into the filter of the first find.
    pub fn filter(&self, extra: Document) -> Result<Self, QueryError> {
        let find = self.leading_find("filter")?;
        let mut filter = find.filter()?;
        filter.merge(extra);
        let updated = find.with_filter(filter);
        Ok(self.replace_part(|m| matches!(m, Method::Find), |_| updated))
    }

    fn leading_find(&self, what: &str) -> Result<&Operation, QueryError> {
        self.operations()
            .find(|op| matches!(op.method(), Method::Find))
            .ok_or_else(|| QueryError::InvalidArgument(format!("{} applies to find queries", what)))
    }

    /// Build the insert that stores model outputs for `ids` in the outputs
    /// collection of `predict_id`. With `flatten`, every array output is
    /// fanned out into one row per element, all pointing at the same source.
    pub fn model_update(
        &self,
        ids: &[Identifier],
        predict_id: &str,
        outputs: Vec<Value>,
        flatten: bool,
    ) -> Result<Self, QueryError> {
        if ids.len() != outputs.len() {
            return Err(QueryError::InvalidArgument(format!(
                "got {} ids for {} outputs",
                ids.len(),
                outputs.len()
            )));
        }

        let mut rows = Vec::with_capacity(outputs.len());
        for (id, output) in ids.iter().zip(outputs) {
            if flatten {
                let Value::Array(items) = output else {
                    return Err(QueryError::InvalidArgument(
                        "flattened outputs must be arrays".into(),
                    ));
                };
                rows.extend(items.into_iter().map(|item| output_row(id, predict_id, item)));
            } else {
                rows.push(output_row(id, predict_id, output));
            }
        }

        let table = outputs::outputs_collection(predict_id);
        let query = match &self.db {
            Some(db) => db.table(table),
            None => OperationSequence::new(table),
        };
        Ok(query.insert_many(rows))
    }

    /// Serializable form. Documents of insert operations are key-encoded.
    pub fn to_document(&self) -> Document {
        let operations = self
            .operations()
            .map(|op| {
                let mut part = Document::new();
                part.insert("method", op.name());
                let args = match op.method() {
                    Method::BulkWrite(ops) => vec![Value::Array(
                        ops.iter()
                            .map(|bulk| {
                                serde_json::to_value(bulk).map(Value::from).unwrap_or_default()
                            })
                            .collect(),
                    )],
                    Method::InsertOne | Method::InsertMany => {
                        op.args().iter().cloned().map(encode_documents).collect()
                    }
                    _ => op.args().to_vec(),
                };
                part.insert("args", args);
                part.insert("kwargs", op.kwargs().clone());
                Value::Document(part)
            })
            .collect::<Vec<_>>();

        let mut doc = Document::new();
        doc.insert("table", self.table.as_str());
        doc.insert("operations", operations);
        doc
    }

    /// Read back the form written by [`Self::to_document`]. The result is
    /// unbound; see [`Self::bind`].
    pub fn from_document(doc: &Document) -> Result<Self, QueryError> {
        let invalid = |what: &str| QueryError::InvalidArgument(format!("serialized query: {}", what));

        let table = doc
            .get("table")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing table"))?;
        let parts = doc
            .get("operations")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("missing operations"))?;

        let mut query = OperationSequence::new(table);
        for part in parts {
            let part = part.as_document().ok_or_else(|| invalid("operation is not a document"))?;
            let name = part
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("operation without method"))?;
            let args = part
                .get("args")
                .and_then(Value::as_array)
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            let kwargs = part.get_document("kwargs").cloned().unwrap_or_default();

            let op = match Method::from_name(name) {
                Method::Other(name) if name == "bulk_write" => {
                    let ops = args
                        .first()
                        .and_then(Value::as_array)
                        .ok_or_else(|| invalid("bulk_write without operations"))?
                        .iter()
                        .map(|bulk| {
                            serde_json::from_value::<BulkOp>(bulk.clone().into())
                                .map_err(|e| invalid(&e.to_string()))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Operation::new(Method::BulkWrite(ops))
                }
                method @ (Method::InsertOne | Method::InsertMany) => Operation::new(method)
                    .with_args(args.into_iter().map(decode_documents).collect()),
                method => Operation::new(method).with_args(args),
            };
            query = query.push(op.with_kwargs(kwargs));
        }
        Ok(query)
    }
}

fn encode_documents(value: Value) -> Value {
    match value {
        Value::Document(doc) => Value::Document(encode_keys(doc)),
        Value::Array(items) => Value::Array(items.into_iter().map(encode_documents).collect()),
        other => other,
    }
}

fn decode_documents(value: Value) -> Value {
    match value {
        Value::Document(doc) => Value::Document(decode_keys(doc)),
        Value::Array(items) => Value::Array(items.into_iter().map(decode_documents).collect()),
        other => other,
    }
}

fn output_row(id: &Identifier, predict_id: &str, output: Value) -> Document {
    let mut outputs = Document::new();
    outputs.insert(predict_id, output);
    let mut row = Document::new();
    row.insert(OUTPUTS_KEY, outputs);
    row.insert(SOURCE_KEY, id.clone());
    row
}

/// Intersect `filter` with `_id ∈ ids`. An existing `_id` constraint is kept
/// by combining both under `$and`.
pub fn restrict_to_ids(mut filter: Document, ids: &[Identifier]) -> Document {
    if !filter.contains_key(ID_KEY) {
        filter.merge(ids_filter(ids));
        return filter;
    }
    let mut combined = Document::new();
    combined.insert(
        "$and",
        vec![Value::Document(filter), Value::Document(ids_filter(ids))],
    );
    combined
}

impl PartialEq for OperationSequence {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.operations == other.operations
    }
}

impl fmt::Debug for OperationSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSequence")
            .field("table", &self.table)
            .field("operations", &self.operations)
            .field("bound", &self.db.is_some())
            .finish()
    }
}

impl fmt::Display for OperationSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)?;
        for op in self.operations() {
            write!(f, ".{}", op)?;
        }
        Ok(())
    }
}
