use indexmap::IndexSet;

use super::flavour::Flavour;
use super::outputs::{self, ResultFolder};
use super::{similarity, Method, Operation, OperationSequence, QueryResult};
use crate::bulk::BulkBatcher;
use crate::cursor::{Processor, QueryCursor};
use crate::datalayer::Datalayer;
use crate::document::{decode_keys, encode_keys, Document, Identifier, Value, ID_KEY};
use crate::error::QueryError;
use crate::store::{id_filter, ids_filter};

/// Dispatch a sequence to the strategy of its flavour.
pub(crate) fn execute(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let flavour = query.flavour();
    tracing::debug!(
        table = query.table(),
        flavour = flavour.as_str(),
        "executing {}",
        query
    );

    match flavour {
        Flavour::PreLike => similarity::pre_like(query, db),
        Flavour::PostLike => similarity::post_like(query, db),
        Flavour::BulkWrite => bulk_write(query, db),
        Flavour::FindOne => find_one(query, db),
        Flavour::Find => find(query, db),
        Flavour::InsertMany | Flavour::InsertOne => insert(query, db),
        Flavour::ReplaceOne => replace_one(query, db),
        Flavour::UpdateMany => update_many(query, db),
        Flavour::UpdateOne => update_one(query, db),
        Flavour::DeleteMany => delete_many(query, db),
        Flavour::DeleteOne => delete_one(query, db),
        Flavour::Other => Err(unsupported(query)),
    }
}

fn unsupported(query: &OperationSequence) -> QueryError {
    QueryError::Unsupported {
        chain: query.to_string(),
    }
}

/// Reads may only combine finds with `outputs` and `limit`.
fn ensure_read(query: &OperationSequence) -> Result<(), QueryError> {
    let readable = query.operations().all(|op| {
        matches!(
            op.method(),
            Method::Find | Method::FindOne | Method::Outputs | Method::Limit
        )
    });
    if readable {
        Ok(())
    } else {
        Err(unsupported(query))
    }
}

/// The read path of a table: fold joined outputs (when joined), decode keys,
/// then decode values with the table schema.
pub(crate) fn reader(db: &Datalayer, table: &str, folder: Option<ResultFolder>) -> Processor {
    let codec = db.codec();
    let schema = db.schema_for(table);
    Box::new(move |doc: Document| {
        let doc = match &folder {
            Some(folder) => folder.fold(doc),
            None => doc,
        };
        Ok(codec.decode(decode_keys(doc), schema.as_ref())?)
    })
}

/// Encode a document for storage: values through the codec, keys through
/// the key codec.
fn writer(db: &Datalayer, table: &str, doc: Document) -> Result<Document, QueryError> {
    let schema = db.schema_for(table);
    let encoded = db.codec().encode(doc, schema.as_ref())?;
    Ok(encode_keys(encoded))
}

fn find_op(query: &OperationSequence, method: &Method) -> Result<Operation, QueryError> {
    let index = query
        .single(method.name(), |m| m == method)?
        .ok_or_else(|| unsupported(query))?;
    query
        .get(index)
        .cloned()
        .ok_or_else(|| unsupported(query))
}

fn find(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    ensure_read(query)?;
    if outputs::requires_join(query) {
        return outputs::execute(query, db);
    }

    let op = find_op(query, &Method::Find)?;
    let filter = op.filter()?;
    let limit = query.limit_value()?;
    let raw = db
        .store()
        .find(query.table(), &filter, op.document_arg(1)?, limit)?;
    Ok(QueryResult::Cursor(
        QueryCursor::new(raw).with_processor(reader(db, query.table(), None)),
    ))
}

fn find_one(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    ensure_read(query)?;
    if outputs::requires_join(query) {
        return outputs::execute(query, db);
    }

    let op = find_op(query, &Method::FindOne)?;
    let found = db
        .store()
        .find_one(query.table(), &op.filter()?, op.document_arg(1)?)?;
    let mut process = reader(db, query.table(), None);
    Ok(QueryResult::Document(found.map(|doc| process(doc)).transpose()?))
}

fn insert(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let documents = query
        .documents()?
        .into_iter()
        .map(|doc| writer(db, query.table(), doc))
        .collect::<Result<Vec<_>, _>>()?;
    let ids = db.store().insert_many(query.table(), documents)?;
    tracing::debug!(table = query.table(), count = ids.len(), "inserted documents");
    Ok(QueryResult::Ids(ids))
}

/// Ids matched by the query's filter, in store order without repeats.
fn resolve_ids(
    query: &OperationSequence,
    db: &Datalayer,
    limit: Option<usize>,
) -> Result<Vec<Identifier>, QueryError> {
    let mut select = query.select_ids()?;
    if let Some(n) = limit {
        select = select.limit(n);
    }

    let mut seen = IndexSet::new();
    let mut ids = Vec::new();
    for doc in find(&select, db)?.into_cursor()? {
        let Some(id) = doc?.remove(ID_KEY).and_then(Identifier::from_value) else {
            continue;
        };
        if seen.insert(id.as_value().to_string()) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// The update document of an update call. Among the arguments after the
/// filter, the one carrying `$set` wins; otherwise the first document.
fn update_payload(op: &Operation) -> Result<Document, QueryError> {
    let trailing: Vec<&Document> = op
        .args()
        .iter()
        .skip(1)
        .filter_map(Value::as_document)
        .collect();

    let mut with_set = trailing.iter().filter(|doc| doc.contains_key("$set"));
    match (with_set.next(), with_set.next()) {
        (Some(_), Some(_)) => Err(QueryError::InvalidArgument(format!(
            "{} got more than one $set document",
            op.name()
        ))),
        (Some(update), None) => Ok((*update).clone()),
        (None, _) => trailing.first().map(|doc| (*doc).clone()).ok_or_else(|| {
            QueryError::InvalidArgument(format!("{} requires an update document", op.name()))
        }),
    }
}

/// Encode the values of `$set` with the table schema.
fn encode_update(db: &Datalayer, table: &str, mut update: Document) -> Result<Document, QueryError> {
    if let Some(set) = update.get_document("$set").cloned() {
        let schema = db.schema_for(table);
        let encoded = db.codec().encode(set, schema.as_ref())?;
        update.insert("$set", encoded);
    }
    Ok(update)
}

fn last_op(query: &OperationSequence) -> Result<&Operation, QueryError> {
    query.last().ok_or_else(|| unsupported(query))
}

fn update_many(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let update = update_payload(last_op(query)?)?;
    let ids = resolve_ids(query, db, None)?;
    if ids.is_empty() {
        return Ok(QueryResult::Ids(ids));
    }

    let update = encode_update(db, query.table(), update)?;
    let result = db
        .store()
        .update_many(query.table(), &ids_filter(&ids), &update)?;
    tracing::debug!(
        table = query.table(),
        matched = result.matched_count,
        modified = result.modified_count,
        "updated documents"
    );
    Ok(QueryResult::Ids(ids))
}

fn update_one(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let update = update_payload(last_op(query)?)?;
    let ids = resolve_ids(query, db, Some(1))?;
    let Some(id) = ids.first() else {
        return Ok(QueryResult::Ids(ids));
    };

    let update = encode_update(db, query.table(), update)?;
    db.store()
        .update_many(query.table(), &id_filter(id), &update)?;
    Ok(QueryResult::Ids(ids))
}

fn replace_one(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let op = last_op(query)?;
    let replacement = op.document_arg(1)?.cloned().ok_or_else(|| {
        QueryError::InvalidArgument("replace_one requires a replacement document".into())
    })?;
    let ids = resolve_ids(query, db, Some(1))?;
    let Some(id) = ids.first() else {
        return Ok(QueryResult::Ids(ids));
    };

    let replacement = writer(db, query.table(), replacement)?;
    db.store()
        .replace_one(query.table(), &id_filter(id), replacement)?;
    Ok(QueryResult::Ids(ids))
}

fn delete_one(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let ids = resolve_ids(query, db, Some(1))?;
    let Some(id) = ids.first() else {
        return Ok(QueryResult::Ids(ids));
    };
    db.store().delete_one(query.table(), &id_filter(id))?;
    Ok(QueryResult::Ids(ids))
}

fn delete_many(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let ids = resolve_ids(query, db, None)?;
    if ids.is_empty() {
        return Ok(QueryResult::Ids(ids));
    }
    let deleted = db.store().delete_many(query.table(), &ids_filter(&ids))?;
    tracing::debug!(table = query.table(), deleted, "deleted documents");
    Ok(QueryResult::Ids(ids))
}

fn bulk_write(query: &OperationSequence, db: &Datalayer) -> Result<QueryResult, QueryError> {
    let Method::BulkWrite(ops) = last_op(query)?.method() else {
        return Err(unsupported(query));
    };
    let outcome = BulkBatcher::new(db.store()).execute(query.table(), ops)?;
    Ok(QueryResult::Bulk(outcome))
}
