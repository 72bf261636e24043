//! Bulk writes: heterogeneous single-document operations applied in one
//! store call, with the ids each one targets known up front.

mod batcher;

use serde::{Deserialize, Serialize};

pub use batcher::{
    BulkBatcher, BulkGroupEntry, BulkWriteOutcome, GroupedBulkResult, PartialBatchWarning,
};

use crate::document::{Document, Identifier, Value, ID_KEY};
use crate::error::QueryError;
use crate::store::WriteModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BulkOpKind {
    InsertOne,
    UpdateOne,
    DeleteOne,
    ReplaceOne,
}

impl BulkOpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOpKind::InsertOne => "InsertOne",
            BulkOpKind::UpdateOne => "UpdateOne",
            BulkOpKind::DeleteOne => "DeleteOne",
            BulkOpKind::ReplaceOne => "ReplaceOne",
        }
    }
}

/// One operation of a bulk batch.
///
/// Built through the constructors, every operation knows the ids it
/// touches. A deserialized operation may not; the batcher rejects those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOp {
    kind: BulkOpKind,
    #[serde(default)]
    filter: Document,
    /// Inserted document, update document or replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Document>,
    #[serde(default)]
    target_ids: Vec<Identifier>,
}

/// Ids named by a filter's `_id`: a single value or `{"$in": [...]}`.
fn target_ids_of(filter: &Document) -> Vec<Identifier> {
    match filter.get(ID_KEY) {
        Some(Value::Document(cond)) => cond
            .get("$in")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| Identifier::from_value(id.clone()))
                    .collect()
            })
            .unwrap_or_default(),
        Some(value) => Identifier::from_value(value.clone()).into_iter().collect(),
        None => Vec::new(),
    }
}

impl BulkOp {
    /// Insert `document`, assigning a fresh `_id` when it has none.
    pub fn insert_one(mut document: Document) -> Self {
        if !document.contains_key(ID_KEY) {
            document.insert(ID_KEY, Identifier::generate());
        }
        let target_ids = document
            .get(ID_KEY)
            .cloned()
            .and_then(Identifier::from_value)
            .into_iter()
            .collect();
        Self {
            kind: BulkOpKind::InsertOne,
            filter: Document::new(),
            payload: Some(document),
            target_ids,
        }
    }

    pub fn update_one(filter: Document, update: Document) -> Result<Self, QueryError> {
        Self::targeted(BulkOpKind::UpdateOne, filter, Some(update))
    }

    pub fn delete_one(filter: Document) -> Result<Self, QueryError> {
        Self::targeted(BulkOpKind::DeleteOne, filter, None)
    }

    pub fn replace_one(filter: Document, replacement: Document) -> Result<Self, QueryError> {
        Self::targeted(BulkOpKind::ReplaceOne, filter, Some(replacement))
    }

    fn targeted(
        kind: BulkOpKind,
        filter: Document,
        payload: Option<Document>,
    ) -> Result<Self, QueryError> {
        let target_ids = target_ids_of(&filter);
        if target_ids.is_empty() {
            return Err(QueryError::MissingTargetIds {
                operation: kind.as_str().to_string(),
            });
        }
        Ok(Self {
            kind,
            filter,
            payload,
            target_ids,
        })
    }

    pub fn kind(&self) -> BulkOpKind {
        self.kind
    }

    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn payload(&self) -> Option<&Document> {
        self.payload.as_ref()
    }

    pub fn target_ids(&self) -> &[Identifier] {
        &self.target_ids
    }

    pub fn is_delete(&self) -> bool {
        self.kind == BulkOpKind::DeleteOne
    }

    /// The store-native write.
    pub fn to_write_model(&self) -> WriteModel {
        let filter = self.filter.clone();
        let payload = self.payload.clone().unwrap_or_default();
        match self.kind {
            BulkOpKind::InsertOne => WriteModel::InsertOne { document: payload },
            BulkOpKind::UpdateOne => WriteModel::UpdateOne {
                filter,
                update: payload,
            },
            BulkOpKind::DeleteOne => WriteModel::DeleteOne { filter },
            BulkOpKind::ReplaceOne => WriteModel::ReplaceOne {
                filter,
                replacement: payload,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(value).unwrap()
    }

    #[test]
    fn target_ids_come_from_the_id_filter() {
        let single = BulkOp::delete_one(doc(json!({"_id": 4}))).unwrap();
        assert_eq!(single.target_ids(), &[Identifier::from(4)]);

        let many =
            BulkOp::update_one(doc(json!({"_id": {"$in": ["a", "b"]}})), doc(json!({"$set": {"x": 1}})))
                .unwrap();
        assert_eq!(many.target_ids().len(), 2);
    }

    #[test]
    fn filters_without_ids_are_rejected() {
        assert_eq!(
            BulkOp::delete_one(doc(json!({}))).unwrap_err(),
            QueryError::MissingTargetIds {
                operation: "DeleteOne".into()
            }
        );
        assert!(BulkOp::update_one(doc(json!({"_id": {"$in": []}})), Document::new()).is_err());
        assert!(BulkOp::replace_one(doc(json!({"x": 1})), Document::new()).is_err());
    }

    #[test]
    fn inserts_get_an_id() {
        let op = BulkOp::insert_one(doc(json!({"x": 1})));
        assert_eq!(op.target_ids().len(), 1);
        let WriteModel::InsertOne { document } = op.to_write_model() else {
            panic!("expected an insert");
        };
        assert_eq!(
            document.get(ID_KEY),
            Some(op.target_ids()[0].as_value())
        );
    }
}
