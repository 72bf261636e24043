use std::fmt;

use super::{BulkOp, BulkOpKind};
use crate::document::Identifier;
use crate::error::QueryError;
use crate::store::{BulkWriteResult, DocumentStore};

/// Reported counts disagree with the ids the batch targeted. The batch is
/// still applied; the caller decides how to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialBatchWarning {
    Deletes { expected: u64, reported: u64 },
    Updates { expected: u64, reported: u64 },
}

impl fmt::Display for PartialBatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialBatchWarning::Deletes { expected, reported } => write!(
                f,
                "bulk write deleted {} documents, expected {}",
                reported, expected
            ),
            PartialBatchWarning::Updates { expected, reported } => write!(
                f,
                "bulk write inserted/modified/upserted {} documents, expected {}",
                reported, expected
            ),
        }
    }
}

/// The operation kind and the ids it targeted.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkGroupEntry {
    pub kind: BulkOpKind,
    pub ids: Vec<Identifier>,
}

/// Batch operations grouped by effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedBulkResult {
    pub deleted: Vec<BulkGroupEntry>,
    /// Inserts, updates and replacements.
    pub updated: Vec<BulkGroupEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteOutcome {
    pub grouped: GroupedBulkResult,
    pub updated_ids: Vec<Identifier>,
    pub deleted_ids: Vec<Identifier>,
    pub result: BulkWriteResult,
    pub warnings: Vec<PartialBatchWarning>,
}

impl BulkWriteOutcome {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Applies a batch of [`BulkOp`]s in one store call.
pub struct BulkBatcher<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> BulkBatcher<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    /// Validate, apply and reconcile a batch.
    ///
    /// Any operation without target ids rejects the whole batch before the
    /// store is called. Count mismatches after the write are returned as
    /// warnings, never as errors.
    pub fn execute(&self, collection: &str, ops: &[BulkOp]) -> Result<BulkWriteOutcome, QueryError> {
        if let Some(op) = ops.iter().find(|op| op.target_ids().is_empty()) {
            return Err(QueryError::MissingTargetIds {
                operation: op.kind().as_str().to_string(),
            });
        }

        let mut outcome = BulkWriteOutcome::default();
        if ops.is_empty() {
            return Ok(outcome);
        }

        let mut models = Vec::with_capacity(ops.len());
        for op in ops {
            let entry = BulkGroupEntry {
                kind: op.kind(),
                ids: op.target_ids().to_vec(),
            };
            if op.is_delete() {
                outcome.deleted_ids.extend_from_slice(op.target_ids());
                outcome.grouped.deleted.push(entry);
            } else {
                outcome.updated_ids.extend_from_slice(op.target_ids());
                outcome.grouped.updated.push(entry);
            }
            models.push(op.to_write_model());
        }

        outcome.result = self.store.bulk_write(collection, models)?;
        outcome.warnings = reconcile(&outcome);
        for warning in &outcome.warnings {
            tracing::warn!(collection, "{}", warning);
        }
        tracing::debug!(
            collection,
            ops = ops.len(),
            updated = outcome.updated_ids.len(),
            deleted = outcome.deleted_ids.len(),
            "bulk write applied"
        );
        Ok(outcome)
    }
}

fn reconcile(outcome: &BulkWriteOutcome) -> Vec<PartialBatchWarning> {
    let result = &outcome.result;
    let mut warnings = Vec::new();

    let expected = outcome.deleted_ids.len() as u64;
    if result.deleted_count != expected {
        warnings.push(PartialBatchWarning::Deletes {
            expected,
            reported: result.deleted_count,
        });
    }

    let expected = outcome.updated_ids.len() as u64;
    let reported = result.inserted_count + result.modified_count + result.upserted_count;
    if reported != expected {
        warnings.push(PartialBatchWarning::Updates { expected, reported });
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::store::InMemoryDocumentStore;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(value).unwrap()
    }

    #[test]
    fn groups_ids_by_effect() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_many("docs", vec![doc(json!({"_id": 1})), doc(json!({"_id": 2}))])
            .unwrap();

        let ops = vec![
            BulkOp::delete_one(doc(json!({"_id": 1}))).unwrap(),
            BulkOp::update_one(doc(json!({"_id": 2})), doc(json!({"$set": {"x": 1}}))).unwrap(),
            BulkOp::insert_one(doc(json!({"_id": 3}))),
        ];
        let outcome = BulkBatcher::new(&store).execute("docs", &ops).unwrap();

        assert_eq!(outcome.deleted_ids, vec![Identifier::from(1)]);
        assert_eq!(
            outcome.updated_ids,
            vec![Identifier::from(2), Identifier::from(3)]
        );
        assert_eq!(outcome.grouped.updated.len(), 2);
        assert!(outcome.is_complete());
        assert_eq!(store.count("docs").unwrap(), 2);
    }

    #[test]
    fn missing_documents_are_reported_not_raised() {
        let store = InMemoryDocumentStore::new();
        let ops = vec![BulkOp::delete_one(doc(json!({"_id": 9}))).unwrap()];
        let outcome = BulkBatcher::new(&store).execute("docs", &ops).unwrap();
        assert_eq!(
            outcome.warnings,
            vec![PartialBatchWarning::Deletes {
                expected: 1,
                reported: 0
            }]
        );
    }

    #[test]
    fn untargeted_operation_rejects_the_batch() {
        let store = InMemoryDocumentStore::new();
        let untargeted: BulkOp =
            serde_json::from_value(json!({"kind": "UpdateOne", "filter": {"x": 1}})).unwrap();
        let ops = vec![BulkOp::insert_one(doc(json!({"x": 1}))), untargeted];

        let err = BulkBatcher::new(&store).execute("docs", &ops).unwrap_err();
        assert_eq!(
            err,
            QueryError::MissingTargetIds {
                operation: "UpdateOne".into()
            }
        );
        assert_eq!(store.count("docs").unwrap(), 0);
    }
}
