//! Integration tests for validated bulk writes.

use std::sync::{Arc, Mutex};

use docquery::{
    doc, BulkOp, Datalayer, Flavour, Identifier, InMemoryDocumentStore, LogChangePublisher,
    OperationSequence, PartialBatchWarning, QueryError,
};

fn datalayer() -> (Datalayer, InMemoryDocumentStore) {
    let store = InMemoryDocumentStore::new();
    let db = Datalayer::new(Arc::new(store.clone()));
    db.table("docs")
        .insert_many(vec![doc!({"_id": 1, "x": 1}), doc!({"_id": 2, "x": 2})])
        .execute()
        .unwrap();
    (db, store)
}

#[test]
fn bulk_ops_without_target_ids_are_rejected_up_front() {
    assert_eq!(
        BulkOp::update_one(doc!({"_id": {"$in": []}}), doc!({"$set": {"x": 1}})).unwrap_err(),
        QueryError::MissingTargetIds {
            operation: "UpdateOne".into()
        }
    );
    assert_eq!(
        BulkOp::delete_one(doc!({})).unwrap_err(),
        QueryError::MissingTargetIds {
            operation: "DeleteOne".into()
        }
    );
}

#[test]
fn a_deserialized_untargeted_op_rejects_the_whole_batch() {
    let (db, store) = datalayer();
    let untargeted: BulkOp =
        serde_json::from_value(serde_json::json!({"kind": "DeleteOne", "filter": {}})).unwrap();
    let ops = vec![BulkOp::delete_one(doc!({"_id": 1})).unwrap(), untargeted];

    let err = db.table("docs").bulk_write(ops).execute().unwrap_err();
    assert!(matches!(err, QueryError::MissingTargetIds { .. }));
    assert_eq!(store.count("docs").unwrap(), 2);
}

#[test]
fn mixed_batch_is_grouped_and_reconciled() {
    let (db, store) = datalayer();
    let ops = vec![
        BulkOp::insert_one(doc!({"_id": 3, "x": 3})),
        BulkOp::update_one(doc!({"_id": 1}), doc!({"$set": {"x": 10}})).unwrap(),
        BulkOp::replace_one(doc!({"_id": 2}), doc!({"y": 2})).unwrap(),
        BulkOp::delete_one(doc!({"_id": 3})).unwrap(),
    ];
    let query = db.table("docs").bulk_write(ops);
    assert_eq!(query.flavour(), Flavour::BulkWrite);

    let outcome = query.execute().unwrap().into_bulk().unwrap();
    assert_eq!(outcome.deleted_ids, vec![Identifier::from(3)]);
    assert_eq!(
        outcome.updated_ids,
        vec![Identifier::from(3), Identifier::from(1), Identifier::from(2)]
    );
    assert_eq!(outcome.grouped.deleted.len(), 1);
    assert_eq!(outcome.grouped.updated.len(), 3);
    assert!(outcome.warnings.is_empty());
    assert_eq!(store.count("docs").unwrap(), 2);
}

#[test]
fn count_mismatch_is_a_warning() {
    let (db, _) = datalayer();
    let ops = vec![
        BulkOp::delete_one(doc!({"_id": 42})).unwrap(),
        BulkOp::update_one(doc!({"_id": 1}), doc!({"$set": {"x": 1}})).unwrap(),
    ];
    let outcome = db
        .table("docs")
        .bulk_write(ops)
        .execute()
        .unwrap()
        .into_bulk()
        .unwrap();

    // the update matched but changed nothing, the delete found nothing
    assert_eq!(
        outcome.warnings,
        vec![
            PartialBatchWarning::Deletes {
                expected: 1,
                reported: 0
            },
            PartialBatchWarning::Updates {
                expected: 1,
                reported: 0
            },
        ]
    );
    assert_eq!(outcome.result.matched_count, 1);
}

#[test]
fn bulk_writes_publish_all_touched_ids() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new()))
        .with_publisher(LogChangePublisher::with_buffer(buffer.clone()));

    db.table("docs")
        .bulk_write(vec![BulkOp::insert_one(doc!({"_id": "a"}))])
        .execute()
        .unwrap();

    let lines = buffer.lock().unwrap();
    assert_eq!(
        lines.as_slice(),
        [r#"[CHANGE] write {"table":"docs","kind":"write","ids":["a"]}"#]
    );
}

#[test]
fn serialized_bulk_query_reads_back() {
    let query = OperationSequence::new("docs").bulk_write(vec![
        BulkOp::delete_one(doc!({"_id": 1})).unwrap(),
        BulkOp::insert_one(doc!({"_id": 2})),
    ]);
    let restored = OperationSequence::from_document(&query.to_document()).unwrap();
    assert_eq!(restored, query);
}
