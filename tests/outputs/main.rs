//! Integration tests for the outputs join and model output writes.

use std::sync::Arc;

use docquery::{doc, Datalayer, Document, Identifier, InMemoryDocumentStore, Value};

fn datalayer() -> (Datalayer, InMemoryDocumentStore) {
    let store = InMemoryDocumentStore::new();
    (Datalayer::new(Arc::new(store.clone())), store)
}

/// Base documents A and B; only A has an output for `m1`.
fn seed(db: &Datalayer) {
    db.table("docs")
        .insert_many(vec![doc!({"_id": "A", "x": 1}), doc!({"_id": "B", "x": 2})])
        .execute()
        .unwrap();
    db.table("docs")
        .model_update(&[Identifier::from("A")], "m1", vec![Value::from(0.5)], false)
        .unwrap()
        .execute()
        .unwrap();
}

fn by_id<'a>(docs: &'a [Document], id: &str) -> &'a Document {
    docs.iter()
        .find(|d| d.get("_id") == Some(&Value::from(id)))
        .unwrap()
}

#[test]
fn outputs_join_is_a_left_join() {
    let (db, _) = datalayer();
    seed(&db);

    let docs = db
        .table("docs")
        .find_all()
        .outputs(["m1"])
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(docs.len(), 2);

    let a = by_id(&docs, "A");
    let outputs = a.get_document("_outputs").unwrap();
    assert_eq!(outputs.get("m1"), Some(&Value::from(0.5)));
    assert!(!a.contains_key("_outputs__m1"));

    let b = by_id(&docs, "B");
    assert!(b
        .get_document("_outputs")
        .map_or(true, |o| !o.contains_key("m1")));
}

#[test]
fn requesting_a_predict_id_twice_joins_once() {
    let (db, _) = datalayer();
    seed(&db);
    let docs = db
        .table("docs")
        .find(doc!({"x": 1}))
        .outputs(["m1"])
        .outputs(["m1"])
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(
        docs[0].get_document("_outputs").and_then(|o| o.get("m1")),
        Some(&Value::from(0.5))
    );
}

#[test]
fn filtering_on_outputs_joins_implicitly() {
    let (db, _) = datalayer();
    seed(&db);

    let with_output = db
        .table("docs")
        .find(doc!({"_outputs.m1": {"$exists": true}}))
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(with_output.len(), 1);
    assert_eq!(with_output[0].get("_id"), Some(&Value::from("A")));
}

#[test]
fn missing_outputs_selects_unprocessed_ids() {
    let (db, _) = datalayer();
    seed(&db);

    let missing = db
        .table("docs")
        .find_all()
        .select_ids_of_missing_outputs("m1")
        .unwrap()
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(missing, vec![doc!({"_id": "B"})]);
}

#[test]
fn select_ids_strips_the_join() {
    let (db, _) = datalayer();
    seed(&db);

    let ids = db
        .table("docs")
        .find_all()
        .outputs(["m1"])
        .select_ids()
        .unwrap()
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(ids, vec![doc!({"_id": "A"}), doc!({"_id": "B"})]);
}

#[test]
fn find_one_with_outputs_reads_a_single_document() {
    let (db, _) = datalayer();
    seed(&db);

    let found = db
        .table("docs")
        .find_one(doc!({"_id": "A"}))
        .outputs(["m1"])
        .execute()
        .unwrap()
        .into_document()
        .unwrap()
        .unwrap();
    assert_eq!(
        found.get_document("_outputs").and_then(|o| o.get("m1")),
        Some(&Value::from(0.5))
    );
}

#[test]
fn flattened_outputs_fan_out_and_drop_removes_them() {
    let (db, store) = datalayer();
    db.table("docs")
        .insert_one(doc!({"_id": "A"}))
        .execute()
        .unwrap();

    let rows = db
        .table("docs")
        .model_update(
            &[Identifier::from("A")],
            "chunks",
            vec![Value::Array(vec![Value::from("a"), Value::from("b")])],
            true,
        )
        .unwrap()
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert_eq!(rows.len(), 2);

    // one result per joined row
    let joined = db
        .table("docs")
        .find_all()
        .outputs(["chunks"])
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(joined.len(), 2);

    assert!(db.drop_outputs("chunks").unwrap());
    assert_eq!(store.count("_outputs.chunks").unwrap(), 0);
    assert!(!db.drop_outputs("chunks").unwrap());
}

#[test]
fn predict_ids_with_double_underscores_fold_back() {
    let (db, _) = datalayer();
    db.table("docs")
        .insert_one(doc!({"_id": "A", "x": 1}))
        .execute()
        .unwrap();
    db.table("docs")
        .model_update(&[Identifier::from("A")], "my__model", vec![Value::from(5)], false)
        .unwrap()
        .execute()
        .unwrap();

    let docs = db
        .table("docs")
        .find_all()
        .outputs(["my__model"])
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    let outputs = by_id(&docs, "A").get_document("_outputs").unwrap();
    assert_eq!(outputs.get("my__model"), Some(&Value::from(5)));
    assert!(!outputs.contains_key("my.model"));
}
