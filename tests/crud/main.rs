//! Integration tests for reads and two-phase writes against the in-memory store.

use std::sync::{Arc, Mutex};

use docquery::{
    doc, Datalayer, DatalayerConfig, Document, DocumentStore, FieldType, Flavour, Identifier,
    InMemoryDocumentStore, InMemorySchemaRegistry, LogChangePublisher, QueryError, Schema, Value,
};

fn datalayer() -> (Datalayer, InMemoryDocumentStore) {
    let store = InMemoryDocumentStore::new();
    (Datalayer::new(Arc::new(store.clone())), store)
}

fn seed(db: &Datalayer) {
    db.table("docs")
        .insert_many(vec![
            doc!({"_id": 1, "x": 1}),
            doc!({"_id": 2, "x": 2}),
            doc!({"_id": 3, "x": 3}),
        ])
        .execute()
        .unwrap();
}

fn ids(raw: &[i64]) -> Vec<Identifier> {
    raw.iter().copied().map(Identifier::from).collect()
}

#[test]
fn update_many_returns_phase_one_ids() {
    let (db, _) = datalayer();
    seed(&db);

    let updated = db
        .table("docs")
        .update_many(doc!({"_id": {"$gt": 1}}), doc!({"$set": {"flag": true}}))
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert_eq!(updated, ids(&[2, 3]));

    let flagged = db
        .table("docs")
        .find(doc!({"flag": true}))
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(flagged.len(), 2);
}

#[test]
fn update_many_without_matches_skips_the_store() {
    let (db, _) = datalayer();
    seed(&db);

    let updated = db
        .table("docs")
        .update_many(doc!({"x": 99}), doc!({"$set": {"flag": true}}))
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert!(updated.is_empty());
}

#[test]
fn insert_one_assigns_an_id() {
    let (db, store) = datalayer();
    let inserted = db
        .table("docs")
        .insert_one(doc!({"x": 1}))
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert_eq!(inserted.len(), 1);
    assert_eq!(store.count("docs").unwrap(), 1);

    let found = db
        .table("docs")
        .find_one(doc!({"_id": inserted[0].clone()}))
        .execute()
        .unwrap()
        .into_document()
        .unwrap()
        .unwrap();
    assert_eq!(found.get("x"), Some(&Value::Int(1)));
}

#[test]
fn find_one_without_match_is_none() {
    let (db, _) = datalayer();
    seed(&db);
    let found = db
        .table("docs")
        .find_one(doc!({"x": 42}))
        .execute()
        .unwrap()
        .into_document()
        .unwrap();
    assert_eq!(found, None);
}

#[test]
fn find_honours_projection_and_limit() {
    let (db, _) = datalayer();
    seed(&db);
    let docs = db
        .table("docs")
        .find_projected(doc!({}), doc!({"x": 1}))
        .limit(2)
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(docs, vec![doc!({"_id": 1, "x": 1}), doc!({"_id": 2, "x": 2})]);
}

#[test]
fn reserved_keys_survive_storage() {
    let (db, store) = datalayer();
    db.table("docs")
        .insert_one(doc!({"_id": 1, "$meta": {"a.b": 1}}))
        .execute()
        .unwrap();

    let raw = store.find_one("docs", &doc!({}), None).unwrap().unwrap();
    assert_eq!(raw, doc!({"_id": 1, "<$>meta": {"a<.>b": 1}}));

    let read = db
        .table("docs")
        .find_one(doc!({"_id": 1}))
        .execute()
        .unwrap()
        .into_document()
        .unwrap();
    assert_eq!(read, Some(doc!({"_id": 1, "$meta": {"a.b": 1}})));
}

#[test]
fn bytes_fields_are_encoded_with_the_table_schema() {
    let store = InMemoryDocumentStore::new();
    let schemas = InMemorySchemaRegistry::new();
    schemas.register("images", Schema::new("images/v1").field("img", FieldType::Bytes));
    let db = Datalayer::new(Arc::new(store.clone())).with_schemas(Arc::new(schemas));

    let mut image = Document::new();
    image.insert("_id", 1);
    image.insert("img", Value::bytes(vec![0u8, 1, 2]));
    db.table("images").insert_one(image).execute().unwrap();

    let raw = store.find_one("images", &doc!({}), None).unwrap().unwrap();
    assert_eq!(raw.get("img"), Some(&Value::from("AAEC")));
    assert_eq!(raw.get("_schema"), Some(&Value::from("images/v1")));

    let read = db
        .table("images")
        .find_one(doc!({"_id": 1}))
        .execute()
        .unwrap()
        .into_document()
        .unwrap()
        .unwrap();
    assert_eq!(read.get("img"), Some(&Value::bytes(vec![0u8, 1, 2])));

    // tables without a schema are stored raw
    db.table("plain").insert_one(doc!({"_id": 1, "v": "AAEC"})).execute().unwrap();
    let plain = store.find_one("plain", &doc!({}), None).unwrap().unwrap();
    assert!(!plain.contains_key("_schema"));
}

#[test]
fn delete_one_and_delete_many() {
    let (db, store) = datalayer();
    seed(&db);

    let deleted = db
        .table("docs")
        .delete_one(doc!({"x": {"$gte": 2}}))
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert_eq!(deleted, ids(&[2]));

    let deleted = db
        .table("docs")
        .delete_many(doc!({}))
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert_eq!(deleted, ids(&[1, 3]));
    assert_eq!(store.count("docs").unwrap(), 0);

    let nothing = db
        .table("docs")
        .delete_one(doc!({"x": 1}))
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert!(nothing.is_empty());
}

#[test]
fn update_one_and_replace_one_touch_a_single_document() {
    let (db, _) = datalayer();
    seed(&db);

    let updated = db
        .table("docs")
        .update_one(doc!({}), doc!({"$inc": {"x": 10}}))
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert_eq!(updated, ids(&[1]));

    let replaced = db
        .table("docs")
        .replace_one(doc!({"x": 3}), doc!({"y": "new"}))
        .execute()
        .unwrap()
        .into_ids()
        .unwrap();
    assert_eq!(replaced, ids(&[3]));

    let docs = db
        .table("docs")
        .find_all()
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    assert_eq!(
        docs,
        vec![
            doc!({"_id": 1, "x": 11}),
            doc!({"_id": 2, "x": 2}),
            doc!({"_id": 3, "y": "new"}),
        ]
    );
}

#[test]
fn update_with_two_set_documents_is_rejected() {
    let (db, _) = datalayer();
    seed(&db);
    let query = db
        .table("docs")
        .update_many(doc!({}), doc!({"$set": {"a": 1}}))
        .replace_part(
            |m| matches!(m, docquery::query::Method::UpdateMany),
            |op| op.clone().arg(doc!({"$set": {"b": 1}})),
        );
    assert!(matches!(
        query.execute(),
        Err(QueryError::InvalidArgument(_))
    ));
}

#[test]
fn unknown_operations_are_unsupported() {
    let (db, _) = datalayer();
    let query = db.table("docs").call("count_documents", vec![]);
    assert_eq!(query.flavour(), Flavour::Other);
    assert!(matches!(
        query.execute(),
        Err(QueryError::Unsupported { .. })
    ));

    let find_then_count = db.table("docs").find_all().call("sort", vec![]);
    assert!(matches!(
        find_then_count.execute(),
        Err(QueryError::Unsupported { .. })
    ));
}

#[test]
fn mutations_publish_changes() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new()))
        .with_publisher(LogChangePublisher::with_buffer(buffer.clone()));
    seed(&db);
    db.table("docs")
        .delete_many(doc!({"x": 1}))
        .execute()
        .unwrap();
    db.table("docs").find_all().execute().unwrap();

    let lines = buffer.lock().unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("[CHANGE] insert"));
    assert!(lines[1].contains(r#""ids":["1"]"#));
}

#[test]
fn notifications_can_be_disabled() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let config = DatalayerConfig {
        notify_changes: false,
        ..DatalayerConfig::default()
    };
    let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new()))
        .with_publisher(LogChangePublisher::with_buffer(buffer.clone()))
        .with_config(config);
    seed(&db);
    assert!(buffer.lock().unwrap().is_empty());
}
