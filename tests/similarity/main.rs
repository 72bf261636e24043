//! Integration tests for similarity pre- and post-filters.

mod ranker;

use std::sync::Arc;

use docquery::{
    doc, Datalayer, Document, Flavour, Identifier, InMemoryDocumentStore, LikeParams, QueryError,
    Value,
};
use ranker::{MisalignedRanker, TableRanker};

fn datalayer(ranker: Arc<TableRanker>) -> Datalayer {
    let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new())).with_similarity(ranker);
    let docs = (0..10).map(|i| doc!({"_id": i, "x": i})).collect();
    db.table("docs").insert_many(docs).execute().unwrap();
    db
}

fn id_of(doc: &Document) -> i64 {
    doc.get("_id").and_then(Value::as_i64).unwrap()
}

fn str_id_of(doc: &Document) -> String {
    doc.get("_id").and_then(Value::as_str).unwrap().to_string()
}

/// A table keyed by strings that look like integers.
fn numeric_string_keys() -> Datalayer {
    let ranker = TableRanker::new(vec![
        ("42".into(), 0.9),
        ("43".into(), 0.8),
        ("007".into(), 0.7),
    ]);
    let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new())).with_similarity(Arc::new(ranker));
    db.table("docs")
        .insert_many(vec![
            doc!({"_id": "42", "x": 1}),
            doc!({"_id": "43", "x": 2}),
            doc!({"_id": "007", "x": 3}),
        ])
        .execute()
        .unwrap();
    db
}

#[test]
fn post_like_ranks_within_the_first_range_matches() {
    let ranker = Arc::new(TableRanker::linear(10));
    let db = datalayer(ranker.clone());

    let query = db
        .table("docs")
        .find(doc!({"x": {"$gte": 2}}))
        .like("query", LikeParams::new("idx").range(5).top_n(3));
    assert_eq!(query.flavour(), Flavour::PostLike);

    let cursor = query.execute().unwrap().into_cursor().unwrap();
    assert_eq!(cursor.score(&Identifier::from(6)), Some(0.6));
    let docs = cursor.try_collect().unwrap();

    let calls = ranker.calls.lock().unwrap();
    let candidates = calls[0].clone().unwrap();
    assert!(candidates.len() <= 5);
    assert_eq!(candidates, vec!["2", "3", "4", "5", "6"]);

    let mut found: Vec<i64> = docs.iter().map(id_of).collect();
    found.sort();
    assert_eq!(found, vec![4, 5, 6]);
    for id in found {
        assert!(id >= 2);
        assert!(candidates.contains(&id.to_string()));
    }
}

#[test]
fn pre_like_narrows_the_find_to_ranked_ids() {
    let ranker = Arc::new(TableRanker::linear(10));
    let db = datalayer(ranker.clone());

    let query = db
        .table("docs")
        .like("query", LikeParams::new("idx").top_n(3))
        .find(doc!({"x": {"$lt": 8}}));
    assert_eq!(query.flavour(), Flavour::PreLike);

    let cursor = query.execute().unwrap().into_cursor().unwrap();
    assert_eq!(cursor.scores().len(), 3);
    assert_eq!(cursor.score(&Identifier::from(7)), Some(0.7));

    let docs = cursor.try_collect().unwrap();
    assert_eq!(docs, vec![doc!({"_id": 7, "x": 7})]);
    assert_eq!(ranker.calls.lock().unwrap()[0], None);
}

#[test]
fn pre_like_keeps_an_existing_id_constraint() {
    let db = datalayer(Arc::new(TableRanker::linear(10)));
    let docs = db
        .table("docs")
        .like("query", LikeParams::new("idx").top_n(5))
        .find(doc!({"_id": {"$lt": 7}}))
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    let ids: Vec<i64> = docs.iter().map(id_of).collect();
    assert_eq!(ids, vec![5, 6]);
}

#[test]
fn pre_like_find_one_returns_a_document() {
    let db = datalayer(Arc::new(TableRanker::linear(10)));
    let found = db
        .table("docs")
        .like("query", LikeParams::new("idx").top_n(1))
        .find_one(doc!({}))
        .execute()
        .unwrap()
        .into_document()
        .unwrap();
    assert_eq!(found, Some(doc!({"_id": 9, "x": 9})));
}

#[test]
fn like_needs_a_ranker() {
    let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new()));
    let err = db
        .table("docs")
        .find_all()
        .like("query", LikeParams::new("idx"))
        .execute()
        .unwrap_err();
    assert_eq!(err, QueryError::SimilarityUnavailable);
}

#[test]
fn misaligned_scores_are_rejected() {
    let db = Datalayer::new(Arc::new(InMemoryDocumentStore::new()))
        .with_similarity(Arc::new(MisalignedRanker));
    let err = db
        .table("docs")
        .like("query", LikeParams::new("idx"))
        .find_all()
        .execute()
        .unwrap_err();
    assert!(matches!(err, QueryError::Similarity(_)));
}

#[test]
fn post_like_keeps_numeric_looking_string_keys() {
    let db = numeric_string_keys();
    let cursor = db
        .table("docs")
        .find(doc!({}))
        .like("query", LikeParams::new("idx").top_n(2))
        .execute()
        .unwrap()
        .into_cursor()
        .unwrap();
    assert_eq!(cursor.score(&Identifier::from("42")), Some(0.9));

    let mut found: Vec<String> = cursor.try_collect().unwrap().iter().map(str_id_of).collect();
    found.sort();
    assert_eq!(found, vec!["42", "43"]);
}

#[test]
fn pre_like_keeps_numeric_looking_string_keys() {
    let db = numeric_string_keys();
    let docs = db
        .table("docs")
        .like("query", LikeParams::new("idx").top_n(3))
        .find(doc!({}))
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    let found: Vec<String> = docs.iter().map(str_id_of).collect();
    assert_eq!(found, vec!["42", "43", "007"]);
}

#[test]
fn like_over_generated_uuid_keys() {
    let store = InMemoryDocumentStore::new();
    let plain = Datalayer::new(Arc::new(store.clone()));
    plain
        .table("docs")
        .insert_many((0..4).map(|i| doc!({"x": i})).collect())
        .execute()
        .unwrap();
    let keys: Vec<String> = plain
        .table("docs")
        .find_all()
        .execute()
        .unwrap()
        .into_documents()
        .unwrap()
        .iter()
        .map(str_id_of)
        .collect();
    assert_eq!(keys.len(), 4);

    // the last key ranks best
    let scores = keys.iter().enumerate().map(|(i, k)| (k.clone(), i as f64)).collect();
    let db = Datalayer::new(Arc::new(store)).with_similarity(Arc::new(TableRanker::new(scores)));

    let pre = db
        .table("docs")
        .like("query", LikeParams::new("idx").top_n(1))
        .find_one(doc!({}))
        .execute()
        .unwrap()
        .into_document()
        .unwrap()
        .unwrap();
    assert_eq!(str_id_of(&pre), keys[3]);

    let post = db
        .table("docs")
        .find(doc!({"x": {"$lt": 2}}))
        .like("query", LikeParams::new("idx").top_n(1))
        .execute()
        .unwrap()
        .into_documents()
        .unwrap();
    let found: Vec<String> = post.iter().map(str_id_of).collect();
    assert_eq!(found, vec![keys[1].clone()]);
}
