//! Flavour classification of operation sequences.
//!
//! Discriminators run over the method sequence in a fixed order, most
//! specific first, and the first one that holds wins. `find_one` is tested
//! before `find` and both similarity shapes before either.

use serde::{Deserialize, Serialize};

use super::Method;

/// Execution strategy of an operation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavour {
    PreLike,
    PostLike,
    BulkWrite,
    FindOne,
    Find,
    InsertMany,
    InsertOne,
    ReplaceOne,
    UpdateMany,
    UpdateOne,
    DeleteMany,
    DeleteOne,
    Other,
}

/// Coarse side-effect class of a flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Write,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Select => "select",
            QueryType::Insert => "insert",
            QueryType::Update => "update",
            QueryType::Delete => "delete",
            QueryType::Write => "write",
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, QueryType::Select)
    }
}

impl Flavour {
    /// Evaluation order of the discriminators.
    pub const ORDER: [Flavour; 13] = [
        Flavour::PreLike,
        Flavour::PostLike,
        Flavour::BulkWrite,
        Flavour::FindOne,
        Flavour::Find,
        Flavour::InsertMany,
        Flavour::InsertOne,
        Flavour::ReplaceOne,
        Flavour::UpdateMany,
        Flavour::UpdateOne,
        Flavour::DeleteMany,
        Flavour::DeleteOne,
        Flavour::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flavour::PreLike => "pre_like",
            Flavour::PostLike => "post_like",
            Flavour::BulkWrite => "bulk_write",
            Flavour::FindOne => "find_one",
            Flavour::Find => "find",
            Flavour::InsertMany => "insert_many",
            Flavour::InsertOne => "insert_one",
            Flavour::ReplaceOne => "replace_one",
            Flavour::UpdateMany => "update_many",
            Flavour::UpdateOne => "update_one",
            Flavour::DeleteMany => "delete_many",
            Flavour::DeleteOne => "delete_one",
            Flavour::Other => "other",
        }
    }

    pub fn query_type(&self) -> QueryType {
        match self {
            Flavour::UpdateMany | Flavour::UpdateOne | Flavour::ReplaceOne => QueryType::Update,
            Flavour::DeleteMany | Flavour::DeleteOne => QueryType::Delete,
            Flavour::BulkWrite => QueryType::Write,
            Flavour::InsertMany | Flavour::InsertOne => QueryType::Insert,
            _ => QueryType::Select,
        }
    }

    fn holds(&self, methods: &[&Method]) -> bool {
        let last_is = |wanted: fn(&Method) -> bool| methods.last().map_or(false, |m| wanted(m));
        let any_is = |wanted: fn(&Method) -> bool| methods.iter().any(|m| wanted(m));

        match self {
            Flavour::PreLike => {
                matches!(methods.first(), Some(Method::Like))
                    && methods[1..].iter().any(|m| m.is_find_like())
            }
            Flavour::PostLike => {
                matches!(methods, [Method::Find, Method::Like])
            }
            Flavour::BulkWrite => last_is(|m| matches!(m, Method::BulkWrite(_))),
            Flavour::FindOne => any_is(|m| matches!(m, Method::FindOne)),
            Flavour::Find => any_is(|m| matches!(m, Method::Find)),
            Flavour::InsertMany => last_is(|m| matches!(m, Method::InsertMany)),
            Flavour::InsertOne => last_is(|m| matches!(m, Method::InsertOne)),
            Flavour::ReplaceOne => last_is(|m| matches!(m, Method::ReplaceOne)),
            Flavour::UpdateMany => last_is(|m| matches!(m, Method::UpdateMany)),
            Flavour::UpdateOne => last_is(|m| matches!(m, Method::UpdateOne)),
            Flavour::DeleteMany => last_is(|m| matches!(m, Method::DeleteMany)),
            Flavour::DeleteOne => last_is(|m| matches!(m, Method::DeleteOne)),
            Flavour::Other => true,
        }
    }
}

/// Classify a method sequence. Total: anything unmatched is `Other`.
pub fn classify(methods: &[&Method]) -> Flavour {
    Flavour::ORDER
        .into_iter()
        .find(|flavour| flavour.holds(methods))
        .unwrap_or(Flavour::Other)
}
