use std::fmt;

use crate::bulk::BulkOp;
use crate::document::{Document, Value};
use crate::error::QueryError;

/// The closed set of query operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Find,
    FindOne,
    Like,
    Outputs,
    Limit,
    InsertOne,
    InsertMany,
    ReplaceOne,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    BulkWrite(Vec<BulkOp>),
    /// A store call this compiler does not know how to plan.
    Other(String),
}

impl Method {
    pub fn name(&self) -> &str {
        match self {
            Method::Find => "find",
            Method::FindOne => "find_one",
            Method::Like => "like",
            Method::Outputs => "outputs",
            Method::Limit => "limit",
            Method::InsertOne => "insert_one",
            Method::InsertMany => "insert_many",
            Method::ReplaceOne => "replace_one",
            Method::UpdateOne => "update_one",
            Method::UpdateMany => "update_many",
            Method::DeleteOne => "delete_one",
            Method::DeleteMany => "delete_many",
            Method::BulkWrite(_) => "bulk_write",
            Method::Other(name) => name,
        }
    }

    /// The method called `name`. `bulk_write` carries its operations and is
    /// not resolvable from the name alone.
    pub fn from_name(name: &str) -> Method {
        match name {
            "find" => Method::Find,
            "find_one" => Method::FindOne,
            "like" => Method::Like,
            "outputs" => Method::Outputs,
            "limit" => Method::Limit,
            "insert_one" => Method::InsertOne,
            "insert_many" => Method::InsertMany,
            "replace_one" => Method::ReplaceOne,
            "update_one" => Method::UpdateOne,
            "update_many" => Method::UpdateMany,
            "delete_one" => Method::DeleteOne,
            "delete_many" => Method::DeleteMany,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn is_find_like(&self) -> bool {
        matches!(self, Method::Find | Method::FindOne)
    }

    /// Operations whose first positional argument is a filter.
    pub fn takes_filter(&self) -> bool {
        matches!(
            self,
            Method::Find
                | Method::FindOne
                | Method::ReplaceOne
                | Method::UpdateOne
                | Method::UpdateMany
                | Method::DeleteOne
                | Method::DeleteMany
        )
    }
}

/// One named operation with its positional and keyword arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    method: Method,
    args: Vec<Value>,
    kwargs: Document,
}

impl Operation {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            args: Vec::new(),
            kwargs: Document::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key, value);
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Document) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn name(&self) -> &str {
        self.method.name()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Document {
        &self.kwargs
    }

    /// Positional argument `index` as a document. Missing and null arguments
    /// read as `None`; anything else that is not a document is an error.
    pub fn document_arg(&self, index: usize) -> Result<Option<&Document>, QueryError> {
        match self.args.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Document(doc)) => Ok(Some(doc)),
            Some(other) => Err(QueryError::InvalidArgument(format!(
                "{} argument {} must be a document, got {}",
                self.name(),
                index,
                other.type_name()
            ))),
        }
    }

    /// The filter argument; an absent filter selects everything.
    pub fn filter(&self) -> Result<Document, QueryError> {
        Ok(self.document_arg(0)?.cloned().unwrap_or_default())
    }

    /// A copy of this operation with its filter replaced.
    pub fn with_filter(&self, filter: Document) -> Self {
        let mut args = self.args.clone();
        if args.is_empty() {
            args.push(Value::Document(filter));
        } else {
            args[0] = Value::Document(filter);
        }
        Self {
            method: self.method.clone(),
            args,
            kwargs: self.kwargs.clone(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        let mut first = true;
        if let Method::BulkWrite(ops) = &self.method {
            write!(f, "[{} ops]", ops.len())?;
            first = false;
        }
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
            first = false;
        }
        for (key, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        write!(f, ")")
    }
}
