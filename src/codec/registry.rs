use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{Schema, SchemaLookupMiss, SchemaRegistry};

/// HashMap-backed schema registry. Clone-friendly via Arc.
#[derive(Clone, Default)]
pub struct InMemorySchemaRegistry {
    schemas: Arc<RwLock<HashMap<String, Schema>>>,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the schema of a table.
    pub fn register(&self, table: impl Into<String>, schema: Schema) {
        if let Ok(mut schemas) = self.schemas.write() {
            schemas.insert(table.into(), schema);
        }
    }
}

impl SchemaRegistry for InMemorySchemaRegistry {
    fn schema_for(&self, table: &str) -> Result<Schema, SchemaLookupMiss> {
        let miss = || SchemaLookupMiss {
            table: table.to_string(),
        };
        let schemas = self.schemas.read().map_err(|_| miss())?;
        schemas.get(table).cloned().ok_or_else(miss)
    }
}
