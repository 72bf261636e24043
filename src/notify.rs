//! Change notifications published after successful mutations.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::query::QueryType;

/// A committed mutation of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub table: String,
    pub kind: QueryType,
    /// String form of the affected ids.
    pub ids: Vec<String>,
}

impl Change {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    BufferPoisoned,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::BufferPoisoned => write!(f, "change buffer poisoned"),
        }
    }
}

impl std::error::Error for PublishError {}

/// Receives a [`Change`] after each committed mutation.
pub trait ChangePublisher: Send {
    fn publish(&mut self, change: &Change) -> Result<(), PublishError>;
}

/// Writes changes to the log, or to a shared buffer.
#[derive(Default)]
pub struct LogChangePublisher {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogChangePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }
}

impl ChangePublisher for LogChangePublisher {
    fn publish(&mut self, change: &Change) -> Result<(), PublishError> {
        let line = format!("[CHANGE] {} {}", change.kind.as_str(), change.to_json());
        match &self.buffer {
            Some(buffer) => buffer
                .lock()
                .map_err(|_| PublishError::BufferPoisoned)?
                .push(line),
            None => tracing::info!(table = change.table.as_str(), "{}", line),
        }
        Ok(())
    }
}

/// Emits each change as a JSON string under its kind (`"insert"`,
/// `"update"`, ...) for in-process listeners.
#[cfg(feature = "emitter")]
pub struct EmitterChangePublisher {
    emitter: event_emitter_rs::EventEmitter,
}

#[cfg(feature = "emitter")]
impl EmitterChangePublisher {
    pub fn new(emitter: event_emitter_rs::EventEmitter) -> Self {
        Self { emitter }
    }

    /// Register listeners here before handing the publisher to a datalayer.
    pub fn emitter_mut(&mut self) -> &mut event_emitter_rs::EventEmitter {
        &mut self.emitter
    }
}

#[cfg(feature = "emitter")]
impl ChangePublisher for EmitterChangePublisher {
    fn publish(&mut self, change: &Change) -> Result<(), PublishError> {
        self.emitter.emit(change.kind.as_str(), change.to_json());
        Ok(())
    }
}
