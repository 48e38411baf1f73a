//! Persistence collaborator
//!
//! Flushed batch sets are handed to a `ByteDataSink`. The listener treats the
//! sink as fire-and-forget: it logs a failed save and moves on.
//!
//! ## Implementations
//!
//! - `InMemoryByteStore`: for tests and embedding
//! - `LocalFsByteStore`: one append-only, checksummed file per table
//! - `PersistenceHandle`: channel front-end to a worker task owning another sink

pub mod store;
pub mod worker;

pub use store::{InMemoryByteStore, LocalFsByteStore, StoredRecord};
pub use worker::{spawn_persistence_worker, PersistenceHandle};

use crate::batch::BatchSnapshot;
use serde::{Deserialize, Serialize};
use std::io::Error as IoError;

/// Column name used for the flushed batches
pub const BATCH_COLUMN: &str = "batch_sample";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Byte,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub size: usize,
    pub kind: ColumnKind,
}

/// Table declared by a listener at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    /// One byte-array column sized to the batch size
    pub fn byte_batches(name: &str, batch_size: usize) -> Self {
        TableSchema {
            name: name.to_string(),
            columns: vec![ColumnSpec {
                name: BATCH_COLUMN.to_string(),
                size: batch_size,
                kind: ColumnKind::Byte,
            }],
        }
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.columns
            .iter()
            .find(|c| c.name == BATCH_COLUMN)
            .map(|c| c.size)
    }
}

/// Error type for persistence operations
#[derive(Debug)]
pub enum PersistenceError {
    /// I/O error
    Io(IoError),
    /// Save into a table nobody created
    UnknownTable(String),
    /// Batch width differs from the declared column size
    SchemaMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },
    /// Stored record failed its checksum or framing
    Corruption(String),
    /// Worker task is gone
    WorkerStopped,
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "Persistence I/O error: {}", e),
            PersistenceError::UnknownTable(name) => write!(f, "Unknown table: {}", name),
            PersistenceError::SchemaMismatch {
                table,
                expected,
                actual,
            } => write!(
                f,
                "Table {} expects {} byte batches, got {}",
                table, expected, actual
            ),
            PersistenceError::Corruption(msg) => write!(f, "Persistence corruption: {}", msg),
            PersistenceError::WorkerStopped => write!(f, "Persistence worker stopped"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<IoError> for PersistenceError {
    fn from(e: IoError) -> Self {
        PersistenceError::Io(e)
    }
}

/// Destination for flushed batch sets
pub trait ByteDataSink: Send + Sync + 'static {
    fn create_table(&self, schema: &TableSchema) -> Result<(), PersistenceError>;

    fn save_byte_data(
        &self,
        table: &str,
        batches: BatchSnapshot,
        source_name: &str,
    ) -> Result<(), PersistenceError>;
}

impl<S: ByteDataSink> ByteDataSink for std::sync::Arc<S> {
    fn create_table(&self, schema: &TableSchema) -> Result<(), PersistenceError> {
        (**self).create_table(schema)
    }

    fn save_byte_data(
        &self,
        table: &str,
        batches: BatchSnapshot,
        source_name: &str,
    ) -> Result<(), PersistenceError> {
        (**self).save_byte_data(table, batches, source_name)
    }
}

fn check_width(schema: &TableSchema, batches: &BatchSnapshot) -> Result<(), PersistenceError> {
    if let Some(expected) = schema.batch_size() {
        let actual = batches.batch_size();
        if actual != expected {
            return Err(PersistenceError::SchemaMismatch {
                table: schema.name.clone(),
                expected,
                actual,
            });
        }
    }
    Ok(())
}
