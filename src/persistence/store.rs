//! Byte data stores
//!
//! ## LocalFs record format
//!
//! ```text
//! ┌──────────┬──────────┬──────────────┬─────────────┬────────────┬─────────┐
//! │ len u32  │ crc32 u32│ timestamp u64│ batches u32 │ width u32  │ payload │
//! └──────────┴──────────┴──────────────┴─────────────┴────────────┴─────────┘
//! ```
//!
//! All integers little-endian. `len` counts everything after the crc field;
//! the crc covers the same bytes.

use super::{check_width, ByteDataSink, PersistenceError, TableSchema};
use crate::batch::BatchSnapshot;
use crate::reporting::unix_millis;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Header bytes after the crc field
const RECORD_HEADER_LEN: usize = 8 + 4 + 4;

/// One saved flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub table: String,
    pub source_name: String,
    pub timestamp_ms: u64,
    pub batches: BatchSnapshot,
}

// ============================================================================
// InMemoryByteStore - For unit tests and embedding
// ============================================================================

#[derive(Debug, Default)]
struct InMemoryState {
    tables: HashMap<String, TableSchema>,
    records: Vec<StoredRecord>,
}

/// In-memory store; clones share state
#[derive(Debug, Clone, Default)]
pub struct InMemoryByteStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tables(&self) -> Vec<TableSchema> {
        let mut tables: Vec<_> = self.state.read().tables.values().cloned().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// Every saved record, oldest first
    pub fn records(&self) -> Vec<StoredRecord> {
        self.state.read().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.state.read().records.len()
    }
}

impl ByteDataSink for InMemoryByteStore {
    fn create_table(&self, schema: &TableSchema) -> Result<(), PersistenceError> {
        self.state
            .write()
            .tables
            .insert(schema.name.clone(), schema.clone());
        Ok(())
    }

    fn save_byte_data(
        &self,
        table: &str,
        batches: BatchSnapshot,
        source_name: &str,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.write();
        let schema = state
            .tables
            .get(table)
            .ok_or_else(|| PersistenceError::UnknownTable(table.to_string()))?;
        check_width(schema, &batches)?;

        state.records.push(StoredRecord {
            table: table.to_string(),
            source_name: source_name.to_string(),
            timestamp_ms: unix_millis(),
            batches,
        });
        Ok(())
    }
}

// ============================================================================
// LocalFsByteStore - For the binary
// ============================================================================

/// File-per-table store under a base directory
///
/// `<base>/<table>.schema.json` holds the schema, `<base>/<table>.bin` the records.
#[derive(Debug)]
pub struct LocalFsByteStore {
    base_path: PathBuf,
    tables: Mutex<HashMap<String, (TableSchema, File)>>,
}

impl LocalFsByteStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(LocalFsByteStore {
            base_path,
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn data_path(&self, table: &str) -> PathBuf {
        self.base_path.join(format!("{}.bin", table))
    }

    fn schema_path(&self, table: &str) -> PathBuf {
        self.base_path.join(format!("{}.schema.json", table))
    }

    fn encode_record(timestamp_ms: u64, batches: &BatchSnapshot) -> Vec<u8> {
        let payload_len = batches.batch_count() * batches.batch_size();
        let mut body = Vec::with_capacity(RECORD_HEADER_LEN + payload_len);
        body.extend_from_slice(&timestamp_ms.to_le_bytes());
        body.extend_from_slice(&(batches.batch_count() as u32).to_le_bytes());
        body.extend_from_slice(&(batches.batch_size() as u32).to_le_bytes());
        for batch in batches.batches() {
            body.extend_from_slice(batch);
        }

        let mut record = Vec::with_capacity(8 + body.len());
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        record.extend_from_slice(&body);
        record
    }

    /// Read and verify every record of `table`
    pub fn read_records(&self, table: &str) -> Result<Vec<StoredRecord>, PersistenceError> {
        let mut data = Vec::new();
        File::open(self.data_path(table))?.read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            let header = data
                .get(pos..pos + 8)
                .ok_or_else(|| {
                    PersistenceError::Corruption(format!("truncated header at {}", pos))
                })?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            pos += 8;

            let body = data
                .get(pos..pos + len)
                .ok_or_else(|| {
                    PersistenceError::Corruption(format!("truncated record at {}", pos))
                })?;
            if crc32fast::hash(body) != crc {
                return Err(PersistenceError::Corruption(format!(
                    "checksum mismatch at {}",
                    pos
                )));
            }
            if body.len() < RECORD_HEADER_LEN {
                return Err(PersistenceError::Corruption(format!("short record at {}", pos)));
            }

            let mut ts = [0u8; 8];
            ts.copy_from_slice(&body[0..8]);
            let count = u32::from_le_bytes([body[8], body[9], body[10], body[11]]) as usize;
            let width = u32::from_le_bytes([body[12], body[13], body[14], body[15]]) as usize;
            let payload = &body[RECORD_HEADER_LEN..];
            if payload.len() != count * width || width == 0 {
                return Err(PersistenceError::Corruption(format!(
                    "payload size mismatch at {}",
                    pos
                )));
            }

            records.push(StoredRecord {
                table: table.to_string(),
                source_name: table.to_string(),
                timestamp_ms: u64::from_le_bytes(ts),
                batches: BatchSnapshot::from_batches(
                    payload.chunks(width).map(<[u8]>::to_vec).collect(),
                ),
            });
            pos += len;
        }

        Ok(records)
    }
}

impl ByteDataSink for LocalFsByteStore {
    fn create_table(&self, schema: &TableSchema) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(schema)
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))?;
        std::fs::write(self.schema_path(&schema.name), json)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_path(&schema.name))?;
        self.tables
            .lock()
            .insert(schema.name.clone(), (schema.clone(), file));
        debug!(table = %schema.name, path = ?self.base_path, "table ready");
        Ok(())
    }

    fn save_byte_data(
        &self,
        table: &str,
        batches: BatchSnapshot,
        _source_name: &str,
    ) -> Result<(), PersistenceError> {
        let mut tables = self.tables.lock();
        let (schema, file) = tables
            .get_mut(table)
            .ok_or_else(|| PersistenceError::UnknownTable(table.to_string()))?;
        check_width(schema, &batches)?;

        let record = Self::encode_record(unix_millis(), &batches);
        file.write_all(&record)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(width: usize, fill: u8) -> BatchSnapshot {
        BatchSnapshot::from_batches(vec![vec![fill; width], vec![0; width]])
    }

    #[test]
    fn test_in_memory_requires_table() {
        let store = InMemoryByteStore::new();
        let err = store
            .save_byte_data("uart0", snapshot(16, 1), "uart0")
            .unwrap_err();
        assert!(matches!(err, PersistenceError::UnknownTable(_)));

        store.create_table(&TableSchema::byte_batches("uart0", 16)).unwrap();
        store.save_byte_data("uart0", snapshot(16, 1), "uart0").unwrap();
        assert_eq!(store.record_count(), 1);
        assert_eq!(store.records()[0].batches.to_flat()[..16], [1u8; 16]);
    }

    #[test]
    fn test_in_memory_rejects_wrong_width() {
        let store = InMemoryByteStore::new();
        store.create_table(&TableSchema::byte_batches("uart0", 16)).unwrap();
        let err = store
            .save_byte_data("uart0", snapshot(32, 1), "uart0")
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::SchemaMismatch { expected: 16, actual: 32, .. }
        ));
    }

    #[test]
    fn test_local_fs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsByteStore::new(dir.path()).unwrap();
        let schema = TableSchema::byte_batches("uart0", 16);
        store.create_table(&schema).unwrap();

        store.save_byte_data("uart0", snapshot(16, 0xA5), "uart0").unwrap();
        store.save_byte_data("uart0", snapshot(16, 0x5A), "uart0").unwrap();

        let records = store.read_records("uart0").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].batches, snapshot(16, 0xA5));
        assert_eq!(records[1].batches, snapshot(16, 0x5A));

        let schema_json = std::fs::read_to_string(dir.path().join("uart0.schema.json")).unwrap();
        let parsed: TableSchema = serde_json::from_str(&schema_json).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn test_local_fs_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsByteStore::new(dir.path()).unwrap();
        store.create_table(&TableSchema::byte_batches("uart0", 16)).unwrap();
        store.save_byte_data("uart0", snapshot(16, 3), "uart0").unwrap();

        let path = dir.path().join("uart0.bin");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            store.read_records("uart0"),
            Err(PersistenceError::Corruption(_))
        ));
    }
}
