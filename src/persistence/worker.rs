//! Persistence worker
//!
//! Saves run off the ingestion loop so a slow disk never stalls it. The
//! handle implements `ByteDataSink` by enqueueing a message; the worker owns
//! the real sink, runs each call on tokio's blocking pool in arrival order and
//! logs failures.
//!
//! ```text
//! listener ──► PersistenceHandle ──► mpsc ──► worker ──► spawn_blocking(sink)
//! ```

use super::{ByteDataSink, PersistenceError, TableSchema};
use crate::batch::BatchSnapshot;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{error, info};

/// Messages for the persistence worker
pub enum PersistenceMessage {
    CreateTable(TableSchema),
    Save {
        table: String,
        batches: BatchSnapshot,
        source_name: String,
    },
    /// Drain queued saves, then stop
    Shutdown { response_tx: oneshot::Sender<()> },
}

struct PersistenceWorker<S: ByteDataSink> {
    sink: Arc<S>,
    rx: mpsc::UnboundedReceiver<PersistenceMessage>,
}

impl<S: ByteDataSink> PersistenceWorker<S> {
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            let sink = self.sink.clone();
            match msg {
                PersistenceMessage::CreateTable(schema) => {
                    let table = schema.name.clone();
                    match spawn_blocking(move || sink.create_table(&schema)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(table = %table, "create table failed: {}", e),
                        Err(e) => error!(table = %table, "create table task failed: {}", e),
                    }
                }
                PersistenceMessage::Save {
                    table,
                    batches,
                    source_name,
                } => {
                    let (table_name, source) = (table.clone(), source_name.clone());
                    let outcome = spawn_blocking(move || {
                        sink.save_byte_data(&table_name, batches, &source)
                    })
                    .await;
                    let failure = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(e.to_string()),
                        Err(e) => Some(format!("task failed: {}", e)),
                    };
                    if let Some(cause) = failure {
                        error!(table = %table, source = %source_name, "save failed: {}", cause);
                    }
                }
                PersistenceMessage::Shutdown { response_tx } => {
                    info!("persistence worker shutting down");
                    let _ = response_tx.send(());
                    return;
                }
            }
        }
    }
}

/// Fire-and-forget front-end to a persistence worker
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistenceMessage>,
}

impl PersistenceHandle {
    /// Wait until everything queued before this call has been handled
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .tx
            .send(PersistenceMessage::Shutdown { response_tx })
            .is_ok()
        {
            let _ = response_rx.await;
        }
    }
}

impl ByteDataSink for PersistenceHandle {
    fn create_table(&self, schema: &TableSchema) -> Result<(), PersistenceError> {
        self.tx
            .send(PersistenceMessage::CreateTable(schema.clone()))
            .map_err(|_| PersistenceError::WorkerStopped)
    }

    fn save_byte_data(
        &self,
        table: &str,
        batches: BatchSnapshot,
        source_name: &str,
    ) -> Result<(), PersistenceError> {
        self.tx
            .send(PersistenceMessage::Save {
                table: table.to_string(),
                batches,
                source_name: source_name.to_string(),
            })
            .map_err(|_| PersistenceError::WorkerStopped)
    }
}

/// Spawn a worker that owns `sink`
pub fn spawn_persistence_worker<S: ByteDataSink>(
    sink: S,
) -> (PersistenceHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = PersistenceWorker {
        sink: Arc::new(sink),
        rx,
    };
    let join = tokio::spawn(worker.run());
    (PersistenceHandle { tx }, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryByteStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_worker_applies_in_order() {
        let store = InMemoryByteStore::new();
        let (handle, join) = spawn_persistence_worker(store.clone());

        handle
            .create_table(&TableSchema::byte_batches("uart0", 16))
            .unwrap();
        for fill in 1..=3u8 {
            handle
                .save_byte_data(
                    "uart0",
                    BatchSnapshot::from_batches(vec![vec![fill; 16]]),
                    "uart0",
                )
                .unwrap();
        }
        handle.shutdown().await;
        join.await.unwrap();

        let fills: Vec<u8> = store
            .records()
            .iter()
            .map(|r| r.batches.batches()[0][0])
            .collect();
        assert_eq!(fills, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_save_does_not_stop_worker() {
        let store = InMemoryByteStore::new();
        let (handle, join) = spawn_persistence_worker(store.clone());

        // No table yet: logged and dropped
        handle
            .save_byte_data("uart0", BatchSnapshot::from_batches(vec![vec![0; 16]]), "uart0")
            .unwrap();
        handle
            .create_table(&TableSchema::byte_batches("uart0", 16))
            .unwrap();
        handle
            .save_byte_data("uart0", BatchSnapshot::from_batches(vec![vec![1; 16]]), "uart0")
            .unwrap();
        handle.shutdown().await;
        join.await.unwrap();

        assert_eq!(store.record_count(), 1);
    }

    /// Blocks inside `save_byte_data` until released or 2s pass
    struct GatedSink {
        release: parking_lot::Mutex<std::sync::mpsc::Receiver<()>>,
        released: Arc<AtomicBool>,
    }

    impl ByteDataSink for GatedSink {
        fn create_table(&self, _schema: &TableSchema) -> Result<(), PersistenceError> {
            Ok(())
        }

        fn save_byte_data(
            &self,
            _table: &str,
            _batches: BatchSnapshot,
            _source_name: &str,
        ) -> Result<(), PersistenceError> {
            let gate = self.release.lock();
            if gate.recv_timeout(Duration::from_secs(2)).is_ok() {
                self.released.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blocking_save_leaves_runtime_free() {
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let released = Arc::new(AtomicBool::new(false));
        let (handle, join) = spawn_persistence_worker(GatedSink {
            release: parking_lot::Mutex::new(release_rx),
            released: released.clone(),
        });

        handle
            .save_byte_data("uart0", BatchSnapshot::from_batches(vec![vec![0; 16]]), "uart0")
            .unwrap();

        // Only reachable while the save is blocked if it runs off the runtime thread
        tokio::time::sleep(Duration::from_millis(20)).await;
        release_tx.send(()).unwrap();

        handle.shutdown().await;
        join.await.unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_send_after_stop_reports_worker_stopped() {
        let (handle, join) = spawn_persistence_worker(InMemoryByteStore::new());
        handle.shutdown().await;
        join.await.unwrap();

        let err = handle
            .save_byte_data("uart0", BatchSnapshot::from_batches(vec![vec![0; 16]]), "uart0")
            .unwrap_err();
        assert!(matches!(err, PersistenceError::WorkerStopped));
    }
}
