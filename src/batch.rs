//! Batch Buffer
//!
//! Fixed-capacity storage for bytes received since the last flush.
//!
//! ```text
//! batch 0: [full .................]
//! batch 1: [full .................]
//! batch 2: [partial ....|         ]   <- cursor (2, offset)
//! batch 3: [zeroed                ]
//! ```
//!
//! TigerStyle Invariants:
//! - at most one batch is partially filled (the one under the cursor)
//! - every batch before the cursor is full, every batch after it is zeroed
//! - the cursor only moves forward until `snapshot_and_clear` resets it
//!
//! Only the ingestion loop writes here. Flushes hand out `BatchSnapshot`, an
//! owned deep copy, so consumers never alias the live buffers.

/// Next write position inside a `BatchSet`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub batch: usize,
    pub offset: usize,
}

impl Cursor {
    pub const ORIGIN: Cursor = Cursor { batch: 0, offset: 0 };
}

/// Owned copy of every batch at flush time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSnapshot {
    batches: Vec<Vec<u8>>,
}

impl BatchSnapshot {
    pub fn from_batches(batches: Vec<Vec<u8>>) -> Self {
        BatchSnapshot { batches }
    }

    pub fn batches(&self) -> &[Vec<u8>] {
        &self.batches
    }

    pub fn batches_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.batches
    }

    pub fn into_batches(self) -> Vec<Vec<u8>> {
        self.batches
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batches.first().map_or(0, Vec::len)
    }

    /// All batches laid end to end, zero padding included
    pub fn to_flat(&self) -> Vec<u8> {
        self.batches.concat()
    }
}

/// The live batch set written by the ingestion loop
#[derive(Debug)]
pub struct BatchSet {
    batches: Box<[Box<[u8]>]>,
    batch_size: usize,
    cursor: Cursor,
}

impl BatchSet {
    /// Callers validate `batch_size` through `ListenerConfig::validate`.
    pub fn new(batch_size: usize, batch_count: usize) -> Self {
        debug_assert!(batch_size > 0, "batch size must be positive");
        debug_assert!(batch_count > 0, "batch count must be positive");

        let batches = (0..batch_count)
            .map(|_| vec![0u8; batch_size].into_boxed_slice())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        BatchSet {
            batches,
            batch_size,
            cursor: Cursor::ORIGIN,
        }
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[inline]
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    #[inline]
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Bytes the set holds when every batch is full
    pub fn capacity(&self) -> usize {
        self.batch_size * self.batches.len()
    }

    /// Bytes written since the last clear
    pub fn pending_bytes(&self) -> usize {
        self.cursor.batch * self.batch_size + self.cursor.offset
    }

    /// Append one byte. Returns true when this write filled the last batch.
    #[inline]
    pub fn write_byte(&mut self, byte: u8) -> bool {
        debug_assert!(!self.is_full(), "write into a full batch set");
        if self.is_full() {
            return true;
        }

        self.batches[self.cursor.batch][self.cursor.offset] = byte;
        self.cursor.offset += 1;

        if self.cursor.offset == self.batch_size {
            self.cursor.offset = 0;
            self.cursor.batch += 1;
        }

        self.is_full()
    }

    /// Append bytes until the set is full. Returns how many were consumed;
    /// the caller flushes and writes the rest.
    pub fn write_slice(&mut self, bytes: &[u8]) -> usize {
        let mut consumed = 0;
        for &byte in bytes {
            if self.is_full() {
                break;
            }
            self.write_byte(byte);
            consumed += 1;
        }
        consumed
    }

    /// Primary flush trigger: every batch has been filled
    #[inline]
    pub fn is_full(&self) -> bool {
        self.cursor.batch == self.batches.len()
    }

    /// Nothing written since the last clear
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cursor == Cursor::ORIGIN
    }

    /// Number of batches holding at least one written byte
    pub fn filled_batches(&self) -> usize {
        self.cursor.batch + usize::from(self.cursor.offset > 0)
    }

    /// Deep-copy every batch, then zero the live buffers and reset the cursor.
    pub fn snapshot_and_clear(&mut self) -> BatchSnapshot {
        let snapshot = BatchSnapshot {
            batches: self.batches.iter().map(|batch| batch.to_vec()).collect(),
        };

        for batch in self.batches.iter_mut() {
            batch.fill(0);
        }
        self.cursor = Cursor::ORIGIN;

        snapshot
    }
}
