//! Atomic multi-write commits
//!
//! Every slot transition is a handful of small writes (tag word, payload,
//! header) that must land all together or not at all. The slab hands those
//! writes to a [`Transactor`] as one [`Transaction`].
//!
//! [`WriteAheadLog`] implements it as a redo log that holds at most one batch:
//!
//! ```text
//! commit(tx):
//!   1. log  ← [u32 len][json batch][u64 checksum]    ← torn here: batch discarded
//!   2. sync log                                      ← durability point
//!   3. data ← each write, sync data                  ← torn here: batch redone on open
//!   4. truncate log
//! ```
//!
//! Recovery: a complete batch still in the log is applied again (writes are
//! absolute, so replay is idempotent); a torn one is dropped.

use super::media::Media;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FRAME_OVERHEAD: usize = 4 + 8;

/// One absolute write inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogWrite {
    pub offset: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// A group of writes that must become visible atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    writes: Vec<LogWrite>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write of `data` at `offset`
    pub fn write(&mut self, offset: u64, data: impl Into<Vec<u8>>) {
        self.writes.push(LogWrite {
            offset,
            data: data.into(),
        });
    }

    /// Stage the raw bytes of a plain-old-data value
    pub fn write_pod<P: bytemuck::Pod>(&mut self, offset: u64, value: &P) {
        self.write(offset, bytemuck::bytes_of(value).to_vec());
    }

    pub fn writes(&self) -> &[LogWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// The durability boundary the slab is built on
pub trait Transactor: Send + Sync {
    /// Apply every write in `tx` or none of them.
    ///
    /// `Error::Transaction` means nothing was applied. `Error::Poisoned` means
    /// the batch is durable but not fully applied; it completes on `recover`.
    fn commit(&self, tx: Transaction) -> Result<()>;

    /// Unlogged write followed by a flush. Only for bytes no reader can see yet.
    fn persist(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Finish or discard whatever a crash left behind. Returns the number of
    /// writes replayed.
    fn recover(&self) -> Result<usize>;
}

impl dyn Transactor {
    /// Build a transaction in `f` and commit it. If `f` fails nothing is written.
    pub fn run<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        let mut tx = Transaction::new();
        f(&mut tx)?;
        self.commit(tx)
    }
}

/// A logged batch, as framed in the log media
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    /// Batch sequence number (monotonically increasing within a process)
    pub sequence: u64,
    /// Timestamp (milliseconds since epoch)
    pub timestamp: u64,
    pub writes: Vec<LogWrite>,
}

impl LogBatch {
    pub fn new(sequence: u64, writes: Vec<LogWrite>) -> Self {
        Self {
            sequence,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            writes,
        }
    }

    /// Serialize to bytes with length prefix and checksum trailer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize batch: {}", e)))?;

        // Format: [4-byte length][json data][8-byte checksum]
        let mut result = Vec::with_capacity(json.len() + FRAME_OVERHEAD);
        result.extend_from_slice(&(json.len() as u32).to_le_bytes());
        result.extend_from_slice(&json);
        result.extend_from_slice(&checksum(&json).to_le_bytes());

        Ok(result)
    }

    /// Deserialize from bytes, rejecting short or damaged frames
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(Error::Corruption("Batch too short".to_string()));
        }

        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < len + FRAME_OVERHEAD {
            return Err(Error::Corruption(format!(
                "Incomplete batch: expected {} bytes, got {}",
                len + FRAME_OVERHEAD,
                bytes.len()
            )));
        }

        let json = &bytes[4..4 + len];

        let mut stored = [0u8; 8];
        stored.copy_from_slice(&bytes[4 + len..4 + len + 8]);
        if u64::from_le_bytes(stored) != checksum(json) {
            return Err(Error::Corruption("Checksum mismatch".to_string()));
        }

        serde_json::from_slice(json)
            .map_err(|e| Error::Corruption(format!("Failed to deserialize batch: {}", e)))
    }
}

/// XXH3 over the batch body
fn checksum(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

/// Redo log over a pair of media: the log itself and the data it protects
pub struct WriteAheadLog {
    data: Arc<dyn Media>,
    log: Arc<dyn Media>,
    sync_writes: bool,
    /// Next sequence number; the lock also serializes commits
    sequence: Mutex<u64>,
}

impl WriteAheadLog {
    pub fn new(data: Arc<dyn Media>, log: Arc<dyn Media>, sync_writes: bool) -> Self {
        Self {
            data,
            log,
            sync_writes,
            sequence: Mutex::new(0),
        }
    }

    fn sync(&self, media: &dyn Media) -> Result<()> {
        if self.sync_writes {
            media.sync()?;
        }
        Ok(())
    }

    fn apply(&self, writes: &[LogWrite]) -> Result<()> {
        for write in writes {
            self.data.write_at(write.offset, &write.data)?;
        }
        self.sync(self.data.as_ref())
    }

    fn clear_log(&self) -> Result<()> {
        self.log.set_len(0)?;
        self.sync(self.log.as_ref())
    }
}

impl Transactor for WriteAheadLog {
    fn commit(&self, tx: Transaction) -> Result<()> {
        if tx.is_empty() {
            return Ok(());
        }

        let mut sequence = self.sequence.lock();
        let batch = LogBatch::new(*sequence, tx.writes);
        let bytes = batch.to_bytes()?;

        let logged = self
            .log
            .write_at(0, &bytes)
            .and_then(|_| self.sync(self.log.as_ref()));
        if let Err(e) = logged {
            // Best effort: a batch that reached the log must not be redone later
            self.log.set_len(0).ok();
            return Err(Error::Transaction(format!(
                "Failed to log batch {}: {}",
                batch.sequence, e
            )));
        }
        *sequence += 1;

        if let Err(e) = self.apply(&batch.writes) {
            warn!(sequence = batch.sequence, error = %e, "Batch logged but not applied");
            return Err(Error::Poisoned(format!(
                "Batch {} is durable but was not applied: {}",
                batch.sequence, e
            )));
        }

        // The batch is fully applied; a stale copy left in the log replays harmlessly
        if let Err(e) = self.clear_log() {
            warn!(sequence = batch.sequence, error = %e, "Failed to truncate log");
        }

        debug!(
            sequence = batch.sequence,
            writes = batch.writes.len(),
            bytes = bytes.len(),
            "Committed batch"
        );
        Ok(())
    }

    fn persist(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.data.write_at(offset, data)?;
        self.sync(self.data.as_ref())
    }

    fn recover(&self) -> Result<usize> {
        let len = self.log.len()? as usize;
        if len == 0 {
            return Ok(0);
        }

        let mut bytes = vec![0u8; len];
        self.log.read_at(0, &mut bytes)?;

        match LogBatch::from_bytes(&bytes) {
            Ok(batch) => {
                info!(
                    sequence = batch.sequence,
                    writes = batch.writes.len(),
                    "Replaying logged batch"
                );
                self.apply(&batch.writes)?;
                self.clear_log()?;
                *self.sequence.lock() = batch.sequence + 1;
                Ok(batch.writes.len())
            }
            Err(e) => {
                warn!(error = %e, bytes = len, "Discarding torn log batch");
                self.clear_log()?;
                Ok(0)
            }
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
