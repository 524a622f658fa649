//! Stream log storage - byte-level API for resumable stream persistence.
//!
//! Registrations are opaque blobs owned by the caller. Frames are
//! append-only; each append bumps the per-stream head and touch time inside
//! the same write transaction, so a reader never observes a head that points
//! past the last committed frame.

use anyhow::{Result, anyhow};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

use crate::range_utils::{frame_key, prefix_end_bound};
use crate::time_utils::now_ms;

#[derive(Debug, Clone)]
struct TableNames {
    registrations: String,
    frames: String,
    heads: String,
    touched: String,
}

impl TableNames {
    fn new(prefix: &str) -> Self {
        Self {
            registrations: format!("{}:registrations", prefix),
            frames: format!("{}:frames", prefix),
            heads: format!("{}:heads", prefix),
            touched: format!("{}:touched", prefix),
        }
    }

    fn registrations(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.registrations)
    }

    fn frames(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.frames)
    }

    fn heads(&self) -> TableDefinition<'_, &'static str, u64> {
        TableDefinition::new(&self.heads)
    }

    fn touched(&self) -> TableDefinition<'_, &'static str, i64> {
        TableDefinition::new(&self.touched)
    }
}

/// Low-level stream log storage with byte-level API
#[derive(Debug, Clone)]
pub struct StreamLogStorage {
    db: Arc<Database>,
    tables: TableNames,
}

impl StreamLogStorage {
    pub fn new(db: Arc<Database>, key_prefix: &str) -> Result<Self> {
        let tables = TableNames::new(key_prefix);

        let write_txn = db.begin_write()?;
        write_txn.open_table(tables.registrations())?;
        write_txn.open_table(tables.frames())?;
        write_txn.open_table(tables.heads())?;
        write_txn.open_table(tables.touched())?;
        write_txn.commit()?;

        Ok(Self { db, tables })
    }

    /// Store (or overwrite) raw registration data
    pub fn put_registration(&self, stream_id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(self.tables.registrations())?;
            table.insert(stream_id, data)?;
            let mut touched = write_txn.open_table(self.tables.touched())?;
            touched.insert(stream_id, now_ms())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get raw registration data by stream ID
    pub fn get_registration(&self, stream_id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(self.tables.registrations())?;

        if let Some(data) = table.get(stream_id)? {
            Ok(Some(data.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    /// Append a frame and return its sequence number.
    ///
    /// Fails if the stream was never registered.
    pub fn append_frame(&self, stream_id: &str, data: &[u8]) -> Result<u64> {
        let write_txn = self.db.begin_write()?;
        let seq = {
            let registrations = write_txn.open_table(self.tables.registrations())?;
            if registrations.get(stream_id)?.is_none() {
                return Err(anyhow!("Stream {} is not registered", stream_id));
            }

            let mut heads = write_txn.open_table(self.tables.heads())?;
            let seq = heads.get(stream_id)?.map(|value| value.value()).unwrap_or(0);

            let mut frames = write_txn.open_table(self.tables.frames())?;
            frames.insert(frame_key(stream_id, seq).as_str(), data)?;
            heads.insert(stream_id, seq + 1)?;

            let mut touched = write_txn.open_table(self.tables.touched())?;
            touched.insert(stream_id, now_ms())?;
            seq
        };
        write_txn.commit()?;
        Ok(seq)
    }

    /// Number of frames appended so far.
    pub fn frame_count(&self, stream_id: &str) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let heads = read_txn.open_table(self.tables.heads())?;
        Ok(heads.get(stream_id)?.map(|value| value.value()).unwrap_or(0))
    }

    /// Read up to `limit` frames starting at `from_seq`, in sequence order.
    pub fn read_frames(
        &self,
        stream_id: &str,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<(u64, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let frames = read_txn.open_table(self.tables.frames())?;

        let start = frame_key(stream_id, from_seq);
        let end = prefix_end_bound(&format!("{}:", stream_id));

        let mut items = Vec::new();
        for item in frames.range(start.as_str()..end.as_str())?.take(limit) {
            let (key, value) = item?;
            let seq = key
                .value()
                .rsplit(':')
                .next()
                .and_then(|raw| raw.parse::<u64>().ok())
                .ok_or_else(|| anyhow!("Malformed frame key {}", key.value()))?;
            items.push((seq, value.value().to_vec()));
        }

        Ok(items)
    }

    /// Last time (ms since epoch) the stream was registered or written to.
    pub fn last_touched_ms(&self, stream_id: &str) -> Result<Option<i64>> {
        let read_txn = self.db.begin_read()?;
        let touched = read_txn.open_table(self.tables.touched())?;
        Ok(touched.get(stream_id)?.map(|value| value.value()))
    }
}
