//! Batched transactional writes

use log::{error, info};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::RunStats;
use crate::models::NormalizedRecord;
use crate::storage::RecordStore;

/// Result of a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered
    Empty,
    /// This many records were committed in one transaction
    Committed(usize),
    /// The transaction failed and this many records were discarded
    Dropped(usize),
}

#[derive(Default)]
struct WriterState {
    buffer: Vec<NormalizedRecord>,
    stats: RunStats,
    dropped: usize,
}

/// Buffers records and upserts them in bounded batches
///
/// The buffer is guarded by a mutex so file workers can share one writer.
/// A failed batch is dropped as a whole rather than retried record by
/// record; the run carries on and relies on the next sync to converge.
pub struct BatchWriter<'a> {
    store: &'a dyn RecordStore,
    capacity: usize,
    state: Mutex<WriterState>,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a dyn RecordStore, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer a record, flushing once the buffer reaches capacity
    pub fn add(&self, record: NormalizedRecord) -> Option<FlushOutcome> {
        let mut state = self.lock();
        state.buffer.push(record);
        if state.buffer.len() >= self.capacity {
            Some(self.flush_locked(&mut state))
        } else {
            None
        }
    }

    /// Commit everything buffered; never fails, see [`FlushOutcome`]
    pub fn flush(&self) -> FlushOutcome {
        let mut state = self.lock();
        self.flush_locked(&mut state)
    }

    /// Records waiting for the next flush
    pub fn pending(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Batches committed and records dropped so far
    pub fn stats(&self) -> RunStats {
        self.lock().stats
    }

    /// Total records discarded by failed batches
    pub fn records_dropped(&self) -> usize {
        self.lock().dropped
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_locked(&self, state: &mut WriterState) -> FlushOutcome {
        if state.buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = state.buffer.len();
        let outcome = match self.store.upsert_batch(&state.buffer) {
            Ok(()) => {
                info!("Committed a batch of {count} records to the database");
                state.stats.batches_committed += 1;
                FlushOutcome::Committed(count)
            }
            Err(e) => {
                error!("Database batch upsert of {count} records failed: {e:#}");
                state.stats.errors += count;
                state.dropped += count;
                FlushOutcome::Dropped(count)
            }
        };

        state.buffer.clear();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangeCursor, StoredRecord};
    use crate::storage::InMemoryRecordStore;
    use anyhow::{Result, bail};
    use serde_json::json;

    fn make_record(id: &str) -> NormalizedRecord {
        NormalizedRecord {
            source_id: id.to_string(),
            title: format!("Movie {id}"),
            genre: "Thriller".to_string(),
            rating: 7.0,
            year: 2001,
            raw_metadata: json!({ "id": id }),
        }
    }

    /// Store whose upserts always fail
    struct FailingStore;

    impl RecordStore for FailingStore {
        fn upsert_batch(&self, _records: &[NormalizedRecord]) -> Result<()> {
            bail!("disk I/O error")
        }
        fn append_token(&self, _cursor: &ChangeCursor) -> Result<()> {
            Ok(())
        }
        fn latest_token(&self) -> Result<Option<ChangeCursor>> {
            Ok(None)
        }
        fn count_tokens(&self) -> Result<usize> {
            Ok(0)
        }
        fn get_record(&self, _source_id: &str) -> Result<Option<StoredRecord>> {
            Ok(None)
        }
        fn count_records(&self) -> Result<usize> {
            Ok(0)
        }
        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_exactly_capacity_flushes_once() {
        let store = InMemoryRecordStore::new();
        let writer = BatchWriter::new(&store, 3);

        assert_eq!(writer.add(make_record("a")), None);
        assert_eq!(writer.add(make_record("b")), None);
        assert_eq!(writer.add(make_record("c")), Some(FlushOutcome::Committed(3)));

        assert_eq!(store.batch_sizes(), vec![3]);
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.stats().batches_committed, 1);
    }

    #[test]
    fn test_capacity_plus_one_leaves_one_pending() {
        let store = InMemoryRecordStore::new();
        let writer = BatchWriter::new(&store, 3);

        for id in ["a", "b", "c", "d"] {
            writer.add(make_record(id));
        }

        assert_eq!(store.batch_sizes(), vec![3]);
        assert_eq!(writer.pending(), 1);

        assert_eq!(writer.flush(), FlushOutcome::Committed(1));
        assert_eq!(store.batch_sizes(), vec![3, 1]);
        assert_eq!(store.count_records().unwrap(), 4);
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let store = InMemoryRecordStore::new();
        let writer = BatchWriter::new(&store, 10);

        assert_eq!(writer.flush(), FlushOutcome::Empty);
        assert!(store.batch_sizes().is_empty());
        assert_eq!(writer.stats(), RunStats::default());
    }

    #[test]
    fn test_failed_batch_is_dropped_and_counted() {
        let store = FailingStore;
        let writer = BatchWriter::new(&store, 10);

        writer.add(make_record("a"));
        writer.add(make_record("b"));

        assert_eq!(writer.flush(), FlushOutcome::Dropped(2));
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.records_dropped(), 2);
        assert_eq!(
            writer.stats(),
            RunStats {
                errors: 2,
                ..Default::default()
            }
        );

        // Buffer was cleared, so the next flush has nothing to do
        assert_eq!(writer.flush(), FlushOutcome::Empty);
    }

    #[test]
    fn test_same_source_id_converges_to_latest() {
        let store = InMemoryRecordStore::new();
        let writer = BatchWriter::new(&store, 1);

        writer.add(make_record("a"));
        let mut updated = make_record("a");
        updated.title = "Renamed".to_string();
        writer.add(updated);

        assert_eq!(store.count_records().unwrap(), 1);
        assert_eq!(store.get_record("a").unwrap().unwrap().record.title, "Renamed");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let store = InMemoryRecordStore::new();
        let writer = BatchWriter::new(&store, 0);
        assert_eq!(writer.capacity(), 1);
        assert_eq!(writer.add(make_record("a")), Some(FlushOutcome::Committed(1)));
    }
}
