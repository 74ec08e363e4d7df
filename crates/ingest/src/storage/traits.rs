//! Storage trait definitions

use crate::models::{ChangeCursor, NormalizedRecord, StoredRecord};
use anyhow::Result;

/// Trait for record and cursor persistence
///
/// Implementations must be safe to share between the writer and the
/// cursor store of a single run.
pub trait RecordStore: Send + Sync {
    /// Insert or update every record in one transaction, keyed by `source_id`
    ///
    /// Either all records are written or none are.
    fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<()>;

    /// Append a change cursor; earlier cursors are kept
    fn append_token(&self, cursor: &ChangeCursor) -> Result<()>;

    /// Most recently appended cursor
    fn latest_token(&self) -> Result<Option<ChangeCursor>>;

    /// Number of cursors ever appended
    fn count_tokens(&self) -> Result<usize>;

    /// Get a record by its source id
    fn get_record(&self, source_id: &str) -> Result<Option<StoredRecord>>;

    /// Count stored records
    fn count_records(&self) -> Result<usize>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
