//! Sync engine for ingesting movie documents
//!
//! Full runs walk a folder tree; incremental runs follow the provider's
//! change feed from the last stored cursor. Both are idempotent and can be
//! safely re-run after a crash.

mod batch;
mod changes;
mod ingest;
mod retry;
mod run;
mod stats;
mod tokens;
mod traversal;

pub use batch::{BatchWriter, FlushOutcome};
pub use changes::{ChangeFeedReader, FeedOutcome};
pub use ingest::{FileIngestor, parse_record};
pub use retry::{RetryExecutor, RetryPolicy};
pub use run::{RunReport, SyncMode, full_sync, incremental_sync, run};
pub use stats::RunStats;
pub use tokens::TokenStore;
pub use traversal::FolderTraversal;

/// Options for a sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Records per upsert transaction
    pub batch_size: usize,
    /// Concurrent file downloads (1 = sequential)
    pub workers: usize,
    /// Only files whose name ends with this are ingested
    pub file_suffix: String,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            workers: 1,
            file_suffix: ".json".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncOptions {
    /// Whether a file with this name should be ingested
    pub fn is_ingestible(&self, name: &str) -> bool {
        name.ends_with(&self.file_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_filter() {
        let options = SyncOptions::default();
        assert!(options.is_ingestible("inception.json"));
        assert!(!options.is_ingestible("poster.png"));
        assert!(!options.is_ingestible("notes.json.bak"));
    }
}
