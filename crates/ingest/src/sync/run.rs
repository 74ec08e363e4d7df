//! Run entry points

use anyhow::{Context, Result, bail};
use log::{error, info, warn};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use super::{
    BatchWriter, ChangeFeedReader, FeedOutcome, FolderTraversal, RetryExecutor, RunStats,
    SyncOptions, TokenStore,
};
use crate::drive::DriveSource;
use crate::storage::RecordStore;

/// Which kind of run to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Walk the whole folder tree
    Full,
    /// Follow the change feed from the stored cursor
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Incremental => f.write_str("incremental"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!("unknown sync mode '{other}', expected full or incremental")),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub mode: SyncMode,
    pub stats: RunStats,
    pub duration_ms: u64,
    /// Change-feed outcome, incremental runs only
    pub feed: Option<FeedOutcome>,
}

impl RunReport {
    pub fn log_summary(&self) {
        info!("{} sync finished in {:.1}s", self.mode, self.duration_ms as f64 / 1000.0);
        info!("  Files processed:   {}", self.stats.processed);
        match self.mode {
            SyncMode::Full => info!("  Folders visited:   {}", self.stats.folders_visited),
            SyncMode::Incremental => {
                info!("  Changes processed: {}", self.stats.changes_processed)
            }
        }
        info!("  Batches committed: {}", self.stats.batches_committed);
        info!("  Errors:            {}", self.stats.errors);

        match &self.feed {
            Some(FeedOutcome::Bootstrapped(cursor)) => {
                info!("  Baseline change token saved ({cursor}); run again to pick up changes")
            }
            Some(FeedOutcome::Advanced(cursor)) => info!("  Change token advanced to {cursor}"),
            Some(FeedOutcome::Interrupted) => {
                warn!("  Change token not advanced; the next run resumes from the same point")
            }
            None => {}
        }
    }
}

/// Ingest every matching file under `root_id`
///
/// The provider's change-feed position is captured before the walk and
/// stored after it, so a later incremental run also sees edits made while
/// the walk was in progress.
///
/// Fails only if the root folder cannot be fetched; every other failure is
/// counted in the report.
pub fn full_sync(
    drive: &dyn DriveSource,
    store: &dyn RecordStore,
    options: &SyncOptions,
    root_id: &str,
) -> Result<RunReport> {
    let start = Instant::now();
    let retry = RetryExecutor::new(options.retry);

    let root = retry
        .execute("Get root folder", || drive.get_node(root_id))
        .with_context(|| format!("Cannot access folder {root_id}"))?;
    if !root.is_folder() {
        bail!("{root_id} ({}) is not a folder", root.name);
    }
    info!("Starting full sync of '{}' ({root_id})", root.name);

    let mut stats = RunStats::default();

    let baseline = match retry.execute("Get start page token", || drive.get_start_token()) {
        Ok(cursor) => Some(cursor),
        Err(e) => {
            warn!("Failed to get start page token, incremental sync will need a baseline run: {e}");
            stats.errors += 1;
            None
        }
    };

    let writer = BatchWriter::new(store, options.batch_size);
    let traversal = FolderTraversal::new(drive, &retry, &writer, options)?;
    stats.merge(traversal.traverse(&root));
    writer.flush();
    stats.merge(writer.stats());

    if let Some(cursor) = baseline
        && let Err(e) = TokenStore::new(store).append(&cursor)
    {
        error!("Failed to save change token after full sync: {e}");
        stats.errors += 1;
    }

    Ok(RunReport {
        mode: SyncMode::Full,
        stats,
        duration_ms: start.elapsed().as_millis() as u64,
        feed: None,
    })
}

/// Ingest files changed since the stored cursor
pub fn incremental_sync(
    drive: &dyn DriveSource,
    store: &dyn RecordStore,
    options: &SyncOptions,
) -> Result<RunReport> {
    let start = Instant::now();
    let retry = RetryExecutor::new(options.retry);
    let writer = BatchWriter::new(store, options.batch_size);

    info!("Starting incremental sync");
    let reader = ChangeFeedReader::new(drive, &retry, &writer, TokenStore::new(store), options);
    let (outcome, mut stats) = reader.sync().context("Failed to read stored change token")?;
    stats.merge(writer.stats());

    Ok(RunReport {
        mode: SyncMode::Incremental,
        stats,
        duration_ms: start.elapsed().as_millis() as u64,
        feed: Some(outcome),
    })
}

/// Run one sync in the given mode; full mode needs a root folder
pub fn run(
    drive: &dyn DriveSource,
    store: &dyn RecordStore,
    options: &SyncOptions,
    mode: SyncMode,
    root_id: Option<&str>,
) -> Result<RunReport> {
    match mode {
        SyncMode::Full => {
            let Some(root_id) = root_id else {
                bail!("Full sync needs a folder id (set GOOGLE_FOLDER_ID or pass --folder-id)");
            };
            full_sync(drive, store, options, root_id)
        }
        SyncMode::Incremental => incremental_sync(drive, store, options),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{DriveOp, InMemoryDrive};
    use crate::error::DriveError;
    use crate::models::{ChangeCursor, ChangeEvent, ChangePage, RemoteNode};
    use crate::storage::InMemoryRecordStore;
    use crate::sync::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;

    fn fast_options() -> SyncOptions {
        SyncOptions {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::ZERO,
            },
            ..Default::default()
        }
    }

    fn movie_drive() -> InMemoryDrive {
        let drive = InMemoryDrive::new();
        drive.add_folder("root", "movies", None);
        drive.add_json_file(
            "m1",
            "heat.json",
            Some("root"),
            &json!({ "title": "Heat", "genre": "Crime", "rating": 8.3, "year": 1995 }),
        );
        drive.set_start_token("100");
        drive
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("full".parse::<SyncMode>().unwrap(), SyncMode::Full);
        assert_eq!("Incremental".parse::<SyncMode>().unwrap(), SyncMode::Incremental);
        assert!("weekly".parse::<SyncMode>().is_err());
        assert_eq!(SyncMode::Full.to_string(), "full");
    }

    #[test]
    fn test_full_sync_stores_baseline_token() {
        let drive = movie_drive();
        let store = InMemoryRecordStore::new();

        let report = full_sync(&drive, &store, &fast_options(), "root").unwrap();

        assert_eq!(report.mode, SyncMode::Full);
        assert_eq!(report.stats.processed, 1);
        assert_eq!(report.stats.folders_visited, 1);
        assert_eq!(report.stats.batches_committed, 1);
        assert_eq!(store.latest_token().unwrap(), Some(ChangeCursor::new("100")));
    }

    #[test]
    fn test_full_sync_requires_root_access() {
        let drive = movie_drive();
        drive.fail(
            DriveOp::GetNode("root".to_string()),
            DriveError::from_status(403, "forbidden"),
        );
        let store = InMemoryRecordStore::new();

        let err = full_sync(&drive, &store, &fast_options(), "root").unwrap_err();
        assert!(err.to_string().contains("Cannot access folder root"));
        assert_eq!(store.count_records().unwrap(), 0);
        assert_eq!(store.count_tokens().unwrap(), 0);
    }

    #[test]
    fn test_full_sync_rejects_file_root() {
        let drive = movie_drive();
        let store = InMemoryRecordStore::new();
        assert!(full_sync(&drive, &store, &fast_options(), "m1").is_err());
    }

    #[test]
    fn test_missing_start_token_is_counted() {
        let drive = movie_drive();
        drive.fail_times(
            DriveOp::StartToken,
            DriveError::Transient("timeout".to_string()),
            2,
        );
        let store = InMemoryRecordStore::new();

        let report = full_sync(&drive, &store, &fast_options(), "root").unwrap();

        assert_eq!(report.stats.processed, 1);
        assert_eq!(report.stats.errors, 1);
        assert_eq!(store.count_tokens().unwrap(), 0);
    }

    #[test]
    fn test_run_dispatch() {
        let drive = movie_drive();
        drive.add_change_page(
            "100",
            ChangePage {
                events: vec![ChangeEvent::changed(RemoteNode::file("m1", "heat.json"))],
                next_page_token: None,
                rotation_token: Some(ChangeCursor::new("101")),
            },
        );
        let store = InMemoryRecordStore::new();
        let options = fast_options();

        assert!(run(&drive, &store, &options, SyncMode::Full, None).is_err());

        let first = run(&drive, &store, &options, SyncMode::Incremental, None).unwrap();
        assert_eq!(first.feed, Some(FeedOutcome::Bootstrapped(ChangeCursor::new("100"))));

        let second = run(&drive, &store, &options, SyncMode::Incremental, None).unwrap();
        assert_eq!(second.feed, Some(FeedOutcome::Advanced(ChangeCursor::new("101"))));
        assert_eq!(second.stats.changes_processed, 1);
        assert_eq!(second.stats.batches_committed, 1);
        assert_eq!(store.count_records().unwrap(), 1);
    }
}
