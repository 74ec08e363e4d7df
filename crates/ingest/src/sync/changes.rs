//! Incremental sync over the provider change feed

use log::{debug, error, info, warn};

use super::{BatchWriter, FileIngestor, RetryExecutor, RunStats, SyncOptions, TokenStore};
use crate::drive::DriveSource;
use crate::error::IngestError;
use crate::models::{ChangeCursor, ChangeEvent};

/// How a change-feed run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// No cursor was stored; the provider's current position was saved
    /// and nothing was ingested
    Bootstrapped(ChangeCursor),
    /// The feed was drained and the stored cursor advanced
    Advanced(ChangeCursor),
    /// Paging stopped early; the stored cursor was left untouched
    Interrupted,
}

impl FeedOutcome {
    pub fn advanced(&self) -> bool {
        matches!(self, Self::Advanced(_) | Self::Bootstrapped(_))
    }
}

enum FeedState {
    NoCursor,
    Tracking { page_token: String },
    Drained(FeedOutcome),
}

/// Reads the change feed from the last stored cursor
///
/// The cursor only moves once every page it supersedes has been routed
/// and flushed, so a crash replays at most the pages since the last
/// stored cursor. Replays are harmless because writes are upserts.
pub struct ChangeFeedReader<'a> {
    drive: &'a dyn DriveSource,
    retry: &'a RetryExecutor,
    writer: &'a BatchWriter<'a>,
    tokens: TokenStore<'a>,
    options: &'a SyncOptions,
    ingestor: FileIngestor<'a>,
}

impl<'a> ChangeFeedReader<'a> {
    pub fn new(
        drive: &'a dyn DriveSource,
        retry: &'a RetryExecutor,
        writer: &'a BatchWriter<'a>,
        tokens: TokenStore<'a>,
        options: &'a SyncOptions,
    ) -> Self {
        Self {
            drive,
            retry,
            writer,
            tokens,
            options,
            ingestor: FileIngestor::new(drive, retry),
        }
    }

    /// Run the feed until it is drained or a page fails
    ///
    /// Only a failure to read the stored cursor is returned as an error;
    /// everything after that is logged and counted.
    pub fn sync(&self) -> Result<(FeedOutcome, RunStats), IngestError> {
        let mut stats = RunStats::default();
        let dropped_before = self.writer.records_dropped();

        let mut state = match self.tokens.latest()? {
            Some(cursor) => {
                info!("Resuming change feed from token {cursor}");
                FeedState::Tracking {
                    page_token: cursor.0,
                }
            }
            None => FeedState::NoCursor,
        };

        let outcome = loop {
            state = match state {
                FeedState::NoCursor => FeedState::Drained(self.bootstrap(&mut stats)),
                FeedState::Tracking { page_token } => {
                    self.read_page(&page_token, dropped_before, &mut stats)
                }
                FeedState::Drained(outcome) => break outcome,
            };
        };

        // Keep whatever was routed before an interruption
        self.writer.flush();
        Ok((outcome, stats))
    }

    fn bootstrap(&self, stats: &mut RunStats) -> FeedOutcome {
        info!("No change token stored, saving the current position as baseline");

        let cursor = match self
            .retry
            .execute("Get start page token", || self.drive.get_start_token())
        {
            Ok(cursor) => cursor,
            Err(e) => {
                error!("Failed to get start page token: {e}");
                stats.errors += 1;
                return FeedOutcome::Interrupted;
            }
        };

        match self.tokens.append(&cursor) {
            Ok(()) => FeedOutcome::Bootstrapped(cursor),
            Err(e) => {
                error!("Failed to save baseline change token: {e}");
                stats.errors += 1;
                FeedOutcome::Interrupted
            }
        }
    }

    fn read_page(&self, page_token: &str, dropped_before: usize, stats: &mut RunStats) -> FeedState {
        let page = match self
            .retry
            .execute("List changes", || self.drive.list_changes(page_token))
        {
            Ok(page) => page,
            Err(e) => {
                error!("Failed to list changes at page {page_token}: {e}");
                stats.errors += 1;
                return FeedState::Drained(FeedOutcome::Interrupted);
            }
        };

        debug!("Change page {page_token}: {} events", page.events.len());
        for event in &page.events {
            stats.merge(self.route(event));
        }

        if let Some(rotation) = page.rotation_token {
            self.writer.flush();
            if self.writer.records_dropped() > dropped_before {
                warn!("Some records failed to commit; keeping the stored change token so they are redelivered");
                return FeedState::Drained(FeedOutcome::Interrupted);
            }
            return match self.tokens.append(&rotation) {
                Ok(()) => FeedState::Drained(FeedOutcome::Advanced(rotation)),
                Err(e) => {
                    error!("Failed to save change token {rotation}: {e}");
                    stats.errors += 1;
                    FeedState::Drained(FeedOutcome::Interrupted)
                }
            };
        }

        match page.next_page_token {
            Some(next) => FeedState::Tracking { page_token: next },
            None => {
                error!("Change page {page_token} has neither a next page nor a new start token");
                stats.errors += 1;
                FeedState::Drained(FeedOutcome::Interrupted)
            }
        }
    }

    fn route(&self, event: &ChangeEvent) -> RunStats {
        if event.removed {
            debug!("Skipping removal of {}", event.file_id);
            return RunStats::default();
        }

        let Some(file) = &event.file else {
            debug!("Skipping change {} without file metadata", event.file_id);
            return RunStats::default();
        };

        if file.is_folder() || !self.options.is_ingestible(&file.name) {
            debug!("Skipping change to {}", file.name);
            return RunStats::default();
        }

        let mut stats = self.ingestor.ingest_into(&file.id, &file.name, self.writer);
        stats.changes_processed += 1;
        stats
    }
}
