//! Recursive folder walk for full sync

use anyhow::{Context, Result};
use log::{debug, error, info};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{BatchWriter, FileIngestor, RetryExecutor, RunStats, SyncOptions};
use crate::drive::DriveSource;
use crate::error::IngestError;
use crate::models::RemoteNode;

/// Walks a folder tree and ingests every matching file
///
/// Files of one folder are dispatched to a worker pool and joined before
/// sub-folders are visited. A failure while listing a folder skips that
/// subtree only.
pub struct FolderTraversal<'a> {
    drive: &'a dyn DriveSource,
    retry: &'a RetryExecutor,
    writer: &'a BatchWriter<'a>,
    options: &'a SyncOptions,
    ingestor: FileIngestor<'a>,
    pool: ThreadPool,
}

impl<'a> FolderTraversal<'a> {
    pub fn new(
        drive: &'a dyn DriveSource,
        retry: &'a RetryExecutor,
        writer: &'a BatchWriter<'a>,
        options: &'a SyncOptions,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .thread_name(|i| format!("ingest-worker-{i}"))
            .build()
            .context("Failed to build ingest worker pool")?;

        Ok(Self {
            drive,
            retry,
            writer,
            options,
            ingestor: FileIngestor::new(drive, retry),
            pool,
        })
    }

    /// Traverse `folder` and everything below it
    pub fn traverse(&self, folder: &RemoteNode) -> RunStats {
        let path = folder.path();
        info!("Scanning folder: {path}");

        let children = match self.list_all(folder) {
            Ok(children) => children,
            Err(e) => {
                error!("Failed to list folder {path}: {e}");
                return RunStats::one_error();
            }
        };

        let mut stats = RunStats {
            folders_visited: 1,
            ..Default::default()
        };

        let (folders, files): (Vec<_>, Vec<_>) =
            children.into_iter().partition(RemoteNode::is_folder);

        let files: Vec<RemoteNode> = files
            .into_iter()
            .filter(|file| {
                let keep = self.options.is_ingestible(&file.name);
                if !keep {
                    debug!("Skipping {}", file.path());
                }
                keep
            })
            .collect();

        stats.merge(self.ingest_files(&files));

        for sub in &folders {
            stats.merge(self.traverse(sub));
        }

        self.writer.flush();
        stats
    }

    fn ingest_files(&self, files: &[RemoteNode]) -> RunStats {
        if files.is_empty() {
            return RunStats::default();
        }

        self.pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    self.ingestor
                        .ingest_into(&file.id, &file.path(), self.writer)
                })
                .reduce(RunStats::default, RunStats::merged)
        })
    }

    /// All children of a folder, following every listing page
    fn list_all(&self, folder: &RemoteNode) -> Result<Vec<RemoteNode>, IngestError> {
        let context = format!("List folder {}", folder.path());
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.retry.execute(&context, || {
                self.drive.list_children(folder, page_token.as_deref())
            })?;
            children.extend(page.items);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(children)
    }
}
