//! Ingest crate - Movie document ingestion from Google Drive
//!
//! This crate provides:
//! - Domain models (RemoteNode, NormalizedRecord, ChangeCursor)
//! - Google Drive client and OAuth token handling
//! - Storage trait abstractions with SQLite and in-memory backends
//! - Full and incremental sync engines with retry and batched upserts
//!
//! The binary in `crates/apps/crawler` is a thin wrapper around [`run`].

pub mod config;
pub mod drive;
pub mod error;
pub mod models;
pub mod storage;
pub mod sync;

pub use self::config::{CrawlerSettings, DriveCredentials};
pub use drive::{ChunkStream, DriveAuth, DriveClient, DriveOp, DriveSource, InMemoryDrive};
pub use error::{DriveError, IngestError};
pub use models::{
    ChangeCursor, ChangeEvent, ChangePage, ChildPage, NodeKind, NormalizedRecord, RemoteNode,
    StoredRecord,
};
pub use storage::{InMemoryRecordStore, RecordStore, SqliteRecordStore};
pub use sync::{
    BatchWriter, ChangeFeedReader, FeedOutcome, FileIngestor, FlushOutcome, FolderTraversal,
    RetryExecutor, RetryPolicy, RunReport, RunStats, SyncMode, SyncOptions, TokenStore,
    full_sync, incremental_sync, parse_record, run,
};
