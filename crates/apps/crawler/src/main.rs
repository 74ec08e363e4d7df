//! Crawler - Sync movie documents from Google Drive into SQLite
//!
//! Full mode walks the configured folder tree; incremental mode follows the
//! Drive change feed from the last stored token. The first incremental run
//! on an empty database only records a baseline token.
//!
//! # Example
//!
//! ```bash
//! GOOGLE_FOLDER_ID=1AbC... crawler --mode full
//! crawler --mode incremental
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ingest::{
    CrawlerSettings, DriveAuth, DriveClient, DriveCredentials, RunReport, SqliteRecordStore,
    SyncMode,
};
use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Crawl the whole folder tree
    Full,
    /// Process changes since the last run
    Incremental,
}

impl From<Mode> for SyncMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Full => SyncMode::Full,
            Mode::Incremental => SyncMode::Incremental,
        }
    }
}

/// Sync movie documents from Google Drive into SQLite
#[derive(Parser, Debug)]
#[command(name = "crawler", version)]
struct Args {
    /// Sync mode
    #[arg(long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// Root folder to crawl in full mode (overrides GOOGLE_FOLDER_ID)
    #[arg(long)]
    folder_id: Option<String>,

    /// SQLite database file (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Concurrent file downloads
    #[arg(long)]
    workers: Option<usize>,

    /// Records per database transaction
    #[arg(long)]
    batch_size: Option<usize>,
}

impl Args {
    fn apply(&self, settings: &mut CrawlerSettings) {
        if let Some(folder_id) = &self.folder_id {
            settings.folder_id = Some(folder_id.clone());
        }
        if let Some(database) = &self.database {
            settings.database_path = Some(database.clone());
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {e}");
    }

    let args = Args::parse();
    match run(&args) {
        Ok(report) => {
            report.log_summary();
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Sync aborted: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<RunReport> {
    let mut settings = CrawlerSettings::load()?;
    args.apply(&mut settings);
    let mode = SyncMode::from(args.mode);

    let credentials = match DriveCredentials::load() {
        Ok(creds) => creds,
        Err(e) => {
            if let Some(path) = DriveCredentials::default_credentials_path() {
                warn!(
                    "To configure Drive access, either:\n\
                     1. Place OAuth credentials with a refresh_token at: {}\n\
                     2. Or set DRIVE_ACCESS_TOKEN, or DRIVE_CLIENT_ID, DRIVE_CLIENT_SECRET and DRIVE_REFRESH_TOKEN",
                    path.display()
                );
            }
            return Err(e);
        }
    };

    let drive = DriveClient::new(DriveAuth::new(credentials))
        .with_page_size(settings.page_size)
        .with_chunk_size(settings.chunk_size);
    drive
        .authenticate()
        .context("Failed to authenticate with Google Drive")?;
    info!("Drive client authenticated");

    let db_path = settings.database_path()?;
    let store = SqliteRecordStore::new(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    info!("Using database {}", db_path.display());

    let options = settings.sync_options();
    info!(
        "Mode: {mode}, workers: {}, batch size: {}",
        options.workers, options.batch_size
    );

    ingest::run(&drive, &store, &options, mode, settings.folder_id.as_deref())
}
