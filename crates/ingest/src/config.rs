//! Configuration loading for the crawler
//!
//! Credentials are loaded from (in order of priority):
//! 1. `DRIVE_ACCESS_TOKEN` (an already authorized bearer token)
//! 2. JSON file in the config directory (`drive-credentials.json`)
//! 3. `DRIVE_CLIENT_ID` / `DRIVE_CLIENT_SECRET` / `DRIVE_REFRESH_TOKEN`
//!
//! Settings come from an optional `crawler.json`, overridden by environment
//! variables. The binary applies CLI flags on top.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::{RetryPolicy, SyncOptions};

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "drive-credentials.json";

/// Settings filename in the config directory
const SETTINGS_FILE: &str = "crawler.json";

/// How the crawler obtains bearer tokens for the Drive API
#[derive(Debug, Clone, PartialEq)]
pub enum DriveCredentials {
    /// Pre-authorized token, used as-is
    AccessToken(String),
    /// OAuth client plus a long-lived refresh token
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

/// Credential file format
///
/// Accepts flat `client_id`/`client_secret` or the Google Cloud Console
/// `installed`/`web` wrapper, with `refresh_token` at the top level.
#[derive(Deserialize)]
struct CredentialFile {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    installed: Option<ClientSection>,
    web: Option<ClientSection>,
}

#[derive(Deserialize)]
struct ClientSection {
    client_id: String,
    client_secret: String,
}

impl DriveCredentials {
    /// Load credentials from the environment or the config directory
    pub fn load() -> Result<Self> {
        if let Ok(token) = std::env::var("DRIVE_ACCESS_TOKEN")
            && !token.is_empty()
        {
            return Ok(Self::AccessToken(token));
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: CredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: CredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: CredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: CredentialFile) -> Result<Self> {
        let refresh_token = creds
            .refresh_token
            .context("Credentials file missing 'refresh_token'")?;

        let (client_id, client_secret) = match (creds.client_id, creds.client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                let section = creds
                    .installed
                    .or(creds.web)
                    .context("Credentials file missing client_id/client_secret")?;
                (section.client_id, section.client_secret)
            }
        };

        Ok(Self::RefreshToken {
            client_id,
            client_secret,
            refresh_token,
        })
    }

    /// Load refresh-token credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("DRIVE_CLIENT_ID")
            .context("DRIVE_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("DRIVE_CLIENT_SECRET")
            .context("DRIVE_CLIENT_SECRET environment variable not set")?;
        let refresh_token = std::env::var("DRIVE_REFRESH_TOKEN")
            .context("DRIVE_REFRESH_TOKEN environment variable not set")?;

        Ok(Self::RefreshToken {
            client_id,
            client_secret,
            refresh_token,
        })
    }

    /// Default credentials file path (~/.config/drive-ingest/drive-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// Crawler settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    /// Root folder for full crawls
    pub folder_id: Option<String>,
    pub database_path: Option<PathBuf>,
    pub batch_size: usize,
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub file_suffix: String,
    pub page_size: usize,
    pub chunk_size: u64,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            folder_id: None,
            database_path: None,
            batch_size: 100,
            // More than one concurrent TLS session has proven unstable
            workers: 1,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
            file_suffix: ".json".to_string(),
            page_size: 1000,
            chunk_size: 1024 * 1024,
        }
    }
}

impl CrawlerSettings {
    /// Load `crawler.json` (if present) and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut settings: Self = config::load_json_optional(SETTINGS_FILE)?.unwrap_or_default();
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(folder_id) = lookup("GOOGLE_FOLDER_ID") {
            self.folder_id = Some(folder_id);
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(workers) = lookup("CRAWLER_WORKERS") {
            self.workers = workers
                .parse()
                .with_context(|| format!("Invalid CRAWLER_WORKERS: {workers}"))?;
        }
        if let Some(batch_size) = lookup("CRAWLER_BATCH_SIZE") {
            self.batch_size = batch_size
                .parse()
                .with_context(|| format!("Invalid CRAWLER_BATCH_SIZE: {batch_size}"))?;
        }
        Ok(())
    }

    /// Database path, falling back to the config directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::default_database_path().context("Could not determine config directory"),
        }
    }

    /// Engine options derived from these settings
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            batch_size: self.batch_size.max(1),
            workers: self.workers.max(1),
            file_suffix: self.file_suffix.clone(),
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
        }
    }
}
