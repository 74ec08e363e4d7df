//! Error taxonomy for provider calls and the ingestion engine

use thiserror::Error;

/// Failure of a single call against the remote provider
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriveError {
    /// Network, TLS, rate-limit or server-side failure; worth retrying
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Not found, forbidden, malformed request or undecodable response
    #[error("provider rejected request{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

impl DriveError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP status code returned by the provider
    pub fn from_status(status: u16, context: &str) -> Self {
        if is_transient_status(status) {
            Self::Transient(format!("{context}: HTTP {status}"))
        } else {
            Self::Permanent {
                status: Some(status),
                message: context.to_string(),
            }
        }
    }
}

/// 408, 429 and every 5xx are retried
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

impl DriveError {
    /// Classify a `ureq` failure; anything below HTTP is treated as transient
    pub fn from_ureq(err: ureq::Error, context: &str) -> Self {
        match err {
            ureq::Error::StatusCode(status) => Self::from_status(status, context),
            ureq::Error::BadUri(uri) => Self::permanent(format!("{context}: bad uri {uri}")),
            ureq::Error::Http(e) => Self::permanent(format!("{context}: invalid request: {e}")),
            other => Self::Transient(format!("{context}: {other}")),
        }
    }
}

/// Failure surfaced by an engine component
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("gave up after {attempts} attempts: {last}")]
    TransientExhausted { attempts: u32, last: String },

    #[error("permanent API error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    PermanentApi {
        status: Option<u16>,
        message: String,
    },

    #[error("invalid document {name}: {reason}")]
    Validation { name: String, reason: String },

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl IngestError {
    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a storage failure, keeping the full context chain
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }
}
