//! Normalized movie records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A validated movie document ready for upsert
///
/// `source_id` is the provider file id and the natural key of the row.
/// `raw_metadata` keeps the whole original document so fields without a
/// typed column are not lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub source_id: String,
    pub title: String,
    pub genre: String,
    pub rating: f64,
    pub year: i64,
    pub raw_metadata: Value,
}

/// A record as read back from storage
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: NormalizedRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
