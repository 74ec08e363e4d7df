//! Download, parse and validate a single movie document

use log::{debug, error};
use serde_json::{Map, Value};

use super::{BatchWriter, RetryExecutor, RunStats};
use crate::drive::DriveSource;
use crate::error::IngestError;
use crate::models::NormalizedRecord;

/// Turns one remote file into a [`NormalizedRecord`]
pub struct FileIngestor<'a> {
    drive: &'a dyn DriveSource,
    retry: &'a RetryExecutor,
}

impl<'a> FileIngestor<'a> {
    pub fn new(drive: &'a dyn DriveSource, retry: &'a RetryExecutor) -> Self {
        Self { drive, retry }
    }

    /// Download and validate a file
    ///
    /// Opening the download and every chunk are retried independently, so a
    /// stream that breaks mid-transfer resumes from the failed chunk.
    pub fn ingest(&self, file_id: &str, name: &str) -> Result<NormalizedRecord, IngestError> {
        let payload = self.download(file_id, name)?;
        parse_record(file_id, name, &payload)
    }

    /// Ingest a file and hand the record to `writer`
    ///
    /// Failures are logged and counted; nothing partial reaches the writer.
    pub fn ingest_into(&self, file_id: &str, name: &str, writer: &BatchWriter<'_>) -> RunStats {
        match self.ingest(file_id, name) {
            Ok(record) => {
                debug!("Parsed {name} ({file_id})");
                writer.add(record);
                RunStats::one_processed()
            }
            Err(e) => {
                error!("Failed to ingest {name} ({file_id}): {e}");
                RunStats::one_error()
            }
        }
    }

    fn download(&self, file_id: &str, name: &str) -> Result<Vec<u8>, IngestError> {
        let mut stream = self
            .retry
            .execute(&format!("Open download of {name}"), || {
                self.drive.open_download(file_id)
            })?;

        let context = format!("Download of {name}");
        let mut payload = Vec::new();
        while let Some(chunk) = self.retry.execute(&context, || stream.next_chunk())? {
            payload.extend_from_slice(&chunk);
        }
        Ok(payload)
    }
}

/// Parse a movie document
///
/// `title`, `genre`, `rating` and `year` must all be present. Presence is
/// what counts: a year of `0`, a rating of `0.0` or an empty title are
/// accepted. An explicit `null` counts as absent. Numbers encoded as
/// strings are accepted; any other type mismatch is rejected.
pub fn parse_record(
    source_id: &str,
    name: &str,
    payload: &[u8],
) -> Result<NormalizedRecord, IngestError> {
    let document: Value = serde_json::from_slice(payload)
        .map_err(|e| IngestError::validation(name, format!("invalid JSON: {e}")))?;
    let Some(fields) = document.as_object() else {
        return Err(IngestError::validation(name, "document is not a JSON object"));
    };

    let mut missing = Vec::new();
    let title = present(fields, "title", &mut missing);
    let genre = present(fields, "genre", &mut missing);
    let rating = present(fields, "rating", &mut missing);
    let year = present(fields, "year", &mut missing);

    if !missing.is_empty() {
        return Err(IngestError::validation(
            name,
            format!("missing required fields: {}", missing.join(", ")),
        ));
    }

    let title = title.map(|v| as_text(v, "title", name)).transpose()?.unwrap_or_default();
    let genre = genre.map(|v| as_text(v, "genre", name)).transpose()?.unwrap_or_default();
    let rating = rating.map(|v| as_rating(v, name)).transpose()?.unwrap_or(0.0);
    let year = year.map(|v| as_year(v, name)).transpose()?.unwrap_or(0);

    Ok(NormalizedRecord {
        source_id: source_id.to_string(),
        title,
        genre,
        rating,
        year,
        raw_metadata: document,
    })
}

fn present<'v>(
    fields: &'v Map<String, Value>,
    key: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<&'v Value> {
    match fields.get(key) {
        Some(Value::Null) | None => {
            missing.push(key);
            None
        }
        Some(value) => Some(value),
    }
}

fn wrong_type(name: &str, key: &str, expected: &str, value: &Value) -> IngestError {
    IngestError::validation(name, format!("field {key} must be {expected}, got {value}"))
}

fn as_text(value: &Value, key: &str, name: &str) -> Result<String, IngestError> {
    value
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| wrong_type(name, key, "a string", value))
}

fn as_rating(value: &Value, name: &str) -> Result<f64, IngestError> {
    let rating = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    rating
        .filter(|r| r.is_finite())
        .ok_or_else(|| wrong_type(name, "rating", "a number", value))
}

fn as_year(value: &Value, name: &str) -> Result<i64, IngestError> {
    let year = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    year.ok_or_else(|| wrong_type(name, "year", "an integer", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{DriveOp, InMemoryDrive};
    use crate::error::DriveError;
    use crate::storage::InMemoryRecordStore;
    use crate::sync::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;

    fn no_sleep_retry() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        })
        .with_sleeper(|_| {})
    }

    fn parse(document: &Value) -> Result<NormalizedRecord, IngestError> {
        parse_record("id-1", "movie.json", document.to_string().as_bytes())
    }

    #[test]
    fn test_parse_complete_document() {
        let document = json!({
            "title": "  Alien ",
            "genre": "Horror",
            "rating": 8.5,
            "year": 1979,
            "director": "Ridley Scott"
        });

        let record = parse(&document).unwrap();
        assert_eq!(record.source_id, "id-1");
        assert_eq!(record.title, "Alien");
        assert_eq!(record.genre, "Horror");
        assert_eq!(record.rating, 8.5);
        assert_eq!(record.year, 1979);
        // Untyped fields survive in the raw metadata
        assert_eq!(record.raw_metadata["director"], "Ridley Scott");
    }

    #[test]
    fn test_missing_title_is_rejected() {
        let err = parse(&json!({ "genre": "Drama", "rating": 7.0, "year": 2000 })).unwrap_err();
        match err {
            IngestError::Validation { name, reason } => {
                assert_eq!(name, "movie.json");
                assert!(reason.contains("title"), "{reason}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = parse(&json!({ "title": "X", "genre": null, "rating": 1, "year": 2000 }))
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation { ref reason, .. } if reason.contains("genre")));
    }

    #[test]
    fn test_zero_values_are_present() {
        let record = parse(&json!({ "title": "", "genre": "", "rating": 0.0, "year": 0 })).unwrap();
        assert_eq!(record.year, 0);
        assert_eq!(record.rating, 0.0);
        assert_eq!(record.title, "");
    }

    #[test]
    fn test_numeric_strings_and_integral_floats() {
        let record =
            parse(&json!({ "title": "Heat", "genre": "Crime", "rating": "8.3", "year": 1995.0 }))
                .unwrap();
        assert_eq!(record.rating, 8.3);
        assert_eq!(record.year, 1995);

        let record =
            parse(&json!({ "title": "Heat", "genre": "Crime", "rating": 8, "year": " 1995 " }))
                .unwrap();
        assert_eq!(record.rating, 8.0);
        assert_eq!(record.year, 1995);
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        assert!(parse(&json!({ "title": 5, "genre": "", "rating": 1, "year": 1 })).is_err());
        assert!(parse(&json!({ "title": "", "genre": "", "rating": "high", "year": 1 })).is_err());
        assert!(parse(&json!({ "title": "", "genre": "", "rating": 1, "year": 1999.5 })).is_err());
        assert!(parse(&json!({ "title": "", "genre": "", "rating": 1, "year": true })).is_err());
    }

    #[test]
    fn test_invalid_json_and_non_object() {
        assert!(matches!(
            parse_record("id", "bad.json", b"{not json"),
            Err(IngestError::Validation { .. })
        ));
        assert!(matches!(
            parse_record("id", "list.json", b"[1, 2]"),
            Err(IngestError::Validation { .. })
        ));
    }

    #[test]
    fn test_ingest_reassembles_chunks() {
        let drive = InMemoryDrive::new().with_chunk_size(8);
        let document = json!({ "title": "Arrival", "genre": "Sci-Fi", "rating": 7.9, "year": 2016 });
        drive.add_json_file("f1", "arrival.json", None, &document);
        let retry = no_sleep_retry();

        let record = FileIngestor::new(&drive, &retry).ingest("f1", "arrival.json").unwrap();
        assert_eq!(record.title, "Arrival");
        assert!(drive.call_count(&DriveOp::Chunk("f1".to_string())) > 1);
    }

    #[test]
    fn test_failed_chunk_is_retried() {
        let drive = InMemoryDrive::new().with_chunk_size(8);
        let document = json!({ "title": "Arrival", "genre": "Sci-Fi", "rating": 7.9, "year": 2016 });
        drive.add_json_file("f1", "arrival.json", None, &document);
        drive.fail_times(
            DriveOp::Chunk("f1".to_string()),
            DriveError::Transient("connection reset".to_string()),
            2,
        );
        let retry = no_sleep_retry();

        let record = FileIngestor::new(&drive, &retry).ingest("f1", "arrival.json").unwrap();
        assert_eq!(record.year, 2016);
    }

    #[test]
    fn test_ingest_into_counts_rejections() {
        let drive = InMemoryDrive::new();
        drive.add_json_file("ok", "ok.json", None, &json!({ "title": "A", "genre": "B", "rating": 1, "year": 2 }));
        drive.add_json_file("bad", "bad.json", None, &json!({ "genre": "B", "rating": 1, "year": 2 }));
        let retry = no_sleep_retry();
        let store = InMemoryRecordStore::new();
        let writer = BatchWriter::new(&store, 10);
        let ingestor = FileIngestor::new(&drive, &retry);

        assert_eq!(ingestor.ingest_into("ok", "ok.json", &writer), RunStats::one_processed());
        assert_eq!(ingestor.ingest_into("bad", "bad.json", &writer), RunStats::one_error());
        assert_eq!(writer.pending(), 1);
    }

    #[test]
    fn test_missing_file_is_permanent() {
        let drive = InMemoryDrive::new();
        let retry = no_sleep_retry();

        let err = FileIngestor::new(&drive, &retry).ingest("gone", "gone.json").unwrap_err();
        assert!(matches!(err, IngestError::PermanentApi { status: Some(404), .. }));
        assert_eq!(drive.call_count(&DriveOp::OpenDownload("gone".to_string())), 1);
    }
}
