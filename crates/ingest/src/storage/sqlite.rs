//! SQLite-based record storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::RecordStore;
use crate::models::{ChangeCursor, NormalizedRecord, StoredRecord};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE movies (
                source_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                genre TEXT NOT NULL,
                rating REAL NOT NULL,
                year INTEGER NOT NULL,
                metadata TEXT NOT NULL,  -- full original JSON document
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX idx_movies_genre ON movies(genre);
            CREATE INDEX idx_movies_year ON movies(year);
            CREATE INDEX idx_movies_rating ON movies(rating DESC);

            -- Append-only; the highest id is the current cursor
            CREATE TABLE change_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_value TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        ),
    ])
}

/// SQLite-based record storage
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `db_path` and bring the schema up to date
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, mostly useful for tests and dry runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers (the query API) run while a batch is being written.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl RecordStore for SqliteRecordStore {
    fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        {
            // ON CONFLICT keeps created_at from the first insert
            let mut stmt = tx.prepare(
                "INSERT INTO movies
                 (source_id, title, genre, rating, year, metadata, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(source_id) DO UPDATE SET
                    title = excluded.title,
                    genre = excluded.genre,
                    rating = excluded.rating,
                    year = excluded.year,
                    metadata = excluded.metadata,
                    updated_at = excluded.updated_at",
            )?;

            for record in records {
                let metadata = serde_json::to_string(&record.raw_metadata)
                    .context("Failed to serialize metadata")?;
                stmt.execute(params![
                    record.source_id,
                    record.title,
                    record.genre,
                    record.rating,
                    record.year,
                    metadata,
                    now,
                    now,
                ])
                .with_context(|| format!("Failed to upsert record {}", record.source_id))?;
            }
        }

        // Dropping an uncommitted transaction rolls it back
        tx.commit().context("Failed to commit batch")?;
        Ok(())
    }

    fn append_token(&self, cursor: &ChangeCursor) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO change_tokens (token_value, created_at) VALUES (?, ?)",
            params![cursor.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn latest_token(&self) -> Result<Option<ChangeCursor>> {
        let conn = self.conn();
        let token: Option<String> = conn
            .query_row(
                "SELECT token_value FROM change_tokens ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token.map(ChangeCursor::new))
    }

    fn count_tokens(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM change_tokens", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    fn get_record(&self, source_id: &str) -> Result<Option<StoredRecord>> {
        let conn = self.conn();

        let row: Option<(String, String, String, f64, i64, String, String, String)> = conn
            .query_row(
                "SELECT source_id, title, genre, rating, year, metadata, created_at, updated_at
                 FROM movies WHERE source_id = ?",
                [source_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((source_id, title, genre, rating, year, metadata, created_at, updated_at)) = row
        else {
            return Ok(None);
        };

        let raw_metadata = serde_json::from_str(&metadata)
            .with_context(|| format!("Corrupt metadata for record {source_id}"))?;

        Ok(Some(StoredRecord {
            record: NormalizedRecord {
                source_id,
                title,
                genre,
                rating,
                year,
                raw_metadata,
            },
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        }))
    }

    fn count_records(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM movies", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            DELETE FROM movies;
            DELETE FROM change_tokens;
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteRecordStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("movies.test.sqlite");
        let store = SqliteRecordStore::new(&db_path).unwrap();
        (store, dir)
    }

    fn make_record(id: &str, title: &str, rating: f64) -> NormalizedRecord {
        NormalizedRecord {
            source_id: id.to_string(),
            title: title.to_string(),
            genre: "Drama".to_string(),
            rating,
            year: 1999,
            raw_metadata: json!({
                "title": title,
                "genre": "Drama",
                "rating": rating,
                "year": 1999,
                "director": "Someone",
            }),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let (store, _dir) = create_test_store();

        store
            .upsert_batch(&[make_record("f1", "Heat", 8.3), make_record("f2", "Ronin", 7.2)])
            .unwrap();

        assert_eq!(store.count_records().unwrap(), 2);
        let stored = store.get_record("f1").unwrap().unwrap();
        assert_eq!(stored.record.title, "Heat");
        assert_eq!(stored.record.raw_metadata["director"], "Someone");
        assert!(store.get_record("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (store, _dir) = create_test_store();

        store.upsert_batch(&[make_record("f1", "Heat", 8.3)]).unwrap();
        let first = store.get_record("f1").unwrap().unwrap();

        store
            .upsert_batch(&[make_record("f1", "Heat (Director's Cut)", 8.5)])
            .unwrap();
        let second = store.get_record("f1").unwrap().unwrap();

        assert_eq!(store.count_records().unwrap(), 1);
        assert_eq!(second.record.title, "Heat (Director's Cut)");
        assert_eq!(second.record.rating, 8.5);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let (store, _dir) = create_test_store();

        // SQLite stores NaN as NULL, which violates NOT NULL on rating
        let batch = vec![make_record("f1", "Heat", 8.3), make_record("f2", "Broken", f64::NAN)];
        assert!(store.upsert_batch(&batch).is_err());

        assert_eq!(store.count_records().unwrap(), 0);

        // The connection is still usable afterwards
        store.upsert_batch(&[make_record("f3", "Ronin", 7.2)]).unwrap();
        assert_eq!(store.count_records().unwrap(), 1);
    }

    #[test]
    fn test_tokens_are_append_only() {
        let (store, _dir) = create_test_store();

        assert!(store.latest_token().unwrap().is_none());

        store.append_token(&ChangeCursor::new("100")).unwrap();
        store.append_token(&ChangeCursor::new("205")).unwrap();
        store.append_token(&ChangeCursor::new("150")).unwrap();

        // Latest means most recently appended, not highest value
        assert_eq!(store.latest_token().unwrap(), Some(ChangeCursor::new("150")));
        assert_eq!(store.count_tokens().unwrap(), 3);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("movies.test.sqlite");

        {
            let store = SqliteRecordStore::new(&db_path).unwrap();
            store.upsert_batch(&[make_record("f1", "Heat", 8.3)]).unwrap();
            store.append_token(&ChangeCursor::new("42")).unwrap();
        }

        let store = SqliteRecordStore::new(&db_path).unwrap();
        assert_eq!(store.count_records().unwrap(), 1);
        assert_eq!(store.latest_token().unwrap(), Some(ChangeCursor::new("42")));
    }

    #[test]
    fn test_clear() {
        let (store, _dir) = create_test_store();
        store.upsert_batch(&[make_record("f1", "Heat", 8.3)]).unwrap();
        store.append_token(&ChangeCursor::new("1")).unwrap();

        store.clear().unwrap();

        assert_eq!(store.count_records().unwrap(), 0);
        assert_eq!(store.count_tokens().unwrap(), 0);
    }
}
