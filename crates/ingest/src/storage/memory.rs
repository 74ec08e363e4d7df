//! In-memory storage implementation
//!
//! Used by tests and dry runs. Mirrors the SQLite semantics: upserts keyed
//! by `source_id`, append-only cursors.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::RecordStore;
use crate::models::{ChangeCursor, NormalizedRecord, StoredRecord};

/// In-memory implementation of RecordStore
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, StoredRecord>>,
    tokens: RwLock<Vec<ChangeCursor>>,
    /// Size of every committed batch, in commit order
    batch_sizes: RwLock<Vec<usize>>,
}

impl InMemoryRecordStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            tokens: RwLock::new(Vec::new()),
            batch_sizes: RwLock::new(Vec::new()),
        }
    }

    /// Sizes of all batches committed so far
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every cursor ever appended, oldest first
    pub fn tokens(&self) -> Vec<ChangeCursor> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut stored = self.records.write().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            stored
                .entry(record.source_id.clone())
                .and_modify(|existing| {
                    existing.record = record.clone();
                    existing.updated_at = now;
                })
                .or_insert_with(|| StoredRecord {
                    record: record.clone(),
                    created_at: now,
                    updated_at: now,
                });
        }
        drop(stored);

        self.batch_sizes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(records.len());
        Ok(())
    }

    fn append_token(&self, cursor: &ChangeCursor) -> Result<()> {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cursor.clone());
        Ok(())
    }

    fn latest_token(&self) -> Result<Option<ChangeCursor>> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tokens.last().cloned())
    }

    fn count_tokens(&self) -> Result<usize> {
        Ok(self.tokens.read().unwrap_or_else(PoisonError::into_inner).len())
    }

    fn get_record(&self, source_id: &str) -> Result<Option<StoredRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(source_id).cloned())
    }

    fn count_records(&self) -> Result<usize> {
        Ok(self.records.read().unwrap_or_else(PoisonError::into_inner).len())
    }

    fn clear(&self) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.batch_sizes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_record(id: &str, title: &str) -> NormalizedRecord {
        NormalizedRecord {
            source_id: id.to_string(),
            title: title.to_string(),
            genre: "Comedy".to_string(),
            rating: 6.1,
            year: 2004,
            raw_metadata: json!({ "title": title }),
        }
    }

    #[test]
    fn test_upsert_replaces_by_source_id() {
        let store = InMemoryRecordStore::new();

        store.upsert_batch(&[make_record("f1", "Old")]).unwrap();
        store.upsert_batch(&[make_record("f1", "New")]).unwrap();

        assert_eq!(store.count_records().unwrap(), 1);
        let stored = store.get_record("f1").unwrap().unwrap();
        assert_eq!(stored.record.title, "New");
        assert!(stored.updated_at >= stored.created_at);
        assert_eq!(store.batch_sizes(), vec![1, 1]);
    }

    #[test]
    fn test_empty_batch_is_not_recorded() {
        let store = InMemoryRecordStore::new();
        store.upsert_batch(&[]).unwrap();
        assert!(store.batch_sizes().is_empty());
    }

    #[test]
    fn test_latest_token() {
        let store = InMemoryRecordStore::new();
        assert!(store.latest_token().unwrap().is_none());

        store.append_token(&ChangeCursor::new("a")).unwrap();
        store.append_token(&ChangeCursor::new("b")).unwrap();

        assert_eq!(store.latest_token().unwrap(), Some(ChangeCursor::new("b")));
        assert_eq!(store.count_tokens().unwrap(), 2);
    }
}
