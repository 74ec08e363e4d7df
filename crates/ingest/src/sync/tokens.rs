//! Change cursor persistence

use log::info;

use crate::error::IngestError;
use crate::models::ChangeCursor;
use crate::storage::RecordStore;

/// Append-only store of change cursors
///
/// Earlier cursors are never rewritten or deleted; the current one is the
/// most recently appended.
pub struct TokenStore<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> TokenStore<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    pub fn latest(&self) -> Result<Option<ChangeCursor>, IngestError> {
        self.store.latest_token().map_err(IngestError::persistence)
    }

    pub fn append(&self, cursor: &ChangeCursor) -> Result<(), IngestError> {
        self.store
            .append_token(cursor)
            .map_err(IngestError::persistence)?;
        info!("Saved change token: {cursor}");
        Ok(())
    }
}
