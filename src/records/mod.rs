//! Optimistic concurrency over versioned records.
//!
//! Readers never block. Writers supply the version they read; a write against
//! a version that has moved on fails fast with [`RecordError::EditConflict`]
//! and the caller retries from a fresh read.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;

use crate::storage::models::VersionedRecord;
use crate::storage::{Database, DatabaseError, RecordTable, SwapOutcome};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Unable to update the record due to an edit conflict")]
    EditConflict,
    #[error("Record not found")]
    NotFound,
    #[error("Database error: {0}")]
    Storage(#[from] DatabaseError),
}

pub struct VersionedStore<T> {
    db: Database,
    storage_timeout: Duration,
    table: RecordTable,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for VersionedStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            storage_timeout: self.storage_timeout,
            table: self.table,
            _payload: PhantomData,
        }
    }
}

impl<T> VersionedStore<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(db: Database, table: RecordTable, storage_timeout: Duration) -> Self {
        Self {
            db,
            storage_timeout,
            table,
            _payload: PhantomData,
        }
    }

    pub async fn insert(&self, payload: T) -> Result<VersionedRecord<T>, RecordError> {
        let table = self.table;
        let record = self
            .db
            .run(self.storage_timeout, move |db| db.insert_record(table, payload))
            .await?;
        Ok(record)
    }

    pub async fn get(&self, id: u64) -> Result<VersionedRecord<T>, RecordError> {
        let table = self.table;
        self.db
            .run(self.storage_timeout, move |db| db.get_record(table, id))
            .await?
            .ok_or(RecordError::NotFound)
    }

    /// Apply `mutate` to record `id` if it is still at `expected_version`,
    /// returning the new version.
    ///
    /// A record deleted after the caller's read reports `NotFound`, never
    /// `EditConflict`: existence is checked in the same transaction as the
    /// version.
    ///
    /// A `Storage(Timeout)` result does not prove the write was dropped (see
    /// [`Database::run`]); re-read before retrying.
    pub async fn compare_and_swap<F>(
        &self,
        id: u64,
        expected_version: u32,
        mutate: F,
    ) -> Result<u32, RecordError>
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        let table = self.table;
        let outcome = self
            .db
            .run(self.storage_timeout, move |db| {
                db.swap_record(table, id, expected_version, mutate)
            })
            .await?;

        match outcome {
            SwapOutcome::Applied(record) => Ok(record.version),
            SwapOutcome::Missing => Err(RecordError::NotFound),
            SwapOutcome::Stale { current } => {
                tracing::debug!(id, expected_version, current, "Edit conflict");
                Err(RecordError::EditConflict)
            }
        }
    }

    pub async fn delete(&self, id: u64) -> Result<(), RecordError> {
        let table = self.table;
        let deleted = self
            .db
            .run(self.storage_timeout, move |db| db.delete_record(table, id))
            .await?;

        if deleted {
            Ok(())
        } else {
            Err(RecordError::NotFound)
        }
    }
}
