use chrono::Utc;
use redb::{ReadableTable, TableDefinition, TableHandle};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::db::{Database, DatabaseError};
use super::models::VersionedRecord;
use super::tables::RECORD_SEQUENCES;

/// A table of versioned records keyed by id
pub type RecordTable = TableDefinition<'static, u64, &'static [u8]>;

/// Outcome of a conditional update
#[derive(Debug)]
pub enum SwapOutcome<T> {
    Applied(VersionedRecord<T>),
    Missing,
    /// The stored record has moved on from the expected version
    Stale { current: u32 },
}

impl Database {
    // ========================================================================
    // Versioned record operations
    // ========================================================================

    /// Store a new record at version 1 under the next id of the table's sequence
    pub fn insert_record<T: Serialize>(
        &self,
        table: RecordTable,
        payload: T,
    ) -> Result<VersionedRecord<T>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let record = {
            let mut sequences = write_txn.open_table(RECORD_SEQUENCES)?;
            let id = sequences
                .get(table.name())?
                .map(|v| v.value())
                .unwrap_or(0)
                + 1;
            sequences.insert(table.name(), id)?;

            let record = VersionedRecord {
                created_at: Utc::now(),
                id,
                payload,
                version: 1,
            };
            let mut records = write_txn.open_table(table)?;
            let data = rmp_serde::to_vec_named(&record)?;
            records.insert(id, data.as_slice())?;
            record
        };
        self.commit(write_txn)?;
        Ok(record)
    }

    /// Get a record by id
    pub fn get_record<T: DeserializeOwned>(
        &self,
        table: RecordTable,
        id: u64,
    ) -> Result<Option<VersionedRecord<T>>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let records = read_txn.open_table(table)?;

        match records.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Apply `mutate` and bump the version, but only if the stored version
    /// still equals `expected_version`.
    ///
    /// The existence check, the version comparison and the write share one
    /// write transaction, and redb admits a single writer at a time, so two
    /// callers holding the same version can never both succeed.
    pub fn swap_record<T, F>(
        &self,
        table: RecordTable,
        id: u64,
        expected_version: u32,
        mutate: F,
    ) -> Result<SwapOutcome<T>, DatabaseError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let write_txn = self.begin_write()?;
        let outcome = {
            let mut records = write_txn.open_table(table)?;
            let current: Option<VersionedRecord<T>> = match records.get(id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };

            match current {
                None => SwapOutcome::Missing,
                Some(record) if record.version != expected_version => SwapOutcome::Stale {
                    current: record.version,
                },
                Some(mut record) => {
                    mutate(&mut record.payload);
                    record.version += 1;
                    let data = rmp_serde::to_vec_named(&record)?;
                    records.insert(id, data.as_slice())?;
                    SwapOutcome::Applied(record)
                }
            }
        };

        if matches!(outcome, SwapOutcome::Applied(_)) {
            self.commit(write_txn)?;
        } else {
            write_txn.abort()?;
        }
        Ok(outcome)
    }

    /// Delete a record by id
    pub fn delete_record(&self, table: RecordTable, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut records = write_txn.open_table(table)?;
            let removed = records.remove(id)?.is_some();
            removed
        };
        self.commit(write_txn)?;
        Ok(deleted)
    }
}
