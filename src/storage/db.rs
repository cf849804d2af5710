use chrono::{DateTime, Utc};
use redb::{Database as RedbDatabase, ReadTransaction, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Storage task failed: {0}")]
    Task(String),
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
    /// Set on the handle passed into [`Database::run`]; writes that reach
    /// their commit after this point are rolled back.
    deadline: Option<(Instant, Duration)>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("catalog.redb");
        let db = RedbDatabase::create(db_path)?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TOKENS)?;
            let _ = write_txn.open_table(SUBJECT_TOKENS)?;
            let _ = write_txn.open_table(TOKEN_EXPIRY)?;
            let _ = write_txn.open_table(RECORD_SEQUENCES)?;
            let _ = write_txn.open_table(MOVIES)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            deadline: None,
        })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    /// Commit `txn`, or roll it back if this handle's deadline has passed.
    pub fn commit(&self, txn: WriteTransaction) -> Result<(), DatabaseError> {
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() >= deadline {
                txn.abort()?;
                return Err(DatabaseError::Timeout(timeout));
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Run a storage operation on the blocking pool with a bounded wait.
    ///
    /// redb calls block the calling thread, so async callers go through here.
    /// On timeout the caller gets [`DatabaseError::Timeout`] and the blocking
    /// operation keeps running, but any write it has not yet committed is
    /// rolled back at commit time. A commit already under way when the wait
    /// expires can still land, so callers that see a timeout on a write
    /// re-read before retrying.
    pub async fn run<T, F>(&self, timeout: Duration, op: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Database) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Database {
            db: Arc::clone(&self.db),
            deadline: Some((Instant::now() + timeout, timeout)),
        };
        let task = tokio::task::spawn_blocking(move || op(&db));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DatabaseError::Task(e.to_string())),
            Err(_) => Err(DatabaseError::Timeout(timeout)),
        }
    }
}

/// Build an expiration index key that sorts chronologically.
pub(crate) fn expiry_key(expires_at: &DateTime<Utc>, id: &str) -> String {
    let ms = expires_at.timestamp_millis().max(0);
    format!("{ms:020}:{id}")
}

/// Extract the millisecond timestamp from an expiration index key.
pub(crate) fn expiry_key_ms(key: &str) -> Option<i64> {
    key.split_once(':').and_then(|(ms, _)| ms.parse().ok())
}
