//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use tempfile::TempDir;

use crate::background::TaskSupervisor;
use crate::config::{Config, NodeConfig, ServerConfig, TokenConfig};
use crate::mailer::{MailFut, Mailer};
use crate::shutdown::ShutdownCoordinator;
use crate::storage::models::{Movie, Runtime, StoredToken, TokenScope};
use crate::storage::Database;
use crate::tokens::Token;
use crate::AppState;

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard; the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A minimal `Config` suitable for unit tests.
pub fn test_config() -> Config {
    Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:4000".to_string(),
            data_dir: "/tmp/test".to_string(),
            environment: "test".to_string(),
            instance_id: "test-instance".to_string(),
        },
        server: ServerConfig::default(),
        tokens: TokenConfig::default(),
    }
}

/// Build a full `Arc<AppState>` around the given database with a [`RecordingMailer`].
pub fn test_state(db: Database) -> Arc<AppState> {
    test_state_with_mailer(db, Arc::new(RecordingMailer::default()))
}

pub fn test_state_with_mailer(db: Database, mailer: Arc<dyn Mailer>) -> Arc<AppState> {
    let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
    Arc::new(AppState::new(
        test_config(),
        db,
        TaskSupervisor::new(),
        mailer,
        coordinator.status(),
    ))
}

/// Mailer that keeps the tokens it was asked to deliver.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Token>>,
}

impl Mailer for RecordingMailer {
    fn send_activation<'a>(&'a self, token: &'a Token) -> MailFut<'a> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(token.clone());
            Ok(())
        })
    }
}

/// Create a `Movie` with the given title and otherwise valid fields.
pub fn make_movie(title: &str) -> Movie {
    Movie {
        genres: vec!["drama".to_string()],
        runtime: Runtime(110),
        title: title.to_string(),
        year: 1990,
    }
}

/// Create a `StoredToken` whose hash is `seed` repeated.
pub fn make_stored_token(
    seed: u8,
    subject_id: u64,
    scope: TokenScope,
    expiry: DateTime<Utc>,
) -> StoredToken {
    StoredToken {
        expiry,
        hash: [seed; 32],
        scope,
        subject_id,
    }
}

/// Random source that always fails, as an exhausted entropy pool would.
pub struct BrokenRng;

impl RngCore for BrokenRng {
    fn next_u32(&mut self) -> u32 {
        unreachable!("only try_fill_bytes is used")
    }

    fn next_u64(&mut self) -> u64 {
        unreachable!("only try_fill_bytes is used")
    }

    fn fill_bytes(&mut self, _dest: &mut [u8]) {
        unreachable!("only try_fill_bytes is used")
    }

    fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
        Err(rand::Error::new(std::io::Error::other("entropy source gone")))
    }
}
