//! catalog-service - A small catalog API built around a reusable service core
//!
//! The core provides:
//! - Supervised background tasks that never crash the server and are drained on exit
//! - Signal-driven graceful shutdown (stop listener, finish in-flight, drain tasks)
//! - Optimistic concurrency control over versioned records (compare-and-swap)
//! - Hashed-at-rest bearer tokens with expiry and scope
//! - redb embedded database (ACID, crash-safe)
//! - REST API

pub mod api;
pub mod background;
pub mod config;
pub mod mailer;
pub mod records;
pub mod shutdown;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use std::sync::Arc;

use background::TaskSupervisor;
use config::Config;
use mailer::Mailer;
use records::VersionedStore;
use shutdown::ShutdownStatus;
use storage::models::Movie;
use storage::{Database, MOVIES};
use tokens::TokenAuthority;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub mailer: Arc<dyn Mailer>,
    pub movies: VersionedStore<Movie>,
    pub shutdown: ShutdownStatus,
    pub tasks: TaskSupervisor,
    pub tokens: TokenAuthority,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        tasks: TaskSupervisor,
        mailer: Arc<dyn Mailer>,
        shutdown: ShutdownStatus,
    ) -> Self {
        let storage_timeout = config.server.storage_timeout();
        Self {
            movies: VersionedStore::new(db.clone(), MOVIES, storage_timeout),
            tokens: TokenAuthority::new(db, storage_timeout),
            config,
            mailer,
            shutdown,
            tasks,
        }
    }
}
