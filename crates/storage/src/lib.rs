//! libsql persistence for Pulse.
//!
//! One local database holds users, endpoint configuration, the health log
//! and the endpoint change feed the probing service tails.

mod endpoints;
mod error;
mod logs;
pub mod migrations;
mod pool;
mod users;

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

pub use endpoints::{EndpointPatch, EndpointRepository, NewEndpoint};
pub use error::{Result, StorageError};
pub use logs::{LogOrder, LogRepository};
pub use pool::{LibsqlManager, LibsqlPool, PooledConnection};
pub use users::{User, UserRepository};

const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Handle on the database; cheap to clone
#[derive(Clone)]
pub struct Storage {
    pool: LibsqlPool,
}

impl Storage {
    /// Open (or create) the database at `path` and run migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn open_with(path: impl AsRef<Path>, max_connections: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| StorageError::Pool(format!("cannot create {}: {err}", parent.display())))?;
        }

        let database = libsql::Builder::new_local(path).build().await?;
        let pool = LibsqlPool::builder(LibsqlManager::new(database))
            .max_size(max_connections.max(1))
            .build()
            .map_err(|err| StorageError::Pool(err.to_string()))?;

        let storage = Self { pool };
        let conn = storage.connection().await?;
        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "database ready");
        Ok(storage)
    }

    pub async fn connection(&self) -> Result<PooledConnection> {
        Ok(self.pool.get().await?)
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    pub fn endpoints(&self) -> EndpointRepository {
        EndpointRepository::new(self.pool.clone())
    }

    pub fn logs(&self) -> LogRepository {
        LogRepository::new(self.pool.clone())
    }
}

pub(crate) fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {micros}")))
}
