use pulse::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("{0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("event payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<deadpool::managed::PoolError<libsql::Error>> for StorageError {
    fn from(err: deadpool::managed::PoolError<libsql::Error>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(err) => StorageError::Database(err),
            other => StorageError::Pool(other.to_string()),
        }
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Pool(message) => StoreError::Unavailable(message),
            other => StoreError::backend(other),
        }
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
