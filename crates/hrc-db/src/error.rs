//! Database error types

use hrc_index::IndexError;
use hrc_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl From<DbError> for StorageError {
    fn from(e: DbError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<DbError> for IndexError {
    fn from(e: DbError) -> Self {
        IndexError::Backend(e.to_string())
    }
}
