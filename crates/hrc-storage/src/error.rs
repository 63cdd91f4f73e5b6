//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Corrupt cache record: {0}")]
    Corrupt(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}
