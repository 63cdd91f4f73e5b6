//! Index error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("At least one tag is required")]
    EmptyTags,

    #[error("Invalid tag: {0:?}")]
    InvalidTag(String),

    #[error("Invalid index key: {0}")]
    InvalidKey(String),

    #[error("Corrupt index record in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Index backend error: {0}")]
    Backend(String),
}
