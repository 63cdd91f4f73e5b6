//! Hrc Database Layer
//!
//! SQLite-backed primary store and tag index, built on sqlx. One database
//! file can serve both roles at the same time.

pub mod error;
pub mod repository;

pub use error::DbError;
pub use repository::{Database, PruneStats};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
