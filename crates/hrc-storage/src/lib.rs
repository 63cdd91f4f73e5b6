//! Hrc Primary Cache Storage
//!
//! This crate provides the storage abstraction for cached response bodies,
//! supporting an in-memory map and a local directory tree.

pub mod backend;
pub mod error;
pub mod local;
pub mod memory;

pub use backend::{CacheStore, CachedContent};
pub use error::StorageError;
pub use local::LocalStore;
pub use memory::MemoryStore;
