//! Hrc Tag Index
//!
//! Secondary index mapping cache keys to invalidation tags. Lookups and
//! deletes by tag use AND semantics: an entry is selected only when its
//! tag set contains every requested tag.

pub mod bucket;
pub mod error;
pub mod index;
pub mod memory;
pub mod tags;

pub use bucket::BucketIndex;
pub use error::IndexError;
pub use index::TagIndex;
pub use memory::MemoryIndex;
pub use tags::{canonical_tags, natural_cmp};
