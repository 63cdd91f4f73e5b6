//! Orchestrator counters

use serde::Serialize;

/// Outcome counters since the orchestrator was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub save_count: u64,
    pub purge_count: u64,
}
