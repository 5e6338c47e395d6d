//! Sharenet directory registries
//!
//! In-memory stores owned by the directory service. Each registry guards its
//! map with its own reader/writer lock; no method takes more than one lock,
//! and nothing here is async, so no lock is ever held across an await point.
//!
//! ## Modules
//! - `peers`: peer registry and liveness sweep
//! - `files`: file registry with (hash, owner) merge, search and sort
//! - `stats`: network statistics aggregation

pub mod files;
pub mod peers;
pub mod stats;

pub use files::{sort_records, FileRegistry, SearchRequest, SortKey, DEFAULT_SEARCH_LIMIT};
pub use peers::PeerRegistry;
pub use stats::collect_stats;

/// Registry lookup failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("peer {0} not found")]
    PeerNotFound(String),
    #[error("file {0} not found")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
