//! Sharenet shared types
//!
//! Data model and identity helpers used by both the directory service and
//! the peer agent.
//!
//! ## Modules
//! - `id`: identifier derivation for peers and files
//! - `hash`: SHA-256 content hashing
//! - `classify`: filename based category and tag extraction
//! - `peer`: peer records and registration payloads
//! - `file`: directory file records, agent shared files, registration payloads
//! - `stats`: aggregated network statistics
//! - `event`: real-time event envelope

pub mod classify;
pub mod event;
pub mod file;
pub mod hash;
pub mod id;
pub mod peer;
pub mod stats;

pub use classify::{categorize, extract_tags};
pub use event::{Event, EventKind};
pub use file::{FileRecord, FileRegistration, SharedFile};
pub use hash::{hash_bytes, hash_file};
pub use id::{derive_agent_id, derive_file_id, derive_peer_id, derive_shared_file_id};
pub use peer::{Peer, PeerRegistration, DEFAULT_REGION};
pub use stats::NetworkStats;
