//! Identifier derivation.
//!
//! Identifiers are truncated lowercase SHA-256 digests of a colon separated
//! key. Directory-side identifiers include a unix-seconds component; the
//! agent's shared-file identifiers do not, so they stay stable across rescans.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Length of every derived identifier, prefix included.
pub const ID_LEN: usize = 16;

const AGENT_PREFIX: &str = "peer_";
const SHARED_FILE_PREFIX: &str = "file_";

fn digest_hex(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn truncated(prefix: &str, key: &str) -> String {
    let mut id = String::with_capacity(ID_LEN);
    id.push_str(prefix);
    id.push_str(&digest_hex(key)[..ID_LEN - prefix.len()]);
    id
}

/// Identifier the directory assigns to a registering peer.
pub fn derive_peer_id(address: &str, port: u16, at: DateTime<Utc>) -> String {
    truncated("", &format!("{address}:{port}:{}", at.timestamp()))
}

/// Identifier the directory assigns to a newly advertised file.
pub fn derive_file_id(filename: &str, owner: &str, at: DateTime<Utc>) -> String {
    truncated("", &format!("{filename}:{owner}:{}", at.timestamp()))
}

/// Local identity of a peer agent before the directory has assigned one.
pub fn derive_agent_id(address: &str, port: u16, at: DateTime<Utc>) -> String {
    truncated(AGENT_PREFIX, &format!("{address}:{port}:{}", at.timestamp()))
}

/// Time-invariant identifier for a file in an agent's local index.
pub fn derive_shared_file_id(filename: &str, owner: &str) -> String {
    truncated(SHARED_FILE_PREFIX, &format!("{filename}:{owner}"))
}
