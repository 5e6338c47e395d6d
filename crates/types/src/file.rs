//! File metadata as seen by the directory (`FileRecord`) and by the peer
//! agent that owns the bytes (`SharedFile`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn text_matches(filename: &str, category: &str, tags: &[String], needle: &str) -> bool {
    needle.is_empty()
        || filename.to_lowercase().contains(needle)
        || category.to_lowercase().contains(needle)
        || tags.iter().any(|tag| tag.to_lowercase().contains(needle))
}

/// Directory-side record of an advertised file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    pub size: u64,
    pub hash: String,
    pub category: String,
    pub tags: Vec<String>,
    pub owner: String,
    pub peer_address: String,
    pub upload_time: DateTime<Utc>,
    pub downloads: u64,
    pub rating: f64,
}

impl FileRecord {
    pub fn from_registration(
        id: String,
        registration: FileRegistration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            filename: registration.filename,
            size: registration.size,
            hash: registration.hash,
            category: registration.category,
            tags: registration.tags,
            owner: registration.owner,
            peer_address: registration.peer_address,
            upload_time: now,
            downloads: 0,
            rating: 0.0,
        }
    }

    /// Overwrite the mutable fields from a repeat registration by the same owner.
    pub fn merge(&mut self, registration: FileRegistration, now: DateTime<Utc>) {
        self.filename = registration.filename;
        self.size = registration.size;
        self.category = registration.category;
        self.tags = registration.tags;
        self.peer_address = registration.peer_address;
        self.upload_time = now;
    }

    /// Case-insensitive substring match over filename, category and tags.
    ///
    /// `needle` must already be lowercase.
    pub fn matches_text(&self, needle: &str) -> bool {
        text_matches(&self.filename, &self.category, &self.tags, needle)
    }
}

/// Body of `POST /files/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRegistration {
    pub filename: String,
    pub size: u64,
    pub hash: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub owner: String,
    pub peer_address: String,
}

/// A file in a peer agent's local index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFile {
    pub id: String,
    pub filename: String,
    pub file_path: PathBuf,
    pub size: u64,
    pub hash: String,
    pub category: String,
    pub tags: Vec<String>,
    pub shared_at: DateTime<Utc>,
    pub downloads: u64,
    pub is_available: bool,
}

impl SharedFile {
    /// Registration payload advertising this file on behalf of `owner`.
    pub fn registration(&self, owner: &str, peer_address: &str) -> FileRegistration {
        FileRegistration {
            filename: self.filename.clone(),
            size: self.size,
            hash: self.hash.clone(),
            category: self.category.clone(),
            tags: self.tags.clone(),
            owner: owner.to_string(),
            peer_address: peer_address.to_string(),
        }
    }

    /// Local search predicate; `needle` must already be lowercase.
    pub fn matches(&self, needle: &str, category: &str) -> bool {
        let category_ok = category.is_empty() || self.category == category;
        category_ok && text_matches(&self.filename, &self.category, &self.tags, needle)
    }
}
