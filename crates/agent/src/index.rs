//! In-memory index of the files this agent shares, plus transfer counters.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sharenet_types::SharedFile;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub total_downloads: u64,
    pub total_bytes: u64,
    /// Download requests currently being served.
    pub active_downloads: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStats {
    pub total_uploads: u64,
    pub total_bytes: u64,
    /// Uploads currently being written to disk.
    pub active_uploads: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Download,
    Upload,
}

/// Keeps an `active_*` gauge raised for as long as it lives.
#[must_use]
pub struct ActiveTransfer<'a> {
    index: &'a LocalIndex,
    direction: Direction,
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        match self.direction {
            Direction::Download => {
                let mut stats = self.index.downloads.write();
                stats.active_downloads = stats.active_downloads.saturating_sub(1);
            }
            Direction::Upload => {
                let mut stats = self.index.uploads.write();
                stats.active_uploads = stats.active_uploads.saturating_sub(1);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct LocalIndex {
    files: RwLock<HashMap<String, SharedFile>>,
    downloads: RwLock<DownloadStats>,
    uploads: RwLock<UploadStats>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, returning the previous one.
    pub fn insert(&self, file: SharedFile) -> Option<SharedFile> {
        self.files.write().insert(file.id.clone(), file)
    }

    /// Insert `file` unless its id is already indexed.
    pub fn insert_if_absent(&self, file: SharedFile) -> bool {
        match self.files.write().entry(file.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(file);
                true
            }
        }
    }

    /// Replace the entry, or drop it when `update` is `None`, but only while
    /// it still equals `expected`.
    pub fn replace_if_unchanged(&self, expected: &SharedFile, update: Option<SharedFile>) -> bool {
        let mut files = self.files.write();
        if files.get(&expected.id) != Some(expected) {
            return false;
        }
        match update {
            Some(file) => {
                files.insert(expected.id.clone(), file);
            }
            None => {
                files.remove(&expected.id);
            }
        }
        true
    }

    pub fn remove(&self, id: &str) -> Option<SharedFile> {
        self.files.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<SharedFile> {
        self.files.read().get(id).cloned()
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<SharedFile> {
        self.files
            .read()
            .values()
            .find(|file| file.filename == filename)
            .cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, SharedFile> {
        self.files.read().clone()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Available files ordered by filename.
    pub fn list_available(&self) -> Vec<SharedFile> {
        let mut files: Vec<SharedFile> = self
            .files
            .read()
            .values()
            .filter(|file| file.is_available)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        files
    }

    /// Available files matching `query` (case-insensitive) within `category`.
    pub fn search(&self, query: &str, category: &str) -> Vec<SharedFile> {
        let needle = query.to_lowercase();
        let mut results: Vec<SharedFile> = self
            .files
            .read()
            .values()
            .filter(|file| file.is_available && file.matches(&needle, category))
            .cloned()
            .collect();
        results.sort_by(|a, b| a.filename.cmp(&b.filename));
        results
    }

    /// Count a served download against the file and the aggregate counters.
    pub fn record_download(&self, id: &str) -> Option<SharedFile> {
        let file = {
            let mut files = self.files.write();
            let file = files.get_mut(id)?;
            file.downloads += 1;
            file.clone()
        };

        let mut stats = self.downloads.write();
        stats.total_downloads += 1;
        stats.total_bytes += file.size;
        Some(file)
    }

    pub fn record_upload(&self, bytes: u64) {
        let mut stats = self.uploads.write();
        stats.total_uploads += 1;
        stats.total_bytes += bytes;
    }

    pub fn begin_download(&self) -> ActiveTransfer<'_> {
        self.downloads.write().active_downloads += 1;
        ActiveTransfer {
            index: self,
            direction: Direction::Download,
        }
    }

    pub fn begin_upload(&self) -> ActiveTransfer<'_> {
        self.uploads.write().active_uploads += 1;
        ActiveTransfer {
            index: self,
            direction: Direction::Upload,
        }
    }

    pub fn download_stats(&self) -> DownloadStats {
        self.downloads.read().clone()
    }

    pub fn upload_stats(&self) -> UploadStats {
        self.uploads.read().clone()
    }
}
