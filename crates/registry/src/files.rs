use crate::{RegistryError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sharenet_types::{derive_file_id, FileRecord, FileRegistration};
use std::collections::HashMap;
use tracing::info;

/// Result cap applied when a search does not specify one.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Ordering applied to search results after filtering and before the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Filename ascending.
    Name,
    /// Size descending.
    Size,
    /// Download count descending.
    Downloads,
    /// Rating descending.
    Rating,
    /// Upload time descending (newest first).
    #[default]
    Date,
}

impl SortKey {
    /// Parse a `sort=` query value; anything unrecognised sorts by date.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "name" => SortKey::Name,
            "size" => SortKey::Size,
            "downloads" => SortKey::Downloads,
            "rating" => SortKey::Rating,
            _ => SortKey::Date,
        }
    }
}

pub fn sort_records(records: &mut [FileRecord], key: SortKey) {
    match key {
        SortKey::Name => records.sort_by(|a, b| a.filename.cmp(&b.filename)),
        SortKey::Size => records.sort_by(|a, b| b.size.cmp(&a.size)),
        SortKey::Downloads => records.sort_by(|a, b| b.downloads.cmp(&a.downloads)),
        SortKey::Rating => records.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
        SortKey::Date => records.sort_by(|a, b| b.upload_time.cmp(&a.upload_time)),
    }
}

/// Filter, sort and limit parameters for a directory search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub category: String,
    pub sort: SortKey,
    pub limit: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            category: String::new(),
            sort: SortKey::Date,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// Advertised files keyed by directory-assigned identifier.
///
/// At most one record exists per (content hash, owner). Lookups by that pair
/// are a linear scan; the registry is sized for a single directory process.
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: RwLock<HashMap<String, FileRecord>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record or merge into the existing (hash, owner) record.
    ///
    /// Returns the canonical stored record.
    pub fn register(&self, registration: FileRegistration) -> FileRecord {
        self.register_at(registration, Utc::now())
    }

    pub fn register_at(&self, registration: FileRegistration, now: DateTime<Utc>) -> FileRecord {
        let mut files = self.files.write();

        if let Some(existing) = files
            .values_mut()
            .find(|file| file.hash == registration.hash && file.owner == registration.owner)
        {
            existing.merge(registration, now);
            info!("File updated: {} by {}", existing.filename, existing.owner);
            return existing.clone();
        }

        let mut id = derive_file_id(&registration.filename, &registration.owner, now);
        let mut salt = 0u32;
        while files.contains_key(&id) {
            salt += 1;
            let salted = format!("{}#{salt}", registration.filename);
            id = derive_file_id(&salted, &registration.owner, now);
        }

        let record = FileRecord::from_registration(id.clone(), registration, now);
        info!("File registered: {} by {}", record.filename, record.owner);
        files.insert(id, record.clone());
        record
    }

    /// Records in `category` (if non-empty) matching `query` (if non-empty).
    pub fn search(&self, query: &str, category: &str) -> Vec<FileRecord> {
        let needle = query.to_lowercase();
        self.files
            .read()
            .values()
            .filter(|file| category.is_empty() || file.category == category)
            .filter(|file| file.matches_text(&needle))
            .cloned()
            .collect()
    }

    /// Full search pipeline: filter, sort, then limit.
    pub fn query(&self, request: &SearchRequest) -> Vec<FileRecord> {
        let mut results = self.search(&request.query, &request.category);
        sort_records(&mut results, request.sort);
        results.truncate(request.limit);
        results
    }

    /// Count a download, returning the updated record.
    pub fn record_download(&self, file_id: &str) -> Result<FileRecord> {
        let mut files = self.files.write();
        let file = files
            .get_mut(file_id)
            .ok_or_else(|| RegistryError::FileNotFound(file_id.to_string()))?;
        file.downloads += 1;
        Ok(file.clone())
    }

    pub fn get(&self, file_id: &str) -> Option<FileRecord> {
        self.files.read().get(file_id).cloned()
    }

    pub fn list_all(&self) -> Vec<FileRecord> {
        self.files.read().values().cloned().collect()
    }

    pub fn count_by_owner(&self, owner: &str) -> usize {
        self.files
            .read()
            .values()
            .filter(|file| file.owner == owner)
            .count()
    }

    /// `(file count, summed downloads)`.
    pub fn totals(&self) -> (usize, u64) {
        let files = self.files.read();
        let downloads = files.values().map(|file| file.downloads).sum();
        (files.len(), downloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn registration(filename: &str, hash: &str, owner: &str) -> FileRegistration {
        FileRegistration {
            filename: filename.to_string(),
            size: 100,
            hash: hash.to_string(),
            category: sharenet_types::categorize(filename),
            tags: sharenet_types::extract_tags(filename),
            owner: owner.to_string(),
            peer_address: "127.0.0.1:9001".to_string(),
        }
    }

    #[test]
    fn same_hash_and_owner_merges() {
        let registry = FileRegistry::new();
        let first = registry.register_at(registration("old.txt", "h1", "p1"), at(10));
        let second = registry.register_at(registration("new.txt", "h1", "p1"), at(20));

        assert_eq!(first.id, second.id);
        assert_eq!(registry.list_all().len(), 1);
        let stored = registry.get(&first.id).unwrap();
        assert_eq!(stored.filename, "new.txt");
        assert_eq!(stored.upload_time, at(20));
        assert_eq!(stored, second);
    }

    #[test]
    fn same_hash_different_owner_is_distinct() {
        let registry = FileRegistry::new();
        let a = registry.register(registration("a.txt", "h1", "p1"));
        let b = registry.register(registration("a.txt", "h1", "p2"));
        assert_ne!(a.id, b.id);
        assert_eq!(registry.list_all().len(), 2);
    }

    #[test]
    fn id_collision_within_a_second_gets_a_fresh_id() {
        let registry = FileRegistry::new();
        let a = registry.register_at(registration("a.txt", "h1", "p1"), at(5));
        let b = registry.register_at(registration("a.txt", "h2", "p1"), at(5));
        assert_ne!(a.id, b.id);
        assert_eq!(registry.list_all().len(), 2);
    }

    #[test]
    fn empty_search_returns_everything() {
        let registry = FileRegistry::new();
        registry.register(registration("a.txt", "h1", "p1"));
        registry.register(registration("b.png", "h2", "p1"));
        registry.register(registration("c.mp3", "h3", "p2"));
        assert_eq!(registry.search("", "").len(), 3);
    }

    #[test]
    fn text_search_matches_filename_category_or_tag() {
        let registry = FileRegistry::new();
        registry.register(registration("Beach_PHOTO.bin", "h1", "p1"));
        registry.register(registration("summer-image.png", "h2", "p1"));
        registry.register(registration("notes.txt", "h3", "p1"));
        let mut tagged = registration("unrelated.bin", "h4", "p1");
        tagged.tags = vec!["PhotoShoot".to_string()];
        registry.register(tagged);

        let mut names: Vec<String> = registry
            .search("photo", "")
            .into_iter()
            .map(|file| file.filename)
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["Beach_PHOTO.bin", "summer-image.png", "unrelated.bin"]
        );

        let images = registry.search("", "image");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].filename, "summer-image.png");
    }

    #[test]
    fn sort_orders() {
        let registry = FileRegistry::new();
        for (i, name) in ["b.txt", "a.txt", "c.txt"].iter().enumerate() {
            let mut reg = registration(name, &format!("h{i}"), "p1");
            reg.size = [50, 300, 10][i];
            registry.register_at(reg, at(100 + i as i64));
        }

        let mut by_size = registry.list_all();
        sort_records(&mut by_size, SortKey::Size);
        assert!(by_size.windows(2).all(|w| w[0].size >= w[1].size));

        let mut by_name = registry.list_all();
        sort_records(&mut by_name, SortKey::Name);
        assert!(by_name.windows(2).all(|w| w[0].filename <= w[1].filename));

        let mut by_date = registry.list_all();
        sort_records(&mut by_date, SortKey::Date);
        assert_eq!(by_date[0].filename, "c.txt");
    }

    #[test]
    fn query_sorts_before_limiting() {
        let registry = FileRegistry::new();
        for (i, size) in [5u64, 500, 50].iter().enumerate() {
            let mut reg = registration(&format!("f{i}.txt"), &format!("h{i}"), "p1");
            reg.size = *size;
            registry.register(reg);
        }

        let request = SearchRequest {
            sort: SortKey::Size,
            limit: 1,
            ..SearchRequest::default()
        };
        let results = registry.query(&request);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].size, 500);
    }

    #[test]
    fn sort_key_parsing_is_lenient() {
        assert_eq!(SortKey::parse("name"), SortKey::Name);
        assert_eq!(SortKey::parse("SIZE"), SortKey::Size);
        assert_eq!(SortKey::parse("downloads"), SortKey::Downloads);
        assert_eq!(SortKey::parse("rating"), SortKey::Rating);
        assert_eq!(SortKey::parse(""), SortKey::Date);
        assert_eq!(SortKey::parse("bogus"), SortKey::Date);
    }

    #[test]
    fn record_download_touches_only_target() {
        let registry = FileRegistry::new();
        let a = registry.register(registration("a.txt", "h1", "p1"));
        let b = registry.register(registration("b.txt", "h2", "p1"));

        assert_eq!(
            registry.record_download("missing"),
            Err(RegistryError::FileNotFound("missing".into()))
        );
        assert_eq!(registry.totals(), (2, 0));

        let updated = registry.record_download(&a.id).unwrap();
        assert_eq!(updated.downloads, 1);
        assert_eq!(registry.get(&a.id).unwrap().downloads, 1);
        assert_eq!(registry.get(&b.id).unwrap().downloads, 0);
        assert_eq!(registry.totals(), (2, 1));
    }

    #[test]
    fn counts_files_per_owner() {
        let registry = FileRegistry::new();
        registry.register(registration("a.txt", "h1", "p1"));
        registry.register(registration("b.txt", "h2", "p1"));
        registry.register(registration("c.txt", "h3", "p2"));
        assert_eq!(registry.count_by_owner("p1"), 2);
        assert_eq!(registry.count_by_owner("p3"), 0);
    }
}
