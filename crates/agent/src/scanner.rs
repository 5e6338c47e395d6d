//! Filesystem scanning and index reconciliation.
//!
//! Everything here is blocking; callers run it on the blocking pool.

use chrono::Utc;
use sharenet_types::{categorize, derive_shared_file_id, extract_tags, hash_file, SharedFile};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use tracing::warn;

/// Build an index entry for one regular file, hashing its contents.
pub fn shared_file(path: &Path, owner: &str) -> io::Result<SharedFile> {
    let metadata = std::fs::metadata(path)?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no UTF-8 file name", path.display()),
            )
        })?
        .to_string();

    Ok(SharedFile {
        id: derive_shared_file_id(&filename, owner),
        hash: hash_file(path)?,
        size: metadata.len(),
        category: categorize(&filename),
        tags: extract_tags(&filename),
        file_path: path.to_path_buf(),
        filename,
        shared_at: Utc::now(),
        downloads: 0,
        is_available: true,
    })
}

/// Recursively collect every regular file under `dir`.
///
/// Entries that cannot be read are skipped. When two files share a name the
/// first one in walk order wins, since identifiers derive from the name.
pub fn scan_directory(dir: &Path, owner: &str) -> io::Result<Vec<SharedFile>> {
    let mut found = HashMap::new();
    walk(dir, owner, &mut found, true)?;

    let mut files: Vec<SharedFile> = found.into_values().collect();
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

fn walk(
    dir: &Path,
    owner: &str,
    found: &mut HashMap<String, SharedFile>,
    root: bool,
) -> io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if !root => {
            warn!("Skipping unreadable directory {}: {}", dir.display(), err);
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    paths.sort();

    for path in paths {
        let file_type = match std::fs::metadata(&path) {
            Ok(metadata) => metadata.file_type(),
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                continue;
            }
        };

        if file_type.is_dir() {
            walk(&path, owner, found, false)?;
        } else if file_type.is_file() {
            match shared_file(&path, owner) {
                Ok(file) => {
                    found.entry(file.id.clone()).or_insert(file);
                }
                Err(err) => warn!("Skipping {}: {}", path.display(), err),
            }
        }
    }
    Ok(())
}

/// Difference between the index and what is on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Observed on disk but not indexed.
    pub added: Vec<SharedFile>,
    /// Indexed and observed, but contents, size or location changed.
    pub changed: Vec<SharedFile>,
    /// Indexed but no longer observed.
    pub removed: Vec<SharedFile>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Compare the current index with a fresh scan, keyed by identifier.
///
/// Changed entries keep their download count and original share time.
pub fn diff(current: &HashMap<String, SharedFile>, observed: Vec<SharedFile>) -> Reconciliation {
    let mut result = Reconciliation::default();
    let mut seen = HashSet::with_capacity(observed.len());

    for mut file in observed {
        seen.insert(file.id.clone());
        match current.get(&file.id) {
            None => result.added.push(file),
            Some(existing)
                if existing.hash != file.hash
                    || existing.size != file.size
                    || existing.file_path != file.file_path =>
            {
                file.downloads = existing.downloads;
                file.shared_at = existing.shared_at;
                result.changed.push(file);
            }
            Some(_) => {}
        }
    }

    let mut removed: Vec<SharedFile> = current
        .values()
        .filter(|file| !seen.contains(&file.id))
        .cloned()
        .collect();
    removed.sort_by(|a, b| a.filename.cmp(&b.filename));
    result.removed = removed;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn index_of(files: Vec<SharedFile>) -> HashMap<String, SharedFile> {
        files.into_iter().map(|file| (file.id.clone(), file)).collect()
    }

    #[test]
    fn scan_hashes_every_file_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b.mp3"), b"beta").unwrap();

        let files = scan_directory(dir.path(), "owner").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "a.txt");
        assert_eq!(files[0].hash, sharenet_types::hash_bytes(b"alpha"));
        assert_eq!(files[0].size, 5);
        assert_eq!(files[1].category, "audio");
        assert!(files.iter().all(|file| file.is_available));
    }

    #[test]
    fn scan_of_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_directory(&dir.path().join("absent"), "owner").is_err());
    }

    #[test]
    fn identifiers_are_stable_across_scans() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();

        let first = scan_directory(dir.path(), "owner").unwrap();
        let second = scan_directory(dir.path(), "owner").unwrap();
        assert_eq!(first[0].id, second[0].id);
        assert!(diff(&index_of(first), second).is_empty());
    }

    #[test]
    fn diff_reports_added_changed_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"same").unwrap();
        fs::write(dir.path().join("edit.txt"), b"before").unwrap();
        fs::write(dir.path().join("gone.txt"), b"bye").unwrap();
        let mut current = index_of(scan_directory(dir.path(), "owner").unwrap());
        let edit_id = derive_shared_file_id("edit.txt", "owner");
        current.get_mut(&edit_id).unwrap().downloads = 4;

        fs::write(dir.path().join("edit.txt"), b"after!").unwrap();
        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        fs::write(dir.path().join("new.txt"), b"hello").unwrap();

        let result = diff(&current, scan_directory(dir.path(), "owner").unwrap());
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.added[0].filename, "new.txt");
        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.changed[0].id, edit_id);
        assert_eq!(result.changed[0].downloads, 4);
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].filename, "gone.txt");
    }
}
