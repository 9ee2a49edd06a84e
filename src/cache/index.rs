use crate::naming::{is_image_extension, is_thumbnail_name, normalize_base};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// One cache key's output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub is_thumbnail: bool,
}

impl IndexEntry {
    /// Still on disk with a decoded image extension
    fn is_valid(&self) -> bool {
        self.path.is_file()
            && self
                .path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(is_image_extension)
    }
}

/// Maps cache keys to decoded files under the image cache directory.
///
/// Pre-existing files are indexed lazily on first use. A thumbnail never
/// replaces a live non-thumbnail entry for the same key.
#[derive(Debug)]
pub struct CacheIndex {
    dir: PathBuf,
    entries: Mutex<HashMap<String, IndexEntry>>,
    loaded: OnceCell<()>,
}

impl CacheIndex {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            entries: Mutex::new(HashMap::new()),
            loaded: OnceCell::new(),
        }
    }

    /// Directory holding decoded images
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Index files already present in the cache directory, once
    pub async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                let dir = self.dir.clone();
                let found = tokio::task::spawn_blocking(move || scan_cache_dir(&dir))
                    .await
                    .unwrap_or_default();
                let count = found.len();
                for (key, entry) in found {
                    self.insert(key, entry);
                }
                info!(dir = %self.dir.display(), files = count, "image cache index loaded");
            })
            .await;
    }

    /// Valid entry for `key`; stale entries are evicted
    pub fn get(&self, key: &str) -> Option<IndexEntry> {
        let mut entries = self.lock();
        let entry = entries.get(key)?.clone();
        if entry.is_valid() {
            Some(entry)
        } else {
            debug!(key, path = %entry.path.display(), "evicting stale cache entry");
            entries.remove(key);
            None
        }
    }

    /// Point every key at `path`, honoring the no-downgrade rule
    pub fn record<I, S>(&self, keys: I, path: &Path, is_thumbnail: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in keys {
            self.insert(
                key.into(),
                IndexEntry {
                    path: path.to_path_buf(),
                    is_thumbnail,
                },
            );
        }
    }

    fn insert(&self, key: String, entry: IndexEntry) {
        if key.is_empty() {
            return;
        }
        let mut entries = self.lock();
        if entry.is_thumbnail {
            if let Some(existing) = entries.get(&key) {
                if !existing.is_thumbnail && existing.path != entry.path && existing.path.is_file() {
                    return;
                }
            }
        }
        entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, IndexEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Collect `(key, entry)` pairs for decoded images in `dir`.
/// Each file is keyed by its stem and by the stem's normalized form.
fn scan_cache_dir(dir: &Path) -> Vec<(String, IndexEntry)> {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in read_dir.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(is_image_extension);
        if !is_image {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let index_entry = IndexEntry {
            path: path.clone(),
            is_thumbnail: is_thumbnail_name(stem),
        };
        let normalized = normalize_base(stem);
        if normalized != stem {
            found.push((normalized, index_entry.clone()));
        }
        found.push((stem.to_string(), index_entry));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"img").unwrap();
        path
    }

    #[tokio::test]
    async fn test_startup_scan_indexes_stem_and_normalized_form() {
        let tmp = TempDir::new().unwrap();
        let original = write(tmp.path(), "abc123_h.jpg");
        write(tmp.path(), "notes.txt");

        let index = CacheIndex::new(tmp.path().to_path_buf());
        index.ensure_loaded().await;

        assert_eq!(index.get("abc123_h").unwrap().path, original);
        assert_eq!(index.get("abc123").unwrap().path, original);
        assert!(index.get("notes").is_none());
    }

    #[tokio::test]
    async fn test_scan_never_lets_thumbnail_shadow_original() {
        let tmp = TempDir::new().unwrap();
        let original = write(tmp.path(), "abc123.png");
        write(tmp.path(), "abc123_t.png");

        let index = CacheIndex::new(tmp.path().to_path_buf());
        index.ensure_loaded().await;

        let entry = index.get("abc123").unwrap();
        assert_eq!(entry.path, original);
        assert!(!entry.is_thumbnail);
    }

    #[test]
    fn test_record_does_not_downgrade() {
        let tmp = TempDir::new().unwrap();
        let original = write(tmp.path(), "k_h.jpg");
        let thumb = write(tmp.path(), "k_t.jpg");
        let index = CacheIndex::new(tmp.path().to_path_buf());

        index.record(["k"], &original, false);
        index.record(["k"], &thumb, true);
        assert_eq!(index.get("k").unwrap().path, original);

        // Once the original is gone, the thumbnail may take over
        fs::remove_file(&original).unwrap();
        index.record(["k"], &thumb, true);
        assert_eq!(index.get("k").unwrap().path, thumb);
    }

    #[test]
    fn test_stale_entries_are_evicted() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "gone.jpg");
        let index = CacheIndex::new(tmp.path().to_path_buf());
        index.record(["gone"], &path, false);
        assert_eq!(index.len(), 1);

        fs::remove_file(&path).unwrap();
        assert!(index.get("gone").is_none());
        assert!(index.is_empty());
    }
}
