/// Background detection of better renditions for thumbnail-backed entries.
///
/// When a request was answered from a thumbnail container, a check is spawned
/// that looks for a non-thumbnail, variant-suffixed container with the same
/// base name. The thumbnail container is taken from the request, or located
/// again through the hardlink index and a thumbnail-only search. Originals are
/// looked for next to it first, then through an originals-only search.
/// A hit sets the key's update flag and notifies the UI once.

use super::events::{EventSink, ImageEvent};
use super::reference::ImageReference;
use crate::account::AccountDirectory;
use crate::naming::{is_thumbnail_name, normalize_base, ContainerName};
use crate::store::hardlink::HardlinkPool;
use crate::store::search::{ContainerSearch, SearchOptions};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Per-key "better version available" flags
#[derive(Debug, Default)]
pub struct UpdateFlags {
    flagged: Mutex<HashSet<String>>,
    watching: Mutex<HashSet<String>>,
}

impl UpdateFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns false if it was already set.
    pub fn set(&self, key: &str) -> bool {
        lock(&self.flagged).insert(key.to_string())
    }

    pub fn clear(&self, key: &str) {
        lock(&self.flagged).remove(key);
    }

    pub fn is_set(&self, key: &str) -> bool {
        lock(&self.flagged).contains(key)
    }

    /// Claim the key for a background check. False if one is already running.
    fn begin_watch(&self, key: &str) -> bool {
        lock(&self.watching).insert(key.to_string())
    }

    fn end_watch(&self, key: &str) {
        lock(&self.watching).remove(key);
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Everything one background check needs
#[derive(Debug, Clone)]
pub struct UpgradeCheck {
    pub cache_key: String,
    pub reference: ImageReference,
    pub account_dir: AccountDirectory,
    /// Thumbnail container the cached image came from, when known
    pub source_container: Option<PathBuf>,
}

impl UpgradeCheck {
    fn target(&self) -> String {
        let source_stem = self
            .source_container
            .as_deref()
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str());
        let name = source_stem
            .or(self.reference.dat_name())
            .or(self.reference.md5())
            .unwrap_or(self.cache_key.as_str());
        normalize_base(name)
    }
}

#[derive(Clone)]
pub struct UpdateWatcher {
    search: Arc<ContainerSearch>,
    hardlinks: Arc<HardlinkPool>,
    flags: Arc<UpdateFlags>,
    sink: Arc<dyn EventSink>,
    timeout: Duration,
}

impl UpdateWatcher {
    pub fn new(
        search: Arc<ContainerSearch>,
        hardlinks: Arc<HardlinkPool>,
        flags: Arc<UpdateFlags>,
        sink: Arc<dyn EventSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            search,
            hardlinks,
            flags,
            sink,
            timeout,
        }
    }

    /// Start a background check unless the key is already flagged or watched.
    /// Never blocks the caller; the handle resolves to whether an upgrade was found.
    pub fn spawn(&self, check: UpgradeCheck) -> Option<JoinHandle<bool>> {
        if self.flags.is_set(&check.cache_key) || !self.flags.begin_watch(&check.cache_key) {
            return None;
        }

        let watcher = self.clone();
        Some(tokio::spawn(async move {
            let found = tokio::time::timeout(watcher.timeout, watcher.check(&check))
                .await
                .unwrap_or(false);
            watcher.flags.end_watch(&check.cache_key);
            found
        }))
    }

    /// Look for a better container and flag the key if one exists
    pub async fn check(&self, check: &UpgradeCheck) -> bool {
        let target = check.target();
        if target.is_empty() {
            return false;
        }

        let source = match &check.source_container {
            Some(source) => Some(source.clone()),
            None => self.locate_thumbnail(check, &target).await,
        };

        let mut better = None;
        if let Some(source) = source {
            let wanted = target.clone();
            better = tokio::task::spawn_blocking(move || find_upgrade_near(&source, &wanted))
                .await
                .ok()
                .flatten();
        }

        if better.is_none() {
            better = self
                .search
                .search(&check.account_dir, &target, SearchOptions::ORIGINAL_ONLY)
                .await
                .filter(|p| is_upgrade_path(p));
        }

        let Some(better) = better else {
            debug!(key = %check.cache_key, "no better rendition found");
            return false;
        };

        if self.flags.set(&check.cache_key) {
            info!(key = %check.cache_key, path = %better.display(), "better rendition available");
            self.sink.emit(ImageEvent::UpdateAvailable {
                cache_key: check.cache_key.clone(),
                image_md5: check.reference.md5().map(str::to_string),
                image_dat_name: check.reference.dat_name().map(str::to_string),
            });
        }
        true
    }

    /// Find the thumbnail container behind a cache hit: hardlink index by
    /// hash first, then a thumbnail-only search
    async fn locate_thumbnail(&self, check: &UpgradeCheck, target: &str) -> Option<PathBuf> {
        if let Some(md5) = check.reference.md5() {
            let hit = self
                .hardlinks
                .lookup(&check.account_dir, md5, check.reference.session())
                .await
                .filter(|p| {
                    p.file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(is_thumbnail_name)
                });
            if hit.is_some() {
                return hit;
            }
        }

        self.search
            .search(&check.account_dir, target, SearchOptions::THUMB_ONLY)
            .await
    }
}

impl std::fmt::Debug for UpdateWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateWatcher")
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn is_upgrade_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(ContainerName::parse)
        .is_some_and(|name| name.is_upgrade_candidate())
}

/// Scan the thumbnail's own directory for an original with the same base
fn find_upgrade_near(thumbnail: &Path, normalized_target: &str) -> Option<PathBuf> {
    let dir = thumbnail.parent()?;
    fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(ContainerName::parse)
                .is_some_and(|name| name.is_upgrade_candidate() && name.normalized == normalized_target)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::events::BroadcastSink;
    use crate::store::hardlink::test_support::write_hardlink_db;
    use tempfile::TempDir;

    const HASH: &str = "00112233445566778899aabbccddeeff";

    fn watcher(sink: Arc<BroadcastSink>, flags: Arc<UpdateFlags>) -> UpdateWatcher {
        UpdateWatcher::new(
            Arc::new(ContainerSearch::new(8, Duration::from_secs(5))),
            Arc::new(HardlinkPool::new()),
            flags,
            sink,
            Duration::from_secs(5),
        )
    }

    fn check_for(tmp: &TempDir, source: Option<PathBuf>) -> UpgradeCheck {
        UpgradeCheck {
            cache_key: HASH.to_string(),
            reference: ImageReference::from_md5(HASH),
            account_dir: AccountDirectory::for_test(tmp.path()),
            source_container: source,
        }
    }

    #[tokio::test]
    async fn test_flags_original_next_to_thumbnail_once() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("msg").join("attach").join("x");
        fs::create_dir_all(&dir).unwrap();
        let thumb = dir.join(format!("{}_t.dat", HASH));
        fs::write(&thumb, b"t").unwrap();
        fs::write(dir.join(format!("{}_h.dat", HASH)), b"h").unwrap();

        let sink = Arc::new(BroadcastSink::new());
        let mut events = sink.subscribe();
        let flags = Arc::new(UpdateFlags::new());
        let watcher = watcher(sink.clone(), flags.clone());

        let check = check_for(&tmp, Some(thumb));
        assert!(watcher.check(&check).await);
        assert!(flags.is_set(HASH));
        // Second detection does not notify again
        assert!(watcher.check(&check).await);

        let event = events.recv().await.unwrap();
        assert_eq!(event.name(), "image:updateAvailable");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bare_original_is_not_an_upgrade() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("msg").join("attach").join("x");
        fs::create_dir_all(&dir).unwrap();
        let thumb = dir.join(format!("{}_t.dat", HASH));
        fs::write(&thumb, b"t").unwrap();
        fs::write(dir.join(format!("{}.dat", HASH)), b"plain").unwrap();

        let flags = Arc::new(UpdateFlags::new());
        let watcher = watcher(Arc::new(BroadcastSink::new()), flags.clone());
        assert!(!watcher.check(&check_for(&tmp, Some(thumb))).await);
        assert!(!flags.is_set(HASH));
    }

    #[tokio::test]
    async fn test_spawned_check_falls_back_to_search() {
        let tmp = TempDir::new().unwrap();
        let elsewhere = tmp.path().join("msg").join("attach").join("y").join("Img");
        fs::create_dir_all(&elsewhere).unwrap();
        fs::write(elsewhere.join(format!("{}.h.dat", HASH)), b"h").unwrap();

        let flags = Arc::new(UpdateFlags::new());
        let watcher = watcher(Arc::new(BroadcastSink::new()), flags.clone());

        let handle = watcher.spawn(check_for(&tmp, None)).unwrap();
        assert!(handle.await.unwrap());
        assert!(flags.is_set(HASH));

        // Already flagged keys are not re-checked
        assert!(watcher.spawn(check_for(&tmp, None)).is_none());
    }

    #[tokio::test]
    async fn test_cache_hit_locates_thumbnail_through_hardlink_index() {
        let tmp = TempDir::new().unwrap();
        // Outside msg/attach, so only the hardlink row leads here
        let dir = tmp.path().join("a").join("b");
        fs::create_dir_all(&dir).unwrap();
        let thumb_name = format!("{}_t.dat", HASH);
        fs::write(dir.join(&thumb_name), b"t").unwrap();
        fs::write(dir.join(format!("{}_h.dat", HASH)), b"h").unwrap();
        write_hardlink_db(tmp.path(), &[(HASH, "a", "b", &thumb_name)], &[]);

        let flags = Arc::new(UpdateFlags::new());
        let watcher = watcher(Arc::new(BroadcastSink::new()), flags.clone());
        assert!(watcher.check(&check_for(&tmp, None)).await);
        assert!(flags.is_set(HASH));
    }

    #[tokio::test]
    async fn test_cache_hit_locates_thumbnail_by_search() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("msg").join("attach").join("x");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}_t.dat", HASH)), b"t").unwrap();
        fs::write(dir.join(format!("{}.h.dat", HASH)), b"h").unwrap();

        let watcher = watcher(Arc::new(BroadcastSink::new()), Arc::new(UpdateFlags::new()));
        let check = check_for(&tmp, None);
        assert_eq!(
            watcher.locate_thumbnail(&check, HASH).await,
            Some(dir.join(format!("{}_t.dat", HASH)))
        );
        assert!(watcher.check(&check).await);
    }

    #[test]
    fn test_flag_lifecycle() {
        let flags = UpdateFlags::new();
        assert!(flags.set("k"));
        assert!(!flags.set("k"));
        flags.clear("k");
        assert!(!flags.is_set("k"));
    }
}
