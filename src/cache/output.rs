use super::events::{EventSink, ImageEvent};
use super::index::CacheIndex;
use super::pending::PendingTasks;
use super::reference::{DecryptedImage, ImageReference};
use super::watcher::{UpdateFlags, UpdateWatcher, UpgradeCheck};
use crate::account::{resolve_account_dir, AccountDirectory};
use crate::codec::{decrypt_container, detect_version};
use crate::config::ConfigProvider;
use crate::error::{ImageError, Result};
use crate::naming::{
    has_container_extension, is_image_extension, is_thumbnail_name, normalize_base,
    strip_container_extension,
};
use crate::store::hardlink::HardlinkPool;
use crate::store::search::{ContainerSearch, SearchOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The ImageCache is the process-wide context for image resolution.
///
/// It owns every piece of shared state: memoized hardlink handles, the
/// search result cache, the output path index, the in-flight decode table
/// and the update flags. Hosts create one and share it behind an `Arc`.
///
/// The cache directory is fixed when the cache is created; keys are read from
/// the config provider on every decode.
pub struct ImageCache {
    config: Arc<dyn ConfigProvider>,
    sink: Arc<dyn EventSink>,
    hardlinks: Arc<HardlinkPool>,
    search: Arc<ContainerSearch>,
    index: CacheIndex,
    pending: PendingTasks<Result<DecryptedImage>>,
    flags: Arc<UpdateFlags>,
    watcher: UpdateWatcher,
    decode_calls: AtomicUsize,
}

impl ImageCache {
    pub fn new(config: Arc<dyn ConfigProvider>, sink: Arc<dyn EventSink>) -> Self {
        let snapshot = config.snapshot();
        let search = Arc::new(ContainerSearch::new(
            snapshot.search_depth(),
            snapshot.search_timeout(),
        ));
        let hardlinks = Arc::new(HardlinkPool::new());
        let flags = Arc::new(UpdateFlags::new());
        let watcher = UpdateWatcher::new(
            search.clone(),
            hardlinks.clone(),
            flags.clone(),
            sink.clone(),
            snapshot.search_timeout(),
        );

        info!(dir = %snapshot.image_cache_dir().display(), "image cache created");

        Self {
            config,
            sink,
            hardlinks,
            search,
            index: CacheIndex::new(snapshot.image_cache_dir()),
            pending: PendingTasks::new(),
            flags,
            watcher,
            decode_calls: AtomicUsize::new(0),
        }
    }

    /// Directory decoded images are written to
    pub fn cache_dir(&self) -> &Path {
        self.index.dir()
    }

    /// Look up an already decoded image without decoding anything.
    ///
    /// Every alias key is probed; stale entries are evicted on the way.
    pub async fn resolve(&self, reference: &ImageReference) -> Result<DecryptedImage> {
        let keys = reference.cache_keys()?;
        self.index.ensure_loaded().await;

        let Some(entry) = keys.iter().find_map(|k| self.index.get(k)) else {
            return Err(ImageError::ContainerNotFound(format!(
                "no cached image for {}",
                keys[0]
            )));
        };

        debug!(key = %keys[0], path = %entry.path.display(), "image cache hit");
        let image = DecryptedImage {
            cache_key: keys[0].clone(),
            extension: extension_of(&entry.path),
            local_path: entry.path,
            is_thumbnail: entry.is_thumbnail,
            from_cache: true,
        };

        if image.is_thumbnail {
            self.watch_for_upgrade(&keys[0], reference, None);
        }
        Ok(image)
    }

    /// Resolve a batch of references against the cache only
    pub async fn resolve_many(
        &self,
        references: &[ImageReference],
    ) -> Vec<(ImageReference, Option<DecryptedImage>)> {
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            let hit = self.resolve(reference).await.ok();
            resolved.push((reference.clone(), hit));
        }
        resolved
    }

    /// Produce a decoded image for `reference`, decoding its container if needed.
    ///
    /// Concurrent calls for the same image share one decode. With `force`,
    /// the cache is bypassed and an original rendition is preferred.
    pub async fn decrypt(&self, reference: &ImageReference, force: bool) -> Result<DecryptedImage> {
        let keys = reference.cache_keys()?;

        if !force {
            if let Ok(hit) = self.resolve(reference).await {
                return Ok(hit);
            }
        }

        let keys = &keys;
        self.pending
            .run(&keys[0], || async move {
                // A decode for this key may have settled since the first probe
                if !force {
                    if let Ok(hit) = self.resolve(reference).await {
                        return Ok(hit);
                    }
                }
                self.decrypt_uncached(reference, keys, force).await
            })
            .await
    }

    async fn decrypt_uncached(
        &self,
        reference: &ImageReference,
        keys: &[String],
        force: bool,
    ) -> Result<DecryptedImage> {
        let config = self.config.snapshot();
        let (root, account_id) = config.account()?;
        let account_dir = resolve_account_dir(root, account_id)?;

        let mut container = self.locate(&account_dir, reference, !force).await;
        if container.is_none() && force {
            debug!(key = %keys[0], "no original found, retrying with thumbnails");
            container = self.locate(&account_dir, reference, true).await;
        }
        let container = container.ok_or_else(|| {
            ImageError::ContainerNotFound(format!("no container found for {}", keys[0]))
        })?;

        let file_name = container
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let stem = strip_container_extension(&file_name).to_string();

        // Some stores already hold plain images; index them as they are
        if !has_container_extension(&file_name) {
            let extension = extension_of(&container);
            if is_image_extension(&extension) {
                let stem = file_stem_of(&container);
                let is_thumbnail = is_thumbnail_name(&stem);
                return Ok(self.publish(
                    reference,
                    keys,
                    &stem,
                    container,
                    extension,
                    is_thumbnail,
                    &account_dir,
                ));
            }
        }

        let is_thumbnail = is_thumbnail_name(&stem);
        let data = tokio::fs::read(&container).await?;

        let version = detect_version(&data);
        let xor_key = config.xor_key()?;
        let aes_key = if version.needs_aes_key() {
            let key = config.aes_key_bytes()?.ok_or_else(|| {
                ImageError::ConfigurationMissing("image AES key is not set".into())
            })?;
            Some(key)
        } else {
            None
        };

        self.decode_calls.fetch_add(1, Ordering::SeqCst);
        debug!(path = %container.display(), ?version, "decoding container");
        let artifact =
            tokio::task::spawn_blocking(move || decrypt_container(&data, xor_key, aes_key.as_ref()))
                .await
                .map_err(|e| {
                    ImageError::from(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                })??;

        let output = self
            .index
            .dir()
            .join(format!("{}.{}", stem, artifact.extension));
        write_atomically(&output, &artifact.data).await?;
        info!(
            source = %container.display(),
            output = %output.display(),
            thumbnail = is_thumbnail,
            "image decoded into cache"
        );

        let mut image = self.publish(
            reference,
            keys,
            &stem,
            output,
            artifact.extension.to_string(),
            is_thumbnail,
            &account_dir,
        );
        if is_thumbnail {
            self.watch_for_upgrade(&keys[0], reference, Some(container));
        }
        image.from_cache = false;
        Ok(image)
    }

    /// Index the output under every alias, clear stale flags and notify the UI
    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        reference: &ImageReference,
        keys: &[String],
        stem: &str,
        path: PathBuf,
        extension: String,
        is_thumbnail: bool,
        account_dir: &AccountDirectory,
    ) -> DecryptedImage {
        let mut aliases: Vec<String> = keys.to_vec();
        for alias in [stem.to_string(), stem.to_lowercase(), normalize_base(stem)] {
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        self.index.record(aliases.iter().cloned(), &path, is_thumbnail);

        if !is_thumbnail {
            for alias in &aliases {
                self.flags.clear(alias);
            }
        }

        debug!(key = %keys[0], account = %account_dir.path().display(), "cache entry published");
        self.sink.emit(ImageEvent::CacheResolved {
            cache_key: keys[0].clone(),
            image_md5: reference.md5().map(str::to_string),
            image_dat_name: reference.dat_name().map(str::to_string),
            local_path: path.clone(),
        });

        DecryptedImage {
            cache_key: keys[0].clone(),
            local_path: path,
            extension,
            is_thumbnail,
            from_cache: false,
        }
    }

    /// Find a container: hardlink index by hash first, then the bounded search
    async fn locate(
        &self,
        account_dir: &AccountDirectory,
        reference: &ImageReference,
        allow_thumbnail: bool,
    ) -> Option<PathBuf> {
        if let Some(md5) = reference.md5() {
            if let Some(path) = self
                .hardlinks
                .lookup(account_dir, md5, reference.session())
                .await
            {
                if allow_thumbnail || !is_thumbnail_name(&file_stem_of(&path)) {
                    debug!(md5, path = %path.display(), "container found via hardlink index");
                    return Some(path);
                }
                debug!(md5, "hardlink hit is a thumbnail, searching for an original");
            }
        }

        let options = if allow_thumbnail {
            SearchOptions::ANY
        } else {
            SearchOptions::ORIGINAL_ONLY
        };
        for name in reference.search_names() {
            if let Some(path) = self.search.search(account_dir, &name, options).await {
                debug!(name = %name, path = %path.display(), "container found via search");
                return Some(path);
            }
        }
        None
    }

    fn watch_for_upgrade(&self, key: &str, reference: &ImageReference, source: Option<PathBuf>) {
        let config = self.config.snapshot();
        let account_dir = match config
            .account()
            .and_then(|(root, id)| resolve_account_dir(root, id))
        {
            Ok(dir) => dir,
            Err(e) => {
                debug!(key, error = %e, "skipping upgrade check");
                return;
            }
        };

        self.watcher.spawn(UpgradeCheck {
            cache_key: key.to_string(),
            reference: reference.clone(),
            account_dir,
            source_container: source,
        });
    }

    /// Whether a better rendition was found for this image's cached thumbnail
    pub fn has_update(&self, reference: &ImageReference) -> bool {
        reference
            .cache_keys()
            .map(|keys| keys.iter().any(|k| self.flags.is_set(k)))
            .unwrap_or(false)
    }

    /// Number of container decodes performed so far
    pub fn decode_invocations(&self) -> usize {
        self.decode_calls.load(Ordering::SeqCst)
    }

    /// Number of decodes currently in flight
    pub fn in_flight(&self) -> usize {
        self.pending.in_flight()
    }

    /// Release hardlink handles and forget cached search results
    pub fn shutdown(&self) {
        self.hardlinks.shutdown();
        self.search.clear();
        info!("image cache shut down");
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("cache_dir", &self.index.dir())
            .field("decode_calls", &self.decode_invocations())
            .finish()
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn file_stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Write through a `.part` file so readers never see partial images
async fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    if let Err(e) = tokio::fs::write(&part, data).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&part, path).await {
        warn!(path = %path.display(), error = %e, "cannot move decoded image into place");
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e.into());
    }
    Ok(())
}
