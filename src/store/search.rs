/// Bounded filesystem fallback for locating containers.
///
/// When the hardlink index has no row for an image, the account's attachment
/// tree is walked (depth-limited) and candidate files are scored by name.
/// The walk runs on the blocking pool so the caller's task never stalls on
/// large trees, and is raced against a timeout.

use crate::account::AccountDirectory;
use crate::naming::{match_name, normalize_base, ContainerName, NameMatch};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Score penalty applied to thumbnail renditions
const THUMBNAIL_PENALTY: i32 = 30;

/// Which renditions a search may return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchOptions {
    pub allow_thumbnail: bool,
    pub thumb_only: bool,
}

impl SearchOptions {
    /// Originals and thumbnails, originals preferred
    pub const ANY: SearchOptions = SearchOptions {
        allow_thumbnail: true,
        thumb_only: false,
    };
    /// Originals only
    pub const ORIGINAL_ONLY: SearchOptions = SearchOptions {
        allow_thumbnail: false,
        thumb_only: false,
    };
    /// Thumbnails only
    pub const THUMB_ONLY: SearchOptions = SearchOptions {
        allow_thumbnail: true,
        thumb_only: true,
    };
}

/// A container file that survived name filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub path: PathBuf,
    pub name: ContainerName,
    pub matched: NameMatch,
    pub score: i32,
}

/// Score one file name against the normalized target, applying the option filters
pub fn score_candidate(
    path: &Path,
    normalized_target: &str,
    options: SearchOptions,
) -> Option<ScoredCandidate> {
    let file_name = path.file_name()?.to_str()?;
    let name = ContainerName::parse(file_name)?;
    let matched = match_name(&name.stem, normalized_target)?;

    if name.is_thumbnail && !options.allow_thumbnail {
        return None;
    }
    if !name.is_thumbnail && options.thumb_only {
        return None;
    }

    let mut score = matched.score();
    if name.is_thumbnail {
        score -= THUMBNAIL_PENALTY;
    }

    Some(ScoredCandidate {
        path: path.to_path_buf(),
        name,
        matched,
        score,
    })
}

/// Pick the best candidate.
///
/// Substring matches only count when nothing stricter matched. Then prefer
/// variant-suffixed names, then originals (unless thumbnails were asked
/// for), then the highest score. Ties fall to traversal order.
pub fn pick_best(candidates: Vec<ScoredCandidate>, options: SearchOptions) -> Option<ScoredCandidate> {
    let strongest = candidates.iter().map(|c| c.matched).max()?;
    let floor = if strongest > NameMatch::Substring {
        NameMatch::Pattern
    } else {
        NameMatch::Substring
    };

    candidates
        .into_iter()
        .filter(|c| c.matched >= floor)
        .max_by_key(|c| {
            let prefers_original = !options.thumb_only && !c.name.is_thumbnail;
            (c.name.variant.is_some(), prefers_original, c.score)
        })
}

/// Walk `root` to `max_depth` and return the best match for `name`.
/// Blocking; call through [`ContainerSearch::search`] from async code.
pub fn search_blocking(
    root: &Path,
    name: &str,
    options: SearchOptions,
    max_depth: usize,
) -> Option<ScoredCandidate> {
    let target = normalize_base(name);
    if target.is_empty() || !root.is_dir() {
        return None;
    }

    let candidates: Vec<ScoredCandidate> = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| score_candidate(e.path(), &target, options))
        .collect();

    debug!(
        root = %root.display(),
        name,
        candidates = candidates.len(),
        "container search finished walking"
    );

    pick_best(candidates, options)
}

type SearchKey = (PathBuf, String, SearchOptions);

/// Async front end of the fallback search with a per-account result cache.
///
/// Cached paths are revalidated for existence before reuse.
#[derive(Debug)]
pub struct ContainerSearch {
    results: Mutex<HashMap<SearchKey, PathBuf>>,
    max_depth: usize,
    timeout: Duration,
}

impl ContainerSearch {
    pub fn new(max_depth: usize, timeout: Duration) -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            max_depth,
            timeout,
        }
    }

    /// Locate a container named like `name` under the account's attachment root.
    pub async fn search(
        &self,
        account_dir: &AccountDirectory,
        name: &str,
        options: SearchOptions,
    ) -> Option<PathBuf> {
        let key: SearchKey = (account_dir.path().to_path_buf(), name.to_string(), options);

        if let Some(cached) = self.cached(&key) {
            return Some(cached);
        }

        let root = account_dir.attach_root();
        let owned_name = name.to_string();
        let max_depth = self.max_depth;
        let walk = tokio::task::spawn_blocking(move || {
            search_blocking(&root, &owned_name, options, max_depth)
        });

        let found = match tokio::time::timeout(self.timeout, walk).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(name, error = %e, "container search worker failed");
                None
            }
            Err(_) => {
                warn!(name, timeout = ?self.timeout, "container search timed out");
                None
            }
        }?;

        self.lock().insert(key, found.path.clone());
        Some(found.path)
    }

    fn cached(&self, key: &SearchKey) -> Option<PathBuf> {
        let mut results = self.lock();
        match results.get(key) {
            Some(path) if path.is_file() => Some(path.clone()),
            Some(_) => {
                results.remove(key);
                None
            }
            None => None,
        }
    }

    /// Drop every cached result
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SearchKey, PathBuf>> {
        match self.results.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
