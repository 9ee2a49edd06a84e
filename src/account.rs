/// Per-account storage directory resolution.
///
/// The configured account id may carry a short suffix that the on-disk folder
/// does not (or the other way round), so the id is normalized and several
/// candidate folders are tried. A folder is accepted only when it holds at
/// least one marker entry.

use crate::error::{ImageError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Account ids starting with this prefix are truncated to `wxid_<segment>`
const KNOWN_ID_PREFIX: &str = "wxid_";

/// Longest trailing `_xxxx` segment treated as a suffix. Client folders carry
/// a four character tag; shorter tails are accepted for hand-renamed folders.
const MAX_SUFFIX_LEN: usize = 4;

/// Entries whose presence marks a folder as account storage
pub const ACCOUNT_MARKERS: [&str; 5] = [
    "hardlink.db",
    "db_storage/hardlink/hardlink.db",
    "msg/attach",
    "msg/video",
    "msg/file",
];

/// Validated storage root for one account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountDirectory {
    root: PathBuf,
}

impl AccountDirectory {
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Root of the fallback container search
    pub fn attach_root(&self) -> PathBuf {
        self.root.join("msg").join("attach")
    }

    /// Location of the hardlink index, if one exists
    pub fn hardlink_db(&self) -> Option<PathBuf> {
        ACCOUNT_MARKERS[..2]
            .iter()
            .map(|rel| self.root.join(rel))
            .find(|p| p.is_file())
    }

    #[cfg(test)]
    pub(crate) fn for_test(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }
}

/// Canonical form of a configured account id.
///
/// `wxid_abc123_9f2e` -> `wxid_abc123`, `alice_1a2b` -> `alice`.
pub fn clean_account_id(account_id: &str) -> String {
    let id = account_id.trim();

    let prefix_len = KNOWN_ID_PREFIX.len();
    if let Some(prefix) = id.get(..prefix_len).filter(|p| p.eq_ignore_ascii_case(KNOWN_ID_PREFIX)) {
        let rest = &id[prefix_len..];
        let segment = rest.split('_').next().unwrap_or(rest);
        return format!("{}{}", prefix, segment);
    }

    match id.rsplit_once('_') {
        Some((head, tail))
            if !head.is_empty()
                && (1..=MAX_SUFFIX_LEN).contains(&tail.len())
                && tail.bytes().all(|b| b.is_ascii_alphanumeric()) =>
        {
            head.to_string()
        }
        _ => id.to_string(),
    }
}

/// Whether `dir` carries at least one account marker entry
pub fn has_account_markers(dir: &Path) -> bool {
    dir.is_dir() && ACCOUNT_MARKERS.iter().any(|rel| dir.join(rel).exists())
}

/// Locate the storage root for `account_id` under `root_path`.
pub fn resolve_account_dir(root_path: &Path, account_id: &str) -> Result<AccountDirectory> {
    let cleaned = clean_account_id(account_id);
    if cleaned.is_empty() {
        return Err(ImageError::AccountNotFound("account id is empty".into()));
    }

    let direct = root_path.join(&cleaned);
    if has_account_markers(&direct) {
        debug!(path = %direct.display(), "account directory resolved directly");
        return Ok(AccountDirectory { root: direct });
    }

    if has_account_markers(root_path) {
        debug!(path = %root_path.display(), "root path is itself the account directory");
        return Ok(AccountDirectory {
            root: root_path.to_path_buf(),
        });
    }

    let wanted = cleaned.to_lowercase();
    let prefix = format!("{}_", wanted);
    if let Ok(entries) = fs::read_dir(root_path) {
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .is_some_and(|name| name == wanted || name.starts_with(&prefix))
            })
            .collect();
        // read_dir order is platform dependent
        candidates.sort();

        if let Some(found) = candidates.into_iter().find(|p| has_account_markers(p)) {
            debug!(path = %found.display(), "account directory resolved by prefix scan");
            return Ok(AccountDirectory { root: found });
        }
    }

    Err(ImageError::AccountNotFound(format!(
        "no storage folder for account {} under {}",
        cleaned,
        root_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_account(dir: &Path) {
        fs::create_dir_all(dir.join("msg").join("attach")).unwrap();
    }

    #[test]
    fn test_clean_account_id() {
        assert_eq!(clean_account_id("wxid_abc123_9f2e"), "wxid_abc123");
        assert_eq!(clean_account_id("wxid_abc123"), "wxid_abc123");
        assert_eq!(clean_account_id("alice_1a2b"), "alice");
        assert_eq!(clean_account_id("alice_longsuffix"), "alice_longsuffix");
        assert_eq!(clean_account_id("alice"), "alice");
    }

    #[test]
    fn test_known_prefix_matches_any_case() {
        assert_eq!(clean_account_id("WXID_Abc123_extra99"), "WXID_Abc123");
        assert_eq!(clean_account_id("Wxid_abc123_long_tail"), "Wxid_abc123");
    }

    #[test]
    fn test_resolves_direct_folder() {
        let tmp = TempDir::new().unwrap();
        make_account(&tmp.path().join("wxid_abc123"));

        let dir = resolve_account_dir(tmp.path(), "wxid_abc123_9f2e").unwrap();
        assert_eq!(dir.path(), tmp.path().join("wxid_abc123"));
    }

    #[test]
    fn test_root_itself_can_be_the_account() {
        let tmp = TempDir::new().unwrap();
        make_account(tmp.path());

        let dir = resolve_account_dir(tmp.path(), "someone").unwrap();
        assert_eq!(dir.path(), tmp.path());
    }

    #[test]
    fn test_prefix_scan_is_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("WXID_ABC123_unrelated")).unwrap();
        make_account(&tmp.path().join("WXID_ABC123_c0de"));

        let dir = resolve_account_dir(tmp.path(), "wxid_abc123").unwrap();
        assert_eq!(dir.path(), tmp.path().join("WXID_ABC123_c0de"));
    }

    #[test]
    fn test_unmarked_folders_are_not_accounts() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("wxid_abc123").join("random")).unwrap();

        let err = resolve_account_dir(tmp.path(), "wxid_abc123").unwrap_err();
        assert!(matches!(err, ImageError::AccountNotFound(_)));
    }

    #[test]
    fn test_hardlink_db_marker() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("db_storage").join("hardlink");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("hardlink.db"), b"").unwrap();

        let dir = AccountDirectory::for_test(tmp.path());
        assert!(has_account_markers(tmp.path()));
        assert_eq!(dir.hardlink_db(), Some(nested.join("hardlink.db")));
    }
}
