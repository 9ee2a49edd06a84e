/// Configuration consumed from the host application.
///
/// Loaded from TOML with environment variable overrides (highest priority).
/// Keys are looked up per decode through [`ConfigProvider`], so the host may
/// change them at runtime.

use crate::error::{ImageError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Directory under the cache root holding decoded images
pub const IMAGES_DIR: &str = "Images";

/// Application folder under the documents directory when no cache root is set
const DEFAULT_CACHE_FOLDER: &str = "DatImageCache";

/// Hard ceiling for the fallback search depth
pub const MAX_SEARCH_DEPTH: usize = 8;

/// Length of the derived AES key
pub const AES_KEY_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Root holding per-account storage folders
    pub account_root: Option<PathBuf>,
    /// Account id as configured by the user (may carry a suffix)
    pub account_id: Option<String>,
    /// Single-byte XOR key for image containers
    pub image_xor_key: Option<u8>,
    /// AES key string; its first 16 ASCII bytes are used
    pub image_aes_key: Option<String>,
    /// Output cache root; defaults to the user's documents folder
    pub cache_root: Option<PathBuf>,
    /// Give up on the fallback search after this many seconds
    pub search_timeout_secs: u64,
    /// Directory depth of the fallback search (capped at 8)
    pub search_max_depth: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            account_root: None,
            account_id: None,
            image_xor_key: None,
            image_aes_key: None,
            cache_root: None,
            search_timeout_secs: 15,
            search_max_depth: MAX_SEARCH_DEPTH,
        }
    }
}

impl ImageConfig {
    /// Parse a TOML document, then apply environment overrides
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: ImageConfig = toml::from_str(contents)
            .map_err(|e| ImageError::ConfigurationMissing(format!("invalid config: {}", e)))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading image config");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Apply `DATIMG_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("DATIMG_ACCOUNT_ROOT") {
            self.account_root = Some(PathBuf::from(root));
        }
        if let Ok(id) = std::env::var("DATIMG_ACCOUNT_ID") {
            self.account_id = Some(id);
        }
        if let Ok(key) = std::env::var("DATIMG_XOR_KEY") {
            if let Some(key) = parse_xor_key(&key) {
                self.image_xor_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("DATIMG_AES_KEY") {
            self.image_aes_key = Some(key);
        }
        if let Ok(root) = std::env::var("DATIMG_CACHE_ROOT") {
            self.cache_root = Some(PathBuf::from(root));
        }
    }

    /// Mandatory XOR key
    pub fn xor_key(&self) -> Result<u8> {
        self.image_xor_key
            .ok_or_else(|| ImageError::ConfigurationMissing("image XOR key is not set".into()))
    }

    /// AES key truncated to 16 ASCII bytes, if configured.
    ///
    /// Returns `Ok(None)` when unset; a set but unusable key is an error.
    pub fn aes_key_bytes(&self) -> Result<Option<[u8; AES_KEY_LEN]>> {
        let Some(raw) = self.image_aes_key.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        if !raw.is_ascii() || raw.len() < AES_KEY_LEN {
            return Err(ImageError::ConfigurationMissing(
                "image AES key must be at least 16 ASCII characters".into(),
            ));
        }
        let mut key = [0u8; AES_KEY_LEN];
        key.copy_from_slice(&raw.as_bytes()[..AES_KEY_LEN]);
        Ok(Some(key))
    }

    /// Account storage root and account id, both required for lookups
    pub fn account(&self) -> Result<(&Path, &str)> {
        let root = self
            .account_root
            .as_deref()
            .ok_or_else(|| ImageError::ConfigurationMissing("account root path is not set".into()))?;
        let id = self
            .account_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ImageError::ConfigurationMissing("account id is not set".into()))?;
        Ok((root, id))
    }

    /// Cache root, falling back to `<documents>/DatImageCache`
    pub fn cache_root(&self) -> PathBuf {
        if let Some(root) = &self.cache_root {
            return root.clone();
        }
        let mut path = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir);
        path.push(DEFAULT_CACHE_FOLDER);
        path
    }

    /// Directory holding decoded images: `<cache_root>/Images`
    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache_root().join(IMAGES_DIR)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs.max(1))
    }

    pub fn search_depth(&self) -> usize {
        self.search_max_depth.clamp(1, MAX_SEARCH_DEPTH)
    }
}

/// Parse `60`, `0x3c` or `3C`-style key strings
fn parse_xor_key(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return u8::from_str_radix(hex, 16).ok();
    }
    raw.parse::<u8>().ok().or_else(|| u8::from_str_radix(raw, 16).ok())
}

/// Source of the current configuration.
///
/// The host's settings store implements this; a plain [`ImageConfig`] is its
/// own provider for fixed setups and tests.
pub trait ConfigProvider: Send + Sync {
    fn snapshot(&self) -> ImageConfig;
}

impl ConfigProvider for ImageConfig {
    fn snapshot(&self) -> ImageConfig {
        self.clone()
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProvider for std::sync::RwLock<T> {
    fn snapshot(&self) -> ImageConfig {
        match self.read() {
            Ok(inner) => inner.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ImageConfig::default();
        assert_eq!(config.search_depth(), MAX_SEARCH_DEPTH);
        assert!(config.xor_key().is_err());
        assert_eq!(config.aes_key_bytes().unwrap(), None);
        assert!(config.image_cache_dir().ends_with("DatImageCache/Images"));
    }

    #[test]
    fn test_parse_toml() {
        let config = ImageConfig::from_toml_str(
            r#"
            account_root = "/data/chat"
            account_id = "wxid_abc123_9f2e"
            image_xor_key = 60
            image_aes_key = "0123456789abcdefEXTRA"
            cache_root = "/tmp/cache"
            search_max_depth = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.xor_key().unwrap(), 60);
        assert_eq!(&config.aes_key_bytes().unwrap().unwrap(), b"0123456789abcdef");
        assert_eq!(config.image_cache_dir(), PathBuf::from("/tmp/cache/Images"));
        assert_eq!(config.search_depth(), MAX_SEARCH_DEPTH);
        let (root, id) = config.account().unwrap();
        assert_eq!(root, Path::new("/data/chat"));
        assert_eq!(id, "wxid_abc123_9f2e");
    }

    #[test]
    fn test_short_aes_key_is_rejected() {
        let config = ImageConfig {
            image_aes_key: Some("short".into()),
            ..Default::default()
        };
        assert!(matches!(
            config.aes_key_bytes(),
            Err(ImageError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn test_missing_account_is_configuration_error() {
        let config = ImageConfig {
            account_root: Some(PathBuf::from("/data")),
            account_id: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(config.account(), Err(ImageError::ConfigurationMissing(_))));
    }

    #[test]
    fn test_parse_xor_key_forms() {
        assert_eq!(parse_xor_key("60"), Some(60));
        assert_eq!(parse_xor_key("0x3c"), Some(0x3C));
        assert_eq!(parse_xor_key("3C"), Some(0x3C));
        assert_eq!(parse_xor_key("zz"), None);
    }
}
