/// Shared data structures for requests and results.
///
/// These structs flow between the host UI layer and the output cache.

use crate::codec::sniff::mime_for_extension;
use crate::error::{ImageError, Result};
use crate::naming::normalize_base;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifies one logical chat image
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    /// Conversation the image belongs to, used for directory aliases
    pub session_id: Option<String>,
    /// Content hash of the image
    pub image_md5: Option<String>,
    /// Stored container file name (e.g. "3f2a..._t.dat")
    pub image_dat_name: Option<String>,
}

impl ImageReference {
    pub fn from_md5(md5: impl Into<String>) -> Self {
        Self {
            image_md5: Some(md5.into()),
            ..Default::default()
        }
    }

    pub fn from_dat_name(name: impl Into<String>) -> Self {
        Self {
            image_dat_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn md5(&self) -> Option<&str> {
        non_empty(self.image_md5.as_deref())
    }

    pub fn dat_name(&self) -> Option<&str> {
        non_empty(self.image_dat_name.as_deref())
    }

    pub fn session(&self) -> Option<&str> {
        non_empty(self.session_id.as_deref())
    }

    /// Every cache key aliasing this image, most specific first:
    /// raw md5, raw file name, their lowercase forms, then normalized bases.
    /// The first key is the primary key used for deduplication and flags.
    pub fn cache_keys(&self) -> Result<Vec<String>> {
        let raw: Vec<&str> = [self.md5(), self.dat_name()].into_iter().flatten().collect();
        if raw.is_empty() {
            return Err(ImageError::ContainerNotFound(
                "image reference has neither md5 nor file name".into(),
            ));
        }

        let mut keys: Vec<String> = Vec::with_capacity(raw.len() * 3);
        let candidates = raw
            .iter()
            .map(|k| k.to_string())
            .chain(raw.iter().map(|k| k.to_lowercase()))
            .chain(raw.iter().map(|k| normalize_base(k)));
        for key in candidates {
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Names to try in the fallback search, one per distinct normalized base
    pub fn search_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for name in [self.dat_name(), self.md5()].into_iter().flatten() {
            let normalized = normalize_base(name);
            if !normalized.is_empty() && !seen.contains(&normalized) {
                seen.push(normalized);
                names.push(name.to_string());
            }
        }
        names
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A decoded image available on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedImage {
    /// Primary cache key of the request that produced it
    pub cache_key: String,
    pub local_path: PathBuf,
    /// Extension without dot
    pub extension: String,
    /// Whether the image was decoded from a thumbnail rendition
    pub is_thumbnail: bool,
    /// Served from the output cache without decoding
    pub from_cache: bool,
}

impl DecryptedImage {
    /// Embeddable `data:` URL of the image
    pub async fn data_url(&self) -> Result<String> {
        let bytes = tokio::fs::read(&self.local_path).await?;
        Ok(format!(
            "data:{};base64,{}",
            mime_for_extension(&self.extension),
            general_purpose::STANDARD.encode(bytes)
        ))
    }

    /// `file://` URL with a modification-time token so UIs refetch updated files
    pub fn file_url(&self) -> Result<String> {
        let modified = std::fs::metadata(&self.local_path)?.modified()?;
        let token = DateTime::<Utc>::from(modified).timestamp_millis();

        let path = self.local_path.to_string_lossy().replace('\\', "/");
        let prefix = if path.starts_with('/') { "file://" } else { "file:///" };
        Ok(format!("{}{}?v={}", prefix, path, token))
    }
}
