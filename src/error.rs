/// Error types shared by every stage of image resolution.
///
/// Each variant carries a human-readable message. The enum is `Clone` so that
/// all callers waiting on one deduplicated decode receive the same outcome.

use std::sync::Arc;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ImageError>;

#[derive(Error, Debug, Clone)]
pub enum ImageError {
    /// A required setting (XOR key, AES key, account root...) is absent or invalid
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// No on-disk account directory validated for the configured account id
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// Neither the hardlink index nor the filesystem search located a container
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// The container needs a key the caller did not supply
    #[error("unsupported container version: {0}")]
    UnsupportedVersion(String),

    /// Short file, size overflow or bad segment length
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// The AES segment did not end in valid PKCS7 padding
    #[error("invalid padding: {0}")]
    PaddingInvalid(String),

    #[error("I/O failure: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for ImageError {
    fn from(err: std::io::Error) -> Self {
        ImageError::Io(Arc::new(err))
    }
}

impl ImageError {
    /// Whether the UI should offer a retry rather than treat the image as gone
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ImageError::MalformedContainer(_) | ImageError::PaddingInvalid(_)
        )
    }
}
