//! Decrypting and caching encrypted chat image containers.
//!
//! A chat client stores received images as `.dat` containers, either XORed
//! with one key byte or in a hybrid AES-128-ECB + XOR layout. This crate finds
//! the container for an image reference (hardlink database first, bounded
//! filesystem search second), decodes it into a per-user cache directory and
//! keeps track of thumbnails that could be replaced by a better rendition.
//!
//! ```no_run
//! use dat_image_cache::{ImageCache, ImageConfig, ImageReference, NullSink};
//! use std::sync::Arc;
//!
//! # async fn run() -> dat_image_cache::Result<()> {
//! let config = ImageConfig::load("image.toml".as_ref())?;
//! let cache = ImageCache::new(Arc::new(config), Arc::new(NullSink));
//! let image = cache.decrypt(&ImageReference::from_md5("3f2a9c0d1e"), false).await?;
//! println!("{}", image.file_url()?);
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod naming;
pub mod store;

pub use cache::{
    BroadcastSink, DecryptedImage, EventSink, ImageCache, ImageEvent, ImageReference, NullSink,
};
pub use config::{ConfigProvider, ImageConfig};
pub use error::{ImageError, Result};
pub use logging::{init_logging, LogLevel};
