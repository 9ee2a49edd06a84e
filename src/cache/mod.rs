/// Output cache and request orchestration
///
/// This module turns image references into decoded files on disk:
/// - Request/result types and cache key derivation (reference.rs)
/// - Key to output file index with lazy startup scan (index.rs)
/// - Per-key in-flight deduplication (pending.rs)
/// - UI notifications (events.rs)
/// - Background detection of better renditions (watcher.rs)
/// - The ImageCache context tying it together (output.rs)

pub mod events;
pub mod index;
pub mod output;
pub mod pending;
pub mod reference;
pub mod watcher;

pub use events::{BroadcastSink, EventSink, ImageEvent, NullSink};
pub use output::ImageCache;
pub use reference::{DecryptedImage, ImageReference};
pub use watcher::{UpdateFlags, UpdateWatcher};
