/// Locating containers inside an account's storage tree
///
/// - SQLite hardlink index lookups by content hash (hardlink.rs)
/// - Bounded, scored filesystem search as the fallback (search.rs)

pub mod hardlink;
pub mod search;

pub use hardlink::{HardlinkIndex, HardlinkPool};
pub use search::{ContainerSearch, SearchOptions};
