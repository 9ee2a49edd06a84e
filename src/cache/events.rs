/// Notifications pushed to the host UI.
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the broadcast channel per subscriber
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum ImageEvent {
    /// A reference now has a decoded file on disk
    #[serde(rename = "image:cacheResolved", rename_all = "camelCase")]
    CacheResolved {
        cache_key: String,
        image_md5: Option<String>,
        image_dat_name: Option<String>,
        local_path: PathBuf,
    },
    /// A better rendition exists for a thumbnail-backed cache entry
    #[serde(rename = "image:updateAvailable", rename_all = "camelCase")]
    UpdateAvailable {
        cache_key: String,
        image_md5: Option<String>,
        image_dat_name: Option<String>,
    },
}

impl ImageEvent {
    /// Channel name the UI listens on
    pub fn name(&self) -> &'static str {
        match self {
            ImageEvent::CacheResolved { .. } => "image:cacheResolved",
            ImageEvent::UpdateAvailable { .. } => "image:updateAvailable",
        }
    }

    pub fn cache_key(&self) -> &str {
        match self {
            ImageEvent::CacheResolved { cache_key, .. } => cache_key,
            ImageEvent::UpdateAvailable { cache_key, .. } => cache_key,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Receiver of image notifications (the host's window/IPC layer)
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ImageEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ImageEvent) {}
}

/// Fans events out to every subscribed UI surface
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ImageEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Register a new UI surface
    pub fn subscribe(&self) -> broadcast::Receiver<ImageEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: ImageEvent) {
        let name = event.name();
        // No subscribers is not an error
        if self.sender.send(event).is_err() {
            debug!(event = name, "no UI surface subscribed");
        }
    }
}
