//! On-disk persistence for the queue and device selection
//!
//! Two small JSON files, rewritten in full on every change. Persistence is
//! best-effort: a write failure is logged and playback continues, and an
//! unreadable or missing file on startup yields an empty state rather than
//! an error.

use crate::engine::session::PlaybackRequest;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize, Default)]
struct QueueFile {
    queue: Vec<PlaybackRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceFile {
    device_name: String,
}

/// Persists the pending track queue.
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted queue; missing or corrupt file yields empty.
    pub async fn load(&self) -> Vec<PlaybackRequest> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<QueueFile>(&bytes) {
                Ok(file) => {
                    debug!(path = %self.path.display(), len = file.queue.len(), "queue restored");
                    file.queue
                }
                Err(e) => {
                    warn!(path = %self.path.display(), "unreadable queue file, starting empty: {}", e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    /// Persist the queue; failure is logged, never fatal.
    pub async fn save(&self, queue: &[PlaybackRequest]) {
        let file = QueueFile {
            queue: queue.to_vec(),
        };
        let json = match serde_json::to_vec_pretty(&file) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize queue: {}", e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.path, json).await {
            warn!(path = %self.path.display(), "failed to persist queue: {}", e);
        }
    }
}

/// Persists the selected output device name across restarts.
pub struct DeviceStore {
    path: PathBuf,
}

impl DeviceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Option<String> {
        let bytes = tokio::fs::read(&self.path).await.ok()?;
        match serde_json::from_slice::<DeviceFile>(&bytes) {
            Ok(file) => Some(file.device_name),
            Err(e) => {
                warn!(path = %self.path.display(), "unreadable device file: {}", e);
                None
            }
        }
    }

    pub async fn save(&self, device_name: &str) {
        let file = DeviceFile {
            device_name: device_name.to_string(),
        };
        let json = match serde_json::to_vec_pretty(&file) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize device selection: {}", e);
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.path, json).await {
            warn!(path = %self.path.display(), "failed to persist device selection: {}", e);
        }
    }
}
