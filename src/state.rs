//! Shared engine state
//!
//! Process-wide state constructed once at startup and passed by `Arc` to the
//! mixer, the producers and the control surface. Never ambient globals: the
//! ring buffers, the volume and the current-track slot all live here.

use crate::audio::buffer::RingBuffer;
use crate::engine::session::PlaybackRequest;
use crate::events::EventBus;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Master volume multiplier stored as f32 bits in an atomic.
///
/// Read by the audio callback every invocation and written by the control
/// surface at any time, so the read must be lock-free.
#[derive(Debug, Clone)]
pub struct Volume(Arc<AtomicU32>);

impl Volume {
    /// Maximum multiplier (200%)
    pub const MAX: f32 = 2.0;

    pub fn new(initial: f32) -> Self {
        Self(Arc::new(AtomicU32::new(
            initial.clamp(0.0, Self::MAX).to_bits(),
        )))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Set the multiplier, clamped to [0.0, 2.0].
    pub fn set(&self, value: f32) {
        self.0
            .store(value.clamp(0.0, Self::MAX).to_bits(), Ordering::Relaxed);
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// State shared between the mixer, producers and control surface
pub struct SharedState {
    /// Media ring buffer (written by the active media session)
    pub media: Arc<RingBuffer>,

    /// Announcement ring buffer (written by the announcement injector)
    pub announce: Arc<RingBuffer>,

    /// Master volume multiplier (media path only)
    pub volume: Volume,

    /// Sample rate the output device actually negotiated; published by the
    /// output thread before the engine starts streaming
    pub sample_rate: AtomicU32,

    /// Currently playing track (None between tracks)
    pub current_track: RwLock<Option<PlaybackRequest>>,

    /// Event broadcaster
    pub events: EventBus,
}

impl SharedState {
    pub fn new(media: Arc<RingBuffer>, announce: Arc<RingBuffer>, sample_rate: u32) -> Self {
        Self {
            media,
            announce,
            volume: Volume::default(),
            sample_rate: AtomicU32::new(sample_rate),
            current_track: RwLock::new(None),
            events: EventBus::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_sample_rate(&self, rate: u32) {
        self.sample_rate.store(rate, Ordering::Relaxed);
    }

    pub async fn current_track(&self) -> Option<PlaybackRequest> {
        self.current_track.read().await.clone()
    }

    pub async fn set_current_track(&self, track: Option<PlaybackRequest>) {
        *self.current_track.write().await = track;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_default() {
        let volume = Volume::default();
        assert_eq!(volume.get(), 1.0);
    }

    #[test]
    fn test_volume_set_get() {
        let volume = Volume::default();

        volume.set(1.5);
        assert_eq!(volume.get(), 1.5);

        volume.set(0.0);
        assert_eq!(volume.get(), 0.0);
    }

    #[test]
    fn test_volume_clamped() {
        let volume = Volume::default();

        volume.set(5.0);
        assert_eq!(volume.get(), 2.0);

        volume.set(-1.0);
        assert_eq!(volume.get(), 0.0);
    }

    #[test]
    fn test_volume_shared_across_clones() {
        let volume = Volume::default();
        let handle = volume.clone();

        handle.set(0.5);
        assert_eq!(volume.get(), 0.5);
    }
}
