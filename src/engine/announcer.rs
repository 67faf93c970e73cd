//! Announcement injection
//!
//! Decodes pre-fetched encoded audio (TTS output, chimes) into the
//! announcement ring buffer, where the mixer overlays it on the media path
//! and ducks the media while it plays. Announcements are serialized: a mutex
//! gate admits one decode at a time, so overlapping requests queue up FIFO
//! instead of interleaving their PCM.

use crate::audio::buffer::RingBuffer;
use crate::config::Config;
use crate::engine::pipeline;
use crate::error::Result;
use crate::events::EngineEvent;
use crate::state::SharedState;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct AnnouncementInjector {
    state: Arc<SharedState>,
    config: Arc<Config>,
    gate: Mutex<()>,
}

impl AnnouncementInjector {
    pub fn new(state: Arc<SharedState>, config: Arc<Config>) -> Self {
        Self {
            state,
            config,
            gate: Mutex::new(()),
        }
    }

    /// Decode one announcement into the announcement buffer. Returns once
    /// decode finishes; the tail may still be draining through the mixer.
    /// Concurrent calls wait their turn.
    pub async fn play(&self, encoded: Vec<u8>) -> Result<()> {
        let _turn = self.gate.lock().await;

        debug!(bytes = encoded.len(), "decoding announcement");
        self.state.events.emit(EngineEvent::AnnouncementStarted {
            timestamp: Utc::now(),
        });

        let pipeline_config = self.config.pipeline(self.state.sample_rate());
        let result = pipeline::run_decode_only(encoded, &self.announce_buffer(), &pipeline_config).await;

        if let Err(e) = &result {
            warn!("announcement decode failed: {}", e);
        }
        self.state.events.emit(EngineEvent::AnnouncementFinished {
            timestamp: Utc::now(),
        });
        result
    }

    fn announce_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.state.announce)
    }
}
