//! Media playback sessions
//!
//! One `MediaSession` represents one track attempt: it owns the external
//! fetch/decode processes for that track (through the stream pipeline) and
//! ends in exactly one terminal state. Pause and skip arrive asynchronously
//! through the shared `SessionControl` flags; the pipeline polls them, so
//! control latency is bounded by one loop iteration plus process teardown.

use crate::audio::buffer::RingBuffer;
use crate::config::PipelineConfig;
use crate::engine::pipeline::{self, PipelineEnd};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// One queued track: an opaque media locator plus resolved metadata.
/// Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Opaque locator handed to the fetch stage
    pub locator: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub duration_secs: Option<u64>,

    #[serde(default)]
    pub uploader: Option<String>,
}

impl PlaybackRequest {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            locator: locator.into(),
            title: None,
            duration_secs: None,
            uploader: None,
        }
    }
}

/// Session lifecycle states
///
/// `Paused` is re-entrant with `Streaming` under the pause flag; `Skipped` is
/// reachable from any non-terminal state; terminal states return to `Idle`
/// before the controller dequeues again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// External processes spawned, no PCM delivered yet
    Fetching,
    Streaming,
    Paused,
    Completed,
    Skipped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

/// Pause/skip flags shared between the control surface and the pipeline.
///
/// Both operations are idempotent flag stores; the pipeline consumes the skip
/// flag with a swap so one skip ends exactly one session.
#[derive(Debug, Default)]
pub struct SessionControl {
    paused: AtomicBool,
    skip: AtomicBool,
}

impl SessionControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn request_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    /// Consume a pending skip request.
    pub fn take_skip(&self) -> bool {
        self.skip.swap(false, Ordering::SeqCst)
    }

    pub fn skip_pending(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }
}

/// One track attempt bound to the media buffer
pub struct MediaSession {
    request: PlaybackRequest,
    control: Arc<SessionControl>,
    state_tx: watch::Sender<SessionState>,
}

impl MediaSession {
    pub fn new(request: PlaybackRequest, control: Arc<SessionControl>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            request,
            control,
            state_tx,
        }
    }

    /// Observe state transitions (`Paused` is reported while the pause flag
    /// is set during streaming).
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn request(&self) -> &PlaybackRequest {
        &self.request
    }

    /// Run the track to its terminal state.
    ///
    /// Pipeline failures are absorbed here: the session ends `Failed` and the
    /// caller (the queue controller) moves on to the next request.
    pub async fn run(&self, buffer: &Arc<RingBuffer>, config: &PipelineConfig) -> SessionState {
        let _ = self.state_tx.send(SessionState::Fetching);

        let terminal = match pipeline::run_media(
            &self.request.locator,
            buffer,
            &self.control,
            config,
            &self.state_tx,
        )
        .await
        {
            Ok(PipelineEnd::Completed) => {
                info!(locator = %self.request.locator, "track completed");
                SessionState::Completed
            }
            Ok(PipelineEnd::Skipped) => {
                info!(locator = %self.request.locator, "track skipped");
                SessionState::Skipped
            }
            Err(e) => {
                warn!(locator = %self.request.locator, error = %e, "track failed");
                SessionState::Failed
            }
        };

        let _ = self.state_tx.send(terminal);
        terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_is_idempotent() {
        let control = SessionControl::new();

        control.pause();
        control.pause();
        assert!(control.is_paused());

        control.resume();
        assert!(!control.is_paused());
    }

    #[test]
    fn test_resume_when_not_paused_is_noop() {
        let control = SessionControl::new();
        control.resume();
        assert!(!control.is_paused());
    }

    #[test]
    fn test_skip_flag_consumed_once() {
        let control = SessionControl::new();
        assert!(!control.take_skip());

        control.request_skip();
        assert!(control.skip_pending());
        assert!(control.take_skip());
        assert!(!control.take_skip());
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Skipped.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
    }

    #[test]
    fn test_request_serde_roundtrip() {
        let request = PlaybackRequest {
            id: Uuid::new_v4(),
            locator: "https://example.com/watch?v=abc".into(),
            title: Some("A song".into()),
            duration_secs: Some(215),
            uploader: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        let back: PlaybackRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, request.id);
        assert_eq!(back.locator, request.locator);
        assert_eq!(back.title, request.title);
    }

    #[test]
    fn test_bare_locator_deserializes() {
        // Older queue files stored only the locator
        let back: PlaybackRequest =
            serde_json::from_str(r#"{"locator":"https://example.com/x"}"#).unwrap();
        assert_eq!(back.locator, "https://example.com/x");
        assert!(back.title.is_none());
    }
}
