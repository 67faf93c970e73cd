//! Engine event system
//!
//! One-to-many event broadcasting over `tokio::sync::broadcast`. The external
//! command layer subscribes to turn engine activity into user-visible replies;
//! the engine itself never depends on a subscriber being present.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Outcome of one track attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Completed,
    Skipped,
    Failed,
}

/// Events emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A media session started streaming a track
    TrackStarted {
        request_id: Uuid,
        locator: String,
        title: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A media session ended (success, skip, or failure)
    TrackFinished {
        request_id: Uuid,
        outcome: TrackOutcome,
        timestamp: DateTime<Utc>,
    },

    /// The track queue changed (enqueue, remove, or dequeue)
    QueueChanged {
        len: usize,
        timestamp: DateTime<Utc>,
    },

    /// Playback paused by a control request
    PlaybackPaused { timestamp: DateTime<Utc> },

    /// Playback resumed by a control request
    PlaybackResumed { timestamp: DateTime<Utc> },

    /// Master volume changed (percent, 0-200)
    VolumeChanged {
        percent: u32,
        timestamp: DateTime<Utc>,
    },

    /// An announcement began decoding into the announcement buffer
    AnnouncementStarted { timestamp: DateTime<Utc> },

    /// An announcement finished decoding
    AnnouncementFinished { timestamp: DateTime<Utc> },

    /// The output device was changed
    DeviceChanged {
        name: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for engine events
///
/// Emission is lossy by design: with no subscribers the event is dropped, and
/// a slow subscriber misses events rather than blocking the engine.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. No subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        // Must not panic or error with nobody listening
        bus.emit(EngineEvent::PlaybackPaused {
            timestamp: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(EngineEvent::VolumeChanged {
            percent: 150,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            EngineEvent::VolumeChanged { percent, .. } => assert_eq!(percent, 150),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
