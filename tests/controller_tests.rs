//! Queue controller tests with stub processes and a simulated output drain.
//!
//! There is no audio device here; a background task reads the media buffer
//! the way the mixer callback would, so completed tracks can drain their
//! buffered tail and the controller can move on.

use std::sync::Arc;
use tannoy::audio::buffer::RingBuffer;
use tannoy::config::{Config, FRAME_BYTES};
use tannoy::engine::controller::{QueueController, TrackQueue};
use tannoy::engine::session::{PlaybackRequest, SessionControl};
use tannoy::events::{EngineEvent, TrackOutcome};
use tannoy::state::SharedState;
use tannoy::store::QueueStore;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

struct Harness {
    state: Arc<SharedState>,
    queue: Arc<TrackQueue>,
    control: Arc<SessionControl>,
    shutdown: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

fn stub_config(fetch_script: &str) -> Config {
    let mut config = Config::default();
    config.fetch.program = "/bin/sh".into();
    config.fetch.args = vec!["-c".into(), fetch_script.into()];
    config.decode.program = "/bin/cat".into();
    config.decode.args = Some(Vec::new());
    config
}

/// Spawn a controller over stub processes plus a drain task standing in for
/// the audio callback.
fn start_controller(fetch_script: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = stub_config(fetch_script);
    config.storage.queue_file = dir.path().join("playlist.json");

    let media = Arc::new(RingBuffer::new("media", 48_000 * 10));
    let announce = Arc::new(RingBuffer::new("announce", 48_000 * 10));
    let state = Arc::new(SharedState::new(media, announce, 48_000));

    let queue = Arc::new(TrackQueue::new());
    let control = SessionControl::new();
    let store = Arc::new(QueueStore::new(&config.storage.queue_file));
    let (shutdown, shutdown_rx) = watch::channel(false);

    let controller = QueueController::new(
        Arc::clone(&queue),
        Arc::clone(&state),
        Arc::clone(&control),
        Arc::new(config),
        store,
    );
    tokio::spawn(controller.run(shutdown_rx));

    // Fast drain so completed tracks do not linger
    {
        let media = Arc::clone(&state.media);
        tokio::spawn(async move {
            loop {
                if media.occupancy() > 0 {
                    media.read(8192);
                }
                sleep(Duration::from_millis(10)).await;
            }
        });
    }

    Harness {
        state,
        queue,
        control,
        shutdown,
        _dir: dir,
    }
}

async fn next_finished(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> TrackOutcome {
    loop {
        match rx.recv().await.expect("event bus closed") {
            EngineEvent::TrackFinished { outcome, .. } => return outcome,
            _ => continue,
        }
    }
}

async fn next_started(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> String {
    loop {
        match rx.recv().await.expect("event bus closed") {
            EngineEvent::TrackStarted { locator, .. } => return locator,
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_tracks_play_in_queue_order() {
    let script = format!("head -c {} /dev/zero", 2048 * FRAME_BYTES);
    let harness = start_controller(&script);
    let mut rx = harness.state.events.subscribe();

    harness.queue.push(PlaybackRequest::new("first"));
    harness.queue.push(PlaybackRequest::new("second"));

    let run = async {
        assert_eq!(next_started(&mut rx).await, "first");
        assert_eq!(next_finished(&mut rx).await, TrackOutcome::Completed);
        assert_eq!(next_started(&mut rx).await, "second");
        assert_eq!(next_finished(&mut rx).await, TrackOutcome::Completed);
    };
    timeout(Duration::from_secs(60), run)
        .await
        .expect("both tracks should play");

    assert!(harness.state.current_track().await.is_none());
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_skip_advances_to_next_track() {
    // First track streams forever until skipped
    let harness = start_controller("cat /dev/zero");
    let mut rx = harness.state.events.subscribe();

    harness.queue.push(PlaybackRequest::new("endless-1"));
    harness.queue.push(PlaybackRequest::new("endless-2"));

    let run = async {
        assert_eq!(next_started(&mut rx).await, "endless-1");
        sleep(Duration::from_millis(300)).await;
        harness.control.request_skip();
        assert_eq!(next_finished(&mut rx).await, TrackOutcome::Skipped);

        assert_eq!(next_started(&mut rx).await, "endless-2");
        harness.control.request_skip();
        assert_eq!(next_finished(&mut rx).await, TrackOutcome::Skipped);
    };
    timeout(Duration::from_secs(60), run)
        .await
        .expect("skip should advance the queue");

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_failed_track_does_not_stall_queue() {
    let dir = tempfile::tempdir().unwrap();

    // Fetch program missing entirely: every track fails to spawn
    let mut config = Config::default();
    config.fetch.program = "/nonexistent/fetch-binary".into();
    config.fetch.args = Vec::new();
    config.decode.program = "/bin/cat".into();
    config.decode.args = Some(Vec::new());
    config.storage.queue_file = dir.path().join("playlist.json");

    let media = Arc::new(RingBuffer::new("media", 48_000 * 10));
    let announce = Arc::new(RingBuffer::new("announce", 48_000 * 10));
    let state = Arc::new(SharedState::new(media, announce, 48_000));
    let queue = Arc::new(TrackQueue::new());
    let store = Arc::new(QueueStore::new(&config.storage.queue_file));
    let (shutdown, shutdown_rx) = watch::channel(false);

    let controller = QueueController::new(
        Arc::clone(&queue),
        Arc::clone(&state),
        SessionControl::new(),
        Arc::new(config),
        store,
    );
    tokio::spawn(controller.run(shutdown_rx));

    let mut rx = state.events.subscribe();
    queue.push(PlaybackRequest::new("broken-1"));
    queue.push(PlaybackRequest::new("broken-2"));

    let run = async {
        assert_eq!(next_finished(&mut rx).await, TrackOutcome::Failed);
        assert_eq!(next_finished(&mut rx).await, TrackOutcome::Failed);
    };
    timeout(Duration::from_secs(60), run)
        .await
        .expect("failures should not stall the loop");

    assert!(queue.is_empty());
    let _ = shutdown.send(true);
}

#[tokio::test]
async fn test_shutdown_lets_active_session_finish_teardown() {
    // No drain task here: only the session's own teardown can empty the
    // buffer, so a preempted teardown is visible as leftover frames.
    let dir = tempfile::tempdir().unwrap();
    let mut config = stub_config("cat /dev/zero");
    config.storage.queue_file = dir.path().join("playlist.json");

    let media = Arc::new(RingBuffer::new("media", 48_000 * 10));
    let announce = Arc::new(RingBuffer::new("announce", 48_000 * 10));
    let state = Arc::new(SharedState::new(media, announce, 48_000));
    let queue = Arc::new(TrackQueue::new());
    let control = SessionControl::new();
    let store = Arc::new(QueueStore::new(&config.storage.queue_file));
    let (shutdown, shutdown_rx) = watch::channel(false);

    let controller = QueueController::new(
        Arc::clone(&queue),
        Arc::clone(&state),
        Arc::clone(&control),
        Arc::new(config),
        Arc::clone(&store),
    );
    let controller_task = tokio::spawn(controller.run(shutdown_rx));

    let mut rx = state.events.subscribe();
    queue.push(PlaybackRequest::new("interrupted"));
    queue.push(PlaybackRequest::new("never-started"));

    let run = async {
        assert_eq!(next_started(&mut rx).await, "interrupted");
        // Let some PCM accumulate before stopping
        sleep(Duration::from_millis(500)).await;

        // Same order as engine shutdown: skip the active track, then signal
        control.request_skip();
        let _ = shutdown.send(true);

        assert_eq!(next_finished(&mut rx).await, TrackOutcome::Skipped);
    };
    timeout(Duration::from_secs(60), run)
        .await
        .expect("shutdown should end the track through its session");

    timeout(Duration::from_secs(30), controller_task)
        .await
        .expect("controller should stop")
        .unwrap();

    // The teardown ran: processes gone, buffer cleared, track requeued first
    assert_eq!(state.media.occupancy(), 0);
    let saved = store.load().await;
    let locators: Vec<&str> = saved.iter().map(|r| r.locator.as_str()).collect();
    assert_eq!(locators, vec!["interrupted", "never-started"]);
}

#[tokio::test]
async fn test_remainder_persisted_while_first_track_plays() {
    let harness = start_controller("cat /dev/zero");
    let mut rx = harness.state.events.subscribe();
    let path = harness._dir.path().join("playlist.json");

    harness.queue.push(PlaybackRequest::new("playing"));
    harness.queue.push(PlaybackRequest::new("waiting"));

    timeout(Duration::from_secs(60), async {
        assert_eq!(next_started(&mut rx).await, "playing");
    })
    .await
    .expect("first track should start");

    // The dequeue persisted the rest of the queue before playback began
    let saved = QueueStore::new(&path).load().await;
    let locators: Vec<&str> = saved.iter().map(|r| r.locator.as_str()).collect();
    assert_eq!(locators, vec!["waiting"]);

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_queue_persisted_across_mutation() {
    let script = format!("head -c {} /dev/zero", 1024 * FRAME_BYTES);
    let harness = start_controller(&script);
    let mut rx = harness.state.events.subscribe();
    let path = harness._dir.path().join("playlist.json");

    harness.queue.push(PlaybackRequest::new("only"));
    timeout(Duration::from_secs(60), next_finished(&mut rx))
        .await
        .expect("track should play");

    // Controller persisted the (now empty) queue when it dequeued
    let store = QueueStore::new(&path);
    assert!(store.load().await.is_empty());
    assert!(tokio::fs::metadata(&path).await.is_ok());

    let _ = harness.shutdown.send(true);
}
