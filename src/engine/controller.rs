//! Track queue and playback drain loop
//!
//! A single long-lived controller task owns track lifecycle: it pops one
//! request at a time, runs a media session to completion, lets the buffered
//! tail drain through the mixer, and persists the queue around every
//! mutation. The wait on an empty queue is the only unbounded suspension in
//! the engine; everything downstream is polled or bounded.

use crate::config::Config;
use crate::engine::session::{MediaSession, PlaybackRequest, SessionControl, SessionState};
use crate::engine::pipeline::POLL_INTERVAL;
use crate::events::{EngineEvent, TrackOutcome};
use crate::state::SharedState;
use crate::store::QueueStore;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::sleep;
use tracing::{error, info};

/// FIFO of pending playback requests, shared between the control surface and
/// the controller task.
pub struct TrackQueue {
    items: Mutex<VecDeque<PlaybackRequest>>,
    notify: Notify,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append a request; returns the new queue length.
    pub fn push(&self, request: PlaybackRequest) -> usize {
        let len = {
            let mut items = self.items.lock().unwrap();
            items.push_back(request);
            items.len()
        };
        self.notify.notify_one();
        len
    }

    /// Append restored requests in order.
    pub fn push_all(&self, requests: Vec<PlaybackRequest>) {
        if requests.is_empty() {
            return;
        }
        {
            let mut items = self.items.lock().unwrap();
            items.extend(requests);
        }
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<PlaybackRequest> {
        self.items.lock().unwrap().pop_front()
    }

    /// Pop the next request, suspending until one is available.
    pub async fn pop_wait(&self) -> PlaybackRequest {
        loop {
            // Register before checking, so a push between the check and the
            // await still wakes us.
            let notified = self.notify.notified();
            if let Some(request) = self.pop() {
                return request;
            }
            notified.await;
        }
    }

    /// Remove the request at `index` (0 = next to play).
    pub fn remove(&self, index: usize) -> Option<PlaybackRequest> {
        self.items.lock().unwrap().remove(index)
    }

    pub fn snapshot(&self) -> Vec<PlaybackRequest> {
        self.items.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}

impl Default for TrackQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the playback drain loop.
pub struct QueueController {
    queue: Arc<TrackQueue>,
    state: Arc<SharedState>,
    control: Arc<SessionControl>,
    config: Arc<Config>,
    store: Arc<QueueStore>,
}

impl QueueController {
    pub fn new(
        queue: Arc<TrackQueue>,
        state: Arc<SharedState>,
        control: Arc<SessionControl>,
        config: Arc<Config>,
        store: Arc<QueueStore>,
    ) -> Self {
        Self {
            queue,
            state,
            control,
            config,
            store,
        }
    }

    /// Run until shutdown is signalled. One track at a time; a failed track
    /// is logged and the loop moves on to the next.
    ///
    /// The stop signal is honored only at the dequeue point: an active
    /// session always runs to its terminal state, so its process teardown and
    /// buffer clear are never preempted. Engine shutdown sets the skip flag
    /// first, which bounds how long that takes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("queue controller started");
        loop {
            let request = tokio::select! {
                _ = shutdown.changed() => break,
                request = self.queue.pop_wait() => request,
            };

            self.persist().await;
            self.state.events.emit(EngineEvent::QueueChanged {
                len: self.queue.len(),
                timestamp: Utc::now(),
            });

            let outcome = self.play_one(request.clone()).await;
            if outcome == TrackOutcome::Failed {
                error!("track playback failed, moving to next");
            }

            // A shutdown that cut this track short puts it back at the front
            if *shutdown.borrow() {
                if outcome == TrackOutcome::Skipped {
                    let mut requeue = vec![request];
                    requeue.extend(self.queue.snapshot());
                    self.store.save(&requeue).await;
                } else {
                    self.persist().await;
                }
                info!("queue controller stopped");
                return;
            }
        }
        self.persist().await;
        info!("queue controller stopped");
    }

    async fn play_one(&self, request: PlaybackRequest) -> TrackOutcome {
        info!(locator = %request.locator, title = ?request.title, "starting track");

        // Stale flags from a previous track must not leak into this one
        self.control.resume();
        self.control.take_skip();

        self.state.set_current_track(Some(request.clone())).await;
        self.state.events.emit(EngineEvent::TrackStarted {
            request_id: request.id,
            locator: request.locator.clone(),
            title: request.title.clone(),
            timestamp: Utc::now(),
        });

        let pipeline = self.config.pipeline(self.state.sample_rate());
        let session = MediaSession::new(request.clone(), Arc::clone(&self.control));
        let end = session.run(&self.state.media, &pipeline).await;

        let outcome = match end {
            SessionState::Completed => self.drain_tail().await,
            SessionState::Skipped => TrackOutcome::Skipped,
            _ => TrackOutcome::Failed,
        };

        self.state.set_current_track(None).await;
        self.state.events.emit(EngineEvent::TrackFinished {
            request_id: request.id,
            outcome,
            timestamp: Utc::now(),
        });
        info!(locator = %request.locator, ?outcome, "track finished");
        outcome
    }

    /// The decode stage reached end of stream, but up to the buffer capacity
    /// of audio is still queued for the mixer. Wait for it to play out; a
    /// skip during the tail discards the remainder.
    async fn drain_tail(&self) -> TrackOutcome {
        while self.state.media.occupancy() > 0 {
            if self.control.take_skip() {
                self.state.media.clear();
                return TrackOutcome::Skipped;
            }
            sleep(POLL_INTERVAL).await;
        }
        TrackOutcome::Completed
    }

    async fn persist(&self) {
        self.store.save(&self.queue.snapshot()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_queue_fifo_order() {
        let queue = TrackQueue::new();
        queue.push(PlaybackRequest::new("one"));
        queue.push(PlaybackRequest::new("two"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().locator, "one");
        assert_eq!(queue.pop().unwrap().locator, "two");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_queue_remove_by_index() {
        let queue = TrackQueue::new();
        queue.push(PlaybackRequest::new("one"));
        queue.push(PlaybackRequest::new("two"));
        queue.push(PlaybackRequest::new("three"));

        let removed = queue.remove(1).unwrap();
        assert_eq!(removed.locator, "two");
        assert_eq!(queue.len(), 2);
        assert!(queue.remove(5).is_none());
    }

    #[tokio::test]
    async fn test_pop_wait_wakes_on_push() {
        let queue = Arc::new(TrackQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop_wait().await })
        };

        // Give the waiter a chance to suspend first
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(PlaybackRequest::new("wake"));

        let request = timeout(Duration::from_secs(2), waiter)
            .await
            .expect("pop_wait should wake")
            .unwrap();
        assert_eq!(request.locator, "wake");
    }

    #[tokio::test]
    async fn test_pop_wait_returns_immediately_when_nonempty() {
        let queue = TrackQueue::new();
        queue.push(PlaybackRequest::new("ready"));

        let request = timeout(Duration::from_millis(100), queue.pop_wait())
            .await
            .expect("queue was non-empty");
        assert_eq!(request.locator, "ready");
    }
}
