//! Engine assembly and control surface
//!
//! Wires the audio output, mixer, queue controller and announcement injector
//! together and exposes the operations a front end calls: enqueue, skip,
//! pause/resume, volume, announcements, queue inspection and device
//! selection.
//!
//! The cpal stream is not `Send`, so a dedicated OS thread owns the
//! `AudioOutput` for the life of the engine and is driven over a channel;
//! everything else runs on the tokio runtime.

pub mod announcer;
pub mod controller;
pub mod pipeline;
pub mod session;

pub use announcer::AnnouncementInjector;
pub use controller::{QueueController, TrackQueue};
pub use session::{PlaybackRequest, SessionControl, SessionState};

use crate::audio::buffer::RingBuffer;
use crate::audio::mixer::Mixer;
use crate::audio::output::AudioOutput;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::resolver::{MediaResolver, YtDlpResolver};
use crate::state::{SharedState, Volume};
use crate::store::{DeviceStore, QueueStore};
use crate::tts::{ElevenLabsTts, TtsProvider};
use chrono::Utc;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{error, info, warn};

/// What the output thread negotiated with the device
#[derive(Debug, Clone)]
pub struct OutputInfo {
    pub device_name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

enum OutputCommand {
    SwitchDevice {
        name: String,
        reply: oneshot::Sender<Result<OutputInfo>>,
    },
    Shutdown,
}

/// The assembled engine. One per process.
pub struct Engine {
    config: Arc<Config>,
    state: Arc<SharedState>,
    queue: Arc<TrackQueue>,
    control: Arc<SessionControl>,
    announcer: AnnouncementInjector,
    resolver: Arc<dyn MediaResolver>,
    tts: Option<Arc<dyn TtsProvider>>,
    queue_store: Arc<QueueStore>,
    device_store: DeviceStore,
    output_tx: std_mpsc::Sender<OutputCommand>,
    output_thread: Option<std::thread::JoinHandle<()>>,
    controller_task: tokio::task::JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    /// Open the output device, start the mixer callback, restore persisted
    /// state and spawn the queue controller.
    pub async fn start(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let capacity = config.buffer_capacity_frames();
        let media = Arc::new(RingBuffer::new("media", capacity));
        let announce = Arc::new(RingBuffer::new("announce", capacity));
        let state = Arc::new(SharedState::new(media, announce, config.audio.sample_rate));

        // Device priority: config override, then persisted selection
        let device_store = DeviceStore::new(&config.storage.device_file);
        let device = match &config.audio.device {
            Some(name) => Some(name.clone()),
            None => device_store.load().await,
        };

        let (output_tx, output_rx) = std_mpsc::channel();
        let (init_tx, init_rx) = oneshot::channel();
        let output_thread = {
            let state = Arc::clone(&state);
            let preferred_rate = config.audio.sample_rate;
            let block_frames = config.audio.block_frames;
            std::thread::Builder::new()
                .name("audio-output".into())
                .spawn(move || {
                    output_thread(init_tx, output_rx, state, device, preferred_rate, block_frames)
                })
                .map_err(|e| Error::AudioOutput(format!("failed to spawn output thread: {}", e)))?
        };

        let info = init_rx
            .await
            .map_err(|_| Error::AudioOutput("output thread died during startup".into()))??;
        state.set_sample_rate(info.sample_rate);
        info!(
            device = %info.device_name,
            sample_rate = info.sample_rate,
            channels = info.channels,
            "audio output running"
        );

        let queue_store = Arc::new(QueueStore::new(&config.storage.queue_file));
        let queue = Arc::new(TrackQueue::new());
        let restored = queue_store.load().await;
        if !restored.is_empty() {
            info!(len = restored.len(), "restored persisted queue");
            queue.push_all(restored);
        }

        let control = SessionControl::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = QueueController::new(
            Arc::clone(&queue),
            Arc::clone(&state),
            Arc::clone(&control),
            Arc::clone(&config),
            Arc::clone(&queue_store),
        );
        let controller_task = tokio::spawn(controller.run(shutdown_rx));

        let announcer = AnnouncementInjector::new(Arc::clone(&state), Arc::clone(&config));
        let resolver: Arc<dyn MediaResolver> = Arc::new(YtDlpResolver::new(&config.resolver));
        let tts: Option<Arc<dyn TtsProvider>> = ElevenLabsTts::from_config(&config.tts)?
            .map(|provider| Arc::new(provider) as Arc<dyn TtsProvider>);
        if tts.is_none() {
            warn!("no TTS API key configured, spoken announcements disabled");
        }

        Ok(Self {
            config,
            state,
            queue,
            control,
            announcer,
            resolver,
            tts,
            queue_store,
            device_store,
            output_tx,
            output_thread: Some(output_thread),
            controller_task,
            shutdown_tx,
        })
    }

    /// Resolve a query and append the result to the queue.
    pub async fn enqueue(&self, query: &str) -> Result<PlaybackRequest> {
        let resolved = self
            .resolver
            .resolve(query)
            .await?
            .ok_or_else(|| Error::NotFound(format!("nothing found for '{}'", query)))?;

        let request = resolved.into_request();
        let len = self.queue.push(request.clone());
        self.queue_store.save(&self.queue.snapshot()).await;
        self.state.events.emit(EngineEvent::QueueChanged {
            len,
            timestamp: Utc::now(),
        });
        info!(locator = %request.locator, title = ?request.title, position = len, "enqueued");
        Ok(request)
    }

    /// Skip the current track. No-op when nothing is playing.
    pub async fn skip(&self) -> Result<()> {
        if self.state.current_track().await.is_none() {
            return Ok(());
        }
        self.control.request_skip();
        Ok(())
    }

    /// Pause the current track. No-op when nothing is playing or already
    /// paused.
    pub async fn pause(&self) -> Result<()> {
        if self.state.current_track().await.is_none() || self.control.is_paused() {
            return Ok(());
        }
        self.control.pause();
        self.state.events.emit(EngineEvent::PlaybackPaused {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Resume a paused track. No-op when not paused.
    pub async fn resume(&self) -> Result<()> {
        if !self.control.is_paused() {
            return Ok(());
        }
        self.control.resume();
        self.state.events.emit(EngineEvent::PlaybackResumed {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Set the master volume in percent (0-200). Announcements are not
    /// affected.
    pub fn set_volume(&self, percent: u32) -> Result<()> {
        if percent > (Volume::MAX * 100.0) as u32 {
            return Err(Error::BadRequest(format!(
                "volume {}% out of range (0-200)",
                percent
            )));
        }
        self.state.volume.set(percent as f32 / 100.0);
        self.state.events.emit(EngineEvent::VolumeChanged {
            percent,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Current master volume in percent.
    pub fn volume(&self) -> u32 {
        (self.state.volume.get() * 100.0).round() as u32
    }

    /// Speak an announcement over the current audio.
    pub async fn say(&self, text: &str) -> Result<()> {
        let tts = self
            .tts
            .as_ref()
            .ok_or_else(|| Error::Tts("no TTS API key configured".into()))?;
        let encoded = tts.synthesize(text).await?;
        self.announcer.play(encoded).await
    }

    /// Play pre-encoded audio (a chime, a jingle) as an announcement.
    pub async fn announce(&self, encoded: Vec<u8>) -> Result<()> {
        self.announcer.play(encoded).await
    }

    /// Pending tracks, next-to-play first.
    pub fn queue(&self) -> Vec<PlaybackRequest> {
        self.queue.snapshot()
    }

    /// Remove the pending track at `index` (0 = next to play).
    pub async fn remove_track(&self, index: usize) -> Result<PlaybackRequest> {
        let removed = self
            .queue
            .remove(index)
            .ok_or_else(|| Error::NotFound(format!("no queued track at index {}", index)))?;
        self.queue_store.save(&self.queue.snapshot()).await;
        self.state.events.emit(EngineEvent::QueueChanged {
            len: self.queue.len(),
            timestamp: Utc::now(),
        });
        Ok(removed)
    }

    pub async fn now_playing(&self) -> Option<PlaybackRequest> {
        self.state.current_track().await
    }

    pub fn list_devices(&self) -> Result<Vec<String>> {
        AudioOutput::list_devices()
    }

    /// Switch the output device, persisting the selection on success.
    pub async fn select_device(&self, name: &str) -> Result<OutputInfo> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.output_tx
            .send(OutputCommand::SwitchDevice {
                name: name.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| Error::AudioOutput("output thread is gone".into()))?;

        let info = reply_rx
            .await
            .map_err(|_| Error::AudioOutput("output thread is gone".into()))??;

        self.state.set_sample_rate(info.sample_rate);
        self.device_store.save(&info.device_name).await;
        self.state.events.emit(EngineEvent::DeviceChanged {
            name: info.device_name.clone(),
            timestamp: Utc::now(),
        });
        Ok(info)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.state.events.subscribe()
    }

    pub fn shared_state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop everything: abort the active track, stop the controller and
    /// close the output stream. The queue is persisted with the interrupted
    /// track back at the front.
    pub async fn shutdown(mut self) {
        info!("engine shutting down");
        self.control.request_skip();
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = (&mut self.controller_task).await {
            if !e.is_cancelled() {
                error!("queue controller panicked: {}", e);
            }
        }
        let _ = self.output_tx.send(OutputCommand::Shutdown);
        if let Some(thread) = self.output_thread.take() {
            let _ = thread.join();
        }
        info!("engine stopped");
    }
}

/// Open a device and start the mixer callback on it.
fn open_and_start(
    state: &Arc<SharedState>,
    device_name: Option<&str>,
    preferred_rate: u32,
    block_frames: usize,
) -> Result<AudioOutput> {
    let mut output = AudioOutput::open(device_name, preferred_rate, block_frames)?;
    let mixer = Mixer::new(
        Arc::clone(&state.media),
        Arc::clone(&state.announce),
        state.volume.clone(),
    );
    output.start(mixer)?;
    Ok(output)
}

fn output_info(output: &AudioOutput) -> OutputInfo {
    OutputInfo {
        device_name: output.device_name(),
        sample_rate: output.sample_rate(),
        channels: output.channels(),
    }
}

/// Body of the dedicated audio output thread. The cpal stream lives and dies
/// here; the async side talks to it over `commands`.
fn output_thread(
    init_tx: oneshot::Sender<Result<OutputInfo>>,
    commands: std_mpsc::Receiver<OutputCommand>,
    state: Arc<SharedState>,
    device: Option<String>,
    preferred_rate: u32,
    block_frames: usize,
) {
    let mut output = match open_and_start(&state, device.as_deref(), preferred_rate, block_frames) {
        Ok(output) => output,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };
    let _ = init_tx.send(Ok(output_info(&output)));

    while let Ok(command) = commands.recv() {
        match command {
            OutputCommand::SwitchDevice { name, reply } => {
                let previous = output.device_name();
                if let Err(e) = output.stop() {
                    warn!("failed to stop current stream: {}", e);
                }
                match open_and_start(&state, Some(&name), preferred_rate, block_frames) {
                    Ok(next) => {
                        output = next;
                        let _ = reply.send(Ok(output_info(&output)));
                    }
                    Err(e) => {
                        warn!("failed to switch to '{}': {}, restoring previous", name, e);
                        match open_and_start(&state, Some(&previous), preferred_rate, block_frames)
                        {
                            Ok(restored) => output = restored,
                            Err(restore_err) => {
                                error!("failed to restore '{}': {}", previous, restore_err)
                            }
                        }
                        let _ = reply.send(Err(e));
                    }
                }
            }
            OutputCommand::Shutdown => break,
        }
    }
    if let Err(e) = output.stop() {
        warn!("failed to stop output stream on shutdown: {}", e);
    }
}
