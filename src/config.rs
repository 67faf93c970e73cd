//! Configuration for the tannoy engine
//!
//! A single TOML file with built-in defaults for every setting; a missing file
//! yields the defaults. The file is read once at startup — the engine must be
//! restarted to pick up changes.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Number of output channels (stereo). The decode stage is always asked for
/// interleaved stereo, and both ring buffers store stereo frames.
pub const CHANNELS: usize = 2;

/// Bytes per stereo frame of f32 PCM (2 channels x 4 bytes).
pub const FRAME_BYTES: usize = CHANNELS * 4;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub decode: DecodeConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Audio device and buffering settings
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Output device name (None = persisted selection, then system default)
    #[serde(default)]
    pub device: Option<String>,

    /// Preferred sample rate in Hz. The device may negotiate a different
    /// rate; decode processes are spawned with the negotiated rate.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frames requested per audio callback
    #[serde(default = "default_block_frames")]
    pub block_frames: usize,

    /// Ring buffer capacity in seconds of audio
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: u32,

    /// Producer backpressure threshold in seconds of buffered audio
    #[serde(default = "default_backpressure_seconds")]
    pub backpressure_seconds: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: default_sample_rate(),
            block_frames: default_block_frames(),
            buffer_seconds: default_buffer_seconds(),
            backpressure_seconds: default_backpressure_seconds(),
        }
    }
}

/// Fetch stage: produces an encoded byte stream from a locator on stdout.
/// The locator is appended as the final argument.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_program")]
    pub program: String,

    #[serde(default = "default_fetch_args")]
    pub args: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            program: default_fetch_program(),
            args: default_fetch_args(),
        }
    }
}

/// Decode stage: consumes encoded bytes on stdin, produces raw interleaved
/// f32le PCM on stdout. When `args` is not set, a standard ffmpeg argument
/// list is built from the negotiated sample rate.
#[derive(Debug, Clone, Deserialize)]
pub struct DecodeConfig {
    #[serde(default = "default_decode_program")]
    pub program: String,

    /// Full override of the decode arguments (testing / exotic decoders)
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            program: default_decode_program(),
            args: None,
        }
    }
}

/// Media resolution (turning a query into a locator plus metadata)
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_fetch_program")]
    pub program: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program: default_fetch_program(),
        }
    }
}

/// ElevenLabs TTS settings. The API key may also come from the
/// `ELEVENLABS_API_KEY` environment variable; with no key at all the
/// announcement path is disabled.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    #[serde(default = "default_model_id")]
    pub model_id: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            voice_id: default_voice_id(),
            model_id: default_model_id(),
        }
    }
}

/// Persistence file locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_queue_file")]
    pub queue_file: PathBuf,

    #[serde(default = "default_device_file")]
    pub device_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            queue_file: default_queue_file(),
            device_file: default_device_file(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_block_frames() -> usize {
    4096
}

fn default_buffer_seconds() -> u32 {
    10
}

fn default_backpressure_seconds() -> u32 {
    2
}

fn default_fetch_program() -> String {
    "yt-dlp".to_string()
}

fn default_fetch_args() -> Vec<String> {
    vec!["-f".into(), "bestaudio".into(), "-o".into(), "-".into()]
}

fn default_decode_program() -> String {
    "ffmpeg".to_string()
}

fn default_voice_id() -> String {
    // ElevenLabs "Rachel"
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_queue_file() -> PathBuf {
    PathBuf::from("playlist.json")
}

fn default_device_file() -> PathBuf {
    PathBuf::from("selected_device.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file; `None` yields built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config: Self = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {}", path.display(), e))
                })?;
                toml::from_str(&text)
                    .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?
            }
            None => Self::default(),
        };
        if config.tts.api_key.is_none() {
            if let Ok(key) = std::env::var("ELEVENLABS_API_KEY") {
                config.tts.api_key = Some(key);
            }
        }
        Ok(config)
    }

    /// Ring buffer capacity in frames.
    pub fn buffer_capacity_frames(&self) -> usize {
        self.audio.sample_rate as usize * self.audio.buffer_seconds as usize
    }

    /// Derive the pipeline configuration for the sample rate the output
    /// device actually negotiated.
    pub fn pipeline(&self, sample_rate: u32) -> PipelineConfig {
        let mut fetch_command = Vec::with_capacity(self.fetch.args.len() + 1);
        fetch_command.push(self.fetch.program.clone());
        fetch_command.extend(self.fetch.args.iter().cloned());

        let mut decode_command = vec![self.decode.program.clone()];
        match &self.decode.args {
            Some(args) => decode_command.extend(args.iter().cloned()),
            None => decode_command.extend(
                [
                    "-hide_banner",
                    "-loglevel",
                    "error",
                    "-i",
                    "pipe:0",
                    "-f",
                    "f32le",
                    "-ar",
                    &sample_rate.to_string(),
                    "-ac",
                    &CHANNELS.to_string(),
                    "pipe:1",
                ]
                .iter()
                .map(|s| s.to_string()),
            ),
        }

        PipelineConfig {
            fetch_command,
            decode_command,
            chunk_bytes: self.audio.block_frames * FRAME_BYTES,
            // The device's real rate, so the threshold stays a true two
            // seconds of audio
            backpressure_frames: sample_rate as usize * self.audio.backpressure_seconds as usize,
        }
    }
}

/// Settings handed to a stream pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Fetch argv (program first); the locator is appended as the last argument
    pub fetch_command: Vec<String>,

    /// Decode argv (program first), complete as given
    pub decode_command: Vec<String>,

    /// Bytes of decoded PCM read per loop iteration
    pub chunk_bytes: usize,

    /// Occupancy (frames) above which the producer sleeps instead of reading
    pub backpressure_frames: usize,
}
