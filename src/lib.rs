//! # tannoy
//!
//! Headless audio mixing and streaming engine.
//!
//! **Purpose:** Continuously feed a hardware audio output with a blend of two
//! independent sources — a queued media stream and an interrupting
//! spoken-announcement stream — while remaining responsive to pause, skip and
//! volume-control requests with bounded latency.
//!
//! **Architecture:** External fetch/decode processes stream raw PCM into two
//! ring buffers; a cpal callback mixes them (volume, ducking, limiting) at the
//! device cadence. A single queue-controller task drains the track queue into
//! media sessions; announcements run through a decode-only pipeline.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod resolver;
pub mod state;
pub mod store;
pub mod tts;

pub use engine::Engine;
pub use error::{Error, Result};
pub use state::SharedState;
