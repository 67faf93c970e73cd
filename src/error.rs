//! Error types for tannoy
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Failures inside a stream pipeline never propagate past its
//! session; session failures never propagate past the queue controller.

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Fetch/decode pipeline errors (spawn failure, sustained read failure)
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Media resolution errors
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Text-to-speech provider errors
    #[error("TTS error: {0}")]
    Tts(String),

    /// Invalid request parameter
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
