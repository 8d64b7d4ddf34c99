//! Error types for reelplay
//!
//! This module defines the custom error types used throughout the engine.
//! We use thiserror for convenient error type definitions; open-time
//! failures propagate through these, while per-frame anomalies during
//! playback are absorbed into telemetry counters and log lines.

use thiserror::Error;

/// Main error type for reelplay
#[derive(Error, Debug)]
pub enum Error {
    /// Byte source I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Required header data is missing or corrupt
    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    /// A stream's codec is not known to the engine
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Codec-level decode failure outside the skippable per-packet path
    #[error("Codec error: {0}")]
    Codec(String),

    /// Audio sink or audio decode state errors
    #[error("Audio error: {0}")]
    Audio(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller-supplied input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a malformed-stream error from string
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedStream(msg.into())
    }
}

/// Convenience type alias for Results in reelplay
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for converting other errors to engine errors with context
pub trait IntoEngineError<T> {
    /// Convert this error into a stream error with the given context
    fn stream_err(self, context: &str) -> Result<T>;
    fn codec_err(self, context: &str) -> Result<T>;
    fn audio_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoEngineError<T> for std::result::Result<T, E> {
    fn stream_err(self, context: &str) -> Result<T> {
        self.map_err(|e| Error::MalformedStream(format!("{}: {}", context, e)))
    }

    fn codec_err(self, context: &str) -> Result<T> {
        self.map_err(|e| Error::Codec(format!("{}: {}", context, e)))
    }

    fn audio_err(self, context: &str) -> Result<T> {
        self.map_err(|e| Error::Audio(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| Error::Config(format!("{}: {}", context, e)))
    }
}
