//! Error types for avsync-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use avsync_common::events::Track;
use thiserror::Error;

/// Main error type for avsync-player
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid buffer/renderer configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] avsync_common::Error),

    /// Demuxer failure (terminal for the session)
    #[error("{track:?} demux error: {message}")]
    Demux { track: Track, message: String },

    /// Decoder failure (terminal for the session)
    #[error("{track:?} decode error: {message}")]
    Decode { track: Track, message: String },

    /// Decoded data does not match the configured stream format
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// One-shot signal was already resolved
    #[error("Signal already resolved")]
    AlreadyResolved,

    /// A session task ended without reporting a result
    #[error("Session task failed: {0}")]
    TaskFailed(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a demux error on `track`
    pub fn demux(track: Track, message: impl Into<String>) -> Self {
        Error::Demux { track, message: message.into() }
    }

    /// Shorthand for a decode error on `track`
    pub fn decode(track: Track, message: impl Into<String>) -> Self {
        Error::Decode { track, message: message.into() }
    }
}

/// Convenience Result type using avsync-player Error
pub type Result<T> = std::result::Result<T, Error>;
