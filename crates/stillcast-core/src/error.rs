//! Error types for the Stillcast stream pipeline.
//!
//! Errors are organized by concern: configuration, filesystem watching, and
//! the per-stream push path. Every variant carries the stream identifier or
//! path it concerns so log lines stay actionable.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for Stillcast operations.
#[derive(Error, Debug)]
pub enum StillcastError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Change watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    /// Stream push / encoder errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Errors raised while setting up or running the change watcher.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The notification backend failed
    #[error("Notification backend error: {0}")]
    Notify(#[from] notify::Error),

    /// The watched root does not exist or is not a directory
    #[error("Watch root is not a directory: {0}")]
    RootMissing(PathBuf),
}

/// Failures of the per-stream push operation.
///
/// Variants fall into three classes: transient input errors (the job is
/// dropped), subprocess errors (the stream reverts to absent so the next
/// push starts a fresh encoder), and resource errors (the push fails
/// outright).
#[derive(Error, Debug)]
pub enum StreamError {
    /// Stream identifier cannot name a directory
    #[error("Invalid stream id: {0:?}")]
    InvalidStreamId(String),

    /// No registry entry for this stream
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// Source image missing or unreadable
    #[error("Source image unavailable: {path}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoder process could not be started
    #[error("Failed to launch encoder for {stream_id}: {message}")]
    Launch { stream_id: String, message: String },

    /// Encoder exited before it opened its input pipe
    #[error("Encoder for {stream_id} exited during startup")]
    EncoderExited { stream_id: String },

    /// Copying image bytes into the pipe failed (reader gone)
    #[error("Failed to write to encoder pipe for {stream_id}: {source}")]
    Write {
        stream_id: String,
        #[source]
        source: std::io::Error,
    },

    /// Stream torn down while the push was in flight
    #[error("Stream unavailable: {0}")]
    Unavailable(String),

    /// Named pipe could not be created
    #[error("Failed to create pipe {path}: {message}")]
    Pipe { path: PathBuf, message: String },

    /// Output directory could not be created
    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// True for input errors that only warrant dropping the job.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::UnknownStream(_) | StreamError::SourceUnavailable { .. }
        )
    }
}

/// Convenience type alias for Stillcast results.
pub type Result<T> = std::result::Result<T, StillcastError>;

/// Convenience type alias for push-path results.
pub type StreamResult<T> = std::result::Result<T, StreamError>;
