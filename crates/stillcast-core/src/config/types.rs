//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Change watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Root directory holding one subdirectory per stream
    pub image_dir: PathBuf,

    /// Minimum spacing between accepted events for the same file
    pub debounce_ms: u64,

    /// Debounce entries older than `eviction_factor * debounce_ms` are evicted
    pub eviction_factor: u32,

    /// Accepted still-image extensions (compared case-insensitively)
    pub supported_formats: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("./images"),
            debounce_ms: 100,
            eviction_factor: 10,
            supported_formats: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "gif".to_string(),
                "bmp".to_string(),
                "tiff".to_string(),
            ],
        }
    }
}

/// Job queue and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Max jobs buffered between the watcher and the workers
    pub buffer_size: usize,

    /// Number of concurrent workers
    pub workers: usize,

    /// Seconds between stream health reports
    pub health_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            workers: default_workers(),
            health_interval_secs: 10,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// External encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable
    pub program: String,

    /// Output frame rate
    pub frame_rate: u32,

    /// Output resolution, `WIDTHxHEIGHT`
    pub resolution: String,

    /// Target video bitrate (ffmpeg notation, e.g. "500k")
    pub bitrate: String,

    /// HLS segment duration in seconds
    pub segment_secs: u32,

    /// Number of segments kept in the rolling playlist
    pub playlist_size: u32,

    /// How long to wait for the encoder to open its input pipe
    pub pipe_open_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL on process exit
    pub shutdown_grace_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            frame_rate: 30,
            resolution: "640x480".to_string(),
            bitrate: "500k".to_string(),
            segment_secs: 2,
            playlist_size: 5,
            pipe_open_timeout_ms: 10_000,
            shutdown_grace_ms: 3_000,
        }
    }
}

/// Encoder output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root under which each stream gets `{root}/{stream_id}/`
    pub root: PathBuf,

    /// Remove the output root after shutdown
    pub cleanup_on_exit: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./stream"),
            cleanup_on_exit: true,
        }
    }
}

/// Stream provisioning settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Stream identifiers provisioned at startup
    pub provision: Vec<String>,

    /// Image pushed into every newly created stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<PathBuf>,

    /// Provision streams the watcher sees but the registry does not know
    pub auto_provision: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
