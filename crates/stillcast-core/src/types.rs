//! Core data types flowing through the stream pipeline.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Name of the playlist the encoder maintains in each stream directory.
pub const PLAYLIST_FILE: &str = "stream.m3u8";

/// Name of the named pipe feeding each stream's encoder.
pub const PIPE_FILE: &str = "input_fifo";

/// Segment file pattern handed to the encoder.
pub const SEGMENT_PATTERN: &str = "segment%03d.ts";

/// One accepted image ready to be pushed into its stream's encoder.
///
/// Created by the change watcher and consumed exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Image that changed
    pub source_path: PathBuf,

    /// Stream named by the image's containing directory
    pub stream_id: String,
}

impl Job {
    /// Build a job from an image path, deriving the stream from its parent
    /// directory name. Returns `None` when the path has no named parent.
    pub fn from_image(path: &Path) -> Option<Self> {
        let stream_id = path.parent()?.file_name()?.to_str()?.to_string();
        Some(Self {
            source_path: path.to_path_buf(),
            stream_id,
        })
    }
}

/// A provisioned stream and the directory its encoder writes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEntry {
    /// Unique stream identifier
    pub stream_id: String,

    /// `{output_root}/{stream_id}`
    pub output_dir: PathBuf,
}

impl StreamEntry {
    /// Path of the HLS playlist for this stream.
    pub fn playlist_path(&self) -> PathBuf {
        self.output_dir.join(PLAYLIST_FILE)
    }

    /// Path of the named pipe for this stream.
    pub fn pipe_path(&self) -> PathBuf {
        self.output_dir.join(PIPE_FILE)
    }
}

/// Snapshot of a stream's running encoder.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,

    /// Encoder OS process id
    pub pid: u32,

    /// Increments every time the supervisor starts a new encoder
    pub incarnation: u64,

    pub started_at: SystemTime,

    /// Whether the encoder has produced its playlist yet
    pub playlist_ready: bool,
}
