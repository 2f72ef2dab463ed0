//! Encoder invocation: the command template and the launcher seam.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::config::EncoderConfig;
use crate::types::{PLAYLIST_FILE, SEGMENT_PATTERN};

/// Everything a launcher needs to start one stream's encoder.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub stream_id: String,

    /// Named pipe the encoder reads images from
    pub pipe_path: PathBuf,

    /// Directory the encoder writes its playlist and segments into
    pub output_dir: PathBuf,
}

/// Builds the command that starts an encoder.
///
/// The supervisor owns spawning, stdio wiring, and lifetime; a launcher
/// only decides what program runs and with which arguments.
pub trait EncoderLauncher: Send + Sync {
    fn command(&self, spec: &LaunchSpec) -> Command;
}

/// Launches ffmpeg reading an image pipe and writing a rolling HLS playlist.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    config: EncoderConfig,
}

impl FfmpegLauncher {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// Full argument list for one stream.
    pub fn args(&self, spec: &LaunchSpec) -> Vec<OsString> {
        let c = &self.config;
        let mut args: Vec<OsString> = vec!["-y".into(), "-re".into()];

        // Input: a stream of concatenated still images
        opt(&mut args, "-f", "image2pipe");
        opt(&mut args, "-framerate", c.frame_rate.to_string());
        opt(&mut args, "-i", &spec.pipe_path);

        // Video: low-latency H.264 at a constant frame rate
        opt(&mut args, "-c:v", "libx264");
        opt(&mut args, "-preset", "ultrafast");
        opt(&mut args, "-tune", "zerolatency");
        opt(&mut args, "-vf", format!("fps={}", c.frame_rate));
        opt(&mut args, "-g", (c.frame_rate * c.segment_secs).to_string());
        opt(&mut args, "-pix_fmt", "yuv420p");
        opt(&mut args, "-s", &c.resolution);
        opt(&mut args, "-b:v", &c.bitrate);
        opt(&mut args, "-maxrate", &c.bitrate);
        opt(&mut args, "-bufsize", &c.bitrate);

        // Output: rolling HLS window, stale segments deleted
        opt(&mut args, "-f", "hls");
        opt(&mut args, "-hls_time", c.segment_secs.to_string());
        opt(&mut args, "-hls_list_size", c.playlist_size.to_string());
        opt(&mut args, "-hls_flags", "delete_segments+append_list");
        opt(&mut args, "-hls_segment_filename", segment_path(&spec.output_dir));
        args.push(spec.output_dir.join(PLAYLIST_FILE).into_os_string());
        args
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn command(&self, spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(self.args(spec));
        cmd
    }
}

fn opt(args: &mut Vec<OsString>, flag: &str, value: impl AsRef<OsStr>) {
    args.push(flag.into());
    args.push(value.as_ref().to_os_string());
}

fn segment_path(output_dir: &Path) -> PathBuf {
    output_dir.join(SEGMENT_PATTERN)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stand-in encoder: `cat` drains the pipe into `received.bin`.
    /// Streams named `stalled*` get a reader that never reads.
    #[derive(Default)]
    pub(crate) struct ShellLauncher {
        script: Option<String>,
        launches: AtomicUsize,
    }

    impl ShellLauncher {
        /// Run `script` for every stream; `$1` is the pipe, `$2` the output file.
        pub(crate) fn with_script(script: &str) -> Self {
            Self {
                script: Some(script.to_string()),
                ..Default::default()
            }
        }

        pub(crate) fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }
    }

    impl EncoderLauncher for ShellLauncher {
        fn command(&self, spec: &LaunchSpec) -> Command {
            self.launches.fetch_add(1, Ordering::SeqCst);
            let script = if let Some(script) = &self.script {
                script.as_str()
            } else if spec.stream_id.starts_with("stalled") {
                r#"exec sleep 30 < "$1""#
            } else {
                r#"exec cat "$1" > "$2""#
            };
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(script)
                .arg("sh")
                .arg(&spec.pipe_path)
                .arg(spec.output_dir.join("received.bin"));
            cmd
        }
    }
}
