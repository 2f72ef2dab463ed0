//! The `stillcast serve` command: run the stream pipeline until signalled.

use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use stillcast_core::{Config, StreamEntry, Stillcast};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Arguments for the `serve` command. Each one overrides the config file.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Root directory holding one subdirectory of images per stream
    #[arg(long, env = "IMAGE_PATH")]
    pub image_dir: Option<PathBuf>,

    /// Root directory for per-stream playlists and segments
    #[arg(long, env = "OUTPUT_PATH")]
    pub output_dir: Option<PathBuf>,

    /// Output frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Output resolution, WIDTHxHEIGHT
    #[arg(long)]
    pub resolution: Option<String>,

    /// Target video bitrate (e.g. 500k, 2M)
    #[arg(long)]
    pub bitrate: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Image pushed into every stream when it is created
    #[arg(long)]
    pub placeholder: Option<PathBuf>,

    /// Provision a stream at startup (repeatable)
    #[arg(long = "stream", value_name = "ID")]
    pub streams: Vec<String>,

    /// Provision streams for new image directories automatically
    #[arg(long)]
    pub auto_provision: bool,

    /// Keep the output directory after shutdown
    #[arg(long)]
    pub keep_output: bool,
}

impl ServeArgs {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.image_dir {
            config.watcher.image_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.root = dir.clone();
        }
        if let Some(fps) = self.fps {
            config.encoder.frame_rate = fps;
        }
        if let Some(resolution) = &self.resolution {
            config.encoder.resolution = resolution.clone();
        }
        if let Some(bitrate) = &self.bitrate {
            config.encoder.bitrate = bitrate.clone();
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if let Some(placeholder) = &self.placeholder {
            config.streams.placeholder = Some(placeholder.clone());
        }
        for id in &self.streams {
            if !config.streams.provision.contains(id) {
                config.streams.provision.push(id.clone());
            }
        }
        if self.auto_provision {
            config.streams.auto_provision = true;
        }
        if self.keep_output {
            config.output.cleanup_on_exit = false;
        }
    }
}

/// One line of stdout per provisioned stream.
#[derive(Serialize)]
struct StreamLine<'a> {
    stream_id: &'a str,
    output_dir: &'a Path,
    playlist: PathBuf,
}

/// Execute the serve command.
pub async fn execute(args: ServeArgs, mut config: Config) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.check()?;

    tracing::info!(
        "Serving {:?} -> {:?} ({} workers)",
        config.image_dir(),
        config.output_root(),
        config.pipeline.workers
    );

    let stillcast = Stillcast::new(config).await?;
    for entry in stillcast.provision_configured().await? {
        print_stream(&entry)?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    stillcast.run(cancel).await?;
    tracing::info!("Stopped");
    Ok(())
}

fn print_stream(entry: &StreamEntry) -> anyhow::Result<()> {
    let line = StreamLine {
        stream_id: &entry.stream_id,
        output_dir: &entry.output_dir,
        playlist: entry.playlist_path(),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

/// Cancel on SIGINT or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            None
        }
    };

    let received = tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => "SIGINT",
            Err(e) => {
                tracing::warn!("Cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
                "SIGINT"
            }
        },
        _ = async {
            match terminate.as_mut() {
                Some(stream) => stream.recv().await,
                None => std::future::pending().await,
            }
        } => "SIGTERM",
    };

    tracing::info!("Received {}, shutting down", received);
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_args_default_changes_nothing() {
        let mut config = Config::default();
        let before = config.to_toml().unwrap();
        ServeArgs::default().apply(&mut config);
        assert_eq!(config.to_toml().unwrap(), before);
    }

    #[test]
    fn serve_args_override_config() {
        let args = ServeArgs {
            image_dir: Some(PathBuf::from("/srv/images")),
            output_dir: Some(PathBuf::from("/srv/hls")),
            fps: Some(10),
            resolution: Some("1280x720".to_string()),
            bitrate: Some("2M".to_string()),
            workers: Some(3),
            placeholder: Some(PathBuf::from("/srv/placeholder.png")),
            auto_provision: true,
            keep_output: true,
            ..Default::default()
        };
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.watcher.image_dir, PathBuf::from("/srv/images"));
        assert_eq!(config.output.root, PathBuf::from("/srv/hls"));
        assert_eq!(config.encoder.frame_rate, 10);
        assert_eq!(config.encoder.resolution, "1280x720");
        assert_eq!(config.encoder.bitrate, "2M");
        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(
            config.streams.placeholder,
            Some(PathBuf::from("/srv/placeholder.png"))
        );
        assert!(config.streams.auto_provision);
        assert!(!config.output.cleanup_on_exit);
    }

    #[test]
    fn serve_args_streams_merge_without_duplicates() {
        let args = ServeArgs {
            streams: vec!["lobby".to_string(), "porch".to_string()],
            ..Default::default()
        };
        let mut config = Config::default();
        config.streams.provision = vec!["lobby".to_string()];
        args.apply(&mut config);

        assert_eq!(config.streams.provision, ["lobby", "porch"]);
    }

    #[test]
    fn stream_line_is_json() {
        let entry = StreamEntry {
            stream_id: "lobby".to_string(),
            output_dir: PathBuf::from("/srv/hls/lobby"),
        };
        let line = StreamLine {
            stream_id: &entry.stream_id,
            output_dir: &entry.output_dir,
            playlist: entry.playlist_path(),
        };
        let json: serde_json::Value = serde_json::to_value(&line).unwrap();
        assert_eq!(json["stream_id"], "lobby");
        assert_eq!(json["playlist"], "/srv/hls/lobby/stream.m3u8");
    }
}
