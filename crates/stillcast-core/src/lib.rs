//! Stillcast Core - live HLS streams from directories of still images.
//!
//! Each stream is a directory of periodically-updated images. Every accepted
//! image write is pushed through a named pipe into a long-running encoder
//! that maintains a rolling HLS playlist for that stream.
//!
//! # Architecture
//!
//! ```text
//! fs change → Watcher (classify, debounce) → Job queue → Worker
//!           → Registry.resolve → Supervisor.push → pipe → encoder → segments
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use stillcast_core::{Config, Stillcast};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> stillcast_core::Result<()> {
//!     let stillcast = Stillcast::new(Config::load()?).await?;
//!     stillcast.create_stream(Some("lobby"), None).await?;
//!
//!     let cancel = CancellationToken::new();
//!     stillcast.run(cancel).await
//! }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod pipeline;
pub mod stream;
pub mod types;

// Re-exports for convenient access
pub use config::Config;
pub use error::{ConfigError, Result, StillcastError, StreamError, StreamResult, WatchError};
pub use pipeline::{ChangeWatcher, ImageClassifier, WorkerPool};
pub use stream::{EncoderLauncher, FfmpegLauncher, StreamRegistry, Supervisor};
pub use types::{Job, StreamEntry, StreamStatus};

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Stillcast service: owns the registry and supervisor, runs the pipeline.
pub struct Stillcast {
    config: Config,
    registry: Arc<StreamRegistry>,
    supervisor: Arc<Supervisor>,
}

impl Stillcast {
    /// Create a service driving ffmpeg as configured.
    pub async fn new(config: Config) -> Result<Self> {
        let launcher = Arc::new(FfmpegLauncher::new(config.encoder.clone()));
        Self::with_launcher(config, launcher).await
    }

    /// Create a service with a custom encoder launcher.
    ///
    /// Creates the image and output roots when missing.
    pub async fn with_launcher(config: Config, launcher: Arc<dyn EncoderLauncher>) -> Result<Self> {
        tracing::debug!("Initializing Stillcast v{}", VERSION);

        prepare_dir(&config.image_dir())?;
        prepare_dir(&config.output_root())?;

        let registry = Arc::new(StreamRegistry::new(config.output_root()));
        let supervisor = Supervisor::new(Arc::clone(&registry), launcher, &config.encoder);

        Ok(Self {
            config,
            registry,
            supervisor,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Provision a stream and push its first image.
    ///
    /// The first image is `initial_image` or else the configured placeholder.
    /// A failed initial push is logged; the stream is created regardless and
    /// the next push retries the encoder.
    pub async fn create_stream(
        &self,
        stream_id: Option<&str>,
        initial_image: Option<&Path>,
    ) -> Result<StreamEntry> {
        let entry = self.registry.provision(stream_id)?;
        tokio::fs::create_dir_all(&entry.output_dir)
            .await
            .map_err(|e| StreamError::OutputDir {
                path: entry.output_dir.clone(),
                source: e,
            })?;

        let image = initial_image
            .map(Path::to_path_buf)
            .or_else(|| self.config.placeholder());
        if let Some(image) = image {
            if let Err(e) = self.supervisor.push_to(&entry, &image).await {
                tracing::warn!(
                    "Initial image for stream {} not pushed: {}",
                    entry.stream_id,
                    e
                );
            }
        }

        Ok(entry)
    }

    /// Create every stream listed in `streams.provision`.
    pub async fn provision_configured(&self) -> Result<Vec<StreamEntry>> {
        let mut entries = Vec::with_capacity(self.config.streams.provision.len());
        for stream_id in &self.config.streams.provision {
            entries.push(self.create_stream(Some(stream_id), None).await?);
        }
        Ok(entries)
    }

    /// Output directory of a stream, for serving its playlist.
    pub fn resolve(&self, stream_id: &str) -> Option<StreamEntry> {
        self.registry.resolve(stream_id)
    }

    /// Stop a stream's encoder and forget the stream.
    ///
    /// The registry entry goes first, so a push that resolved the stream
    /// just before removal cannot leave an encoder behind.
    pub fn remove_stream(&self, stream_id: &str) -> Option<StreamEntry> {
        let removed = self.registry.remove(stream_id);
        self.supervisor.stop_stream(stream_id);
        if removed.is_some() {
            tracing::info!("Removed stream {}", stream_id);
        }
        removed
    }

    /// Status of every live encoder.
    pub fn status(&self) -> Vec<StreamStatus> {
        self.supervisor.statuses()
    }

    /// Run the watcher, the workers and the health ticker until `cancel` fires,
    /// then tear every stream down.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let (jobs_tx, jobs_rx) = pipeline::job_queue(&self.config.pipeline);
        let watcher = ChangeWatcher::new(&self.config.image_dir(), &self.config.watcher)?;

        let pool = WorkerPool::spawn(
            self.config.pipeline.workers,
            jobs_rx,
            Arc::clone(&self.registry),
            Arc::clone(&self.supervisor),
            self.config.streams.auto_provision,
            cancel.clone(),
        );
        let watch_task = tokio::spawn(watcher.run(jobs_tx, cancel.clone()));
        let health_task = tokio::spawn(report_health(
            Arc::clone(&self.registry),
            Arc::clone(&self.supervisor),
            Duration::from_secs(self.config.pipeline.health_interval_secs),
            cancel.clone(),
        ));

        cancel.cancelled().await;
        tracing::info!("Shutting down");

        if let Err(e) = watch_task.await {
            tracing::error!("Watcher task failed: {}", e);
        }

        // A worker stuck behind a stalled encoder is released by teardown.
        let grace = Duration::from_millis(self.config.encoder.shutdown_grace_ms);
        let workers = pool.join();
        tokio::pin!(workers);
        if tokio::time::timeout(grace, &mut workers).await.is_err() {
            tracing::warn!("Workers still pushing after {:?}, tearing streams down", grace);
            self.supervisor.shutdown();
            workers.await;
        }
        if let Err(e) = health_task.await {
            tracing::error!("Health task failed: {}", e);
        }

        self.shutdown().await;
        Ok(())
    }

    /// SIGTERM every encoder, SIGKILL the ones still alive after the grace
    /// period, then remove the output root if configured.
    pub async fn shutdown(&self) {
        let signalled = self.supervisor.shutdown();
        if signalled > 0 {
            tracing::info!("Signalled {} encoders", signalled);
        }

        let deadline =
            Instant::now() + Duration::from_millis(self.config.encoder.shutdown_grace_ms);
        while self.supervisor.pending_exits() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let killed = self.supervisor.force_kill();
        if killed > 0 {
            tracing::warn!("Killed {} encoders after the grace period", killed);
        }

        if self.config.output.cleanup_on_exit {
            let root = self.config.output_root();
            match tokio::fs::remove_dir_all(&root).await {
                Ok(()) => tracing::info!("Removed output directory {:?}", root),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {:?}: {}", root, e),
            }
        }
    }
}

/// Create `path` as a directory if missing; fail if it is something else.
fn prepare_dir(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(StillcastError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} exists and is not a directory", path.display()),
        )));
    }
    std::fs::create_dir_all(path)?;
    Ok(())
}

async fn report_health(
    registry: Arc<StreamRegistry>,
    supervisor: Arc<Supervisor>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for entry in registry.entries() {
            match supervisor.status(&entry.stream_id) {
                Some(status) if status.playlist_ready => tracing::debug!(
                    "Stream {} healthy (pid {}, incarnation {})",
                    status.stream_id,
                    status.pid,
                    status.incarnation
                ),
                Some(status) => {
                    let age = SystemTime::now()
                        .duration_since(status.started_at)
                        .unwrap_or_default();
                    if age >= period {
                        tracing::warn!(
                            "Stream {} encoder running for {}s (pid {}) without a playlist",
                            status.stream_id,
                            age.as_secs(),
                            status.pid
                        );
                    }
                }
                None => tracing::debug!("Stream {} idle", entry.stream_id),
            }
        }
    }
}
