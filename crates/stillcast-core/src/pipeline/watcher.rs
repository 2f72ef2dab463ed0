//! Filesystem change watcher: classify, debounce, and emit jobs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::{emit, JobSender};
use super::debounce::Debouncer;
use super::discovery::{discover_stream_dirs, ImageClassifier};
use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::types::Job;

/// Raw notifications buffered between the backend thread and the watch loop.
const EVENT_BUFFER: usize = 1024;

/// Watches the image root and its stream subdirectories.
///
/// The watch set, debounce table and classifier are owned by the watcher and
/// only touched by its own loop.
pub struct ChangeWatcher {
    root: PathBuf,
    classifier: ImageClassifier,
    debouncer: Debouncer,
    watch_set: HashSet<PathBuf>,
    watcher: RecommendedWatcher,
    events: mpsc::Receiver<notify::Result<Event>>,
}

impl ChangeWatcher {
    /// Start watching `root` and every stream directory already under it.
    pub fn new(root: &Path, config: &WatcherConfig) -> Result<Self, WatchError> {
        if !root.is_dir() {
            return Err(WatchError::RootMissing(root.to_path_buf()));
        }

        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Runs on the backend's own thread; blocking here throttles it.
                let _ = tx.blocking_send(res);
            },
            NotifyConfig::default(),
        )?;

        let mut this = Self {
            root: root.to_path_buf(),
            classifier: ImageClassifier::new(config),
            debouncer: Debouncer::new(
                Duration::from_millis(config.debounce_ms),
                config.eviction_factor,
            ),
            watch_set: HashSet::new(),
            watcher,
            events,
        };

        this.watcher.watch(root, RecursiveMode::NonRecursive)?;
        this.watch_set.insert(root.to_path_buf());

        for dir in discover_stream_dirs(root) {
            this.add_watch(&dir);
        }

        tracing::info!(
            "Watching {:?} ({} stream directories)",
            root,
            this.watch_set.len() - 1
        );
        Ok(this)
    }

    /// Directories currently in the watch set, sorted.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.watch_set.iter().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Run until cancelled, emitting one job per accepted image write.
    ///
    /// Blocks on a full queue; cancellation is observed while blocked.
    pub async fn run(mut self, jobs: JobSender, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.events.recv() => next,
            };

            match next {
                Some(Ok(event)) => {
                    for job in self.accept_event(&event, Instant::now()).await {
                        tracing::debug!(
                            "Queueing {:?} for stream {}",
                            job.source_path,
                            job.stream_id
                        );
                        if !emit(&jobs, job, &cancel).await {
                            tracing::info!("Stopped watching {:?}", self.root);
                            return;
                        }
                    }
                }
                Some(Err(e)) => tracing::warn!("Watch error: {}", e),
                None => {
                    tracing::warn!("Notification source closed");
                    break;
                }
            }
        }
        tracing::info!("Stopped watching {:?}", self.root);
    }

    /// Turn one notification into jobs.
    ///
    /// New directories join the watch set; non-images, unreadable paths and
    /// debounced repeats are dropped.
    pub async fn accept_event(&mut self, event: &Event, now: Instant) -> Vec<Job> {
        if !is_write(&event.kind) {
            return Vec::new();
        }

        let mut jobs = Vec::new();
        for path in &event.paths {
            let meta = match tokio::fs::metadata(path).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::debug!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };

            if meta.is_dir() {
                self.add_watch(path);
                continue;
            }

            if !self.classifier.is_image(path) {
                tracing::debug!("Ignoring non-image {:?}", path);
                continue;
            }

            if !self.debouncer.accept(path, now) {
                tracing::trace!("Debounced {:?}", path);
                continue;
            }

            match Job::from_image(path) {
                Some(job) => jobs.push(job),
                None => tracing::debug!("No stream directory for {:?}", path),
            }
        }
        jobs
    }

    fn add_watch(&mut self, dir: &Path) {
        if self.watch_set.contains(dir) {
            return;
        }
        match self.watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                tracing::info!("Watching stream directory {:?}", dir);
                self.watch_set.insert(dir.to_path_buf());
            }
            Err(e) => tracing::warn!("Failed to watch {:?}: {}", dir, e),
        }
    }
}

/// Creates and content writes; renames count when they land a file in place.
fn is_write(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
            | EventKind::Modify(ModifyKind::Name(RenameMode::Both))
    )
}
