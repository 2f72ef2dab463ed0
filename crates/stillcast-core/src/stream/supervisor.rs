//! Stream process supervisor: at most one live encoder per stream.
//!
//! Each stream identifier owns a slot. The slot's async mutex is held across
//! "is an encoder running?" and "start one", and across the byte copy into
//! the pipe, so operations on one stream are serialized while different
//! streams proceed in parallel. Encoder exits are observed by a detached
//! monitor task per process, which reports back to a single reaper task
//! instead of touching the slot table itself. The monitor owns the `Child`
//! and delivers every signal, so a signal never reaches a reaped pid.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, ChildStderr};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::encoder::{EncoderLauncher, LaunchSpec};
use super::fifo::{self, OpenOutcome};
use super::registry::StreamRegistry;
use crate::config::EncoderConfig;
use crate::error::{StreamError, StreamResult};
use crate::types::{StreamEntry, StreamStatus, PLAYLIST_FILE};

/// Lines of encoder stderr kept for the exit report.
const STDERR_TAIL_LINES: usize = 64;

/// Owns one encoder process and one named pipe per active stream.
pub struct Supervisor {
    registry: Arc<StreamRegistry>,
    launcher: Arc<dyn EncoderLauncher>,
    pipe_open_timeout: Duration,
    slots: Mutex<HashMap<String, Arc<StreamSlot>>>,
    incarnations: AtomicU64,
    exits: mpsc::UnboundedSender<ExitNotice>,
    closing: CancellationToken,
    /// Encoders signalled by `shutdown` or `stop_stream`, kept for `force_kill`
    draining: Mutex<Vec<EncoderControl>>,
}

/// Per-stream state.
#[derive(Default)]
struct StreamSlot {
    /// Held for the whole start-and-write sequence of a push.
    state: tokio::sync::Mutex<Option<ActiveEncoder>>,
    /// Signalling handle, reachable while a push holds `state`.
    control: Mutex<Option<EncoderControl>>,
    /// Bumped by `stop_stream`. A push that began before the bump does not
    /// keep the encoder it starts.
    stops: AtomicU64,
}

impl StreamSlot {
    fn live_status(&self) -> Option<StreamStatus> {
        let control = self.control.lock();
        let live = control.as_ref().filter(|c| !c.life.exited.is_cancelled());
        live.map(EncoderControl::status)
    }
}

/// Tokens shared by a push, the process monitor and teardown.
#[derive(Clone, Default)]
struct Lifecycle {
    /// Cancelled by the monitor once the process has been reaped.
    exited: CancellationToken,
    /// Cancelled to close the pipe and SIGTERM the process.
    teardown: CancellationToken,
    /// Cancelled to SIGKILL the process.
    kill: CancellationToken,
}

/// The running encoder and the write end of its pipe.
struct ActiveEncoder {
    incarnation: u64,
    pipe: pipe::Sender,
    life: Lifecycle,
}

#[derive(Clone)]
struct EncoderControl {
    stream_id: String,
    incarnation: u64,
    pid: u32,
    started_at: SystemTime,
    output_dir: PathBuf,
    life: Lifecycle,
}

impl EncoderControl {
    fn status(&self) -> StreamStatus {
        StreamStatus {
            stream_id: self.stream_id.clone(),
            pid: self.pid,
            incarnation: self.incarnation,
            started_at: self.started_at,
            playlist_ready: self.output_dir.join(PLAYLIST_FILE).exists(),
        }
    }
}

/// Sent by a monitor task once its encoder has exited.
#[derive(Debug)]
struct ExitNotice {
    stream_id: String,
    incarnation: u64,
}

impl Supervisor {
    /// Create a supervisor and start its reaper task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        registry: Arc<StreamRegistry>,
        launcher: Arc<dyn EncoderLauncher>,
        config: &EncoderConfig,
    ) -> Arc<Self> {
        let (exits, exit_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self {
            registry,
            launcher,
            pipe_open_timeout: Duration::from_millis(config.pipe_open_timeout_ms),
            slots: Mutex::new(HashMap::new()),
            incarnations: AtomicU64::new(0),
            exits,
            closing: CancellationToken::new(),
            draining: Mutex::new(Vec::new()),
        });
        tokio::spawn(reap(Arc::downgrade(&supervisor), exit_rx));
        supervisor
    }

    /// Push an image into a stream, resolving the stream via the registry.
    pub async fn push(&self, stream_id: &str, source: &Path) -> StreamResult<()> {
        let entry = self
            .registry
            .resolve(stream_id)
            .ok_or_else(|| StreamError::UnknownStream(stream_id.to_string()))?;
        self.push_to(&entry, source).await
    }

    /// Push an image into an already-resolved stream.
    ///
    /// Starts the stream's encoder if none is running, then copies the whole
    /// image into its pipe. Blocks for as long as the encoder takes to drain
    /// the bytes.
    pub async fn push_to(&self, entry: &StreamEntry, source: &Path) -> StreamResult<()> {
        let stream_id = entry.stream_id.as_str();
        if self.closing.is_cancelled() {
            return Err(StreamError::Unavailable(stream_id.to_string()));
        }

        let slot = self.slot(stream_id);
        let stops = slot.stops.load(Ordering::SeqCst);

        // Read first: a bad source must not touch any process state.
        let image = tokio::fs::read(source)
            .await
            .map_err(|e| StreamError::SourceUnavailable {
                path: source.to_path_buf(),
                source: e,
            })?;

        let mut state = slot.state.lock().await;
        if self.closing.is_cancelled() {
            return Err(StreamError::Unavailable(stream_id.to_string()));
        }

        let stale = state.as_ref().is_some_and(|active| {
            active.life.exited.is_cancelled() || active.life.teardown.is_cancelled()
        });
        if stale {
            if let Some(old) = state.take() {
                tracing::debug!(
                    "Discarding stale encoder for {} (incarnation {})",
                    stream_id,
                    old.incarnation
                );
                clear_control(&slot, old.incarnation);
            }
        }

        if state.is_none() {
            let started = self.start(entry, &slot, stops).await?;
            *state = Some(started);
        }
        let active = state
            .as_mut()
            .ok_or_else(|| StreamError::Unavailable(stream_id.to_string()))?;

        let written = tokio::select! {
            res = write_image(&mut active.pipe, &image) => res.map_err(|e| StreamError::Write {
                stream_id: stream_id.to_string(),
                source: e,
            }),
            _ = active.life.teardown.cancelled() => Err(StreamError::Unavailable(stream_id.to_string())),
        };

        match written {
            Ok(()) => {
                tracing::debug!(
                    "Wrote {} bytes from {:?} into stream {}",
                    image.len(),
                    source,
                    stream_id
                );
                Ok(())
            }
            Err(e) => {
                // Dropping the encoder closes our end of the pipe; the next
                // push starts a fresh incarnation.
                if let Some(old) = state.take() {
                    clear_control(&slot, old.incarnation);
                    old.life.teardown.cancel();
                }
                Err(e)
            }
        }
    }

    /// Start a new encoder incarnation for `entry`. Caller holds the slot's
    /// state lock; `stops` is the slot's stop count when the push began.
    async fn start(
        &self,
        entry: &StreamEntry,
        slot: &StreamSlot,
        stops: u64,
    ) -> StreamResult<ActiveEncoder> {
        let stream_id = entry.stream_id.clone();

        tokio::fs::create_dir_all(&entry.output_dir)
            .await
            .map_err(|e| StreamError::OutputDir {
                path: entry.output_dir.clone(),
                source: e,
            })?;

        let pipe_path = entry.pipe_path();
        fifo::create_fifo(&pipe_path)?;

        let spec = LaunchSpec {
            stream_id: stream_id.clone(),
            pipe_path: pipe_path.clone(),
            output_dir: entry.output_dir.clone(),
        };
        let mut cmd = self.launcher.command(&spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| StreamError::Launch {
            stream_id: stream_id.clone(),
            message: if e.kind() == std::io::ErrorKind::NotFound {
                format!("encoder program not found: {:?}", cmd.as_std().get_program())
            } else {
                e.to_string()
            },
        })?;
        let pid = child.id().ok_or_else(|| StreamError::Launch {
            stream_id: stream_id.clone(),
            message: "encoder exited immediately".to_string(),
        })?;

        let incarnation = self.incarnations.fetch_add(1, Ordering::Relaxed) + 1;
        let life = Lifecycle::default();
        tokio::spawn(monitor(
            child,
            stream_id.clone(),
            incarnation,
            life.clone(),
            self.exits.clone(),
        ));

        let outcome = fifo::open_writer(&pipe_path, self.pipe_open_timeout, life.exited.cancelled())
            .await
            .map_err(|e| {
                life.kill.cancel();
                StreamError::Pipe {
                    path: pipe_path.clone(),
                    message: e.to_string(),
                }
            })?;

        let pipe = match outcome {
            OpenOutcome::Opened(pipe) => pipe,
            OpenOutcome::ReaderGone => {
                return Err(StreamError::EncoderExited { stream_id });
            }
            OpenOutcome::TimedOut => {
                life.kill.cancel();
                return Err(StreamError::Launch {
                    stream_id,
                    message: format!(
                        "encoder did not open its input within {}ms",
                        self.pipe_open_timeout.as_millis()
                    ),
                });
            }
        };

        *slot.control.lock() = Some(EncoderControl {
            stream_id: stream_id.clone(),
            incarnation,
            pid,
            started_at: SystemTime::now(),
            output_dir: entry.output_dir.clone(),
            life: life.clone(),
        });

        // `shutdown` and `stop_stream` mark the supervisor or slot before
        // scanning controls, so either they saw this control or we see the
        // mark here. `remove_stream` drops the registry entry before stopping.
        let stopped = slot.stops.load(Ordering::SeqCst) != stops
            || self.registry.resolve(&stream_id).is_none();
        if self.closing.is_cancelled() || stopped {
            let control = slot.control.lock().take();
            if let Some(control) = control {
                control.life.teardown.cancel();
                self.drain(control);
            }
            return Err(StreamError::Unavailable(stream_id));
        }

        tracing::info!(
            "Started encoder for stream {} (pid {}, incarnation {})",
            stream_id,
            pid,
            incarnation
        );

        Ok(ActiveEncoder {
            incarnation,
            pipe,
            life,
        })
    }

    /// Stop one stream's encoder: close its pipe and signal it.
    ///
    /// An encoder still being started by a concurrent push is stopped as
    /// soon as it is up, and that push fails with `StreamError::Unavailable`.
    /// Returns false if no encoder was running or starting.
    pub fn stop_stream(&self, stream_id: &str) -> bool {
        let Some(slot) = self.slots.lock().get(stream_id).cloned() else {
            return false;
        };
        slot.stops.fetch_add(1, Ordering::SeqCst);

        let stopped = match teardown_slot(&slot) {
            Some(control) => {
                tracing::info!("Stopped encoder for stream {} (pid {})", stream_id, control.pid);
                self.drain(control);
                true
            }
            None => slot.state.try_lock().is_err(),
        };

        self.forget_if_idle(stream_id, slot);
        stopped
    }

    /// Tear down every stream: close each pipe and send each encoder SIGTERM.
    ///
    /// Does not wait for the processes to exit. Pushes racing this call, and
    /// any push after it, fail with `StreamError::Unavailable`. Returns the
    /// number of encoders signalled.
    pub fn shutdown(&self) -> usize {
        self.closing.cancel();

        let slots: Vec<Arc<StreamSlot>> = self.slots.lock().values().cloned().collect();
        let mut signalled = 0;
        for slot in slots {
            if let Some(control) = teardown_slot(&slot) {
                tracing::info!(
                    "Shutting down stream {} (pid {})",
                    control.stream_id,
                    control.pid
                );
                self.drain(control);
                signalled += 1;
            }
        }
        signalled
    }

    /// SIGKILL signalled encoders that are still alive.
    ///
    /// Returns the number of processes killed.
    pub fn force_kill(&self) -> usize {
        let draining = std::mem::take(&mut *self.draining.lock());
        let mut killed = 0;
        for control in draining {
            if !control.life.exited.is_cancelled() {
                tracing::warn!(
                    "Encoder for {} (pid {}) ignored SIGTERM, killing",
                    control.stream_id,
                    control.pid
                );
                control.life.kill.cancel();
                killed += 1;
            }
        }
        killed
    }

    /// Signalled encoders that have not exited yet.
    pub fn pending_exits(&self) -> usize {
        self.draining
            .lock()
            .iter()
            .filter(|c| !c.life.exited.is_cancelled())
            .count()
    }

    /// Whether a stream currently has a live encoder.
    pub fn is_running(&self, stream_id: &str) -> bool {
        self.status(stream_id).is_some()
    }

    /// Status of a stream's live encoder.
    pub fn status(&self, stream_id: &str) -> Option<StreamStatus> {
        let slot = self.slots.lock().get(stream_id).cloned()?;
        slot.live_status()
    }

    /// Status of every live encoder, sorted by stream identifier.
    pub fn statuses(&self) -> Vec<StreamStatus> {
        let slots: Vec<Arc<StreamSlot>> = self.slots.lock().values().cloned().collect();
        let mut statuses: Vec<StreamStatus> =
            slots.iter().filter_map(|slot| slot.live_status()).collect();
        statuses.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        statuses
    }

    /// Number of live encoders.
    pub fn active_count(&self) -> usize {
        self.statuses().len()
    }

    /// Get or create the slot for a stream. Single critical section, so two
    /// callers can never end up with different slots for one stream.
    fn slot(&self, stream_id: &str) -> Arc<StreamSlot> {
        Arc::clone(
            self.slots
                .lock()
                .entry(stream_id.to_string())
                .or_default(),
        )
    }

    /// Drop a stream's slot if no push holds or is waiting for it.
    ///
    /// Slots are only cloned under the table lock, so a strong count of two
    /// (table plus `slot`) means nobody else has it.
    fn forget_if_idle(&self, stream_id: &str, slot: Arc<StreamSlot>) {
        let mut slots = self.slots.lock();
        let idle = slot.state.try_lock().is_ok_and(|state| state.is_none());
        if idle && Arc::strong_count(&slot) == 2 {
            slots.remove(stream_id);
        }
    }

    /// Track a signalled encoder until it exits or is force-killed.
    fn drain(&self, control: EncoderControl) {
        let mut draining = self.draining.lock();
        draining.retain(|c| !c.life.exited.is_cancelled());
        draining.push(control);
    }

    fn reap_exited(&self, notice: ExitNotice) {
        let Some(slot) = self.slots.lock().get(&notice.stream_id).cloned() else {
            return;
        };
        clear_control(&slot, notice.incarnation);

        // A push holding the lock discards the exited encoder on its own.
        let state = slot.state.try_lock();
        if let Ok(mut state) = state {
            if state.as_ref().map(|a| a.incarnation) == Some(notice.incarnation) {
                state.take();
                tracing::debug!(
                    "Stream {} is absent after incarnation {} exited",
                    notice.stream_id,
                    notice.incarnation
                );
            }
        }
    }
}

/// Close a slot's pipe (now if idle, or via the teardown token if a push is
/// writing). The encoder's monitor sends the SIGTERM.
fn teardown_slot(slot: &StreamSlot) -> Option<EncoderControl> {
    let control = slot.control.lock().take()?;
    control.life.teardown.cancel();
    if let Ok(mut state) = slot.state.try_lock() {
        state.take();
    }
    Some(control)
}

fn clear_control(slot: &StreamSlot, incarnation: u64) {
    let mut control = slot.control.lock();
    if control.as_ref().map(|c| c.incarnation) == Some(incarnation) {
        control.take();
    }
}

async fn write_image(pipe: &mut pipe::Sender, image: &[u8]) -> std::io::Result<()> {
    pipe.write_all(image).await?;
    pipe.flush().await
}

/// Wait for an encoder to exit, report its diagnostics, and notify the reaper.
async fn monitor(
    mut child: Child,
    stream_id: String,
    incarnation: u64,
    life: Lifecycle,
    exits: mpsc::UnboundedSender<ExitNotice>,
) {
    let stderr = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(drain_stderr(stderr, stream_id.clone())));

    let status = wait_signalled(&mut child, &life).await;
    life.exited.cancel();

    let tail = match stderr {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    };

    match status {
        Ok(status) if status.success() || life.teardown.is_cancelled() => {
            tracing::info!(
                "Encoder for stream {} exited: {} (incarnation {})",
                stream_id,
                status,
                incarnation
            );
        }
        Ok(status) => {
            tracing::error!(
                "Encoder for stream {} exited with {} (incarnation {})\n{}",
                stream_id,
                status,
                incarnation,
                tail.join("\n")
            );
        }
        Err(e) => {
            tracing::error!("Failed to wait on encoder for stream {}: {}", stream_id, e);
        }
    }

    let _ = exits.send(ExitNotice {
        stream_id,
        incarnation,
    });
}

/// Wait for the child, delivering teardown and kill requests while it is
/// still unreaped.
async fn wait_signalled(child: &mut Child, life: &Lifecycle) -> std::io::Result<ExitStatus> {
    let mut terminated = false;
    let mut killed = false;
    loop {
        let sig = tokio::select! {
            status = child.wait() => return status,
            _ = life.teardown.cancelled(), if !terminated => Signal::SIGTERM,
            _ = life.kill.cancelled(), if !killed => Signal::SIGKILL,
        };

        if sig == Signal::SIGKILL {
            killed = true;
            if let Err(e) = child.start_kill() {
                tracing::debug!("Failed to kill encoder: {}", e);
            }
        } else {
            terminated = true;
            if let Some(pid) = child.id() {
                terminate(pid);
            }
        }
    }
}

fn terminate(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::warn!("Failed to send SIGTERM to pid {}: {}", pid, e),
    }
}

/// Read encoder stderr until EOF, keeping the last lines for the exit report.
async fn drain_stderr(stderr: ChildStderr, stream_id: String) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::trace!("encoder[{}]: {}", stream_id, line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

async fn reap(supervisor: Weak<Supervisor>, mut exits: mpsc::UnboundedReceiver<ExitNotice>) {
    while let Some(notice) = exits.recv().await {
        let Some(supervisor) = supervisor.upgrade() else {
            break;
        };
        supervisor.reap_exited(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::encoder::testing::ShellLauncher;
    use futures_util::future::join_all;
    use std::time::Instant;

    struct Harness {
        _dir: tempfile::TempDir,
        images: PathBuf,
        registry: Arc<StreamRegistry>,
        launcher: Arc<ShellLauncher>,
        supervisor: Arc<Supervisor>,
    }

    impl Harness {
        fn new(launcher: ShellLauncher) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let images = dir.path().join("images");
            std::fs::create_dir_all(&images).unwrap();
            let registry = Arc::new(StreamRegistry::new(dir.path().join("out")));
            let launcher = Arc::new(launcher);
            let config = EncoderConfig {
                pipe_open_timeout_ms: 2_000,
                ..Default::default()
            };
            let supervisor = Supervisor::new(
                Arc::clone(&registry),
                Arc::clone(&launcher) as Arc<dyn EncoderLauncher>,
                &config,
            );
            Self {
                _dir: dir,
                images,
                registry,
                launcher,
                supervisor,
            }
        }

        fn image(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.images.join(name);
            std::fs::write(&path, bytes).unwrap();
            path
        }

        fn launches(&self) -> usize {
            self.launcher.launches()
        }
    }

    async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn pid_alive(pid: u32) -> bool {
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn test_push_delivers_bytes_to_encoder() {
        let h = Harness::new(ShellLauncher::default());
        let entry = h.registry.provision(Some("lobby")).unwrap();
        let a = h.image("a.jpg", b"first-frame;");
        let b = h.image("b.jpg", b"second-frame;");

        h.supervisor.push("lobby", &a).await.unwrap();
        h.supervisor.push("lobby", &b).await.unwrap();

        assert_eq!(h.launches(), 1);
        assert!(fifo::is_fifo(&entry.pipe_path()));
        let received = entry.output_dir.join("received.bin");
        eventually("encoder output", || {
            std::fs::read(&received).ok().as_deref() == Some(b"first-frame;second-frame;".as_slice())
        })
        .await;

        h.supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_first_pushes_start_one_encoder() {
        let h = Harness::new(ShellLauncher::default());
        h.registry.provision(Some("lobby")).unwrap();
        let image = h.image("a.jpg", b"frame");

        let pushes = (0..16).map(|_| h.supervisor.push("lobby", &image));
        let results = join_all(pushes).await;

        assert!(results.iter().all(|r| r.is_ok()), "{results:?}");
        assert_eq!(h.launches(), 1);
        assert_eq!(h.supervisor.active_count(), 1);
        assert_eq!(h.supervisor.status("lobby").unwrap().incarnation, 1);

        h.supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_stream_push_has_no_side_effects() {
        let h = Harness::new(ShellLauncher::default());
        let image = h.image("a.jpg", b"frame");

        let err = h.supervisor.push("ghost", &image).await.unwrap_err();

        assert!(matches!(err, StreamError::UnknownStream(ref id) if id == "ghost"));
        assert_eq!(h.launches(), 0);
        assert!(!h.registry.output_root().join("ghost").exists());
        assert!(!h.supervisor.is_running("ghost"));
    }

    #[tokio::test]
    async fn test_missing_source_has_no_side_effects() {
        let h = Harness::new(ShellLauncher::default());
        let entry = h.registry.provision(Some("lobby")).unwrap();

        let err = h
            .supervisor
            .push("lobby", &h.images.join("missing.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::SourceUnavailable { .. }));
        assert!(err.is_transient());
        assert_eq!(h.launches(), 0);
        assert!(!entry.output_dir.exists());
    }

    #[tokio::test]
    async fn test_encoder_recreated_after_death() {
        let h = Harness::new(ShellLauncher::default());
        h.registry.provision(Some("lobby")).unwrap();
        let image = h.image("a.jpg", b"frame");

        h.supervisor.push("lobby", &image).await.unwrap();
        let first = h.supervisor.status("lobby").unwrap();

        signal::kill(Pid::from_raw(first.pid as i32), Signal::SIGKILL).unwrap();
        eventually("exit to be observed", || !h.supervisor.is_running("lobby")).await;

        h.supervisor.push("lobby", &image).await.unwrap();
        let second = h.supervisor.status("lobby").unwrap();

        assert_ne!(first.pid, second.pid);
        assert_eq!(second.incarnation, first.incarnation + 1);
        assert_eq!(h.launches(), 2);

        h.supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_signals_all_without_waiting() {
        let h = Harness::new(ShellLauncher::default());
        let image = h.image("a.jpg", b"frame");
        for id in ["a", "b", "c"] {
            h.registry.provision(Some(id)).unwrap();
            h.supervisor.push(id, &image).await.unwrap();
        }
        let pids: Vec<u32> = h.supervisor.statuses().iter().map(|s| s.pid).collect();
        assert_eq!(pids.len(), 3);

        let started = Instant::now();
        let signalled = h.supervisor.shutdown();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(signalled, 3);
        assert_eq!(h.supervisor.active_count(), 0);

        eventually("encoders to exit", || pids.iter().all(|pid| !pid_alive(*pid))).await;
        eventually("exits to be observed", || h.supervisor.pending_exits() == 0).await;

        let err = h.supervisor.push("a", &image).await.unwrap_err();
        assert!(matches!(err, StreamError::Unavailable(_)));
        assert_eq!(h.launches(), 3);
    }

    #[tokio::test]
    async fn test_slow_stream_does_not_block_others() {
        let h = Harness::new(ShellLauncher::default());
        h.registry.provision(Some("stalled")).unwrap();
        h.registry.provision(Some("lobby")).unwrap();
        // Far larger than a pipe buffer: the write cannot complete.
        let big = h.image("big.jpg", &vec![0u8; 1 << 20]);
        let small = h.image("small.jpg", b"frame");

        let stalled = tokio::spawn({
            let supervisor = Arc::clone(&h.supervisor);
            async move { supervisor.push("stalled", &big).await }
        });
        eventually("stalled encoder", || h.supervisor.is_running("stalled")).await;

        tokio::time::timeout(Duration::from_secs(2), h.supervisor.push("lobby", &small))
            .await
            .expect("push to an unrelated stream must not wait")
            .unwrap();
        assert!(!stalled.is_finished());

        // Teardown aborts the blocked push.
        h.supervisor.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(2), stalled)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(StreamError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_stream_absent() {
        let h = Harness::new(ShellLauncher::with_script("exec /nonexistent/encoder"));
        h.registry.provision(Some("lobby")).unwrap();
        let image = h.image("a.jpg", b"frame");

        let err = h.supervisor.push("lobby", &image).await.unwrap_err();
        assert!(matches!(err, StreamError::EncoderExited { .. }), "{err:?}");
        assert!(!h.supervisor.is_running("lobby"));

        // The next push retries from scratch.
        let _ = h.supervisor.push("lobby", &image).await.unwrap_err();
        assert_eq!(h.launches(), 2);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(StreamRegistry::new(dir.path().join("out")));
        let config = EncoderConfig {
            program: "/nonexistent/ffmpeg".to_string(),
            ..Default::default()
        };
        let launcher = Arc::new(crate::stream::encoder::FfmpegLauncher::new(config.clone()));
        let supervisor = Supervisor::new(Arc::clone(&registry), launcher, &config);
        registry.provision(Some("lobby")).unwrap();
        let image = dir.path().join("a.jpg");
        std::fs::write(&image, b"frame").unwrap();

        let err = supervisor.push("lobby", &image).await.unwrap_err();
        assert!(matches!(err, StreamError::Launch { .. }), "{err:?}");
        assert!(err.to_string().contains("not found"));
        assert!(!supervisor.is_running("lobby"));
    }

    #[tokio::test]
    async fn test_stop_stream() {
        let h = Harness::new(ShellLauncher::default());
        h.registry.provision(Some("lobby")).unwrap();
        let image = h.image("a.jpg", b"frame");

        assert!(!h.supervisor.stop_stream("lobby"));
        h.supervisor.push("lobby", &image).await.unwrap();
        let pid = h.supervisor.status("lobby").unwrap().pid;

        assert!(h.supervisor.stop_stream("lobby"));
        assert!(!h.supervisor.is_running("lobby"));
        eventually("encoder to exit", || !pid_alive(pid)).await;

        // Unlike shutdown, the stream can be restarted.
        h.supervisor.push("lobby", &image).await.unwrap();
        assert_eq!(h.launches(), 2);
        h.supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_stop_stream_reaches_encoder_still_starting() {
        let h = Harness::new(ShellLauncher::with_script(r#"sleep 1; exec cat "$1" > "$2""#));
        h.registry.provision(Some("lobby")).unwrap();
        let image = h.image("a.jpg", b"frame");

        let push = tokio::spawn({
            let supervisor = Arc::clone(&h.supervisor);
            async move { supervisor.push("lobby", &image).await }
        });
        eventually("encoder launch", || h.launches() == 1).await;

        assert!(h.supervisor.stop_stream("lobby"));
        let result = tokio::time::timeout(Duration::from_secs(5), push)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(StreamError::Unavailable(_))), "{result:?}");
        assert!(!h.supervisor.is_running("lobby"));
        eventually("stopped encoder to exit", || h.supervisor.pending_exits() == 0).await;
    }

    #[tokio::test]
    async fn test_write_failure_then_recreated_on_next_push() {
        // Reads one byte, closes its input, and lingers.
        let h = Harness::new(ShellLauncher::with_script(
            r#"exec 3<"$1"; head -c 1 <&3 >/dev/null; exec 3<&-; sleep 30"#,
        ));
        h.registry.provision(Some("lobby")).unwrap();
        let image = h.image("a.jpg", b"frame");

        h.supervisor.push("lobby", &image).await.unwrap();

        // Later pushes land in the pipe buffer until the reader has gone.
        let mut failure = None;
        for _ in 0..100 {
            if let Err(e) = h.supervisor.push("lobby", &image).await {
                failure = Some(e);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let err = failure.expect("push into a closed pipe must fail");
        assert!(matches!(err, StreamError::Write { .. }), "{err:?}");
        assert_eq!(h.launches(), 1);
        assert!(!h.supervisor.is_running("lobby"));

        h.supervisor.push("lobby", &image).await.unwrap();
        assert_eq!(h.launches(), 2);
        assert_eq!(h.supervisor.status("lobby").unwrap().incarnation, 2);

        h.supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_stop_stream_forgets_idle_slot() {
        let h = Harness::new(ShellLauncher::default());
        h.registry.provision(Some("lobby")).unwrap();
        let image = h.image("a.jpg", b"frame");

        h.supervisor.push("lobby", &image).await.unwrap();
        assert!(h.supervisor.slots.lock().contains_key("lobby"));

        assert!(h.supervisor.stop_stream("lobby"));
        assert!(!h.supervisor.slots.lock().contains_key("lobby"));
        assert!(!h.supervisor.stop_stream("lobby"));
    }

    #[tokio::test]
    async fn test_force_kill_after_shutdown() {
        let h = Harness::new(ShellLauncher::with_script(
            r#"trap '' TERM; cat "$1" > /dev/null; sleep 30"#,
        ));
        h.registry.provision(Some("stubborn")).unwrap();
        let image = h.image("a.jpg", b"frame");
        h.supervisor.push("stubborn", &image).await.unwrap();
        let pid = h.supervisor.status("stubborn").unwrap().pid;

        assert_eq!(h.supervisor.shutdown(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(pid_alive(pid));

        assert_eq!(h.supervisor.force_kill(), 1);
        eventually("encoder to die", || !pid_alive(pid)).await;
    }
}
