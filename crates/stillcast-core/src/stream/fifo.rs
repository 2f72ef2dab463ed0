//! Named pipe helpers for feeding encoders.

use std::io;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use tokio::net::unix::pipe;

use crate::error::{StreamError, StreamResult};

const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Create a named pipe at `path`. An existing pipe is reused.
pub fn create_fifo(path: &Path) -> StreamResult<()> {
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) => Ok(()),
        Err(Errno::EEXIST) => {
            if is_fifo(path) {
                Ok(())
            } else {
                Err(StreamError::Pipe {
                    path: path.to_path_buf(),
                    message: "path exists and is not a named pipe".to_string(),
                })
            }
        }
        Err(e) => Err(StreamError::Pipe {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

/// True if `path` is an existing named pipe.
pub fn is_fifo(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    std::fs::metadata(path)
        .map(|meta| meta.file_type().is_fifo())
        .unwrap_or(false)
}

/// Outcome of waiting for a reader to appear on the pipe.
pub(crate) enum OpenOutcome {
    Opened(pipe::Sender),
    ReaderGone,
    TimedOut,
}

/// Open the write end of `path` once a reader has opened it.
///
/// A non-blocking open fails with ENXIO until the encoder opens its input,
/// so the open is retried until it succeeds, `reader_gone` resolves, or the
/// timeout elapses.
pub(crate) async fn open_writer<F>(
    path: &Path,
    timeout: Duration,
    reader_gone: F,
) -> io::Result<OpenOutcome>
where
    F: std::future::Future<Output = ()>,
{
    tokio::pin!(reader_gone);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(sender) => return Ok(OpenOutcome::Opened(sender)),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {}
            Err(e) => return Err(e),
        }

        if tokio::time::Instant::now() >= deadline {
            return Ok(OpenOutcome::TimedOut);
        }

        tokio::select! {
            _ = &mut reader_gone => return Ok(OpenOutcome::ReaderGone),
            _ = tokio::time::sleep(OPEN_RETRY_INTERVAL) => {}
        }
    }
}
