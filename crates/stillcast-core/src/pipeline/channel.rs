//! Bounded job queue between the change watcher and the worker pool.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::types::Job;

/// Producer half of the job queue.
pub type JobSender = mpsc::Sender<Job>;

/// Consumer half of the job queue, shared by every worker.
///
/// Workers take turns holding the lock while waiting, which turns the
/// single-consumer channel into a multi-consumer one.
#[derive(Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobReceiver {
    /// Receive the next job; `None` once every sender is gone.
    pub async fn recv(&self) -> Option<Job> {
        self.inner.lock().await.recv().await
    }
}

/// Create the job queue with the configured capacity.
///
/// When the buffer is full, senders wait, which pushes back on the
/// filesystem event source instead of growing memory.
pub fn job_queue(config: &PipelineConfig) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(config.buffer_size);
    (
        tx,
        JobReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Send a job, waiting for space while still honouring cancellation.
///
/// Returns false if the job was not delivered (cancelled or queue closed).
pub async fn emit(jobs: &JobSender, job: Job, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = jobs.send(job) => sent.is_ok(),
    }
}
