//! Worker pool: pull jobs, resolve their stream, push into the encoder.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::channel::JobReceiver;
use crate::stream::{StreamRegistry, Supervisor};
use crate::types::Job;

/// Fixed set of workers sharing one job queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

/// Everything a worker needs to handle a job.
#[derive(Clone)]
struct WorkerContext {
    registry: Arc<StreamRegistry>,
    supervisor: Arc<Supervisor>,
    auto_provision: bool,
}

impl WorkerPool {
    /// Spawn `count` workers. They run until `cancel` fires or the queue closes.
    ///
    /// With `auto_provision`, jobs for unregistered streams provision the
    /// stream instead of being dropped.
    pub fn spawn(
        count: usize,
        jobs: JobReceiver,
        registry: Arc<StreamRegistry>,
        supervisor: Arc<Supervisor>,
        auto_provision: bool,
        cancel: CancellationToken,
    ) -> Self {
        let ctx = WorkerContext {
            registry,
            supervisor,
            auto_provision,
        };
        let handles = (0..count.max(1))
            .map(|id| tokio::spawn(work(id, jobs.clone(), ctx.clone(), cancel.clone())))
            .collect();

        tracing::info!("Started {} workers", count.max(1));
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to return. A job already pulled finishes first.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!("Worker task failed: {}", e);
            }
        }
    }
}

async fn work(id: usize, jobs: JobReceiver, ctx: WorkerContext, cancel: CancellationToken) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => job,
        };
        let Some(job) = job else {
            break;
        };
        ctx.handle(job).await;
    }
    tracing::debug!("Worker {} stopped", id);
}

impl WorkerContext {
    async fn handle(&self, job: Job) {
        let entry = match self.registry.resolve(&job.stream_id) {
            Some(entry) => entry,
            None if self.auto_provision => match self.registry.provision(Some(&job.stream_id)) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Dropping {:?}: {}", job.source_path, e);
                    return;
                }
            },
            None => {
                tracing::warn!(
                    "Dropping {:?}: unknown stream {}",
                    job.source_path,
                    job.stream_id
                );
                return;
            }
        };

        match self.supervisor.push_to(&entry, &job.source_path).await {
            Ok(()) => tracing::debug!("Pushed {:?} into {}", job.source_path, job.stream_id),
            Err(e) if e.is_transient() => {
                tracing::warn!("Dropping {:?}: {}", job.source_path, e)
            }
            Err(e) => tracing::error!("Push into {} failed: {}", job.stream_id, e),
        }
    }
}
