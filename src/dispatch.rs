use crate::ledger::JobRecord;
use crate::replication::Orchestrator;
use std::sync::Arc;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::info;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch worker is not available")]
    WorkerUnavailable,
}

/// Hands accepted jobs to the engine. The channel bounds how many accepted
/// jobs can be waiting; each received job runs in its own task so a slow job
/// never serializes the ones behind it. The ledger row already exists by the
/// time a job is enqueued, so a crash here leaves an observable in-progress
/// record rather than a lost request.
#[derive(Clone)]
pub struct JobDispatcher {
    tx: mpsc::Sender<JobRecord>,
}

impl JobDispatcher {
    pub fn spawn(orchestrator: Arc<Orchestrator>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<JobRecord>(queue_capacity_from_env());

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                info!(
                    target = "crosslist.engine",
                    job_id = %job.id,
                    "job dispatched"
                );
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator.run_job(job).await;
                });
            }
        });

        (Self { tx }, handle)
    }

    pub async fn enqueue(&self, job: JobRecord) -> Result<(), DispatchError> {
        self.tx
            .send(job)
            .await
            .map_err(|_| DispatchError::WorkerUnavailable)
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}
