//! One-shot worker: claim at most one job, run its handler, record the result.

use std::panic::AssertUnwindSafe;

use anyhow::anyhow;
use futures_util::FutureExt;
use tracing::{Instrument, debug, info, info_span, warn};

use affwriter_core::JobId;

use super::handlers::{DispatchedJob, HandlerRegistry};
use super::store::{JobStore, JobStoreError};
use super::types::{JobStatus, StoredJob};

/// What a single invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Nothing was queued.
    Idle,
    /// The claimed job's handler succeeded; the job is `done`.
    Completed(JobId),
    /// The handler failed or panicked; the job is `failed` with `error`.
    Failed { id: JobId, error: String },
}

impl WorkerOutcome {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            WorkerOutcome::Idle => None,
            WorkerOutcome::Completed(id) | WorkerOutcome::Failed { id, .. } => Some(*id),
        }
    }
}

/// Store failures around a job run. Handler failures are not errors here;
/// they end up in [`WorkerOutcome::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to claim next job: {0}")]
    Claim(#[source] JobStoreError),
    #[error("failed to record {status} for job {id}: {source}")]
    Finalize {
        id: JobId,
        status: JobStatus,
        #[source]
        source: JobStoreError,
    },
}

pub struct Worker<S> {
    store: S,
    registry: HandlerRegistry,
}

impl<S: JobStore> Worker<S> {
    pub fn new(store: S, registry: HandlerRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claim the oldest queued job, if any, and run it to a terminal state.
    pub async fn run_once(&self) -> Result<WorkerOutcome, WorkerError> {
        debug!("looking for next queued job");

        let Some(job) = self.store.claim_next().await.map_err(WorkerError::Claim)? else {
            info!("no queued jobs");
            return Ok(WorkerOutcome::Idle);
        };

        let span = info_span!("job", job.id = %job.id, job.type = %job.job_type);
        self.run_claimed(job).instrument(span).await
    }

    async fn run_claimed(&self, job: StoredJob) -> Result<WorkerOutcome, WorkerError> {
        info!("starting job");

        let dispatched = DispatchedJob::from(&job);
        let handler = self.registry.resolve(&dispatched.job_type);

        let result = AssertUnwindSafe(handler.handle(&dispatched))
            .catch_unwind()
            .await
            .map_err(|panic| anyhow!(panic_message(&*panic)))
            .and_then(std::convert::identity);

        match result {
            Ok(()) => {
                self.finish(job.id, JobStatus::Done, None).await?;
                info!("job done");
                Ok(WorkerOutcome::Completed(job.id))
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(error = %error, "job failed");
                self.finish(job.id, JobStatus::Failed, Some(&error)).await?;
                Ok(WorkerOutcome::Failed { id: job.id, error })
            }
        }
    }

    async fn finish(&self, id: JobId, status: JobStatus, error: Option<&str>) -> Result<(), WorkerError> {
        self.store
            .update_status(id, status, error)
            .await
            .map_err(|source| WorkerError::Finalize { id, status, source })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        "handler panicked".to_string()
    }
}
