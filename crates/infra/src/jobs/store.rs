//! Job storage abstraction and the in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use affwriter_core::JobId;

use super::payload::RawPayload;
use super::types::{JobStatus, JobSummary, NewJob, StoredJob, error_for_status};

/// Job store abstraction.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `queued` state and return its id.
    async fn insert(&self, job: &NewJob) -> Result<JobId, JobStoreError>;

    /// The queued job with the smallest id, without claiming it.
    async fn fetch_next_queued(&self) -> Result<Option<StoredJob>, JobStoreError>;

    /// Atomically move the oldest queued job to `running` and return it.
    ///
    /// Two concurrent callers never receive the same job.
    async fn claim_next(&self) -> Result<Option<StoredJob>, JobStoreError>;

    /// Set a job's status. `error` is kept only for `failed` and cleared
    /// otherwise. Re-applying the current status is a no-op apart from the
    /// timestamp; backward moves are rejected.
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Option<StoredJob>, JobStoreError>;

    /// Newest jobs first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<JobSummary>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {id} has unrecognised status {value:?}")]
    UnknownStatus { id: JobId, value: String },
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev. Uses the canonical status spelling.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    last_id: i64,
    jobs: BTreeMap<JobId, StoredJob>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, JobStoreError> {
        self.state
            .read()
            .map_err(|_| JobStoreError::Storage("in-memory job store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, JobStoreError> {
        self.state
            .write()
            .map_err(|_| JobStoreError::Storage("in-memory job store lock poisoned".to_string()))
    }
}

impl State {
    fn oldest_queued(&self) -> Option<JobId> {
        self.jobs
            .values()
            .find(|j| j.status == JobStatus::Queued)
            .map(|j| j.id)
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &NewJob) -> Result<JobId, JobStoreError> {
        let mut state = self.write()?;
        state.last_id += 1;
        let id = JobId::new(state.last_id);
        let now = Utc::now();

        state.jobs.insert(
            id,
            StoredJob {
                id,
                job_type: job.job_type().to_string(),
                model: job.model().map(str::to_string),
                raw_payload: RawPayload::Unified {
                    payload: Some(job.payload_json()),
                },
                status: JobStatus::Queued,
                error: None,
                created_at: Some(now),
                updated_at: Some(now),
            },
        );
        Ok(id)
    }

    async fn fetch_next_queued(&self) -> Result<Option<StoredJob>, JobStoreError> {
        let state = self.read()?;
        Ok(state.oldest_queued().and_then(|id| state.jobs.get(&id).cloned()))
    }

    async fn claim_next(&self) -> Result<Option<StoredJob>, JobStoreError> {
        let mut state = self.write()?;
        let Some(id) = state.oldest_queued() else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Running;
        job.updated_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), JobStoreError> {
        let mut state = self.write()?;
        let job = state.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;

        if !job.status.can_transition_to(status) {
            return Err(JobStoreError::InvalidTransition {
                id,
                from: job.status,
                to: status,
            });
        }

        job.status = status;
        job.error = error_for_status(status, error);
        job.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<StoredJob>, JobStoreError> {
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobSummary>, JobStoreError> {
        let state = self.read()?;
        Ok(state
            .jobs
            .values()
            .rev()
            .take(limit)
            .map(StoredJob::summary)
            .collect())
    }
}

#[async_trait::async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn insert(&self, job: &NewJob) -> Result<JobId, JobStoreError> {
        (**self).insert(job).await
    }

    async fn fetch_next_queued(&self) -> Result<Option<StoredJob>, JobStoreError> {
        (**self).fetch_next_queued().await
    }

    async fn claim_next(&self) -> Result<Option<StoredJob>, JobStoreError> {
        (**self).claim_next().await
    }

    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), JobStoreError> {
        (**self).update_status(id, status, error).await
    }

    async fn get(&self, id: JobId) -> Result<Option<StoredJob>, JobStoreError> {
        (**self).get(id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobSummary>, JobStoreError> {
        (**self).list_recent(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn new_job(job_type: &str) -> NewJob {
        NewJob::new(job_type, None, Map::new()).unwrap()
    }

    #[tokio::test]
    async fn insert_and_claim() {
        let store = InMemoryJobStore::new();

        let id = store.insert(&new_job("manual")).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Running);

        // No more jobs
        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_next_queued_skips_non_queued_jobs() {
        let store = InMemoryJobStore::new();
        let first = store.insert(&new_job("manual")).await.unwrap();
        let second = store.insert(&new_job("manual")).await.unwrap();

        store.claim_next().await.unwrap();

        let next = store.fetch_next_queued().await.unwrap().unwrap();
        assert_eq!(next.id, second);
        assert_eq!(next.status, JobStatus::Queued);
        assert_eq!(store.get(first).await.unwrap().unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn update_status_enforces_forward_transitions() {
        let store = InMemoryJobStore::new();
        let id = store.insert(&new_job("manual")).await.unwrap();

        let err = store.update_status(id, JobStatus::Done, None).await.unwrap_err();
        assert_eq!(
            err,
            JobStoreError::InvalidTransition {
                id,
                from: JobStatus::Queued,
                to: JobStatus::Done
            }
        );

        store.claim_next().await.unwrap();
        store.update_status(id, JobStatus::Failed, Some("boom")).await.unwrap();
        store.update_status(id, JobStatus::Failed, Some("boom")).await.unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));

        assert!(store.update_status(id, JobStatus::Queued, None).await.is_err());
    }

    #[tokio::test]
    async fn update_status_of_unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let err = store
            .update_status(JobId::new(99), JobStatus::Running, None)
            .await
            .unwrap_err();
        assert_eq!(err, JobStoreError::NotFound(JobId::new(99)));
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_limited() {
        let store = InMemoryJobStore::arc();
        for kind in ["a", "b", "c"] {
            store.insert(&new_job(kind)).await.unwrap();
        }

        let listed = store.list_recent(2).await.unwrap();
        let types: Vec<_> = listed.iter().map(|j| j.job_type.as_str()).collect();
        assert_eq!(types, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn stored_payload_round_trips_through_normalizer() {
        let store = InMemoryJobStore::new();
        let payload = json!({"keywords": ["x", "y"]});
        let job = NewJob::from_request(Some("info_bulk".into()), None, Some(payload)).unwrap();

        let id = store.insert(&job).await.unwrap();

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.payload().keywords(), vec!["x", "y"]);
    }
}
