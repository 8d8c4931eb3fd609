//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use affwriter_core::{DomainError, DomainResult, JobId};

use super::payload::{JobPayload, RawPayload};

/// Well-known job types produced by the admin UI.
pub mod kinds {
    pub const INFO_BULK: &str = "info_bulk";
    pub const AMAZON_BULK: &str = "amazon_bulk";
    pub const MANUAL: &str = "manual";
    pub const SINGLE_PRODUCT: &str = "single_product";
}

/// Canonical job status, independent of how a table spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by a worker
    Queued,
    /// Claimed; handler is executing (or the worker died mid-handler)
    Running,
    /// Handler completed
    Done,
    /// Handler raised; `error` holds the description
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// States a job may be in immediately before entering `self`.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[],
            JobStatus::Running => &[JobStatus::Queued],
            JobStatus::Done | JobStatus::Failed => &[JobStatus::Running],
        }
    }

    /// Forward-only state machine. Re-applying the current state is allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        *self == next || next.predecessors().contains(self)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated job submission, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    job_type: String,
    model: Option<String>,
    payload: Map<String, Value>,
}

impl NewJob {
    /// Build a submission. The job type must be non-empty after trimming.
    pub fn new(
        job_type: impl Into<String>,
        model: Option<String>,
        payload: Map<String, Value>,
    ) -> DomainResult<Self> {
        let job_type = job_type.into().trim().to_string();
        if job_type.is_empty() {
            return Err(DomainError::validation("type required"));
        }

        let model = model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        Ok(Self {
            job_type,
            model,
            payload,
        })
    }

    /// Build a submission from loosely-typed request fields.
    ///
    /// `options`, when present and not null, must be a JSON object.
    pub fn from_request(
        job_type: Option<String>,
        model: Option<String>,
        options: Option<Value>,
    ) -> DomainResult<Self> {
        let payload = match options {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(DomainError::validation("options must be an object")),
        };
        Self::new(job_type.unwrap_or_default(), model, payload)
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Serialized payload as stored in text columns.
    pub fn payload_json(&self) -> String {
        Value::Object(self.payload.clone()).to_string()
    }
}

/// A job as read back from storage.
///
/// The payload is kept in its physical shape; call [`StoredJob::payload`] to
/// get the normalized view.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub id: JobId,
    pub job_type: String,
    pub model: Option<String>,
    pub raw_payload: RawPayload,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredJob {
    pub fn payload(&self) -> JobPayload {
        self.raw_payload.normalize()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            job_type: self.job_type.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// List-view projection of a job (no payload, no error).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub created_at: Option<DateTime<Utc>>,
}

/// Stored in `error` when a handler fails without describing why.
pub const UNDESCRIBED_FAILURE: &str = "job failed without an error message";

/// The error text persisted for a status change: only failures keep one.
pub fn error_for_status(status: JobStatus, error: Option<&str>) -> Option<String> {
    match status {
        JobStatus::Failed => Some(
            error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or(UNDESCRIBED_FAILURE)
                .to_string(),
        ),
        _ => None,
    }
}
