use serde::{Deserialize, Serialize};
use serde_json::Value;

use affwriter_core::JobId;
use affwriter_infra::jobs::JobSummary;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /api/jobs/start`. Every field is optional at the wire level;
/// validation happens when building the `NewJob`.
#[derive(Debug, Default, Deserialize)]
pub struct StartJobRequest {
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub model: Option<String>,
    pub options: Option<Value>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub ok: bool,
    pub id: JobId,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub data: Vec<JobSummary>,
}
