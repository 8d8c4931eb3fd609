//! Job handlers and type dispatch.
//!
//! A [`HandlerRegistry`] maps a job's `type` string to a [`JobHandler`].
//! Types nobody registered go to the fallback handler, which succeeds without
//! doing anything, so unknown jobs still reach `done`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use affwriter_core::JobId;

use super::payload::JobPayload;
use super::types::{StoredJob, kinds};

/// What a handler gets to see of a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedJob {
    pub id: JobId,
    pub job_type: String,
    pub model: Option<String>,
    pub payload: JobPayload,
}

impl From<&StoredJob> for DispatchedJob {
    fn from(job: &StoredJob) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            model: job.model.clone(),
            payload: job.payload(),
        }
    }
}

/// Processes one job. Returning an error marks the job failed with the
/// error's message.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &DispatchedJob) -> anyhow::Result<()>;
}

/// Type → handler table with a fallback for unregistered types.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    fallback: Arc<dyn JobHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Empty registry; every type falls through to [`NoopHandler`].
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(NoopHandler),
        }
    }

    /// The handlers the worker ships with: keyword fan-out for `info_bulk`
    /// and log-only stubs for the other admin job types.
    pub fn with_defaults(processor: Arc<dyn KeywordProcessor>) -> Self {
        let mut registry = Self::new();
        registry.register(kinds::INFO_BULK, InfoBulkHandler::new(processor));
        for kind in [kinds::AMAZON_BULK, kinds::MANUAL, kinds::SINGLE_PRODUCT] {
            registry.register(kind, StubHandler::new(kind));
        }
        registry
    }

    /// Register (or replace) the handler for `job_type`.
    pub fn register(&mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) {
        self.handlers.insert(job_type.into(), Arc::new(handler));
    }

    pub fn set_fallback(&mut self, handler: impl JobHandler + 'static) {
        self.fallback = Arc::new(handler);
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Handler for `job_type`; never fails.
    pub fn resolve(&self, job_type: &str) -> Arc<dyn JobHandler> {
        self.handlers
            .get(job_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Succeeds without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait::async_trait]
impl JobHandler for NoopHandler {
    async fn handle(&self, job: &DispatchedJob) -> anyhow::Result<()> {
        info!(job_id = %job.id, job_type = %job.job_type, "no handler registered for job type; nothing to do");
        Ok(())
    }
}

/// Placeholder for job types whose generation pipeline lives elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct StubHandler {
    kind: &'static str,
}

impl StubHandler {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

#[async_trait::async_trait]
impl JobHandler for StubHandler {
    async fn handle(&self, job: &DispatchedJob) -> anyhow::Result<()> {
        info!(job_id = %job.id, kind = self.kind, "stub handler; marking job done");
        Ok(())
    }
}

/// Receives each keyword of an `info_bulk` job.
#[async_trait::async_trait]
pub trait KeywordProcessor: Send + Sync {
    async fn process(&self, job: &DispatchedJob, keyword: &str) -> anyhow::Result<()>;
}

/// Logs each keyword and moves on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingKeywordProcessor;

#[async_trait::async_trait]
impl KeywordProcessor for LoggingKeywordProcessor {
    async fn process(&self, job: &DispatchedJob, keyword: &str) -> anyhow::Result<()> {
        info!(job_id = %job.id, model = job.model.as_deref(), keyword, "would generate info article");
        Ok(())
    }
}

/// `info_bulk`: hands every keyword, in order, to a [`KeywordProcessor`].
///
/// A keyword that fails is logged and skipped; the job itself still succeeds.
pub struct InfoBulkHandler {
    processor: Arc<dyn KeywordProcessor>,
}

impl InfoBulkHandler {
    pub fn new(processor: Arc<dyn KeywordProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait::async_trait]
impl JobHandler for InfoBulkHandler {
    async fn handle(&self, job: &DispatchedJob) -> anyhow::Result<()> {
        let keywords = job.payload.keywords();
        info!(job_id = %job.id, count = keywords.len(), "processing info_bulk keywords");

        for (idx, keyword) in keywords.iter().enumerate() {
            let position = idx + 1;
            info!(job_id = %job.id, position, keyword = %keyword, "keyword");
            if let Err(err) = self.processor.process(job, keyword).await {
                warn!(job_id = %job.id, position, keyword = %keyword, error = %err, "keyword failed; skipping");
            }
        }
        Ok(())
    }
}
