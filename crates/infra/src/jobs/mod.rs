//! Job queue: submission, storage, and the one-shot worker.
//!
//! ## Components
//!
//! - `schema`: detects the job table (`jobs` or legacy `article_jobs`) and its
//!   status spelling
//! - `JobStore`: persistence (`SqliteJobStore`, `InMemoryJobStore`)
//! - `payload`: turns stored payload columns into one `JobPayload`
//! - `HandlerRegistry`: `type` → `JobHandler`, with a no-op fallback
//! - `Worker`: claims one job, dispatches it, records `done`/`failed`

pub mod handlers;
pub mod layout;
pub mod payload;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod types;
pub mod worker;

pub use handlers::{
    DispatchedJob, HandlerRegistry, InfoBulkHandler, JobHandler, KeywordProcessor,
    LoggingKeywordProcessor, NoopHandler, StubHandler,
};
pub use layout::{JobTableLayout, LegacyLayout, UnifiedLayout};
pub use payload::{JobPayload, RawPayload};
pub use schema::{JobSchema, JobTable, SchemaError, StatusVocabulary, TableColumns};
pub use sqlite::SqliteJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{JobStatus, JobSummary, NewJob, StoredJob, kinds};
pub use worker::{Worker, WorkerError, WorkerOutcome};
