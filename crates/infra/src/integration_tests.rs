//! Integration tests for the job pipeline against SQLite.
//!
//! Tests: submission → SqliteJobStore → Worker → HandlerRegistry → status
//!
//! Verifies:
//! - Both table layouts go through the same state machine in their own spelling
//! - The worker claims the oldest queued job and touches nothing else
//! - Handler failures and bad payloads end in a terminal state, never a crash

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{Map, json};
    use sqlx::SqlitePool;

    use affwriter_core::{DomainError, JobId};

    use crate::config::DatabaseConfig;
    use crate::db::{connect, connect_in_memory};
    use crate::jobs::{
        DispatchedJob, HandlerRegistry, JobHandler, JobStatus, JobStore, JobTable, KeywordProcessor,
        NewJob, SqliteJobStore, Worker, WorkerOutcome, kinds,
    };

    const LEGACY_DDL: &str = r#"
        CREATE TABLE article_jobs (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            type         TEXT NOT NULL,
            options      TEXT NULL,
            integrations TEXT NULL,
            status       TEXT NOT NULL DEFAULT 'pending'
                         CHECK (status IN ('pending','processing','completed','error')),
            created_at   TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at   TEXT DEFAULT CURRENT_TIMESTAMP
        )
    "#;

    #[derive(Default)]
    struct RecordingProcessor {
        keywords: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl KeywordProcessor for RecordingProcessor {
        async fn process(&self, _job: &DispatchedJob, keyword: &str) -> anyhow::Result<()> {
            self.keywords.lock().unwrap().push(keyword.to_string());
            Ok(())
        }
    }

    struct Boom;

    #[async_trait::async_trait]
    impl JobHandler for Boom {
        async fn handle(&self, _job: &DispatchedJob) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Harness {
        store: SqliteJobStore,
        worker: Worker<SqliteJobStore>,
        processor: Arc<RecordingProcessor>,
    }

    impl Harness {
        async fn unified() -> Self {
            Self::with_registry(connect_in_memory().await.unwrap(), |_| {}).await
        }

        async fn legacy() -> Self {
            let pool = connect_in_memory().await.unwrap();
            sqlx::query(LEGACY_DDL).execute(&pool).await.unwrap();
            Self::with_registry(pool, |_| {}).await
        }

        async fn with_registry(pool: SqlitePool, customize: impl FnOnce(&mut HandlerRegistry)) -> Self {
            let store = SqliteJobStore::open(pool).await.unwrap();
            let processor = Arc::new(RecordingProcessor::default());
            let mut registry = HandlerRegistry::with_defaults(processor.clone());
            customize(&mut registry);

            Self {
                worker: Worker::new(store.clone(), registry),
                store,
                processor,
            }
        }

        async fn submit(&self, job_type: &str, options: serde_json::Value) -> JobId {
            let job = NewJob::from_request(Some(job_type.into()), None, Some(options)).unwrap();
            self.store.insert(&job).await.unwrap()
        }

        async fn raw_status(&self, id: JobId) -> String {
            let sql = format!("SELECT status FROM {} WHERE id = ?", self.store.schema().table().name());
            sqlx::query_scalar(&sql)
                .bind(id.as_i64())
                .fetch_one(self.store.pool())
                .await
                .unwrap()
        }

        async fn status(&self, id: JobId) -> JobStatus {
            self.store.get(id).await.unwrap().unwrap().status
        }
    }

    #[tokio::test]
    async fn info_bulk_job_runs_to_done_visiting_keywords_in_order() {
        let h = Harness::unified().await;
        let id = h.submit(kinds::INFO_BULK, json!({"keywords": ["a", "b"]})).await;

        assert_eq!(h.worker.run_once().await.unwrap(), WorkerOutcome::Completed(id));

        assert_eq!(h.raw_status(id).await, "done");
        assert_eq!(*h.processor.keywords.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(h.store.get(id).await.unwrap().unwrap().error, None);
    }

    #[tokio::test]
    async fn unknown_type_is_marked_done() {
        let h = Harness::unified().await;
        let id = h.submit("unknown_type", json!({})).await;

        assert_eq!(h.worker.run_once().await.unwrap(), WorkerOutcome::Completed(id));
        assert_eq!(h.status(id).await, JobStatus::Done);
    }

    #[tokio::test]
    async fn worker_picks_the_oldest_queued_job() {
        let h = Harness::unified().await;
        let first = h.submit(kinds::MANUAL, json!({})).await;
        let second = h.submit(kinds::MANUAL, json!({})).await;
        sqlx::query("UPDATE jobs SET status = 'done' WHERE id = ?")
            .bind(second.as_i64())
            .execute(h.store.pool())
            .await
            .unwrap();

        assert_eq!(h.worker.run_once().await.unwrap(), WorkerOutcome::Completed(first));
        assert_eq!(h.worker.run_once().await.unwrap(), WorkerOutcome::Idle);
    }

    #[tokio::test]
    async fn failing_handler_records_error() {
        let pool = connect_in_memory().await.unwrap();
        let h = Harness::with_registry(pool, |registry| registry.register(kinds::MANUAL, Boom)).await;
        let id = h.submit(kinds::MANUAL, json!({})).await;

        let outcome = h.worker.run_once().await.unwrap();
        assert_eq!(
            outcome,
            WorkerOutcome::Failed {
                id,
                error: "boom".into()
            }
        );

        let job = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn terminal_jobs_survive_repeated_invocations() {
        let pool = connect_in_memory().await.unwrap();
        let h = Harness::with_registry(pool, |registry| registry.register(kinds::MANUAL, Boom)).await;
        let failed = h.submit(kinds::MANUAL, json!({})).await;
        let done = h.submit(kinds::AMAZON_BULK, json!({})).await;

        h.worker.run_once().await.unwrap();
        h.worker.run_once().await.unwrap();
        for _ in 0..3 {
            assert_eq!(h.worker.run_once().await.unwrap(), WorkerOutcome::Idle);
        }

        assert_eq!(h.status(failed).await, JobStatus::Failed);
        assert_eq!(h.status(done).await, JobStatus::Done);
    }

    #[tokio::test]
    async fn malformed_payload_still_dispatches() {
        let h = Harness::unified().await;
        sqlx::query("INSERT INTO jobs (type, payload_json, status) VALUES ('info_bulk', 'not json', 'queued')")
            .execute(h.store.pool())
            .await
            .unwrap();

        let outcome = h.worker.run_once().await.unwrap();
        assert!(matches!(outcome, WorkerOutcome::Completed(_)));
        assert!(h.processor.keywords.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_type_never_reaches_the_store() {
        let h = Harness::unified().await;

        for job_type in [None, Some(""), Some("   ")] {
            let err = NewJob::from_request(job_type.map(str::to_string), None, None).unwrap_err();
            assert_eq!(err, DomainError::validation("type required"));
        }

        assert!(h.store.list_recent(200).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_share_a_job() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::with_url(format!("sqlite:{}", dir.path().join("jobs.db").display()));

        let seed = SqliteJobStore::open(connect(&config).await.unwrap()).await.unwrap();
        for _ in 0..50 {
            let job = NewJob::new(kinds::MANUAL, None, Map::new()).unwrap();
            seed.insert(&job).await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = SqliteJobStore::open(connect(&config).await.unwrap()).await.unwrap();
            tasks.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = store.claim_next().await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            }));
        }

        let mut ids = Vec::new();
        for task in futures_util::future::join_all(tasks).await {
            ids.extend(task.unwrap());
        }
        let total = ids.len();
        ids.sort();
        ids.dedup();

        assert_eq!(total, 50);
        assert_eq!(ids.len(), 50);
        assert!(seed.fetch_next_queued().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blob_payload_is_read_as_text() {
        let h = Harness::unified().await;
        // {"keywords":["a"]}
        sqlx::query("INSERT INTO jobs (type, payload_json, status) VALUES ('info_bulk', X'7B226B6579776F726473223A5B2261225D7D', 'queued')")
            .execute(h.store.pool())
            .await
            .unwrap();

        let outcome = h.worker.run_once().await.unwrap();
        let id = outcome.job_id().unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed(id));
        assert_eq!(h.raw_status(id).await, "done");
        assert_eq!(*h.processor.keywords.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn undecodable_payload_bytes_still_reach_done() {
        let h = Harness::legacy().await;
        sqlx::query("INSERT INTO article_jobs (type, options, integrations, status) VALUES ('info_bulk', X'FFFE00', X'80', 'pending')")
            .execute(h.store.pool())
            .await
            .unwrap();

        let outcome = h.worker.run_once().await.unwrap();
        let id = outcome.job_id().unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed(id));
        assert_eq!(h.raw_status(id).await, "completed");
        assert!(h.processor.keywords.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn legacy_table_uses_its_own_status_spelling() {
        let h = Harness::legacy().await;
        assert_eq!(h.store.schema().table(), JobTable::Legacy);

        let id = h.submit(kinds::INFO_BULK, json!({"keywords": ["x", "y"]})).await;
        assert_eq!(h.raw_status(id).await, "pending");

        let (options, integrations): (String, String) =
            sqlx::query_as("SELECT options, integrations FROM article_jobs WHERE id = ?")
                .bind(id.as_i64())
                .fetch_one(h.store.pool())
                .await
                .unwrap();
        assert_eq!(options, r#"{"keywords":["x","y"]}"#);
        assert_eq!(integrations, "{}");

        assert_eq!(h.worker.run_once().await.unwrap(), WorkerOutcome::Completed(id));
        assert_eq!(h.raw_status(id).await, "completed");
        assert_eq!(*h.processor.keywords.lock().unwrap(), vec!["x", "y"]);

        let listed = h.store.list_recent(200).await.unwrap();
        assert_eq!(listed[0].status, JobStatus::Done);
    }

    #[tokio::test]
    async fn legacy_failure_without_error_column_still_fails() {
        let pool = connect_in_memory().await.unwrap();
        sqlx::query(LEGACY_DDL).execute(&pool).await.unwrap();
        let h = Harness::with_registry(pool, |registry| registry.register(kinds::MANUAL, Boom)).await;
        let id = h.submit(kinds::MANUAL, json!({})).await;

        assert!(matches!(
            h.worker.run_once().await.unwrap(),
            WorkerOutcome::Failed { .. }
        ));
        assert_eq!(h.raw_status(id).await, "error");
        assert_eq!(h.store.get(id).await.unwrap().unwrap().error, None);
    }

    #[tokio::test]
    async fn legacy_table_with_error_column_keeps_the_message() {
        let ddl = r#"
            CREATE TABLE article_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                model TEXT NULL,
                options TEXT NULL,
                integrations TEXT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending','processing','completed','error')),
                error TEXT NULL
            )
        "#;
        let pool = connect_in_memory().await.unwrap();
        sqlx::query(ddl).execute(&pool).await.unwrap();
        let h = Harness::with_registry(pool, |registry| registry.register(kinds::MANUAL, Boom)).await;

        let job = NewJob::new(kinds::MANUAL, Some("gpt-4o".into()), Map::new()).unwrap();
        let id = h.store.insert(&job).await.unwrap();

        h.worker.run_once().await.unwrap();

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.model.as_deref(), Some("gpt-4o"));
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert_eq!(stored.created_at, None);
    }

    #[tokio::test]
    async fn legacy_rows_with_garbage_options_are_processed() {
        let h = Harness::legacy().await;
        sqlx::query("INSERT INTO article_jobs (type, options, integrations, status) VALUES ('info_bulk', '{oops', NULL, 'pending')")
            .execute(h.store.pool())
            .await
            .unwrap();

        let job = h.store.fetch_next_queued().await.unwrap().unwrap();
        let payload = job.payload();
        assert!(payload.options().unwrap().is_empty());
        assert!(payload.integrations().unwrap().is_empty());

        assert!(matches!(
            h.worker.run_once().await.unwrap(),
            WorkerOutcome::Completed(_)
        ));
    }
}
