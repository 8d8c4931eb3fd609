//! Runs at most one queued job and exits.
//!
//! Meant to be invoked by cron or a process supervisor. Exits 0 when the
//! queue was empty or a job reached a terminal state (including `failed`);
//! non-zero when configuration, the database, or the job table is unusable.

use std::sync::Arc;

use anyhow::Context;

use affwriter_infra::config::DatabaseConfig;
use affwriter_infra::db;
use affwriter_infra::jobs::{HandlerRegistry, LoggingKeywordProcessor, SqliteJobStore, Worker, WorkerOutcome};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    affwriter_observability::init();

    let config = DatabaseConfig::from_env().context("invalid database configuration")?;
    let pool = db::connect(&config)
        .await
        .with_context(|| format!("failed to open database {}", config.url))?;

    let outcome = run(pool.clone()).await;
    pool.close().await;

    let outcome = outcome.inspect_err(|err| tracing::error!(error = %format!("{err:#}"), "worker aborted"))?;
    match outcome {
        WorkerOutcome::Idle => tracing::info!("worker finished: no work"),
        WorkerOutcome::Completed(id) => tracing::info!(job_id = %id, "worker finished: job done"),
        WorkerOutcome::Failed { id, error } => {
            tracing::warn!(job_id = %id, error = %error, "worker finished: job failed")
        }
    }
    Ok(())
}

async fn run(pool: db::SqlitePool) -> anyhow::Result<WorkerOutcome> {
    let store = SqliteJobStore::open(pool).await.context("failed to detect job table")?;
    let registry = HandlerRegistry::with_defaults(Arc::new(LoggingKeywordProcessor));

    let outcome = Worker::new(store, registry).run_once().await?;
    Ok(outcome)
}
