use std::sync::Arc;

use anyhow::Context;

use affwriter_infra::config::DatabaseConfig;
use affwriter_infra::db;
use affwriter_infra::jobs::{InMemoryJobStore, JobStore, SqliteJobStore};

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppServices {
    jobs: Arc<dyn JobStore>,
}

impl AppServices {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Services backed by an in-memory store (tests/dev).
    pub fn in_memory() -> Self {
        Self::new(InMemoryJobStore::arc())
    }

    pub fn jobs(&self) -> &dyn JobStore {
        self.jobs.as_ref()
    }
}

/// Connect to the configured database and bind the job store to whichever
/// job table it has (creating `jobs` if there is none).
pub async fn build_services(config: &DatabaseConfig) -> anyhow::Result<AppServices> {
    let pool = db::connect(config)
        .await
        .with_context(|| format!("failed to open database {}", config.url))?;

    let store = SqliteJobStore::open(pool)
        .await
        .context("failed to detect job table")?;

    tracing::info!(table = %store.schema().table(), "job store ready");
    Ok(AppServices::new(Arc::new(store)))
}
