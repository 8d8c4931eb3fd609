//! SQLite-backed job store.
//!
//! Works against whichever job table [`JobSchema::detect`] picked. Statuses are
//! written with the table's own spelling and read back as canonical
//! [`JobStatus`] values.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use affwriter_core::JobId;

use super::schema::{JobSchema, SchemaError};
use super::store::{JobStore, JobStoreError};
use super::types::{JobStatus, JobSummary, NewJob, StoredJob, error_for_status};

/// Timestamp layout written to `created_at`/`updated_at`, same as SQLite's
/// `CURRENT_TIMESTAMP`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite job store bound to a detected schema.
///
/// Cheap to clone: the pool and the schema are shared.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    schema: Arc<JobSchema>,
}

impl SqliteJobStore {
    /// Detect the job table (creating it if needed) and bind a store to it.
    pub async fn open(pool: SqlitePool) -> Result<Self, SchemaError> {
        let schema = JobSchema::detect(&pool).await?;
        Ok(Self::with_schema(pool, schema))
    }

    pub fn with_schema(pool: SqlitePool, schema: JobSchema) -> Self {
        Self {
            pool,
            schema: Arc::new(schema),
        }
    }

    pub fn schema(&self) -> &JobSchema {
        &self.schema
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn table(&self) -> &'static str {
        self.schema.table().name()
    }

    fn concrete(&self, status: JobStatus) -> &str {
        self.schema.vocabulary().concrete(status)
    }

    fn has_column(&self, name: &str) -> bool {
        self.schema.columns().has(name)
    }

    /// Select list shared by every query returning a full [`StoredJob`].
    fn job_columns(&self) -> String {
        let columns = self.schema.columns();
        format!(
            "id, type, status, {}, {}, {}, {}",
            columns.select_or_null("error"),
            columns.select_or_null("created_at"),
            columns.select_or_null("updated_at"),
            self.schema.layout().payload_select(columns),
        )
    }

    fn status_from_row(&self, id: JobId, row: &SqliteRow) -> Result<JobStatus, JobStoreError> {
        let value: String = row
            .try_get("status")
            .map_err(|e| map_sqlx_error("decode status", e))?;
        self.schema
            .vocabulary()
            .canonical_for(&value)
            .ok_or(JobStoreError::UnknownStatus { id, value })
    }

    fn decode_job(&self, row: &SqliteRow) -> Result<StoredJob, JobStoreError> {
        let decode = |e| map_sqlx_error("decode job row", e);

        let id = JobId::new(row.try_get::<i64, _>("id").map_err(decode)?);
        let status = self.status_from_row(id, row)?;
        let (model, raw_payload) = self.schema.layout().decode_payload(row);

        Ok(StoredJob {
            id,
            job_type: row.try_get("type").map_err(decode)?,
            model,
            raw_payload,
            status,
            error: row.try_get("error").map_err(decode)?,
            created_at: read_timestamp(row, "created_at"),
            updated_at: read_timestamp(row, "updated_at"),
        })
    }

    /// Work out why a conditional status update matched no row.
    async fn rejected_update(&self, id: JobId, to: JobStatus) -> JobStoreError {
        let sql = format!("SELECT status FROM {} WHERE id = ?", self.table());
        let current = sqlx::query_scalar::<_, String>(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await;

        match current {
            Err(e) => map_sqlx_error("update_status", e),
            Ok(None) => JobStoreError::NotFound(id),
            Ok(Some(value)) => match self.schema.vocabulary().canonical_for(&value) {
                Some(from) => JobStoreError::InvalidTransition { id, from, to },
                None => JobStoreError::UnknownStatus { id, value },
            },
        }
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    #[instrument(skip_all, fields(table = self.table(), job_type = job.job_type()), err)]
    async fn insert(&self, job: &NewJob) -> Result<JobId, JobStoreError> {
        let mut names = vec!["type", "status"];
        let mut values = vec![
            Some(job.job_type().to_string()),
            Some(self.concrete(JobStatus::Queued).to_string()),
        ];

        for (name, value) in self.schema.layout().insert_values(job, self.schema.columns()) {
            names.push(name);
            values.push(value);
        }

        let now = format_timestamp(Utc::now());
        for column in ["created_at", "updated_at"] {
            if self.has_column(column) {
                names.push(column);
                values.push(Some(now.clone()));
            }
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
            self.table(),
            names.join(", "),
            vec!["?"; names.len()].join(", "),
        );

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in values {
            query = query.bind(value);
        }

        let id = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?;

        Ok(JobId::new(id))
    }

    #[instrument(skip_all, fields(table = self.table()), err)]
    async fn fetch_next_queued(&self) -> Result<Option<StoredJob>, JobStoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE status = ? ORDER BY id ASC LIMIT 1",
            self.job_columns(),
            self.table(),
        );

        let row = sqlx::query(&sql)
            .bind(self.concrete(JobStatus::Queued))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_next_queued", e))?;

        row.as_ref().map(|r| self.decode_job(r)).transpose()
    }

    #[instrument(skip_all, fields(table = self.table()), err)]
    async fn claim_next(&self) -> Result<Option<StoredJob>, JobStoreError> {
        let table = self.table();
        let touch = if self.has_column("updated_at") {
            ", updated_at = ?"
        } else {
            ""
        };

        // Single statement: the row is only updated if it is still queued, so
        // a concurrent claimer either gets another row or nothing.
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = ?{touch}
            WHERE id = (SELECT id FROM {table} WHERE status = ? ORDER BY id ASC LIMIT 1)
              AND status = ?
            RETURNING {columns}
            "#,
            columns = self.job_columns(),
        );

        let queued = self.concrete(JobStatus::Queued);
        let mut query = sqlx::query(&sql).bind(self.concrete(JobStatus::Running));
        if !touch.is_empty() {
            query = query.bind(format_timestamp(Utc::now()));
        }

        let row = query
            .bind(queued)
            .bind(queued)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;

        let job = row.as_ref().map(|r| self.decode_job(r)).transpose()?;
        if let Some(job) = &job {
            tracing::debug!(job_id = %job.id, job_type = %job.job_type, "claimed job");
        }
        Ok(job)
    }

    #[instrument(skip_all, fields(table = self.table(), job_id = %id, status = %status), err)]
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), JobStoreError> {
        let mut assignments = vec!["status = ?"];
        let mut values = vec![Some(self.concrete(status).to_string())];

        if self.has_column("error") {
            assignments.push("error = ?");
            values.push(error_for_status(status, error));
        }
        if self.has_column("updated_at") {
            assignments.push("updated_at = ?");
            values.push(Some(format_timestamp(Utc::now())));
        }

        // Only rows currently in the target state or one of its predecessors
        // match, which keeps the state machine forward-only.
        let allowed: Vec<&str> = std::iter::once(status)
            .chain(status.predecessors().iter().copied())
            .map(|s| self.concrete(s))
            .collect();

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? AND status IN ({})",
            self.table(),
            assignments.join(", "),
            vec!["?"; allowed.len()].join(", "),
        );

        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        query = query.bind(id.as_i64());
        for value in allowed {
            query = query.bind(value);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_status", e))?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_update(id, status).await);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(table = self.table(), job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<StoredJob>, JobStoreError> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?", self.job_columns(), self.table());

        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(|r| self.decode_job(r)).transpose()
    }

    #[instrument(skip_all, fields(table = self.table()), err)]
    async fn list_recent(&self, limit: usize) -> Result<Vec<JobSummary>, JobStoreError> {
        let sql = format!(
            "SELECT id, type, status, {} FROM {} ORDER BY id DESC LIMIT ?",
            self.schema.columns().select_or_null("created_at"),
            self.table(),
        );

        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_recent", e))?;

        let decode = |e| map_sqlx_error("decode job summary", e);
        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = JobId::new(row.try_get::<i64, _>("id").map_err(decode)?);
            summaries.push(JobSummary {
                id,
                job_type: row.try_get("type").map_err(decode)?,
                status: self.status_from_row(id, row)?,
                created_at: read_timestamp(row, "created_at"),
            });
        }
        Ok(summaries)
    }
}

fn read_timestamp(row: &SqliteRow, column: &str) -> Option<DateTime<Utc>> {
    match row.try_get_unchecked::<Option<String>, _>(column) {
        Ok(text) => text.as_deref().and_then(parse_timestamp),
        Err(e) => {
            tracing::warn!(column, error = %e, "unreadable timestamp, treating as absent");
            None
        }
    }
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD HH:MM:SS[.fff]` (either separator) and RFC 3339.
pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|at| at.with_timezone(&Utc))
        })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
