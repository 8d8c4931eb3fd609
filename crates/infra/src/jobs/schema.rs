//! Schema adapter: works out which job table a database has and how it spells
//! job statuses.
//!
//! Two physical layouts exist in deployed databases:
//!
//! | Table | Payload columns | Status spelling |
//! |-------|-----------------|-----------------|
//! | `jobs` | `payload_json` | `queued / running / done / failed` |
//! | `article_jobs` (legacy) | `options`, `integrations` | usually `pending / processing / completed / error` |
//!
//! [`JobSchema::detect`] probes the database once and the result is reused for
//! the rest of the invocation. Every probe failure is a [`SchemaError`]; the
//! worker treats it as fatal and touches no job.

use std::collections::BTreeSet;
use std::sync::Arc;

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::instrument;

use super::layout::{JobTableLayout, LegacyLayout, UnifiedLayout};
use super::types::JobStatus;

/// Schema probing/creation failure.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema introspection failed during {operation}: {source}")]
    Introspection {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("table {table} is missing required column(s): {}", .missing.join(", "))]
    MissingColumns {
        table: &'static str,
        missing: Vec<&'static str>,
    },
}

fn introspection(operation: &'static str) -> impl FnOnce(sqlx::Error) -> SchemaError {
    move |source| SchemaError::Introspection { operation, source }
}

/// Which physical job table is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobTable {
    /// `jobs`: one payload column, canonical status spelling.
    Unified,
    /// `article_jobs`: split options/integrations, synonym status spelling.
    Legacy,
}

impl JobTable {
    pub fn name(&self) -> &'static str {
        match self {
            JobTable::Unified => "jobs",
            JobTable::Legacy => "article_jobs",
        }
    }

    /// Strategy object that knows this table's payload columns.
    pub fn layout(&self) -> Arc<dyn JobTableLayout> {
        match self {
            JobTable::Unified => Arc::new(UnifiedLayout),
            JobTable::Legacy => Arc::new(LegacyLayout),
        }
    }
}

impl std::fmt::Display for JobTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Mapping from canonical status to the spelling a table stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusVocabulary {
    queued: String,
    running: String,
    done: String,
    failed: String,
}

impl Default for StatusVocabulary {
    fn default() -> Self {
        Self::canonical()
    }
}

impl StatusVocabulary {
    /// Identity mapping (`queued → queued`, …).
    pub fn canonical() -> Self {
        Self {
            queued: JobStatus::Queued.as_str().to_string(),
            running: JobStatus::Running.as_str().to_string(),
            done: JobStatus::Done.as_str().to_string(),
            failed: JobStatus::Failed.as_str().to_string(),
        }
    }

    /// Alternative spelling used by legacy tables.
    pub fn synonym(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Queued => "pending",
            JobStatus::Running => "processing",
            JobStatus::Done => "completed",
            JobStatus::Failed => "error",
        }
    }

    /// Resolve a mapping from a column's declared value set.
    ///
    /// Per state: the canonical spelling if declared, else its synonym if
    /// declared, else the canonical spelling. An empty declaration (a plain
    /// TEXT column) therefore resolves to [`StatusVocabulary::canonical`].
    pub fn resolve(declared: &[String]) -> Self {
        let pick = |status: JobStatus| -> String {
            let canonical = status.as_str();
            let synonym = Self::synonym(status);
            if declared.iter().any(|v| v == canonical) {
                canonical.to_string()
            } else if declared.iter().any(|v| v == synonym) {
                synonym.to_string()
            } else {
                canonical.to_string()
            }
        };

        Self {
            queued: pick(JobStatus::Queued),
            running: pick(JobStatus::Running),
            done: pick(JobStatus::Done),
            failed: pick(JobStatus::Failed),
        }
    }

    pub fn concrete(&self, status: JobStatus) -> &str {
        match status {
            JobStatus::Queued => &self.queued,
            JobStatus::Running => &self.running,
            JobStatus::Done => &self.done,
            JobStatus::Failed => &self.failed,
        }
    }

    /// Canonical status for a stored value.
    ///
    /// Exact matches against this mapping win; otherwise any canonical or
    /// synonym spelling is accepted so rows written by older tooling still read.
    pub fn canonical_for(&self, concrete: &str) -> Option<JobStatus> {
        JobStatus::ALL
            .into_iter()
            .find(|s| self.concrete(*s) == concrete)
            .or_else(|| {
                JobStatus::ALL
                    .into_iter()
                    .find(|s| s.as_str() == concrete || Self::synonym(*s) == concrete)
            })
    }

    /// The four canonical → concrete entries.
    pub fn entries(&self) -> [(JobStatus, &str); 4] {
        JobStatus::ALL.map(|s| (s, self.concrete(s)))
    }
}

/// Column names present on a job table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableColumns(BTreeSet<String>);

impl TableColumns {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|n| n.into().to_ascii_lowercase()).collect())
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.contains(&name.to_ascii_lowercase())
    }

    /// `name` when the column exists, `NULL AS name` otherwise.
    pub fn select_or_null(&self, name: &str) -> String {
        if self.has(name) {
            name.to_string()
        } else {
            format!("NULL AS {name}")
        }
    }

    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required.iter().copied().filter(|c| !self.has(c)).collect()
    }
}

/// Everything the store needs to know about the job table, probed once.
#[derive(Debug, Clone)]
pub struct JobSchema {
    layout: Arc<dyn JobTableLayout>,
    vocabulary: StatusVocabulary,
    columns: TableColumns,
}

impl JobSchema {
    pub fn new(
        layout: Arc<dyn JobTableLayout>,
        vocabulary: StatusVocabulary,
        columns: TableColumns,
    ) -> Self {
        Self {
            layout,
            vocabulary,
            columns,
        }
    }

    /// Probe the database: pick (or create) the table, read its columns and
    /// resolve its status vocabulary.
    #[instrument(skip(pool), err)]
    pub async fn detect(pool: &SqlitePool) -> Result<Self, SchemaError> {
        let table = detect_job_table(pool).await?;
        let columns = detect_columns(pool, table).await?;
        let layout = table.layout();

        let missing = columns.missing(layout.required_columns());
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns {
                table: table.name(),
                missing,
            });
        }

        let vocabulary = detect_status_vocabulary(pool, table).await?;

        tracing::info!(
            table = %table,
            queued = vocabulary.concrete(JobStatus::Queued),
            running = vocabulary.concrete(JobStatus::Running),
            done = vocabulary.concrete(JobStatus::Done),
            failed = vocabulary.concrete(JobStatus::Failed),
            has_error_column = columns.has("error"),
            "job schema detected"
        );

        Ok(Self::new(layout, vocabulary, columns))
    }

    pub fn table(&self) -> JobTable {
        self.layout.table()
    }

    pub fn layout(&self) -> &dyn JobTableLayout {
        self.layout.as_ref()
    }

    pub fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    pub fn columns(&self) -> &TableColumns {
        &self.columns
    }
}

/// DDL for the unified table, used when a database has neither table.
pub const CREATE_UNIFIED_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        type         TEXT NOT NULL,
        model        TEXT NULL,
        payload_json TEXT NULL,
        status       TEXT NOT NULL DEFAULT 'queued'
                     CHECK (status IN ('queued','running','done','failed')),
        error        TEXT NULL,
        created_at   TEXT DEFAULT CURRENT_TIMESTAMP,
        updated_at   TEXT DEFAULT CURRENT_TIMESTAMP
    )
"#;

pub async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool, sqlx::Error> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// `jobs` if present, else `article_jobs` if present, else create `jobs`.
#[instrument(skip(pool), err)]
pub async fn detect_job_table(pool: &SqlitePool) -> Result<JobTable, SchemaError> {
    if table_exists(pool, JobTable::Unified.name())
        .await
        .map_err(introspection("check unified table"))?
    {
        return Ok(JobTable::Unified);
    }

    if table_exists(pool, JobTable::Legacy.name())
        .await
        .map_err(introspection("check legacy table"))?
    {
        return Ok(JobTable::Legacy);
    }

    sqlx::query(CREATE_UNIFIED_TABLE)
        .execute(pool)
        .await
        .map_err(introspection("create unified table"))?;
    tracing::info!(table = JobTable::Unified.name(), "created job table");

    Ok(JobTable::Unified)
}

#[instrument(skip(pool), err)]
pub async fn detect_columns(pool: &SqlitePool, table: JobTable) -> Result<TableColumns, SchemaError> {
    let names = sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?1)")
        .bind(table.name())
        .fetch_all(pool)
        .await
        .map_err(introspection("read table columns"))?;
    Ok(TableColumns::new(names))
}

#[instrument(skip(pool), err)]
pub async fn detect_status_vocabulary(
    pool: &SqlitePool,
    table: JobTable,
) -> Result<StatusVocabulary, SchemaError> {
    let ddl = sqlx::query_scalar::<_, Option<String>>(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
    )
    .bind(table.name())
    .fetch_optional(pool)
    .await
    .map_err(introspection("read table definition"))?
    .flatten()
    .unwrap_or_default();

    Ok(StatusVocabulary::resolve(&declared_status_values(&ddl)))
}

/// Values a `CREATE TABLE` statement allows in its `status` column.
///
/// Understands `CHECK (status IN ('a', 'b'))` constraints and
/// `status ENUM('a', 'b')` column types. Returns an empty list when the
/// column is unconstrained.
pub fn declared_status_values(create_sql: &str) -> Vec<String> {
    // ASCII lowercasing keeps byte offsets aligned with the original text.
    let lower = create_sql.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut from = 0;

    while let Some(found) = lower[from..].find("status") {
        let start = from + found;
        let end = start + "status".len();
        from = end;

        let boundary_before = start == 0 || !is_ident_byte(bytes[start - 1]);
        let boundary_after = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if !(boundary_before && boundary_after) {
            continue;
        }

        let after = skip_while(bytes, end, |b| {
            matches!(b, b'"' | b'`' | b']' | b' ' | b'\t' | b'\r' | b'\n')
        });
        let rest = &lower[after..];

        let list_start = if rest.starts_with("enum") {
            skip_while(bytes, after + 4, |b| b.is_ascii_whitespace())
        } else if rest.starts_with("in") && bytes.get(after + 2).is_none_or(|b| !is_ident_byte(*b)) {
            skip_while(bytes, after + 2, |b| b.is_ascii_whitespace())
        } else {
            continue;
        };

        if let Some(values) = parse_quoted_list(&create_sql[list_start..]) {
            return values;
        }
    }

    Vec::new()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn skip_while(bytes: &[u8], mut idx: usize, pred: impl Fn(u8) -> bool) -> usize {
    while idx < bytes.len() && pred(bytes[idx]) {
        idx += 1;
    }
    idx
}

/// Parse `('a', 'b''c')` into `["a", "b'c"]`.
fn parse_quoted_list(text: &str) -> Option<Vec<String>> {
    let mut chars = text.chars().peekable();
    if chars.next()? != '(' {
        return None;
    }

    let mut values = Vec::new();
    loop {
        match chars.next()? {
            '\'' => {
                let mut value = String::new();
                loop {
                    match chars.next()? {
                        '\'' if chars.peek() == Some(&'\'') => {
                            chars.next();
                            value.push('\'');
                        }
                        '\'' => break,
                        c => value.push(c),
                    }
                }
                values.push(value);
            }
            ')' => break,
            _ => {}
        }
    }

    if values.is_empty() { None } else { Some(values) }
}
