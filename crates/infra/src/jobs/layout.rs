//! Per-table column layouts.
//!
//! The store builds its SQL around a common core (`id`, `type`, `status`,
//! `error`, timestamps) and asks the layout for the columns that differ.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::payload::RawPayload;
use super::schema::{JobTable, TableColumns};
use super::types::NewJob;

/// Column-level differences between the unified and legacy job tables.
pub trait JobTableLayout: Send + Sync + std::fmt::Debug {
    fn table(&self) -> JobTable;

    /// Columns without which the layout cannot store a payload.
    fn required_columns(&self) -> &'static [&'static str];

    /// Select-list fragment for `model` and the payload column(s).
    fn payload_select(&self, columns: &TableColumns) -> String;

    /// Column/value pairs written on insert, besides `type` and `status`.
    fn insert_values(&self, job: &NewJob, columns: &TableColumns) -> Vec<(&'static str, Option<String>)>;

    /// Read `model` and the raw payload back from a row selected with
    /// [`JobTableLayout::payload_select`]. Never fails: an unreadable cell
    /// reads as absent.
    fn decode_payload(&self, row: &SqliteRow) -> (Option<String>, RawPayload);
}

/// Text view of a cell whatever its storage class. BLOBs and numbers come
/// back as their bytes, invalid UTF-8 is replaced.
fn lenient_text(row: &SqliteRow, column: &str) -> Option<String> {
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(column) {
        Ok(bytes) => bytes.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::warn!(column, error = %e, "unreadable job column, treating as empty");
            None
        }
    }
}

/// `jobs`: a single `payload_json` column.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnifiedLayout;

impl JobTableLayout for UnifiedLayout {
    fn table(&self) -> JobTable {
        JobTable::Unified
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["id", "type", "status", "payload_json"]
    }

    fn payload_select(&self, columns: &TableColumns) -> String {
        format!("{}, payload_json", columns.select_or_null("model"))
    }

    fn insert_values(&self, job: &NewJob, columns: &TableColumns) -> Vec<(&'static str, Option<String>)> {
        let mut values = Vec::with_capacity(2);
        if columns.has("model") {
            values.push(("model", job.model().map(str::to_string)));
        }
        values.push(("payload_json", Some(job.payload_json())));
        values
    }

    fn decode_payload(&self, row: &SqliteRow) -> (Option<String>, RawPayload) {
        let payload = lenient_text(row, "payload_json");
        (lenient_text(row, "model"), RawPayload::Unified { payload })
    }
}

/// `article_jobs`: separate `options` and `integrations` columns.
///
/// Submissions carry no integrations, so new rows get `{}` there.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyLayout;

impl JobTableLayout for LegacyLayout {
    fn table(&self) -> JobTable {
        JobTable::Legacy
    }

    fn required_columns(&self) -> &'static [&'static str] {
        &["id", "type", "status", "options"]
    }

    fn payload_select(&self, columns: &TableColumns) -> String {
        format!(
            "{}, options, {}",
            columns.select_or_null("model"),
            columns.select_or_null("integrations")
        )
    }

    fn insert_values(&self, job: &NewJob, columns: &TableColumns) -> Vec<(&'static str, Option<String>)> {
        let mut values = Vec::with_capacity(3);
        if columns.has("model") {
            values.push(("model", job.model().map(str::to_string)));
        }
        values.push(("options", Some(job.payload_json())));
        if columns.has("integrations") {
            values.push(("integrations", Some("{}".to_string())));
        }
        values
    }

    fn decode_payload(&self, row: &SqliteRow) -> (Option<String>, RawPayload) {
        let options = lenient_text(row, "options");
        let integrations = lenient_text(row, "integrations");
        (lenient_text(row, "model"), RawPayload::Legacy { options, integrations })
    }
}
