//! Payload normalization.
//!
//! Jobs reach the worker in one of two physical shapes:
//!
//! - unified `jobs` rows carry one `payload_json` text column;
//! - legacy `article_jobs` rows carry `options` and `integrations` text columns.
//!
//! [`RawPayload::normalize`] turns either into a [`JobPayload`]. It never
//! fails: text that is missing, malformed, or not a JSON object becomes an
//! empty mapping, and handlers are expected to cope with absent keys.

use serde_json::{Map, Value};

/// Payload exactly as stored, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawPayload {
    Unified {
        payload: Option<String>,
    },
    Legacy {
        options: Option<String>,
        integrations: Option<String>,
    },
}

impl RawPayload {
    pub fn normalize(&self) -> JobPayload {
        match self {
            RawPayload::Unified { payload } => JobPayload(parse_object(payload.as_deref())),
            RawPayload::Legacy {
                options,
                integrations,
            } => {
                let mut map = Map::new();
                map.insert(
                    "options".to_string(),
                    Value::Object(parse_object(options.as_deref())),
                );
                map.insert(
                    "integrations".to_string(),
                    Value::Object(parse_object(integrations.as_deref())),
                );
                JobPayload(map)
            }
        }
    }
}

fn parse_object(text: Option<&str>) -> Map<String, Value> {
    match text.map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(map))) => map,
        Some(Err(err)) => {
            tracing::debug!(error = %err, "stored payload is not valid JSON; using empty payload");
            Map::new()
        }
        _ => Map::new(),
    }
}

/// Canonical, read-only view of a job's input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPayload(Map<String, Value>);

impl JobPayload {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `options` sub-mapping, if present.
    pub fn options(&self) -> Option<&Map<String, Value>> {
        self.0.get("options").and_then(Value::as_object)
    }

    /// The `integrations` sub-mapping, if present.
    pub fn integrations(&self) -> Option<&Map<String, Value>> {
        self.0.get("integrations").and_then(Value::as_object)
    }

    /// Keyword list for bulk generation.
    ///
    /// Looks at `keywords` first and falls back to `options.keywords` when the
    /// top-level key is absent or null. Anything that is not a list yields no
    /// keywords. Scalars are stringified; empty strings and nested values are
    /// skipped.
    pub fn keywords(&self) -> Vec<String> {
        let top_level = self.0.get("keywords").filter(|v| !v.is_null());
        let nested = || {
            self.options()
                .and_then(|options| options.get("keywords"))
                .filter(|v| !v.is_null())
        };

        let Some(Value::Array(items)) = top_level.or_else(nested) else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(if *b { "1".to_string() } else { String::new() }),
                _ => None,
            })
            .filter(|kw| !kw.is_empty())
            .collect()
    }
}

impl From<Map<String, Value>> for JobPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
