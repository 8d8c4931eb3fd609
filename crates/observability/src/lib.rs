//! Tracing/logging setup shared by the API server and the worker.

/// Initialize process-wide logging with an `info` default filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing configuration (filters, layers).
pub mod tracing;
