//! HTTP API: job submission and listing for the admin UI.

pub mod app;
