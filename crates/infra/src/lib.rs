//! Infrastructure layer: config, SQLite, and the job queue.

pub mod config;
pub mod db;
pub mod jobs;

mod integration_tests;
