//! Hookline Library
//!
//! GitHub webhook ingestion (`hookline-webhook`) and delivery
//! reconciliation (`hookline-retry`) share these components.

pub mod auth;
pub mod config;
pub mod datastore;
pub mod db;
pub mod error;
pub mod github;
pub mod ingest;
pub mod lock;
pub mod models;
pub mod publisher;
pub mod retry;
pub mod routes;
