//! HTTP API and process wiring for the ingestion service.

pub mod app;
