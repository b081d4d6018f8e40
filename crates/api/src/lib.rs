//! HTTP API: routing and request/response mapping over the job manager.

pub mod app;
