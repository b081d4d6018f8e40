//! `dockjob-core`: identifiers and the error model shared by every layer.
//!
//! This crate has no runtime or I/O concerns.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
