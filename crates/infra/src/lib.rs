//! Infrastructure layer: job execution, process supervision, job storage.

pub mod jobs;
