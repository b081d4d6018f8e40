//! Asynchronous execution and tracking of long-running external jobs.
//!
//! ## Design
//!
//! - Each job runs one external process, owned by its own runner task
//! - Submission only records the job; runners wait for a free slot
//! - Output is captured line by line while the process runs
//! - Timeouts and cancellation terminate the whole process group
//! - Terminal states are final; late cancellations are no-ops
//!
//! ## Components
//!
//! - `JobRecord`: lifecycle state of one job
//! - `JobStore`: concurrency-safe registry of records and their logs
//! - `JobRunner`: drives one record from `pending` to a terminal state
//! - `JobManager`: facade for submit, status, result, log, cancel and list
//! - `JobKind`: typed, validated submissions for the known scripts

mod command;
mod runner;

pub mod config;
pub mod error;
pub mod kinds;
pub mod manager;
pub mod persistence;
pub mod store;
pub mod types;
pub mod view;

pub use command::{resolve_executable, resolve_file};
pub use config::{ConfigError, JobsConfig};
pub use error::{JobError, JobResult};
pub use kinds::{BatchEntry, BatchStatus, BatchSubmission, DockingBatch, JobKind};
pub use manager::{JobManager, JobRequest};
pub use persistence::RegistryPersistence;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{FailureKind, JobArgs, JobId, JobOutput, JobRecord, JobStatus, TransitionError};
pub use view::{
    CancelOutcome, JobList, JobResultView, JobSnapshot, JobSummary, LogTail, Submission,
};
