//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;

use super::types::{JobId, JobRecord, JobStatus, TransitionError};
use super::view::LogTail;

/// Job store abstraction.
///
/// Every mutation of a record is serialized; reads never wait behind a
/// running job, only behind another short mutation of the same record.
pub trait JobStore: Send + Sync {
    /// Register a new job.
    fn insert(&self, record: JobRecord) -> Result<JobId, JobStoreError>;

    /// Copy of the current record.
    fn get(&self, job_id: JobId) -> Result<JobRecord, JobStoreError>;

    /// Apply `f` to the record under its write lock.
    fn update<R>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut JobRecord) -> R,
    ) -> Result<R, JobStoreError>
    where
        Self: Sized;

    /// Apply a state transition and return the updated record.
    fn transition(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut JobRecord) -> Result<(), TransitionError>,
    ) -> Result<JobRecord, JobStoreError>
    where
        Self: Sized,
    {
        self.update(job_id, |record| {
            f(record)?;
            Ok::<_, TransitionError>(record.clone())
        })?
        .map_err(JobStoreError::from)
    }

    /// Append one line to the job's log; returns the new line count.
    fn append_log(&self, job_id: JobId, line: String) -> Result<usize, JobStoreError>;

    /// Last `tail` lines (all of them when `tail == 0`).
    fn read_log(&self, job_id: JobId, tail: usize) -> Result<LogTail, JobStoreError>;

    /// Token the job's runner watches for cancellation requests.
    fn cancellation(&self, job_id: JobId) -> Result<CancellationToken, JobStoreError>;

    /// Snapshot of all jobs (optionally one status) in submission order.
    fn list(&self, status: Option<JobStatus>) -> Vec<JobRecord>;

    /// Per-status counts.
    fn stats(&self) -> JobStats;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobStats {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Per-job state; each part has its own lock so log appends never block
/// status reads and vice versa.
#[derive(Debug)]
struct JobSlot {
    record: RwLock<JobRecord>,
    log: RwLock<Vec<String>>,
    cancel: CancellationToken,
}

/// In-memory job store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // The map lock is held only long enough to clone the slot handle.
    fn slot(&self, job_id: JobId) -> Result<Arc<JobSlot>, JobStoreError> {
        read(&self.jobs)
            .get(&job_id)
            .cloned()
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn slots(&self) -> Vec<Arc<JobSlot>> {
        read(&self.jobs).values().cloned().collect()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, record: JobRecord) -> Result<JobId, JobStoreError> {
        let mut jobs = write(&self.jobs);
        let id = record.job_id;
        if jobs.contains_key(&id) {
            return Err(JobStoreError::AlreadyExists(id));
        }
        jobs.insert(
            id,
            Arc::new(JobSlot {
                record: RwLock::new(record),
                log: RwLock::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        );
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<JobRecord, JobStoreError> {
        let slot = self.slot(job_id)?;
        let record = read(&slot.record).clone();
        Ok(record)
    }

    fn update<R>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut JobRecord) -> R,
    ) -> Result<R, JobStoreError> {
        let slot = self.slot(job_id)?;
        let mut record = write(&slot.record);
        Ok(f(&mut record))
    }

    fn append_log(&self, job_id: JobId, line: String) -> Result<usize, JobStoreError> {
        let slot = self.slot(job_id)?;
        let mut log = write(&slot.log);
        log.push(line);
        Ok(log.len())
    }

    fn read_log(&self, job_id: JobId, tail: usize) -> Result<LogTail, JobStoreError> {
        let slot = self.slot(job_id)?;
        let log = read(&slot.log);
        let total = log.len();
        let start = if tail == 0 { 0 } else { total.saturating_sub(tail) };
        Ok(LogTail {
            lines: log[start..].to_vec(),
            total_line_count: total,
        })
    }

    fn cancellation(&self, job_id: JobId) -> Result<CancellationToken, JobStoreError> {
        Ok(self.slot(job_id)?.cancel.clone())
    }

    fn list(&self, status: Option<JobStatus>) -> Vec<JobRecord> {
        let mut result: Vec<JobRecord> = self
            .slots()
            .iter()
            .map(|slot| read(&slot.record).clone())
            .filter(|record| status.map_or(true, |s| record.status == s))
            .collect();

        result.sort_by_key(|r| (r.submitted_at, r.job_id));
        result
    }

    fn stats(&self) -> JobStats {
        let mut stats = JobStats::default();
        for slot in self.slots() {
            match read(&slot.record).status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
