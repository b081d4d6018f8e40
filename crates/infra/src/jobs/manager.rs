//! Job manager: the single entry point for submitting and inspecting jobs.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::command::{resolve_executable, resolve_file};
use super::config::JobsConfig;
use super::error::{JobError, JobResult};
use super::kinds::{BatchSubmission, DockingBatch, JobKind};
use super::persistence::{self, RegistryPersistence, RestoredJob};
use super::runner::JobRunner;
use super::store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
use super::types::{FailureKind, JobArgs, JobId, JobRecord, JobStatus};
use super::view::{
    CancelOutcome, JobList, JobResultView, JobSnapshot, JobSummary, LogTail, Submission,
};

/// A submission with every option spelled out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub script_path: PathBuf,
    #[serde(default)]
    pub args: JobArgs,
    #[serde(default)]
    pub job_name: Option<String>,
    /// Overrides the configured default timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl JobRequest {
    pub fn new(script_path: impl Into<PathBuf>, args: JobArgs) -> Self {
        Self {
            script_path: script_path.into(),
            args,
            job_name: None,
            timeout_secs: None,
        }
    }

    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }
}

/// Job manager facade.
///
/// Submission returns as soon as the job is recorded; each job is then
/// driven by its own runner task. Cloning is cheap and every clone shares
/// the same registry and concurrency limit.
pub struct JobManager<S: JobStore = InMemoryJobStore> {
    store: Arc<S>,
    config: Arc<JobsConfig>,
    slots: Arc<Semaphore>,
    accepting: Arc<AtomicBool>,
}

impl<S: JobStore> Clone for JobManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            slots: self.slots.clone(),
            accepting: self.accepting.clone(),
        }
    }
}

impl JobManager<InMemoryJobStore> {
    /// Manager over a fresh in-memory registry.
    pub fn new(config: JobsConfig) -> JobResult<Self> {
        Self::with_store(config, InMemoryJobStore::arc())
    }
}

impl<S: JobStore + 'static> JobManager<S> {
    /// Manager over `store`. Creates the jobs root and, under the snapshot
    /// policy, reloads jobs recorded by a previous process.
    pub fn with_store(mut config: JobsConfig, store: Arc<S>) -> JobResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.jobs_root)?;
        config.jobs_root = std::path::absolute(&config.jobs_root)?;
        if let Some(interpreter) = &config.interpreter {
            config.interpreter = Some(resolve_executable(interpreter)?);
        }

        let manager = Self {
            store,
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            config: Arc::new(config),
            accepting: Arc::new(AtomicBool::new(true)),
        };

        if manager.config.persistence == RegistryPersistence::Snapshot {
            let restored = manager.restore()?;
            if restored > 0 {
                info!(restored, "restored jobs from snapshots");
            }
        }

        info!(
            jobs_root = %manager.config.jobs_root.display(),
            max_concurrent = manager.config.max_concurrent,
            persistence = ?manager.config.persistence,
            "job manager ready"
        );
        Ok(manager)
    }

    /// Reload snapshots. In-flight jobs did not survive the restart and are
    /// finalized as interrupted.
    fn restore(&self) -> JobResult<usize> {
        let mut count = 0;
        for RestoredJob { mut record, log } in persistence::load_snapshots(&self.config.jobs_root)? {
            let job_id = record.job_id;
            if !record.status.is_terminal() {
                warn!(job_id = %job_id, status = %record.status, "job interrupted by restart");
                record
                    .mark_failed(
                        FailureKind::Interrupted,
                        "job manager restarted while the job was in flight",
                        None,
                    )
                    .map_err(JobStoreError::from)?;
                persistence::save(self.config.persistence, &record);
            }

            match self.store.insert(record) {
                Ok(_) => {}
                Err(JobStoreError::AlreadyExists(_)) => {
                    debug!(job_id = %job_id, "snapshot already registered; skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            for line in log {
                self.store.append_log(job_id, line)?;
            }
            count += 1;
        }
        Ok(count)
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    /// Submit `script_path` with the default timeout.
    pub fn submit(
        &self,
        script_path: impl Into<PathBuf>,
        args: JobArgs,
        job_name: Option<String>,
    ) -> JobResult<Submission> {
        self.submit_request(JobRequest {
            job_name,
            ..JobRequest::new(script_path, args)
        })
    }

    /// Validate, record as `pending`, and hand the job to a runner.
    ///
    /// Nothing is recorded when validation fails. Must be called from within
    /// a Tokio runtime.
    pub fn submit_request(&self, request: JobRequest) -> JobResult<Submission> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(JobError::ShuttingDown);
        }
        let runtime = Handle::try_current().map_err(|_| JobError::NoRuntime)?;

        let JobRequest {
            script_path,
            args,
            job_name,
            timeout_secs,
        } = request;

        // An interpreter takes the script as a plain file argument.
        let script_path = if self.config.interpreter.is_some() {
            resolve_file(&script_path)?
        } else {
            resolve_executable(&script_path)?
        };
        args.validate()?;
        let timeout = match timeout_secs {
            Some(0) => return Err(JobError::validation("timeout must be positive")),
            Some(secs) => Duration::from_secs(secs),
            None => self.config.default_timeout,
        };
        let job_name = job_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let job_id = JobId::new();
        let job_dir = self.config.jobs_root.join(job_id.to_string());
        std::fs::create_dir_all(&job_dir)?;

        let record = JobRecord::new(
            job_id,
            script_path,
            args,
            job_name.clone(),
            job_dir,
            timeout,
        );
        persistence::save(self.config.persistence, &record);
        let script = record.script_path.clone();
        self.store.insert(record)?;

        let runner = JobRunner::new(
            job_id,
            self.store.clone(),
            self.config.clone(),
            self.slots.clone(),
            self.store.cancellation(job_id)?,
        );
        runtime.spawn(runner.run());

        info!(
            job_id = %job_id,
            job_name = ?job_name,
            script = %script.display(),
            timeout = ?timeout,
            "job submitted"
        );
        Ok(Submission {
            job_id,
            job_name,
            message: "job submitted; poll its status for progress".to_string(),
        })
    }

    /// Validate a typed job and submit its script.
    pub fn submit_kind(&self, kind: JobKind, job_name: Option<String>) -> JobResult<Submission> {
        kind.validate()?;
        let job_name = job_name.unwrap_or_else(|| kind.default_job_name());
        let request = JobRequest::new(kind.script_path(&self.config.scripts_dir), kind.to_args())
            .with_job_name(job_name);
        self.submit_request(request)
    }

    /// One docking job per peptide. A rejected peptide is reported in the
    /// outcome and does not stop the rest of the batch.
    pub fn submit_batch_docking(&self, batch: DockingBatch) -> JobResult<BatchSubmission> {
        if batch.peptide_files.is_empty() {
            return Err(JobError::validation("batch contains no peptide files"));
        }
        if !batch.protein_file.is_file() {
            return Err(JobError::validation(format!(
                "protein file not found: {}",
                batch.protein_file.display()
            )));
        }

        let mut job_ids = Vec::new();
        let mut errors = Vec::new();
        for entry in batch.entries() {
            match self.submit_kind(entry.kind, Some(entry.job_name)) {
                Ok(submission) => job_ids.push(submission.job_id),
                Err(e) => {
                    warn!(peptide = %entry.peptide_file.display(), error = %e, "batch entry rejected");
                    errors.push(format!(
                        "failed to submit {}: {}",
                        entry.peptide_file.display(),
                        e
                    ));
                }
            }
        }

        let outcome = BatchSubmission::new(job_ids, errors);
        info!(
            submitted = outcome.total_submitted,
            failed = outcome.total_failed,
            "docking batch submitted"
        );
        Ok(outcome)
    }

    pub fn get_status(&self, job_id: JobId) -> JobResult<JobSnapshot> {
        let record = self.store.get(job_id)?;
        Ok(JobSnapshot::from_record(&record, Utc::now()))
    }

    pub fn get_result(&self, job_id: JobId) -> JobResult<JobResultView> {
        let record = self.store.get(job_id)?;
        Ok(JobResultView::from_record(&record))
    }

    /// Last `tail` log lines; `0` returns the whole log.
    pub fn get_log(&self, job_id: JobId, tail: usize) -> JobResult<LogTail> {
        Ok(self.store.read_log(job_id, tail)?)
    }

    /// Request termination. Finished jobs are left untouched and answered
    /// with [`CancelOutcome::Noop`]; the runner does the actual work, so
    /// callers poll [`JobManager::get_status`] for the final state.
    pub fn cancel(&self, job_id: JobId) -> JobResult<CancelOutcome> {
        let record = self.store.get(job_id)?;
        if record.status.is_terminal() {
            debug!(job_id = %job_id, status = %record.status, "cancel on finished job ignored");
            return Ok(CancelOutcome::Noop {
                job_id,
                message: format!("job already {}", record.status),
            });
        }

        self.store.cancellation(job_id)?.cancel();
        info!(job_id = %job_id, status = %record.status, "cancellation requested");
        Ok(CancelOutcome::Cancelled {
            job_id,
            message: "cancellation requested".to_string(),
        })
    }

    pub fn list(&self, status: Option<JobStatus>) -> JobList {
        let now = Utc::now();
        let jobs: Vec<JobSummary> = self
            .store
            .list(status)
            .iter()
            .map(|record| JobSummary::from_record(record, now))
            .collect();
        JobList {
            total_jobs: jobs.len(),
            jobs,
        }
    }

    pub fn stats(&self) -> JobStats {
        self.store.stats()
    }

    /// Stop accepting submissions and cancel every unfinished job.
    /// Returns how many jobs were asked to stop.
    pub fn shutdown(&self) -> usize {
        self.accepting.store(false, Ordering::SeqCst);

        let mut requested = 0;
        for record in self.store.list(None) {
            if record.status.is_terminal() {
                continue;
            }
            if let Ok(token) = self.store.cancellation(record.job_id) {
                token.cancel();
                requested += 1;
            }
        }
        info!(requested, "job manager shutting down");
        requested
    }

    /// Wait until no job is pending or running, up to `limit`.
    pub async fn wait_until_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let stats = self.store.stats();
            if stats.pending == 0 && stats.running == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
