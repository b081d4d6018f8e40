//! Job runner: drives one job from `pending` to a terminal state.
//!
//! The runner is the only owner of the job's process. It waits for an
//! execution slot, spawns the process, streams its output into the store
//! line by line, and races process exit against the job's timeout and its
//! cancellation token.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::Child;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command::build_command;
use super::config::JobsConfig;
use super::persistence;
use super::store::JobStore;
use super::types::{FailureKind, JobId, JobOutput, JobRecord, TransitionError};

/// How long output readers may lag behind process exit.
const OUTPUT_DRAIN_WINDOW: Duration = Duration::from_secs(5);

enum Outcome {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut(Duration),
    Cancelled,
}

/// Owns the lifecycle of exactly one job.
pub(crate) struct JobRunner<S: JobStore> {
    job_id: JobId,
    store: Arc<S>,
    config: Arc<JobsConfig>,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl<S: JobStore + 'static> JobRunner<S> {
    pub(crate) fn new(
        job_id: JobId,
        store: Arc<S>,
        config: Arc<JobsConfig>,
        slots: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            store,
            config,
            slots,
            cancel,
        }
    }

    pub(crate) async fn run(self) {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.finalize(|r| r.mark_cancelled("cancelled before start"));
                return;
            }
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.finalize(|r| {
                        r.mark_failed(
                            FailureKind::Launch,
                            "job manager stopped before the job could start",
                            None,
                        )
                    });
                    return;
                }
            },
        };

        let record = match self.store.get(self.job_id) {
            Ok(record) => record,
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "job vanished before start");
                return;
            }
        };

        let mut child = match build_command(&record, self.config.interpreter.as_deref()).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "failed to start job process");
                self.finalize(|r| {
                    r.mark_failed(
                        FailureKind::Launch,
                        format!("failed to start process: {}", e),
                        None,
                    )
                });
                return;
            }
        };

        let pid = child.id();
        if self.finalize(|r| r.mark_running()).is_none() {
            let _ = terminate(&mut child, Duration::ZERO).await;
            return;
        }
        info!(job_id = %self.job_id, pid = ?pid, script = %record.script_path.display(), "job started");

        let capture = OutputCapture::start(
            &mut child,
            self.store.clone(),
            self.job_id,
            persistence::log_path(&record.job_dir),
            self.config.error_tail_lines,
        );

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Outcome::Exited(status),
                Err(e) => Outcome::WaitFailed(e),
            },
            _ = tokio::time::sleep(record.timeout) => {
                warn!(job_id = %self.job_id, timeout = ?record.timeout, "job timed out; killing process");
                if let Err(e) = terminate(&mut child, Duration::ZERO).await {
                    warn!(job_id = %self.job_id, error = %e, "failed to reap timed-out process");
                }
                Outcome::TimedOut(record.timeout)
            }
            _ = self.cancel.cancelled() => {
                info!(job_id = %self.job_id, grace = ?self.config.cancel_grace, "cancellation requested; terminating process");
                if let Err(e) = terminate(&mut child, self.config.cancel_grace).await {
                    warn!(job_id = %self.job_id, error = %e, "failed to reap cancelled process");
                }
                Outcome::Cancelled
            }
        };

        let stderr_tail = capture.finish(self.job_id).await;
        self.conclude(outcome, &record, &stderr_tail).await;

        // The slot is released only once the record is terminal.
        drop(permit);
    }

    async fn conclude(&self, outcome: Outcome, record: &JobRecord, stderr_tail: &[String]) {
        match outcome {
            Outcome::Exited(status) => match status.code() {
                Some(0) => {
                    let output =
                        match collect_output(&record.job_dir, &self.config.result_dir_prefix).await {
                            Ok(output) => output,
                            Err(e) => {
                                warn!(job_id = %self.job_id, error = %e, "could not scan job directory for results");
                                JobOutput {
                                    job_dir: record.job_dir.clone(),
                                    output_dir: None,
                                    artifacts: Vec::new(),
                                }
                            }
                        };
                    if output.output_dir.is_none() {
                        warn!(
                            job_id = %self.job_id,
                            prefix = %self.config.result_dir_prefix,
                            "job exited cleanly without a result directory"
                        );
                    }
                    self.finalize(|r| r.mark_completed(0, output));
                }
                Some(code) => {
                    let message =
                        failure_message(format!("process exited with code {}", code), stderr_tail);
                    self.finalize(|r| {
                        r.mark_failed(FailureKind::ExitCode { code }, message, Some(code))
                    });
                }
                None => {
                    let signal = exit_signal(&status);
                    let headline = match signal {
                        Some(signal) => format!("process terminated by signal {}", signal),
                        None => "process terminated without an exit code".to_string(),
                    };
                    let message = failure_message(headline, stderr_tail);
                    self.finalize(|r| r.mark_failed(FailureKind::Signal { signal }, message, None));
                }
            },
            Outcome::WaitFailed(e) => {
                self.finalize(|r| {
                    r.mark_failed(
                        FailureKind::Launch,
                        format!("failed to wait for process: {}", e),
                        None,
                    )
                });
            }
            Outcome::TimedOut(after) => {
                let message = failure_message(format!("timed out after {:?}", after), stderr_tail);
                self.finalize(|r| {
                    r.mark_failed(
                        FailureKind::Timeout {
                            after_secs: after.as_secs(),
                        },
                        message,
                        None,
                    )
                });
            }
            Outcome::Cancelled => {
                self.finalize(|r| r.mark_cancelled("cancelled by request"));
            }
        }
    }

    /// Apply a transition, log it, and snapshot the result when configured.
    fn finalize(
        &self,
        f: impl FnOnce(&mut JobRecord) -> Result<(), TransitionError>,
    ) -> Option<JobRecord> {
        match self.store.transition(self.job_id, f) {
            Ok(record) => {
                if record.status.is_terminal() {
                    info!(
                        job_id = %self.job_id,
                        status = %record.status,
                        exit_code = ?record.exit_code,
                        error = ?record.error,
                        "job finished"
                    );
                } else {
                    debug!(job_id = %self.job_id, status = %record.status, "job transitioned");
                }
                persistence::save(self.config.persistence, &record);
                Some(record)
            }
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "job state update rejected");
                None
            }
        }
    }
}

fn failure_message(headline: String, stderr_tail: &[String]) -> String {
    if stderr_tail.is_empty() {
        headline
    } else {
        format!("{}\n{}", headline, stderr_tail.join("\n"))
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Stop the process and its group: SIGTERM, up to `grace` for a clean
/// exit, then SIGKILL. A zero grace kills immediately. Returns once the
/// process has been reaped.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let group = Pid::from_raw(pid as i32);
            if !grace.is_zero() {
                let _ = killpg(group, Signal::SIGTERM);
                if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                    // Leader is gone; sweep whatever it left in the group.
                    let _ = killpg(group, Signal::SIGKILL);
                    return status.map(|_| ());
                }
            }
            let _ = killpg(group, Signal::SIGKILL);
        }
    }

    let _ = child.start_kill();
    child.wait().await.map(|_| ())
}

/// Scan the job directory for the first result directory (by name).
async fn collect_output(job_dir: &Path, prefix: &str) -> std::io::Result<JobOutput> {
    let mut candidates = Vec::new();
    let mut entries = tokio::fs::read_dir(job_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) && entry.file_type().await?.is_dir() {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    let output_dir = candidates.into_iter().next();

    let mut artifacts = Vec::new();
    if let Some(dir) = &output_dir {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            artifacts.push(entry.file_name().to_string_lossy().into_owned());
        }
        artifacts.sort();
    }

    Ok(JobOutput {
        job_dir: job_dir.to_path_buf(),
        output_dir,
        artifacts,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Incremental capture of a process's combined output.
///
/// One reader task per pipe feeds a single recorder task, so lines land in
/// the store (and `job.log`) in arrival order without readers ever waiting
/// on the store.
struct OutputCapture {
    readers: Vec<JoinHandle<()>>,
    recorder: JoinHandle<()>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl OutputCapture {
    fn start<S: JobStore + 'static>(
        child: &mut Child,
        store: Arc<S>,
        job_id: JobId,
        log_file: PathBuf,
        tail_lines: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, Stream::Stderr, tx.clone())));
        }
        drop(tx);

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(tail_lines)));
        let recorder = tokio::spawn(record_lines(
            rx,
            store,
            job_id,
            log_file,
            stderr_tail.clone(),
            tail_lines,
        ));

        Self {
            readers,
            recorder,
            stderr_tail,
        }
    }

    /// Wait for the pipes to drain; returns the retained stderr tail.
    ///
    /// Only the readers are bounded by the drain window. Every line they
    /// handed over is still recorded before this returns.
    async fn finish(self, job_id: JobId) -> Vec<String> {
        let aborts: Vec<_> = self.readers.iter().map(JoinHandle::abort_handle).collect();

        let readers = self.readers;
        let drained = tokio::time::timeout(OUTPUT_DRAIN_WINDOW, async move {
            for reader in readers {
                let _ = reader.await;
            }
        })
        .await;

        if drained.is_err() {
            // A descendant outside the process group still holds the pipe.
            warn!(job_id = %job_id, "job output still open after exit; detaching capture");
            for abort in aborts {
                abort.abort();
            }
        }

        // Aborted or finished readers have dropped their senders, so the
        // recorder stops once the queue is empty.
        if let Err(e) = self.recorder.await {
            error!(job_id = %job_id, error = %e, "job output recorder panicked");
        }

        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tail.iter().cloned().collect()
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: Stream,
    tx: mpsc::UnboundedSender<(Stream, String)>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(stream = ?stream, error = %e, "job output stream closed with error");
                break;
            }
        }
    }
}

async fn record_lines<S: JobStore>(
    mut rx: mpsc::UnboundedReceiver<(Stream, String)>,
    store: Arc<S>,
    job_id: JobId,
    log_file: PathBuf,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    tail_lines: usize,
) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .await
    {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            warn!(job_id = %job_id, path = %log_file.display(), error = %e, "cannot open job log file; keeping output in memory only");
            None
        }
    };

    while let Some((stream, line)) = rx.recv().await {
        if stream == Stream::Stderr && tail_lines > 0 {
            let mut tail = stderr_tail.lock().unwrap_or_else(PoisonError::into_inner);
            if tail.len() == tail_lines {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }

        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        if let Err(e) = store.append_log(job_id, line) {
            warn!(job_id = %job_id, error = %e, "dropping output for unknown job");
            break;
        }

        let write_error = match file.as_mut() {
            Some(f) => f.write_all(&bytes).await.err(),
            None => None,
        };
        if let Some(e) = write_error {
            warn!(job_id = %job_id, error = %e, "job log file write failed; keeping output in memory only");
            file = None;
        }
    }

    if let Some(mut f) = file {
        if let Err(e) = f.flush().await {
            warn!(job_id = %job_id, error = %e, "job log file flush failed");
        }
    }
}
