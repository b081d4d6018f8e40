//! End-to-end behaviour of the job manager against real `sh` processes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use dockjob_infra::jobs::{
    CancelOutcome, DockingBatch, FailureKind, JobArgs, JobError, JobId, JobKind, JobManager,
    JobRequest, JobResultView, JobSnapshot, JobStatus, JobsConfig, RegistryPersistence,
};

/// Prints `started`, then blocks until the test drops a `release` file into
/// the job directory.
const BLOCKING: &str = "echo started\nwhile [ ! -f release ]; do sleep 0.05; done\necho released\n";

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("dockjob_infra=debug")
            .try_init();
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn config(&self) -> JobsConfig {
        JobsConfig::default()
            .with_jobs_root(self.dir.path().join("jobs"))
            .with_scripts_dir(self.dir.path().join("scripts"))
            .with_interpreter("sh")
            .with_max_concurrent(4)
            .with_cancel_grace(Duration::from_secs(2))
    }

    fn manager(&self) -> JobManager {
        JobManager::new(self.config()).unwrap()
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, body).unwrap();
        path
    }

    fn jobs_on_disk(&self) -> usize {
        match std::fs::read_dir(self.dir.path().join("jobs")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

fn job_dir(manager: &JobManager, id: JobId) -> PathBuf {
    manager.config().jobs_root.join(id.to_string())
}

fn release(manager: &JobManager, id: JobId) {
    std::fs::write(job_dir(manager, id).join("release"), "").unwrap();
}

async fn wait_for<F>(manager: &JobManager, id: JobId, limit: Duration, done: F) -> JobSnapshot
where
    F: Fn(&JobSnapshot) -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        let snapshot = manager.get_status(id).unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "job {} still {} after {:?}",
            id,
            snapshot.status,
            limit
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_terminal(manager: &JobManager, id: JobId) -> JobSnapshot {
    wait_for(manager, id, Duration::from_secs(15), |s| s.status.is_terminal()).await
}

async fn wait_for_log(manager: &JobManager, id: JobId, line: &str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !manager
        .get_log(id, 0)
        .unwrap()
        .lines
        .iter()
        .any(|l| l == line)
    {
        assert!(Instant::now() < deadline, "log of {} never showed '{}'", id, line);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    // Zombies count as dead: they hold no resources and run no code.
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

#[tokio::test]
async fn invalid_scripts_are_rejected_without_a_record() {
    let fx = Fixture::new();
    let manager = fx.manager();
    std::fs::create_dir_all(fx.dir.path().join("a_directory")).unwrap();

    for path in [
        PathBuf::new(),
        fx.dir.path().join("missing.sh"),
        fx.dir.path().join("a_directory"),
    ] {
        let err = manager.submit(path.clone(), JobArgs::new(), None).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)), "{:?}: {}", path, err);
    }

    let mut config = fx.config();
    config.interpreter = None;
    let direct = JobManager::new(config).unwrap();
    let err = direct
        .submit("no-such-binary-for-dockjob", JobArgs::new(), None)
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    assert_eq!(manager.list(None).total_jobs, 0);
    assert_eq!(direct.list(None).total_jobs, 0);
    assert_eq!(fx.jobs_on_disk(), 0);
}

#[tokio::test]
async fn executables_on_path_run_without_an_interpreter() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.interpreter = None;
    let manager = JobManager::new(config).unwrap();

    let submission = manager
        .submit("echo", JobArgs::new().with("message", "hi"), None)
        .unwrap();
    let status = wait_terminal(&manager, submission.job_id).await;

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(
        manager.get_log(submission.job_id, 0).unwrap().lines,
        vec!["--message hi"]
    );
}

#[tokio::test]
async fn completed_job_exposes_discovered_result_and_log() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script(
        "dock.sh",
        "echo \"args: $*\"\nmkdir -p run1/analysis run2\necho ok > run1/summary.txt\necho done\n",
    );

    let submission = manager
        .submit(
            script,
            JobArgs::new().with("input", "pep.pdb").with("length", 3),
            Some("docking".to_string()),
        )
        .unwrap();
    assert_eq!(submission.job_name.as_deref(), Some("docking"));

    let status = wait_terminal(&manager, submission.job_id).await;
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.exit_code, Some(0));
    assert!(status.error.is_none());
    assert!(status.finished_at >= status.started_at);
    assert!(status.runtime_secs.is_some());

    match manager.get_result(submission.job_id).unwrap() {
        JobResultView::Ready { result, .. } => {
            let dir = job_dir(&manager, submission.job_id);
            assert_eq!(result.job_dir, dir);
            assert_eq!(result.output_dir, Some(dir.join("run1")));
            assert_eq!(result.artifacts, vec!["analysis", "summary.txt"]);
        }
        other => panic!("expected a result, got {:?}", other),
    }

    let log = manager.get_log(submission.job_id, 0).unwrap();
    assert_eq!(log.lines, vec!["args: --input pep.pdb --length 3", "done"]);
    let on_disk =
        std::fs::read_to_string(job_dir(&manager, submission.job_id).join("job.log")).unwrap();
    assert_eq!(on_disk, "args: --input pep.pdb --length 3\ndone\n");
}

#[tokio::test]
async fn fast_producers_keep_every_line() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script("flood.sh", "seq 1 400000\necho err >&2\n");

    let id = manager.submit(script, JobArgs::new(), None).unwrap().job_id;
    let status = wait_for(&manager, id, Duration::from_secs(180), |s| {
        s.status.is_terminal()
    })
    .await;
    assert_eq!(status.status, JobStatus::Completed);

    let log = manager.get_log(id, 1).unwrap();
    assert_eq!(log.total_line_count, 400001);
    let on_disk = std::fs::read_to_string(job_dir(&manager, id).join("job.log")).unwrap();
    assert_eq!(on_disk.lines().count(), 400001);
    assert!(on_disk.contains("\n400000\n"));
}

#[tokio::test]
async fn clean_exit_without_result_directory_still_completes() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script("noop.sh", "exit 0\n");

    let id = manager.submit(script, JobArgs::new(), None).unwrap().job_id;
    assert_eq!(wait_terminal(&manager, id).await.status, JobStatus::Completed);

    match manager.get_result(id).unwrap() {
        JobResultView::Ready { result, .. } => {
            assert_eq!(result.output_dir, None);
            assert!(result.artifacts.is_empty());
        }
        other => panic!("expected a result, got {:?}", other),
    }
}

#[tokio::test]
async fn status_is_not_completed_before_the_process_exits() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script("block.sh", BLOCKING);

    let id = manager.submit(script, JobArgs::new(), None).unwrap().job_id;
    let first = manager.get_status(id).unwrap();
    assert!(matches!(first.status, JobStatus::Pending | JobStatus::Running));

    wait_for_log(&manager, id, "started").await;
    for _ in 0..10 {
        let status = manager.get_status(id).unwrap().status;
        assert_eq!(status, JobStatus::Running);
        assert!(matches!(
            manager.get_result(id).unwrap(),
            JobResultView::Unavailable { status: JobStatus::Running, .. }
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    release(&manager, id);
    assert_eq!(wait_terminal(&manager, id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn log_grows_while_the_job_runs() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script("live.sh", &format!("echo one\necho two\n{}", BLOCKING));

    let id = manager.submit(script, JobArgs::new(), None).unwrap().job_id;
    wait_for_log(&manager, id, "started").await;

    let live = manager.get_log(id, 2).unwrap();
    assert_eq!(manager.get_status(id).unwrap().status, JobStatus::Running);
    assert_eq!(live.total_line_count, 3);
    assert_eq!(live.lines, vec!["two", "started"]);

    release(&manager, id);
    wait_terminal(&manager, id).await;

    let all = manager.get_log(id, 0).unwrap();
    assert_eq!(all.lines, vec!["one", "two", "started", "released"]);
    assert_eq!(manager.get_log(id, 1).unwrap().lines, vec!["released"]);
    assert_eq!(manager.get_log(id, 50).unwrap().lines, all.lines);
}

#[tokio::test]
async fn nonzero_exit_fails_with_stderr_tail() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script("fail.sh", "echo working\necho 'bad input' >&2\nexit 3\n");

    let id = manager.submit(script, JobArgs::new(), None).unwrap().job_id;
    let status = wait_terminal(&manager, id).await;

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.exit_code, Some(3));
    assert_eq!(status.failure, Some(FailureKind::ExitCode { code: 3 }));
    let error = status.error.unwrap();
    assert!(error.contains("exited with code 3"), "{}", error);
    assert!(error.contains("bad input"), "{}", error);

    match manager.get_result(id).unwrap() {
        JobResultView::Unavailable { status, error, .. } => {
            assert_eq!(status, JobStatus::Failed);
            assert!(error.is_some());
        }
        other => panic!("failed job returned a result: {:?}", other),
    }
}

#[tokio::test]
async fn cancelling_a_finished_job_is_a_noop() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script("quick.sh", "mkdir run_a\n");

    let id = manager.submit(script, JobArgs::new(), None).unwrap().job_id;
    let before = wait_terminal(&manager, id).await;
    let result_before = manager.get_result(id).unwrap();

    for _ in 0..2 {
        match manager.cancel(id).unwrap() {
            CancelOutcome::Noop { job_id, message } => {
                assert_eq!(job_id, id);
                assert!(message.contains("completed"));
            }
            other => panic!("expected noop, got {:?}", other),
        }
    }

    let after = manager.get_status(id).unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.finished_at, before.finished_at);
    assert_eq!(manager.get_result(id).unwrap(), result_before);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn timeout_kills_the_whole_process_group() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script(
        "slow.sh",
        "echo $$ > leader.pid\nsleep 10 &\necho $! > worker.pid\nwait\n",
    );

    let started = Instant::now();
    let id = manager
        .submit_request(JobRequest::new(script, JobArgs::new()).with_timeout(Duration::from_secs(1)))
        .unwrap()
        .job_id;

    let status = wait_for(&manager, id, Duration::from_secs(8), |s| s.status.is_terminal()).await;
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.failure, Some(FailureKind::Timeout { after_secs: 1 }));
    assert!(status.error.as_deref().is_some_and(|e| !e.is_empty()));

    let dir = job_dir(&manager, id);
    for file in ["leader.pid", "worker.pid"] {
        let pid: u32 = std::fs::read_to_string(dir.join(file))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while process_alive(pid) {
            assert!(Instant::now() < deadline, "{} ({}) survived the timeout", file, pid);
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

#[tokio::test]
async fn cancelling_a_running_job_terminates_it_gracefully() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let script = fx.script(
        "graceful.sh",
        "trap 'echo stopping; exit 0' TERM\necho started\nwhile true; do sleep 0.05; done\n",
    );

    let id = manager.submit(script, JobArgs::new(), None).unwrap().job_id;
    wait_for_log(&manager, id, "started").await;

    assert!(matches!(
        manager.cancel(id).unwrap(),
        CancelOutcome::Cancelled { .. }
    ));
    let status = wait_terminal(&manager, id).await;
    assert_eq!(status.status, JobStatus::Cancelled);
    assert_eq!(status.failure, Some(FailureKind::Cancelled));
    assert!(status.error.is_some());
    assert!(manager.get_log(id, 0).unwrap().lines.contains(&"stopping".to_string()));

    assert!(matches!(
        manager.cancel(id).unwrap(),
        CancelOutcome::Noop { .. }
    ));
}

#[tokio::test]
async fn cancellation_escalates_when_sigterm_is_ignored() {
    let fx = Fixture::new();
    let manager =
        JobManager::new(fx.config().with_cancel_grace(Duration::from_millis(500))).unwrap();
    let script = fx.script(
        "stubborn.sh",
        "trap '' TERM\necho started\nwhile true; do sleep 0.05; done\n",
    );

    let id = manager.submit(script, JobArgs::new(), None).unwrap().job_id;
    wait_for_log(&manager, id, "started").await;

    manager.cancel(id).unwrap();
    let status = wait_for(&manager, id, Duration::from_secs(6), |s| s.status.is_terminal()).await;
    assert_eq!(status.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn concurrency_limit_keeps_later_jobs_pending() {
    let fx = Fixture::new();
    let manager = JobManager::new(fx.config().with_max_concurrent(1)).unwrap();
    let blocking = fx.script("block.sh", BLOCKING);
    let quick = fx.script("quick.sh", "echo quick\n");

    let first = manager.submit(blocking, JobArgs::new(), None).unwrap().job_id;
    let second = manager.submit(quick, JobArgs::new(), None).unwrap().job_id;

    wait_for_log(&manager, first, "started").await;
    for _ in 0..10 {
        assert_eq!(manager.get_status(second).unwrap().status, JobStatus::Pending);
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    release(&manager, first);
    let first_done = wait_terminal(&manager, first).await;
    let second_done = wait_terminal(&manager, second).await;

    assert_eq!(second_done.status, JobStatus::Completed);
    assert!(second_done.started_at >= first_done.finished_at);
}

#[tokio::test]
async fn pending_job_can_be_cancelled_before_it_starts() {
    let fx = Fixture::new();
    let manager = JobManager::new(fx.config().with_max_concurrent(1)).unwrap();
    let blocking = fx.script("block.sh", BLOCKING);
    let quick = fx.script("quick.sh", "echo quick\n");

    let first = manager.submit(blocking, JobArgs::new(), None).unwrap().job_id;
    let second = manager.submit(quick, JobArgs::new(), None).unwrap().job_id;
    wait_for_log(&manager, first, "started").await;

    assert!(matches!(
        manager.cancel(second).unwrap(),
        CancelOutcome::Cancelled { .. }
    ));
    let status = wait_terminal(&manager, second).await;
    assert_eq!(status.status, JobStatus::Cancelled);
    assert!(status.started_at.is_none());
    assert_eq!(manager.get_log(second, 0).unwrap().total_line_count, 0);

    release(&manager, first);
    assert_eq!(wait_terminal(&manager, first).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn list_filters_by_current_status() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let blocking = fx.script("block.sh", BLOCKING);
    let ok = fx.script("ok.sh", "exit 0\n");
    let bad = fx.script("bad.sh", "exit 1\n");

    let running = manager.submit(blocking, JobArgs::new(), None).unwrap().job_id;
    let completed = manager.submit(ok, JobArgs::new(), None).unwrap().job_id;
    let failed = manager.submit(bad, JobArgs::new(), None).unwrap().job_id;

    wait_for_log(&manager, running, "started").await;
    wait_terminal(&manager, completed).await;
    wait_terminal(&manager, failed).await;

    let ids = |status: Option<JobStatus>| -> Vec<JobId> {
        manager.list(status).jobs.into_iter().map(|j| j.job_id).collect()
    };
    assert_eq!(ids(Some(JobStatus::Running)), vec![running]);
    assert_eq!(ids(Some(JobStatus::Completed)), vec![completed]);
    assert_eq!(ids(Some(JobStatus::Failed)), vec![failed]);
    assert!(ids(Some(JobStatus::Cancelled)).is_empty());
    assert_eq!(ids(None), vec![running, completed, failed]);
    assert_eq!(manager.list(None).total_jobs, 3);

    let stats = manager.stats();
    assert_eq!((stats.running, stats.completed, stats.failed), (1, 1, 1));

    release(&manager, running);
    wait_terminal(&manager, running).await;
}

#[tokio::test]
async fn shutdown_cancels_unfinished_jobs() {
    let fx = Fixture::new();
    let manager = fx.manager();
    let blocking = fx.script("block.sh", BLOCKING);

    let id = manager.submit(blocking, JobArgs::new(), None).unwrap().job_id;
    wait_for_log(&manager, id, "started").await;

    assert_eq!(manager.shutdown(), 1);
    assert!(manager.wait_until_idle(Duration::from_secs(10)).await);
    assert_eq!(manager.get_status(id).unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn snapshots_survive_a_restart() {
    let fx = Fixture::new();
    let config = fx.config().with_persistence(RegistryPersistence::Snapshot);
    let manager = JobManager::new(config.clone()).unwrap();
    let ok = fx.script("ok.sh", "echo kept\nmkdir run_1\n");
    let blocking = fx.script("block.sh", BLOCKING);

    let finished = manager.submit(ok, JobArgs::new(), None).unwrap().job_id;
    let in_flight = manager.submit(blocking, JobArgs::new(), None).unwrap().job_id;
    wait_terminal(&manager, finished).await;
    wait_for_log(&manager, in_flight, "started").await;

    // The snapshot lands just after the in-memory transition.
    let snapshot = job_dir(&manager, finished).join("job.json");
    let deadline = Instant::now() + Duration::from_secs(5);
    while !std::fs::read_to_string(&snapshot)
        .unwrap_or_default()
        .contains("\"completed\"")
    {
        assert!(Instant::now() < deadline, "snapshot never reached completed");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let restarted = JobManager::new(config).unwrap();
    assert_eq!(restarted.list(None).total_jobs, 2);

    let status = restarted.get_status(finished).unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(restarted.get_log(finished, 0).unwrap().lines, vec!["kept"]);
    assert!(matches!(
        restarted.get_result(finished).unwrap(),
        JobResultView::Ready { .. }
    ));

    let interrupted = restarted.get_status(in_flight).unwrap();
    assert_eq!(interrupted.status, JobStatus::Failed);
    assert_eq!(interrupted.failure, Some(FailureKind::Interrupted));

    manager.shutdown();
    assert!(manager.wait_until_idle(Duration::from_secs(10)).await);
}

#[tokio::test]
async fn typed_kinds_render_their_arguments() {
    let fx = Fixture::new();
    let manager = fx.manager();
    fx.script(
        "scripts/cyclic_peptide_cyclisation.py",
        "echo \"$*\"\nmkdir run_cyclic\n",
    );
    let peptide = fx.script("inputs/linear.pdb", "ATOM\n");

    let submission = manager
        .submit_kind(
            JobKind::CyclicPeptideCyclisation {
                peptide_file: peptide.clone(),
                peptide_length: Some(8),
                output_dir: None,
            },
            None,
        )
        .unwrap();
    assert_eq!(submission.job_name.as_deref(), Some("cyclisation_linear"));

    let status = wait_terminal(&manager, submission.job_id).await;
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(
        manager.get_log(submission.job_id, 0).unwrap().lines,
        vec![format!("--input {} --length 8", peptide.display())]
    );

    let err = manager
        .submit_kind(
            JobKind::CyclicPeptideCyclisation {
                peptide_file: fx.dir.path().join("inputs/absent.pdb"),
                peptide_length: None,
                output_dir: None,
            },
            None,
        )
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));
    assert_eq!(manager.list(None).total_jobs, 1);
}

#[tokio::test]
async fn relative_input_paths_resolve_from_the_submitting_directory() {
    let fx = Fixture::new();
    let manager = fx.manager();
    fx.script(
        "scripts/cyclic_peptide_cyclisation.py",
        "test -f \"$2\" || { echo \"missing $2\" >&2; exit 3; }\nmkdir run_cyclic\n",
    );

    // Created under the test's working directory so it can be named relatively.
    let inputs = tempfile::Builder::new()
        .prefix("relative-inputs")
        .tempdir_in(".")
        .unwrap();
    std::fs::write(inputs.path().join("linear.pdb"), "ATOM\n").unwrap();
    let relative = PathBuf::from(inputs.path().file_name().unwrap()).join("linear.pdb");
    assert!(relative.is_relative());

    let id = manager
        .submit_kind(
            JobKind::CyclicPeptideCyclisation {
                peptide_file: relative,
                peptide_length: None,
                output_dir: None,
            },
            None,
        )
        .unwrap()
        .job_id;

    let status = wait_terminal(&manager, id).await;
    assert_eq!(status.status, JobStatus::Completed, "{:?}", status.error);
}

#[tokio::test]
async fn batch_collects_per_peptide_failures() {
    let fx = Fixture::new();
    let manager = fx.manager();
    fx.script("scripts/protein_peptide_docking.py", "mkdir run_dock\n");
    let protein = fx.script("inputs/receptor.pdb", "ATOM\n");
    let good = fx.script("inputs/good.pdb", "ATOM\n");
    let missing: PathBuf = fx.dir.path().join("inputs/missing.pdb");

    let outcome = manager
        .submit_batch_docking(DockingBatch {
            protein_file: protein,
            peptide_files: vec![good, missing],
            restraints_file: None,
            output_base_dir: Some(fx.dir.path().join("out")),
            job_name: Some("screen".to_string()),
        })
        .unwrap();

    assert_eq!(outcome.total_submitted, 1);
    assert_eq!(outcome.total_failed, 1);
    let errors = outcome.errors.unwrap();
    assert!(errors[0].contains("missing.pdb"), "{:?}", errors);

    let job = manager.list(None).jobs.remove(0);
    assert_eq!(job.job_id, outcome.job_ids[0]);
    assert_eq!(job.job_name.as_deref(), Some("screen_1_good"));
    assert_eq!(wait_terminal(&manager, job.job_id).await.status, JobStatus::Completed);
}
