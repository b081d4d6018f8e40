//! Locating executables and building the job's process invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use dockjob_core::{DomainError, DomainResult};

use super::types::JobRecord;

/// Resolve an executable the way a shell would.
///
/// A path with a separator must name an existing file; a bare name is looked
/// up in `PATH`. The result is absolute.
pub fn resolve_executable(path: &Path) -> DomainResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(DomainError::validation("script path is empty"));
    }

    if path.is_absolute() || path.components().count() > 1 {
        return resolve_file(path);
    }

    let search = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
        .map(|found| absolute(&found))
        .ok_or_else(|| {
            DomainError::validation(format!(
                "script not found on PATH: {}",
                path.display()
            ))
        })
}

/// Resolve a script that is handed to an interpreter: it must exist as a
/// file, relative names are taken from the current directory.
pub fn resolve_file(path: &Path) -> DomainResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(DomainError::validation("script path is empty"));
    }
    if !path.is_file() {
        return Err(DomainError::validation(format!(
            "script not found: {}",
            path.display()
        )));
    }
    Ok(absolute(path))
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Build the process for `record`, rooted in its job directory.
///
/// The process leads its own process group so that termination reaches
/// every descendant it spawns.
pub fn build_command(record: &JobRecord, interpreter: Option<&Path>) -> Command {
    let mut command = match interpreter {
        Some(interpreter) => {
            let mut command = Command::new(interpreter);
            command.arg(&record.script_path);
            command
        }
        None => Command::new(&record.script_path),
    };

    command
        .args(record.args.to_command_line())
        .current_dir(&record.job_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    command
}
