//! On-disk layout of job directories and the optional registry snapshots.
//!
//! ```text
//! <jobs_root>/<job_id>/job.log    captured output, one line per line
//! <jobs_root>/<job_id>/job.json   record snapshot (Snapshot policy only)
//! <jobs_root>/<job_id>/run*/      artifacts written by the process
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::types::JobRecord;

pub const LOG_FILE: &str = "job.log";
pub const SNAPSHOT_FILE: &str = "job.json";

/// Whether the registry outlives the hosting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryPersistence {
    /// Registry lives only in memory; logs and artifacts still land on disk.
    #[default]
    InMemory,
    /// Each record is written to `job.json` on every transition and reloaded
    /// when the manager starts.
    Snapshot,
}

impl std::str::FromStr for RegistryPersistence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" | "in-memory" => Ok(Self::InMemory),
            "snapshot" | "disk" => Ok(Self::Snapshot),
            other => Err(format!("expected 'memory' or 'snapshot', got '{}'", other)),
        }
    }
}

pub fn log_path(job_dir: &Path) -> PathBuf {
    job_dir.join(LOG_FILE)
}

/// Write `job.json` atomically (temp file, then rename).
pub fn write_snapshot(record: &JobRecord) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
    let target = record.job_dir.join(SNAPSHOT_FILE);
    let tmp = record.job_dir.join(format!("{}.tmp", SNAPSHOT_FILE));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, &target)
}

/// Snapshot `record` when the policy asks for it. Failures are logged, not
/// returned: a lost snapshot must never fail the job itself.
pub fn save(policy: RegistryPersistence, record: &JobRecord) {
    if policy != RegistryPersistence::Snapshot {
        return;
    }
    if let Err(e) = write_snapshot(record) {
        warn!(job_id = %record.job_id, path = %record.job_dir.display(), error = %e, "failed to write job snapshot");
    }
}

/// A record reloaded from disk together with its captured output.
#[derive(Debug, Clone)]
pub struct RestoredJob {
    pub record: JobRecord,
    pub log: Vec<String>,
}

/// Load every readable snapshot under `root`.
///
/// Unreadable or corrupt snapshots are skipped with a warning so that one
/// bad directory cannot keep the manager from starting.
pub fn load_snapshots(root: &Path) -> io::Result<Vec<RestoredJob>> {
    let mut restored = Vec::new();
    if !root.exists() {
        return Ok(restored);
    }

    for entry in fs::read_dir(root)? {
        let dir = entry?.path();
        let snapshot = dir.join(SNAPSHOT_FILE);
        if !snapshot.is_file() {
            continue;
        }

        let record: JobRecord = match fs::read(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
        {
            Ok(record) => record,
            Err(error) => {
                warn!(path = %snapshot.display(), error = %error, "skipping unreadable job snapshot");
                continue;
            }
        };

        let log = match fs::read(log_path(&dir)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "job log unreadable; restoring without it");
                Vec::new()
            }
        };

        restored.push(RestoredJob { record, log });
    }

    restored.sort_by_key(|r| (r.record.submitted_at, r.record.job_id));
    Ok(restored)
}
