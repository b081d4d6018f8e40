//! Typed job kinds.
//!
//! Each kind enumerates the options its script understands, validates them
//! before anything is recorded, and renders them as [`JobArgs`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dockjob_core::{DomainError, DomainResult};

use super::types::{JobArgs, JobId};

/// A recognized computation with its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Dock a peptide onto a protein, optionally guided by restraints.
    ProteinPeptideDocking {
        protein_file: PathBuf,
        peptide_file: PathBuf,
        #[serde(default)]
        restraints_file: Option<PathBuf>,
        #[serde(default)]
        output_dir: Option<PathBuf>,
    },
    /// Cyclise a linear peptide.
    CyclicPeptideCyclisation {
        peptide_file: PathBuf,
        /// Residue count; the script detects it when absent
        #[serde(default)]
        peptide_length: Option<i64>,
        #[serde(default)]
        output_dir: Option<PathBuf>,
    },
    /// Docking driven by experimentally identified residues.
    InformationDrivenDocking {
        protein_file: PathBuf,
        peptide_file: PathBuf,
        #[serde(default)]
        active_protein_residues: Option<String>,
        #[serde(default)]
        active_peptide_residues: Option<String>,
        #[serde(default)]
        passive_protein_residues: Option<String>,
        #[serde(default)]
        passive_peptide_residues: Option<String>,
        #[serde(default)]
        output_dir: Option<PathBuf>,
    },
}

impl JobKind {
    /// File name of the script inside the configured scripts directory.
    pub fn script_name(&self) -> &'static str {
        match self {
            JobKind::ProteinPeptideDocking { .. } => "protein_peptide_docking.py",
            JobKind::CyclicPeptideCyclisation { .. } => "cyclic_peptide_cyclisation.py",
            JobKind::InformationDrivenDocking { .. } => "information_driven_docking.py",
        }
    }

    pub fn script_path(&self, scripts_dir: &Path) -> PathBuf {
        scripts_dir.join(self.script_name())
    }

    fn peptide_file(&self) -> &Path {
        match self {
            JobKind::ProteinPeptideDocking { peptide_file, .. }
            | JobKind::CyclicPeptideCyclisation { peptide_file, .. }
            | JobKind::InformationDrivenDocking { peptide_file, .. } => peptide_file,
        }
    }

    /// Job name used when the caller does not supply one.
    pub fn default_job_name(&self) -> String {
        let stem = file_stem(self.peptide_file());
        match self {
            JobKind::ProteinPeptideDocking { .. } => format!("protein_peptide_docking_{}", stem),
            JobKind::CyclicPeptideCyclisation { .. } => format!("cyclisation_{}", stem),
            JobKind::InformationDrivenDocking { .. } => format!("info_docking_{}", stem),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        match self {
            JobKind::ProteinPeptideDocking {
                protein_file,
                peptide_file,
                restraints_file,
                ..
            } => {
                require_file("protein", protein_file, "pdb")?;
                require_file("peptide", peptide_file, "pdb")?;
                if let Some(restraints) = restraints_file {
                    require_file("restraints", restraints, "tbl")?;
                }
            }
            JobKind::CyclicPeptideCyclisation {
                peptide_file,
                peptide_length,
                ..
            } => {
                require_file("peptide", peptide_file, "pdb")?;
                if let Some(length) = peptide_length {
                    if *length <= 0 {
                        return Err(DomainError::validation(format!(
                            "peptide_length must be positive, got {}",
                            length
                        )));
                    }
                }
            }
            JobKind::InformationDrivenDocking {
                protein_file,
                peptide_file,
                ..
            } => {
                require_file("protein", protein_file, "pdb")?;
                require_file("peptide", peptide_file, "pdb")?;
                let mut any = false;
                for (name, list) in self.residue_lists() {
                    if let Some(list) = list {
                        parse_residues(name, list)?;
                        any = true;
                    }
                }
                if !any {
                    return Err(DomainError::validation(
                        "at least one set of restraint residues must be provided for information-driven docking",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Named residue lists, with blank entries treated as absent.
    fn residue_lists(&self) -> Vec<(&'static str, Option<&str>)> {
        match self {
            JobKind::InformationDrivenDocking {
                active_protein_residues,
                active_peptide_residues,
                passive_protein_residues,
                passive_peptide_residues,
                ..
            } => [
                ("active-protein", active_protein_residues),
                ("active-peptide", active_peptide_residues),
                ("passive-protein", passive_protein_residues),
                ("passive-peptide", passive_peptide_residues),
            ]
            .into_iter()
            .map(|(name, list)| {
                let list = list.as_deref().map(str::trim).filter(|s| !s.is_empty());
                (name, list)
            })
            .collect(),
            _ => Vec::new(),
        }
    }

    /// Arguments for the script. Call [`JobKind::validate`] first; residue
    /// lists that fail to parse are passed through untouched.
    pub fn to_args(&self) -> JobArgs {
        let mut args = JobArgs::new();
        match self {
            JobKind::ProteinPeptideDocking {
                protein_file,
                peptide_file,
                restraints_file,
                output_dir,
            } => {
                args.insert("protein", input_arg(protein_file));
                args.insert("peptide", input_arg(peptide_file));
                if let Some(restraints) = restraints_file {
                    args.insert("restraints", input_arg(restraints));
                }
                if let Some(output) = output_dir {
                    args.insert("output", path_arg(output));
                }
            }
            JobKind::CyclicPeptideCyclisation {
                peptide_file,
                peptide_length,
                output_dir,
            } => {
                args.insert("input", input_arg(peptide_file));
                if let Some(length) = peptide_length {
                    args.insert("length", *length);
                }
                if let Some(output) = output_dir {
                    args.insert("output", path_arg(output));
                }
            }
            JobKind::InformationDrivenDocking {
                protein_file,
                peptide_file,
                output_dir,
                ..
            } => {
                args.insert("protein", input_arg(protein_file));
                args.insert("peptide", input_arg(peptide_file));
                for (name, list) in self.residue_lists() {
                    if let Some(list) = list {
                        let rendered = match parse_residues(name, list) {
                            Ok(residues) => residues
                                .iter()
                                .map(u32::to_string)
                                .collect::<Vec<_>>()
                                .join(","),
                            Err(_) => list.to_string(),
                        };
                        args.insert(name, rendered);
                    }
                }
                if let Some(output) = output_dir {
                    args.insert("output", path_arg(output));
                }
            }
        }
        args
    }
}

/// Input files are checked against the current directory but read from the
/// job directory, so relative paths are anchored here.
fn input_arg(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Output directories stay relative to the job directory.
fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

fn require_file(label: &str, path: &Path, extension: &str) -> DomainResult<()> {
    if !path.is_file() {
        return Err(DomainError::validation(format!(
            "{} file not found: {}",
            label,
            path.display()
        )));
    }
    let matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension));
    if !matches {
        return Err(DomainError::validation(format!(
            "{} file must be a .{} file: {}",
            label,
            extension,
            path.display()
        )));
    }
    Ok(())
}

/// Parse a comma-separated list of residue numbers, e.g. `"36, 109,113"`.
pub fn parse_residues(name: &str, list: &str) -> DomainResult<Vec<u32>> {
    list.split(',')
        .map(str::trim)
        .map(|item| match item.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(DomainError::validation(format!(
                "{} residues must be comma-separated positive integers, got '{}'",
                name, list
            ))),
        })
        .collect()
}

/// Many peptides docked against one protein.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockingBatch {
    pub protein_file: PathBuf,
    pub peptide_files: Vec<PathBuf>,
    #[serde(default)]
    pub restraints_file: Option<PathBuf>,
    /// Each peptide writes to `<output_base_dir>/docking_<stem>`
    #[serde(default)]
    pub output_base_dir: Option<PathBuf>,
    /// Prefix of the per-peptide job names (default `batch`)
    #[serde(default)]
    pub job_name: Option<String>,
}

/// One peptide's share of a [`DockingBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub peptide_file: PathBuf,
    pub kind: JobKind,
    pub job_name: String,
}

impl DockingBatch {
    /// One docking job per peptide, numbered from 1.
    pub fn entries(&self) -> Vec<BatchEntry> {
        let base = self.job_name.as_deref().unwrap_or("batch");
        self.peptide_files
            .iter()
            .enumerate()
            .map(|(i, peptide)| {
                let stem = file_stem(peptide);
                let kind = JobKind::ProteinPeptideDocking {
                    protein_file: self.protein_file.clone(),
                    peptide_file: peptide.clone(),
                    restraints_file: self.restraints_file.clone(),
                    output_dir: self
                        .output_base_dir
                        .as_ref()
                        .map(|base| base.join(format!("docking_{}", stem))),
                };
                BatchEntry {
                    peptide_file: peptide.clone(),
                    kind,
                    job_name: format!("{}_{}_{}", base, i + 1, stem),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Submitted,
    Error,
}

/// Outcome of a batch submission. Per-peptide failures are collected here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSubmission {
    /// `submitted` when at least one job was accepted
    pub status: BatchStatus,
    pub job_ids: Vec<JobId>,
    pub total_submitted: usize,
    pub total_failed: usize,
    pub errors: Option<Vec<String>>,
    pub message: String,
}

impl BatchSubmission {
    pub fn new(job_ids: Vec<JobId>, errors: Vec<String>) -> Self {
        let status = if job_ids.is_empty() {
            BatchStatus::Error
        } else {
            BatchStatus::Submitted
        };
        Self {
            status,
            total_submitted: job_ids.len(),
            total_failed: errors.len(),
            message: format!("submitted {} docking jobs", job_ids.len()),
            job_ids,
            errors: if errors.is_empty() { None } else { Some(errors) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inputs {
        _dir: tempfile::TempDir,
        protein: PathBuf,
        peptide: PathBuf,
        restraints: PathBuf,
    }

    fn inputs() -> Inputs {
        let dir = tempfile::tempdir().unwrap();
        let protein = dir.path().join("receptor.pdb");
        let peptide = dir.path().join("pep7.pdb");
        let restraints = dir.path().join("ambig.tbl");
        for path in [&protein, &peptide, &restraints] {
            std::fs::write(path, "ATOM\n").unwrap();
        }
        Inputs {
            _dir: dir,
            protein,
            peptide,
            restraints,
        }
    }

    #[test]
    fn docking_renders_flags_and_default_name() {
        let files = inputs();
        let kind = JobKind::ProteinPeptideDocking {
            protein_file: files.protein.clone(),
            peptide_file: files.peptide.clone(),
            restraints_file: Some(files.restraints.clone()),
            output_dir: None,
        };
        kind.validate().unwrap();
        assert_eq!(kind.default_job_name(), "protein_peptide_docking_pep7");

        let line = kind.to_args().to_command_line();
        assert_eq!(
            line,
            vec![
                "--peptide".to_string(),
                path_arg(&files.peptide),
                "--protein".to_string(),
                path_arg(&files.protein),
                "--restraints".to_string(),
                path_arg(&files.restraints),
            ]
        );
    }

    #[test]
    fn relative_inputs_render_absolute_and_outputs_stay_relative() {
        let kind = JobKind::CyclicPeptideCyclisation {
            peptide_file: PathBuf::from("inputs/linear.pdb"),
            peptide_length: None,
            output_dir: Some(PathBuf::from("cyclic_out")),
        };
        let args = kind.to_args();
        let expected = std::env::current_dir().unwrap().join("inputs/linear.pdb");
        assert_eq!(
            args.get("input"),
            Some(&serde_json::json!(expected.to_string_lossy()))
        );
        assert_eq!(args.get("output"), Some(&serde_json::json!("cyclic_out")));
    }

    #[test]
    fn missing_or_mistyped_inputs_are_rejected() {
        let files = inputs();
        let missing = JobKind::CyclicPeptideCyclisation {
            peptide_file: files.peptide.with_file_name("nope.pdb"),
            peptide_length: None,
            output_dir: None,
        };
        assert!(missing.validate().is_err());

        let wrong_ext = JobKind::ProteinPeptideDocking {
            protein_file: files.protein.clone(),
            peptide_file: files.peptide.clone(),
            restraints_file: Some(files.protein.clone()),
            output_dir: None,
        };
        let err = wrong_ext.validate().unwrap_err();
        assert!(err.to_string().contains(".tbl"));
    }

    #[test]
    fn cyclisation_length_must_be_positive() {
        let files = inputs();
        let kind = |length| JobKind::CyclicPeptideCyclisation {
            peptide_file: files.peptide.clone(),
            peptide_length: Some(length),
            output_dir: None,
        };
        assert!(kind(0).validate().is_err());
        assert!(kind(-3).validate().is_err());
        kind(12).validate().unwrap();
        assert_eq!(kind(12).default_job_name(), "cyclisation_pep7");
        assert_eq!(
            kind(12).to_args().get("length"),
            Some(&serde_json::json!(12))
        );
    }

    #[test]
    fn information_driven_docking_needs_residues() {
        let files = inputs();
        let kind = |active: Option<&str>| JobKind::InformationDrivenDocking {
            protein_file: files.protein.clone(),
            peptide_file: files.peptide.clone(),
            active_protein_residues: active.map(str::to_string),
            active_peptide_residues: None,
            passive_protein_residues: Some("   ".to_string()),
            passive_peptide_residues: None,
            output_dir: None,
        };

        assert!(kind(None).validate().is_err());
        assert!(kind(Some("36,x")).validate().is_err());
        assert!(kind(Some("0")).validate().is_err());

        let ok = kind(Some("36, 109,113"));
        ok.validate().unwrap();
        let args = ok.to_args();
        assert_eq!(args.get("active-protein"), Some(&serde_json::json!("36,109,113")));
        assert!(args.get("passive-protein").is_none());
        assert_eq!(ok.default_job_name(), "info_docking_pep7");
    }

    #[test]
    fn kinds_deserialize_from_tagged_json() {
        let kind: JobKind = serde_json::from_value(serde_json::json!({
            "kind": "cyclic_peptide_cyclisation",
            "peptide_file": "/data/linear.pdb",
            "peptide_length": 9
        }))
        .unwrap();
        assert_eq!(
            kind,
            JobKind::CyclicPeptideCyclisation {
                peptide_file: PathBuf::from("/data/linear.pdb"),
                peptide_length: Some(9),
                output_dir: None,
            }
        );
        assert_eq!(
            kind.script_path(Path::new("/opt/scripts")),
            PathBuf::from("/opt/scripts/cyclic_peptide_cyclisation.py")
        );
    }

    #[test]
    fn batch_entries_are_numbered_per_peptide() {
        let batch = DockingBatch {
            protein_file: PathBuf::from("/in/receptor.pdb"),
            peptide_files: vec![PathBuf::from("/in/a.pdb"), PathBuf::from("/in/b.pdb")],
            restraints_file: None,
            output_base_dir: Some(PathBuf::from("/out")),
            job_name: Some("screen".to_string()),
        };

        let entries = batch.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].job_name, "screen_2_b");
        assert_eq!(entries[1].peptide_file, PathBuf::from("/in/b.pdb"));
        match &entries[1].kind {
            JobKind::ProteinPeptideDocking { output_dir, .. } => {
                assert_eq!(output_dir.as_deref(), Some(Path::new("/out/docking_b")));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn batch_without_accepted_jobs_is_an_error() {
        let outcome = BatchSubmission::new(vec![], vec!["peptide file not found: x".to_string()]);
        assert_eq!(outcome.status, BatchStatus::Error);
        assert_eq!(outcome.total_failed, 1);

        let outcome = BatchSubmission::new(vec![JobId::new()], vec![]);
        assert_eq!(outcome.status, BatchStatus::Submitted);
        assert!(outcome.errors.is_none());
    }
}
