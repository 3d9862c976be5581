/*!
 * Job manifests
 *
 * A manifest describes one simulation job: the files to stage, the command
 * to run, the files to bring back and which of those is the convergence log.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::command::{Placement, SolverCommand, SolverSettings};
use crate::config::ArtifactNames;
use crate::error::Result;

/// Manifest validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("job command is empty")]
    EmptyCommand,

    #[error("two {kind} files map to {}", .path.display())]
    DuplicateDestination { kind: &'static str, path: PathBuf },

    #[error("convergence log {} is not among the retrieved outputs", .0.display())]
    LogNotRetrieved(PathBuf),
}

/// One file copy: `source` is read, `destination` is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl FileMapping {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

fn default_job_name() -> String {
    "reactor".to_string()
}

/// Everything the orchestrator needs to run one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    /// Label used in logs and reports
    #[serde(default = "default_job_name")]
    pub name: String,

    /// Shell command run in the target's work directory
    pub command: String,

    /// Run the command with elevated privileges
    #[serde(default)]
    pub escalate: bool,

    /// Local file path of the retrieved convergence log
    pub convergence_log: PathBuf,

    /// Caller-side source to execution-side destination
    #[serde(default)]
    pub inputs: Vec<FileMapping>,

    /// Execution-side source to caller-side destination
    #[serde(default)]
    pub outputs: Vec<FileMapping>,
}

impl JobManifest {
    /// The design-a-reactor job: stage the materials library and geometry
    /// script, run the solver, bring back two flux plots and the log.
    pub fn reactor_default(
        solver: &SolverSettings,
        artifacts: &ArtifactNames,
        placement: Placement,
    ) -> Self {
        let solver_command = SolverCommand::new(solver, &artifacts.log);

        let mut inputs = vec![FileMapping::new(&artifacts.materials, &artifacts.materials)];
        if artifacts.geometry_script != artifacts.materials {
            inputs.push(FileMapping::new(
                &artifacts.geometry_script,
                &artifacts.geometry_script,
            ));
        }

        let mut outputs: Vec<FileMapping> = artifacts
            .flux_plots
            .iter()
            .map(|plot| FileMapping::new(format!("{}/{}", solver.plot_dir, plot), plot))
            .collect();
        outputs.push(FileMapping::new(solver_command.log_path(), &artifacts.log));

        Self {
            name: default_job_name(),
            command: solver_command.render(placement),
            escalate: false,
            convergence_log: PathBuf::from(&artifacts.log),
            inputs,
            outputs,
        }
    }

    /// Load a manifest from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let manifest: JobManifest = toml::from_str(&contents)?;
        Ok(manifest)
    }

    /// Check that the manifest can be run
    ///
    /// Destinations must be unique within inputs and within outputs, and the
    /// convergence log must be one of the retrieved outputs.
    pub fn validate(&self) -> std::result::Result<(), ManifestError> {
        if self.command.trim().is_empty() {
            return Err(ManifestError::EmptyCommand);
        }

        check_unique("input", &self.inputs)?;
        check_unique("output", &self.outputs)?;

        if !self
            .outputs
            .iter()
            .any(|o| o.destination == self.convergence_log)
        {
            return Err(ManifestError::LogNotRetrieved(self.convergence_log.clone()));
        }

        Ok(())
    }

    /// Caller-side paths written by retrieval
    pub fn retrieved_paths(&self) -> Vec<PathBuf> {
        self.outputs.iter().map(|o| o.destination.clone()).collect()
    }
}

fn check_unique(
    kind: &'static str,
    mappings: &[FileMapping],
) -> std::result::Result<(), ManifestError> {
    let mut seen = HashSet::new();
    for mapping in mappings {
        if !seen.insert(&mapping.destination) {
            return Err(ManifestError::DuplicateDestination {
                kind,
                path: mapping.destination.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn reactor() -> JobManifest {
        JobManifest::reactor_default(
            &SolverSettings::default(),
            &ArtifactNames::default(),
            Placement::Remote,
        )
    }

    #[test]
    fn test_reactor_default_layout() {
        let manifest = reactor();

        assert_eq!(
            manifest.inputs,
            vec![
                FileMapping::new(
                    "design-a-reactor-materials.hdf5",
                    "design-a-reactor-materials.hdf5"
                ),
                FileMapping::new("design-a-reactor.py", "design-a-reactor.py"),
            ]
        );
        assert_eq!(
            manifest.outputs,
            vec![
                FileMapping::new("plots/fsr-flux-group-1.png", "fsr-flux-group-1.png"),
                FileMapping::new("plots/fsr-flux-group-7.png", "fsr-flux-group-7.png"),
                FileMapping::new("log/output.txt", "output.txt"),
            ]
        );
        assert_eq!(manifest.convergence_log, PathBuf::from("output.txt"));
        assert!(manifest.command.contains("--tolerance=1E-3"));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let mut manifest = reactor();
        manifest.command = "   ".into();
        assert_eq!(manifest.validate(), Err(ManifestError::EmptyCommand));
    }

    #[test]
    fn test_validate_rejects_duplicate_outputs() {
        let mut manifest = reactor();
        manifest
            .outputs
            .push(FileMapping::new("plots/other.png", "fsr-flux-group-1.png"));

        let err = manifest.validate().unwrap_err();
        assert!(matches!(
            err,
            ManifestError::DuplicateDestination { kind: "output", .. }
        ));
        assert!(err.to_string().contains("fsr-flux-group-1.png"));
    }

    #[test]
    fn test_validate_requires_log_in_outputs() {
        let mut manifest = reactor();
        manifest.convergence_log = PathBuf::from("elsewhere.txt");
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::LogNotRetrieved(PathBuf::from("elsewhere.txt")))
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
name = "pin-cell"
command = "./solve.sh"
convergence_log = "out/log.txt"

[[inputs]]
source = "pin.h5"
destination = "pin.h5"

[[outputs]]
source = "log.txt"
destination = "out/log.txt"
"#
        )
        .unwrap();

        let manifest = JobManifest::from_file(file.path()).unwrap();
        assert_eq!(manifest.name, "pin-cell");
        assert!(!manifest.escalate);
        assert_eq!(manifest.inputs.len(), 1);
        assert_eq!(manifest.retrieved_paths(), vec![PathBuf::from("out/log.txt")]);
        assert!(manifest.validate().is_ok());
    }
}
