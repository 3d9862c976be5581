/*!
 * Error types for Pulsar
 */

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::manifest::ManifestError;
use crate::orchestrator::{JobError, JobFailure};
use pulsar_core_interface::TargetError;

pub type Result<T> = std::result::Result<T, PulsarError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_JOB_FAILED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Error)]
pub enum PulsarError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job manifest failed validation
    #[error("Invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    /// I/O error outside of a job
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Direct use of an execution target failed (the `exec` command)
    #[error(transparent)]
    Target(#[from] TargetError),

    /// A job ended in the Failed state
    #[error("{0}")]
    Job(Box<JobFailure>),

    /// A log was read but held no convergence points
    #[error("No convergence data in {}", .0.display())]
    NoConvergenceData(PathBuf),

    /// Encoding or decoding a config, manifest or series file failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The background job task panicked or was aborted
    #[error("Job worker failed: {0}")]
    Worker(String),
}

impl PulsarError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PulsarError::Config(_)
            | PulsarError::Manifest(_)
            | PulsarError::Serialization(_)
            | PulsarError::Worker(_) => EXIT_FATAL,
            PulsarError::Target(TargetError::Authentication { .. }) => EXIT_FATAL,
            PulsarError::Target(TargetError::Cancelled) => EXIT_CANCELLED,
            PulsarError::Job(failure) => match failure.error {
                JobError::Cancelled => EXIT_CANCELLED,
                JobError::Authentication { .. } | JobError::InvalidManifest(_) => EXIT_FATAL,
                _ => EXIT_JOB_FAILED,
            },
            PulsarError::Io(_) | PulsarError::Target(_) | PulsarError::NoConvergenceData(_) => {
                EXIT_JOB_FAILED
            }
        }
    }

    /// Check if this error came from a user-requested cancellation
    pub fn is_cancelled(&self) -> bool {
        self.exit_code() == EXIT_CANCELLED
    }
}

impl From<JobFailure> for PulsarError {
    fn from(failure: JobFailure) -> Self {
        PulsarError::Job(Box::new(failure))
    }
}

impl From<toml::de::Error> for PulsarError {
    fn from(err: toml::de::Error) -> Self {
        PulsarError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for PulsarError {
    fn from(err: toml::ser::Error) -> Self {
        PulsarError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for PulsarError {
    fn from(err: serde_json::Error) -> Self {
        PulsarError::Serialization(err.to_string())
    }
}
