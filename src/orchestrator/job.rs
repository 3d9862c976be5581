//! Job lifecycle types

use chrono::{DateTime, Utc};
use pulsar_core_convergence::{Classification, ConvergenceRecord};
use pulsar_core_interface::{CommandResult, OutputLine, TargetError};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(u64);

impl JobId {
    pub fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Where a job is in its lifecycle
///
/// ```text
/// Created -> Staging -> Executing -> Retrieving -> Classifying -> Done
///    \__________\___________\____________\_____________\-----> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Staging,
    Executing,
    Retrieving,
    Classifying,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// The next state on the success path
    pub fn successor(self) -> Option<JobState> {
        match self {
            JobState::Created => Some(JobState::Staging),
            JobState::Staging => Some(JobState::Executing),
            JobState::Executing => Some(JobState::Retrieving),
            JobState::Retrieving => Some(JobState::Classifying),
            JobState::Classifying => Some(JobState::Done),
            JobState::Done | JobState::Failed => None,
        }
    }

    /// Forward by one step, or to Failed from any non-terminal state
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobState::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Created => "created",
            JobState::Staging => "staging",
            JobState::Executing => "executing",
            JobState::Retrieving => "retrieving",
            JobState::Classifying => "classifying",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A state entered at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// Mutable lifecycle record of one job
#[derive(Debug, Clone)]
pub(crate) struct Job {
    id: JobId,
    history: Vec<Transition>,
}

impl Job {
    pub(crate) fn new(id: JobId) -> Self {
        Self {
            id,
            history: vec![Transition {
                state: JobState::Created,
                at: Utc::now(),
            }],
        }
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn state(&self) -> JobState {
        self.history
            .last()
            .map_or(JobState::Created, |transition| transition.state)
    }

    /// Record a transition; illegal transitions are ignored and return false
    pub(crate) fn advance(&mut self, next: JobState) -> bool {
        if !self.state().can_transition_to(next) {
            return false;
        }
        self.history.push(Transition {
            state: next,
            at: Utc::now(),
        });
        true
    }

    pub(crate) fn into_history(self) -> Vec<Transition> {
        self.history
    }
}

/// Why a job failed
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("authentication failed for {endpoint}: {message}")]
    Authentication { endpoint: String, message: String },

    #[error("staging failed: {0}")]
    Staging(#[source] TargetError),

    #[error("execution failed: {0}")]
    Execution(#[source] TargetError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] TargetError),

    #[error("solver timed out after {}s", .after.as_secs())]
    Timeout {
        after: Duration,
        stdout: Vec<String>,
        stderr: Vec<String>,
    },

    #[error("cannot read convergence log {}: {source}", .path.display())]
    LogUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no convergence data in {}", .path.display())]
    NoConvergenceData { path: PathBuf },

    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    /// Attribute a target error to the step it happened in
    pub fn from_target(step: JobState, err: TargetError) -> Self {
        match err {
            TargetError::Authentication { endpoint, message } => {
                JobError::Authentication { endpoint, message }
            }
            TargetError::Cancelled => JobError::Cancelled,
            TargetError::Timeout {
                after,
                stdout,
                stderr,
            } => JobError::Timeout {
                after,
                stdout,
                stderr,
            },
            err => match step {
                JobState::Staging => JobError::Staging(err),
                JobState::Retrieving => JobError::Retrieval(err),
                _ => JobError::Execution(err),
            },
        }
    }

    /// Output captured from the solver before the failure
    pub fn captured_output(&self) -> Option<(&[String], &[String])> {
        match self {
            JobError::Timeout { stdout, stderr, .. } => Some((stdout, stderr)),
            JobError::Execution(err) => err.captured_output(),
            _ => None,
        }
    }

    /// The file a staging or retrieval failure was about
    pub fn failing_path(&self) -> Option<&Path> {
        match self {
            JobError::Staging(err) | JobError::Retrieval(err) => err.failing_path(),
            JobError::LogUnreadable { path, .. } | JobError::NoConvergenceData { path } => {
                Some(path)
            }
            _ => None,
        }
    }
}

/// A failed job: the error and the step it happened in
#[derive(Debug, Error)]
#[error("job failed while {step}: {error}")]
pub struct JobFailure {
    pub step: JobState,
    #[source]
    pub error: JobError,
}

impl JobFailure {
    pub fn new(step: JobState, error: JobError) -> Self {
        Self { step, error }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, JobError::Cancelled)
    }
}

/// Result of a job that reached Done
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub classification: Classification,

    /// Last `k` in the record
    pub final_k: f64,

    pub record: ConvergenceRecord,

    /// Solver exit status and captured output
    pub command: CommandResult,

    /// Caller-side paths of every retrieved file
    pub artifacts: Vec<PathBuf>,
}

/// Final report of a run
#[derive(Debug)]
pub struct JobReport {
    pub id: JobId,
    pub name: String,

    /// Name of the target the job ran on
    pub target: String,

    /// Every state entered, in order, ending in Done or Failed
    pub history: Vec<Transition>,

    pub result: Result<JobOutcome, JobFailure>,
}

impl JobReport {
    pub fn state(&self) -> JobState {
        self.history
            .last()
            .map_or(JobState::Created, |transition| transition.state)
    }

    pub fn is_done(&self) -> bool {
        self.state() == JobState::Done
    }

    pub fn outcome(&self) -> Option<&JobOutcome> {
        self.result.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.result.as_ref().err()
    }

    /// States visited, without timestamps
    pub fn states(&self) -> Vec<JobState> {
        self.history.iter().map(|t| t.state).collect()
    }

    /// Wall-clock time from creation to the terminal state
    pub fn elapsed(&self) -> Duration {
        match (self.history.first(), self.history.last()) {
            (Some(first), Some(last)) => (last.at - first.at).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    /// Convert into the outcome, or the failure as an error
    pub fn into_result(self) -> Result<JobOutcome, JobFailure> {
        self.result
    }
}

/// Progress notifications from a running job
#[derive(Debug, Clone)]
pub enum JobEvent {
    StateChanged { id: JobId, state: JobState },
    Staged { id: JobId, path: PathBuf },
    Output { id: JobId, line: OutputLine },
    Retrieved { id: JobId, path: PathBuf },
}
