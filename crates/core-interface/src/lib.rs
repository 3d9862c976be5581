//! Pulsar Core Interface: Execution Target Abstraction
//!
//! This crate defines the `ExecutionTarget` trait, which abstracts where a
//! simulation job runs. The orchestrator only ever talks to this trait, so the
//! same state machine drives:
//!
//! - **LocalTarget**: plain filesystem copies and a subprocess on this machine
//! - **RemoteTarget**: an authenticated SSH session with SFTP transfers
//! - test doubles that count calls
//!
//! # Operations
//!
//! 1. **open**: acquire whatever the target needs (a session, a work directory)
//! 2. **stage**: copy one input file to where the job will run
//! 3. **execute**: run a command, streaming its output, and collect the result
//! 4. **retrieve**: copy one produced file back to the caller
//! 5. **close**: release the session; idempotent
//!
//! # Example
//!
//! ```rust,no_run
//! use pulsar_core_interface::{CommandRequest, ExecControl, ExecutionTarget};
//! use std::path::Path;
//!
//! async fn hello<T: ExecutionTarget>(target: &mut T) -> pulsar_core_interface::Result<()> {
//!     target.open().await?;
//!     target.stage(Path::new("input.txt"), Path::new("input.txt")).await?;
//!     let result = target
//!         .execute(&CommandRequest::new("wc -l input.txt"), &ExecControl::new())
//!         .await?;
//!     println!("{}", result.stdout_text());
//!     target.close().await;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum TargetError {
    /// The target refused the credential or could not be reached for authentication
    #[error("Authentication failed for {endpoint}: {message}")]
    Authentication { endpoint: String, message: String },

    /// The command failed. `exit_status` is `None` when the failure happened
    /// before an exit status was known (network loss, spawn failure).
    #[error("Command failed{}: {message}", exit_suffix(.exit_status))]
    Execution {
        exit_status: Option<i32>,
        stdout: Vec<String>,
        stderr: Vec<String>,
        message: String,
    },

    /// A single file could not be copied
    #[error("Transfer of {} failed: {cause}", .path.display())]
    Transfer { path: PathBuf, cause: String },

    /// The command exceeded its maximum duration
    #[error("Command timed out after {}s", .after.as_secs())]
    Timeout {
        after: Duration,
        stdout: Vec<String>,
        stderr: Vec<String>,
    },

    /// Cancellation was requested while the operation was in flight
    #[error("Operation cancelled")]
    Cancelled,

    /// Escalation was requested but the session holds no reusable secret
    #[error("Privilege escalation requested but no password is available for {endpoint}")]
    EscalationUnavailable { endpoint: String },

    /// Operation attempted on a target that has not been opened, or was closed
    #[error("Session error: {0}")]
    Session(String),
}

fn exit_suffix(exit_status: &Option<i32>) -> String {
    match exit_status {
        Some(code) => format!(" with exit status {}", code),
        None => String::new(),
    }
}

impl TargetError {
    /// Build an execution failure from a finished command
    pub fn non_zero_exit(result: CommandResult, command: &str) -> Self {
        TargetError::Execution {
            exit_status: Some(result.exit_status),
            message: format!("non-zero exit status when running \"{}\"", command),
            stdout: result.stdout,
            stderr: result.stderr,
        }
    }

    /// Build an execution failure that has no exit status
    pub fn execution(message: impl Into<String>, stdout: Vec<String>, stderr: Vec<String>) -> Self {
        TargetError::Execution {
            exit_status: None,
            stdout,
            stderr,
            message: message.into(),
        }
    }

    pub fn transfer(path: impl Into<PathBuf>, cause: impl fmt::Display) -> Self {
        TargetError::Transfer {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TargetError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TargetError::Timeout { .. })
    }

    /// Path of the file that failed to transfer, if this is a transfer error
    pub fn failing_path(&self) -> Option<&Path> {
        match self {
            TargetError::Transfer { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Output captured before the failure, if any
    pub fn captured_output(&self) -> Option<(&[String], &[String])> {
        match self {
            TargetError::Execution { stdout, stderr, .. }
            | TargetError::Timeout { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TargetError>;

/// A command to run on a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Shell command line, passed to the target's shell unparsed
    pub command: String,

    /// Run with elevated privileges using the session's own secret
    pub escalate: bool,

    /// Turn a non-zero exit status into `TargetError::Execution`
    pub check_exit_status: bool,

    /// Maximum wall-clock duration; `None` waits forever
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    /// Create a request with exit status checking on, no escalation, no timeout
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            escalate: false,
            check_exit_status: true,
            timeout: None,
        }
    }

    pub fn escalated(mut self, escalate: bool) -> Self {
        self.escalate = escalate;
        self
    }

    pub fn check_exit_status(mut self, check: bool) -> Self {
        self.check_exit_status = check;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Which stream a captured line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of command output, without its trailing newline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// Callback receiving output lines as they arrive
///
/// May be invoked from a blocking worker thread.
pub type OutputSink = Arc<dyn Fn(OutputLine) + Send + Sync>;

/// Per-call controls for `execute`: cancellation and live output
#[derive(Clone, Default)]
pub struct ExecControl {
    cancel: CancellationToken,
    sink: Option<OutputSink>,
}

impl ExecControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Forward a line to the sink, if one is attached
    pub fn emit(&self, line: OutputLine) {
        if let Some(sink) = &self.sink {
            sink(line);
        }
    }
}

impl fmt::Debug for ExecControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecControl")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Outcome of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_status: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }

    /// Apply `check_exit_status` semantics for `command`
    pub fn into_checked(self, check_exit_status: bool, command: &str) -> Result<Self> {
        if check_exit_status && !self.success() {
            Err(TargetError::non_zero_exit(self, command))
        } else {
            Ok(self)
        }
    }
}

/// Where a job runs
///
/// All methods take `&mut self`: a target, and the session behind it, is used
/// by exactly one job at a time.
#[async_trait]
pub trait ExecutionTarget: Send {
    /// Short name for logs ("local", "user@host:22")
    fn name(&self) -> &str;

    /// Acquire the target. Remote targets authenticate here.
    async fn open(&mut self) -> Result<()>;

    /// Copy `local` (caller side) to `remote` (execution side), overwriting
    async fn stage(&mut self, local: &Path, remote: &Path) -> Result<()>;

    /// Run a command and wait for it to exit, the timeout, or cancellation
    async fn execute(
        &mut self,
        request: &CommandRequest,
        control: &ExecControl,
    ) -> Result<CommandResult>;

    /// Copy `remote` (execution side) back to `local` (caller side)
    async fn retrieve(&mut self, remote: &Path, local: &Path) -> Result<()>;

    /// Release the target. Safe on a target that was never opened or is
    /// already closed.
    async fn close(&mut self);
}

#[async_trait]
impl<T: ExecutionTarget + ?Sized> ExecutionTarget for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn open(&mut self) -> Result<()> {
        (**self).open().await
    }

    async fn stage(&mut self, local: &Path, remote: &Path) -> Result<()> {
        (**self).stage(local, remote).await
    }

    async fn execute(
        &mut self,
        request: &CommandRequest,
        control: &ExecControl,
    ) -> Result<CommandResult> {
        (**self).execute(request, control).await
    }

    async fn retrieve(&mut self, remote: &Path, local: &Path) -> Result<()> {
        (**self).retrieve(remote, local).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_command_request_builder() {
        let request = CommandRequest::new("ls")
            .escalated(true)
            .check_exit_status(false)
            .with_timeout(Some(Duration::from_secs(5)));

        assert_eq!(request.command, "ls");
        assert!(request.escalate);
        assert!(!request.check_exit_status);
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));

        let defaults = CommandRequest::new("ls");
        assert!(!defaults.escalate);
        assert!(defaults.check_exit_status);
        assert!(defaults.timeout.is_none());
    }

    #[test]
    fn test_checked_result_keeps_output() {
        let result = CommandResult {
            exit_status: 3,
            stdout: vec!["partial".into()],
            stderr: vec!["boom".into()],
        };

        let err = result.clone().into_checked(true, "solve").unwrap_err();
        match &err {
            TargetError::Execution {
                exit_status,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(*exit_status, Some(3));
                assert_eq!(stdout, &vec!["partial".to_string()]);
                assert_eq!(stderr, &vec!["boom".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("exit status 3"));

        assert_eq!(result.clone().into_checked(false, "solve").unwrap(), result);
    }

    #[test]
    fn test_error_helpers() {
        let err = TargetError::transfer("plots/flux.png", "no such file");
        assert_eq!(err.failing_path(), Some(Path::new("plots/flux.png")));
        assert_eq!(err.to_string(), "Transfer of plots/flux.png failed: no such file");

        let err = TargetError::execution("connection reset", vec![], vec![]);
        assert_eq!(err.to_string(), "Command failed: connection reset");
        assert!(err.failing_path().is_none());

        assert!(TargetError::Cancelled.is_cancelled());
        assert!(TargetError::Timeout {
            after: Duration::from_secs(1),
            stdout: vec![],
            stderr: vec![],
        }
        .is_timeout());
    }

    #[test]
    fn test_exec_control_emits_to_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let control = ExecControl::new().with_sink(Arc::new(move |line: OutputLine| {
            sink_seen.lock().unwrap().push(line);
        }));

        control.emit(OutputLine::stdout("hello"));
        control.emit(OutputLine::stderr("warn"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].stream, OutputStream::Stderr);
    }

    #[tokio::test]
    async fn test_exec_control_cancellation() {
        let token = CancellationToken::new();
        let control = ExecControl::new().with_cancel(token.clone());
        assert!(!control.is_cancelled());

        token.cancel();
        assert!(control.is_cancelled());
        control.cancel_token().cancelled().await;
    }
}
