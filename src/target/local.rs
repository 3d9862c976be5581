//! Run jobs on this machine
//!
//! Staging copies inputs into a work directory, the command runs there under
//! `sh -c`, and retrieval moves outputs back out.

use async_trait::async_trait;
use pulsar_core_interface::{
    CommandRequest, CommandResult, ExecControl, ExecutionTarget, OutputLine, OutputStream,
    Result, TargetError,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for output readers after killing a command
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs commands in a local work directory
#[derive(Debug, Clone)]
pub struct LocalTarget {
    workdir: PathBuf,
    shell: String,
}

impl LocalTarget {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Execution-side paths are relative to the work directory
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

#[async_trait]
impl ExecutionTarget for LocalTarget {
    fn name(&self) -> &str {
        "local"
    }

    async fn open(&mut self) -> Result<()> {
        fs::create_dir_all(&self.workdir).await.map_err(|e| {
            TargetError::Session(format!(
                "cannot create work directory {}: {}",
                self.workdir.display(),
                e
            ))
        })?;
        debug!(workdir = %self.workdir.display(), "Local work directory ready");
        Ok(())
    }

    async fn stage(&mut self, local: &Path, remote: &Path) -> Result<()> {
        let dest = self.resolve(remote);

        if same_file(local, &dest).await {
            debug!(path = %dest.display(), "Input already in place");
            return Ok(());
        }

        ensure_parent(&dest).await?;
        let bytes = fs::copy(local, &dest)
            .await
            .map_err(|e| TargetError::transfer(local, e))?;
        debug!(from = %local.display(), to = %dest.display(), bytes, "Staged");
        Ok(())
    }

    async fn execute(
        &mut self,
        request: &CommandRequest,
        control: &ExecControl,
    ) -> Result<CommandResult> {
        if request.escalate {
            return Err(TargetError::EscalationUnavailable {
                endpoint: self.name().to_string(),
            });
        }

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&request.command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a kill reaches everything the script started
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            TargetError::execution(
                format!("failed to spawn {}: {}", self.shell, e),
                vec![],
                vec![],
            )
        })?;

        let stdout_reader = spawn_reader(child.stdout.take(), OutputStream::Stdout, control);
        let stderr_reader = spawn_reader(child.stderr.take(), OutputStream::Stderr, control);

        let deadline = async {
            match request.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        let finish = tokio::select! {
            status = child.wait() => Finish::Exited(status),
            _ = control.cancel_token().cancelled() => Finish::Cancelled,
            _ = deadline => Finish::TimedOut,
        };

        let grace = match finish {
            Finish::Exited(_) => None,
            _ => {
                kill_process_group(&mut child).await;
                Some(DRAIN_GRACE)
            }
        };

        let stdout = stdout_reader.collect(grace).await;
        let stderr = stderr_reader.collect(grace).await;

        match finish {
            Finish::Exited(Ok(status)) => CommandResult {
                exit_status: status.code().unwrap_or(-1),
                stdout,
                stderr,
            }
            .into_checked(request.check_exit_status, &request.command),
            Finish::Exited(Err(e)) => Err(TargetError::execution(
                format!("failed waiting for command: {}", e),
                stdout,
                stderr,
            )),
            Finish::Cancelled => Err(TargetError::Cancelled),
            Finish::TimedOut => Err(TargetError::Timeout {
                after: request.timeout.unwrap_or_default(),
                stdout,
                stderr,
            }),
        }
    }

    async fn retrieve(&mut self, remote: &Path, local: &Path) -> Result<()> {
        let source = self.resolve(remote);

        if same_file(&source, local).await {
            return Ok(());
        }

        ensure_parent(local).await?;
        move_file(&source, local)
            .await
            .map_err(|e| TargetError::transfer(&source, e))?;
        debug!(from = %source.display(), to = %local.display(), "Retrieved");
        Ok(())
    }

    async fn close(&mut self) {}
}

enum Finish {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Kill the command's process group, then reap the shell
async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            warn!(pid, "Failed to kill local process group: {}", e);
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill local command: {}", e);
    }
}

/// Lines read so far from one output pipe, shared with its reader task
///
/// An abandoned reader still leaves its lines behind.
struct PipeReader {
    lines: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl PipeReader {
    /// Wait for EOF; with `grace`, stop waiting after that long
    async fn collect(self, grace: Option<Duration>) -> Vec<String> {
        let PipeReader { lines, mut task } = self;

        match grace {
            None => {
                let _ = (&mut task).await;
            }
            Some(limit) => {
                if tokio::time::timeout(limit, &mut task).await.is_err() {
                    debug!("Output pipe still open after kill; keeping partial output");
                    task.abort();
                }
            }
        }

        let mut lines = lines.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *lines)
    }
}

fn spawn_reader<R>(reader: Option<R>, stream: OutputStream, control: &ExecControl) -> PipeReader
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = lines.clone();
    let control = control.clone();

    let task = tokio::spawn(async move {
        let Some(reader) = reader else {
            return;
        };

        let mut reader = BufReader::new(reader).lines();
        while let Ok(Some(text)) = reader.next_line().await {
            control.emit(OutputLine {
                stream,
                text: text.clone(),
            });
            captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text);
        }
    });

    PipeReader { lines, task }
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent)
            .await
            .map_err(|e| TargetError::transfer(path, e)),
        None => Ok(()),
    }
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await
}
