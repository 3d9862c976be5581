//! Remote Job Integration Tests
//!
//! Drives `RemoteTarget` with an in-memory connector so the session contract
//! (single close, no execution after failed staging, sudo handling) can be
//! checked without an SSH server.

use async_trait::async_trait;
use pulsar::channel::{
    ArtifactTransfer, Credential, CredentialSecret, ExecutionSession, PrivilegedCommand,
    Redactor, SessionConnector, REDACTED,
};
use pulsar::orchestrator::{JobError, JobOrchestrator, JobState, OrchestratorConfig};
use pulsar::{Classification, FileMapping, JobControl, JobManifest};
use pulsar::{CommandRequest, CommandResult, ExecControl, ExecutionTarget, OutputLine, TargetError};
use pulsar::RemoteTarget;
use pulsar_core_interface::Result as TargetResult;
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

const PASSWORD: &str = "hunter2";

const SOLVER_LOG: &str = "\
[  NORMAL ] Iteration 0: k_eff = 0.950000 res = 1.0E-01
[  NORMAL ] Iteration 1: k_eff = 0.999990 res = 1.0E-05
";

/// What the fake host saw
#[derive(Default)]
struct HostState {
    files: HashMap<PathBuf, Vec<u8>>,
    commands: Vec<String>,
    stdin_writes: Vec<Vec<u8>>,
    closes: usize,
    connects: usize,
}

type Host = Arc<Mutex<HostState>>;

struct FakeConnector {
    host: Host,
    reject_auth: bool,
    /// Files the "solver" leaves behind on every execute
    produces: Vec<(PathBuf, Vec<u8>)>,
    /// Echo the sudo password back on stderr
    echo_password: bool,
}

impl FakeConnector {
    fn new(host: Host) -> Self {
        Self {
            host,
            reject_auth: false,
            produces: vec![
                (PathBuf::from("log/output.txt"), SOLVER_LOG.as_bytes().to_vec()),
                (PathBuf::from("plots/flux.png"), b"png".to_vec()),
            ],
            echo_password: false,
        }
    }
}

struct FakeSession {
    host: Host,
    endpoint: String,
    open: bool,
    escalation: Option<SecretString>,
    produces: Vec<(PathBuf, Vec<u8>)>,
    echo_password: bool,
}

#[async_trait]
impl SessionConnector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, credential: Credential) -> TargetResult<FakeSession> {
        self.host.lock().unwrap().connects += 1;
        if self.reject_auth {
            return Err(TargetError::Authentication {
                endpoint: credential.endpoint(),
                message: "password rejected".to_string(),
            });
        }
        Ok(FakeSession {
            host: self.host.clone(),
            endpoint: credential.endpoint(),
            open: true,
            escalation: credential.escalation_secret().cloned(),
            produces: self.produces.clone(),
            echo_password: self.echo_password,
        })
    }
}

#[async_trait]
impl ExecutionSession for FakeSession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute(
        &mut self,
        request: &CommandRequest,
        control: &ExecControl,
    ) -> TargetResult<CommandResult> {
        let mut stderr = Vec::new();
        let redactor = match (&self.escalation, request.escalate) {
            (Some(secret), true) => {
                let wrapped = PrivilegedCommand::wrap(&request.command, secret);
                let mut host = self.host.lock().unwrap();
                host.commands.push(wrapped.command().to_string());
                host.stdin_writes.push(wrapped.stdin_payload().to_vec());
                if self.echo_password {
                    stderr.push(format!("sudo: echoed {}", PASSWORD));
                }
                Redactor::for_secret(secret)
            }
            (None, true) => {
                return Err(TargetError::EscalationUnavailable {
                    endpoint: self.endpoint.clone(),
                })
            }
            (_, false) => {
                self.host
                    .lock()
                    .unwrap()
                    .commands
                    .push(request.command.clone());
                Redactor::none()
            }
        };

        {
            let mut host = self.host.lock().unwrap();
            for (path, bytes) in &self.produces {
                host.files.insert(path.clone(), bytes.clone());
            }
        }

        let stderr: Vec<String> = stderr
            .iter()
            .map(|line| redactor.redact(line).into_owned())
            .collect();
        for line in &stderr {
            control.emit(OutputLine::stderr(line.clone()));
        }

        CommandResult {
            exit_status: 0,
            stdout: vec!["done".to_string()],
            stderr,
        }
        .into_checked(request.check_exit_status, &request.command)
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.host.lock().unwrap().closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[async_trait]
impl ArtifactTransfer for FakeSession {
    async fn push(&mut self, local: &Path, remote: &Path) -> TargetResult<()> {
        let bytes = std::fs::read(local).map_err(|e| TargetError::transfer(local, e))?;
        self.host
            .lock()
            .unwrap()
            .files
            .insert(remote.to_path_buf(), bytes);
        Ok(())
    }

    async fn pull(&mut self, remote: &Path, local: &Path) -> TargetResult<()> {
        let bytes = self
            .host
            .lock()
            .unwrap()
            .files
            .get(remote)
            .cloned()
            .ok_or_else(|| TargetError::transfer(remote, "no such file"))?;
        std::fs::write(local, bytes).map_err(|e| TargetError::transfer(local, e))?;
        Ok(())
    }
}

fn credential() -> Credential {
    Credential::new(
        "cluster.example.org",
        "reactor",
        CredentialSecret::Password(SecretString::from(PASSWORD.to_string())),
    )
}

fn manifest(dir: &Path, materials: PathBuf) -> JobManifest {
    JobManifest {
        name: "reactor".to_string(),
        command: "python design-a-reactor.py".to_string(),
        escalate: false,
        convergence_log: dir.join("output.txt"),
        inputs: vec![FileMapping::new(materials, "materials.h5")],
        outputs: vec![
            FileMapping::new("plots/flux.png", dir.join("flux.png")),
            FileMapping::new("log/output.txt", dir.join("output.txt")),
        ],
    }
}

async fn run(connector: FakeConnector, manifest: &JobManifest) -> pulsar::JobReport {
    let target = RemoteTarget::new(connector, credential());
    JobOrchestrator::new(OrchestratorConfig::default())
        .run(manifest, target, JobControl::new())
        .await
}

#[tokio::test]
async fn test_remote_job_runs_and_closes_once() {
    let dir = tempdir().unwrap();
    let materials = dir.path().join("materials.h5");
    std::fs::write(&materials, b"xs").unwrap();
    let host = Host::default();

    let report = run(
        FakeConnector::new(host.clone()),
        &manifest(dir.path(), materials),
    )
    .await;

    assert!(report.is_done(), "job failed: {:?}", report.failure());
    assert_eq!(report.target, "reactor@cluster.example.org:22");
    assert_eq!(
        report.outcome().unwrap().classification,
        Classification::Critical
    );

    let host = host.lock().unwrap();
    assert_eq!(host.connects, 1);
    assert_eq!(host.closes, 1);
    assert_eq!(host.files[Path::new("materials.h5")], b"xs");
    assert_eq!(host.commands, vec!["python design-a-reactor.py".to_string()]);
    assert!(dir.path().join("flux.png").exists());
}

#[tokio::test]
async fn test_staging_failure_skips_execution_and_closes() {
    let dir = tempdir().unwrap();
    let host = Host::default();

    let report = run(
        FakeConnector::new(host.clone()),
        &manifest(dir.path(), dir.path().join("absent.h5")),
    )
    .await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.step, JobState::Staging);
    assert!(matches!(failure.error, JobError::Staging(_)));

    let host = host.lock().unwrap();
    assert!(host.commands.is_empty());
    assert_eq!(host.closes, 1);
}

#[tokio::test]
async fn test_rejected_credential_is_authentication_failure() {
    let dir = tempdir().unwrap();
    let materials = dir.path().join("materials.h5");
    std::fs::write(&materials, b"xs").unwrap();
    let host = Host::default();
    let mut connector = FakeConnector::new(host.clone());
    connector.reject_auth = true;

    let report = run(connector, &manifest(dir.path(), materials)).await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.step, JobState::Staging);
    match &failure.error {
        JobError::Authentication { endpoint, .. } => {
            assert_eq!(endpoint, "reactor@cluster.example.org:22")
        }
        other => panic!("expected authentication failure, got {:?}", other),
    }
    assert_eq!(host.lock().unwrap().closes, 0);
}

#[tokio::test]
async fn test_escalated_job_sends_password_once_and_redacts_it() {
    let dir = tempdir().unwrap();
    let materials = dir.path().join("materials.h5");
    std::fs::write(&materials, b"xs").unwrap();
    let host = Host::default();
    let mut connector = FakeConnector::new(host.clone());
    connector.echo_password = true;

    let mut manifest = manifest(dir.path(), materials);
    manifest.escalate = true;

    let report = run(connector, &manifest).await;
    assert!(report.is_done(), "job failed: {:?}", report.failure());

    let outcome = report.outcome().unwrap();
    assert!(outcome
        .command
        .stderr
        .iter()
        .all(|line| !line.contains(PASSWORD)));
    assert_eq!(outcome.command.stderr, vec![format!("sudo: echoed {}", REDACTED)]);

    let host = host.lock().unwrap();
    assert_eq!(host.stdin_writes, vec![format!("{}\n", PASSWORD).into_bytes()]);
    assert_eq!(host.commands.len(), 1);
    assert!(host.commands[0].starts_with("sudo -S -p '' bash -c "));
    assert!(!host.commands[0].contains(PASSWORD));
}

#[tokio::test]
async fn test_target_is_single_use() {
    let host = Host::default();
    let mut target = RemoteTarget::new(FakeConnector::new(host.clone()), credential());

    target.open().await.unwrap();
    target.close().await;
    target.close().await;

    let err = target.open().await.unwrap_err();
    assert!(matches!(err, TargetError::Session(_)));

    let host = host.lock().unwrap();
    assert_eq!(host.connects, 1);
    assert_eq!(host.closes, 1);
}

#[tokio::test]
async fn test_execute_without_open_is_session_error() {
    let mut target = RemoteTarget::new(FakeConnector::new(Host::default()), credential());
    let err = target
        .execute(&CommandRequest::new("true"), &ExecControl::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TargetError::Session(_)));
}
