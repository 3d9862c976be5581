//! SSH session: authentication and command execution
//!
//! libssh2 calls are blocking, so every operation runs inside
//! `tokio::task::spawn_blocking` against a shared `Arc<SshInner>`.

use super::credential::{Credential, CredentialSecret};
use super::escalate::{PrivilegedCommand, Redactor};
use super::pump::{announce_group, kill_group_command, pump_output, send_escalation, CommandStreams};
use super::{ExecutionSession, SessionConnector};
use async_trait::async_trait;
use pulsar_core_interface::{CommandRequest, CommandResult, ExecControl, Result, TargetError};
use secrecy::{ExposeSecret, SecretString};
use ssh2::{Channel, CheckResult, KnownHostFileKind, Session, Sftp};
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection options shared by every session a connector opens
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// TCP connect and handshake timeout
    pub connect_timeout: Duration,

    /// Enable SSH transport compression
    pub compress: bool,

    /// OpenSSH known_hosts file; when set the host key must match an entry
    pub known_hosts: Option<PathBuf>,

    /// Sleep between polls of an idle command channel
    pub poll_interval: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            compress: false,
            known_hosts: None,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Opens [`SshSession`]s
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, credential: Credential) -> Result<SshSession> {
        credential.validate()?;

        let endpoint = credential.endpoint();
        let options = self.options.clone();

        tokio::task::spawn_blocking(move || connect_blocking(credential, options))
            .await
            .map_err(|e| TargetError::Authentication {
                endpoint,
                message: format!("connect task failed: {}", e),
            })?
    }
}

pub(super) struct SshInner {
    pub(super) session: Session,
    pub(super) sftp: Sftp,
    escalation: Option<SecretString>,
    endpoint: String,
}

/// An authenticated SSH connection with an open SFTP channel
pub struct SshSession {
    inner: Option<Arc<SshInner>>,
    endpoint: String,
    poll_interval: Duration,
}

impl SshSession {
    /// Shared handle for a blocking worker; fails once the session is closed
    pub(super) fn shared(&self) -> Result<Arc<SshInner>> {
        self.inner
            .clone()
            .ok_or_else(|| TargetError::Session(format!("session to {} is closed", self.endpoint)))
    }
}

fn connect_blocking(credential: Credential, options: SshOptions) -> Result<SshSession> {
    let credential = credential.resolve_prompt()?;
    let endpoint = credential.endpoint();
    let auth_error = |message: String| TargetError::Authentication {
        endpoint: endpoint.clone(),
        message,
    };

    debug!(
        endpoint = %endpoint,
        method = credential.secret.kind(),
        "Connecting"
    );

    let addr = (credential.host.as_str(), credential.port)
        .to_socket_addrs()
        .map_err(|e| auth_error(format!("cannot resolve host: {}", e)))?
        .next()
        .ok_or_else(|| auth_error("host resolved to no addresses".to_string()))?;

    let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)
        .map_err(|e| auth_error(format!("connection failed: {}", e)))?;

    let mut session =
        Session::new().map_err(|e| auth_error(format!("failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(options.connect_timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_compress(options.compress);

    session
        .handshake()
        .map_err(|e| auth_error(format!("handshake failed: {}", e)))?;

    if let Some(known_hosts) = &options.known_hosts {
        verify_host_key(&session, &credential, known_hosts).map_err(auth_error)?;
    }

    authenticate(&session, &credential).map_err(auth_error)?;

    if !session.authenticated() {
        return Err(auth_error("Authentication failed".to_string()));
    }

    // Solver runs are polled without blocking; no per-call timeout after login
    session.set_timeout(0);

    let sftp = session
        .sftp()
        .map_err(|e| TargetError::Session(format!("Failed to open SFTP channel: {}", e)))?;

    info!(endpoint = %endpoint, "SSH session established");

    Ok(SshSession {
        inner: Some(Arc::new(SshInner {
            session,
            sftp,
            escalation: credential.escalation_secret().cloned(),
            endpoint: endpoint.clone(),
        })),
        endpoint,
        poll_interval: options.poll_interval,
    })
}

fn verify_host_key(
    session: &Session,
    credential: &Credential,
    known_hosts: &Path,
) -> std::result::Result<(), String> {
    let mut hosts = session
        .known_hosts()
        .map_err(|e| format!("cannot load known hosts: {}", e))?;
    hosts
        .read_file(known_hosts, KnownHostFileKind::OpenSSH)
        .map_err(|e| format!("cannot read {}: {}", known_hosts.display(), e))?;

    let (key, _) = session
        .host_key()
        .ok_or_else(|| "server presented no host key".to_string())?;

    match hosts.check_port(&credential.host, credential.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err("host key does not match known_hosts entry".to_string()),
        CheckResult::NotFound => Err(format!("host not found in {}", known_hosts.display())),
        CheckResult::Failure => Err("host key check failed".to_string()),
    }
}

fn authenticate(session: &Session, credential: &Credential) -> std::result::Result<(), String> {
    let username = credential.username.as_str();

    match &credential.secret {
        CredentialSecret::Password(password) => session
            .userauth_password(username, password.expose_secret())
            .map_err(|e| format!("Password authentication failed: {}", e)),
        CredentialSecret::KeyFile {
            key_path,
            passphrase,
        } => {
            let pass: Option<&str> = passphrase.as_ref().map(|p| p.expose_secret());
            session
                .userauth_pubkey_file(username, None, key_path, pass)
                .map_err(|e| format!("Key file authentication failed: {}", e))
        }
        CredentialSecret::Agent => {
            let mut agent = session
                .agent()
                .map_err(|e| format!("Failed to connect to SSH agent: {}", e))?;
            agent
                .connect()
                .map_err(|e| format!("Failed to connect to SSH agent: {}", e))?;
            agent
                .list_identities()
                .map_err(|e| format!("Failed to list SSH agent identities: {}", e))?;
            let identities = agent
                .identities()
                .map_err(|e| format!("Failed to get SSH agent identities: {}", e))?;

            if identities
                .iter()
                .any(|identity| agent.userauth(username, identity).is_ok())
            {
                Ok(())
            } else {
                Err("No valid identity found in SSH agent".to_string())
            }
        }
        CredentialSecret::Prompt => Err("password prompt was not resolved".to_string()),
    }
}

#[async_trait]
impl ExecutionSession for SshSession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute(
        &mut self,
        request: &CommandRequest,
        control: &ExecControl,
    ) -> Result<CommandResult> {
        let inner = self.shared()?;
        let request = request.clone();
        let control = control.clone();
        let poll_interval = self.poll_interval;

        tokio::task::spawn_blocking(move || {
            execute_blocking(&inner, &request, &control, poll_interval)
        })
        .await
        .map_err(|e| {
            TargetError::execution(format!("execution task failed: {}", e), vec![], vec![])
        })?
    }

    async fn close(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        let endpoint = self.endpoint.clone();
        let result = tokio::task::spawn_blocking(move || {
            inner
                .session
                .disconnect(None, "Closing connection", None)
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(endpoint = %endpoint, "SSH session closed"),
            Ok(Err(e)) => warn!(endpoint = %endpoint, "SSH disconnect failed: {}", e),
            Err(e) => warn!(endpoint = %endpoint, "SSH disconnect task failed: {}", e),
        }
    }

    fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let _ = inner.session.disconnect(None, "Closing connection", None);
        }
    }
}

fn execute_blocking(
    inner: &SshInner,
    request: &CommandRequest,
    control: &ExecControl,
    poll_interval: Duration,
) -> Result<CommandResult> {
    let (privileged, redactor) = if request.escalate {
        let secret = inner
            .escalation
            .as_ref()
            .ok_or_else(|| TargetError::EscalationUnavailable {
                endpoint: inner.endpoint.clone(),
            })?;
        (
            Some(PrivilegedCommand::wrap(&request.command, secret)),
            Redactor::for_secret(secret),
        )
    } else {
        (None, Redactor::none())
    };

    let command = announce_group(
        privileged
            .as_ref()
            .map_or(request.command.as_str(), |p| p.command()),
    );

    debug!(
        endpoint = %inner.endpoint,
        command = %request.command,
        escalate = request.escalate,
        "Executing remote command"
    );

    let channel_error = |what: &str, e: &dyn std::fmt::Display| {
        TargetError::execution(format!("{}: {}", what, e), vec![], vec![])
    };

    let mut channel = inner
        .session
        .channel_session()
        .map_err(|e| channel_error("failed to open channel", &e))?;
    channel
        .exec(&command)
        .map_err(|e| channel_error("failed to start command", &e))?;

    if let Some(privileged) = &privileged {
        send_escalation(&mut channel, privileged)
            .map_err(|e| channel_error("failed to send escalation password", &e))?;
    }
    channel
        .send_eof()
        .map_err(|e| channel_error("failed to close command stdin", &e))?;

    inner.session.set_blocking(false);
    let pumped = pump_output(&mut channel, request, control, &redactor, poll_interval);
    inner.session.set_blocking(true);

    let (stdout, stderr) = match pumped.result {
        Ok(output) => output,
        Err(e) => {
            let _ = channel.close();
            if e.is_timeout() || e.is_cancelled() {
                match pumped.group {
                    Some(group) => stop_remote_group(inner, group, request.escalate),
                    None => warn!(
                        endpoint = %inner.endpoint,
                        "Remote command never reported its process group; it may still be running"
                    ),
                }
            }
            return Err(e);
        }
    };

    if let Err(e) = channel.wait_close() {
        return Err(TargetError::execution(
            format!("channel did not close cleanly: {}", e),
            stdout,
            stderr,
        ));
    }
    let exit_status = match channel.exit_status() {
        Ok(status) => status,
        Err(e) => {
            return Err(TargetError::execution(
                format!("no exit status: {}", e),
                stdout,
                stderr,
            ))
        }
    };

    if exit_status != 0 {
        warn!(endpoint = %inner.endpoint, exit_status, "Remote command exited non-zero");
    }

    CommandResult {
        exit_status,
        stdout,
        stderr,
    }
    .into_checked(request.check_exit_status, &request.command)
}

impl CommandStreams for Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stderr().read(buf)
    }

    fn at_eof(&self) -> bool {
        self.eof()
    }
}

/// Kill the process group of a command abandoned after a timeout or cancel
///
/// Best effort: failures are logged, never returned.
fn stop_remote_group(inner: &SshInner, group: u32, escalate: bool) {
    let kill = kill_group_command(group);
    let privileged = inner
        .escalation
        .as_ref()
        .filter(|_| escalate)
        .map(|secret| PrivilegedCommand::wrap(&kill, secret));

    let outcome = run_cleanup(inner, &kill, privileged.as_ref());
    match outcome {
        Ok(0) => info!(endpoint = %inner.endpoint, group, "Stopped remote command"),
        Ok(status) => warn!(
            endpoint = %inner.endpoint,
            group,
            status,
            "Remote kill exited non-zero; the command may still be running"
        ),
        Err(e) => warn!(
            endpoint = %inner.endpoint,
            group,
            "Could not stop remote command: {}", e
        ),
    }
}

fn run_cleanup(
    inner: &SshInner,
    command: &str,
    privileged: Option<&PrivilegedCommand>,
) -> std::result::Result<i32, String> {
    let mut channel = inner.session.channel_session().map_err(|e| e.to_string())?;
    channel
        .exec(privileged.map_or(command, |p| p.command()))
        .map_err(|e| e.to_string())?;
    if let Some(privileged) = privileged {
        send_escalation(&mut channel, privileged).map_err(|e| e.to_string())?;
    }
    channel.send_eof().map_err(|e| e.to_string())?;
    channel.wait_close().map_err(|e| e.to_string())?;
    channel.exit_status().map_err(|e| e.to_string())
}
