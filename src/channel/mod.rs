/*!
 * Remote execution channel
 *
 * An authenticated session to a compute host, used for running commands and
 * moving files. A connector turns a [`Credential`] into a session; the
 * session owns the credential's reusable secret (for privilege escalation)
 * until it is closed.
 *
 * The SSH implementation is behind the `ssh-backend` feature.
 */

mod credential;
mod escalate;

#[cfg(feature = "ssh-backend")]
mod lines;
#[cfg(feature = "ssh-backend")]
mod pump;
#[cfg(feature = "ssh-backend")]
mod ssh;
#[cfg(feature = "ssh-backend")]
mod transfer;

pub use credential::{
    password_from_env, Credential, CredentialSecret, DEFAULT_SSH_PORT, PASSWORD_ENV,
};
pub use escalate::{shell_quote, PrivilegedCommand, Redactor, REDACTED};

#[cfg(feature = "ssh-backend")]
pub use ssh::{SshConnector, SshOptions, SshSession};

use async_trait::async_trait;
use pulsar_core_interface::{CommandRequest, CommandResult, ExecControl, Result};
use std::path::Path;

/// Opens sessions from credentials
#[async_trait]
pub trait SessionConnector: Send + Sync {
    type Session: RemoteSession;

    /// Authenticate and return a ready session
    ///
    /// Fails with `TargetError::Authentication` when the host is unreachable
    /// or rejects the credential.
    async fn connect(&self, credential: Credential) -> Result<Self::Session>;
}

/// Command execution over an open session
#[async_trait]
pub trait ExecutionSession: Send {
    /// `user@host:port`, for logs and errors
    fn endpoint(&self) -> &str;

    /// Run one command and wait for it to finish, time out or be cancelled
    ///
    /// With `request.escalate` the command is run through `sudo`, reusing the
    /// session's own password; that password never appears in the command
    /// line, the returned output or the logs.
    async fn execute(
        &mut self,
        request: &CommandRequest,
        control: &ExecControl,
    ) -> Result<CommandResult>;

    /// Release the session. Calling it again is a no-op.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// File copies over an open session
#[async_trait]
pub trait ArtifactTransfer: Send {
    /// Copy a local file to the remote host, overwriting
    async fn push(&mut self, local: &Path, remote: &Path) -> Result<()>;

    /// Copy a remote file to the local filesystem, overwriting
    async fn pull(&mut self, remote: &Path, local: &Path) -> Result<()>;
}

/// A session that can both execute and transfer
pub trait RemoteSession: ExecutionSession + ArtifactTransfer {}

impl<T: ExecutionSession + ArtifactTransfer> RemoteSession for T {}
