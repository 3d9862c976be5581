//! Run jobs on a remote host over an authenticated session

use crate::channel::{ArtifactTransfer, Credential, ExecutionSession, SessionConnector};
use async_trait::async_trait;
use pulsar_core_interface::{
    CommandRequest, CommandResult, ExecControl, ExecutionTarget, Result, TargetError,
};
use std::path::Path;
use tracing::debug;

/// An `ExecutionTarget` backed by one session from `C`
///
/// Single use: `open` consumes the credential, and `close` releases both the
/// session and the secret it holds.
pub struct RemoteTarget<C: SessionConnector> {
    connector: C,
    credential: Option<Credential>,
    session: Option<C::Session>,
    name: String,
}

impl<C: SessionConnector> RemoteTarget<C> {
    pub fn new(connector: C, credential: Credential) -> Self {
        Self {
            name: credential.endpoint(),
            connector,
            credential: Some(credential),
            session: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_open())
    }

    fn session(&mut self) -> Result<&mut C::Session> {
        self.session
            .as_mut()
            .ok_or_else(|| TargetError::Session(format!("no open session to {}", self.name)))
    }
}

#[async_trait]
impl<C: SessionConnector> ExecutionTarget for RemoteTarget<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let credential = self.credential.take().ok_or_else(|| {
            TargetError::Session(format!(
                "credential for {} was already used; open a new target",
                self.name
            ))
        })?;

        let session = self.connector.connect(credential).await?;
        self.session = Some(session);
        Ok(())
    }

    async fn stage(&mut self, local: &Path, remote: &Path) -> Result<()> {
        self.session()?.push(local, remote).await
    }

    async fn execute(
        &mut self,
        request: &CommandRequest,
        control: &ExecControl,
    ) -> Result<CommandResult> {
        self.session()?.execute(request, control).await
    }

    async fn retrieve(&mut self, remote: &Path, local: &Path) -> Result<()> {
        self.session()?.pull(remote, local).await
    }

    async fn close(&mut self) {
        self.credential = None;
        if let Some(mut session) = self.session.take() {
            debug!(endpoint = %self.name, "Closing remote target");
            session.close().await;
        }
    }
}
