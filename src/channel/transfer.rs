//! SFTP artifact transfer

use super::ssh::SshSession;
use super::ArtifactTransfer;
use async_trait::async_trait;
use pulsar_core_interface::{Result, TargetError};
use ssh2::Sftp;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[async_trait]
impl ArtifactTransfer for SshSession {
    async fn push(&mut self, local: &Path, remote: &Path) -> Result<()> {
        let inner = self.shared()?;
        let (local, remote) = (local.to_path_buf(), remote.to_path_buf());
        let failed = remote.clone();

        let bytes = tokio::task::spawn_blocking(move || push_blocking(&inner.sftp, &local, &remote))
            .await
            .map_err(|e| TargetError::transfer(failed, format!("transfer task failed: {}", e)))??;

        debug!(bytes, "Staged file over SFTP");
        Ok(())
    }

    async fn pull(&mut self, remote: &Path, local: &Path) -> Result<()> {
        let inner = self.shared()?;
        let (remote, local) = (remote.to_path_buf(), local.to_path_buf());
        let failed = remote.clone();

        let bytes = tokio::task::spawn_blocking(move || pull_blocking(&inner.sftp, &remote, &local))
            .await
            .map_err(|e| TargetError::transfer(failed, format!("transfer task failed: {}", e)))??;

        debug!(bytes, "Retrieved file over SFTP");
        Ok(())
    }
}

fn push_blocking(sftp: &Sftp, local: &Path, remote: &Path) -> Result<u64> {
    let mut source = File::open(local).map_err(|e| TargetError::transfer(local, e))?;

    if let Some(parent) = remote.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_remote_dir(sftp, parent);
    }

    let mut dest = sftp.create(remote).map_err(|e| TargetError::transfer(remote, e))?;
    io::copy(&mut source, &mut dest).map_err(|e| TargetError::transfer(remote, e))
}

fn pull_blocking(sftp: &Sftp, remote: &Path, local: &Path) -> Result<u64> {
    let mut source = sftp.open(remote).map_err(|e| TargetError::transfer(remote, e))?;

    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TargetError::transfer(local, e))?;
    }

    let mut dest = File::create(local).map_err(|e| TargetError::transfer(local, e))?;
    io::copy(&mut source, &mut dest).map_err(|e| TargetError::transfer(remote, e))
}

/// Create each missing component of `dir`; failures surface on the file create
fn ensure_remote_dir(sftp: &Sftp, dir: &Path) {
    let mut current = PathBuf::new();
    for component in dir.components() {
        current.push(component);
        if sftp.stat(&current).is_err() {
            sftp.mkdir(&current, 0o755).ok();
        }
    }
}
