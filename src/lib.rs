/*!
 * Pulsar - remote and local reactor simulation job runner
 *
 * Submits a long-running transport-solver job to this machine or to a remote
 * compute host, waits for it, retrieves its artifacts and classifies the
 * final multiplication factor:
 * - SSH command execution with optional privilege escalation
 * - SFTP staging and retrieval of job artifacts
 * - Background job worker with cancellation and timeouts
 * - k_eff convergence parsing and Critical / Sub-critical / Super-critical verdicts
 *
 * Version: 0.2.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod channel;
pub mod cli_style;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod orchestrator;
pub mod series;
pub mod target;

// Re-export commonly used types
pub use config::{LogLevel, PulsarConfig, RemoteSettings};
pub use error::{PulsarError, Result};
pub use manifest::{FileMapping, JobManifest};
pub use orchestrator::{
    JobControl, JobEvent, JobHandle, JobOrchestrator, JobReport, JobState, OrchestratorConfig,
};
pub use pulsar_core_convergence::{classify, parse, Classification, ConvergenceRecord};
pub use pulsar_core_interface::{
    CommandRequest, CommandResult, ExecControl, ExecutionTarget, OutputLine, TargetError,
};
pub use target::{LocalTarget, RemoteTarget};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
