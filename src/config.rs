/*!
 * Configuration types for Pulsar
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::{Placement, SolverSettings};
use crate::error::{PulsarError, Result};
use crate::manifest::JobManifest;
use pulsar_core_convergence::DEFAULT_TOLERANCE;

/// Main configuration for job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulsarConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// Distance from k = 1.0 still classified as critical
    #[serde(default = "default_tolerance")]
    pub classification_tolerance: f64,

    /// Maximum solver run time in seconds (0 = no limit)
    #[serde(default = "default_execute_timeout")]
    pub execute_timeout_secs: u64,

    /// TCP connect and SSH handshake timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Work directory for local runs
    #[serde(default = "default_local_workdir")]
    pub local_workdir: PathBuf,

    /// Solver invocation
    #[serde(default)]
    pub solver: SolverSettings,

    /// File names of the default reactor job
    #[serde(default)]
    pub artifacts: ArtifactNames,

    /// Remote host; required for `--target remote` unless given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSettings>,

    /// Explicit job manifest, replacing the default reactor job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<JobManifest>,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_execute_timeout() -> u64 {
    12 * 60 * 60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_local_workdir() -> PathBuf {
    PathBuf::from("pulsar-run")
}

impl Default for PulsarConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            classification_tolerance: default_tolerance(),
            execute_timeout_secs: default_execute_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            local_workdir: default_local_workdir(),
            solver: SolverSettings::default(),
            artifacts: ArtifactNames::default(),
            remote: None,
            manifest: None,
        }
    }
}

impl PulsarConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PulsarConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.classification_tolerance.is_finite() || self.classification_tolerance <= 0.0 {
            return Err(PulsarError::Config(format!(
                "classification_tolerance must be a positive number, got {}",
                self.classification_tolerance
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(PulsarError::Config(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(manifest) = &self.manifest {
            manifest.validate()?;
        }
        Ok(())
    }

    /// Solver time limit; `None` when disabled
    pub fn execute_timeout(&self) -> Option<Duration> {
        match self.execute_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The job to run: the configured manifest, or the reactor job rendered
    /// for `placement`
    pub fn manifest_for(&self, placement: Placement) -> JobManifest {
        match &self.manifest {
            Some(manifest) => manifest.clone(),
            None => JobManifest::reactor_default(&self.solver, &self.artifacts, placement),
        }
    }
}

/// File names of the default reactor job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactNames {
    /// Materials library staged next to the solver
    #[serde(default = "default_materials")]
    pub materials: String,

    /// Geometry and solver script
    #[serde(default = "default_geometry_script")]
    pub geometry_script: String,

    /// Flux plots retrieved from the plot directory
    #[serde(default = "default_flux_plots")]
    pub flux_plots: Vec<String>,

    /// Name of the convergence log, remotely and locally
    #[serde(default = "default_log_name")]
    pub log: String,
}

fn default_materials() -> String {
    "design-a-reactor-materials.hdf5".to_string()
}

fn default_geometry_script() -> String {
    "design-a-reactor.py".to_string()
}

fn default_flux_plots() -> Vec<String> {
    vec![
        "fsr-flux-group-1.png".to_string(),
        "fsr-flux-group-7.png".to_string(),
    ]
}

fn default_log_name() -> String {
    "output.txt".to_string()
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            materials: default_materials(),
            geometry_script: default_geometry_script(),
            flux_plots: default_flux_plots(),
            log: default_log_name(),
        }
    }
}

/// Remote host settings. Passwords are never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    /// Private key used instead of a password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,

    /// Authenticate through the running SSH agent
    #[serde(default)]
    pub use_agent: bool,

    /// OpenSSH known_hosts file to verify the host key against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,

    /// Run the solver with elevated privileges (password authentication only)
    #[serde(default)]
    pub escalate: bool,
}

fn default_ssh_port() -> u16 {
    22
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including solver output lines
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
