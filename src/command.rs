/*!
 * Solver command rendering
 *
 * Builds the shell script that runs the reactor solver on a target. The
 * script clears stale output directories, launches the solver and renames its
 * timestamped log to the fixed name the convergence parser reads.
 */

use serde::{Deserialize, Serialize};

/// Where the rendered command will run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Local,
    Remote,
}

/// Accelerator library locations exported before a remote solve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorEnv {
    /// Appended to `LD_LIBRARY_PATH`
    pub library_dir: String,

    /// Appended to `PATH`
    pub binary_dir: String,
}

impl Default for AcceleratorEnv {
    fn default() -> Self {
        Self {
            library_dir: "/usr/local/cuda-5.5/lib64/".to_string(),
            binary_dir: "/usr/local/cuda-5.5/bin/".to_string(),
        }
    }
}

/// Solver invocation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Interpreter used to launch the solver script
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Solver script, relative to the work directory
    #[serde(default = "default_script")]
    pub script: String,

    /// Number of azimuthal angles (`-a`)
    #[serde(default = "default_azimuthal_angles")]
    pub azimuthal_angles: u32,

    /// Solver threads (`-t`)
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Source convergence tolerance passed to the solver
    #[serde(default = "default_solver_tolerance")]
    pub tolerance: f64,

    /// Extra arguments appended verbatim
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Arguments added only for local runs
    #[serde(default = "default_local_args")]
    pub local_args: Vec<String>,

    /// Directory the solver writes its log into
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Directory the solver writes plots into
    #[serde(default = "default_plot_dir")]
    pub plot_dir: String,

    /// Glob matching the solver's timestamped log file inside `log_dir`
    #[serde(default = "default_log_pattern")]
    pub log_pattern: String,

    /// Exported only for remote runs
    #[serde(default = "default_accelerator")]
    pub accelerator: Option<AcceleratorEnv>,
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_script() -> String {
    "design-a-reactor.py".to_string()
}

fn default_azimuthal_angles() -> u32 {
    16
}

fn default_threads() -> u32 {
    8
}

fn default_solver_tolerance() -> f64 {
    1e-3
}

fn default_local_args() -> Vec<String> {
    vec!["-f".to_string(), "True".to_string()]
}

fn default_log_dir() -> String {
    "log".to_string()
}

fn default_plot_dir() -> String {
    "plots".to_string()
}

fn default_log_pattern() -> String {
    "openmoc*".to_string()
}

fn default_accelerator() -> Option<AcceleratorEnv> {
    Some(AcceleratorEnv::default())
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: default_script(),
            azimuthal_angles: default_azimuthal_angles(),
            threads: default_threads(),
            tolerance: default_solver_tolerance(),
            extra_args: Vec::new(),
            local_args: default_local_args(),
            log_dir: default_log_dir(),
            plot_dir: default_plot_dir(),
            log_pattern: default_log_pattern(),
            accelerator: default_accelerator(),
        }
    }
}

/// Renders [`SolverSettings`] into a shell script
#[derive(Debug, Clone, Copy)]
pub struct SolverCommand<'a> {
    settings: &'a SolverSettings,
    log_name: &'a str,
}

impl<'a> SolverCommand<'a> {
    /// `log_name` is the fixed file name the solver log is renamed to
    pub fn new(settings: &'a SolverSettings, log_name: &'a str) -> Self {
        Self { settings, log_name }
    }

    /// Path of the renamed log, relative to the work directory
    pub fn log_path(&self) -> String {
        format!("{}/{}", self.settings.log_dir, self.log_name)
    }

    pub fn render(&self, placement: Placement) -> String {
        let s = self.settings;
        let mut lines = vec![
            "set -e".to_string(),
            format!("rm -rf {}/ {}/", s.log_dir, s.plot_dir),
        ];

        if placement == Placement::Remote {
            if let Some(env) = &s.accelerator {
                lines.push(format!(
                    "export LD_LIBRARY_PATH=$LD_LIBRARY_PATH:{}",
                    env.library_dir
                ));
                lines.push(format!("export PATH=$PATH:{}", env.binary_dir));
            }
        }

        let mut solve = format!(
            "{} {} -a {} -t {} --tolerance={:E}",
            s.interpreter, s.script, s.azimuthal_angles, s.threads, s.tolerance
        );
        let local_args = match placement {
            Placement::Local => s.local_args.as_slice(),
            Placement::Remote => &[],
        };
        for arg in s.extra_args.iter().chain(local_args) {
            solve.push(' ');
            solve.push_str(arg);
        }
        lines.push(solve);

        lines.push(format!(
            "mv {}/{} {}",
            s.log_dir,
            s.log_pattern,
            self.log_path()
        ));

        lines.join("\n")
    }
}
