/*!
 * Pulsar CLI - Command Line Interface
 *
 * Version: 0.2.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pulsar::{
    cli_style::{
        job_summary_table, print_error, print_info, print_success, print_warning,
        section_header, verdict_line, Icons, Theme,
    },
    command::Placement,
    config::{LogLevel, PulsarConfig},
    error::{PulsarError, Result, EXIT_SUCCESS},
    logging,
    manifest::JobManifest,
    orchestrator::{JobEvent, JobHandle, JobOrchestrator, JobReport, OrchestratorConfig},
    series::SeriesExport,
    target::LocalTarget,
};
use pulsar_core_convergence::{classify, parse};
use pulsar_core_interface::OutputStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pulsar")]
#[command(version, about = "Run reactor simulations locally or on a remote host and classify their criticality", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to a file instead of stderr
    #[arg(long = "log", global = true, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage, run, retrieve and classify a simulation job
    Run(RunArgs),

    /// Run a single command on a remote host
    Exec(ExecArgs),

    /// Classify an existing convergence log
    Classify {
        /// Solver log to read
        log: PathBuf,

        /// Distance from k = 1.0 still classified as critical
        #[arg(long)]
        tolerance: Option<f64>,

        /// Write the convergence series as JSON
        #[arg(long, value_name = "FILE")]
        series_out: Option<PathBuf>,

        /// Print the series as JSON instead of a verdict line
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    Init {
        /// Where to write the file
        #[arg(short, long, default_value = "pulsar.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Where the solver runs
    #[arg(long, value_enum, default_value = "local")]
    target: TargetArg,

    #[command(flatten)]
    remote: RemoteArgs,

    /// Job manifest (TOML) replacing the default reactor job
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Work directory for local runs
    #[arg(long, value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// Solver time limit in seconds (0 = no limit)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Distance from k = 1.0 still classified as critical
    #[arg(long)]
    tolerance: Option<f64>,

    /// Write the convergence series as JSON
    #[arg(long, value_name = "FILE")]
    series_out: Option<PathBuf>,

    /// Hide the progress spinner and live solver output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args)]
struct RemoteArgs {
    /// Remote host name or address
    #[arg(long)]
    host: Option<String>,

    /// SSH port
    #[arg(long)]
    port: Option<u16>,

    /// Remote user name
    #[arg(long)]
    user: Option<String>,

    /// Private key file instead of a password
    #[arg(long, value_name = "FILE")]
    key: Option<PathBuf>,

    /// Authenticate through the running SSH agent
    #[arg(long)]
    agent: bool,

    /// Always prompt for the password, ignoring PULSAR_SSH_PASSWORD
    #[arg(long)]
    password_prompt: bool,

    /// OpenSSH known_hosts file to verify the host key against
    #[arg(long, value_name = "FILE")]
    known_hosts: Option<PathBuf>,

    /// Run with sudo, reusing the login password
    #[arg(long)]
    sudo: bool,
}

#[derive(Args)]
struct ExecArgs {
    #[command(flatten)]
    remote: RemoteArgs,

    /// Report a non-zero exit status instead of failing
    #[arg(long)]
    no_check: bool,

    /// Command time limit in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Command to run
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum TargetArg {
    Local,
    Remote,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            if e.is_cancelled() {
                print_warning(&e.to_string());
            } else {
                print_error(&e.to_string(), hint_for(&e));
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn hint_for(err: &PulsarError) -> Option<&'static str> {
    match err {
        PulsarError::Config(_) => Some("Check the configuration file or run `pulsar init`"),
        PulsarError::Manifest(_) => Some("Every destination must be unique and the log must be retrieved"),
        PulsarError::Job(failure) if failure.error.failing_path().is_some() => {
            Some("Check that the solver produced every expected output")
        }
        _ => None,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PulsarConfig::from_file(path)?,
        None => PulsarConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;

    if let Err(e) = logging::init_logging(&config) {
        print_warning(&format!("Failed to initialize logging: {}", e));
    }

    match cli.command {
        Commands::Run(args) => run_job(config, args),
        Commands::Exec(args) => exec_remote(config, args),
        Commands::Classify {
            log,
            tolerance,
            series_out,
            json,
        } => classify_log(
            &log,
            tolerance.unwrap_or(config.classification_tolerance),
            series_out.as_deref(),
            json,
        ),
        Commands::Init { output, force } => init_config(&output, force),
    }
}

fn new_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PulsarError::Config(format!("Failed to start async runtime: {}", e)))
}

fn run_job(mut config: PulsarConfig, args: RunArgs) -> Result<()> {
    if let Some(tolerance) = args.tolerance {
        config.classification_tolerance = tolerance;
    }
    if let Some(secs) = args.timeout {
        config.execute_timeout_secs = secs;
    }
    if let Some(dir) = &args.workdir {
        config.local_workdir = dir.clone();
    }
    if let Some(path) = &args.manifest {
        config.manifest = Some(JobManifest::from_file(path)?);
    }
    config.validate()?;

    let orchestrator = JobOrchestrator::new(OrchestratorConfig::from(&config));
    let runtime = new_runtime()?;

    let report = match args.target {
        TargetArg::Local => {
            let manifest = config.manifest_for(Placement::Local);
            let target = LocalTarget::new(&config.local_workdir);
            print_info(&format!(
                "Running {} locally in {}",
                manifest.name,
                config.local_workdir.display()
            ));
            runtime.block_on(async {
                watch_job(orchestrator.spawn(manifest, target), args.quiet).await
            })?
        }
        TargetArg::Remote => {
            let target = remote::target(&config, &args.remote)?;
            let mut manifest = config.manifest_for(Placement::Remote);
            manifest.escalate |= remote::escalate(&config, &args.remote);
            print_info(&format!("Running {} on {}", manifest.name, target_name(&target)));
            runtime.block_on(async {
                watch_job(orchestrator.spawn(manifest, target), args.quiet).await
            })?
        }
    };

    show_report(&report, config.classification_tolerance, args.series_out.as_deref())?;
    report.into_result()?;
    Ok(())
}

fn target_name<T: pulsar_core_interface::ExecutionTarget>(target: &T) -> String {
    target.name().to_string()
}

/// Follow a spawned job until it finishes, cancelling it on Ctrl-C
async fn watch_job(mut handle: JobHandle, quiet: bool) -> Result<JobReport> {
    let spinner = job_spinner(quiet);
    let id = handle.id();
    let cancel = handle.cancel_token();
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => render_event(&spinner, event),
                None => break,
            },
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if signal.is_ok() {
                    spinner.println(format!(
                        "{} Interrupt received, cancelling {}",
                        Icons::WARNING,
                        id
                    ));
                    cancel.cancel();
                }
            }
        }
    }

    spinner.finish_and_clear();
    handle.wait().await
}

fn job_spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn render_event(spinner: &ProgressBar, event: JobEvent) {
    match event {
        JobEvent::StateChanged { state, .. } => {
            spinner.set_message(format!("{} {}", Icons::RUNNING, state));
        }
        JobEvent::Staged { path, .. } => {
            spinner.println(format!("  {} staged {}", Icons::ARROW_RIGHT, path.display()));
        }
        JobEvent::Retrieved { path, .. } => {
            spinner.println(format!("  {} retrieved {}", Icons::ARROW_RIGHT, path.display()));
        }
        JobEvent::Output { line, .. } => match line.stream {
            OutputStream::Stdout => spinner.println(format!("  {}", Theme::muted(&line.text))),
            OutputStream::Stderr => spinner.println(format!("  {}", Theme::warning(&line.text))),
        },
    }
}

fn show_report(report: &JobReport, tolerance: f64, series_out: Option<&Path>) -> Result<()> {
    println!("{}", job_summary_table(report));

    let Some(outcome) = report.outcome() else {
        if let Some((stdout, stderr)) = report
            .failure()
            .and_then(|failure| failure.error.captured_output())
        {
            section_header("Solver output (tail)");
            for line in tail(stdout, 10).iter().chain(tail(stderr, 10)) {
                println!("  {}", line);
            }
        }
        return Ok(());
    };

    println!("\n{}", verdict_line(outcome.classification, outcome.final_k));

    if let Some(path) = series_out {
        if let Some(export) = SeriesExport::new(&outcome.record, outcome.classification, tolerance)
        {
            export.write_to(path)?;
            print_success(&format!("Wrote convergence series to {}", path.display()));
        }
    }
    Ok(())
}

fn tail(lines: &[String], n: usize) -> &[String] {
    &lines[lines.len().saturating_sub(n)..]
}

fn classify_log(
    log: &Path,
    tolerance: f64,
    series_out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(log)?;
    let record = parse(&text);

    if !record.skipped_lines().is_empty() {
        print_warning(&format!(
            "Skipped {} malformed k_eff line(s): {:?}",
            record.skipped_lines().len(),
            record.skipped_lines()
        ));
    }

    let classification =
        classify(&record, tolerance).map_err(|_| PulsarError::NoConvergenceData(log.to_path_buf()))?;
    let export = SeriesExport::new(&record, classification, tolerance)
        .ok_or_else(|| PulsarError::NoConvergenceData(log.to_path_buf()))?
        .with_source(log);

    if json {
        println!("{}", export.to_json()?);
    } else {
        println!(
            "{} ({} iterations)",
            verdict_line(classification, export.final_k),
            record.len()
        );
    }

    if let Some(path) = series_out {
        export.write_to(path)?;
        print_success(&format!("Wrote convergence series to {}", path.display()));
    }
    Ok(())
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(PulsarError::Config(format!(
            "{} already exists (use --force to overwrite)",
            output.display()
        )));
    }

    PulsarConfig::default().to_file(output)?;
    print_success(&format!("Wrote default configuration to {}", output.display()));
    print_info("Add a [remote] table with host and username to run remotely");
    Ok(())
}

fn exec_remote(config: PulsarConfig, args: ExecArgs) -> Result<()> {
    use pulsar_core_interface::{CommandRequest, ExecControl, ExecutionTarget, OutputLine};
    use std::sync::Arc;

    let mut target = remote::target(&config, &args.remote)?;
    let request = CommandRequest::new(args.command.join(" "))
        .escalated(remote::escalate(&config, &args.remote))
        .check_exit_status(!args.no_check)
        .with_timeout(args.timeout.map(Duration::from_secs));

    let runtime = new_runtime()?;
    runtime.block_on(async move {
        let control = ExecControl::new().with_sink(Arc::new(|line: OutputLine| match line.stream {
            OutputStream::Stdout => println!("{}", line.text),
            OutputStream::Stderr => eprintln!("{}", line.text),
        }));
        let cancel = control.cancel_token().clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let result = match target.open().await {
            Ok(()) => target.execute(&request, &control).await,
            Err(e) => Err(e),
        };
        target.close().await;
        watcher.abort();

        let result = result?;
        if !result.success() {
            print_warning(&format!("Exit status {}", result.exit_status));
        }
        Ok::<(), PulsarError>(())
    })
}

#[cfg(feature = "ssh-backend")]
mod remote {
    use super::RemoteArgs;
    use pulsar::{
        channel::{Credential, CredentialSecret, SshConnector, SshOptions},
        config::PulsarConfig,
        error::{PulsarError, Result},
        target::RemoteTarget,
    };

    /// Build an SSH target from command-line flags over `[remote]` settings
    pub fn target(config: &PulsarConfig, args: &RemoteArgs) -> Result<RemoteTarget<SshConnector>> {
        let settings = config.remote.as_ref();

        let host = args
            .host
            .clone()
            .or_else(|| settings.map(|s| s.host.clone()))
            .ok_or_else(|| PulsarError::Config("no remote host (use --host or [remote])".into()))?;
        let username = args
            .user
            .clone()
            .or_else(|| settings.map(|s| s.username.clone()))
            .ok_or_else(|| PulsarError::Config("no remote user (use --user or [remote])".into()))?;
        let port = args
            .port
            .or_else(|| settings.map(|s| s.port))
            .unwrap_or(pulsar::channel::DEFAULT_SSH_PORT);

        let key_path = args
            .key
            .clone()
            .or_else(|| settings.and_then(|s| s.key_path.clone()));
        let use_agent = args.agent || settings.is_some_and(|s| s.use_agent);

        let secret = if let Some(key_path) = key_path {
            CredentialSecret::KeyFile {
                key_path,
                passphrase: None,
            }
        } else if use_agent {
            CredentialSecret::Agent
        } else if args.password_prompt {
            CredentialSecret::Prompt
        } else {
            CredentialSecret::password_or_prompt()
        };

        if escalate(config, args)
            && !matches!(
                secret,
                CredentialSecret::Password(_) | CredentialSecret::Prompt
            )
        {
            return Err(PulsarError::Config(
                "sudo needs password authentication; drop --key/--agent".into(),
            ));
        }

        let credential = Credential::new(host, username, secret).with_port(port);
        credential.validate()?;
        // Ask for the password now, before the job spinner owns the terminal
        let credential = credential.resolve_prompt()?;

        let options = SshOptions {
            connect_timeout: config.connect_timeout(),
            known_hosts: args
                .known_hosts
                .clone()
                .or_else(|| settings.and_then(|s| s.known_hosts.clone())),
            ..Default::default()
        };

        Ok(RemoteTarget::new(SshConnector::new(options), credential))
    }

    pub fn escalate(config: &PulsarConfig, args: &RemoteArgs) -> bool {
        args.sudo || config.remote.as_ref().is_some_and(|s| s.escalate)
    }
}

#[cfg(not(feature = "ssh-backend"))]
mod remote {
    use super::RemoteArgs;
    use pulsar::{
        config::PulsarConfig,
        error::{PulsarError, Result},
        target::LocalTarget,
    };

    pub fn target(_config: &PulsarConfig, _args: &RemoteArgs) -> Result<LocalTarget> {
        Err(PulsarError::Config(
            "remote targets need the ssh-backend feature".into(),
        ))
    }

    pub fn escalate(_config: &PulsarConfig, args: &RemoteArgs) -> bool {
        args.sudo
    }
}
