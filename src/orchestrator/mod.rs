/*!
 * Job orchestration
 *
 * Drives one job through Staging, Executing, Retrieving and Classifying on an
 * `ExecutionTarget`, then closes the target exactly once whatever happened.
 * Cancellation is checked before every step and passed down into command
 * execution; a cancelled job ends in Failed.
 */

mod handle;
mod job;

pub use handle::JobHandle;
pub use job::{
    JobError, JobEvent, JobFailure, JobId, JobOutcome, JobReport, JobState, Transition,
};

use crate::config::PulsarConfig;
use crate::manifest::JobManifest;
use job::Job;
use pulsar_core_convergence::{classify, parse, DEFAULT_TOLERANCE};
use pulsar_core_interface::{CommandRequest, ExecControl, ExecutionTarget, OutputLine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Settings that apply to every job an orchestrator runs
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Distance from k = 1.0 still classified as critical
    pub tolerance: f64,

    /// Solver time limit; `None` waits forever
    pub execute_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            execute_timeout: Some(Duration::from_secs(12 * 60 * 60)),
        }
    }
}

impl From<&PulsarConfig> for OrchestratorConfig {
    fn from(config: &PulsarConfig) -> Self {
        Self {
            tolerance: config.classification_tolerance,
            execute_timeout: config.execute_timeout(),
        }
    }
}

/// Identity, cancellation and event channel for one run
#[derive(Debug, Clone)]
pub struct JobControl {
    id: JobId,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<JobEvent>>,
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

impl JobControl {
    pub fn new() -> Self {
        Self {
            id: JobId::next(),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<JobEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn notify(&self, event: JobEvent) {
        if let Some(events) = &self.events {
            // The receiver may have been dropped; the job carries on regardless
            let _ = events.send(event);
        }
    }

    /// Execution controls that share this job's cancellation and forward
    /// output lines as events
    fn exec_control(&self) -> ExecControl {
        let id = self.id;
        let events = self.events.clone();
        ExecControl::new()
            .with_cancel(self.cancel.clone())
            .with_sink(Arc::new(move |line: OutputLine| {
                trace!(stream = %line.stream, "{}", line.text);
                if let Some(events) = &events {
                    let _ = events.send(JobEvent::Output { id, line });
                }
            }))
    }
}

/// Runs simulation jobs on execution targets
#[derive(Debug, Clone, Default)]
pub struct JobOrchestrator {
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `manifest` on `target` to completion
    ///
    /// Never returns early: failures are reported in the `JobReport`. The
    /// target is closed exactly once before this returns.
    pub async fn run<T: ExecutionTarget>(
        &self,
        manifest: &JobManifest,
        mut target: T,
        control: JobControl,
    ) -> JobReport {
        let mut job = Job::new(control.id());
        let target_name = target.name().to_string();
        let span = info_span!("job", id = %job.id(), name = %manifest.name, target = %target_name);

        async move {
            info!("Job created");
            let result = self.drive(&mut job, manifest, &mut target, &control).await;

            target.close().await;

            let terminal = match &result {
                Ok(_) => JobState::Done,
                Err(_) => JobState::Failed,
            };
            job.advance(terminal);
            control.notify(JobEvent::StateChanged {
                id: job.id(),
                state: terminal,
            });

            match &result {
                Ok(outcome) => info!(
                    classification = %outcome.classification,
                    k = outcome.final_k,
                    iterations = outcome.record.len(),
                    "Job done"
                ),
                Err(failure) if failure.is_cancelled() => {
                    warn!(step = %failure.step, "Job cancelled")
                }
                Err(failure) => warn!(step = %failure.step, "Job failed: {}", failure.error),
            }

            JobReport {
                id: job.id(),
                name: manifest.name.clone(),
                target: target_name,
                history: job.into_history(),
                result,
            }
        }
        .instrument(span)
        .await
    }

    /// Run `manifest` on `target` in a background task
    pub fn spawn<T>(&self, manifest: JobManifest, target: T) -> JobHandle
    where
        T: ExecutionTarget + 'static,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let control = JobControl::new().with_events(events_tx);
        let id = control.id();
        let cancel = control.cancel_token().clone();
        let orchestrator = self.clone();

        let task = tokio::spawn(async move { orchestrator.run(&manifest, target, control).await });

        JobHandle::new(id, cancel, events_rx, task)
    }

    /// Enter `state`, unless cancellation was requested first
    fn enter(
        &self,
        job: &mut Job,
        control: &JobControl,
        state: JobState,
    ) -> Result<(), JobFailure> {
        if control.cancel.is_cancelled() {
            return Err(JobFailure::new(state, JobError::Cancelled));
        }
        job.advance(state);
        debug!(state = %state, "Entering step");
        control.notify(JobEvent::StateChanged { id: job.id(), state });
        Ok(())
    }

    async fn drive<T: ExecutionTarget>(
        &self,
        job: &mut Job,
        manifest: &JobManifest,
        target: &mut T,
        control: &JobControl,
    ) -> Result<JobOutcome, JobFailure> {
        manifest.validate().map_err(|e| {
            JobFailure::new(JobState::Created, JobError::InvalidManifest(e.to_string()))
        })?;

        let fail = |step: JobState| {
            move |err| JobFailure::new(step, JobError::from_target(step, err))
        };

        // Staging: authenticate, then copy every input
        self.enter(job, control, JobState::Staging)?;
        target.open().await.map_err(fail(JobState::Staging))?;
        for input in &manifest.inputs {
            if control.cancel.is_cancelled() {
                return Err(JobFailure::new(JobState::Staging, JobError::Cancelled));
            }
            target
                .stage(&input.source, &input.destination)
                .await
                .map_err(fail(JobState::Staging))?;
            control.notify(JobEvent::Staged {
                id: job.id(),
                path: input.destination.clone(),
            });
        }

        // Executing
        self.enter(job, control, JobState::Executing)?;
        let request = CommandRequest::new(manifest.command.as_str())
            .escalated(manifest.escalate)
            .check_exit_status(true)
            .with_timeout(self.config.execute_timeout);
        let command = target
            .execute(&request, &control.exec_control())
            .await
            .map_err(fail(JobState::Executing))?;
        info!(
            exit_status = command.exit_status,
            lines = command.stdout.len(),
            "Solver finished"
        );

        // Retrieving: every output, the convergence log included
        self.enter(job, control, JobState::Retrieving)?;
        for output in &manifest.outputs {
            if control.cancel.is_cancelled() {
                return Err(JobFailure::new(JobState::Retrieving, JobError::Cancelled));
            }
            target
                .retrieve(&output.source, &output.destination)
                .await
                .map_err(fail(JobState::Retrieving))?;
            control.notify(JobEvent::Retrieved {
                id: job.id(),
                path: output.destination.clone(),
            });
        }

        // Classifying
        self.enter(job, control, JobState::Classifying)?;
        let log_path = manifest.convergence_log.clone();
        let text = tokio::fs::read_to_string(&log_path).await.map_err(|source| {
            JobFailure::new(
                JobState::Classifying,
                JobError::LogUnreadable {
                    path: log_path.clone(),
                    source,
                },
            )
        })?;

        let record = parse(&text);
        if !record.skipped_lines().is_empty() {
            warn!(
                lines = ?record.skipped_lines(),
                "Skipped malformed convergence lines"
            );
        }

        let classification = classify(&record, self.config.tolerance).map_err(|_| {
            JobFailure::new(
                JobState::Classifying,
                JobError::NoConvergenceData {
                    path: log_path.clone(),
                },
            )
        })?;
        let final_k = record.last().map_or(f64::NAN, |point| point.k);

        Ok(JobOutcome {
            classification,
            final_k,
            record,
            command,
            artifacts: manifest.retrieved_paths(),
        })
    }
}
