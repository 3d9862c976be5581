//! Handle to a job running on a background task

use super::job::{JobEvent, JobId, JobReport};
use crate::error::{PulsarError, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Returned by `JobOrchestrator::spawn`
///
/// Events stop once the job reaches a terminal state; `wait` then yields the
/// report. Dropping the handle does not cancel the job.
pub struct JobHandle {
    id: JobId,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<JobEvent>,
    task: JoinHandle<JobReport>,
}

impl JobHandle {
    pub(super) fn new(
        id: JobId,
        cancel: CancellationToken,
        events: mpsc::UnboundedReceiver<JobEvent>,
        task: JoinHandle<JobReport>,
    ) -> Self {
        Self {
            id,
            cancel,
            events,
            task,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Ask the job to stop. The job ends in Failed with `JobError::Cancelled`
    /// as soon as the current step notices.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the job's cancellation token
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Next progress event; `None` once the job has finished
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Wait for the job to finish and return its report
    pub async fn wait(self) -> Result<JobReport> {
        self.task
            .await
            .map_err(|e| PulsarError::Worker(e.to_string()))
    }
}
