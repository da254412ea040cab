//! Multi-part conversion job tracking.
//!
//! A [`JobPoller`] owns at most one polling task at a time. Each task asks the
//! backend for the job's status on a fixed interval until the job completes
//! or fails:
//!
//! ```text
//! idle ──start──▶ polling ──status: completed──▶ completed
//!                    │
//!                    └──status: error / success: false──▶ failed
//! ```
//!
//! Failed requests that are not a backend verdict (network errors, garbage
//! bodies, 5xx pages) leave the job untouched and the next tick simply asks
//! again. There is no retry limit and no backoff: a long job survives a flaky
//! connection, at the cost of polling forever against a dead server until
//! the caller cancels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::api::{Backend, StatusResponse};
use crate::broadcast::{ProgressBroadcaster, ProgressEvent, ProgressStage};
use crate::error::ApiError;
use crate::presenter::ResultRecord;

/// Status tag reported by the conversion-status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Observable state of the poller as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Polling,
    Completed,
    Failed,
}

/// Client-side view of a backend conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub job_id: String,
    pub total: u32,
    pub completed: u32,
    pub status: JobStatus,
    /// Set only when `status` is `Completed`.
    pub result: Option<ResultRecord>,
    /// Set only when `status` is `Error`.
    pub error: Option<String>,
}

impl ConversionJob {
    pub fn new(job_id: impl Into<String>, total: u32) -> Self {
        Self {
            job_id: job_id.into(),
            total: total.max(1),
            completed: 0,
            status: JobStatus::InProgress,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `round(completed / total * 100)`.
    pub fn progress_percent(&self) -> u8 {
        let ratio = f64::from(self.completed) / f64::from(self.total.max(1));
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }

    /// Folds one status response into the job.
    ///
    /// Updates after a terminal state are ignored, the completed count never
    /// moves backward and never exceeds the total. Returns whether anything
    /// changed.
    pub fn apply(&mut self, update: &StatusResponse) -> bool {
        if self.is_terminal() {
            return false;
        }
        let before = self.clone();

        if update.total > 0 {
            self.total = update.total;
        }
        let reported = update.completed.min(self.total);
        self.completed = self.completed.max(reported).min(self.total);

        match update.status {
            JobStatus::InProgress => {}
            JobStatus::Completed => {
                self.status = JobStatus::Completed;
                self.completed = self.total;
                self.result = Some(ResultRecord {
                    result_id: update
                        .result_id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| self.job_id.clone()),
                    text: update.result.clone().unwrap_or_default(),
                    image_count: update.image_count.unwrap_or(0),
                });
            }
            JobStatus::Error => {
                self.fail(
                    update
                        .message
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string()),
                );
            }
        }

        *self != before
    }

    /// Moves the job to `Error`; no-op once terminal.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Error;
        self.result = None;
        self.error = Some(message.into());
    }
}

/// How a polling task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(ResultRecord),
    Failed { message: String },
    Cancelled,
}

/// Caller's side of one polling task.
pub struct PollHandle {
    job_id: String,
    snapshots: watch::Receiver<ConversionJob>,
    task: JoinHandle<JobOutcome>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Latest known state of the job.
    pub fn snapshot(&self) -> ConversionJob {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every job change.
    pub fn subscribe(&self) -> watch::Receiver<ConversionJob> {
        self.snapshots.clone()
    }

    /// Waits for the task to end. An aborted task reports `Cancelled`.
    pub async fn wait(self) -> JobOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => JobOutcome::Failed {
                message: format!("polling task failed: {}", e),
            },
        }
    }
}

struct ActivePoll {
    job_id: String,
    abort: AbortHandle,
    snapshots: watch::Receiver<ConversionJob>,
}

pub struct JobPoller<B: Backend + 'static> {
    backend: Arc<B>,
    interval: Duration,
    progress: ProgressBroadcaster,
    /// Bumped on every start and cancel; a task whose generation is no
    /// longer current discards whatever response it is holding.
    generation: Arc<AtomicU64>,
    active: Option<ActivePoll>,
}

impl<B: Backend + 'static> JobPoller<B> {
    pub fn new(backend: Arc<B>, interval: Duration, progress: ProgressBroadcaster) -> Self {
        Self {
            backend,
            interval,
            progress,
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts polling `job_id`, stopping any task that is still running first.
    pub fn start(&mut self, job_id: impl Into<String>, total_parts: u32) -> PollHandle {
        self.cancel();

        let job = ConversionJob::new(job_id, total_parts);
        let job_id = job.job_id.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(job.clone());

        let span = info_span!("poll", job_id = %job_id, generation);
        let task = tokio::spawn(
            run_poll(
                Arc::clone(&self.backend),
                job,
                self.interval,
                generation,
                Arc::clone(&self.generation),
                tx,
                self.progress.clone(),
            )
            .instrument(span),
        );

        info!(
            "Polling job {} every {:?} ({} parts)",
            job_id, self.interval, total_parts
        );

        self.active = Some(ActivePoll {
            job_id: job_id.clone(),
            abort: task.abort_handle(),
            snapshots: rx.clone(),
        });

        PollHandle {
            job_id,
            snapshots: rx,
            task,
        }
    }

    /// Stops the running task, if any. Returns whether one was stopped.
    pub fn cancel(&mut self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        match self.active.take() {
            Some(active) if !active.abort.is_finished() => {
                active.abort.abort();
                info!("Stopped polling job {}", active.job_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.abort.is_finished())
    }

    pub fn active_job_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.job_id.as_str())
    }

    /// Latest snapshot of the current (or most recent) job.
    pub fn current_job(&self) -> Option<ConversionJob> {
        self.active.as_ref().map(|a| a.snapshots.borrow().clone())
    }

    pub fn state(&self) -> PollerState {
        match &self.active {
            None => PollerState::Idle,
            Some(active) => match active.snapshots.borrow().status {
                JobStatus::Completed => PollerState::Completed,
                JobStatus::Error => PollerState::Failed,
                JobStatus::InProgress if active.abort.is_finished() => PollerState::Idle,
                JobStatus::InProgress => PollerState::Polling,
            },
        }
    }
}

impl<B: Backend + 'static> Drop for JobPoller<B> {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_poll<B: Backend>(
    backend: Arc<B>,
    mut job: ConversionJob,
    period: Duration,
    generation: u64,
    current: Arc<AtomicU64>,
    snapshots: watch::Sender<ConversionJob>,
    progress: ProgressBroadcaster,
) -> JobOutcome {
    // First request one full interval after start, like a repeating timer.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let response = backend.conversion_status(&job.job_id).await;

        if current.load(Ordering::SeqCst) != generation {
            debug!("Discarding status response for superseded job {}", job.job_id);
            return JobOutcome::Cancelled;
        }

        match response {
            Ok(update) => {
                if job.apply(&update) {
                    snapshots.send_replace(job.clone());
                }

                match job.status {
                    JobStatus::InProgress => {
                        let message = format!(
                            "Converting: {}/{} parts done",
                            job.completed, job.total
                        );
                        progress.send(
                            ProgressEvent::new(
                                ProgressStage::Conversion,
                                job.progress_percent(),
                                &message,
                            )
                            .with_parts(job.completed, job.total),
                        );
                    }
                    JobStatus::Completed => {
                        info!("Job {} completed", job.job_id);
                        progress.send(
                            ProgressEvent::new(ProgressStage::Conversion, 100, "Conversion completed")
                                .with_parts(job.completed, job.total),
                        );
                        return match job.result.clone() {
                            Some(record) => JobOutcome::Completed(record),
                            None => JobOutcome::Failed {
                                message: "completed job without result".to_string(),
                            },
                        };
                    }
                    JobStatus::Error => {
                        let message = job.error.clone().unwrap_or_default();
                        warn!("Job {} failed: {}", job.job_id, message);
                        progress.failed(ProgressStage::Conversion, &message);
                        return JobOutcome::Failed { message };
                    }
                }
            }
            Err(ApiError::Server { message }) => {
                job.fail(message.clone());
                snapshots.send_replace(job.clone());
                warn!("Job {} failed: {}", job.job_id, message);
                progress.failed(ProgressStage::Conversion, &message);
                return JobOutcome::Failed { message };
            }
            Err(e) => {
                warn!(
                    "Status check for job {} failed, retrying next tick: {}",
                    job.job_id, e
                );
            }
        }
    }
}
