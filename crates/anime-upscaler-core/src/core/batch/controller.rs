//! Batch Controller
//!
//! A single coordination task owns the [`BatchState`]. Job executors run in a
//! [`JoinSet`] and report through one channel; the coordinator applies their
//! events to the state in arrival order, so counters have a single writer.
//!
//! Dispatch is bounded-parallel: `start` launches up to
//! `max_concurrent_jobs` jobs and every completion launches the next one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::jobs::{ExecutorContext, Job, JobEvent, JobEventKind, JobExecutor, JobStatus};
use crate::core::process::SharedToolRunner;
use crate::core::settings::{BatchSettings, JobSettings};
use crate::core::tools::ToolLocator;
use crate::core::{CoreError, CoreResult, JobId};

use super::{derive_output_path, BatchEvent, BatchState, BatchSummary};

// =============================================================================
// Configuration
// =============================================================================

/// Batch configuration
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Jobs allowed to run at once (at least 1)
    pub max_concurrent_jobs: usize,
    /// How long `stop` waits for running jobs before aborting them
    pub stop_timeout: Duration,
    /// Destination directory; None writes next to each input
    pub output_dir: Option<PathBuf>,
    /// Base directory for video workspaces
    pub temp_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from_settings(&BatchSettings::default())
    }
}

impl BatchConfig {
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            max_concurrent_jobs: settings.max_concurrent_jobs.max(1) as usize,
            stop_timeout: settings.stop_timeout(),
            output_dir: settings.output_dir.clone(),
            temp_dir: settings.workspace_base(),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Collects jobs and starts the batch
pub struct BatchController {
    config: BatchConfig,
    settings: JobSettings,
    locator: Arc<ToolLocator>,
    runner: SharedToolRunner,
    jobs: Vec<Job>,
}

impl BatchController {
    /// `settings` is the snapshot every job of this batch receives.
    pub fn new(
        config: BatchConfig,
        settings: JobSettings,
        locator: Arc<ToolLocator>,
        runner: SharedToolRunner,
    ) -> Self {
        Self {
            config,
            settings,
            locator,
            runner,
            jobs: Vec::new(),
        }
    }

    /// Appends one job per input, deriving output paths from the model the
    /// jobs will actually run. Returns the new job ids in order.
    pub fn enqueue<I>(&mut self, inputs: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let model_id = self.locator.effective_model_id(&self.settings.model_id);

        inputs
            .into_iter()
            .map(|input| {
                let output = derive_output_path(
                    &input,
                    self.config.output_dir.as_deref(),
                    &model_id,
                    self.settings.image_format,
                );
                let job = Job::new(input, output);
                tracing::debug!(
                    "Queued job {}: {} -> {}",
                    job.id,
                    job.input_path.display(),
                    job.output_path.display()
                );
                let id = job.id.clone();
                self.jobs.push(job);
                id
            })
            .collect()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Spawns the coordination task. Must be called inside a tokio runtime.
    pub fn start(mut self) -> RunningBatch {
        // A bound of zero would never dispatch anything
        self.config.max_concurrent_jobs = self.config.max_concurrent_jobs.max(1);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let coordinator = self.into_coordinator(events_tx, cancel.clone());

        RunningBatch {
            events: events_rx,
            handle: BatchHandle { cancel },
            task: tokio::spawn(coordinator.run()),
        }
    }

    fn into_coordinator(
        self,
        events: mpsc::UnboundedSender<BatchEvent>,
        cancel: CancellationToken,
    ) -> Coordinator {
        let context = ExecutorContext {
            locator: self.locator,
            runner: self.runner,
            temp_root: self.config.temp_dir.clone(),
        };

        Coordinator {
            state: BatchState::new(self.jobs),
            config: self.config,
            settings: self.settings,
            context,
            cancel,
            events,
            tasks: HashMap::new(),
        }
    }
}

// =============================================================================
// Running batch
// =============================================================================

/// Cloneable stop switch for a running batch
#[derive(Clone, Debug)]
pub struct BatchHandle {
    cancel: CancellationToken,
}

impl BatchHandle {
    /// Cancels in-flight jobs and prevents queued ones from starting.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A started batch: its event stream and completion
pub struct RunningBatch {
    events: mpsc::UnboundedReceiver<BatchEvent>,
    handle: BatchHandle,
    task: JoinHandle<BatchSummary>,
}

impl RunningBatch {
    pub fn handle(&self) -> BatchHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Next event; `None` once the batch has finished and all events were read.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// Waits for the batch to finish, discarding unread events.
    pub async fn wait(self) -> CoreResult<BatchSummary> {
        self.task
            .await
            .map_err(|e| CoreError::Internal(format!("Batch task failed: {}", e)))
    }
}

// =============================================================================
// Coordinator
// =============================================================================

struct Coordinator {
    state: BatchState,
    config: BatchConfig,
    settings: JobSettings,
    context: ExecutorContext,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<BatchEvent>,
    /// Task id -> job id, to attribute panicked executors
    tasks: HashMap<tokio::task::Id, JobId>,
}

impl Coordinator {
    async fn run(mut self) -> BatchSummary {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<JobEvent>();
        let mut in_flight: JoinSet<JobStatus> = JoinSet::new();

        self.state.restart_clock();
        let total = self.state.total_count();
        tracing::info!(
            "Batch started: {} jobs, max {} concurrent",
            total,
            self.config.max_concurrent_jobs
        );
        self.emit(BatchEvent::BatchStarted { total });

        self.dispatch(&mut in_flight, &job_tx);

        let mut stopping = false;
        let mut deadline: Option<Instant> = None;

        loop {
            if self.state.is_complete() {
                break;
            }
            if stopping && self.state.running_count() == 0 {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled(), if !stopping => {
                    stopping = true;
                    deadline = Some(Instant::now() + self.config.stop_timeout);
                    self.begin_stop();
                }
                Some(event) = job_rx.recv() => {
                    let finished = self.apply(event);
                    if finished && !stopping {
                        self.dispatch(&mut in_flight, &job_tx);
                    }
                }
                Some(joined) = in_flight.join_next_with_id() => {
                    self.reap(joined);
                    if !stopping {
                        self.dispatch(&mut in_flight, &job_tx);
                    }
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    self.force_stop(&mut in_flight, &mut job_rx).await;
                    break;
                }
            }
        }

        // Let every executor finish tearing down its workspace.
        while let Some(joined) = in_flight.join_next_with_id().await {
            self.reap(joined);
        }
        while let Ok(event) = job_rx.try_recv() {
            self.apply(event);
        }

        let summary = BatchSummary {
            total,
            succeeded: self.state.succeeded(),
            failed: self.state.failed(),
            cancelled: self.state.cancelled(),
            stopped: stopping,
            elapsed_secs: self.state.elapsed().as_secs(),
        };
        tracing::info!("{}", summary.message());
        self.emit(BatchEvent::BatchFinished(summary.clone()));
        summary
    }

    /// Starts queued jobs until the concurrency bound is reached.
    fn dispatch(
        &mut self,
        in_flight: &mut JoinSet<JobStatus>,
        job_tx: &mpsc::UnboundedSender<JobEvent>,
    ) {
        while self.state.running_count() < self.config.max_concurrent_jobs {
            let Some(index) = self.state.dispatch_next() else {
                break;
            };
            let job = self.state.job(index);

            self.emit(BatchEvent::JobStarted {
                job_id: job.id.clone(),
                input_name: job.display_name(),
                kind: job.kind,
            });

            let executor = JobExecutor::new(
                job,
                self.settings.clone(),
                self.context.clone(),
                self.cancel.child_token(),
                job_tx.clone(),
            );
            let job_id = job.id.clone();
            let handle = in_flight.spawn(executor.run());
            self.tasks.insert(handle.id(), job_id);
        }
    }

    /// Applies one job event; returns true if it finished a job.
    fn apply(&mut self, event: JobEvent) -> bool {
        let Some(index) = self.state.index_of(&event.job_id) else {
            tracing::warn!("Event for unknown job {}", event.job_id);
            return false;
        };
        let job_id = event.job_id;
        let input_name = self.state.job(index).display_name();

        match event.kind {
            JobEventKind::Progress(progress) => {
                let progress = self.state.record_progress(index, progress);
                self.emit(BatchEvent::JobProgress {
                    job_id,
                    input_name,
                    progress,
                });
                false
            }
            JobEventKind::Log { level, message } => {
                self.emit(BatchEvent::JobLog {
                    job_id,
                    input_name,
                    level,
                    message,
                });
                false
            }
            JobEventKind::Error(message) => {
                self.emit(BatchEvent::JobError {
                    job_id,
                    input_name,
                    message,
                });
                false
            }
            JobEventKind::Result(output) => {
                self.emit(BatchEvent::JobResult {
                    job_id,
                    input_name,
                    output,
                });
                false
            }
            JobEventKind::Finished(status) => self.complete(index, status),
        }
    }

    /// Handles an executor task ending. Normal exits were already reported
    /// through `Finished`; a panic is recorded as a failure here.
    fn reap(&mut self, joined: Result<(tokio::task::Id, JobStatus), tokio::task::JoinError>) {
        let (task_id, failure) = match joined {
            Ok((task_id, _)) => (task_id, None),
            Err(e) => (e.id(), Some(e)),
        };
        let job_id = self.tasks.remove(&task_id);

        let (Some(error), Some(job_id)) = (failure, job_id) else {
            return;
        };
        let Some(index) = self.state.index_of(&job_id) else {
            return;
        };

        let status = if error.is_cancelled() {
            JobStatus::Cancelled
        } else {
            tracing::error!("Job {} panicked: {}", job_id, error);
            self.emit(BatchEvent::JobError {
                job_id: job_id.clone(),
                input_name: self.state.job(index).display_name(),
                message: format!("Internal error: {}", error),
            });
            JobStatus::Failed
        };
        self.complete(index, status);
    }

    fn complete(&mut self, index: usize, status: JobStatus) -> bool {
        if !self.state.finish(index, status) {
            return false;
        }

        let job = self.state.job(index);
        self.emit(BatchEvent::JobFinished {
            job_id: job.id.clone(),
            input_name: job.display_name(),
            status,
        });
        self.emit(BatchEvent::BatchProgress(self.state.progress()));
        true
    }

    /// Stop requested: queued jobs never start; running jobs see their
    /// child tokens cancelled.
    fn begin_stop(&mut self) {
        tracing::info!(
            "Stop requested, waiting up to {:?} for {} running jobs",
            self.config.stop_timeout,
            self.state.running_count()
        );
        self.emit(BatchEvent::BatchStopping);

        for index in self.state.cancel_queued() {
            let job = self.state.job(index);
            self.emit(BatchEvent::JobFinished {
                job_id: job.id.clone(),
                input_name: job.display_name(),
                status: JobStatus::Cancelled,
            });
        }
        self.emit(BatchEvent::BatchProgress(self.state.progress()));
    }

    /// Stop timeout expired: abort whatever is still running.
    ///
    /// Jobs whose `Finished` event is already queued keep the status they
    /// reported.
    async fn force_stop(
        &mut self,
        in_flight: &mut JoinSet<JobStatus>,
        job_rx: &mut mpsc::UnboundedReceiver<JobEvent>,
    ) {
        tracing::warn!(
            "{} jobs did not stop within {:?}, aborting",
            self.state.running_count(),
            self.config.stop_timeout
        );
        in_flight.abort_all();
        while let Some(joined) = in_flight.join_next_with_id().await {
            self.reap(joined);
        }
        while let Ok(event) = job_rx.try_recv() {
            self.apply(event);
        }
        for index in self.state.running_indices() {
            self.complete(index, JobStatus::Cancelled);
        }
    }

    fn emit(&self, event: BatchEvent) {
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
