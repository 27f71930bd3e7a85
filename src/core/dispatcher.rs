//! Hands create-backup requests to a worker or runs them inline.
//!
//! With queueing enabled every named queue gets one worker task that runs its
//! jobs one at a time, off the request path; callers get the progress key back
//! immediately and poll the progress store. With queueing disabled the job runs
//! to completion inside the call.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, info_span, warn};

use super::command::BackupCommand;
use super::job::{BackupJob, JobError, JobOutcome, JobSettings};
use super::models::BackupOption;
use super::notifications::{JobEvent, NotificationChannel};
use super::progress::{ProgressRecord, ProgressStore, new_token};
use crate::config::QueueConfig;

pub const DEFAULT_QUEUE: &str = "default";

pub const CLEAN_SUCCESS_MESSAGE: &str = "Old backups cleaned successfully!";
pub const CLEAN_WARNING_MESSAGE: &str =
    "Clean command completed with warnings. Check logs for details.";

/// Everything needed to run a job to its terminal state.
pub struct JobRunner {
    command: Arc<dyn BackupCommand>,
    store: Arc<dyn ProgressStore>,
    settings: JobSettings,
    notifier: Option<Arc<dyn NotificationChannel>>,
}

impl JobRunner {
    pub fn new(
        command: Arc<dyn BackupCommand>,
        store: Arc<dyn ProgressStore>,
        settings: JobSettings,
    ) -> Self {
        Self {
            command,
            store,
            settings,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn NotificationChannel>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub async fn run(&self, job: BackupJob) -> Result<JobOutcome, JobError> {
        self.notify(JobEvent::Started {
            token: job.token.clone(),
            option: job.option,
        })
        .await;

        let result = job
            .execute(self.command.as_ref(), self.store.as_ref(), &self.settings)
            .await;

        let event = match &result {
            Ok(outcome) => JobEvent::Completed {
                token: outcome.token.clone(),
                option: outcome.option,
                attempts: outcome.attempts,
                duration_secs: outcome.duration.as_secs(),
            },
            Err(e) => JobEvent::Failed {
                token: job.token.clone(),
                option: job.option,
                error: e.to_string(),
            },
        };
        self.notify(event).await;

        result
    }

    /// Run the clean command. Never fails; the outcome carries the message.
    pub async fn clean(&self) -> CleanOutcome {
        match self.command.clean().await {
            Ok(output) if output.success() => {
                info!("Old backups cleaned");
                CleanOutcome {
                    success: true,
                    message: CLEAN_SUCCESS_MESSAGE.to_string(),
                }
            }
            Ok(output) => {
                warn!(exit_code = output.exit_code, output = %output.output, "Clean command reported problems");
                CleanOutcome {
                    success: false,
                    message: CLEAN_WARNING_MESSAGE.to_string(),
                }
            }
            Err(e) => {
                error!(error = %e, "Clean command failed");
                CleanOutcome {
                    success: false,
                    message: format!("Clean failed: {}", e),
                }
            }
        }
    }

    async fn notify(&self, event: JobEvent) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.notify(event).await {
            warn!(error = %e, "Failed to send notification");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanOutcome {
    pub success: bool,
    pub message: String,
}

/// What `dispatch` did with the request.
#[derive(Debug)]
pub enum Dispatched {
    /// Handed to a worker; poll with `progress_key`.
    Queued { progress_key: String, queue: String },
    /// Ran inline to a terminal state.
    Finished(Result<JobOutcome, JobError>),
}

pub struct JobDispatcher {
    runner: Arc<JobRunner>,
    queue: QueueConfig,
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<BackupJob>>>,
    tracker: TaskTracker,
}

impl JobDispatcher {
    pub fn new(runner: JobRunner, queue: QueueConfig) -> Self {
        Self {
            runner: Arc::new(runner),
            queue,
            senders: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    pub fn queue_enabled(&self) -> bool {
        self.queue.enabled
    }

    /// Name of the queue jobs go to.
    pub fn queue_name(&self) -> &str {
        self.queue
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_QUEUE)
    }

    /// Start a backup. Always mints a fresh token.
    pub async fn dispatch(&self, option: BackupOption) -> Result<Dispatched> {
        let job = BackupJob::new(new_token(), option);

        if !self.queue.enabled {
            info!(token = %job.token, option = %option, "Running backup inline");
            return Ok(Dispatched::Finished(self.runner.run(job).await));
        }

        let queue = self.queue_name().to_string();
        let sender = self.sender_for(&queue).await?;

        let settings = self.runner.settings();
        self.runner
            .store()
            .put(&job.token, &ProgressRecord::queued(option), settings.progress_ttl)
            .await?;

        let progress_key = job.token.clone();
        sender
            .send(job)
            .map_err(|_| anyhow!("Queue '{}' is no longer accepting jobs", queue))?;

        info!(token = %progress_key, option = %option, queue = %queue, "Backup queued");
        Ok(Dispatched::Queued {
            progress_key,
            queue,
        })
    }

    /// Stop accepting jobs and wait for every worker to drain its queue.
    pub async fn shutdown(&self) {
        self.senders.lock().await.clear();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Job workers stopped");
    }

    async fn sender_for(&self, queue: &str) -> Result<mpsc::UnboundedSender<BackupJob>> {
        let mut senders = self.senders.lock().await;
        if let Some(sender) = senders.get(queue) {
            return Ok(sender.clone());
        }
        if self.tracker.is_closed() {
            return Err(anyhow!("Job dispatcher is shutting down"));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<BackupJob>();
        let runner = self.runner.clone();
        let span = info_span!("queue_worker", queue = %queue);

        self.tracker.spawn(
            async move {
                info!("Queue worker started");
                while let Some(job) = rx.recv().await {
                    let token = job.token.clone();
                    if let Err(e) = runner.run(job).await {
                        error!(token = %token, error = %e, "Queued backup failed");
                    }
                }
                info!("Queue worker finished");
            }
            .instrument(span),
        );

        senders.insert(queue.to_string(), tx.clone());
        Ok(tx)
    }
}
