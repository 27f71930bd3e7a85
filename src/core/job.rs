//! Create-backup job state machine.
//!
//! ```text
//! Queued -> Preparing -> Running -> Finalizing -> Succeeded
//!              ^            |            |
//!              +-- retry ---+            +------> Failed
//! ```
//!
//! Every transition is written to the progress store under the job's token;
//! that record is the only way progress is observable outside the job.
//! Percentages never go down, including across retries, and the terminal
//! states are absorbing.

use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::command::{BackupCommand, CommandOutput};
use super::models::BackupOption;
use super::progress::{ProgressRecord, ProgressStatus, ProgressStore};
use crate::config::{AppConfig, JobConfig};

/// Substrings that mark a failed run even when the tool exits 0.
/// Matched case-sensitively.
pub const FAILURE_MARKERS: [&str; 5] = ["failed", "error", "not found", "mysqldump", "pg_dump"];

pub const GENERIC_FAILURE_MESSAGE: &str = "Backup failed. Check logs for details.";
pub const SUCCESS_MESSAGE: &str = "Backup completed successfully!";

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("markup pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    Preparing,
    Running,
    Finalizing,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Allowed edges of the state machine.
    pub fn can_transition_to(&self, next: JobPhase) -> bool {
        use JobPhase::*;
        matches!(
            (self, next),
            (Queued, Preparing)
                | (Preparing, Running)
                | (Running, Finalizing)
                | (Running, Preparing)
                | (Running, Failed)
                | (Finalizing, Succeeded)
                | (Finalizing, Failed)
        )
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{message}")]
    ToolFailure { exit_code: i32, message: String },

    #[error("Backup command exceeded its time budget of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Backup failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}

/// Knobs shared by every job run by one dispatcher.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub progress_ttl: Duration,
    pub detailed_errors: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from_job_config(&JobConfig::default(), true)
    }
}

impl JobSettings {
    pub fn from_job_config(job: &JobConfig, detailed_errors: bool) -> Self {
        Self {
            max_attempts: job.tries.max(1),
            timeout: job.timeout(),
            retry_delay: job.retry_delay(),
            progress_ttl: job.progress_ttl(),
            detailed_errors,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::from_job_config(&config.job, config.show_detailed_errors)
    }
}

/// Terminal result of a successful run.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub token: String,
    pub option: BackupOption,
    pub attempts: u32,
    pub message: String,
    pub duration: Duration,
}

/// One create-backup request.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub token: String,
    pub option: BackupOption,
}

impl BackupJob {
    pub fn new(token: impl Into<String>, option: BackupOption) -> Self {
        Self {
            token: token.into(),
            option,
        }
    }

    /// Run the job to a terminal state. The final progress record is written
    /// before this returns, on success and on every failure path.
    pub async fn execute(
        &self,
        command: &dyn BackupCommand,
        store: &dyn ProgressStore,
        settings: &JobSettings,
    ) -> Result<JobOutcome, JobError> {
        let span = info_span!("backup_job", token = %self.token, option = %self.option);

        async {
            let started = Instant::now();
            let mut reporter = ProgressReporter::new(&self.token, self.option, store, settings);
            let mut attempt = 0;

            loop {
                attempt += 1;
                reporter
                    .advance(JobPhase::Preparing, 0, "Starting backup process...")
                    .await;
                reporter
                    .advance(JobPhase::Running, 10, self.option.preparing_message())
                    .await;
                reporter.note(20, "Running backup command...").await;

                let result = tokio::time::timeout(settings.timeout, command.run(self.option)).await;

                let output = match result {
                    Err(_) => {
                        error!(attempt, timeout_secs = settings.timeout.as_secs(), "Backup command timed out");
                        let err = JobError::Timeout(settings.timeout);
                        reporter
                            .advance(JobPhase::Failed, 100, &format!("Backup failed: {}", err))
                            .await;
                        return Err(err);
                    }
                    Ok(Err(e)) if attempt < settings.max_attempts => {
                        warn!(attempt, max_attempts = settings.max_attempts, error = %e, "Backup attempt failed, retrying");
                        reporter
                            .note(
                                0,
                                &format!(
                                    "Attempt {} of {} failed: {}. Retrying...",
                                    attempt, settings.max_attempts, e
                                ),
                            )
                            .await;
                        tokio::time::sleep(settings.retry_delay).await;
                        continue;
                    }
                    Ok(Err(e)) => {
                        error!(attempt, error = %e, "Backup job failed permanently");
                        let err = JobError::RetriesExhausted {
                            attempts: attempt,
                            reason: e.to_string(),
                        };
                        reporter
                            .advance(
                                JobPhase::Failed,
                                100,
                                &format!("Backup failed after multiple attempts: {}", e),
                            )
                            .await;
                        return Err(err);
                    }
                    Ok(Ok(output)) => output,
                };

                reporter
                    .advance(JobPhase::Finalizing, 90, "Finalizing backup...")
                    .await;

                if let Some(message) = failure_message(&output, settings.detailed_errors) {
                    error!(
                        exit_code = output.exit_code,
                        output = %output.output,
                        "Backup job failed"
                    );
                    reporter.advance(JobPhase::Failed, 100, &message).await;
                    return Err(JobError::ToolFailure {
                        exit_code: output.exit_code,
                        message,
                    });
                }

                reporter
                    .advance(JobPhase::Succeeded, 100, SUCCESS_MESSAGE)
                    .await;
                info!(attempts = attempt, "Backup job completed successfully");

                return Ok(JobOutcome {
                    token: self.token.clone(),
                    option: self.option,
                    attempts: attempt,
                    message: SUCCESS_MESSAGE.to_string(),
                    duration: started.elapsed(),
                });
            }
        }
        .instrument(span)
        .await
    }
}

/// `Some(message)` when the tool's result counts as a failure.
pub fn failure_message(output: &CommandOutput, detailed: bool) -> Option<String> {
    let marked = FAILURE_MARKERS.iter().any(|m| output.output.contains(m));
    if output.success() && !marked {
        return None;
    }

    if detailed {
        let stripped = strip_markup(&output.output);
        if stripped.is_empty() {
            Some(format!("Backup command exited with code {}", output.exit_code))
        } else {
            Some(stripped)
        }
    } else {
        Some(GENERIC_FAILURE_MESSAGE.to_string())
    }
}

/// Remove markup tags from tool output and trim surrounding whitespace.
pub fn strip_markup(text: &str) -> String {
    MARKUP.replace_all(text, "").trim().to_string()
}

/// Writes the job's progress record, enforcing the state machine.
struct ProgressReporter<'a> {
    token: &'a str,
    option: BackupOption,
    store: &'a dyn ProgressStore,
    ttl: Duration,
    phase: JobPhase,
    percentage: u8,
}

impl<'a> ProgressReporter<'a> {
    fn new(
        token: &'a str,
        option: BackupOption,
        store: &'a dyn ProgressStore,
        settings: &JobSettings,
    ) -> Self {
        Self {
            token,
            option,
            store,
            ttl: settings.progress_ttl,
            phase: JobPhase::Queued,
            percentage: 0,
        }
    }

    /// Move to `next` and record it.
    async fn advance(&mut self, next: JobPhase, percentage: u8, message: &str) {
        if !self.phase.can_transition_to(next) {
            warn!(from = ?self.phase, to = ?next, "Ignoring invalid job transition");
            return;
        }
        self.phase = next;

        let status = match next {
            JobPhase::Succeeded => ProgressStatus::Success,
            JobPhase::Failed => ProgressStatus::Error,
            _ => ProgressStatus::Processing,
        };
        self.write(percentage, message, status).await;
    }

    /// Record a message without changing phase.
    async fn note(&mut self, percentage: u8, message: &str) {
        if self.phase.is_terminal() {
            return;
        }
        self.write(percentage, message, ProgressStatus::Processing)
            .await;
    }

    async fn write(&mut self, percentage: u8, message: &str, status: ProgressStatus) {
        self.percentage = self.percentage.max(percentage.min(100));
        let record = ProgressRecord::new(self.percentage, message, status, self.option);

        debug!(
            token = %self.token,
            percentage = record.percentage,
            status = %record.status,
            message = %record.message,
            "Backup progress updated"
        );

        if let Err(e) = self.store.put(self.token, &record, self.ttl).await {
            error!(token = %self.token, error = %e, "Failed to write backup progress");
        }
    }
}
