//! Admission of queued jobs onto the capacity-limited facility.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::board::{Release, Reservation, SharedRun};
use crate::error::{SearchError, SubmitError};
use crate::state_machine::{Job, RetryConfig};

/// Hands a prepared linker to the execution facility. Returning `Ok` means
/// the facility accepted the job; the simulation runs out of process.
pub trait Submitter: Send + Sync + 'static {
    fn submit(
        &self,
        linker_id: &str,
        queue_class: &str,
    ) -> impl Future<Output = Result<(), SubmitError>> + Send;
}

/// Runs `<program> [args..] <linker_id> <queue_class>` from the run directory.
#[derive(Debug, Clone)]
pub struct CommandSubmitter {
    program: String,
    args: Vec<String>,
    run_dir: PathBuf,
}

impl CommandSubmitter {
    /// `command` is split on whitespace; the first word is the program.
    pub fn new(command: &str, run_dir: impl Into<PathBuf>) -> Result<Self, SearchError> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| SearchError::Config("submit_command must not be empty".into()))?;
        Ok(Self {
            program,
            args: words.collect(),
            run_dir: run_dir.into(),
        })
    }
}

impl Submitter for CommandSubmitter {
    async fn submit(&self, linker_id: &str, queue_class: &str) -> Result<(), SubmitError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(linker_id)
            .arg(queue_class)
            .current_dir(&self.run_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SubmitError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SubmitError::NonZeroExit {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(
            linker = linker_id,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "submission accepted"
        );
        Ok(())
    }
}

/// Outcome of one admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// Submitted; the job is SUBMITTED and holds a slot.
    Admitted(Job),
    QueueEmpty,
    AtCapacity,
    /// Admission is paused after a submission failure.
    Backoff { remaining: Duration },
    /// The submission failed and the slot was given back. With `requeued`
    /// the job is QUEUED again, otherwise it is FAILED.
    SubmitFailed {
        job: Job,
        requeued: bool,
        reason: String,
    },
}

/// Everything one admission round did.
#[derive(Debug, Default)]
pub struct AdmissionRound {
    pub admitted: Vec<Job>,
    /// Jobs that ran out of submission retries.
    pub abandoned: Vec<Job>,
}

pub struct AdmissionScheduler<T> {
    run: SharedRun,
    submitter: Arc<T>,
    queue_class: String,
    retry: RetryConfig,
    paused_until: Option<Instant>,
}

impl<T: Submitter> AdmissionScheduler<T> {
    pub fn new(run: SharedRun, submitter: Arc<T>, queue_class: &str, retry: RetryConfig) -> Self {
        Self {
            run,
            submitter,
            queue_class: queue_class.to_string(),
            retry,
            paused_until: None,
        }
    }

    /// Admit the best queued job if a slot is free. The slot is reserved
    /// under the board lock; the submission itself runs without it.
    pub async fn try_admit(&mut self) -> Result<Admission, SearchError> {
        if let Some(until) = self.paused_until {
            let now = Instant::now();
            if now < until {
                return Ok(Admission::Backoff {
                    remaining: until - now,
                });
            }
            self.paused_until = None;
        }

        let job = match self.run.reserve() {
            Reservation::Reserved(job) => job,
            Reservation::QueueEmpty => return Ok(Admission::QueueEmpty),
            Reservation::AtCapacity => return Ok(Admission::AtCapacity),
        };

        match self.submitter.submit(&job.linker_id, &self.queue_class).await {
            Ok(()) => {
                let job = self.run.confirm_submitted(&job.linker_id)?;
                info!(linker = %job.linker_id, priority = job.priority, "job submitted");
                Ok(Admission::Admitted(job))
            }
            Err(e) => {
                let reason = e.to_string();
                let release = self.run.release_failed_submission(
                    &job.linker_id,
                    &reason,
                    self.retry.max_retries,
                )?;
                let (job, attempts, requeued) = match release {
                    Release::Requeued { attempts } => (job, attempts, true),
                    Release::Abandoned(job) => {
                        let attempts = job.submit_attempts;
                        (job, attempts, false)
                    }
                };

                let delay = Duration::from_millis(self.retry.delay_for_attempt(attempts));
                self.paused_until = Some(Instant::now() + delay);
                if requeued {
                    warn!(
                        linker = %job.linker_id,
                        attempt = attempts,
                        max = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "submission failed, job requeued"
                    );
                } else {
                    warn!(
                        linker = %job.linker_id,
                        attempts,
                        error = %reason,
                        "submission failed, job abandoned"
                    );
                }
                Ok(Admission::SubmitFailed {
                    job,
                    requeued,
                    reason,
                })
            }
        }
    }

    /// Keep admitting until an attempt does not admit a job.
    pub async fn admit_ready(&mut self) -> Result<AdmissionRound, SearchError> {
        let mut round = AdmissionRound::default();
        loop {
            match self.try_admit().await? {
                Admission::Admitted(job) => round.admitted.push(job),
                Admission::SubmitFailed {
                    job,
                    requeued,
                    reason,
                } => {
                    debug!(linker = %job.linker_id, requeued, %reason, "admission round stopped");
                    if !requeued {
                        round.abandoned.push(job);
                    }
                    break;
                }
                Admission::Backoff { remaining } => {
                    debug!(remaining_ms = remaining.as_millis() as u64, "admission paused");
                    break;
                }
                Admission::QueueEmpty | Admission::AtCapacity => break,
            }
        }
        Ok(round)
    }
}
