use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::JobState;

/// Why a job ended up FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The submission command could not be launched or exited non-zero.
    Submission(String),
    /// Property extraction failed or produced unusable output.
    Computation(String),
    /// The simulation stayed in flight past the configured deadline.
    DeadlineExceeded { after_secs: u64 },
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Submission(msg) => write!(f, "submission failure: {msg}"),
            FailureKind::Computation(msg) => write!(f, "computation failure: {msg}"),
            FailureKind::DeadlineExceeded { after_secs } => {
                write!(f, "deadline exceeded after {after_secs}s")
            }
        }
    }
}

/// Configuration for submission retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Failed submissions tolerated before the job is marked FAILED.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// One linker waiting for, or undergoing, an external simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub linker_id: String,
    /// Fixed at enqueue time.
    pub priority: f64,
    pub epoch: u32,
    /// Enqueue order; breaks priority ties.
    pub seq: u64,
    pub state: JobState,
    pub state_history: Vec<JobState>,
    pub submit_attempts: u32,
    pub property: Option<f64>,
    pub failure: Option<FailureKind>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(linker_id: String, priority: f64, epoch: u32, seq: u64) -> Self {
        Self {
            linker_id,
            priority,
            epoch,
            seq,
            state: JobState::Queued,
            state_history: Vec::new(),
            submit_attempts: 0,
            property: None,
            failure: None,
            created_at: Utc::now(),
            submitted_at: None,
            finished_at: None,
        }
    }
}
