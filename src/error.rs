use std::path::PathBuf;

use thiserror::Error;

use crate::estimator::EstimatorError;
use crate::state_machine::{JobState, TransitionError};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Linker already registered in this run: {0}")]
    DuplicateLinker(String),

    #[error("Job not found: {0}")]
    UnknownJob(String),

    #[error("Job {linker_id} is {state}, not in flight")]
    NotInFlight { linker_id: String, state: JobState },

    #[error("No result log at {}. Run `linker-search run` first.", .0.display())]
    NoResults(PathBuf),

    #[error("Malformed result record on line {line}: {reason}")]
    ResultFormat { line: usize, reason: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Computation error: {0}")]
    Computation(#[from] ComputationError),

    #[error("Estimator error: {0}")]
    Estimator(#[from] EstimatorError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Result log error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The external submission command did not accept the job.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("facility rejected {linker_id}: {reason}")]
    Rejected { linker_id: String, reason: String },
}

/// A feature or property script failed or produced unusable output.
#[derive(Debug, Error)]
pub enum ComputationError {
    #[error("no {kind} script registered under '{name}'")]
    UnknownScript { kind: &'static str, name: String },

    #[error("input file missing: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("failed to launch {script}: {source}")]
    Launch {
        script: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{script} exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit {
        script: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{script} produced no numeric value: {output:?}")]
    Unparseable { script: String, output: String },

    #[error("expected output not written: {}", .0.display())]
    MissingArtifact(PathBuf),
}

/// Reasons a generation attempt is thrown away. All of them are recovered
/// inside the generator.
#[derive(Debug, Error, PartialEq)]
pub enum GenerationError {
    #[error("no valid rule option at step {step}")]
    NoValidOption { step: usize },

    #[error("no valid closing option")]
    NoValidClosingOption,

    #[error("linker {0} was already generated in this run")]
    DuplicateCandidate(String),

    #[error("linker {linker_id} has metric {value}, outside [0, 180]")]
    InvalidCandidateMetric { linker_id: String, value: f64 },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}
