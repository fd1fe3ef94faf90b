use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::{FailureKind, Job};

/// Lifecycle of a simulation job.
///
/// Each job flows QUEUED → SUBMITTED → RUNNING → FINISHED, and may drop to
/// FAILED from any non-terminal state. Nothing ever moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Submitted,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }

    /// Submitted or running: the job holds an admission slot.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobState::Submitted | JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "QUEUED"),
            JobState::Submitted => write!(f, "SUBMITTED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Finished => write!(f, "FINISHED"),
            JobState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The submission command completed its launch handshake.
    Submit,
    /// The simulation working directory appeared.
    Start,
    /// The completion marker appeared and the property was extracted.
    Finish { property: f64 },
    /// The job cannot produce a usable property.
    Fail(FailureKind),
}

impl JobEvent {
    fn name(&self) -> &'static str {
        match self {
            JobEvent::Submit => "submit",
            JobEvent::Start => "start",
            JobEvent::Finish { .. } => "finish",
            JobEvent::Fail(_) => "fail",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("job {linker_id} is already {state}")]
    Terminal { linker_id: String, state: JobState },

    #[error("job {linker_id}: '{event}' is not allowed from {from}")]
    Illegal {
        linker_id: String,
        from: JobState,
        event: &'static str,
    },
}

/// Drives a `Job` through its lifecycle.
pub struct StateMachine;

impl StateMachine {
    /// Apply `event` to `job`, returning the new state.
    ///
    /// Permitted edges are QUEUED→SUBMITTED, SUBMITTED→RUNNING,
    /// RUNNING→FINISHED and any non-terminal state → FAILED. The job is left
    /// untouched when the edge is rejected.
    pub fn apply(job: &mut Job, event: JobEvent) -> Result<JobState, TransitionError> {
        if job.state.is_terminal() {
            return Err(TransitionError::Terminal {
                linker_id: job.linker_id.clone(),
                state: job.state,
            });
        }

        let next = match (&job.state, &event) {
            (JobState::Queued, JobEvent::Submit) => JobState::Submitted,
            (JobState::Submitted, JobEvent::Start) => JobState::Running,
            (JobState::Running, JobEvent::Finish { .. }) => JobState::Finished,
            (_, JobEvent::Fail(_)) => JobState::Failed,
            (from, event) => {
                return Err(TransitionError::Illegal {
                    linker_id: job.linker_id.clone(),
                    from: *from,
                    event: event.name(),
                });
            }
        };

        let now = Utc::now();
        match event {
            JobEvent::Submit => job.submitted_at = Some(now),
            JobEvent::Start => {}
            JobEvent::Finish { property } => {
                job.property = Some(property);
                job.finished_at = Some(now);
            }
            JobEvent::Fail(kind) => {
                job.failure = Some(kind);
                job.finished_at = Some(now);
            }
        }

        job.state_history.push(job.state);
        job.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job() -> Job {
        Job::new("PhCH2_COO".to_string(), 0.5, 0, 0)
    }

    #[test]
    fn happy_path_walks_all_states() {
        let mut job = make_job();
        assert_eq!(job.state, JobState::Queued);

        assert_eq!(
            StateMachine::apply(&mut job, JobEvent::Submit),
            Ok(JobState::Submitted)
        );
        assert!(job.submitted_at.is_some());

        assert_eq!(
            StateMachine::apply(&mut job, JobEvent::Start),
            Ok(JobState::Running)
        );
        assert_eq!(
            StateMachine::apply(&mut job, JobEvent::Finish { property: 12.5 }),
            Ok(JobState::Finished)
        );
        assert_eq!(job.property, Some(12.5));
        assert!(job.finished_at.is_some());
        assert_eq!(
            job.state_history,
            vec![JobState::Queued, JobState::Submitted, JobState::Running]
        );
    }

    #[test]
    fn finish_cannot_skip_running() {
        let mut job = make_job();
        StateMachine::apply(&mut job, JobEvent::Submit).unwrap();

        let err = StateMachine::apply(&mut job, JobEvent::Finish { property: 1.0 }).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                linker_id: "PhCH2_COO".into(),
                from: JobState::Submitted,
                event: "finish",
            }
        );
        assert_eq!(job.state, JobState::Submitted);
        assert!(job.property.is_none());
    }

    #[test]
    fn fail_is_allowed_from_any_live_state() {
        for steps in 0..3 {
            let mut job = make_job();
            let events = [JobEvent::Submit, JobEvent::Start];
            for event in events.into_iter().take(steps) {
                StateMachine::apply(&mut job, event).unwrap();
            }
            let kind = FailureKind::Computation("no output".into());
            assert_eq!(
                StateMachine::apply(&mut job, JobEvent::Fail(kind.clone())),
                Ok(JobState::Failed)
            );
            assert_eq!(job.failure, Some(kind));
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut job = make_job();
        StateMachine::apply(
            &mut job,
            JobEvent::Fail(FailureKind::Submission("exit 1".into())),
        )
        .unwrap();

        let err = StateMachine::apply(&mut job, JobEvent::Submit).unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Terminal {
                state: JobState::Failed,
                ..
            }
        ));
    }

    #[test]
    fn no_reverse_transitions() {
        let mut job = make_job();
        StateMachine::apply(&mut job, JobEvent::Submit).unwrap();
        StateMachine::apply(&mut job, JobEvent::Start).unwrap();

        assert!(StateMachine::apply(&mut job, JobEvent::Submit).is_err());
        assert!(StateMachine::apply(&mut job, JobEvent::Start).is_err());
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn state_display() {
        assert_eq!(JobState::Queued.to_string(), "QUEUED");
        assert_eq!(JobState::Submitted.to_string(), "SUBMITTED");
        assert_eq!(JobState::Running.to_string(), "RUNNING");
        assert_eq!(JobState::Finished.to_string(), "FINISHED");
        assert_eq!(JobState::Failed.to_string(), "FAILED");
    }
}
