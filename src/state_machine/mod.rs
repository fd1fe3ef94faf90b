mod job;
mod state;

pub use job::{FailureKind, Job, RetryConfig};
pub use state::{JobEvent, JobState, StateMachine, TransitionError};
