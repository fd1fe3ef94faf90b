//! Shared state between the producer and consumer tasks.
//!
//! [`RunBoard`] holds the pending queue, every job ever registered and the
//! admission counters. It is only reachable through [`SharedRun`], which
//! wraps it in a single `std::sync::Mutex`. Each method takes the lock for the
//! duration of one bookkeeping step and never across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::SearchError;
use crate::queue::JobQueue;
use crate::state_machine::{FailureKind, Job, JobEvent, JobState, StateMachine};

/// Admission counters and completion flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    pub active: usize,
    pub capacity: usize,
    pub all_submitted: bool,
    pub all_finished: bool,
}

/// Point-in-time counts for progress display and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSnapshot {
    pub total: usize,
    pub queued: usize,
    pub active: usize,
    pub capacity: usize,
    pub finished: usize,
    pub failed: usize,
    pub all_submitted: bool,
}

/// Result of asking for an admission slot.
#[derive(Debug)]
pub enum Reservation {
    /// A slot was reserved and the job popped; it is still QUEUED.
    Reserved(Job),
    QueueEmpty,
    AtCapacity,
}

/// What happened to a job whose submission failed.
#[derive(Debug)]
pub enum Release {
    Requeued { attempts: u32 },
    Abandoned(Job),
}

#[derive(Debug)]
struct RunBoard {
    queue: JobQueue,
    jobs: HashMap<String, Job>,
    state: RunState,
    next_seq: u64,
}

/// Cloneable handle to the run board.
#[derive(Debug, Clone)]
pub struct SharedRun {
    inner: Arc<Mutex<RunBoard>>,
}

impl SharedRun {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RunBoard {
                queue: JobQueue::new(),
                jobs: HashMap::new(),
                state: RunState {
                    active: 0,
                    capacity,
                    all_submitted: false,
                    all_finished: true,
                },
                next_seq: 0,
            })),
        }
    }

    // A panic while holding the lock leaves plain counters behind, which are
    // still consistent enough to keep draining the run.
    fn lock(&self) -> MutexGuard<'_, RunBoard> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new job and queue it. A linker id can be registered once.
    pub fn enqueue(&self, linker_id: &str, priority: f64, epoch: u32) -> Result<u64, SearchError> {
        let mut board = self.lock();
        if board.jobs.contains_key(linker_id) {
            return Err(SearchError::DuplicateLinker(linker_id.to_string()));
        }
        let seq = board.next_seq;
        board.next_seq += 1;
        board
            .jobs
            .insert(linker_id.to_string(), Job::new(linker_id.to_string(), priority, epoch, seq));
        board.queue.push(linker_id.to_string(), priority, seq);
        board.state.all_finished = false;
        Ok(seq)
    }

    /// Pop the best queued job and take a slot for it, if both exist.
    pub fn reserve(&self) -> Reservation {
        let mut board = self.lock();
        if board.queue.is_empty() {
            return Reservation::QueueEmpty;
        }
        if board.state.active >= board.state.capacity {
            return Reservation::AtCapacity;
        }
        let Some(linker_id) = board.queue.pop() else {
            return Reservation::QueueEmpty;
        };
        board.state.active += 1;
        debug_assert!(board.state.active <= board.state.capacity);
        match board.jobs.get(&linker_id).cloned() {
            Some(job) => Reservation::Reserved(job),
            None => {
                // Queue and table are only mutated together, so this is unreachable.
                board.state.active -= 1;
                Reservation::QueueEmpty
            }
        }
    }

    /// The launch handshake succeeded: QUEUED → SUBMITTED.
    pub fn confirm_submitted(&self, linker_id: &str) -> Result<Job, SearchError> {
        let mut board = self.lock();
        let job = board
            .jobs
            .get_mut(linker_id)
            .ok_or_else(|| SearchError::UnknownJob(linker_id.to_string()))?;
        job.submit_attempts += 1;
        StateMachine::apply(job, JobEvent::Submit)?;
        Ok(job.clone())
    }

    /// Give back the slot of a job whose submission failed. The job returns to
    /// the queue with its original priority and sequence until `max_retries`
    /// failures have been seen, then it is FAILED.
    pub fn release_failed_submission(
        &self,
        linker_id: &str,
        reason: &str,
        max_retries: u32,
    ) -> Result<Release, SearchError> {
        let mut guard = self.lock();
        let board = &mut *guard;
        board.state.active = board.state.active.saturating_sub(1);
        let job = board
            .jobs
            .get_mut(linker_id)
            .ok_or_else(|| SearchError::UnknownJob(linker_id.to_string()))?;
        job.submit_attempts += 1;
        let attempts = job.submit_attempts;

        if attempts <= max_retries {
            let (priority, seq) = (job.priority, job.seq);
            board.queue.push(linker_id.to_string(), priority, seq);
            return Ok(Release::Requeued { attempts });
        }

        StateMachine::apply(
            job,
            JobEvent::Fail(FailureKind::Submission(reason.to_string())),
        )?;
        let job = job.clone();
        Self::refresh_finished(board);
        Ok(Release::Abandoned(job))
    }

    /// Jobs currently holding a slot.
    pub fn in_flight(&self) -> Vec<Job> {
        let board = self.lock();
        let mut jobs: Vec<Job> = board
            .jobs
            .values()
            .filter(|job| job.state.is_in_flight())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    /// SUBMITTED → RUNNING. A job that is already running is left alone.
    pub fn mark_running(&self, linker_id: &str) -> Result<(), SearchError> {
        let mut board = self.lock();
        let job = board
            .jobs
            .get_mut(linker_id)
            .ok_or_else(|| SearchError::UnknownJob(linker_id.to_string()))?;
        if job.state == JobState::Submitted {
            StateMachine::apply(job, JobEvent::Start)?;
        }
        Ok(())
    }

    /// Move an in-flight job to FINISHED or FAILED and free its slot.
    pub fn complete(
        &self,
        linker_id: &str,
        outcome: Result<f64, FailureKind>,
    ) -> Result<Job, SearchError> {
        let mut board = self.lock();
        let job = board
            .jobs
            .get_mut(linker_id)
            .ok_or_else(|| SearchError::UnknownJob(linker_id.to_string()))?;
        if !job.state.is_in_flight() {
            return Err(SearchError::NotInFlight {
                linker_id: linker_id.to_string(),
                state: job.state,
            });
        }
        let event = match outcome {
            Ok(property) => {
                if job.state == JobState::Submitted {
                    StateMachine::apply(job, JobEvent::Start)?;
                }
                JobEvent::Finish { property }
            }
            Err(kind) => JobEvent::Fail(kind),
        };
        StateMachine::apply(job, event)?;
        let job = job.clone();
        board.state.active = board.state.active.saturating_sub(1);
        Self::refresh_finished(&mut board);
        Ok(job)
    }

    fn refresh_finished(board: &mut RunBoard) {
        board.state.all_finished = board.jobs.values().all(|job| job.state.is_terminal());
    }

    /// Whether every job registered so far is terminal.
    pub fn all_finished(&self) -> bool {
        self.lock().state.all_finished
    }

    pub fn mark_all_submitted(&self) {
        self.lock().state.all_submitted = true;
    }

    /// The consumer may stop: generation is over, nothing is queued or in
    /// flight, and every job is terminal.
    pub fn is_drained(&self) -> bool {
        let board = self.lock();
        board.state.all_submitted
            && board.state.all_finished
            && board.queue.is_empty()
            && board.state.active == 0
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    #[cfg(test)]
    pub fn job(&self, linker_id: &str) -> Option<Job> {
        self.lock().jobs.get(linker_id).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        let board = self.lock();
        let mut jobs: Vec<Job> = board.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let board = self.lock();
        let count = |state: JobState| board.jobs.values().filter(|j| j.state == state).count();
        RunSnapshot {
            total: board.jobs.len(),
            queued: board.queue.len(),
            active: board.state.active,
            capacity: board.state.capacity,
            finished: count(JobState::Finished),
            failed: count(JobState::Failed),
            all_submitted: board.state.all_submitted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserved_id(reservation: Reservation) -> String {
        match reservation {
            Reservation::Reserved(job) => job.linker_id,
            other => panic!("expected a reservation, got {other:?}"),
        }
    }

    #[test]
    fn enqueue_rejects_duplicate_linker() {
        let run = SharedRun::new(2);
        run.enqueue("L7", 0.3, 0).unwrap();
        let err = run.enqueue("L7", 0.9, 1).unwrap_err();
        assert!(matches!(err, SearchError::DuplicateLinker(id) if id == "L7"));
        assert_eq!(run.snapshot().total, 1);
    }

    #[test]
    fn reserve_reports_empty_and_capacity_separately() {
        let run = SharedRun::new(1);
        assert!(matches!(run.reserve(), Reservation::QueueEmpty));

        run.enqueue("A", 1.0, 0).unwrap();
        run.enqueue("B", 2.0, 0).unwrap();
        assert_eq!(reserved_id(run.reserve()), "B");
        assert!(matches!(run.reserve(), Reservation::AtCapacity));
        assert_eq!(run.state().active, 1);
    }

    #[test]
    fn release_requeues_until_retries_exhausted() {
        let run = SharedRun::new(1);
        run.enqueue("A", 1.0, 0).unwrap();

        reserved_id(run.reserve());
        let release = run.release_failed_submission("A", "exit 1", 1).unwrap();
        assert!(matches!(release, Release::Requeued { attempts: 1 }));
        assert_eq!(run.state().active, 0);
        assert_eq!(run.job("A").unwrap().state, JobState::Queued);

        reserved_id(run.reserve());
        let release = run.release_failed_submission("A", "exit 1", 1).unwrap();
        match release {
            Release::Abandoned(job) => {
                assert_eq!(job.state, JobState::Failed);
                assert_eq!(job.submit_attempts, 2);
            }
            other => panic!("expected abandonment, got {other:?}"),
        }
        assert!(run.all_finished());
        assert_eq!(run.state().active, 0);
    }

    #[test]
    fn complete_frees_slot_and_updates_finished_flag() {
        let run = SharedRun::new(2);
        run.enqueue("A", 1.0, 0).unwrap();
        run.enqueue("B", 0.5, 0).unwrap();
        for _ in 0..2 {
            let id = reserved_id(run.reserve());
            run.confirm_submitted(&id).unwrap();
        }
        assert_eq!(run.in_flight().len(), 2);

        let job = run.complete("A", Ok(4.2)).unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.state_history, vec![JobState::Queued, JobState::Submitted, JobState::Running]);
        assert!(!run.all_finished());

        run.complete("B", Err(FailureKind::Computation("empty".into())))
            .unwrap();
        assert!(run.all_finished());
        assert_eq!(run.state().active, 0);
    }

    #[test]
    fn drained_requires_every_condition() {
        let run = SharedRun::new(1);
        assert!(!run.is_drained());
        run.mark_all_submitted();
        assert!(run.is_drained());

        let run = SharedRun::new(1);
        run.enqueue("A", 1.0, 0).unwrap();
        run.mark_all_submitted();
        assert!(!run.is_drained());
        reserved_id(run.reserve());
        run.confirm_submitted("A").unwrap();
        assert!(!run.is_drained());
        run.complete("A", Ok(1.0)).unwrap();
        assert!(run.is_drained());
    }

    #[test]
    fn snapshot_counts_states() {
        let run = SharedRun::new(3);
        for (i, id) in ["A", "B", "C"].iter().enumerate() {
            run.enqueue(id, i as f64, 0).unwrap();
        }
        let id = reserved_id(run.reserve());
        run.confirm_submitted(&id).unwrap();
        run.complete(&id, Ok(1.0)).unwrap();

        let snap = run.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.queued, 2);
        assert_eq!(snap.finished, 1);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.active, 0);
        assert_eq!(snap.capacity, 3);
    }
}
