//! Detects finished simulations and frees their slots.
//!
//! The facility reports nothing back directly. A job counts as running once
//! its simulation directory exists and as finished once the averaged force
//! file has been written into it. Finished linkers are passed on to the
//! estimator, when there is one, as new training data.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::board::SharedRun;
use crate::bridge::Computation;
use crate::error::SearchError;
use crate::estimator::Estimator;
use crate::layout::RunLayout;
use crate::results::{ResultLog, ResultRecord};
use crate::state_machine::{FailureKind, Job, JobState};

/// What one poll observed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PollReport {
    pub started: Vec<String>,
    pub finished: Vec<String>,
    pub failed: Vec<String>,
    /// Every job registered so far is terminal.
    pub all_finished: bool,
}

impl PollReport {
    /// Slots freed during this poll.
    pub fn completed(&self) -> usize {
        self.finished.len() + self.failed.len()
    }
}

pub struct CompletionTracker<C, S> {
    run: SharedRun,
    computation: Arc<C>,
    estimator: Option<Arc<S>>,
    layout: RunLayout,
    deadline: Option<Duration>,
    log: ResultLog,
}

impl<C: Computation, S: Estimator> CompletionTracker<C, S> {
    pub fn new(
        run: SharedRun,
        computation: Arc<C>,
        estimator: Option<Arc<S>>,
        layout: RunLayout,
        deadline: Option<Duration>,
        log: ResultLog,
    ) -> Self {
        Self {
            run,
            computation,
            estimator,
            layout,
            deadline,
            log,
        }
    }

    /// Check every in-flight job once. Property extraction runs without the
    /// board lock; each terminal transition is archived immediately.
    pub async fn poll(&mut self) -> Result<PollReport, SearchError> {
        let mut report = PollReport::default();

        for job in self.run.in_flight() {
            let linker_id = job.linker_id.as_str();

            if self.layout.completion_marker(linker_id).is_file() {
                // The marker lives inside the simulation directory.
                self.run.mark_running(linker_id)?;
                let outcome = self
                    .computation
                    .compute_property(linker_id)
                    .await
                    .map_err(|e| FailureKind::Computation(e.to_string()));
                let done = self.run.complete(linker_id, outcome)?;
                self.archive(&done, &mut report)?;
                if done.state == JobState::Finished {
                    self.learn_from(linker_id).await;
                }
                continue;
            }

            if let Some(after) = self.overdue(&job) {
                let failure = FailureKind::DeadlineExceeded {
                    after_secs: after.as_secs(),
                };
                let done = self.run.complete(linker_id, Err(failure))?;
                self.archive(&done, &mut report)?;
                continue;
            }

            if job.state == JobState::Submitted && self.layout.simulation_dir(linker_id).is_dir() {
                self.run.mark_running(linker_id)?;
                debug!(linker = linker_id, "simulation started");
                report.started.push(job.linker_id.clone());
            }
        }

        report.all_finished = self.run.all_finished();
        Ok(report)
    }

    fn overdue(&self, job: &Job) -> Option<Duration> {
        let deadline = self.deadline?;
        let submitted_at = job.submitted_at?;
        let elapsed = (Utc::now() - submitted_at).to_std().ok()?;
        (elapsed >= deadline).then_some(elapsed)
    }

    fn archive(&mut self, job: &Job, report: &mut PollReport) -> Result<(), SearchError> {
        self.log.record(&ResultRecord::from_job(job))?;
        match (job.state, job.property, job.failure.as_ref()) {
            (JobState::Finished, Some(property), _) => {
                info!(linker = %job.linker_id, property, "job finished");
                report.finished.push(job.linker_id.clone());
            }
            (_, _, failure) => {
                let reason = failure.map(ToString::to_string).unwrap_or_default();
                warn!(linker = %job.linker_id, %reason, "job failed");
                report.failed.push(job.linker_id.clone());
            }
        }
        Ok(())
    }

    // Failures are only logged; the job stays FINISHED.
    async fn learn_from(&mut self, linker_id: &str) {
        let Some(estimator) = &self.estimator else {
            return;
        };
        match estimator.add_observation(linker_id).await {
            Ok(size) => debug!(linker = linker_id, training_set = size, "estimator updated"),
            Err(e) => warn!(linker = linker_id, error = %e, "estimator did not take the result"),
        }
    }

    /// Archive a job that never got onto the facility.
    pub fn record_abandoned(&mut self, job: &Job) -> Result<(), SearchError> {
        self.log.record(&ResultRecord::from_job(job))
    }

    pub fn finish(self) -> Result<PathBuf, SearchError> {
        info!(
            records = self.log.written(),
            path = %self.log.path().display(),
            "result log closed"
        );
        self.log.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::results::{LogOutcome, read_log};
    use crate::scheduler::AdmissionScheduler;
    use crate::state_machine::RetryConfig;
    use crate::testing::{MockComputation, MockEstimator, MockSubmitter};

    struct Fixture {
        run: SharedRun,
        layout: RunLayout,
        tracker: CompletionTracker<MockComputation, MockEstimator>,
        _tmp: tempfile::TempDir,
    }

    fn fixture(capacity: usize, computation: MockComputation, deadline: Option<Duration>) -> Fixture {
        fixture_with_estimator(capacity, computation, deadline, None)
    }

    fn fixture_with_estimator(
        capacity: usize,
        computation: MockComputation,
        deadline: Option<Duration>,
        estimator: Option<Arc<MockEstimator>>,
    ) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(tmp.path(), "point", "stiff");
        layout.prepare().unwrap();
        let run = SharedRun::new(capacity);
        let log = ResultLog::create(&layout.result_log("test")).unwrap();
        let tracker = CompletionTracker::new(
            run.clone(),
            Arc::new(computation),
            estimator,
            layout.clone(),
            deadline,
            log,
        );
        Fixture {
            run,
            layout,
            tracker,
            _tmp: tmp,
        }
    }

    fn scheduler(run: &SharedRun) -> AdmissionScheduler<MockSubmitter> {
        AdmissionScheduler::new(
            run.clone(),
            Arc::new(MockSubmitter::default()),
            "short",
            RetryConfig::default(),
        )
    }

    fn start(layout: &RunLayout, id: &str) {
        fs::create_dir_all(layout.simulation_dir(id)).unwrap();
    }

    fn complete(layout: &RunLayout, id: &str) {
        start(layout, id);
        fs::write(layout.completion_marker(id), "0 1.0\n").unwrap();
    }

    #[tokio::test]
    async fn marker_finishes_job_with_property() {
        let mut f = fixture(2, MockComputation::default().with_property("A", 12.5), None);
        f.run.enqueue("A", 1.0, 0).unwrap();
        scheduler(&f.run).admit_ready().await.unwrap();

        let report = f.tracker.poll().await.unwrap();
        assert!(report.finished.is_empty());
        assert!(!report.all_finished);

        complete(&f.layout, "A");
        let report = f.tracker.poll().await.unwrap();
        assert_eq!(report.finished, vec!["A"]);
        assert!(report.all_finished);

        let job = f.run.job("A").unwrap();
        assert_eq!(job.state, JobState::Finished);
        assert_eq!(job.property, Some(12.5));
        assert_eq!(
            job.state_history,
            vec![JobState::Queued, JobState::Submitted, JobState::Running]
        );
        assert_eq!(f.run.state().active, 0);

        let path = f.tracker.finish().unwrap();
        let entries = read_log(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, LogOutcome::Finished { property: 12.5 });
    }

    #[tokio::test]
    async fn simulation_dir_marks_running() {
        let mut f = fixture(1, MockComputation::default(), None);
        f.run.enqueue("A", 1.0, 0).unwrap();
        scheduler(&f.run).admit_ready().await.unwrap();

        start(&f.layout, "A");
        let report = f.tracker.poll().await.unwrap();
        assert_eq!(report.started, vec!["A"]);
        assert_eq!(f.run.job("A").unwrap().state, JobState::Running);

        let report = f.tracker.poll().await.unwrap();
        assert!(report.started.is_empty());
        assert_eq!(f.run.state().active, 1);
    }

    #[tokio::test]
    async fn computation_failure_only_fails_that_job() {
        let computation = MockComputation::default()
            .with_property("A", 3.0)
            .failing_property("B", "calcStiff.py produced no numeric value");
        let mut f = fixture(3, computation, None);
        for (id, priority) in [("A", 3.0), ("B", 2.0), ("C", 1.0)] {
            f.run.enqueue(id, priority, 0).unwrap();
        }
        scheduler(&f.run).admit_ready().await.unwrap();
        complete(&f.layout, "A");
        complete(&f.layout, "B");

        let report = f.tracker.poll().await.unwrap();
        assert_eq!(report.finished, vec!["A"]);
        assert_eq!(report.failed, vec!["B"]);
        assert!(!report.all_finished);

        assert_eq!(f.run.job("A").unwrap().state, JobState::Finished);
        let b = f.run.job("B").unwrap();
        assert_eq!(b.state, JobState::Failed);
        assert!(matches!(b.failure, Some(FailureKind::Computation(_))));
        assert_eq!(
            b.state_history,
            vec![JobState::Queued, JobState::Submitted, JobState::Running]
        );
        assert_eq!(f.run.job("C").unwrap().state, JobState::Submitted);
        assert_eq!(f.run.state().active, 1);

        let path = f.tracker.finish().unwrap();
        let entries = read_log(&path).unwrap();
        assert!(matches!(&entries[1].outcome, LogOutcome::Failed { reason } if reason.contains("computation failure")));
    }

    #[tokio::test]
    async fn finished_jobs_feed_the_estimator() {
        let computation = MockComputation::default()
            .with_property("A", 3.0)
            .failing_property("B", "no numeric value");
        let estimator = Arc::new(MockEstimator::default());
        let mut f = fixture_with_estimator(3, computation, None, Some(Arc::clone(&estimator)));
        for (id, priority) in [("A", 3.0), ("B", 2.0), ("C", 1.0)] {
            f.run.enqueue(id, priority, 0).unwrap();
        }
        scheduler(&f.run).admit_ready().await.unwrap();
        complete(&f.layout, "A");
        complete(&f.layout, "B");
        f.tracker.poll().await.unwrap();
        assert_eq!(estimator.added(), vec!["A"]);

        complete(&f.layout, "C");
        f.tracker.poll().await.unwrap();
        assert_eq!(estimator.added(), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn overdue_job_fails_with_deadline() {
        let mut f = fixture(1, MockComputation::default(), Some(Duration::ZERO));
        f.run.enqueue("A", 1.0, 0).unwrap();
        scheduler(&f.run).admit_ready().await.unwrap();

        let report = f.tracker.poll().await.unwrap();
        assert_eq!(report.failed, vec!["A"]);
        assert!(matches!(
            f.run.job("A").unwrap().failure,
            Some(FailureKind::DeadlineExceeded { .. })
        ));
        assert!(report.all_finished);
    }

    #[tokio::test]
    async fn completion_frees_a_slot_for_the_next_job() {
        let mut f = fixture(2, MockComputation::default(), None);
        for (id, priority) in [("A", 3.0), ("B", 2.0), ("C", 1.0)] {
            f.run.enqueue(id, priority, 0).unwrap();
        }
        let mut scheduler = scheduler(&f.run);

        let round = scheduler.admit_ready().await.unwrap();
        assert_eq!(round.admitted.len(), 2);
        assert_eq!(f.run.job("C").unwrap().state, JobState::Queued);

        complete(&f.layout, "A");
        let report = f.tracker.poll().await.unwrap();
        assert_eq!(report.completed(), 1);

        let round = scheduler.admit_ready().await.unwrap();
        assert_eq!(round.admitted[0].linker_id, "C");
        assert_eq!(f.run.state().active, 2);

        complete(&f.layout, "B");
        complete(&f.layout, "C");
        let report = f.tracker.poll().await.unwrap();
        assert_eq!(report.finished, vec!["B", "C"]);
        assert!(report.all_finished);
        assert_eq!(f.run.state().active, 0);
    }

    #[tokio::test]
    async fn abandoned_jobs_are_archived() {
        let mut f = fixture(1, MockComputation::default(), None);
        f.run.enqueue("A", 1.0, 0).unwrap();
        let mut scheduler = AdmissionScheduler::new(
            f.run.clone(),
            Arc::new(MockSubmitter::default().failing("A", 1)),
            "short",
            RetryConfig {
                max_retries: 0,
                base_delay_ms: 0,
            },
        );
        let round = scheduler.admit_ready().await.unwrap();
        f.tracker.record_abandoned(&round.abandoned[0]).unwrap();

        let entries = read_log(&f.tracker.finish().unwrap()).unwrap();
        assert!(matches!(&entries[0].outcome, LogOutcome::Failed { reason } if reason.starts_with("submission failure")));
    }
}
