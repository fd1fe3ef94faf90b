//! Drives a complete run: one producer task generating candidates and one
//! consumer task admitting and tracking jobs, until both are done.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::board::SharedRun;
use crate::bridge::Computation;
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::estimator::Estimator;
use crate::generator::{CandidateGenerator, GenerationStats, GeneratorSettings, StructureConverter};
use crate::layout::RunLayout;
use crate::results::ResultLog;
use crate::scheduler::{AdmissionScheduler, Submitter};
use crate::state_machine::{Job, JobState};
use crate::tracker::CompletionTracker;
use crate::ui::RunProgress;

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub finished: usize,
    pub failed: usize,
    pub result_log: PathBuf,
    pub generation: GenerationStats,
    pub jobs: Vec<Job>,
}

impl RunSummary {
    /// Highest property among finished jobs.
    pub fn best(&self) -> Option<(&str, f64)> {
        self.jobs
            .iter()
            .filter_map(|job| job.property.map(|p| (job.linker_id.as_str(), p)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

// Marks generation as over when the producer ends, including by panic, so
// the consumer can always drain.
struct SubmissionDone(SharedRun);

impl Drop for SubmissionDone {
    fn drop(&mut self) {
        self.0.mark_all_submitted();
    }
}

pub struct RunController<E, C, S, T> {
    run_id: Uuid,
    mode: String,
    run: SharedRun,
    generator: CandidateGenerator<E, C, S>,
    scheduler: AdmissionScheduler<T>,
    tracker: CompletionTracker<C, S>,
    poll_interval: Duration,
    progress: Option<RunProgress>,
}

impl<E, C, S, T> RunController<E, C, S, T>
where
    E: StructureConverter,
    C: Computation,
    S: Estimator,
    T: Submitter,
{
    /// Prepare the run directory and wire the components around one shared
    /// board. Any output of a previous run in `layout` is removed.
    pub fn new(
        config: &SearchConfig,
        layout: RunLayout,
        engine: Arc<E>,
        computation: Arc<C>,
        estimator: Option<Arc<S>>,
        submitter: Arc<T>,
    ) -> Result<Self, SearchError> {
        layout.prepare()?;
        let mode = config.mode();
        let log = ResultLog::create(&layout.result_log(&mode))?;
        let run = SharedRun::new(config.capacity);

        let generator = CandidateGenerator::new(
            GeneratorSettings::from_config(config),
            engine,
            Arc::clone(&computation),
            estimator.clone(),
            layout.clone(),
            run.clone(),
        )?;
        let scheduler = AdmissionScheduler::new(
            run.clone(),
            submitter,
            &config.queue_class,
            config.retry.clone(),
        );
        let tracker = CompletionTracker::new(
            run.clone(),
            computation,
            estimator,
            layout,
            config.job_deadline(),
            log,
        );

        Ok(Self {
            run_id: Uuid::new_v4(),
            mode,
            run,
            generator,
            scheduler,
            tracker,
            poll_interval: config.poll_interval(),
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: RunProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run generation and the admission/completion loop concurrently and
    /// wait for both. A generation error is returned after every job that
    /// was already queued has been driven to a terminal state.
    pub async fn run(self) -> Result<RunSummary, SearchError> {
        let Self {
            run_id,
            mode,
            run,
            generator,
            scheduler,
            tracker,
            poll_interval,
            progress,
        } = self;
        let started_at = Utc::now();
        let clock = Instant::now();
        let span = info_span!("run", %run_id);
        info!(parent: &span, %mode, capacity = run.state().capacity, "run started");

        let done = SubmissionDone(run.clone());
        let producer = tokio::spawn(
            async move {
                let _done = done;
                generator.run().await
            }
            .instrument(info_span!(parent: &span, "producer")),
        );
        let consumer = tokio::spawn(
            consume(run.clone(), scheduler, tracker, poll_interval, progress.clone())
                .instrument(info_span!(parent: &span, "consumer")),
        );

        let (generated, consumed) = tokio::join!(producer, consumer);
        let result_log = consumed??;
        let generation = match generated? {
            Ok(stats) => stats,
            Err(e) => {
                error!(parent: &span, error = %e, "generation aborted");
                return Err(e);
            }
        };

        let jobs = run.jobs();
        let count = |state: JobState| jobs.iter().filter(|job| job.state == state).count();
        let summary = RunSummary {
            run_id,
            mode,
            started_at,
            elapsed: clock.elapsed(),
            finished: count(JobState::Finished),
            failed: count(JobState::Failed),
            result_log,
            generation,
            jobs,
        };
        info!(
            parent: &span,
            finished = summary.finished,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run complete"
        );
        if let Some(progress) = progress {
            progress.finish(&summary);
        }
        Ok(summary)
    }
}

/// The consumer loop: admit, poll, admit into freed slots, then wait one
/// tick. Ends once the board is drained and returns the result log path.
async fn consume<C: Computation, S: Estimator, T: Submitter>(
    run: SharedRun,
    mut scheduler: AdmissionScheduler<T>,
    mut tracker: CompletionTracker<C, S>,
    poll_interval: Duration,
    progress: Option<RunProgress>,
) -> Result<PathBuf, SearchError> {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        admit(&mut scheduler, &mut tracker).await?;
        let report = tracker.poll().await?;
        if report.completed() > 0 {
            admit(&mut scheduler, &mut tracker).await?;
        }
        if let Some(progress) = &progress {
            progress.update(&run.snapshot());
        }
        if run.is_drained() {
            break;
        }
    }
    tracker.finish()
}

async fn admit<C: Computation, S: Estimator, T: Submitter>(
    scheduler: &mut AdmissionScheduler<T>,
    tracker: &mut CompletionTracker<C, S>,
) -> Result<(), SearchError> {
    let round = scheduler.admit_ready().await?;
    for job in &round.abandoned {
        tracker.record_abandoned(job)?;
    }
    Ok(())
}
