//! Stochastic candidate generation: the producer side of a run.
//!
//! For every epoch, trial and rung the generator grows a structure from the
//! engine's seed by `rung` random rule applications, closes it with the
//! configured [`ClosingStrategy`], and turns the first unseen result into a
//! queued job. Rejected attempts restart from the seed on the same rung.

mod engine;
pub mod grammar;
mod strategy;

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::board::SharedRun;
use crate::bridge::Computation;
use crate::config::SearchConfig;
use crate::error::{GenerationError, SearchError};
use crate::estimator::{Estimator, Scope};
use crate::layout::RunLayout;

pub use engine::{Candidate, RewriteEngine, StructureConverter};
pub use grammar::ChainGrammar;
pub use strategy::{ClosingStrategy, PriorityPolicy, best_metric};

/// Loop bounds and policies, taken from `[search]` and `[computation]`.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub epochs: u32,
    pub trials: u32,
    pub rungs: Range<usize>,
    pub closing: ClosingStrategy,
    pub priority: PriorityPolicy,
    pub max_rung_attempts: usize,
    pub feature: String,
    pub seed: Option<u64>,
}

impl GeneratorSettings {
    pub fn from_config(config: &SearchConfig) -> Self {
        let search = &config.search;
        Self {
            epochs: search.epochs,
            trials: search.trials,
            rungs: search.rule_min..search.rule_max,
            closing: search.closing,
            priority: search.priority,
            max_rung_attempts: search.max_rung_attempts,
            feature: config.computation.feature.clone(),
            seed: search.seed,
        }
    }

    fn needs_estimator(&self) -> bool {
        self.closing == ClosingStrategy::Estimator || self.priority == PriorityPolicy::Estimator
    }
}

/// Counters reported at the end of generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationStats {
    pub accepted: usize,
    pub duplicates: usize,
    pub restarts: usize,
    pub closing_failures: usize,
    pub invalid_metrics: usize,
    pub feature_failures: usize,
    pub abandoned_rungs: usize,
    pub accepted_per_rung: BTreeMap<usize, usize>,
}

pub struct CandidateGenerator<E, C, S> {
    engine: Arc<E>,
    computation: Arc<C>,
    estimator: Option<Arc<S>>,
    layout: RunLayout,
    run: SharedRun,
    settings: GeneratorSettings,
    rng: StdRng,
    seen: HashSet<String>,
    stats: GenerationStats,
}

impl<E, C, S> CandidateGenerator<E, C, S>
where
    E: StructureConverter,
    C: Computation,
    S: Estimator,
{
    pub fn new(
        settings: GeneratorSettings,
        engine: Arc<E>,
        computation: Arc<C>,
        estimator: Option<Arc<S>>,
        layout: RunLayout,
        run: SharedRun,
    ) -> Result<Self, SearchError> {
        if settings.needs_estimator() && estimator.is_none() {
            return Err(SearchError::Config(format!(
                "closing strategy '{}' with priority policy '{}' needs an estimator",
                settings.closing, settings.priority
            )));
        }
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            engine,
            computation,
            estimator,
            layout,
            run,
            settings,
            rng,
            seen: HashSet::new(),
            stats: GenerationStats::default(),
        })
    }

    /// Run every epoch, trial and rung. Returns early only on I/O failures
    /// writing accepted candidates or on a board inconsistency.
    pub async fn run(mut self) -> Result<GenerationStats, SearchError> {
        info!(
            epochs = self.settings.epochs,
            trials = self.settings.trials,
            rungs = ?self.settings.rungs,
            closing = %self.settings.closing,
            priority = %self.settings.priority,
            "generation started"
        );
        for epoch in 0..self.settings.epochs {
            for trial in 0..self.settings.trials {
                for rung in self.settings.rungs.clone() {
                    debug!(epoch, trial, rung, "filling rung");
                    self.fill_rung(epoch, rung).await?;
                }
            }
        }
        info!(
            accepted = self.stats.accepted,
            duplicates = self.stats.duplicates,
            abandoned_rungs = self.stats.abandoned_rungs,
            "generation finished"
        );
        Ok(self.stats)
    }

    /// Produce at most one accepted candidate for `rung`.
    async fn fill_rung(&mut self, epoch: u32, rung: usize) -> Result<(), SearchError> {
        for _ in 0..self.settings.max_rung_attempts {
            match self.attempt(rung).await {
                Ok((candidate, linker_id)) => {
                    return self.accept(epoch, rung, candidate, linker_id).await;
                }
                Err(rejection) => self.note_rejection(rung, rejection),
            }
        }
        warn!(
            rung,
            attempts = self.settings.max_rung_attempts,
            "rung abandoned, every attempt was rejected"
        );
        self.stats.abandoned_rungs += 1;
        Ok(())
    }

    fn note_rejection(&mut self, rung: usize, rejection: GenerationError) {
        match &rejection {
            GenerationError::NoValidOption { .. } => self.stats.restarts += 1,
            GenerationError::NoValidClosingOption => self.stats.closing_failures += 1,
            GenerationError::DuplicateCandidate(_) => self.stats.duplicates += 1,
            GenerationError::InvalidCandidateMetric { .. } => {
                self.stats.invalid_metrics += 1;
                warn!(rung, %rejection, "candidate rejected");
                return;
            }
        }
        debug!(rung, %rejection, "attempt rejected");
    }

    /// One walk from the seed: `rung` growth steps, one closing step, then
    /// the duplicate check.
    async fn attempt(
        &mut self,
        rung: usize,
    ) -> Result<(Candidate<E::State>, String), GenerationError> {
        let engine = Arc::clone(&self.engine);
        let mut candidate = Candidate::new(engine.seed());

        for step in 0..rung {
            let options = engine.options(&candidate.state);
            let Some(option) = options.choose(&mut self.rng) else {
                return Err(GenerationError::NoValidOption { step });
            };
            candidate.state = engine.apply(option, &candidate.state);
            candidate.rules_applied += 1;
        }

        let closing = engine.closing_options(&candidate.state);
        if closing.is_empty() {
            return Err(GenerationError::NoValidClosingOption);
        }
        let chosen = match self.settings.closing {
            ClosingStrategy::Uniform => closing
                .choose(&mut self.rng)
                .cloned()
                .ok_or(GenerationError::NoValidClosingOption)?,
            ClosingStrategy::BestMetric => best_metric(engine.as_ref(), &candidate.state, &closing)?,
            ClosingStrategy::Estimator => self.best_estimated(&candidate.state, &closing).await?,
        };
        candidate.state = engine.apply(&chosen, &candidate.state);
        candidate.rules_applied += 1;

        let linker_id = engine.linker_id(&candidate.state);
        if !self.seen.insert(linker_id.clone()) {
            return Err(GenerationError::DuplicateCandidate(linker_id));
        }
        Ok((candidate, linker_id))
    }

    /// Close speculatively with each option and keep the one the estimator
    /// rates highest. Options that cannot be evaluated are skipped.
    async fn best_estimated(
        &self,
        state: &E::State,
        options: &[E::Opt],
    ) -> Result<E::Opt, GenerationError> {
        let Some(estimator) = self.estimator.as_ref() else {
            return Err(GenerationError::NoValidClosingOption);
        };
        let mut best: Option<(f64, &E::Opt)> = None;

        for option in options {
            let closed = self.engine.apply(option, state);
            let linker_id = self.engine.linker_id(&closed);
            let coeff = self.layout.coeff_path(&linker_id, true);
            let lmpdat = self.layout.lmpdat_path(&linker_id, true);
            if let Err(e) = self.engine.write_simulation_input(&closed, &coeff, &lmpdat) {
                warn!(linker = %linker_id, error = %e, "could not write speculative input");
                continue;
            }
            if let Err(e) = self
                .computation
                .compute_feature(&linker_id, &self.settings.feature, true)
                .await
            {
                warn!(linker = %linker_id, error = %e, "speculative feature failed");
                continue;
            }
            match estimator.predict(&linker_id, Scope::Possible).await {
                Ok(score) => {
                    debug!(linker = %linker_id, score, "closing option scored");
                    if best.is_none_or(|(top, _)| score > top) {
                        best = Some((score, option));
                    }
                }
                Err(e) => warn!(linker = %linker_id, error = %e, "estimator failed"),
            }
        }

        best.map(|(_, option)| option.clone())
            .ok_or(GenerationError::NoValidClosingOption)
    }

    async fn accept(
        &mut self,
        epoch: u32,
        rung: usize,
        candidate: Candidate<E::State>,
        linker_id: String,
    ) -> Result<(), SearchError> {
        let coeff = self.layout.coeff_path(&linker_id, false);
        let lmpdat = self.layout.lmpdat_path(&linker_id, false);
        self.engine
            .write_simulation_input(&candidate.state, &coeff, &lmpdat)?;

        if let Err(e) = self
            .computation
            .compute_feature(&linker_id, &self.settings.feature, false)
            .await
        {
            warn!(linker = %linker_id, error = %e, "feature computation failed, candidate dropped");
            self.stats.feature_failures += 1;
            return Ok(());
        }

        let priority = self.priority_for(&linker_id).await;
        let seq = self.run.enqueue(&linker_id, priority, epoch)?;
        info!(
            linker = %linker_id,
            epoch,
            rung,
            rules = candidate.rules_applied,
            priority,
            seq,
            "candidate queued"
        );
        debug!(
            linker = %linker_id,
            structure = %self.engine.canonical_string(&candidate.state),
            "candidate structure"
        );
        self.stats.accepted += 1;
        *self.stats.accepted_per_rung.entry(rung).or_default() += 1;
        Ok(())
    }

    async fn priority_for(&mut self, linker_id: &str) -> f64 {
        if self.settings.priority == PriorityPolicy::Estimator {
            if let Some(estimator) = self.estimator.as_ref() {
                match estimator.predict(linker_id, Scope::Final).await {
                    Ok(score) => return score,
                    Err(e) => {
                        warn!(linker = %linker_id, error = %e, "estimator priority failed, using a random one")
                    }
                }
            }
        }
        self.rng.gen_range(0.0..1.0)
    }
}
