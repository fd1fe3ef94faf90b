//! In-process stand-ins for the facility, the scripts and the learning
//! server. `demo` runs the whole pipeline on top of these.
//!
//! Values are derived from a hash of the linker id, so a demo run with a
//! fixed seed reproduces its results.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, warn};

use crate::bridge::{Computation, FeatureArtifact, parse_property};
use crate::error::{ComputationError, SubmitError};
use crate::estimator::{Estimator, EstimatorError, Scope};
use crate::layout::RunLayout;
use crate::scheduler::Submitter;

/// Roughly one simulation in this many ends with unusable output.
const FAILURE_ONE_IN: u64 = 13;

fn digest(linker_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    linker_id.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic value in `[0, 1)` for a linker.
pub fn synthetic_score(linker_id: &str) -> f64 {
    (digest(linker_id) % 10_000) as f64 / 10_000.0
}

/// Accepts every job and plays it out on a background task: the simulation
/// directory appears after `start_delay`, the force file after `run_time`.
#[derive(Debug, Clone)]
pub struct SimulatedFacility {
    layout: RunLayout,
    start_delay: Duration,
    run_time: Duration,
}

impl SimulatedFacility {
    pub fn new(layout: RunLayout, start_delay: Duration, run_time: Duration) -> Self {
        Self {
            layout,
            start_delay,
            run_time,
        }
    }
}

impl Submitter for SimulatedFacility {
    async fn submit(&self, linker_id: &str, queue_class: &str) -> Result<(), SubmitError> {
        if !self.layout.lmpdat_path(linker_id, false).is_file() {
            return Err(SubmitError::Rejected {
                linker_id: linker_id.to_string(),
                reason: "no simulation input".into(),
            });
        }
        debug!(linker = linker_id, queue = queue_class, "simulated submission");

        let layout = self.layout.clone();
        let id = linker_id.to_string();
        let (start_delay, run_time) = (self.start_delay, self.run_time);
        tokio::spawn(async move {
            tokio::time::sleep(start_delay).await;
            if let Err(e) = fs::create_dir_all(layout.simulation_dir(&id)).await {
                warn!(linker = %id, error = %e, "simulated facility could not start job");
                return;
            }
            tokio::time::sleep(run_time).await;
            let value = if digest(&id) % FAILURE_ONE_IN == 0 {
                "nan".to_string()
            } else {
                format!("{:.4}", 50.0 + 100.0 * synthetic_score(&id))
            };
            // The marker must appear complete, so write aside and rename.
            let marker = layout.completion_marker(&id);
            let partial = marker.with_extension("partial");
            let contents = format!("# step ave-force\n0 0.0\n1000 {value}\n");
            let written = match fs::write(&partial, contents).await {
                Ok(()) => fs::rename(&partial, &marker).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!(linker = %id, error = %e, "simulated facility could not finish job");
            }
        });
        Ok(())
    }
}

/// Writes placeholder feature files and reads the property straight from
/// the force file.
#[derive(Debug, Clone)]
pub struct SimulatedComputation {
    layout: RunLayout,
}

impl SimulatedComputation {
    pub fn new(layout: RunLayout) -> Self {
        Self { layout }
    }
}

impl Computation for SimulatedComputation {
    async fn compute_feature(
        &self,
        linker_id: &str,
        feature: &str,
        speculative: bool,
    ) -> Result<FeatureArtifact, ComputationError> {
        let input = self.layout.lmpdat_path(linker_id, speculative);
        let data = fs::read_to_string(&input)
            .await
            .map_err(|_| ComputationError::MissingInput(input.clone()))?;

        let path = self.layout.feature_path_for(feature, linker_id, speculative);
        let vector = format!("{} {:.4}\n", data.lines().count(), synthetic_score(linker_id));
        fs::write(&path, vector)
            .await
            .map_err(|_| ComputationError::MissingArtifact(path.clone()))?;
        Ok(FeatureArtifact {
            linker_id: linker_id.to_string(),
            path,
        })
    }

    async fn compute_property(&self, linker_id: &str) -> Result<f64, ComputationError> {
        let marker = self.layout.completion_marker(linker_id);
        let contents = fs::read_to_string(&marker)
            .await
            .map_err(|_| ComputationError::MissingInput(marker.clone()))?;
        let last = contents
            .lines()
            .rfind(|line| !line.trim().is_empty())
            .and_then(|line| line.split_whitespace().last())
            .unwrap_or_default();
        parse_property("simulated", last)
    }
}

/// Scores linkers by hash; speculative queries see a slightly noisier value.
/// Observations only grow a counter.
#[derive(Debug, Default)]
pub struct SimulatedEstimator {
    observed: AtomicUsize,
}

impl Estimator for SimulatedEstimator {
    async fn predict(&self, linker_id: &str, scope: Scope) -> Result<f64, EstimatorError> {
        let score = synthetic_score(linker_id);
        Ok(match scope {
            Scope::Final => score,
            Scope::Possible => score * 0.9 + synthetic_score(&format!("{linker_id}~")) * 0.1,
        })
    }

    async fn add_observation(&self, linker_id: &str) -> Result<usize, EstimatorError> {
        let size = self.observed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(linker = linker_id, training_set = size, "simulated estimator updated");
        Ok(size)
    }
}
