//! Scripted collaborators shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bridge::{Computation, FeatureArtifact};
use crate::error::{ComputationError, SubmitError};
use crate::estimator::{Estimator, EstimatorError, Scope};
use crate::generator::{RewriteEngine, StructureConverter};

/// Engine whose walks always succeed unless told to dead-end. Each seed takes
/// the next scripted base id (or `autoN` once the script runs out), and a
/// closed state's id is the base id plus the closing suffix.
pub struct ScriptedEngine {
    ids: Mutex<VecDeque<String>>,
    seeds: AtomicUsize,
    closings: Vec<(String, f64)>,
    dead_end_after: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedState {
    pub base: String,
    pub steps: usize,
    pub closing: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptedOpt {
    Grow,
    Close(usize),
}

impl ScriptedEngine {
    pub fn new(ids: Vec<&str>) -> Self {
        Self {
            ids: Mutex::new(ids.into_iter().map(str::to_string).collect()),
            seeds: AtomicUsize::new(0),
            closings: vec![(String::new(), 120.0)],
            dead_end_after: None,
        }
    }

    /// Closing options as `(id suffix, bond angle)`.
    pub fn with_closings(mut self, closings: Vec<(&str, f64)>) -> Self {
        self.closings = closings
            .into_iter()
            .map(|(suffix, angle)| (suffix.to_string(), angle))
            .collect();
        self
    }

    /// No growth options once a walk has taken `steps` steps.
    pub fn with_dead_end_after(mut self, steps: usize) -> Self {
        self.dead_end_after = Some(steps);
        self
    }
}

impl RewriteEngine for ScriptedEngine {
    type State = ScriptedState;
    type Opt = ScriptedOpt;

    fn seed(&self) -> ScriptedState {
        let n = self.seeds.fetch_add(1, Ordering::SeqCst);
        let base = self
            .ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("auto{n}"));
        ScriptedState {
            base,
            steps: 0,
            closing: None,
        }
    }

    fn options(&self, state: &ScriptedState) -> Vec<ScriptedOpt> {
        let dead = self.dead_end_after.is_some_and(|n| state.steps >= n);
        if state.closing.is_some() || dead {
            Vec::new()
        } else {
            vec![ScriptedOpt::Grow]
        }
    }

    fn closing_options(&self, state: &ScriptedState) -> Vec<ScriptedOpt> {
        if state.closing.is_some() {
            return Vec::new();
        }
        (0..self.closings.len()).map(ScriptedOpt::Close).collect()
    }

    fn apply(&self, option: &ScriptedOpt, state: &ScriptedState) -> ScriptedState {
        let mut next = state.clone();
        match option {
            ScriptedOpt::Grow => next.steps += 1,
            ScriptedOpt::Close(i) => next.closing = Some(*i),
        }
        next
    }
}

impl StructureConverter for ScriptedEngine {
    fn linker_id(&self, state: &ScriptedState) -> String {
        match state.closing {
            Some(i) => format!("{}{}", state.base, self.closings[i].0),
            None => state.base.clone(),
        }
    }

    fn canonical_string(&self, state: &ScriptedState) -> String {
        format!("{}:{}", self.linker_id(state), state.steps)
    }

    fn write_simulation_input(
        &self,
        state: &ScriptedState,
        coeff: &Path,
        lmpdat: &Path,
    ) -> io::Result<()> {
        let id = self.linker_id(state);
        fs::write(coeff, format!("coeff {id}\n"))?;
        fs::write(lmpdat, format!("data {id} {}\n", state.steps))
    }

    fn bond_angle(&self, state: &ScriptedState) -> f64 {
        state.closing.map_or(180.0, |i| self.closings[i].1)
    }
}

/// Feature calls succeed unless the id is listed; properties default to 1.0.
#[derive(Default)]
pub struct MockComputation {
    failing_features: HashSet<String>,
    properties: HashMap<String, Result<f64, String>>,
}

impl MockComputation {
    pub fn failing_feature(mut self, linker_id: &str) -> Self {
        self.failing_features.insert(linker_id.to_string());
        self
    }

    pub fn with_property(mut self, linker_id: &str, value: f64) -> Self {
        self.properties.insert(linker_id.to_string(), Ok(value));
        self
    }

    pub fn failing_property(mut self, linker_id: &str, output: &str) -> Self {
        self.properties
            .insert(linker_id.to_string(), Err(output.to_string()));
        self
    }
}

impl Computation for MockComputation {
    async fn compute_feature(
        &self,
        linker_id: &str,
        _feature: &str,
        _speculative: bool,
    ) -> Result<FeatureArtifact, ComputationError> {
        if self.failing_features.contains(linker_id) {
            return Err(ComputationError::NonZeroExit {
                script: "calcPoint.py".into(),
                code: Some(1),
                stderr: "ValueError".into(),
            });
        }
        Ok(FeatureArtifact {
            linker_id: linker_id.to_string(),
            path: PathBuf::from(format!("{linker_id}.npy")),
        })
    }

    async fn compute_property(&self, linker_id: &str) -> Result<f64, ComputationError> {
        match self.properties.get(linker_id) {
            Some(Ok(value)) => Ok(*value),
            Some(Err(output)) => Err(ComputationError::Unparseable {
                script: "calcStiff.py".into(),
                output: output.clone(),
            }),
            None => Ok(1.0),
        }
    }
}

/// Accepts everything except ids scripted to fail a number of times.
#[derive(Default)]
pub struct MockSubmitter {
    failures: Mutex<HashMap<String, u32>>,
    submitted: Mutex<Vec<(String, String)>>,
}

impl MockSubmitter {
    pub fn failing(self, linker_id: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(linker_id.to_string(), times);
        self
    }

    pub fn submitted(&self) -> Vec<(String, String)> {
        self.submitted.lock().unwrap().clone()
    }
}

impl crate::scheduler::Submitter for MockSubmitter {
    async fn submit(&self, linker_id: &str, queue_class: &str) -> Result<(), SubmitError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(linker_id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SubmitError::NonZeroExit {
                        program: "submit".into(),
                        code: Some(1),
                        stderr: "queue unavailable".into(),
                    });
                }
            }
        }
        self.submitted
            .lock()
            .unwrap()
            .push((linker_id.to_string(), queue_class.to_string()));
        Ok(())
    }
}

/// Fixed predictions by id; unknown ids are a server error. Added
/// observations are recorded in order.
#[derive(Default)]
pub struct MockEstimator {
    values: HashMap<String, f64>,
    added: Mutex<Vec<String>>,
}

impl MockEstimator {
    pub fn with(mut self, linker_id: &str, value: f64) -> Self {
        self.values.insert(linker_id.to_string(), value);
        self
    }

    pub fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }
}

impl Estimator for MockEstimator {
    async fn predict(&self, linker_id: &str, _scope: Scope) -> Result<f64, EstimatorError> {
        self.values
            .get(linker_id)
            .copied()
            .ok_or_else(|| EstimatorError::Server(format!("unknown linker {linker_id}")))
    }

    async fn add_observation(&self, linker_id: &str) -> Result<usize, EstimatorError> {
        let mut added = self.added.lock().unwrap();
        added.push(linker_id.to_string());
        Ok(added.len())
    }
}
