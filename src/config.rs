//! Search configuration loaded from `linker-search.toml`.
//!
//! [`SearchConfig`] holds every tunable of a run. Fields missing from the file
//! take the defaults below. `LINKER_SEARCH_LEARNING_ADDR` overrides the
//! learning server address from the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::SearchError;
use crate::generator::{ClosingStrategy, PriorityPolicy};
use crate::state_machine::RetryConfig;

pub const DEFAULT_CONFIG_FILE: &str = "linker-search.toml";
pub const LEARNING_ADDR_ENV: &str = "LINKER_SEARCH_LEARNING_ADDR";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Directory holding data, features, properties and the result log.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    /// Result log name (`<run_dir>/<mode>.txt`). Defaults to the closing strategy.
    #[serde(default)]
    pub mode: Option<String>,

    /// Simulations allowed on the facility at once.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Pause between completion checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Queue class passed to the submission command.
    #[serde(default = "default_queue_class")]
    pub queue_class: String,

    /// Program invoked as `<submit_command> <linker_id> <queue_class>`.
    #[serde(default = "default_submit_command")]
    pub submit_command: String,

    /// In-flight jobs older than this are marked failed.
    #[serde(default)]
    pub job_deadline_secs: Option<u64>,

    #[serde(default)]
    pub search: GenerationConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub computation: ComputationConfig,

    #[serde(default)]
    pub learning: LearningConfig,
}

/// `[search]`: bounds and policies of candidate generation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_trials")]
    pub trials: u32,
    /// First rung (inclusive).
    #[serde(default = "default_rule_min")]
    pub rule_min: usize,
    /// Last rung (exclusive).
    #[serde(default = "default_rule_max")]
    pub rule_max: usize,
    #[serde(default)]
    pub closing: ClosingStrategy,
    #[serde(default)]
    pub priority: PriorityPolicy,
    /// Rejected attempts tolerated on one rung before moving on.
    #[serde(default = "default_max_rung_attempts")]
    pub max_rung_attempts: usize,
    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// `[computation]`: external feature and property scripts.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputationConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,
    /// Scripts run from `<learn_dir>/computation`.
    #[serde(default = "default_learn_dir")]
    pub learn_dir: PathBuf,
    #[serde(default = "default_feature")]
    pub feature: String,
    #[serde(default = "default_property")]
    pub property: String,
    #[serde(default = "default_feature_scripts")]
    pub feature_scripts: BTreeMap<String, String>,
    #[serde(default = "default_property_scripts")]
    pub property_scripts: BTreeMap<String, String>,
}

/// `[learning]`: the online estimator.
#[derive(Debug, Clone, Deserialize)]
pub struct LearningConfig {
    /// `host:port` of the learning server. Required by estimator-driven policies.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("runs/search")
}

fn default_capacity() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_queue_class() -> String {
    "short".to_string()
}

fn default_submit_command() -> String {
    "submit_lammps_linker_deform_remote".to_string()
}

fn default_epochs() -> u32 {
    10
}

fn default_trials() -> u32 {
    1
}

fn default_rule_min() -> usize {
    6
}

fn default_rule_max() -> usize {
    16
}

fn default_max_rung_attempts() -> usize {
    1000
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("python3")
}

fn default_learn_dir() -> PathBuf {
    PathBuf::from("morfLearn")
}

fn default_feature() -> String {
    "point".to_string()
}

fn default_property() -> String {
    "stiff".to_string()
}

fn default_feature_scripts() -> BTreeMap<String, String> {
    BTreeMap::from([("point".to_string(), "calcPoint.py".to_string())])
}

fn default_property_scripts() -> BTreeMap<String, String> {
    BTreeMap::from([("stiff".to_string(), "calcStiff.py".to_string())])
}

fn default_reply_timeout_ms() -> u64 {
    30_000
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            trials: default_trials(),
            rule_min: default_rule_min(),
            rule_max: default_rule_max(),
            closing: ClosingStrategy::default(),
            priority: PriorityPolicy::default(),
            max_rung_attempts: default_max_rung_attempts(),
            seed: None,
        }
    }
}

impl Default for ComputationConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            learn_dir: default_learn_dir(),
            feature: default_feature(),
            property: default_property(),
            feature_scripts: default_feature_scripts(),
            property_scripts: default_property_scripts(),
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            address: None,
            reply_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            run_dir: default_run_dir(),
            mode: None,
            capacity: default_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            queue_class: default_queue_class(),
            submit_command: default_submit_command(),
            job_deadline_secs: None,
            search: GenerationConfig::default(),
            retry: RetryConfig::default(),
            computation: ComputationConfig::default(),
            learning: LearningConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Load from `path`, or from `linker-search.toml` in the working directory
    /// when no path is given. A missing default file means all defaults; a
    /// missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, SearchError> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(SearchError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Self::from_file(path)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        // The environment takes precedence over the file for the server address.
        if let Some(addr) = std::env::var(LEARNING_ADDR_ENV)
            .ok()
            .filter(|addr| !addr.is_empty())
        {
            config.learning.address = Some(addr);
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, SearchError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<SearchConfig>(&contents)?)
    }

    /// Reject settings that would only fail deep inside the run.
    pub fn validate(&self) -> Result<(), SearchError> {
        self.validate_search()?;
        let fail = |msg: String| Err(SearchError::Config(msg));

        if self.submit_command.trim().is_empty() {
            return fail("submit_command must not be empty".into());
        }

        let comp = &self.computation;
        if !comp.feature_scripts.contains_key(&comp.feature) {
            return fail(format!(
                "feature '{}' has no entry in computation.feature_scripts",
                comp.feature
            ));
        }
        if !comp.property_scripts.contains_key(&comp.property) {
            return fail(format!(
                "property '{}' has no entry in computation.property_scripts",
                comp.property
            ));
        }

        if self.needs_estimator() && self.learning.address.is_none() {
            return fail(format!(
                "closing strategy '{}' with priority policy '{}' needs learning.address (or {LEARNING_ADDR_ENV})",
                self.search.closing, self.search.priority
            ));
        }
        Ok(())
    }

    /// Checks that hold whatever backends the run is wired to.
    pub fn validate_search(&self) -> Result<(), SearchError> {
        let fail = |msg: String| Err(SearchError::Config(msg));

        if self.capacity == 0 {
            return fail("capacity must be at least 1".into());
        }
        if self.poll_interval_ms == 0 {
            return fail("poll_interval_ms must be positive".into());
        }
        if self.search.rule_min >= self.search.rule_max {
            return fail(format!(
                "empty rung range [{}, {})",
                self.search.rule_min, self.search.rule_max
            ));
        }
        if self.search.max_rung_attempts == 0 {
            return fail("max_rung_attempts must be at least 1".into());
        }
        Ok(())
    }

    pub fn needs_estimator(&self) -> bool {
        self.search.closing == ClosingStrategy::Estimator
            || self.search.priority == PriorityPolicy::Estimator
    }

    /// Name of the result log.
    pub fn mode(&self) -> String {
        self.mode
            .clone()
            .unwrap_or_else(|| self.search.closing.to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_deadline(&self) -> Option<Duration> {
        self.job_deadline_secs.map(Duration::from_secs)
    }
}
