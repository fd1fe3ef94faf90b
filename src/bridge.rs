//! Feature and property extraction through external scripts.
//!
//! Scripts are looked up by name in the registries from `[computation]` and
//! run as `<interpreter> <script> <input> <output_dir>` from
//! `<learn_dir>/computation`. A run only counts when the process exits with
//! status 0 and leaves a usable result behind.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::ComputationConfig;
use crate::error::{ComputationError, SearchError};
use crate::layout::RunLayout;

/// A feature file produced for one linker.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureArtifact {
    pub linker_id: String,
    pub path: PathBuf,
}

/// Feature and property extraction, as used by the generator and the tracker.
pub trait Computation: Send + Sync + 'static {
    /// Compute input features for a linker whose simulation input is already
    /// on disk. `speculative` reads and writes the `possible/` subtrees.
    fn compute_feature(
        &self,
        linker_id: &str,
        feature: &str,
        speculative: bool,
    ) -> impl Future<Output = Result<FeatureArtifact, ComputationError>> + Send;

    /// Extract the property from a completed simulation.
    fn compute_property(
        &self,
        linker_id: &str,
    ) -> impl Future<Output = Result<f64, ComputationError>> + Send;
}

/// Name → script file lookup.
#[derive(Debug, Clone)]
pub struct ScriptRegistry {
    kind: &'static str,
    scripts: BTreeMap<String, String>,
}

impl ScriptRegistry {
    pub fn new(kind: &'static str, scripts: BTreeMap<String, String>) -> Self {
        Self { kind, scripts }
    }

    pub fn lookup(&self, name: &str) -> Result<&str, ComputationError> {
        self.scripts
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ComputationError::UnknownScript {
                kind: self.kind,
                name: name.to_string(),
            })
    }
}

pub struct ScriptBridge {
    interpreter: PathBuf,
    work_dir: PathBuf,
    layout: RunLayout,
    features: ScriptRegistry,
    properties: ScriptRegistry,
    property: String,
}

impl ScriptBridge {
    /// Fails when the configured feature or property has no script, or the
    /// script directory does not exist.
    pub fn new(config: &ComputationConfig, layout: RunLayout) -> Result<Self, SearchError> {
        let features = ScriptRegistry::new("feature", config.feature_scripts.clone());
        let properties = ScriptRegistry::new("property", config.property_scripts.clone());
        features.lookup(&config.feature)?;
        properties.lookup(&config.property)?;

        let work_dir = config.learn_dir.join("computation");
        if !work_dir.is_dir() {
            return Err(SearchError::Config(format!(
                "script directory not found: {}",
                work_dir.display()
            )));
        }

        Ok(Self {
            interpreter: config.interpreter.clone(),
            work_dir,
            layout,
            features,
            properties,
            property: config.property.clone(),
        })
    }

    /// Run a script to completion and return its stdout.
    async fn run_script(
        &self,
        script: &str,
        input: &Path,
        output_dir: &Path,
    ) -> Result<String, ComputationError> {
        if !input.exists() {
            return Err(ComputationError::MissingInput(input.to_path_buf()));
        }

        let output = Command::new(&self.interpreter)
            .arg(script)
            .arg(input)
            .arg(output_dir)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ComputationError::Launch {
                script: script.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(ComputationError::NonZeroExit {
                script: script.to_string(),
                code: output.status.code(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), 5),
            });
        }
        Ok(stdout)
    }
}

impl Computation for ScriptBridge {
    #[instrument(level = "debug", skip(self))]
    async fn compute_feature(
        &self,
        linker_id: &str,
        feature: &str,
        speculative: bool,
    ) -> Result<FeatureArtifact, ComputationError> {
        let script = self.features.lookup(feature)?;
        let input = self.layout.lmpdat_path(linker_id, speculative);
        let output_dir = self.layout.feature_dir_for(feature, speculative);
        self.run_script(script, &input, &output_dir).await?;

        let path = self.layout.feature_path_for(feature, linker_id, speculative);
        if !path.exists() {
            return Err(ComputationError::MissingArtifact(path));
        }
        debug!(path = %path.display(), "feature written");
        Ok(FeatureArtifact {
            linker_id: linker_id.to_string(),
            path,
        })
    }

    #[instrument(level = "debug", skip(self))]
    async fn compute_property(&self, linker_id: &str) -> Result<f64, ComputationError> {
        let script = self.properties.lookup(&self.property)?;
        let input = self.layout.completion_marker(linker_id);
        let stdout = self
            .run_script(script, &input, &self.layout.property_dir())
            .await?;
        parse_property(script, &stdout)
    }
}

/// The property is the last non-empty line of the script's stdout.
pub fn parse_property(script: &str, stdout: &str) -> Result<f64, ComputationError> {
    let unparseable = || ComputationError::Unparseable {
        script: script.to_string(),
        output: tail(stdout, 3),
    };
    let last = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or_else(unparseable)?;
    match last.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(unparseable()),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join(" | ")
}
