use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::engine::StructureConverter;
use crate::error::GenerationError;

/// Largest backbone angle a real structure can have.
pub const MAX_BOND_ANGLE: f64 = 180.0;

/// How the final, structure-closing rule is picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ClosingStrategy {
    /// Uniformly at random.
    #[default]
    Uniform,
    /// Maximize the backbone bond angle.
    BestMetric,
    /// Maximize the learned estimator's prediction.
    Estimator,
}

impl fmt::Display for ClosingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClosingStrategy::Uniform => "uniform",
            ClosingStrategy::BestMetric => "best-metric",
            ClosingStrategy::Estimator => "estimator",
        };
        f.write_str(name)
    }
}

/// How an accepted linker's queue priority is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityPolicy {
    #[default]
    Random,
    Estimator,
}

impl fmt::Display for PriorityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityPolicy::Random => f.write_str("random"),
            PriorityPolicy::Estimator => f.write_str("estimator"),
        }
    }
}

/// Pick the closing option whose result has the largest bond angle. The
/// first option wins ties. Any out-of-range angle rejects the candidate.
pub fn best_metric<E: StructureConverter>(
    engine: &E,
    state: &E::State,
    options: &[E::Opt],
) -> Result<E::Opt, GenerationError> {
    let mut best: Option<(f64, &E::Opt)> = None;
    for option in options {
        let closed = engine.apply(option, state);
        let angle = engine.bond_angle(&closed);
        if !angle.is_finite() || !(0.0..=MAX_BOND_ANGLE).contains(&angle) {
            return Err(GenerationError::InvalidCandidateMetric {
                linker_id: engine.linker_id(&closed),
                value: angle,
            });
        }
        if best.is_none_or(|(top, _)| angle > top) {
            best = Some((angle, option));
        }
    }
    best.map(|(_, option)| option.clone())
        .ok_or(GenerationError::NoValidClosingOption)
}
