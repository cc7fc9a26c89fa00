//! Learner configuration.
//!
//! All tunables of covering, pre-goal tracking, the cross-entropy updater and
//! the training loop. Defaults come from [`crate::constants`]; a JSON file may
//! override any subset of fields, and [`crate::env_config`] applies
//! environment overrides on top.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Weight of the elite fractions in the cross-entropy moving average.
    pub step_size: f64,
    /// Fraction of the population kept as elites.
    pub selection_ratio: f64,
    pub min_population: usize,
    /// Samples per viable rule.
    pub population_constant: f64,
    /// Negligible threshold as a fraction of the slot's uniform probability.
    pub negligible_fraction: f64,
    pub pruning_iterations: u32,
    /// A slot with at most this many viable rules is regenerated.
    pub regeneration_min_rules: usize,
    pub pregoal_settle_threshold: u32,
    pub covering_settle_threshold: u32,
    /// Initial absent mass of each new slot.
    pub absent_probability: f64,
    pub max_episode_steps: usize,
    pub generations: usize,
    /// Episodes averaged per sampled policy.
    pub episodes_per_policy: usize,
    pub convergence_threshold: f64,
    pub convergence_window: usize,
    pub seed: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            step_size: DEFAULT_STEP_SIZE,
            selection_ratio: DEFAULT_SELECTION_RATIO,
            min_population: MIN_POPULATION,
            population_constant: POPULATION_CONSTANT,
            negligible_fraction: NEGLIGIBLE_FRACTION,
            pruning_iterations: PRUNING_ITERATIONS,
            regeneration_min_rules: REGENERATION_MIN_RULES,
            pregoal_settle_threshold: PREGOAL_SETTLE_THRESHOLD,
            covering_settle_threshold: COVERING_SETTLE_THRESHOLD,
            absent_probability: DEFAULT_ABSENT_PROBABILITY,
            max_episode_steps: MAX_EPISODE_STEPS,
            generations: 50,
            episodes_per_policy: 1,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            convergence_window: DEFAULT_CONVERGENCE_WINDOW,
            seed: 42,
        }
    }
}

impl LearnerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        serde_json::from_str(&content).map_err(|source| StorageError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Clamp values into their meaningful ranges.
    pub fn sanitised(mut self) -> Self {
        self.step_size = self.step_size.clamp(0.0, 1.0);
        self.selection_ratio = self.selection_ratio.clamp(f64::MIN_POSITIVE, 1.0);
        self.absent_probability = self.absent_probability.clamp(0.0, 1.0);
        self.min_population = self.min_population.max(1);
        self.episodes_per_policy = self.episodes_per_policy.max(1);
        self.convergence_window = self.convergence_window.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: LearnerConfig =
            serde_json::from_str(r#"{"step_size": 0.25, "seed": 7}"#).unwrap();
        assert_eq!(config.step_size, 0.25);
        assert_eq!(config.seed, 7);
        assert_eq!(config.pruning_iterations, PRUNING_ITERATIONS);
        assert_eq!(config.pregoal_settle_threshold, 50);
    }

    #[test]
    fn test_sanitised_clamps() {
        let config = LearnerConfig {
            step_size: 3.0,
            selection_ratio: 0.0,
            min_population: 0,
            ..LearnerConfig::default()
        }
        .sanitised();
        assert_eq!(config.step_size, 1.0);
        assert!(config.selection_ratio > 0.0);
        assert_eq!(config.min_population, 1);
    }
}
