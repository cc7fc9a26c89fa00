//! Learning constants and defaults.
//!
//! Every value here is a default for a field of
//! [`LearnerConfig`](crate::config::LearnerConfig) or a fixed numeric tolerance.
//! Tunables live in the config; these are the numbers it starts from.

/// Consecutive unchanged observations after which a pre-goal is settled.
pub const PREGOAL_SETTLE_THRESHOLD: u32 = 50;

/// Consecutive unchanged covering passes after which a candidate rule is
/// promoted to a stable LGG rule.
pub const COVERING_SETTLE_THRESHOLD: u32 = 50;

/// Consecutive updates a rule must stay negligible before it is pruned.
pub const PRUNING_ITERATIONS: u32 = 3;

/// Probability below which a rule counts as negligible.
///
/// Expressed as a fraction of the uniform probability `1 / n` of its slot.
pub const NEGLIGIBLE_FRACTION: f64 = 0.1;

/// A slot with at most this many viable rules asks for new mutants.
pub const REGENERATION_MIN_RULES: usize = 1;

/// Default cross-entropy step size.
pub const DEFAULT_STEP_SIZE: f64 = 0.6;

/// Default elite selection ratio.
pub const DEFAULT_SELECTION_RATIO: f64 = 0.05;

/// Population floor.
pub const MIN_POPULATION: usize = 20;

/// Population samples per viable rule.
pub const POPULATION_CONSTANT: f64 = 10.0;

/// Initial absent mass of a new slot.
pub const DEFAULT_ABSENT_PROBABILITY: f64 = 0.0;

/// Hard cap on actions per episode.
pub const MAX_EPISODE_STEPS: usize = 100;

/// Maximum nesting of modular sub-policies.
pub const MAX_POLICY_TREE_DEPTH: usize = 8;

/// KL divergence below which a generation counts as stable.
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 1e-3;

/// Generations of stable KL required for convergence.
pub const DEFAULT_CONVERGENCE_WINDOW: usize = 5;

/// Tolerance for "sums to one" checks.
pub const PROBABILITY_EPSILON: f64 = 1e-6;

/// Floor used inside logarithms of KL divergence.
pub const KL_FLOOR: f64 = 1e-12;

/// Maximum mutants a rule may produce from one specialisation pass.
pub const MAX_MUTANTS_PER_RULE: usize = 64;

/// Random-policy episodes played to seed covering before the first slot
/// exists.
pub const EXPLORATION_EPISODES: usize = 5;

/// Episodes used to score the frozen (greedy) policy after training.
pub const GREEDY_EVALUATION_EPISODES: usize = 20;
