//! Environment-variable configuration shared by the binaries.
//!
//! Reads `RAYON_NUM_THREADS` for the worker pool and the `RELPOLICY_*`
//! overrides applied on top of a [`LearnerConfig`].

use std::str::FromStr;

use crate::config::LearnerConfig;

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Read `RAYON_NUM_THREADS` (fallback `OMP_NUM_THREADS`, default 8) and build
/// the rayon global pool. Tolerates an already-initialised pool. Returns the
/// thread count.
pub fn init_rayon_threads() -> usize {
    let num_threads = env_parse::<usize>("RAYON_NUM_THREADS")
        .or_else(|| env_parse("OMP_NUM_THREADS"))
        .unwrap_or(8)
        .max(1);
    if rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .is_err()
    {
        tracing::debug!("rayon global pool already initialised");
    }
    tracing::info!(threads = num_threads, "rayon pool");
    num_threads
}

/// Apply `RELPOLICY_SEED`, `RELPOLICY_STEP_SIZE`, `RELPOLICY_SELECTION_RATIO`
/// and `RELPOLICY_GENERATIONS` when set and parseable.
pub fn apply_env_overrides(mut config: LearnerConfig) -> LearnerConfig {
    if let Some(seed) = env_parse("RELPOLICY_SEED") {
        config.seed = seed;
    }
    if let Some(step) = env_parse("RELPOLICY_STEP_SIZE") {
        config.step_size = step;
    }
    if let Some(ratio) = env_parse("RELPOLICY_SELECTION_RATIO") {
        config.selection_ratio = ratio;
    }
    if let Some(generations) = env_parse("RELPOLICY_GENERATIONS") {
        config.generations = generations;
    }
    config.sanitised()
}
