//! Environments, episode simulation and the training loop.
//!
//! - [`environment`]: the interface episodes run against
//! - [`blocks_world`]: the built-in Blocks World domain
//! - [`engine`]: episodes and parallel population evaluation
//! - [`training`]: the [`Learner`] that ties covering, specialisation and
//!   cross-entropy updates together

pub mod blocks_world;
pub mod engine;
pub mod environment;
pub mod training;

pub use blocks_world::{BlocksEnvironment, BlocksWorld};
pub use engine::{
    evaluate_policy, evaluate_population, run_episode, EpisodeTrace, Evaluation, EvaluationParams,
    PopulationResult, Transition,
};
pub use environment::{Environment, Observation, StepResult};
pub use training::{GenerationReport, Learner, RuleSummary, SlotSummary, TrainingSummary};
