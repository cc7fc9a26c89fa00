//! The environment interface episodes are run against.

use crate::covering::generalizer::ValidActions;
use crate::error::LearnResult;
use crate::logic::predicate::{FactSet, RelationalPredicate};

/// What the agent sees at one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub facts: FactSet,
    pub valid_actions: ValidActions,
}

impl Observation {
    pub fn has_valid_action(&self) -> bool {
        self.valid_actions.values().any(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub terminal: bool,
}

pub trait Environment: Send {
    /// Reset to an initial state.
    fn start(&mut self) -> Observation;

    /// Apply a ground action. Invalid actions are an error.
    fn step(&mut self, action: &RelationalPredicate) -> LearnResult<StepResult>;

    /// Ground actions applicable in the current state.
    fn valid_actions(&self) -> ValidActions;
}
