//! Pre-goal tracking: the generalised facts observed when each action fires
//! on the way to the goal.
//!
//! Per action name the tracker keeps the LGG of every observation, expressed
//! over the action's variables (`?A, ?B, ...`) and the goal variables; other
//! objects stay constants until unification anonymises them. A pre-goal is
//! settled after `settle_threshold` consecutive unchanged observations.

use std::collections::{BTreeMap, BTreeSet};

use crate::covering::generalizer::canonical_action;
use crate::error::{LearnError, LearnResult};
use crate::logic::domain::DomainContext;
use crate::logic::predicate::{FactSet, RelationalPredicate};
use crate::logic::term::RelationalArgument;
use crate::logic::unify::{unify, InverseSubstitution, UnificationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreGoalState {
    /// Consecutive unchanged observations so far.
    Unsettled(u32),
    Settled,
}

#[derive(Debug, Clone)]
pub struct PreGoalInformation {
    pub facts: BTreeSet<RelationalPredicate>,
    /// Variable terms of the action the facts are expressed over.
    pub action_terms: Vec<RelationalArgument>,
    pub inactivity: u32,
}

#[derive(Debug, Clone)]
pub struct PreGoalTracker {
    pregoals: BTreeMap<String, PreGoalInformation>,
    settle_threshold: u32,
}

fn render(facts: &BTreeSet<RelationalPredicate>) -> String {
    facts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl PreGoalTracker {
    pub fn new(settle_threshold: u32) -> Self {
        Self {
            pregoals: BTreeMap::new(),
            settle_threshold,
        }
    }

    pub fn pregoal(&self, action: &str) -> Option<&PreGoalInformation> {
        self.pregoals.get(action)
    }

    pub fn state(&self, action: &str) -> PreGoalState {
        match self.pregoals.get(action) {
            Some(info) if info.inactivity >= self.settle_threshold => PreGoalState::Settled,
            Some(info) => PreGoalState::Unsettled(info.inactivity),
            None => PreGoalState::Unsettled(0),
        }
    }

    pub fn is_settled(&self, action: &str) -> bool {
        self.state(action) == PreGoalState::Settled
    }

    /// Settled pre-goal for `action`, if any.
    pub fn settled(&self, action: &str) -> Option<&PreGoalInformation> {
        self.pregoals
            .get(action)
            .filter(|info| info.inactivity >= self.settle_threshold)
    }

    /// Fold one observation of `action` firing into its pre-goal.
    ///
    /// `facts` is the state in which `action` was taken (the state just
    /// before the goal was reached), so the pre-goal can be added to rules
    /// as conditions.
    ///
    /// The first observation counts as one. `Changed` resets the inactivity
    /// counter, `Unchanged` increments it.
    /// A `Failed` unification means the stored pre-goal and the observation
    /// share nothing and is reported as [`LearnError::PreGoalDisjoint`].
    pub fn observe(
        &mut self,
        context: &DomainContext,
        action: &RelationalPredicate,
        facts: &FactSet,
    ) -> LearnResult<UnificationResult> {
        let spec = &context.spec;
        let substitution =
            InverseSubstitution::new(&action.args, &context.goal_terms, &spec.constants, false);
        let observed: BTreeSet<RelationalPredicate> = facts
            .iter()
            .filter(|f| !spec.is_useless_fact(f))
            .map(|f| substitution.apply(f))
            .filter(|f| !spec.is_useless_fact(f))
            .collect();

        let Some(info) = self.pregoals.get_mut(&action.name) else {
            tracing::debug!(action = %action.name, facts = observed.len(), "first pre-goal observation");
            self.pregoals.insert(
                action.name.clone(),
                PreGoalInformation {
                    facts: observed,
                    action_terms: canonical_action(action).args,
                    inactivity: 1,
                },
            );
            return Ok(UnificationResult::Changed);
        };

        let unification = unify(&info.facts, &observed);
        match unification.result {
            UnificationResult::Unchanged => {
                info.inactivity += 1;
                if info.inactivity == self.settle_threshold {
                    tracing::info!(action = %action.name, pregoal = %render(&info.facts), "pre-goal settled");
                }
            }
            UnificationResult::Changed => {
                info.facts = unification.facts;
                info.inactivity = 0;
            }
            UnificationResult::Failed => {
                return Err(LearnError::PreGoalDisjoint {
                    action: action.name.clone(),
                    existing: render(&info.facts),
                    observed: render(&observed),
                });
            }
        }
        Ok(unification.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::domain::DomainSpec;

    fn facts(fs: &[&str]) -> FactSet {
        fs.iter().map(|f| f.parse().unwrap()).collect()
    }

    fn context() -> DomainContext {
        DomainContext::new(DomainSpec::new("d"), vec![])
    }

    #[test]
    fn test_settles_after_threshold() {
        let ctx = context();
        let mut tracker = PreGoalTracker::new(3);
        let action: RelationalPredicate = "move(a,b)".parse().unwrap();
        let state = facts(&["clear(a)", "clear(b)", "on(a,c)"]);
        assert_eq!(tracker.observe(&ctx, &action, &state).unwrap(), UnificationResult::Changed);
        for n in 1..3 {
            assert_eq!(tracker.state("move"), PreGoalState::Unsettled(n));
            tracker.observe(&ctx, &action, &state).unwrap();
        }
        assert!(tracker.is_settled("move"));
        let info = tracker.settled("move").unwrap();
        assert!(info.facts.contains(&"on(?A,c)".parse().unwrap()));
    }

    #[test]
    fn test_disjoint_observation_is_fatal() {
        let ctx = context();
        let mut tracker = PreGoalTracker::new(50);
        let action: RelationalPredicate = "move(a,b)".parse().unwrap();
        tracker.observe(&ctx, &action, &facts(&["clear(a)"])).unwrap();
        let err = tracker
            .observe(&ctx, &action, &facts(&["on(a,b)"]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("move"));
        assert!(message.contains("clear(?A)"));
        assert!(message.contains("on(?A,?B)"));
    }

    #[test]
    fn test_useless_facts_stripped() {
        let ctx = context();
        let mut tracker = PreGoalTracker::new(50);
        let action: RelationalPredicate = "move(a,b)".parse().unwrap();
        tracker
            .observe(&ctx, &action, &facts(&["clear(a)", "test()", "valid_actions(a,b)"]))
            .unwrap();
        assert_eq!(tracker.pregoal("move").unwrap().facts, facts(&["clear(?A)"]));
    }
}
