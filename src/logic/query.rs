//! Conjunctive queries over ground facts.
//!
//! The learner only depends on the [`FactQuery`] trait. [`BacktrackingMatcher`]
//! is a small reference implementation (depth-first join, negation as
//! failure) good enough for test domains; production domains can plug in a
//! Rete-style engine behind the same trait.

use std::collections::{BTreeMap, BTreeSet};

use crate::logic::predicate::{FactSet, RelationalPredicate};
use crate::logic::term::RelationalArgument;

/// Variable → ground term.
pub type Bindings = BTreeMap<RelationalArgument, RelationalArgument>;

pub trait FactQuery: Send + Sync {
    /// All binding tuples of the named variables in `conditions` that satisfy
    /// every condition against `facts`. Empty when there are none.
    fn query(
        &self,
        facts: &FactSet,
        conditions: &BTreeSet<RelationalPredicate>,
        goal_terms: &[String],
    ) -> Vec<Bindings>;

    /// Whether `conditions` hold with `bindings` already fixed (typically the
    /// action variables of one valid action instance).
    fn satisfied(
        &self,
        facts: &FactSet,
        conditions: &BTreeSet<RelationalPredicate>,
        goal_terms: &[String],
        bindings: &Bindings,
    ) -> bool {
        let bound: BTreeSet<RelationalPredicate> =
            conditions.iter().map(|c| c.substitute(bindings)).collect();
        !self.query(facts, &bound, goal_terms).is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BacktrackingMatcher {
    /// Stop after this many distinct binding tuples.
    pub max_results: usize,
}

impl Default for BacktrackingMatcher {
    fn default() -> Self {
        Self { max_results: 256 }
    }
}

/// Try to extend `bindings` so that `pattern` matches the ground `fact`.
pub fn match_fact(
    pattern: &RelationalPredicate,
    fact: &RelationalPredicate,
    bindings: &Bindings,
    goal_terms: &[String],
) -> Option<Bindings> {
    if pattern.name != fact.name || pattern.arity() != fact.arity() {
        return None;
    }
    let mut out = bindings.clone();
    for (p, g) in pattern.args.iter().zip(&fact.args) {
        match p {
            RelationalArgument::Anonymous | RelationalArgument::UnboundVariable(_) => {}
            RelationalArgument::Constant(_) | RelationalArgument::NumericConstant(_) => {
                if p != g {
                    return None;
                }
            }
            RelationalArgument::GoalVariable(i) => {
                let goal = goal_terms.get(*i)?;
                if !matches!(g, RelationalArgument::Constant(c) if c == goal) {
                    return None;
                }
            }
            RelationalArgument::NumericRange(range) => match g {
                RelationalArgument::NumericConstant(v) if range.contains(*v) => {}
                _ => return None,
            },
            RelationalArgument::ActionVariable(_) | RelationalArgument::BoundVariable(_) => {
                match out.get(p) {
                    Some(bound) if bound != g => return None,
                    Some(_) => {}
                    None => {
                        out.insert(p.clone(), g.clone());
                    }
                }
            }
        }
    }
    Some(out)
}

impl BacktrackingMatcher {
    fn solve(
        &self,
        by_name: &BTreeMap<&str, Vec<&RelationalPredicate>>,
        positives: &[&RelationalPredicate],
        negatives: &[&RelationalPredicate],
        bindings: Bindings,
        goal_terms: &[String],
        limit: usize,
        results: &mut BTreeSet<Bindings>,
    ) {
        if results.len() >= limit {
            return;
        }
        let Some((first, rest)) = positives.split_first() else {
            let blocked = negatives.iter().any(|neg| {
                by_name
                    .get(neg.name.as_str())
                    .into_iter()
                    .flatten()
                    .any(|fact| match_fact(neg, fact, &bindings, goal_terms).is_some())
            });
            if !blocked {
                results.insert(bindings);
            }
            return;
        };
        let Some(candidates) = by_name.get(first.name.as_str()) else {
            return;
        };
        for fact in candidates {
            if let Some(extended) = match_fact(first, fact, &bindings, goal_terms) {
                self.solve(by_name, rest, negatives, extended, goal_terms, limit, results);
            }
        }
    }

    fn run(
        &self,
        facts: &FactSet,
        conditions: &BTreeSet<RelationalPredicate>,
        goal_terms: &[String],
        bindings: Bindings,
        limit: usize,
    ) -> BTreeSet<Bindings> {
        let mut by_name: BTreeMap<&str, Vec<&RelationalPredicate>> = BTreeMap::new();
        for fact in facts {
            by_name.entry(fact.name.as_str()).or_default().push(fact);
        }
        let (negatives, positives): (Vec<&RelationalPredicate>, Vec<&RelationalPredicate>) =
            conditions.iter().partition(|c| c.negated);
        let mut results = BTreeSet::new();
        self.solve(
            &by_name,
            &positives,
            &negatives,
            bindings,
            goal_terms,
            limit,
            &mut results,
        );
        results
    }
}

impl FactQuery for BacktrackingMatcher {
    fn query(
        &self,
        facts: &FactSet,
        conditions: &BTreeSet<RelationalPredicate>,
        goal_terms: &[String],
    ) -> Vec<Bindings> {
        let results = self.run(facts, conditions, goal_terms, Bindings::new(), self.max_results);
        if results.len() >= self.max_results {
            tracing::debug!(
                limit = self.max_results,
                conditions = conditions.len(),
                "query truncated"
            );
        }
        results.into_iter().collect()
    }

    fn satisfied(
        &self,
        facts: &FactSet,
        conditions: &BTreeSet<RelationalPredicate>,
        goal_terms: &[String],
        bindings: &Bindings,
    ) -> bool {
        !self
            .run(facts, conditions, goal_terms, bindings.clone(), 1)
            .is_empty()
    }
}
