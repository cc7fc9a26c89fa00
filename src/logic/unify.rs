//! Least-general generalisation of fact sets.
//!
//! [`unify`] is the single primitive behind covering (merging a candidate
//! rule's body with a freshly observed instance) and pre-goal tracking
//! (merging post-action states). For every fact of the existing set it picks
//! the same-signature fact of the new set whose term-by-term merge anonymises
//! the fewest positions, then keeps the merged fact unless it became fully
//! anonymous.

use std::collections::{BTreeMap, BTreeSet};

use crate::logic::predicate::RelationalPredicate;
use crate::logic::term::{NumericRange, RangeContext, RelationalArgument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnificationResult {
    /// The merged set equals the existing set.
    Unchanged,
    /// At least one fact was generalised or dropped.
    Changed,
    /// Nothing survived.
    Failed,
}

#[derive(Debug, Clone)]
pub struct Unification {
    pub result: UnificationResult,
    pub facts: BTreeSet<RelationalPredicate>,
}

/// Merge two terms at the same argument position.
///
/// Returns the merged term and whether it is a newly anonymised position
/// (the old term was not already a wildcard).
pub fn unify_terms(
    old: &RelationalArgument,
    new: &RelationalArgument,
    context: &RangeContext,
) -> (RelationalArgument, bool) {
    if old == new || old.is_wildcard() {
        return (old.clone(), false);
    }
    let merged = match (old, new) {
        (RelationalArgument::NumericRange(a), RelationalArgument::NumericRange(b))
            if a.context == b.context =>
        {
            if b.within(a) {
                RelationalArgument::NumericRange(a.clone())
            } else {
                RelationalArgument::NumericRange(a.union(b))
            }
        }
        (RelationalArgument::NumericRange(a), RelationalArgument::NumericConstant(v)) => {
            if a.contains(*v) {
                RelationalArgument::NumericRange(a.clone())
            } else {
                RelationalArgument::NumericRange(a.extended(*v))
            }
        }
        (RelationalArgument::NumericConstant(v), RelationalArgument::NumericRange(b)) => {
            RelationalArgument::NumericRange(b.extended(*v))
        }
        (RelationalArgument::NumericConstant(a), RelationalArgument::NumericConstant(b)) => {
            RelationalArgument::NumericRange(NumericRange::new(*a, *b, context.clone()))
        }
        _ => RelationalArgument::Anonymous,
    };
    let anonymised = merged.is_anonymous();
    (merged, anonymised)
}

/// Merge two same-signature facts.
///
/// The ranking key is `(anonymous positions, newly anonymous positions,
/// differs from old)`; lower is more specific.
fn unify_facts(
    old: &RelationalPredicate,
    new: &RelationalPredicate,
) -> (RelationalPredicate, (usize, usize, bool)) {
    let mut args = Vec::with_capacity(old.arity());
    let mut anonymous = 0usize;
    let mut fresh = 0usize;
    for (position, (o, n)) in old.args.iter().zip(&new.args).enumerate() {
        let context = RangeContext::new(old.name.clone(), position);
        let (merged, newly) = unify_terms(o, n, &context);
        if merged.is_anonymous() {
            anonymous += 1;
        }
        if newly {
            fresh += 1;
        }
        args.push(merged);
    }
    let fact = RelationalPredicate {
        name: old.name.clone(),
        args,
        negated: old.negated,
    };
    let differs = &fact != old;
    (fact, (anonymous, fresh, differs))
}

/// Generalise `old` against `new`.
///
/// Facts of `old` without a same-signature partner in `new` are dropped, as
/// are facts that end up fully anonymous. `Failed` means `old` was non-empty
/// and nothing survived.
pub fn unify(
    old: &BTreeSet<RelationalPredicate>,
    new: &BTreeSet<RelationalPredicate>,
) -> Unification {
    let mut by_signature: BTreeMap<(&str, bool, usize), Vec<&RelationalPredicate>> =
        BTreeMap::new();
    for fact in new {
        by_signature
            .entry((fact.name.as_str(), fact.negated, fact.arity()))
            .or_default()
            .push(fact);
    }

    let mut facts = BTreeSet::new();
    for fact in old {
        let Some(candidates) = by_signature.get(&(fact.name.as_str(), fact.negated, fact.arity()))
        else {
            continue;
        };
        let best = candidates
            .iter()
            .map(|candidate| unify_facts(fact, candidate))
            .min_by_key(|(_, rank)| *rank);
        if let Some((merged, _)) = best {
            if !merged.is_fully_anonymous() {
                facts.insert(merged);
            }
        }
    }

    let result = if facts.is_empty() && !old.is_empty() {
        UnificationResult::Failed
    } else if &facts == old {
        UnificationResult::Unchanged
    } else {
        UnificationResult::Changed
    };
    Unification { result, facts }
}

/// True when `specific` holds wherever it is asserted that `general` holds:
/// same signature, and every position of `general` is a wildcard, equal, or a
/// range covering the specific value.
pub fn implies(specific: &RelationalPredicate, general: &RelationalPredicate) -> bool {
    if !specific.same_signature(general) {
        return false;
    }
    specific.args.iter().zip(&general.args).all(|(s, g)| {
        if g.is_wildcard() || s == g {
            return true;
        }
        match (s, g) {
            (RelationalArgument::NumericRange(sr), RelationalArgument::NumericRange(gr)) => {
                sr.within(gr)
            }
            (RelationalArgument::NumericConstant(v), RelationalArgument::NumericRange(gr)) => {
                gr.contains(*v)
            }
            _ => false,
        }
    })
}

/// Some condition already implies `fact`.
pub fn set_implies(conditions: &BTreeSet<RelationalPredicate>, fact: &RelationalPredicate) -> bool {
    conditions.iter().any(|c| implies(c, fact))
}

/// Replaces the ground terms of an observation with rule-level terms.
///
/// Action terms become `?A, ?B, ...` by position; goal terms become
/// `?G_n`; protected domain constants and numbers are kept. Any other object
/// is anonymised when `anonymise_objects` is set (covering) and kept as a
/// constant otherwise (pre-goal tracking).
#[derive(Debug, Clone)]
pub struct InverseSubstitution {
    map: BTreeMap<RelationalArgument, RelationalArgument>,
    constants: BTreeSet<String>,
    anonymise_objects: bool,
}

impl InverseSubstitution {
    pub fn new(
        action_terms: &[RelationalArgument],
        goal_terms: &[String],
        constants: &BTreeSet<String>,
        anonymise_objects: bool,
    ) -> Self {
        let mut map = BTreeMap::new();
        for (i, term) in action_terms.iter().enumerate() {
            map.entry(term.clone())
                .or_insert(RelationalArgument::ActionVariable(i));
        }
        for (i, goal) in goal_terms.iter().enumerate() {
            map.entry(RelationalArgument::constant(goal.as_str()))
                .or_insert(RelationalArgument::GoalVariable(i));
        }
        Self {
            map,
            constants: constants.clone(),
            anonymise_objects,
        }
    }

    pub fn term(&self, term: &RelationalArgument) -> RelationalArgument {
        if let Some(mapped) = self.map.get(term) {
            return mapped.clone();
        }
        match term {
            RelationalArgument::Constant(c) if self.constants.contains(c) => term.clone(),
            RelationalArgument::Constant(_) if self.anonymise_objects => RelationalArgument::Anonymous,
            _ => term.clone(),
        }
    }

    pub fn apply(&self, fact: &RelationalPredicate) -> RelationalPredicate {
        RelationalPredicate {
            name: fact.name.clone(),
            args: fact.args.iter().map(|a| self.term(a)).collect(),
            negated: fact.negated,
        }
    }
}
