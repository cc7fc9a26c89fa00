//! Single-step rule mutations.
//!
//! Two sources of mutants: the settled pre-goal of the rule's action (plus
//! numeric range splits), and the domain's library of specialisation
//! conditions for the action. Every mutant is a strict specialisation of its
//! parent and is deduplicated against its siblings and the arena.

use std::collections::{BTreeMap, BTreeSet};

use crate::constants::MAX_MUTANTS_PER_RULE;
use crate::covering::pregoal::{PreGoalInformation, PreGoalTracker};
use crate::logic::domain::DomainContext;
use crate::logic::predicate::RelationalPredicate;
use crate::logic::rule::{RelationalRule, RuleArena, RuleId};
use crate::logic::term::{NumericRange, RelationalArgument};
use crate::logic::unify::{implies, set_implies};

type Conditions = BTreeSet<RelationalPredicate>;

/// Add `fact` to `conditions`, dropping conditions it makes redundant.
/// `None` when the result would not be a strict specialisation.
fn add_condition(conditions: &Conditions, fact: RelationalPredicate) -> Option<Conditions> {
    if set_implies(conditions, &fact) || conditions.contains(&fact.negate()) {
        return None;
    }
    let mut out: Conditions = conditions
        .iter()
        .filter(|c| !implies(&fact, c))
        .cloned()
        .collect();
    out.insert(fact);
    Some(out)
}

fn replace_arg(
    conditions: &Conditions,
    condition: &RelationalPredicate,
    position: usize,
    arg: RelationalArgument,
) -> Conditions {
    let mut replaced = condition.clone();
    replaced.args[position] = arg;
    let mut out = conditions.clone();
    out.remove(condition);
    out.insert(replaced);
    out
}

/// Maps the pre-goal's action variables onto the rule's action terms and
/// anonymises objects that are not protected constants.
fn translate(
    fact: &RelationalPredicate,
    pregoal: &PreGoalInformation,
    rule: &RelationalRule,
    context: &DomainContext,
) -> RelationalPredicate {
    let map: BTreeMap<RelationalArgument, RelationalArgument> = pregoal
        .action_terms
        .iter()
        .cloned()
        .zip(rule.action_terms().iter().cloned())
        .collect();
    let mut out = fact.substitute(&map);
    for arg in &mut out.args {
        if let RelationalArgument::Constant(c) = arg {
            if !context.spec.constants.contains(c) {
                *arg = RelationalArgument::Anonymous;
            }
        }
    }
    out
}

/// Fractional windows a range condition is split into.
fn range_windows(
    range: &NumericRange,
    pregoal_range: Option<&NumericRange>,
    is_mutant: bool,
) -> Vec<(f64, f64)> {
    let (fmin, fmax) = (range.frac_min, range.frac_max);
    let span = fmax - fmin;
    if range.width() <= 0.0 || span <= 0.0 {
        return Vec::new();
    }
    let mid = fmin + span / 2.0;
    let mut windows = vec![
        (fmin, mid),
        (mid, fmax),
        (fmin + span / 4.0, fmax - span / 4.0),
    ];
    if !is_mutant {
        let (lo, hi) = range.effective_bounds();
        if lo < 0.0 && hi > 0.0 {
            let zero = -range.min / range.width();
            windows.push((fmin, zero));
            windows.push((zero, fmax));
        }
        if let Some(sub) = pregoal_range {
            let (slo, shi) = sub.effective_bounds();
            if (slo, shi) != (lo, hi) && slo >= lo && shi <= hi {
                let w = range.width();
                windows.push(((slo - range.min) / w, (shi - range.min) / w));
            }
        }
    }
    windows
}

/// One mutant per settled pre-goal fact not already implied by the rule,
/// plus splits of every numeric range condition.
pub fn specialize_toward_pregoal(
    rule: &RelationalRule,
    pregoal: Option<&PreGoalInformation>,
    context: &DomainContext,
) -> Vec<Conditions> {
    let conditions = rule.conditions();
    let mut mutants: BTreeSet<Conditions> = BTreeSet::new();
    let translated: Vec<RelationalPredicate> = pregoal
        .map(|pg| {
            pg.facts
                .iter()
                .map(|f| translate(f, pg, rule, context))
                .filter(|f| !f.is_fully_anonymous())
                .collect()
        })
        .unwrap_or_default();

    for fact in &translated {
        if let Some(mutant) = add_condition(conditions, fact.clone()) {
            mutants.insert(mutant);
        }
    }

    for condition in conditions {
        for (position, arg) in condition.args.iter().enumerate() {
            let Some(range) = arg.as_range() else {
                continue;
            };
            let pregoal_range = translated
                .iter()
                .filter(|f| f.same_signature(condition))
                .filter_map(|f| f.args.get(position).and_then(RelationalArgument::as_range))
                .find(|r| r.context == range.context);
            for (lo, hi) in range_windows(range, pregoal_range, rule.is_mutant()) {
                if lo >= hi {
                    continue;
                }
                let narrowed = RelationalArgument::NumericRange(range.with_fraction(lo, hi));
                if &narrowed == arg {
                    continue;
                }
                mutants.insert(replace_arg(conditions, condition, position, narrowed));
            }
        }
    }

    mutants.remove(conditions);
    mutants.into_iter().collect()
}

/// A positive candidate is type-consistent when, for every term it
/// mentions, its declared argument type shares a lineage with each type
/// predicate already asserted on that term.
fn type_consistent(
    conditions: &Conditions,
    candidate: &RelationalPredicate,
    context: &DomainContext,
) -> bool {
    if candidate.negated {
        return true;
    }
    let spec = &context.spec;
    candidate.args.iter().enumerate().all(|(position, term)| {
        let Some(declared) = spec.arg_type(&candidate.name, position).or_else(|| {
            spec.is_type_predicate(candidate)
                .then_some(candidate.name.as_str())
        }) else {
            return true;
        };
        conditions
            .iter()
            .filter(|c| !c.negated && spec.is_type_predicate(c) && c.args[0] == *term)
            .all(|c| spec.types.on_same_lineage(declared, &c.name))
    })
}

/// Every specialisation condition of the action, in both polarities, bound
/// to the rule's action terms.
pub fn specialize_with_action_conditions(
    rule: &RelationalRule,
    context: &DomainContext,
) -> Vec<Conditions> {
    let conditions = rule.conditions();
    let map: BTreeMap<RelationalArgument, RelationalArgument> = rule
        .action_terms()
        .iter()
        .enumerate()
        .map(|(i, t)| (RelationalArgument::ActionVariable(i), t.clone()))
        .collect();
    let mut mutants: BTreeSet<Conditions> = BTreeSet::new();

    for template in context.spec.specialisation_conditions(rule.action_name()) {
        let bound = template.substitute(&map);
        for candidate in [bound.clone(), bound.negate()] {
            if !type_consistent(conditions, &candidate, context) {
                continue;
            }
            if let Some(mutant) = add_condition(conditions, candidate) {
                mutants.insert(mutant);
            }
        }
    }
    mutants.remove(conditions);
    mutants.into_iter().collect()
}

/// Generate and register the mutants of `parent`. Marks the parent as
/// mutated and returns the ids of mutants new to the arena.
pub fn specialise(
    arena: &mut RuleArena,
    parent: RuleId,
    tracker: &PreGoalTracker,
    context: &DomainContext,
) -> Vec<RuleId> {
    let rule = arena.get(parent).clone();
    let pregoal = tracker.settled(rule.action_name());
    let mut bodies = specialize_toward_pregoal(&rule, pregoal, context);
    bodies.extend(specialize_with_action_conditions(&rule, context));

    let mut seen = BTreeSet::new();
    let mut created = Vec::new();
    for body in bodies {
        if created.len() >= MAX_MUTANTS_PER_RULE {
            break;
        }
        if !seen.insert(body.clone()) {
            continue;
        }
        if let Some(id) = arena.insert_mutant(parent, RelationalRule::mutant_of(&rule, body)) {
            created.push(id);
        }
    }
    arena.get_mut(parent).mutated = true;
    tracing::debug!(parent = %rule, mutants = created.len(), "specialised rule");
    created
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::domain::{DomainSpec, PredicateDecl};

    fn rule(s: &str) -> RelationalRule {
        s.parse().unwrap()
    }

    fn blocks_context() -> DomainContext {
        let mut spec = DomainSpec::new("blocks");
        spec.types.add_type("thing", None);
        spec.types.add_type("block", Some("thing"));
        spec.types.add_type("floor", Some("thing"));
        spec.declare_predicate(PredicateDecl::new("block", &["block"]));
        spec.declare_predicate(PredicateDecl::new("floor", &["floor"]));
        spec.declare_predicate(PredicateDecl::new("clear", &["block"]));
        spec.declare_predicate(PredicateDecl::new("highest", &["block"]));
        spec.declare_action(PredicateDecl::new("move", &["block", "thing"]));
        for c in ["clear(?A)", "highest(?A)", "floor(?B)"] {
            spec.add_specialisation("move", c.parse().unwrap());
        }
        DomainContext::new(spec, vec![])
    }

    #[test]
    fn test_action_conditions_both_polarities() {
        let ctx = blocks_context();
        let r = rule("clear(?A) => move(?A,?B)");
        let mutants: Vec<String> = specialize_with_action_conditions(&r, &ctx)
            .into_iter()
            .map(|m| m.iter().map(ToString::to_string).collect::<Vec<_>>().join(" AND "))
            .collect();
        assert!(mutants.contains(&"clear(?A) AND highest(?A)".to_string()));
        assert!(mutants.contains(&"clear(?A) AND not highest(?A)".to_string()));
        assert!(mutants.contains(&"clear(?A) AND floor(?B)".to_string()));
        // clear(?A) is redundant and not clear(?A) contradicts the body.
        assert_eq!(mutants.len(), 4);
    }

    #[test]
    fn test_type_inconsistent_mutation_skipped() {
        let ctx = blocks_context();
        let r = rule("block(?B) AND clear(?A) => move(?A,?B)");
        let mutants = specialize_with_action_conditions(&r, &ctx);
        let floor: RelationalPredicate = "floor(?B)".parse().unwrap();
        assert!(mutants.iter().all(|m| !m.contains(&floor)));
        assert!(mutants
            .iter()
            .any(|m| m.contains(&"not floor(?B)".parse().unwrap())));
    }

    #[test]
    fn test_pregoal_mutants_strictly_specialise() {
        let ctx = blocks_context();
        let r = rule("clear(?A) AND on(?A,?) => move(?A,?B)");
        let pregoal = PreGoalInformation {
            facts: ["clear(?A)", "on(?A,?B)", "clear(d)"]
                .iter()
                .map(|f| f.parse().unwrap())
                .collect(),
            action_terms: vec![
                RelationalArgument::ActionVariable(0),
                RelationalArgument::ActionVariable(1),
            ],
            inactivity: 50,
        };
        let mutants = specialize_toward_pregoal(&r, Some(&pregoal), &ctx);
        assert_eq!(mutants.len(), 1);
        let expected: Conditions = ["clear(?A)", "on(?A,?B)"]
            .iter()
            .map(|f| f.parse().unwrap())
            .collect();
        assert_eq!(mutants[0], expected);
    }

    #[test]
    fn test_range_splits() {
        let ctx = blocks_context();
        let r = rule("dist(?A,?#[-4..4]) => move(?A,?B)");
        let mutants = specialize_toward_pregoal(&r, None, &ctx);
        let texts: BTreeSet<String> = mutants
            .iter()
            .map(|m| m.iter().next().unwrap().to_string())
            .collect();
        assert!(texts.contains("dist(?A,?#[-4..4|0..0.5])"));
        assert!(texts.contains("dist(?A,?#[-4..4|0.5..1])"));
        assert!(texts.contains("dist(?A,?#[-4..4|0.25..0.75])"));
        // The zero crossing coincides with the midpoint here.
        assert_eq!(texts.len(), 3);

        let mut mutant = r.clone();
        mutant.ancestry = 1;
        let mutants = specialize_toward_pregoal(&mutant, None, &ctx);
        assert_eq!(mutants.len(), 3);
    }

    #[test]
    fn test_specialise_registers_lineage() {
        let ctx = blocks_context();
        let mut arena = RuleArena::new();
        let (parent, _) = arena.insert(rule("clear(?A) => move(?A,?B)"));
        let tracker = PreGoalTracker::new(50);
        let created = specialise(&mut arena, parent, &tracker, &ctx);
        assert_eq!(created.len(), 4);
        assert!(arena.get(parent).mutated);
        for id in &created {
            assert_eq!(arena.get(*id).parents, vec![parent]);
            assert!(arena.get(*id).is_mutant());
        }
        assert!(specialise(&mut arena, parent, &tracker, &ctx).is_empty());
    }
}
