//! Covering: maximally general rules from observed state-action instances.
//!
//! For every valid action instance the relevant state facts are rewritten in
//! terms of the action's variables, then unified into the existing candidate
//! rules of that action. A candidate that survives
//! `settle_threshold` consecutive observations without change is stable and
//! is no longer refined.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::logic::domain::DomainContext;
use crate::logic::predicate::{FactSet, RelationalPredicate, TermIndex};
use crate::logic::rule::{RelationalRule, RuleArena, RuleId};
use crate::logic::term::RelationalArgument;
use crate::logic::unify::{unify, InverseSubstitution, UnificationResult};

/// Ground action instances grouped by action name.
pub type ValidActions = BTreeMap<String, Vec<RelationalPredicate>>;

/// What one covering pass did to the rule population.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoverOutcome {
    pub created: Vec<RuleId>,
    pub refined: Vec<RuleId>,
}

impl CoverOutcome {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.refined.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Generalizer {
    rules: BTreeMap<String, Vec<RuleId>>,
    settle_threshold: u32,
}

impl Generalizer {
    pub fn new(settle_threshold: u32) -> Self {
        Self {
            rules: BTreeMap::new(),
            settle_threshold,
        }
    }

    /// Covered rules per action name.
    pub fn rules_by_action(&self) -> &BTreeMap<String, Vec<RuleId>> {
        &self.rules
    }

    pub fn rules_for(&self, action: &str) -> &[RuleId] {
        self.rules.get(action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Track a rule that was not produced by covering (restored from a
    /// checkpoint). It starts out stable.
    pub fn adopt(&mut self, arena: &mut RuleArena, id: RuleId) {
        let action = arena.get(id).action_name().to_string();
        let ids = self.rules.entry(action).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        let rule = arena.get_mut(id);
        rule.states_seen = rule.states_seen.max(self.settle_threshold);
    }

    pub fn is_settled(&self, arena: &RuleArena, id: RuleId) -> bool {
        arena.get(id).states_seen >= self.settle_threshold
    }

    /// Every covered rule is stable.
    pub fn all_settled(&self, arena: &RuleArena) -> bool {
        self.rules
            .values()
            .flatten()
            .all(|&id| self.is_settled(arena, id))
    }

    /// Cover one observed state.
    ///
    /// Each action instance yields a candidate body which refines every
    /// non-stable rule of its action. A new rule is created only when the
    /// action has no rule yet or `create_new` is set (then from the first
    /// instance of each action). A rule's settle counter advances once per
    /// state it survives unchanged and resets when the state refines it.
    pub fn cover<R: Rng + ?Sized>(
        &mut self,
        arena: &mut RuleArena,
        context: &DomainContext,
        state: &FactSet,
        valid_actions: &ValidActions,
        create_new: bool,
        rng: &mut R,
    ) -> CoverOutcome {
        let index = TermIndex::build(state);
        let mut outcome = CoverOutcome::default();

        for (action_name, instances) in valid_actions {
            if instances.is_empty() {
                continue;
            }
            let existing = self.rules_for(action_name);
            if !create_new
                && !existing.is_empty()
                && existing.iter().all(|&id| self.is_settled(arena, id))
            {
                continue;
            }

            let settled_before: BTreeSet<RuleId> = existing
                .iter()
                .copied()
                .filter(|&id| self.is_settled(arena, id))
                .collect();
            let mut need_new = create_new || existing.is_empty();
            let mut created = None;
            let mut changed = BTreeSet::new();
            for instance in diversity_order(instances, rng) {
                let candidate = candidate_conditions(&index, context, instance);
                if need_new {
                    need_new = false;
                    let rule = RelationalRule::new(candidate, canonical_action(instance));
                    let (id, fresh) = arena.insert(rule);
                    if fresh {
                        tracing::debug!(rule = %arena.get(id), "covered new rule");
                        self.rules.entry(action_name.clone()).or_default().push(id);
                        outcome.created.push(id);
                        created = Some(id);
                    }
                    continue;
                }
                self.refine_all(arena, action_name, &candidate, &mut changed);
            }

            // One state counts once towards settling, however many instances.
            for &id in self.rules_for(action_name) {
                if settled_before.contains(&id) || created == Some(id) || !arena.is_active(id) {
                    continue;
                }
                if changed.contains(&id) {
                    arena.get_mut(id).states_seen = 0;
                    outcome.refined.push(id);
                } else {
                    arena.get_mut(id).states_seen += 1;
                }
            }
        }
        outcome
    }

    fn refine_all(
        &self,
        arena: &mut RuleArena,
        action_name: &str,
        candidate: &BTreeSet<RelationalPredicate>,
        changed: &mut BTreeSet<RuleId>,
    ) {
        for &id in self.rules_for(action_name) {
            if self.is_settled(arena, id) || !arena.is_active(id) {
                continue;
            }
            let unification = unify(arena.get(id).conditions(), candidate);
            match unification.result {
                UnificationResult::Unchanged => {}
                UnificationResult::Changed => {
                    if arena.refine(id, unification.facts) {
                        changed.insert(id);
                    } else {
                        tracing::debug!(rule = %arena.get(id), "refinement collides with an existing rule");
                    }
                }
                UnificationResult::Failed => {
                    tracing::debug!(rule = %arena.get(id), "candidate discarded");
                }
            }
        }
    }
}

/// `name(?A, ?B, ...)` with the instance's arity.
pub fn canonical_action(instance: &RelationalPredicate) -> RelationalPredicate {
    RelationalPredicate::new(
        instance.name.clone(),
        (0..instance.arity())
            .map(RelationalArgument::ActionVariable)
            .collect(),
    )
}

/// Body of the candidate rule for one action instance.
pub fn candidate_conditions(
    index: &TermIndex<'_>,
    context: &DomainContext,
    instance: &RelationalPredicate,
) -> BTreeSet<RelationalPredicate> {
    let spec = &context.spec;
    let substitution =
        InverseSubstitution::new(&instance.args, &context.goal_terms, &spec.constants, true);
    let mut conditions: BTreeSet<RelationalPredicate> = index
        .relevant_facts(&instance.args)
        .into_iter()
        .filter(|f| !spec.is_useless_fact(f))
        .map(|f| substitution.apply(f))
        .filter(|f| !f.is_fully_anonymous())
        .collect();

    // An action term that is a protected constant is typed by a fact named
    // after the constant.
    for (i, term) in instance.args.iter().enumerate() {
        if let RelationalArgument::Constant(c) = term {
            if spec.constants.contains(c) {
                conditions.insert(RelationalPredicate::new(
                    c.clone(),
                    vec![RelationalArgument::ActionVariable(i)],
                ));
            }
        }
    }
    conditions
}

/// Greedy ordering maximising unseen terms per argument position; once no
/// remaining instance adds a new term the rest follow in random order.
pub fn diversity_order<'a, R: Rng + ?Sized>(
    instances: &'a [RelationalPredicate],
    rng: &mut R,
) -> Vec<&'a RelationalPredicate> {
    let mut remaining: Vec<&'a RelationalPredicate> = instances.iter().collect();
    let mut seen: Vec<BTreeSet<&'a RelationalArgument>> = Vec::new();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let best = remaining
            .iter()
            .enumerate()
            .map(|(i, inst)| (novelty(inst, &seen), i))
            .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        match best {
            Some((n, i)) if n > 0 => {
                let inst = remaining.remove(i);
                for (pos, arg) in inst.args.iter().enumerate() {
                    if seen.len() <= pos {
                        seen.push(BTreeSet::new());
                    }
                    seen[pos].insert(arg);
                }
                ordered.push(inst);
            }
            _ => {
                remaining.shuffle(rng);
                ordered.append(&mut remaining);
            }
        }
    }
    ordered
}

fn novelty<'a>(instance: &RelationalPredicate, seen: &[BTreeSet<&'a RelationalArgument>]) -> usize {
    instance
        .args
        .iter()
        .enumerate()
        .filter(|(pos, arg)| seen.get(*pos).map_or(true, |s| !s.iter().any(|t| *t == *arg)))
        .count()
}
