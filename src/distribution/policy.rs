//! Policies and the distribution that generates them.
//!
//! A [`PolicyDistribution`] is an ordered set of [`Slot`]s with a weight per
//! slot. Sampling walks the slots in a weighted random order (descending when
//! frozen), includes each with probability `min(1, n * p_slot)` and draws one
//! rule from every included slot. The resulting [`Policy`] is a decision
//! list: the first rule whose conditions hold and whose action is valid
//! fires.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use rand::seq::IndexedRandom;
use rand::Rng;

use crate::covering::generalizer::ValidActions;
use crate::distribution::probability::ProbabilityDistribution;
use crate::distribution::slot::{Slot, SlotChoice};
use crate::logic::predicate::{FactSet, RelationalPredicate};
use crate::logic::query::{match_fact, Bindings, FactQuery};
use crate::logic::rule::{RuleArena, RuleId};

// ── Policies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyEntry {
    pub slot: usize,
    pub choice: SlotChoice,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub entries: Vec<PolicyEntry>,
    /// Rules that selected at least one action while the policy was evaluated.
    pub fired: BTreeSet<RuleId>,
}

impl Policy {
    pub fn from_entries(entries: Vec<PolicyEntry>) -> Self {
        Self {
            entries,
            fired: BTreeSet::new(),
        }
    }

    /// Chosen rules in priority order.
    pub fn rules(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.entries.iter().filter_map(|e| e.choice)
    }

    /// The choice made for `slot`, if the slot was included.
    pub fn choice_for(&self, slot: usize) -> Option<SlotChoice> {
        self.entries.iter().find(|e| e.slot == slot).map(|e| e.choice)
    }

    pub fn is_empty(&self) -> bool {
        self.rules().next().is_none()
    }

    /// First firing rule and the valid action it selects.
    pub fn choose_action<R: Rng + ?Sized>(
        &self,
        arena: &RuleArena,
        matcher: &dyn FactQuery,
        facts: &FactSet,
        valid_actions: &ValidActions,
        goal_terms: &[String],
        rng: &mut R,
    ) -> Option<(RuleId, RelationalPredicate)> {
        fire_first(
            self.rules().map(|id| (id, goal_terms)),
            arena,
            matcher,
            facts,
            valid_actions,
            rng,
        )
    }

    /// One rule per line, in priority order.
    pub fn describe(&self, arena: &RuleArena) -> String {
        let mut out = String::new();
        for id in self.rules() {
            let _ = writeln!(out, "{}", arena.get(id));
        }
        out
    }
}

/// Try `rules` in order; the first one with a matching valid action fires.
/// Among the valid actions it matches, one is picked at random.
pub fn fire_first<'g, R: Rng + ?Sized>(
    rules: impl IntoIterator<Item = (RuleId, &'g [String])>,
    arena: &RuleArena,
    matcher: &dyn FactQuery,
    facts: &FactSet,
    valid_actions: &ValidActions,
    rng: &mut R,
) -> Option<(RuleId, RelationalPredicate)> {
    for (id, goal_terms) in rules {
        let rule = arena.get(id);
        let Some(candidates) = valid_actions.get(rule.action_name()) else {
            continue;
        };
        let matching: Vec<&RelationalPredicate> = candidates
            .iter()
            .filter(|action| {
                match_fact(rule.action(), action, &Bindings::new(), goal_terms).is_some_and(
                    |bound| matcher.satisfied(facts, rule.conditions(), goal_terms, &bound),
                )
            })
            .collect();
        if let Some(action) = matching.choose(rng) {
            return Some((id, (*action).clone()));
        }
    }
    None
}

// ── Policy distribution ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PolicyDistribution {
    slots: Vec<Slot>,
    weights: ProbabilityDistribution<usize>,
    frozen: bool,
}

impl PolicyDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slot with a uniform share `1 / n` of the slot mass.
    pub fn add_slot(&mut self, slot: Slot) -> usize {
        let index = self.slots.len();
        self.slots.push(slot);
        self.weights.add_scaled(index, 1.0 / self.slots.len() as f64);
        index
    }

    /// Add a slot with an explicit weight (checkpoint restore); call
    /// [`normalise`](Self::normalise) afterwards.
    pub fn add_slot_weighted(&mut self, slot: Slot, weight: f64) -> usize {
        let index = self.slots.len();
        self.slots.push(slot);
        self.weights.set(index, weight);
        index
    }

    pub fn normalise(&mut self) {
        self.weights.normalise();
        for slot in &mut self.slots {
            slot.distribution_mut().normalise();
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    pub fn slot_index(&self, action_name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.action_name() == action_name)
    }

    pub fn slot_probability(&self, index: usize) -> f64 {
        self.weights.probability(&index)
    }

    pub fn slot_weights(&self) -> &ProbabilityDistribution<usize> {
        &self.weights
    }

    pub(crate) fn slot_weights_mut(&mut self) -> &mut ProbabilityDistribution<usize> {
        &mut self.weights
    }

    pub fn freeze(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Slot weights and every slot's rule distribution sum to one.
    pub fn is_normalised(&self) -> bool {
        self.weights.is_normalised() && self.slots.iter().all(|s| s.distribution().is_normalised())
    }

    /// Which slot holds `id`.
    pub fn slot_of(&self, id: RuleId) -> Option<usize> {
        self.slots.iter().position(|s| s.contains(id))
    }

    /// Slot weights followed by each slot's rule probabilities.
    pub fn probability_vector(&self) -> Vec<f64> {
        let mut v = self.weights.probabilities().to_vec();
        for slot in &self.slots {
            v.extend_from_slice(slot.distribution().probabilities());
        }
        v
    }

    /// Sample a whole policy. Each slot contributes at most once.
    pub fn sample_policy<R: Rng + ?Sized>(&self, rng: &mut R) -> Policy {
        let n = self.slots.len() as f64;
        let order = if self.frozen {
            self.weights.descending_order()
        } else {
            self.weights.sample_order(rng)
        };
        let mut entries = Vec::with_capacity(order.len());
        for index in order {
            let inclusion = self.weights.probability(&index) * n;
            let included = if self.frozen {
                inclusion >= 0.5
            } else {
                rng.random::<f64>() < inclusion.min(1.0)
            };
            if included {
                entries.push(PolicyEntry {
                    slot: index,
                    choice: self.slots[index].sample(rng, self.frozen),
                });
            }
        }
        Policy::from_entries(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::query::BacktrackingMatcher;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn facts(fs: &[&str]) -> FactSet {
        fs.iter().map(|f| f.parse().unwrap()).collect()
    }

    #[test]
    fn test_uniform_slots_always_included() {
        let mut dist = PolicyDistribution::new();
        dist.add_slot(Slot::new("move(?A,?B)".parse().unwrap(), RuleId(0), 0.0));
        dist.add_slot(Slot::new("move_floor(?A)".parse().unwrap(), RuleId(1), 0.0));
        assert!(dist.is_normalised());
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..50 {
            let policy = dist.sample_policy(&mut rng);
            assert_eq!(policy.entries.len(), 2);
            let slots: BTreeSet<usize> = policy.entries.iter().map(|e| e.slot).collect();
            assert_eq!(slots.len(), 2);
        }
    }

    #[test]
    fn test_frozen_sampling_is_deterministic() {
        let mut dist = PolicyDistribution::new();
        dist.add_slot(Slot::new("a()".parse().unwrap(), RuleId(0), 0.0));
        dist.add_slot(Slot::new("b()".parse().unwrap(), RuleId(1), 0.0));
        dist.slot_weights_mut().set(0, 0.9);
        dist.slot_weights_mut().set(1, 0.1);
        dist.freeze(true);
        let mut rng = SmallRng::seed_from_u64(9);
        let first = dist.sample_policy(&mut rng);
        assert_eq!(first.entries, vec![PolicyEntry { slot: 0, choice: Some(RuleId(0)) }]);
        for _ in 0..10 {
            assert_eq!(dist.sample_policy(&mut rng), first);
        }
    }

    #[test]
    fn test_decision_list_priority() {
        let mut arena = RuleArena::new();
        let (specific, _) = arena.insert("on(?A,?B) AND clear(?A) => move_floor(?A)".parse().unwrap());
        let (general, _) = arena.insert("clear(?A) AND clear(?B) => move(?A,?B)".parse().unwrap());
        let policy = Policy::from_entries(vec![
            PolicyEntry { slot: 0, choice: Some(specific) },
            PolicyEntry { slot: 1, choice: Some(general) },
        ]);
        let state = facts(&["on(a,b)", "clear(a)", "clear(c)", "on(b,floor)", "on(c,floor)"]);
        let mut valid = ValidActions::new();
        valid.insert("move_floor".into(), vec!["move_floor(a)".parse().unwrap()]);
        valid.insert(
            "move".into(),
            vec!["move(a,c)".parse().unwrap(), "move(c,a)".parse().unwrap()],
        );
        let mut rng = SmallRng::seed_from_u64(2);
        let matcher = BacktrackingMatcher::default();
        let (id, action) = policy
            .choose_action(&arena, &matcher, &state, &valid, &[], &mut rng)
            .unwrap();
        assert_eq!(id, specific);
        assert_eq!(action.to_string(), "move_floor(a)");

        valid.remove("move_floor");
        let (id, _) = policy
            .choose_action(&arena, &matcher, &state, &valid, &[], &mut rng)
            .unwrap();
        assert_eq!(id, general);
    }

    #[test]
    fn test_fires_on_instances_beyond_the_result_cap() {
        let mut arena = RuleArena::new();
        let (id, _) = arena.insert("clear(?A) AND clear(?B) => move(?A,?B)".parse().unwrap());
        let policy = Policy::from_entries(vec![PolicyEntry { slot: 0, choice: Some(id) }]);
        let state = facts(&["clear(a)", "clear(b)", "clear(c)", "clear(d)"]);
        let mut valid = ValidActions::new();
        valid.insert("move".into(), vec!["move(d,c)".parse().unwrap()]);

        // One binding tuple would be returned by an unbound query, and it is
        // not the valid instance.
        let matcher = BacktrackingMatcher { max_results: 1 };
        let mut rng = SmallRng::seed_from_u64(4);
        let (fired, action) = policy
            .choose_action(&arena, &matcher, &state, &valid, &[], &mut rng)
            .unwrap();
        assert_eq!(fired, id);
        assert_eq!(action.to_string(), "move(d,c)");
    }
}
