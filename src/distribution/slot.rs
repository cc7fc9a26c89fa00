//! Slots: one per action, a distribution over the rule variants producing it.

use rand::Rng;

use crate::distribution::probability::ProbabilityDistribution;
use crate::logic::predicate::RelationalPredicate;
use crate::logic::rule::RuleId;

/// A slot entry: a rule, or `None` for the explicit absent choice.
pub type SlotChoice = Option<RuleId>;

#[derive(Debug, Clone)]
pub struct Slot {
    action: RelationalPredicate,
    /// Rule the slot was created from (the covered rule of its action).
    seed: Option<RuleId>,
    rules: ProbabilityDistribution<SlotChoice>,
}

impl Slot {
    /// New slot holding `seed` plus an absent entry with `absent_probability`.
    pub fn new(action: RelationalPredicate, seed: RuleId, absent_probability: f64) -> Self {
        let absent = absent_probability.clamp(0.0, 1.0);
        let mut rules = ProbabilityDistribution::new();
        rules.set(Some(seed), 1.0 - absent);
        rules.set(None, absent);
        rules.normalise();
        Self {
            action,
            seed: Some(seed),
            rules,
        }
    }

    /// Slot built from stored entries (checkpoints).
    pub fn from_entries(
        action: RelationalPredicate,
        entries: impl IntoIterator<Item = (SlotChoice, f64)>,
    ) -> Self {
        let mut rules = ProbabilityDistribution::new();
        for (choice, p) in entries {
            rules.set(choice, p);
        }
        if !rules.contains(&None) {
            rules.set(None, 0.0);
        }
        rules.normalise();
        let seed = rules.elements().iter().flatten().next().copied();
        Self {
            action,
            seed,
            rules,
        }
    }

    pub fn action(&self) -> &RelationalPredicate {
        &self.action
    }

    pub fn action_name(&self) -> &str {
        &self.action.name
    }

    pub fn seed(&self) -> Option<RuleId> {
        self.seed
    }

    pub fn distribution(&self) -> &ProbabilityDistribution<SlotChoice> {
        &self.rules
    }

    pub(crate) fn distribution_mut(&mut self) -> &mut ProbabilityDistribution<SlotChoice> {
        &mut self.rules
    }

    /// Rule ids in the slot, absent entry excluded.
    pub fn rule_ids(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.rules.elements().iter().flatten().copied()
    }

    pub fn rule_count(&self) -> usize {
        self.rule_ids().count()
    }

    pub fn contains(&self, id: RuleId) -> bool {
        self.rules.contains(&Some(id))
    }

    pub fn probability(&self, id: RuleId) -> f64 {
        self.rules.probability(&Some(id))
    }

    pub fn absent_probability(&self) -> f64 {
        self.rules.probability(&None)
    }

    /// Probability under which a rule counts as negligible.
    pub fn negligible_threshold(&self, fraction: f64) -> f64 {
        match self.rule_count() {
            0 => 0.0,
            n => fraction / n as f64,
        }
    }

    /// Rules at or above the negligible threshold.
    pub fn viable_rules(&self, fraction: f64) -> usize {
        let threshold = self.negligible_threshold(fraction);
        self.rules
            .iter()
            .filter(|(choice, p)| choice.is_some() && *p >= threshold)
            .count()
    }

    /// Most probable rule, ignoring the absent entry.
    pub fn best_rule(&self) -> Option<RuleId> {
        self.rules
            .iter()
            .filter_map(|(choice, p)| choice.map(|id| (id, p)))
            .fold(None, |best: Option<(RuleId, f64)>, (id, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((id, p)),
            })
            .map(|(id, _)| id)
    }

    /// Categorical draw; argmax when `frozen`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, frozen: bool) -> SlotChoice {
        let choice = if frozen {
            self.rules.argmax()
        } else {
            self.rules.sample(rng)
        };
        choice.copied().flatten()
    }

    /// Split `parent`'s mass evenly between it and its new mutants.
    pub fn add_mutants(&mut self, parent: RuleId, mutants: &[RuleId]) {
        let fresh: Vec<RuleId> = mutants
            .iter()
            .copied()
            .filter(|m| !self.contains(*m))
            .collect();
        if fresh.is_empty() {
            return;
        }
        let parent_prob = self.probability(parent);
        let share = if self.contains(parent) {
            parent_prob / (fresh.len() + 1) as f64
        } else {
            0.0
        };
        if self.contains(parent) {
            self.rules.set(Some(parent), share);
        }
        for m in fresh {
            self.rules.set(Some(m), share);
        }
        self.rules.normalise();
    }

    /// Remove a rule. The last rule of a slot is never removed.
    pub fn remove_rule(&mut self, id: RuleId) -> bool {
        if self.rule_count() <= 1 || !self.contains(id) {
            return false;
        }
        self.rules.remove(&Some(id));
        if self.seed == Some(id) {
            self.seed = None;
        }
        true
    }

    /// Replace the distribution with a fresh one around `seed`, keeping the
    /// absent mass.
    pub fn reseed(&mut self, seed: RuleId) {
        let absent = self.absent_probability();
        *self = Slot::new(self.action.clone(), seed, absent);
    }
}
