//! Cross-entropy update of the policy distribution.
//!
//! Each generation the best `ceil(population * selection_ratio)` evaluated
//! policies (ties at the cutoff included, retained elites of earlier
//! generations competing with the new batch) pull the distribution towards
//! their empirical frequencies:
//!
//! - slot weight: `p' = step * used_fraction + (1 - step) * p`
//! - rule probability within a slot used by the elites:
//!   `p' = step * (count / uses) + (1 - step) * p`
//!
//! followed by renormalisation. Rules that stay negligible for
//! `pruning_iterations` consecutive updates are pruned; slots left with too
//! few viable rules are reported for regeneration.

use std::collections::HashMap;

use crate::config::LearnerConfig;
use crate::distribution::policy::{Policy, PolicyDistribution};
use crate::distribution::probability::kl_divergence;
use crate::logic::rule::{RuleArena, RuleId};

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedPolicy {
    pub policy: Policy,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub elites: usize,
    pub kl_divergence: f64,
    pub pruned: Vec<RuleId>,
    /// Slots whose viable rules dropped to the regeneration minimum.
    pub regenerate: Vec<usize>,
}

/// Top `ceil(population * ratio)` of `candidates` by value, plus every
/// candidate tied with the last one kept.
pub fn select_elites_from(
    candidates: &[EvaluatedPolicy],
    population: usize,
    selection_ratio: f64,
) -> Vec<EvaluatedPolicy> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let k = ((population as f64 * selection_ratio).ceil() as usize).clamp(1, candidates.len());
    let mut sorted: Vec<&EvaluatedPolicy> = candidates.iter().collect();
    sorted.sort_by(|a, b| b.value.total_cmp(&a.value));
    let cutoff = sorted[k - 1].value;
    sorted
        .into_iter()
        .take_while(|p| p.value >= cutoff)
        .cloned()
        .collect()
}

pub fn select_elites(samples: &[EvaluatedPolicy], selection_ratio: f64) -> Vec<EvaluatedPolicy> {
    select_elites_from(samples, samples.len(), selection_ratio)
}

#[derive(Debug, Clone)]
pub struct CrossEntropyUpdater {
    negligible_fraction: f64,
    pruning_iterations: u32,
    regeneration_min_rules: usize,
    min_population: usize,
    population_constant: f64,
    elites: Vec<EvaluatedPolicy>,
    kl_history: Vec<f64>,
    negligible_streaks: HashMap<RuleId, u32>,
}

impl CrossEntropyUpdater {
    pub fn new(config: &LearnerConfig) -> Self {
        Self {
            negligible_fraction: config.negligible_fraction,
            pruning_iterations: config.pruning_iterations,
            regeneration_min_rules: config.regeneration_min_rules,
            min_population: config.min_population,
            population_constant: config.population_constant,
            elites: Vec::new(),
            kl_history: Vec::new(),
            negligible_streaks: HashMap::new(),
        }
    }

    /// Elites retained from the last update.
    pub fn elites(&self) -> &[EvaluatedPolicy] {
        &self.elites
    }

    pub fn kl_history(&self) -> &[f64] {
        &self.kl_history
    }

    /// The last `window` updates all moved the distribution by less than
    /// `threshold` (KL divergence).
    pub fn converged(&self, window: usize, threshold: f64) -> bool {
        window > 0
            && self.kl_history.len() >= window
            && self.kl_history[self.kl_history.len() - window..]
                .iter()
                .all(|&kl| kl < threshold)
    }

    /// `max(min_population, ceil(constant * Σ viable rules per slot))`.
    pub fn population_size(&self, dist: &PolicyDistribution) -> usize {
        let viable: usize = dist
            .slots()
            .iter()
            .map(|s| s.viable_rules(self.negligible_fraction))
            .sum();
        self.min_population
            .max((self.population_constant * viable as f64).ceil() as usize)
    }

    /// One generation: record rule statistics, merge the batch with the
    /// retained elites, select, and apply the update.
    pub fn update(
        &mut self,
        dist: &mut PolicyDistribution,
        arena: &mut RuleArena,
        sampled: &[EvaluatedPolicy],
        step_size: f64,
        selection_ratio: f64,
    ) -> UpdateReport {
        for sample in sampled {
            for &id in &sample.policy.fired {
                arena.get_mut(id).statistics.record(sample.value);
            }
        }

        let mut candidates: Vec<EvaluatedPolicy> = self
            .elites
            .iter()
            .filter(|e| e.policy.rules().all(|id| arena.is_active(id)))
            .cloned()
            .collect();
        candidates.extend_from_slice(sampled);
        let elites = select_elites_from(&candidates, sampled.len(), selection_ratio);
        let report = self.apply_elites(dist, arena, &elites, step_size);
        self.elites = elites;
        report
    }

    /// Pull `dist` towards `elites`. A no-op when there are none.
    pub fn apply_elites(
        &mut self,
        dist: &mut PolicyDistribution,
        arena: &mut RuleArena,
        elites: &[EvaluatedPolicy],
        step_size: f64,
    ) -> UpdateReport {
        if elites.is_empty() || dist.is_empty() {
            return UpdateReport::default();
        }
        let before = dist.probability_vector();
        let n_elites = elites.len() as f64;

        let slot_targets: Vec<f64> = dist
            .slot_weights()
            .elements()
            .iter()
            .map(|&slot| {
                let used = elites
                    .iter()
                    .filter(|e| matches!(e.policy.choice_for(slot), Some(Some(_))))
                    .count();
                used as f64 / n_elites
            })
            .collect();
        dist.slot_weights_mut().update_towards(&slot_targets, step_size);

        for index in 0..dist.len() {
            let choices: Vec<_> = elites
                .iter()
                .filter_map(|e| e.policy.choice_for(index))
                .collect();
            if choices.is_empty() {
                continue;
            }
            let uses = choices.len() as f64;
            let distribution = dist.slot_mut(index).distribution_mut();
            let targets: Vec<f64> = distribution
                .elements()
                .iter()
                .map(|choice| choices.iter().filter(|c| *c == choice).count() as f64 / uses)
                .collect();
            distribution.update_towards(&targets, step_size);
        }

        let kl = kl_divergence(&dist.probability_vector(), &before);
        self.kl_history.push(kl);

        let pruned = self.prune(dist, arena);
        let regenerate = (0..dist.len())
            .filter(|&i| dist.slot(i).viable_rules(self.negligible_fraction) <= self.regeneration_min_rules)
            .collect();

        tracing::debug!(elites = elites.len(), kl, pruned = pruned.len(), "cross-entropy update");
        UpdateReport {
            elites: elites.len(),
            kl_divergence: kl,
            pruned,
            regenerate,
        }
    }

    fn prune(&mut self, dist: &mut PolicyDistribution, arena: &mut RuleArena) -> Vec<RuleId> {
        let mut pruned = Vec::new();
        for index in 0..dist.len() {
            let slot = dist.slot(index);
            let threshold = slot.negligible_threshold(self.negligible_fraction);
            let ids: Vec<(RuleId, f64)> = slot.rule_ids().map(|id| (id, slot.probability(id))).collect();
            for (id, p) in ids {
                if p >= threshold {
                    self.negligible_streaks.remove(&id);
                    continue;
                }
                let streak = self.negligible_streaks.entry(id).or_insert(0);
                *streak += 1;
                if *streak < self.pruning_iterations {
                    continue;
                }
                self.negligible_streaks.remove(&id);
                if dist.slot_mut(index).remove_rule(id) {
                    arena.retire(id);
                    tracing::debug!(rule = %arena.get(id), "pruned rule");
                    pruned.push(id);
                }
            }
        }
        // Rules discarded outside the update leave no streak behind.
        self.negligible_streaks
            .retain(|&id, _| dist.slot_of(id).is_some());
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::policy::PolicyEntry;
    use crate::distribution::slot::Slot;

    fn evaluated(choices: &[(usize, Option<RuleId>)], value: f64) -> EvaluatedPolicy {
        EvaluatedPolicy {
            policy: Policy::from_entries(
                choices
                    .iter()
                    .map(|&(slot, choice)| PolicyEntry { slot, choice })
                    .collect(),
            ),
            value,
        }
    }

    #[test]
    fn test_ties_at_cutoff_included() {
        let samples: Vec<EvaluatedPolicy> = [5.0, 3.0, 3.0, 3.0, 1.0]
            .iter()
            .map(|&v| evaluated(&[], v))
            .collect();
        let elites = select_elites(&samples, 0.4);
        assert_eq!(elites.len(), 4);
        assert_eq!(elites[0].value, 5.0);
        assert!(select_elites(&[], 0.5).is_empty());
    }

    #[test]
    fn test_zero_elites_is_noop() {
        let mut arena = RuleArena::new();
        let (id, _) = arena.insert("clear(?A) => move(?A,?B)".parse().unwrap());
        let mut dist = PolicyDistribution::new();
        dist.add_slot(Slot::new("move(?A,?B)".parse().unwrap(), id, 0.0));
        let before = dist.probability_vector();
        let mut updater = CrossEntropyUpdater::new(&LearnerConfig::default());
        let report = updater.apply_elites(&mut dist, &mut arena, &[], 0.5);
        assert_eq!(report, UpdateReport::default());
        assert_eq!(dist.probability_vector(), before);
        assert!(updater.kl_history().is_empty());
    }

    #[test]
    fn test_pruning_after_consecutive_negligible_updates() {
        let mut arena = RuleArena::new();
        let (a, _) = arena.insert("clear(?A) => move(?A,?B)".parse().unwrap());
        let (b, _) = arena.insert("clear(?B) => move(?A,?B)".parse().unwrap());
        let mut slot = Slot::new("move(?A,?B)".parse().unwrap(), a, 0.0);
        slot.add_mutants(a, &[b]);
        let mut dist = PolicyDistribution::new();
        dist.add_slot(slot);
        let config = LearnerConfig {
            pruning_iterations: 2,
            ..LearnerConfig::default()
        };
        let mut updater = CrossEntropyUpdater::new(&config);
        let elites = vec![evaluated(&[(0, Some(a))], 1.0)];

        // b: 0.5 -> 0.1 -> 0.02 -> 0.004; negligible below 0.1 * 1/2.
        let r1 = updater.apply_elites(&mut dist, &mut arena, &elites, 0.8);
        assert!(r1.pruned.is_empty());
        let r2 = updater.apply_elites(&mut dist, &mut arena, &elites, 0.8);
        assert!(r2.pruned.is_empty());
        let r3 = updater.apply_elites(&mut dist, &mut arena, &elites, 0.8);
        assert_eq!(r3.pruned, vec![b]);
        assert!(!arena.is_active(b));
        assert!(!dist.slot(0).contains(b));
        assert!(dist.is_normalised());
        assert_eq!(r3.regenerate, vec![0]);
    }

    fn two_rule_slot() -> (PolicyDistribution, RuleArena, RuleId, RuleId) {
        let mut arena = RuleArena::new();
        let (a, _) = arena.insert("clear(?A) => move(?A,?B)".parse().unwrap());
        let (b, _) = arena.insert("clear(?B) => move(?A,?B)".parse().unwrap());
        let mut slot = Slot::new("move(?A,?B)".parse().unwrap(), a, 0.0);
        slot.add_mutants(a, &[b]);
        let mut dist = PolicyDistribution::new();
        dist.add_slot(slot);
        (dist, arena, a, b)
    }

    #[test]
    fn test_update_records_fired_rule_statistics() {
        let (mut dist, mut arena, a, b) = two_rule_slot();
        let mut first = evaluated(&[(0, Some(a))], -4.0);
        first.policy.fired.insert(a);
        let mut second = evaluated(&[(0, Some(a))], -2.0);
        second.policy.fired.insert(a);
        let unfired = evaluated(&[(0, Some(b))], -9.0);

        let mut updater = CrossEntropyUpdater::new(&LearnerConfig::default());
        updater.update(&mut dist, &mut arena, &[first, second, unfired], 0.5, 0.5);

        let stats = &arena.get(a).statistics;
        assert_eq!(stats.count(), 2);
        assert!((stats.mean() + 3.0).abs() < 1e-12);
        assert!((stats.variance() - 2.0).abs() < 1e-12);
        assert_eq!(arena.get(b).statistics.count(), 0);
    }

    #[test]
    fn test_retained_elites_compete_with_new_batch() {
        let (mut dist, mut arena, a, b) = two_rule_slot();
        let mut updater = CrossEntropyUpdater::new(&LearnerConfig::default());

        let batch = [evaluated(&[(0, Some(a))], 10.0), evaluated(&[(0, Some(b))], 0.0)];
        updater.update(&mut dist, &mut arena, &batch, 0.5, 0.5);
        assert_eq!(updater.elites().len(), 1);

        // The earlier best outranks every new sample.
        let weaker = [evaluated(&[(0, Some(b))], 1.0), evaluated(&[(0, Some(b))], 1.0)];
        updater.update(&mut dist, &mut arena, &weaker, 0.5, 0.5);
        assert_eq!(updater.elites().len(), 1);
        assert_eq!(updater.elites()[0].value, 10.0);
        assert_eq!(updater.elites()[0].policy.choice_for(0), Some(Some(a)));

        // Once its rule is gone the retained elite no longer competes.
        arena.retire(a);
        let next = [evaluated(&[(0, Some(b))], 2.0), evaluated(&[(0, Some(b))], 1.0)];
        updater.update(&mut dist, &mut arena, &next, 0.5, 0.5);
        assert_eq!(updater.elites().len(), 1);
        assert_eq!(updater.elites()[0].value, 2.0);
    }

    #[test]
    fn test_streaks_dropped_with_their_rules() {
        let (mut dist, mut arena, a, b) = two_rule_slot();
        let mut updater = CrossEntropyUpdater::new(&LearnerConfig::default());
        let elites = vec![evaluated(&[(0, Some(a))], 1.0)];

        // b: 0.5 -> 0.025, below 0.1 / 2.
        updater.apply_elites(&mut dist, &mut arena, &elites, 0.95);
        assert_eq!(updater.negligible_streaks.get(&b), Some(&1));

        dist.slot_mut(0).reseed(a);
        arena.discard(b);
        updater.apply_elites(&mut dist, &mut arena, &elites, 0.95);
        assert!(updater.negligible_streaks.is_empty());
    }

    #[test]
    fn test_converged_window() {
        let mut updater = CrossEntropyUpdater::new(&LearnerConfig::default());
        assert!(!updater.converged(2, 0.1));
        updater.kl_history = vec![0.5, 0.01, 0.02];
        assert!(updater.converged(2, 0.1));
        assert!(!updater.converged(3, 0.1));
    }
}
