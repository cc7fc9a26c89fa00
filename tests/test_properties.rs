//! Property-based tests for unification, the cross-entropy update and
//! checkpoint text.

use std::collections::BTreeSet;

use proptest::prelude::*;

use relpolicy::config::LearnerConfig;
use relpolicy::distribution::{
    select_elites, CrossEntropyUpdater, EvaluatedPolicy, Policy, PolicyDistribution, PolicyEntry,
    Slot,
};
use relpolicy::logic::{unify, RelationalPredicate, RuleArena, RuleId, UnificationResult};
use relpolicy::storage::{format_slot_line, parse_slot_line};

const PREDICATES: [&str; 4] = ["clear", "on", "above", "highest"];
const TERMS: [&str; 5] = ["a", "b", "c", "?A", "?B"];

/// Strategy: a fact over a small vocabulary, never fully anonymous.
fn fact_strategy() -> impl Strategy<Value = RelationalPredicate> {
    (0..PREDICATES.len(), prop::collection::vec(0..TERMS.len(), 1..=2)).prop_map(|(p, args)| {
        let text = format!(
            "{}({})",
            PREDICATES[p],
            args.iter().map(|&i| TERMS[i]).collect::<Vec<_>>().join(",")
        );
        text.parse().unwrap()
    })
}

fn fact_set_strategy() -> impl Strategy<Value = BTreeSet<RelationalPredicate>> {
    prop::collection::btree_set(fact_strategy(), 1..6)
}

/// A distribution with `rules.len()` slots; slot `s` holds `rules[s]`
/// distinct move rules.
fn distribution(rules: &[usize]) -> (PolicyDistribution, RuleArena, Vec<Vec<RuleId>>) {
    let mut arena = RuleArena::new();
    let mut dist = PolicyDistribution::new();
    let mut ids = Vec::new();
    for (s, &n) in rules.iter().enumerate() {
        let action = format!("act{s}(?A)");
        let slot_ids: Vec<RuleId> = (0..n.max(1))
            .map(|r| {
                let text = format!("p{r}(?A) => {action}");
                arena.insert(text.parse().unwrap()).0
            })
            .collect();
        let mut slot = Slot::new(action.parse().unwrap(), slot_ids[0], 0.1);
        slot.add_mutants(slot_ids[0], &slot_ids[1..]);
        dist.add_slot(slot);
        ids.push(slot_ids);
    }
    (dist, arena, ids)
}

proptest! {
    // 1. A fact set unified with itself is unchanged
    #[test]
    fn unify_with_self_is_unchanged(facts in fact_set_strategy()) {
        let result = unify(&facts, &facts);
        prop_assert_eq!(result.result, UnificationResult::Unchanged);
        prop_assert_eq!(result.facts, facts);
    }

    // 2. Updates keep every distribution normalised
    #[test]
    fn update_keeps_distribution_normalised(
        rules in prop::collection::vec(1usize..5, 1..4),
        picks in prop::collection::vec((any::<bool>(), 0usize..8, -50.0f64..0.0), 1..30),
        step in 0.05f64..1.0,
        ratio in 0.05f64..1.0,
    ) {
        let (mut dist, mut arena, ids) = distribution(&rules);
        let sampled: Vec<EvaluatedPolicy> = picks
            .iter()
            .map(|&(absent, pick, value)| {
                let entries = ids
                    .iter()
                    .enumerate()
                    .map(|(slot, slot_ids)| PolicyEntry {
                        slot,
                        choice: if absent { None } else { Some(slot_ids[pick % slot_ids.len()]) },
                    })
                    .collect();
                EvaluatedPolicy { policy: Policy::from_entries(entries), value }
            })
            .collect();
        let mut updater = CrossEntropyUpdater::new(&LearnerConfig::default());
        for _ in 0..3 {
            updater.update(&mut dist, &mut arena, &sampled, step, ratio);
            prop_assert!(dist.is_normalised());
        }
        prop_assert!(updater.kl_history().iter().all(|kl| *kl >= 0.0));
    }

    // 3. Every policy in the top-k by value is an elite
    #[test]
    fn top_k_are_elites(
        values in prop::collection::vec(-20i32..0, 1..40),
        ratio in 0.01f64..1.0,
    ) {
        let samples: Vec<EvaluatedPolicy> = values
            .iter()
            .map(|&v| EvaluatedPolicy { policy: Policy::default(), value: v as f64 })
            .collect();
        let elites = select_elites(&samples, ratio);

        let mut sorted: Vec<f64> = samples.iter().map(|s| s.value).collect();
        sorted.sort_by(|a, b| b.total_cmp(a));
        let k = ((samples.len() as f64 * ratio).ceil() as usize).clamp(1, samples.len());
        let cutoff = sorted[k - 1];
        prop_assert!(elites.len() >= k);
        prop_assert_eq!(elites.len(), sorted.iter().filter(|&&v| v >= cutoff).count());
        prop_assert!(elites.iter().all(|e| e.value >= cutoff));
    }

    // 4. Population size never shrinks when a slot is added
    #[test]
    fn population_non_decreasing_in_slots(rules in prop::collection::vec(1usize..6, 1..8)) {
        let updater = CrossEntropyUpdater::new(&LearnerConfig {
            min_population: 5,
            population_constant: 3.0,
            ..LearnerConfig::default()
        });
        let mut previous = 0;
        for n in 1..=rules.len() {
            let (dist, _, _) = distribution(&rules[..n]);
            let size = updater.population_size(&dist);
            prop_assert!(size >= previous);
            prop_assert!(size >= 5);
            previous = size;
        }
    }

    // 5. Slot lines survive a text round trip
    #[test]
    fn slot_line_round_trip(rules in 1usize..6, step in 0.0f64..1.0, pick in 0usize..6) {
        let (mut dist, mut arena, ids) = distribution(&[rules]);
        let elite = EvaluatedPolicy {
            policy: Policy::from_entries(vec![PolicyEntry { slot: 0, choice: Some(ids[0][pick % rules]) }]),
            value: 0.0,
        };
        CrossEntropyUpdater::new(&LearnerConfig::default()).apply_elites(&mut dist, &mut arena, &[elite], step);

        let checkpoint = relpolicy::storage::GeneratorCheckpoint::capture(&dist, &arena);
        let line = format_slot_line(&checkpoint.slots[0]);
        let parsed = parse_slot_line(&line).unwrap();
        prop_assert_eq!(&parsed, &checkpoint.slots[0]);
        prop_assert_eq!(format_slot_line(&parsed), line);
    }
}
