//! Episode engine: runs sampled policies against a domain's environment.
//!
//! A policy acts through its first firing rule. When no rule fires the agent
//! takes a uniformly random valid action, so every episode still produces
//! observations for covering. Population evaluation samples and plays every
//! policy in parallel; worker `i` draws from `SmallRng::seed_from_u64(seed + i)`
//! so a generation is reproducible for a fixed seed and thread count.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::covering::generalizer::ValidActions;
use crate::distribution::policy::{Policy, PolicyDistribution};
use crate::distribution::updater::EvaluatedPolicy;
use crate::error::LearnResult;
use crate::logic::domain::{Domain, DomainContext};
use crate::logic::predicate::{FactSet, RelationalPredicate};
use crate::logic::query::FactQuery;
use crate::logic::rule::{RuleArena, RuleId};
use crate::simulation::environment::Environment;

/// One step of an episode as the agent saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub facts: FactSet,
    pub valid_actions: ValidActions,
    pub action: RelationalPredicate,
    /// `None` when no rule fired and the action was random.
    pub rule: Option<RuleId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeTrace {
    pub value: f64,
    pub steps: usize,
    pub fired: BTreeSet<RuleId>,
    pub goal_reached: bool,
    /// The goal-achieving action and the state it was taken in.
    pub goal_step: Option<(RelationalPredicate, FactSet)>,
    /// Empty unless recording was requested.
    pub transitions: Vec<Transition>,
}

/// A sampled policy with its mean episode value and the episodes played.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub evaluated: EvaluatedPolicy,
    pub traces: Vec<EpisodeTrace>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationParams {
    pub population: usize,
    pub episodes_per_policy: usize,
    pub max_steps: usize,
    pub seed: u64,
    pub record: bool,
}

/// Summary of a population evaluation.
#[derive(Debug, Clone)]
pub struct PopulationResult {
    pub evaluations: Vec<Evaluation>,
    pub mean: f64,
    pub best: f64,
    pub elapsed: Duration,
}

impl PopulationResult {
    pub fn evaluated(&self) -> Vec<EvaluatedPolicy> {
        self.evaluations.iter().map(|e| e.evaluated.clone()).collect()
    }
}

/// Play one episode of at most `max_steps` steps.
#[allow(clippy::too_many_arguments)]
pub fn run_episode<R: Rng + ?Sized>(
    policy: &Policy,
    arena: &RuleArena,
    matcher: &dyn FactQuery,
    env: &mut dyn Environment,
    goal_terms: &[String],
    max_steps: usize,
    record: bool,
    rng: &mut R,
) -> LearnResult<EpisodeTrace> {
    let mut trace = EpisodeTrace::default();
    let mut observation = env.start();

    while trace.steps < max_steps && observation.has_valid_action() {
        let (rule, action) = match policy.choose_action(
            arena,
            matcher,
            &observation.facts,
            &observation.valid_actions,
            goal_terms,
            rng,
        ) {
            Some((id, action)) => (Some(id), action),
            None => match random_action(&observation.valid_actions, rng) {
                Some(action) => (None, action),
                None => break,
            },
        };
        if let Some(id) = rule {
            trace.fired.insert(id);
        }

        let result = env.step(&action)?;
        trace.value += result.reward;
        trace.steps += 1;

        if result.terminal {
            trace.goal_reached = true;
            trace.goal_step = Some((action.clone(), observation.facts.clone()));
        }
        if record {
            trace.transitions.push(Transition {
                facts: std::mem::take(&mut observation.facts),
                valid_actions: std::mem::take(&mut observation.valid_actions),
                action,
                rule,
            });
        }
        if result.terminal {
            break;
        }
        observation = result.observation;
    }
    Ok(trace)
}

fn random_action<R: Rng + ?Sized>(valid: &ValidActions, rng: &mut R) -> Option<RelationalPredicate> {
    let all: Vec<&RelationalPredicate> = valid.values().flatten().collect();
    all.choose(rng).map(|a| (*a).clone())
}

/// Play `episodes` episodes of `policy`; its value is the mean episode value
/// and its fired set the union over episodes.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_policy<R: Rng + ?Sized>(
    mut policy: Policy,
    arena: &RuleArena,
    domain: &dyn Domain,
    context: &DomainContext,
    matcher: &dyn FactQuery,
    episodes: usize,
    max_steps: usize,
    record: bool,
    rng: &mut R,
) -> LearnResult<Evaluation> {
    let episodes = episodes.max(1);
    let mut traces = Vec::with_capacity(episodes);
    for _ in 0..episodes {
        let mut env = domain.environment(rng.random());
        let trace = run_episode(
            &policy,
            arena,
            matcher,
            env.as_mut(),
            &context.goal_terms,
            max_steps,
            record,
            rng,
        )?;
        traces.push(trace);
    }
    let value = traces.iter().map(|t| t.value).sum::<f64>() / episodes as f64;
    for trace in &traces {
        policy.fired.extend(trace.fired.iter().copied());
    }
    Ok(Evaluation {
        evaluated: EvaluatedPolicy { policy, value },
        traces,
    })
}

/// Sample `params.population` policies from `dist` and evaluate them in
/// parallel.
pub fn evaluate_population(
    dist: &PolicyDistribution,
    arena: &RuleArena,
    domain: &dyn Domain,
    context: &DomainContext,
    matcher: &dyn FactQuery,
    params: EvaluationParams,
) -> LearnResult<PopulationResult> {
    let start = Instant::now();

    let evaluations: Vec<Evaluation> = (0..params.population)
        .into_par_iter()
        .map(|i| {
            let mut rng = SmallRng::seed_from_u64(params.seed.wrapping_add(i as u64));
            let policy = dist.sample_policy(&mut rng);
            evaluate_policy(
                policy,
                arena,
                domain,
                context,
                matcher,
                params.episodes_per_policy,
                params.max_steps,
                params.record,
                &mut rng,
            )
        })
        .collect::<LearnResult<_>>()?;

    let n = evaluations.len().max(1) as f64;
    let mean = evaluations.iter().map(|e| e.evaluated.value).sum::<f64>() / n;
    let best = evaluations
        .iter()
        .map(|e| e.evaluated.value)
        .fold(f64::NEG_INFINITY, f64::max);

    Ok(PopulationResult {
        evaluations,
        mean,
        best,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::policy::PolicyEntry;
    use crate::distribution::slot::Slot;
    use crate::logic::query::BacktrackingMatcher;
    use crate::simulation::blocks_world::BlocksWorld;

    fn blocks() -> (BlocksWorld, DomainContext) {
        let domain = BlocksWorld::new(3);
        let context = domain.context();
        (domain, context)
    }

    #[test]
    fn test_random_episode_records_every_step() {
        let (domain, context) = blocks();
        let arena = RuleArena::new();
        let mut env = domain.environment(7);
        let mut rng = SmallRng::seed_from_u64(7);
        let trace = run_episode(
            &Policy::default(),
            &arena,
            &BacktrackingMatcher::default(),
            env.as_mut(),
            &context.goal_terms,
            30,
            true,
            &mut rng,
        )
        .unwrap();
        assert!(trace.steps <= 30);
        assert_eq!(trace.transitions.len(), trace.steps);
        assert_eq!(trace.value, -(trace.steps as f64));
        assert!(trace.fired.is_empty());
        assert_eq!(trace.goal_reached, trace.goal_step.is_some());
    }

    #[test]
    fn test_goal_rule_solves_in_few_steps() {
        let (domain, context) = blocks();
        let mut arena = RuleArena::new();
        let (unstack_a, _) = arena.insert("above(?A,?G_0) AND clear(?A) => move_floor(?A)".parse().unwrap());
        let (unstack_b, _) = arena.insert("above(?A,?G_1) AND clear(?A) => move_floor(?A)".parse().unwrap());
        let (stack, _) = arena.insert("clear(?G_0) AND clear(?G_1) => move(?G_0,?G_1)".parse().unwrap());
        let policy = Policy::from_entries(
            [stack, unstack_a, unstack_b]
                .iter()
                .enumerate()
                .map(|(slot, &id)| PolicyEntry { slot, choice: Some(id) })
                .collect(),
        );
        let mut rng = SmallRng::seed_from_u64(1);
        let eval = evaluate_policy(
            policy,
            &arena,
            &domain,
            &context,
            &BacktrackingMatcher::default(),
            5,
            50,
            false,
            &mut rng,
        )
        .unwrap();
        assert_eq!(eval.traces.len(), 5);
        for trace in &eval.traces {
            assert!(trace.goal_reached);
            assert!(trace.steps <= 3);
            let (action, _) = trace.goal_step.as_ref().unwrap();
            assert_eq!(action.to_string(), "move(a,b)");
        }
        assert!(eval.evaluated.policy.fired.contains(&stack));
        assert!(eval.evaluated.value >= -3.0);
    }

    #[test]
    fn test_population_is_reproducible() {
        let (domain, context) = blocks();
        let mut arena = RuleArena::new();
        let (id, _) = arena.insert("clear(?A) AND clear(?B) => move(?A,?B)".parse().unwrap());
        let mut dist = PolicyDistribution::new();
        dist.add_slot(Slot::new("move(?A,?B)".parse().unwrap(), id, 0.0));
        let params = EvaluationParams {
            population: 8,
            episodes_per_policy: 2,
            max_steps: 20,
            seed: 99,
            record: false,
        };
        let matcher = BacktrackingMatcher::default();
        let a = evaluate_population(&dist, &arena, &domain, &context, &matcher, params).unwrap();
        let b = evaluate_population(&dist, &arena, &domain, &context, &matcher, params).unwrap();
        assert_eq!(a.evaluations.len(), 8);
        let values = |r: &PopulationResult| r.evaluations.iter().map(|e| e.evaluated.value).collect::<Vec<_>>();
        assert_eq!(values(&a), values(&b));
        assert!(a.best >= a.mean);
    }
}
