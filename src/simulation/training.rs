//! The learning loop.
//!
//! Each generation:
//!
//! 1. Slots with too few viable rules get mutants of their best unmutated
//!    rule.
//! 2. A population of policies is sampled from the (unfrozen) distribution
//!    and evaluated in parallel.
//! 3. The cross-entropy update reshapes the distribution; slots it reports as
//!    exhausted are regenerated.
//! 4. Every recorded state is covered, creating slots for newly seen
//!    actions, and every goal-reaching step feeds the pre-goal tracker.
//!
//! Training stops after the configured number of generations or once the KL
//! divergence has stayed below the threshold for the configured window. The
//! frozen distribution then yields the greedy policy.

use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::LearnerConfig;
use crate::constants::{EXPLORATION_EPISODES, GREEDY_EVALUATION_EPISODES};
use crate::covering::generalizer::Generalizer;
use crate::covering::pregoal::PreGoalTracker;
use crate::covering::specializer::specialise;
use crate::distribution::policy::{Policy, PolicyDistribution};
use crate::distribution::slot::Slot;
use crate::distribution::updater::CrossEntropyUpdater;
use crate::error::LearnResult;
use crate::logic::domain::{Domain, DomainContext};
use crate::logic::query::BacktrackingMatcher;
use crate::logic::rule::{RuleArena, RuleId};
use crate::logic::unify::UnificationResult;
use crate::simulation::engine::{
    evaluate_policy, evaluate_population, run_episode, EpisodeTrace, EvaluationParams,
};
use crate::storage::GeneratorCheckpoint;

/// Per-generation statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation: usize,
    pub population: usize,
    pub mean_value: f64,
    pub best_value: f64,
    pub goal_rate: f64,
    pub elites: usize,
    pub kl_divergence: f64,
    pub slots: usize,
    pub active_rules: usize,
    pub pruned: usize,
    pub mutants: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub rule: String,
    pub probability: f64,
    pub fired: u64,
    pub mean_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSummary {
    pub action: String,
    pub probability: f64,
    pub absent_probability: f64,
    pub rules: Vec<RuleSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub domain: String,
    pub seed: u64,
    pub generations: usize,
    pub converged: bool,
    pub best_value: f64,
    pub greedy_value: f64,
    pub greedy_policy: Vec<String>,
    pub total_rules: usize,
    pub active_rules: usize,
    pub elapsed_secs: f64,
    pub slots: Vec<SlotSummary>,
    pub history: Vec<GenerationReport>,
}

pub struct Learner {
    config: LearnerConfig,
    domain: Box<dyn Domain>,
    context: DomainContext,
    matcher: BacktrackingMatcher,
    arena: RuleArena,
    generalizer: Generalizer,
    tracker: PreGoalTracker,
    distribution: PolicyDistribution,
    updater: CrossEntropyUpdater,
    rng: SmallRng,
    history: Vec<GenerationReport>,
}

impl Learner {
    pub fn new(domain: Box<dyn Domain>, config: LearnerConfig) -> Self {
        let config = config.sanitised();
        let context = domain.context();
        Self {
            generalizer: Generalizer::new(config.covering_settle_threshold),
            tracker: PreGoalTracker::new(config.pregoal_settle_threshold),
            updater: CrossEntropyUpdater::new(&config),
            rng: SmallRng::seed_from_u64(config.seed),
            matcher: BacktrackingMatcher::default(),
            arena: RuleArena::new(),
            distribution: PolicyDistribution::new(),
            history: Vec::new(),
            context,
            domain,
            config,
        }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    pub fn context(&self) -> &DomainContext {
        &self.context
    }

    pub fn arena(&self) -> &RuleArena {
        &self.arena
    }

    pub fn distribution(&self) -> &PolicyDistribution {
        &self.distribution
    }

    pub fn generalizer(&self) -> &Generalizer {
        &self.generalizer
    }

    pub fn tracker(&self) -> &PreGoalTracker {
        &self.tracker
    }

    pub fn updater(&self) -> &CrossEntropyUpdater {
        &self.updater
    }

    pub fn history(&self) -> &[GenerationReport] {
        &self.history
    }

    pub fn checkpoint(&self) -> GeneratorCheckpoint {
        GeneratorCheckpoint::capture(&self.distribution, &self.arena)
    }

    /// Replace the distribution with a stored one. The first rule of every
    /// restored slot stands in as the stable covered rule of its action.
    pub fn restore(&mut self, checkpoint: &GeneratorCheckpoint) {
        self.distribution = checkpoint.restore(&mut self.arena);
        for slot in self.distribution.slots() {
            if let Some(seed) = slot.seed() {
                self.generalizer.adopt(&mut self.arena, seed);
            }
        }
        tracing::info!(
            slots = self.distribution.len(),
            rules = self.arena.len(),
            "restored generator"
        );
    }

    // ── Observation ─────────────────────────────────────────────────────

    /// Play random episodes and cover what they show.
    pub fn explore(&mut self, episodes: usize) -> LearnResult<()> {
        let random = Policy::default();
        for _ in 0..episodes {
            let mut env = self.domain.environment(self.rng.random());
            let trace = run_episode(
                &random,
                &self.arena,
                &self.matcher,
                env.as_mut(),
                &self.context.goal_terms,
                self.config.max_episode_steps,
                true,
                &mut self.rng,
            )?;
            self.observe(&trace)?;
        }
        Ok(())
    }

    /// Cover every recorded state of `trace` and feed its goal step to the
    /// pre-goal tracker.
    pub fn observe(&mut self, trace: &EpisodeTrace) -> LearnResult<()> {
        for transition in &trace.transitions {
            let outcome = self.generalizer.cover(
                &mut self.arena,
                &self.context,
                &transition.facts,
                &transition.valid_actions,
                false,
                &mut self.rng,
            );
            for &id in &outcome.created {
                self.ensure_slot(id);
            }
            for &id in &outcome.refined {
                self.reseed_slot(id);
            }
        }

        if let Some((action, facts)) = &trace.goal_step {
            let was_settled = self.tracker.is_settled(&action.name);
            let result = self.tracker.observe(&self.context, action, facts)?;
            if !was_settled
                && result == UnificationResult::Unchanged
                && self.tracker.is_settled(&action.name)
            {
                self.specialise_toward_pregoal(&action.name);
            }
        }
        Ok(())
    }

    fn ensure_slot(&mut self, id: RuleId) {
        let rule = self.arena.get(id);
        if self.distribution.slot_index(rule.action_name()).is_some() {
            return;
        }
        let action = rule.action().clone();
        tracing::info!(action = %action, rule = %rule, "new slot");
        self.distribution
            .add_slot(Slot::new(action, id, self.config.absent_probability));
    }

    /// A slot's seed changed before it settled: its mutants describe the old
    /// body, so the slot starts over from the refined seed.
    fn reseed_slot(&mut self, id: RuleId) {
        let Some(index) = self.distribution.slot_index(self.arena.get(id).action_name()) else {
            return;
        };
        let slot = self.distribution.slot(index);
        if slot.seed() != Some(id) {
            return;
        }
        let stale: Vec<RuleId> = slot.rule_ids().filter(|&r| r != id).collect();
        for rule in stale {
            self.arena.discard(rule);
        }
        self.distribution.slot_mut(index).reseed(id);
        self.arena.get_mut(id).mutated = false;
        tracing::debug!(rule = %self.arena.get(id), "reseeded slot");
    }

    // ── Specialisation ──────────────────────────────────────────────────

    /// Mutate the most probable unmutated rule of a slot. Returns the number
    /// of mutants added.
    fn regenerate(&mut self, index: usize) -> usize {
        let slot = self.distribution.slot(index);
        let mut ranked: Vec<(RuleId, f64)> = slot
            .rule_ids()
            .map(|id| (id, slot.probability(id)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let parent = ranked
            .into_iter()
            .map(|(id, _)| id)
            .find(|&id| !self.arena.get(id).mutated);
        match parent {
            Some(parent) => self.add_mutants(index, parent),
            None => 0,
        }
    }

    fn add_mutants(&mut self, index: usize, parent: RuleId) -> usize {
        let mutants = specialise(&mut self.arena, parent, &self.tracker, &self.context);
        self.distribution.slot_mut(index).add_mutants(parent, &mutants);
        mutants.len()
    }

    fn specialise_sparse_slots(&mut self) -> usize {
        let sparse: Vec<usize> = (0..self.distribution.len())
            .filter(|&i| {
                self.distribution
                    .slot(i)
                    .viable_rules(self.config.negligible_fraction)
                    <= self.config.regeneration_min_rules
            })
            .collect();
        sparse.into_iter().map(|i| self.regenerate(i)).sum()
    }

    /// A newly settled pre-goal opens mutations the best rule of the slot
    /// could not produce before.
    fn specialise_toward_pregoal(&mut self, action: &str) {
        let Some(index) = self.distribution.slot_index(action) else {
            return;
        };
        if let Some(best) = self.distribution.slot(index).best_rule() {
            let added = self.add_mutants(index, best);
            tracing::info!(action, mutants = added, "specialised towards settled pre-goal");
        }
    }

    // ── Generations ─────────────────────────────────────────────────────

    pub fn run_generation(&mut self) -> LearnResult<GenerationReport> {
        if self.distribution.is_empty() {
            self.explore(EXPLORATION_EPISODES)?;
        }
        let mut mutants = self.specialise_sparse_slots();
        let generation = self.history.len() + 1;

        if self.distribution.is_empty() {
            tracing::warn!(generation, "no actions covered yet");
            let report = GenerationReport {
                generation,
                ..GenerationReport::default()
            };
            self.history.push(report.clone());
            return Ok(report);
        }

        self.distribution.freeze(false);
        let params = EvaluationParams {
            population: self.updater.population_size(&self.distribution),
            episodes_per_policy: self.config.episodes_per_policy,
            max_steps: self.config.max_episode_steps,
            seed: self.rng.random(),
            record: true,
        };
        let result = evaluate_population(
            &self.distribution,
            &self.arena,
            self.domain.as_ref(),
            &self.context,
            &self.matcher,
            params,
        )?;

        let update = self.updater.update(
            &mut self.distribution,
            &mut self.arena,
            &result.evaluated(),
            self.config.step_size,
            self.config.selection_ratio,
        );
        for &index in &update.regenerate {
            mutants += self.regenerate(index);
        }

        let mut episodes = 0usize;
        let mut goals = 0usize;
        for evaluation in &result.evaluations {
            for trace in &evaluation.traces {
                episodes += 1;
                goals += usize::from(trace.goal_reached);
                self.observe(trace)?;
            }
        }

        let report = GenerationReport {
            generation,
            population: params.population,
            mean_value: result.mean,
            best_value: result.best,
            goal_rate: goals as f64 / episodes.max(1) as f64,
            elites: update.elites,
            kl_divergence: update.kl_divergence,
            slots: self.distribution.len(),
            active_rules: self.arena.active_ids().count(),
            pruned: update.pruned.len(),
            mutants,
        };
        tracing::info!(
            generation,
            population = report.population,
            mean = report.mean_value,
            best = report.best_value,
            goal_rate = report.goal_rate,
            kl = report.kl_divergence,
            rules = report.active_rules,
            elapsed_ms = result.elapsed.as_secs_f64() * 1000.0,
            "generation"
        );
        self.history.push(report.clone());
        Ok(report)
    }

    /// Run generations until the budget is spent or the distribution has
    /// converged, then score the greedy policy.
    pub fn train(&mut self) -> LearnResult<TrainingSummary> {
        let start = Instant::now();
        let mut converged = false;
        for _ in 0..self.config.generations {
            self.run_generation()?;
            if self
                .updater
                .converged(self.config.convergence_window, self.config.convergence_threshold)
            {
                converged = true;
                tracing::info!(generations = self.history.len(), "converged");
                break;
            }
        }
        let (greedy, greedy_value) = self.evaluate_greedy()?;
        let summary = self.summary(converged, &greedy, greedy_value, start.elapsed().as_secs_f64());
        Ok(summary)
    }

    /// The frozen distribution's policy and its mean value.
    pub fn evaluate_greedy(&mut self) -> LearnResult<(Policy, f64)> {
        self.distribution.freeze(true);
        let policy = self.distribution.sample_policy(&mut self.rng);
        self.distribution.freeze(false);
        let evaluation = evaluate_policy(
            policy,
            &self.arena,
            self.domain.as_ref(),
            &self.context,
            &self.matcher,
            GREEDY_EVALUATION_EPISODES,
            self.config.max_episode_steps,
            false,
            &mut self.rng,
        )?;
        Ok((evaluation.evaluated.policy, evaluation.evaluated.value))
    }

    fn summary(&self, converged: bool, greedy: &Policy, greedy_value: f64, elapsed_secs: f64) -> TrainingSummary {
        let slots = self
            .distribution
            .slots()
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let mut rules: Vec<RuleSummary> = slot
                    .rule_ids()
                    .map(|id| {
                        let rule = self.arena.get(id);
                        RuleSummary {
                            rule: rule.to_string(),
                            probability: slot.probability(id),
                            fired: rule.statistics.count(),
                            mean_value: rule.statistics.mean(),
                        }
                    })
                    .collect();
                rules.sort_by(|a, b| b.probability.total_cmp(&a.probability));
                SlotSummary {
                    action: slot.action().to_string(),
                    probability: self.distribution.slot_probability(index),
                    absent_probability: slot.absent_probability(),
                    rules,
                }
            })
            .collect();

        TrainingSummary {
            domain: self.domain.name().to_string(),
            seed: self.config.seed,
            generations: self.history.len(),
            converged,
            best_value: self
                .history
                .iter()
                .map(|r| r.best_value)
                .fold(f64::NEG_INFINITY, f64::max),
            greedy_value,
            greedy_policy: greedy.rules().map(|id| self.arena.get(id).to_string()).collect(),
            total_rules: self.arena.len(),
            active_rules: self.arena.active_ids().count(),
            elapsed_secs,
            slots,
            history: self.history.clone(),
        }
    }
}
