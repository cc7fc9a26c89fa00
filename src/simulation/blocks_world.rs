//! Blocks World: stack blocks until `on(G_0, G_1)` holds.
//!
//! State facts: `block(x)`, `floor(floor)`, `on(x, y)`, `clear(x)`,
//! `highest(x)` and the transitive `above(x, y)`. Actions: `move(x, y)` puts
//! clear block `x` on clear block `y`; `move_floor(x)` puts clear block `x`
//! on the floor. Every step costs 1; the episode ends when the goal holds.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::covering::generalizer::ValidActions;
use crate::error::{LearnError, LearnResult};
use crate::logic::domain::{Domain, DomainSpec, PredicateDecl};
use crate::logic::predicate::{FactSet, RelationalPredicate};
use crate::simulation::environment::{Environment, Observation, StepResult};

pub const DOMAIN_NAME: &str = "blocks";

const FLOOR: &str = "floor";

/// Registry factory: four blocks, goal `on(a, b)`.
pub fn create_domain() -> Box<dyn Domain> {
    Box::new(BlocksWorld::new(4))
}

#[derive(Debug, Clone)]
pub struct BlocksWorld {
    blocks: Vec<String>,
    goal: (String, String),
}

impl BlocksWorld {
    /// `n` blocks named `a, b, c, ...` (at least two) with goal `on(a, b)`.
    pub fn new(n: usize) -> Self {
        let blocks: Vec<String> = (0..n.clamp(2, 26))
            .map(|i| ((b'a' + i as u8) as char).to_string())
            .collect();
        let goal = (blocks[0].clone(), blocks[1].clone());
        Self { blocks, goal }
    }
}

impl Domain for BlocksWorld {
    fn name(&self) -> &str {
        DOMAIN_NAME
    }

    fn spec(&self) -> DomainSpec {
        let mut spec = DomainSpec::new(DOMAIN_NAME);
        spec.types.add_type("thing", None);
        spec.types.add_type("block", Some("thing"));
        spec.types.add_type(FLOOR, Some("thing"));
        spec.constants.insert(FLOOR.to_string());

        spec.declare_predicate(PredicateDecl::new("block", &["block"]));
        spec.declare_predicate(PredicateDecl::new(FLOOR, &[FLOOR]));
        spec.declare_predicate(PredicateDecl::new("on", &["block", "thing"]));
        spec.declare_predicate(PredicateDecl::new("clear", &["block"]));
        spec.declare_predicate(PredicateDecl::new("highest", &["block"]));
        spec.declare_predicate(PredicateDecl::new("above", &["block", "block"]));
        spec.declare_action(PredicateDecl::new("move", &["block", "block"]));
        spec.declare_action(PredicateDecl::new("move_floor", &["block"]));

        const MOVE_CONDITIONS: [&str; 9] = [
            "highest(?A)",
            "highest(?B)",
            "above(?A,?B)",
            "above(?B,?A)",
            "above(?A,?G_0)",
            "above(?B,?G_0)",
            "above(?B,?G_1)",
            "block(?B)",
            "floor(?B)",
        ];
        const MOVE_FLOOR_CONDITIONS: [&str; 5] = [
            "highest(?A)",
            "above(?A,?G_0)",
            "above(?A,?G_1)",
            "on(?A,?G_0)",
            "on(?A,?G_1)",
        ];
        let library = MOVE_CONDITIONS
            .iter()
            .map(|c| ("move", c))
            .chain(MOVE_FLOOR_CONDITIONS.iter().map(|c| ("move_floor", c)));
        for (action, text) in library {
            if let Ok(condition) = text.parse::<RelationalPredicate>() {
                spec.add_specialisation(action, condition);
            }
        }
        spec
    }

    fn goal_terms(&self) -> Vec<String> {
        vec![self.goal.0.clone(), self.goal.1.clone()]
    }

    fn environment(&self, seed: u64) -> Box<dyn Environment> {
        Box::new(BlocksEnvironment::new(
            self.blocks.clone(),
            self.goal.clone(),
            seed,
        ))
    }
}

/// Blocks World simulator. `below[x]` is the block or floor `x` rests on.
#[derive(Debug, Clone)]
pub struct BlocksEnvironment {
    blocks: Vec<String>,
    goal: (String, String),
    below: BTreeMap<String, String>,
    rng: SmallRng,
}

impl BlocksEnvironment {
    pub fn new(blocks: Vec<String>, goal: (String, String), seed: u64) -> Self {
        let below = blocks
            .iter()
            .map(|b| (b.clone(), FLOOR.to_string()))
            .collect();
        Self {
            blocks,
            goal,
            below,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Replace the configuration: `(block, support)` pairs.
    pub fn set_configuration(&mut self, pairs: &[(&str, &str)]) {
        for (block, support) in pairs {
            self.below.insert(block.to_string(), support.to_string());
        }
    }

    fn is_clear(&self, block: &str) -> bool {
        !self.below.values().any(|s| s == block)
    }

    fn height(&self, block: &str) -> usize {
        let mut h = 0;
        let mut current = block;
        while let Some(next) = self.below.get(current) {
            h += 1;
            current = next.as_str();
            if h > self.blocks.len() {
                break;
            }
        }
        h
    }

    pub fn goal_reached(&self) -> bool {
        self.below.get(&self.goal.0) == Some(&self.goal.1)
    }

    pub fn facts(&self) -> FactSet {
        let mut facts = FactSet::new();
        facts.insert(RelationalPredicate::fact(FLOOR, &[FLOOR]));
        let max_height = self
            .blocks
            .iter()
            .map(|b| self.height(b))
            .max()
            .unwrap_or(0);
        for block in &self.blocks {
            facts.insert(RelationalPredicate::fact("block", &[block.as_str()]));
            let support = self.below.get(block).map(String::as_str).unwrap_or(FLOOR);
            facts.insert(RelationalPredicate::fact("on", &[block.as_str(), support]));
            if self.is_clear(block) {
                facts.insert(RelationalPredicate::fact("clear", &[block.as_str()]));
                if self.height(block) == max_height {
                    facts.insert(RelationalPredicate::fact("highest", &[block.as_str()]));
                }
            }
            let mut current = support;
            let mut steps = 0;
            while current != FLOOR && steps < self.blocks.len() {
                facts.insert(RelationalPredicate::fact("above", &[block.as_str(), current]));
                current = self.below.get(current).map(String::as_str).unwrap_or(FLOOR);
                steps += 1;
            }
        }
        facts
    }

    fn observation(&self) -> Observation {
        Observation {
            facts: self.facts(),
            valid_actions: self.valid_actions(),
        }
    }

    fn scramble(&mut self) {
        let mut order = self.blocks.clone();
        order.shuffle(&mut self.rng);
        let mut tops: Vec<String> = Vec::new();
        self.below.clear();
        for block in order {
            if !tops.is_empty() && self.rng.random_bool(0.5) {
                let i = self.rng.random_range(0..tops.len());
                self.below.insert(block.clone(), tops[i].clone());
                tops[i] = block;
            } else {
                self.below.insert(block.clone(), FLOOR.to_string());
                tops.push(block);
            }
        }
        if self.goal_reached() {
            self.below.insert(self.goal.0.clone(), FLOOR.to_string());
        }
    }
}

impl Environment for BlocksEnvironment {
    fn start(&mut self) -> Observation {
        self.scramble();
        self.observation()
    }

    fn step(&mut self, action: &RelationalPredicate) -> LearnResult<StepResult> {
        let valid = self
            .valid_actions()
            .get(&action.name)
            .is_some_and(|v| v.contains(action));
        if !valid {
            return Err(LearnError::Environment {
                action: action.to_string(),
                reason: "not applicable in the current state".into(),
            });
        }
        let block = action.args[0].to_string();
        let target = match action.name.as_str() {
            "move" => action.args[1].to_string(),
            _ => FLOOR.to_string(),
        };
        self.below.insert(block, target);
        Ok(StepResult {
            observation: self.observation(),
            reward: -1.0,
            terminal: self.goal_reached(),
        })
    }

    fn valid_actions(&self) -> ValidActions {
        let clear: Vec<&String> = self.blocks.iter().filter(|b| self.is_clear(b)).collect();
        let mut moves = Vec::new();
        let mut floor_moves = Vec::new();
        for &x in &clear {
            for &y in &clear {
                if x != y {
                    moves.push(RelationalPredicate::fact("move", &[x.as_str(), y.as_str()]));
                }
            }
            if self.below.get(x).map(String::as_str) != Some(FLOOR) {
                floor_moves.push(RelationalPredicate::fact("move_floor", &[x.as_str()]));
            }
        }
        let mut actions = ValidActions::new();
        actions.insert("move".to_string(), moves);
        actions.insert("move_floor".to_string(), floor_moves);
        actions
    }
}
