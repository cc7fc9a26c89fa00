//! # relpolicy: relational policy search by covering and cross-entropy
//!
//! Learns decision-list policies of first-order rules for relational
//! environments such as Blocks World. Rules are discovered from observed
//! states, refined into mutants, and selected by a cross-entropy method over
//! a distribution of rule slots.
//!
//! ## Learning loop
//!
//! | Phase | Rust module | Description |
//! |-------|-------------|-------------|
//! | Covering | [`covering::generalizer`] | Least general generalisation of the facts relevant to each valid action instance |
//! | Pre-goal | [`covering::pregoal`] | Generalised state in which the goal-achieving action fires |
//! | Specialisation | [`covering::specializer`] | Single-step mutants: added conditions, range splits, pre-goal facts |
//! | Sampling | [`distribution::policy`] | Slot order, inclusion and rule choice per sampled policy |
//! | Evaluation | [`simulation::engine`] | Parallel episodes per sampled policy |
//! | Update | [`distribution::updater`] | Elite selection, cross-entropy step, pruning, regeneration |
//!
//! [`simulation::training::Learner`] drives the phases generation by
//! generation.
//!
//! ## Representation
//!
//! - Facts and conditions are [`logic::RelationalPredicate`]s over
//!   [`logic::RelationalArgument`]s (constants, numbers, action variables
//!   `?A`, goal variables `?G_0`, anonymous `?`, numeric ranges).
//! - Rules live in a [`logic::RuleArena`] and are referenced by
//!   [`logic::RuleId`]; mutation lineage is stored as id lists.
//! - Domain knowledge (predicate types, type lineage, constants,
//!   specialisation conditions) is an immutable [`logic::DomainContext`]
//!   passed to every component.
//!
//! ## Text forms
//!
//! Rules read `clear(?A) AND clear(?B) => move(?A,?B)`; a slot checkpoint line
//! reads `move(?A,?B): [<rule>:<p>, ..., ABSENT:<p>] @ <slot p>` (see
//! [`storage`]).

pub mod config;
pub mod constants;
pub mod covering;
pub mod distribution;
pub mod env_config;
pub mod error;
pub mod logging;
pub mod logic;
pub mod simulation;
pub mod storage;
