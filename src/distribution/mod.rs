//! Policy generation: probability distributions over slots and rules, and
//! the cross-entropy updater that reshapes them.

pub mod policy;
pub mod policy_tree;
pub mod probability;
pub mod slot;
pub mod updater;

pub use policy::{Policy, PolicyDistribution, PolicyEntry};
pub use policy_tree::{PolicyNode, PolicyTree};
pub use probability::{kl_divergence, ProbabilityDistribution};
pub use slot::{Slot, SlotChoice};
pub use updater::{select_elites, CrossEntropyUpdater, EvaluatedPolicy, UpdateReport};
