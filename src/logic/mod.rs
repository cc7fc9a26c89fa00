//! First-order term, predicate and rule model plus unification.

pub mod domain;
pub mod predicate;
pub mod query;
pub mod rule;
pub mod term;
pub mod unify;

pub use domain::{Domain, DomainContext, DomainRegistry, DomainSpec, PredicateDecl, TypeHierarchy};
pub use predicate::{FactSet, RelationalPredicate, TermIndex};
pub use query::{BacktrackingMatcher, Bindings, FactQuery};
pub use rule::{RelationalRule, RuleArena, RuleId, RuleOrigin, RuleStatistics};
pub use term::{NumericRange, RangeContext, RelationalArgument};
pub use unify::{unify, InverseSubstitution, Unification, UnificationResult};
