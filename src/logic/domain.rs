//! Domain declarations and the immutable context passed to every component.
//!
//! A [`DomainSpec`] is plain data: declared predicates and actions with their
//! argument types, the type lineage, protected constants and the library of
//! specialisation conditions. Domains are made available by name through a
//! [`DomainRegistry`] populated at startup.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{LearnError, LearnResult};
use crate::logic::predicate::RelationalPredicate;
use crate::simulation::environment::Environment;

/// Name of the fact an environment uses to echo the valid actions.
pub const VALID_ACTIONS_PREDICATE: &str = "valid_actions";

/// Name of the always-true marker fact.
pub const ALWAYS_TRUE_PREDICATE: &str = "test";

/// Declared name and argument types of a predicate or action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateDecl {
    pub name: String,
    pub arg_types: Vec<String>,
}

impl PredicateDecl {
    pub fn new(name: &str, arg_types: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            arg_types: arg_types.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Single-inheritance type lineage: `child -> parent`.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    parents: BTreeMap<String, String>,
    types: BTreeSet<String>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, name: &str, parent: Option<&str>) {
        self.types.insert(name.to_string());
        if let Some(p) = parent {
            self.types.insert(p.to_string());
            self.parents.insert(name.to_string(), p.to_string());
        }
    }

    pub fn is_type(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    /// `ancestor` equals `descendant` or lies above it in the lineage.
    pub fn is_ancestor_or_equal(&self, ancestor: &str, descendant: &str) -> bool {
        let mut current = Some(descendant);
        let mut steps = 0usize;
        while let Some(t) = current {
            if t == ancestor {
                return true;
            }
            current = self.parents.get(t).map(String::as_str);
            steps += 1;
            if steps > self.parents.len() {
                break;
            }
        }
        false
    }

    /// One type is an ancestor of the other.
    pub fn on_same_lineage(&self, a: &str, b: &str) -> bool {
        self.is_ancestor_or_equal(a, b) || self.is_ancestor_or_equal(b, a)
    }
}

/// Everything the learner knows about a domain.
#[derive(Debug, Clone, Default)]
pub struct DomainSpec {
    pub name: String,
    pub predicates: BTreeMap<String, PredicateDecl>,
    pub actions: BTreeMap<String, PredicateDecl>,
    pub types: TypeHierarchy,
    /// Objects that keep their identity in rules instead of being anonymised.
    pub constants: BTreeSet<String>,
    /// Per action: condition templates over the action's variables.
    pub specialisations: BTreeMap<String, Vec<RelationalPredicate>>,
}

impl DomainSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn declare_predicate(&mut self, decl: PredicateDecl) {
        self.predicates.insert(decl.name.clone(), decl);
    }

    pub fn declare_action(&mut self, decl: PredicateDecl) {
        self.actions.insert(decl.name.clone(), decl);
    }

    pub fn add_specialisation(&mut self, action: &str, condition: RelationalPredicate) {
        self.specialisations
            .entry(action.to_string())
            .or_default()
            .push(condition);
    }

    /// Argument type of `predicate` at `position`, if declared.
    pub fn arg_type(&self, predicate: &str, position: usize) -> Option<&str> {
        self.predicates
            .get(predicate)
            .or_else(|| self.actions.get(predicate))
            .and_then(|d| d.arg_types.get(position))
            .map(String::as_str)
    }

    /// Unary predicates named after a declared type.
    pub fn is_type_predicate(&self, fact: &RelationalPredicate) -> bool {
        fact.arity() == 1 && self.types.is_type(&fact.name)
    }

    /// Facts that carry no information for covering or pre-goals.
    pub fn is_useless_fact(&self, fact: &RelationalPredicate) -> bool {
        fact.name == VALID_ACTIONS_PREDICATE
            || fact.name == ALWAYS_TRUE_PREDICATE
            || fact.is_fully_anonymous()
    }

    pub fn specialisation_conditions(&self, action: &str) -> &[RelationalPredicate] {
        self.specialisations
            .get(action)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Immutable per-run context: the domain plus the current goal's terms.
///
/// Cheap to clone and shared read-only across evaluation workers.
#[derive(Debug, Clone)]
pub struct DomainContext {
    pub spec: Arc<DomainSpec>,
    pub goal_terms: Vec<String>,
}

impl DomainContext {
    pub fn new(spec: DomainSpec, goal_terms: Vec<String>) -> Self {
        Self {
            spec: Arc::new(spec),
            goal_terms,
        }
    }
}

/// A domain that can be registered by name: its declarations plus a way to
/// build environments for it.
pub trait Domain: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> DomainSpec;
    /// Goal terms for the task this domain instance trains on.
    fn goal_terms(&self) -> Vec<String>;
    fn environment(&self, seed: u64) -> Box<dyn Environment>;

    fn context(&self) -> DomainContext {
        DomainContext::new(self.spec(), self.goal_terms())
    }
}

type DomainFactory = fn() -> Box<dyn Domain>;

/// Name → constructor table for domains.
#[derive(Default)]
pub struct DomainRegistry {
    factories: BTreeMap<String, DomainFactory>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the domains shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            crate::simulation::blocks_world::DOMAIN_NAME,
            crate::simulation::blocks_world::create_domain,
        );
        registry
    }

    pub fn register(&mut self, name: &str, factory: DomainFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str) -> LearnResult<Box<dyn Domain>> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| LearnError::UnknownDomain(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
