//! Relational rules and the arena that owns them.
//!
//! Rules reference each other (mutation lineage) only by [`RuleId`]. The arena
//! never removes entries: a pruned rule is retired, keeping its id and key so
//! the same condition set cannot be proposed again. A discarded rule keeps
//! its id but gives up its key.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::logic::predicate::RelationalPredicate;
use crate::logic::term::RelationalArgument;

/// Separator between conditions in the text form of a rule.
pub const CONDITION_SEPARATOR: &str = " AND ";

/// Separator between body and head in the text form of a rule.
pub const IMPLICATION: &str = " => ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u32);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOrigin {
    /// Built directly from observations.
    Covered,
    /// Single-step mutation of a parent rule.
    Specialised,
    /// Read back from a checkpoint.
    Loaded,
}

/// Welford running mean/variance of episode returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleStatistics {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RuleStatistics {
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance; zero until two values were seen.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

/// `conditions => action`.
#[derive(Debug, Clone)]
pub struct RelationalRule {
    conditions: BTreeSet<RelationalPredicate>,
    action: RelationalPredicate,
    pub parents: Vec<RuleId>,
    pub children: Vec<RuleId>,
    /// Number of mutation steps from a covered rule.
    pub ancestry: u32,
    pub origin: RuleOrigin,
    pub statistics: RuleStatistics,
    /// Consecutive covering passes that left the conditions unchanged.
    pub states_seen: u32,
    /// Whether this rule already produced its mutants.
    pub mutated: bool,
}

impl RelationalRule {
    pub fn new(conditions: BTreeSet<RelationalPredicate>, action: RelationalPredicate) -> Self {
        Self {
            conditions,
            action,
            parents: Vec::new(),
            children: Vec::new(),
            ancestry: 0,
            origin: RuleOrigin::Covered,
            statistics: RuleStatistics::default(),
            states_seen: 0,
            mutated: false,
        }
    }

    /// A mutant of `parent` with a new body. Lineage ids are filled in by the
    /// arena on insertion.
    pub fn mutant_of(parent: &RelationalRule, conditions: BTreeSet<RelationalPredicate>) -> Self {
        Self {
            ancestry: parent.ancestry + 1,
            origin: RuleOrigin::Specialised,
            ..Self::new(conditions, parent.action.clone())
        }
    }

    pub fn conditions(&self) -> &BTreeSet<RelationalPredicate> {
        &self.conditions
    }

    pub fn action(&self) -> &RelationalPredicate {
        &self.action
    }

    pub fn action_name(&self) -> &str {
        &self.action.name
    }

    pub fn action_terms(&self) -> &[RelationalArgument] {
        &self.action.args
    }

    pub fn is_mutant(&self) -> bool {
        self.ancestry > 0
    }

    /// Canonical text used as the deduplication key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

/// Rules are equal when their text forms are; lineage and statistics are
/// ignored.
impl PartialEq for RelationalRule {
    fn eq(&self, other: &Self) -> bool {
        self.conditions == other.conditions && self.action == other.action
    }
}

impl fmt::Display for RelationalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", CONDITION_SEPARATOR)?;
            }
            write!(f, "{}", c)?;
        }
        if self.conditions.is_empty() {
            write!(f, "=> {}", self.action)
        } else {
            write!(f, "{}{}", IMPLICATION, self.action)
        }
    }
}

impl FromStr for RelationalRule {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (body, head) = s
            .rsplit_once("=>")
            .ok_or_else(|| ParseError::Rule(s.to_string(), "missing '=>'".into()))?;
        let action: RelationalPredicate = head.parse()?;
        if action.negated {
            return Err(ParseError::Rule(s.to_string(), "negated action".into()));
        }
        let mut conditions = BTreeSet::new();
        let body = body.trim();
        if !body.is_empty() {
            for piece in body.split(CONDITION_SEPARATOR) {
                conditions.insert(piece.parse::<RelationalPredicate>()?);
            }
        }
        let mut rule = RelationalRule::new(conditions, action);
        rule.origin = RuleOrigin::Loaded;
        Ok(rule)
    }
}

/// Owner of every rule ever created, indexed by stable id.
#[derive(Debug, Default, Clone)]
pub struct RuleArena {
    rules: Vec<RelationalRule>,
    active: Vec<bool>,
    by_key: HashMap<String, RuleId>,
}

impl RuleArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule, or return the id of an existing rule with the same key.
    /// The boolean is true when the rule is new.
    pub fn insert(&mut self, rule: RelationalRule) -> (RuleId, bool) {
        let key = rule.key();
        if let Some(&id) = self.by_key.get(&key) {
            return (id, false);
        }
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(rule);
        self.active.push(true);
        self.by_key.insert(key, id);
        (id, true)
    }

    /// Insert a mutant and link it to its parent. Returns `None` when an
    /// identical rule already exists (live or retired).
    pub fn insert_mutant(&mut self, parent: RuleId, mut rule: RelationalRule) -> Option<RuleId> {
        rule.parents = vec![parent];
        let (id, fresh) = self.insert(rule);
        if !fresh {
            return None;
        }
        self.rules[parent.0 as usize].children.push(id);
        Some(id)
    }

    pub fn get(&self, id: RuleId) -> &RelationalRule {
        &self.rules[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: RuleId) -> &mut RelationalRule {
        &mut self.rules[id.0 as usize]
    }

    pub fn lookup(&self, key: &str) -> Option<RuleId> {
        self.by_key.get(key).copied()
    }

    /// Replace a rule's body in place (covering refinement of a candidate).
    /// Returns false when another rule already owns the new key.
    pub fn refine(&mut self, id: RuleId, conditions: BTreeSet<RelationalPredicate>) -> bool {
        let old_key = self.get(id).key();
        let mut candidate = self.get(id).clone();
        candidate.conditions = conditions;
        let new_key = candidate.key();
        if new_key == old_key {
            return true;
        }
        if self.by_key.contains_key(&new_key) {
            return false;
        }
        self.by_key.remove(&old_key);
        self.by_key.insert(new_key, id);
        self.rules[id.0 as usize] = candidate;
        true
    }

    /// Deactivate a pruned rule. Its key stays reserved, so an identical
    /// mutant is never proposed again.
    pub fn retire(&mut self, id: RuleId) {
        self.active[id.0 as usize] = false;
    }

    /// Deactivate a rule that was dropped without being judged, releasing
    /// its key so the same body can be inserted again later.
    pub fn discard(&mut self, id: RuleId) {
        self.active[id.0 as usize] = false;
        let key = self.get(id).key();
        if self.by_key.get(&key) == Some(&id) {
            self.by_key.remove(&key);
        }
        for parent in self.rules[id.0 as usize].parents.clone() {
            self.rules[parent.0 as usize].children.retain(|&c| c != id);
        }
    }

    pub fn is_active(&self, id: RuleId) -> bool {
        self.active.get(id.0 as usize).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn active_ids(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, a)| **a)
            .map(|(i, _)| RuleId(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(s: &str) -> RelationalRule {
        s.parse().unwrap()
    }

    #[test]
    fn test_rule_text_form() {
        let r = rule("clear(?B) AND clear(?A) => move(?A,?B)");
        assert_eq!(r.to_string(), "clear(?A) AND clear(?B) => move(?A,?B)");
        assert_eq!(r.conditions().len(), 2);
        assert_eq!(r.action_name(), "move");

        let empty = rule("=> noop()");
        assert!(empty.conditions().is_empty());
        assert_eq!(empty.to_string(), "=> noop()");
    }

    #[test]
    fn test_rule_parse_errors() {
        assert!("clear(?A)".parse::<RelationalRule>().is_err());
        assert!("clear(?A) => not move(?A)".parse::<RelationalRule>().is_err());
    }

    #[test]
    fn test_welford() {
        let mut s = RuleStatistics::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.record(v);
        }
        assert_eq!(s.count(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.variance() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_arena_dedup_and_lineage() {
        let mut arena = RuleArena::new();
        let (parent, fresh) = arena.insert(rule("clear(?A) => move(?A,?B)"));
        assert!(fresh);
        let (same, fresh) = arena.insert(rule("clear(?A) => move(?A,?B)"));
        assert_eq!(parent, same);
        assert!(!fresh);

        let p = arena.get(parent).clone();
        let mut body = p.conditions().clone();
        body.insert("clear(?B)".parse().unwrap());
        let child = arena
            .insert_mutant(parent, RelationalRule::mutant_of(&p, body.clone()))
            .unwrap();
        assert_eq!(arena.get(child).parents, vec![parent]);
        assert_eq!(arena.get(parent).children, vec![child]);
        assert_eq!(arena.get(child).ancestry, 1);
        assert!(arena
            .insert_mutant(parent, RelationalRule::mutant_of(&p, body))
            .is_none());

        arena.retire(child);
        assert!(!arena.is_active(child));
        assert_eq!(arena.active_ids().collect::<Vec<_>>(), vec![parent]);
    }

    #[test]
    fn test_discard_releases_key_retire_keeps_it() {
        let mut arena = RuleArena::new();
        let (parent, _) = arena.insert(rule("clear(?A) => move(?A,?B)"));
        let p = arena.get(parent).clone();
        let mutant = |text: &str| RelationalRule::mutant_of(&p, rule(text).conditions().clone());

        let kept = arena
            .insert_mutant(parent, mutant("clear(?A) AND highest(?A) => move(?A,?B)"))
            .unwrap();
        arena.retire(kept);
        assert!(arena
            .insert_mutant(parent, mutant("clear(?A) AND highest(?A) => move(?A,?B)"))
            .is_none());

        let dropped = arena
            .insert_mutant(parent, mutant("clear(?A) AND clear(?B) => move(?A,?B)"))
            .unwrap();
        arena.discard(dropped);
        assert!(!arena.is_active(dropped));
        assert_eq!(arena.get(parent).children, vec![kept]);
        let again = arena
            .insert_mutant(parent, mutant("clear(?A) AND clear(?B) => move(?A,?B)"))
            .unwrap();
        assert_ne!(again, dropped);
        assert!(arena.is_active(again));
    }

    #[test]
    fn test_refine_rekeys() {
        let mut arena = RuleArena::new();
        let (id, _) = arena.insert(rule("clear(?A) AND on(?A,?) => move(?A,?B)"));
        let body: BTreeSet<RelationalPredicate> = ["clear(?A)".parse().unwrap()].into();
        assert!(arena.refine(id, body));
        assert_eq!(arena.lookup("clear(?A) => move(?A,?B)"), Some(id));
        assert_eq!(arena.lookup("clear(?A) AND on(?A,?) => move(?A,?B)"), None);
    }
}
