//! Relational predicates and fact sets.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::logic::term::{RangeContext, RelationalArgument};

/// A state: the finite set of ground facts observed at one step.
pub type FactSet = BTreeSet<RelationalPredicate>;

/// A named, ordered argument list with a negation flag.
///
/// Derived ordering (name, args, negation) is what condition sets use, so a
/// rule's body iterates deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationalPredicate {
    pub name: String,
    pub args: Vec<RelationalArgument>,
    pub negated: bool,
}

impl RelationalPredicate {
    pub fn new(name: impl Into<String>, args: Vec<RelationalArgument>) -> Self {
        Self {
            name: name.into(),
            args,
            negated: false,
        }
    }

    /// Ground fact from constant names; numeric-looking names become numbers.
    pub fn fact(name: &str, terms: &[&str]) -> Self {
        let args = terms
            .iter()
            .map(|t| match t.parse::<f64>() {
                Ok(v) if v.is_finite() => RelationalArgument::NumericConstant(v),
                _ => RelationalArgument::constant(*t),
            })
            .collect();
        Self::new(name, args)
    }

    pub fn negate(&self) -> Self {
        Self {
            negated: !self.negated,
            ..self.clone()
        }
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(RelationalArgument::is_ground)
    }

    /// Every argument is `?`. Zero-arity facts are never fully anonymous.
    pub fn is_fully_anonymous(&self) -> bool {
        !self.args.is_empty() && self.args.iter().all(RelationalArgument::is_anonymous)
    }

    pub fn mentions(&self, term: &RelationalArgument) -> bool {
        self.args.iter().any(|a| a == term)
    }

    /// Replace every argument that is a key of `map`.
    pub fn substitute(&self, map: &BTreeMap<RelationalArgument, RelationalArgument>) -> Self {
        Self {
            name: self.name.clone(),
            args: self
                .args
                .iter()
                .map(|a| map.get(a).cloned().unwrap_or_else(|| a.clone()))
                .collect(),
            negated: self.negated,
        }
    }

    /// Same name, arity and polarity: the precondition for unifying two facts.
    pub fn same_signature(&self, other: &RelationalPredicate) -> bool {
        self.name == other.name && self.negated == other.negated && self.arity() == other.arity()
    }
}

impl fmt::Display for RelationalPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "not ")?;
        }
        write!(f, "{}(", self.name)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ")")
    }
}

impl FromStr for RelationalPredicate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty("predicate"));
        }
        let (negated, body) = match s.strip_prefix("not ") {
            Some(rest) => (true, rest.trim()),
            None => (false, s),
        };
        let open = body
            .find('(')
            .ok_or_else(|| ParseError::Predicate(s.to_string()))?;
        let inner = body[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| ParseError::Predicate(s.to_string()))?;
        let name = body[..open].trim();
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '?') {
            return Err(ParseError::Predicate(s.to_string()));
        }
        let mut args = Vec::new();
        if !inner.trim().is_empty() {
            for (position, piece) in split_top_level(inner, ',').into_iter().enumerate() {
                let context = RangeContext::new(name, position);
                args.push(RelationalArgument::parse(piece, context)?);
            }
        }
        Ok(Self {
            name: name.to_string(),
            args,
            negated,
        })
    }
}

/// Split on `sep` outside of parentheses and brackets.
pub(crate) fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut out = Vec::new();
    for (i, ch) in s.char_indices() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            c if c == sep && depth == 0 => {
                out.push(&s[start..i]);
                start = i + ch.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

/// Index of facts by every term they mention.
///
/// Built once per observed state so covering can collect the facts relevant
/// to an action's terms without rescanning the state.
#[derive(Debug, Default)]
pub struct TermIndex<'a> {
    by_term: BTreeMap<&'a RelationalArgument, Vec<&'a RelationalPredicate>>,
}

impl<'a> TermIndex<'a> {
    pub fn build(state: &'a FactSet) -> Self {
        let mut by_term: BTreeMap<&RelationalArgument, Vec<&RelationalPredicate>> =
            BTreeMap::new();
        for fact in state {
            for arg in &fact.args {
                let facts = by_term.entry(arg).or_default();
                if facts.last().map_or(true, |last| *last != fact) {
                    facts.push(fact);
                }
            }
        }
        Self { by_term }
    }

    pub fn facts_mentioning(&self, term: &RelationalArgument) -> &[&'a RelationalPredicate] {
        self.by_term.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All facts mentioning at least one of `terms`, deduplicated.
    pub fn relevant_facts(&self, terms: &[RelationalArgument]) -> BTreeSet<&'a RelationalPredicate> {
        terms
            .iter()
            .flat_map(|t| self.facts_mentioning(t).iter().copied())
            .collect()
    }
}
