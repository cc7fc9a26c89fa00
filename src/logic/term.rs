//! Relational arguments: the terms filling predicate argument positions.
//!
//! Text forms (used only at the serialization boundary):
//!
//! | Variant | Example |
//! |---------|---------|
//! | `Constant` | `a`, `floor` |
//! | `NumericConstant` | `3`, `-0.5` |
//! | `GoalVariable` | `?G_0` |
//! | `ActionVariable` | `?A`, `?B`, `?A1` |
//! | `NumericRange` | `?#[0..10]`, `?#[0..10\|0..0.5]` |
//! | `BoundVariable` | `?Bnd_0` |
//! | `UnboundVariable` | `?Unb_0` |
//! | `Anonymous` | `?` |
//!
//! Ordering is variant-kind-first (in the order of the table), then lexical
//! within a kind. Floats are compared with `total_cmp` so the ordering is total
//! and consistent with `Eq`/`Hash`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::ParseError;

/// The predicate and argument position a numeric range constrains.
///
/// Not part of the text form: it is recovered from the enclosing predicate
/// when parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RangeContext {
    pub predicate: String,
    pub position: usize,
}

impl RangeContext {
    pub fn new(predicate: impl Into<String>, position: usize) -> Self {
        Self {
            predicate: predicate.into(),
            position,
        }
    }
}

/// A numeric interval `[min, max]` with a fractional window inside it.
///
/// The effective bounds are
/// `min + frac_min * (max - min) ..= min + frac_max * (max - min)`, so a
/// specialised sub-range keeps its relative position when the observed bounds
/// of its context widen.
#[derive(Debug, Clone)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
    pub frac_min: f64,
    pub frac_max: f64,
    pub context: RangeContext,
}

impl NumericRange {
    /// Degenerate range holding a single observed value.
    pub fn from_value(value: f64, context: RangeContext) -> Self {
        Self {
            min: value,
            max: value,
            frac_min: 0.0,
            frac_max: 1.0,
            context,
        }
    }

    pub fn new(min: f64, max: f64, context: RangeContext) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
            frac_min: 0.0,
            frac_max: 1.0,
            context,
        }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    /// Concrete lower and upper bound after applying the fractional window.
    pub fn effective_bounds(&self) -> (f64, f64) {
        let w = self.width();
        (self.min + self.frac_min * w, self.min + self.frac_max * w)
    }

    pub fn effective_width(&self) -> f64 {
        let (lo, hi) = self.effective_bounds();
        hi - lo
    }

    pub fn contains(&self, value: f64) -> bool {
        let (lo, hi) = self.effective_bounds();
        value >= lo - 1e-9 && value <= hi + 1e-9
    }

    /// True when this range's effective interval lies inside `other`'s.
    pub fn within(&self, other: &NumericRange) -> bool {
        let (lo, hi) = self.effective_bounds();
        let (olo, ohi) = other.effective_bounds();
        lo >= olo - 1e-9 && hi <= ohi + 1e-9
    }

    pub fn is_full(&self) -> bool {
        self.frac_min == 0.0 && self.frac_max == 1.0
    }

    /// Same outer bounds, different fractional window.
    pub fn with_fraction(&self, frac_min: f64, frac_max: f64) -> Self {
        Self {
            frac_min: frac_min.clamp(0.0, 1.0),
            frac_max: frac_max.clamp(0.0, 1.0),
            ..self.clone()
        }
    }

    /// Full-window range over the union of both effective intervals.
    pub fn union(&self, other: &NumericRange) -> Self {
        let (lo, hi) = self.effective_bounds();
        let (olo, ohi) = other.effective_bounds();
        Self::new(lo.min(olo), hi.max(ohi), self.context.clone())
    }

    /// Full-window range extended to include `value`.
    pub fn extended(&self, value: f64) -> Self {
        let (lo, hi) = self.effective_bounds();
        Self::new(lo.min(value), hi.max(value), self.context.clone())
    }

    fn cmp_bounds(&self, other: &NumericRange) -> Ordering {
        self.context
            .cmp(&other.context)
            .then_with(|| self.min.total_cmp(&other.min))
            .then_with(|| self.max.total_cmp(&other.max))
            .then_with(|| self.frac_min.total_cmp(&other.frac_min))
            .then_with(|| self.frac_max.total_cmp(&other.frac_max))
    }
}

/// Discriminant of [`RelationalArgument`], in ordering rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArgumentKind {
    Constant,
    NumericConstant,
    GoalVariable,
    ActionVariable,
    NumericRange,
    BoundVariable,
    UnboundVariable,
    Anonymous,
}

#[derive(Debug, Clone)]
pub enum RelationalArgument {
    Constant(String),
    NumericConstant(f64),
    GoalVariable(usize),
    ActionVariable(usize),
    NumericRange(NumericRange),
    BoundVariable(usize),
    UnboundVariable(usize),
    Anonymous,
}

impl RelationalArgument {
    pub fn constant(name: impl Into<String>) -> Self {
        RelationalArgument::Constant(name.into())
    }

    pub fn kind(&self) -> ArgumentKind {
        match self {
            RelationalArgument::Constant(_) => ArgumentKind::Constant,
            RelationalArgument::NumericConstant(_) => ArgumentKind::NumericConstant,
            RelationalArgument::GoalVariable(_) => ArgumentKind::GoalVariable,
            RelationalArgument::ActionVariable(_) => ArgumentKind::ActionVariable,
            RelationalArgument::NumericRange(_) => ArgumentKind::NumericRange,
            RelationalArgument::BoundVariable(_) => ArgumentKind::BoundVariable,
            RelationalArgument::UnboundVariable(_) => ArgumentKind::UnboundVariable,
            RelationalArgument::Anonymous => ArgumentKind::Anonymous,
        }
    }

    /// Constants and numbers: the terms a ground fact is built from.
    pub fn is_ground(&self) -> bool {
        matches!(
            self,
            RelationalArgument::Constant(_) | RelationalArgument::NumericConstant(_)
        )
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, RelationalArgument::Anonymous)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            RelationalArgument::NumericConstant(_) | RelationalArgument::NumericRange(_)
        )
    }

    /// Named variables that take part in bindings (ranges and `?` do not).
    pub fn is_named_variable(&self) -> bool {
        matches!(
            self,
            RelationalArgument::GoalVariable(_)
                | RelationalArgument::ActionVariable(_)
                | RelationalArgument::BoundVariable(_)
                | RelationalArgument::UnboundVariable(_)
        )
    }

    /// Matches anything without binding: `?` and `?Unb_n`.
    pub fn is_wildcard(&self) -> bool {
        matches!(
            self,
            RelationalArgument::Anonymous | RelationalArgument::UnboundVariable(_)
        )
    }

    pub fn as_range(&self) -> Option<&NumericRange> {
        match self {
            RelationalArgument::NumericRange(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            RelationalArgument::NumericConstant(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical action-variable name for position `index`: A..Z, then A1..
    pub fn action_variable_name(index: usize) -> String {
        let letter = (b'A' + (index % 26) as u8) as char;
        let cycle = index / 26;
        if cycle == 0 {
            format!("?{}", letter)
        } else {
            format!("?{}{}", letter, cycle)
        }
    }

    /// Parse a single argument. `context` is attached to numeric ranges.
    pub fn parse(text: &str, context: RangeContext) -> Result<Self, ParseError> {
        let s = text.trim();
        if s.is_empty() {
            return Err(ParseError::Empty("argument"));
        }
        if s == "?" {
            return Ok(RelationalArgument::Anonymous);
        }
        if let Some(rest) = s.strip_prefix("?#[") {
            let body = rest
                .strip_suffix(']')
                .ok_or_else(|| ParseError::Argument(s.to_string()))?;
            return parse_range(body, context)
                .map(RelationalArgument::NumericRange)
                .ok_or_else(|| ParseError::Argument(s.to_string()));
        }
        if let Some(n) = s.strip_prefix("?G_") {
            return parse_index(n, s).map(RelationalArgument::GoalVariable);
        }
        if let Some(n) = s.strip_prefix("?Bnd_") {
            return parse_index(n, s).map(RelationalArgument::BoundVariable);
        }
        if let Some(n) = s.strip_prefix("?Unb_") {
            return parse_index(n, s).map(RelationalArgument::UnboundVariable);
        }
        if let Some(rest) = s.strip_prefix('?') {
            let mut chars = rest.chars();
            let letter = chars
                .next()
                .filter(|c| c.is_ascii_uppercase())
                .ok_or_else(|| ParseError::Argument(s.to_string()))?;
            let digits = chars.as_str();
            let cycle = if digits.is_empty() {
                0
            } else {
                parse_index(digits, s)?
            };
            let index = cycle
                .checked_mul(26)
                .and_then(|c| c.checked_add((letter as u8 - b'A') as usize))
                .ok_or_else(|| ParseError::Argument(s.to_string()))?;
            return Ok(RelationalArgument::ActionVariable(index));
        }
        if let Ok(v) = s.parse::<f64>() {
            if v.is_finite() {
                return Ok(RelationalArgument::NumericConstant(v));
            }
        }
        if s.chars()
            .any(|c| matches!(c, '(' | ')' | ',' | '[' | ']' | ' ' | ':' | '@'))
        {
            return Err(ParseError::Argument(s.to_string()));
        }
        Ok(RelationalArgument::Constant(s.to_string()))
    }
}

fn parse_index(digits: &str, whole: &str) -> Result<usize, ParseError> {
    digits
        .parse::<usize>()
        .map_err(|_| ParseError::Argument(whole.to_string()))
}

/// `lo..hi` or `lo..hi|flo..fhi`.
fn parse_range(body: &str, context: RangeContext) -> Option<NumericRange> {
    let (bounds, fraction) = match body.split_once('|') {
        Some((b, f)) => (b, Some(f)),
        None => (body, None),
    };
    let (lo, hi) = bounds.split_once("..")?;
    let mut range = NumericRange::new(lo.trim().parse().ok()?, hi.trim().parse().ok()?, context);
    if let Some(f) = fraction {
        let (flo, fhi) = f.split_once("..")?;
        range = range.with_fraction(flo.trim().parse().ok()?, fhi.trim().parse().ok()?);
    }
    Some(range)
}

impl fmt::Display for RelationalArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationalArgument::Constant(c) => write!(f, "{}", c),
            RelationalArgument::NumericConstant(v) => write!(f, "{}", v),
            RelationalArgument::GoalVariable(i) => write!(f, "?G_{}", i),
            RelationalArgument::ActionVariable(i) => {
                write!(f, "{}", RelationalArgument::action_variable_name(*i))
            }
            RelationalArgument::NumericRange(r) => {
                if r.is_full() {
                    write!(f, "?#[{}..{}]", r.min, r.max)
                } else {
                    write!(
                        f,
                        "?#[{}..{}|{}..{}]",
                        r.min, r.max, r.frac_min, r.frac_max
                    )
                }
            }
            RelationalArgument::BoundVariable(i) => write!(f, "?Bnd_{}", i),
            RelationalArgument::UnboundVariable(i) => write!(f, "?Unb_{}", i),
            RelationalArgument::Anonymous => write!(f, "?"),
        }
    }
}

impl Ord for RelationalArgument {
    fn cmp(&self, other: &Self) -> Ordering {
        use RelationalArgument::*;
        match (self, other) {
            (Constant(a), Constant(b)) => a.cmp(b),
            (NumericConstant(a), NumericConstant(b)) => a.total_cmp(b),
            (GoalVariable(a), GoalVariable(b))
            | (ActionVariable(a), ActionVariable(b))
            | (BoundVariable(a), BoundVariable(b))
            | (UnboundVariable(a), UnboundVariable(b)) => a.cmp(b),
            (NumericRange(a), NumericRange(b)) => a.cmp_bounds(b),
            (Anonymous, Anonymous) => Ordering::Equal,
            _ => self.kind().cmp(&other.kind()),
        }
    }
}

impl PartialOrd for RelationalArgument {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RelationalArgument {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RelationalArgument {}

impl Hash for RelationalArgument {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            RelationalArgument::Constant(c) => c.hash(state),
            RelationalArgument::NumericConstant(v) => v.to_bits().hash(state),
            RelationalArgument::GoalVariable(i)
            | RelationalArgument::ActionVariable(i)
            | RelationalArgument::BoundVariable(i)
            | RelationalArgument::UnboundVariable(i) => i.hash(state),
            RelationalArgument::NumericRange(r) => {
                r.context.hash(state);
                r.min.to_bits().hash(state);
                r.max.to_bits().hash(state);
                r.frac_min.to_bits().hash(state);
                r.frac_max.to_bits().hash(state);
            }
            RelationalArgument::Anonymous => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> RelationalArgument {
        RelationalArgument::parse(s, RangeContext::new("p", 0)).unwrap()
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(parse("a"), RelationalArgument::constant("a"));
        assert_eq!(parse("2.5"), RelationalArgument::NumericConstant(2.5));
        assert_eq!(parse("?G_1"), RelationalArgument::GoalVariable(1));
        assert_eq!(parse("?B"), RelationalArgument::ActionVariable(1));
        assert_eq!(parse("?C2"), RelationalArgument::ActionVariable(54));
        assert_eq!(parse("?Bnd_3"), RelationalArgument::BoundVariable(3));
        assert_eq!(parse("?Unb_0"), RelationalArgument::UnboundVariable(0));
        assert_eq!(parse("?"), RelationalArgument::Anonymous);
        assert!(RelationalArgument::parse("?b", RangeContext::default()).is_err());
        assert!(RelationalArgument::parse("a(b", RangeContext::default()).is_err());
    }

    #[test]
    fn test_oversized_variable_index_is_rejected() {
        let result = RelationalArgument::parse("?A999999999999999999", RangeContext::default());
        assert!(matches!(result, Err(ParseError::Argument(_))));
    }

    #[test]
    fn test_display_parse_identity() {
        for s in ["a", "-3", "?G_0", "?A", "?Z", "?A1", "?#[0..10]", "?#[0..10|0.25..0.75]", "?Bnd_2", "?Unb_1", "?"] {
            assert_eq!(parse(s).to_string(), s);
        }
    }

    #[test]
    fn test_kind_first_ordering() {
        let mut args = vec![
            RelationalArgument::Anonymous,
            RelationalArgument::ActionVariable(0),
            RelationalArgument::constant("b"),
            RelationalArgument::NumericConstant(1.0),
            RelationalArgument::constant("a"),
        ];
        args.sort();
        assert_eq!(
            args,
            vec![
                RelationalArgument::constant("a"),
                RelationalArgument::constant("b"),
                RelationalArgument::NumericConstant(1.0),
                RelationalArgument::ActionVariable(0),
                RelationalArgument::Anonymous,
            ]
        );
    }

    #[test]
    fn test_range_bounds() {
        let r = NumericRange::new(0.0, 8.0, RangeContext::new("dist", 1)).with_fraction(0.25, 0.5);
        assert_eq!(r.effective_bounds(), (2.0, 4.0));
        assert!(r.contains(3.0));
        assert!(!r.contains(5.0));
        let full = NumericRange::new(0.0, 8.0, RangeContext::new("dist", 1));
        assert!(r.within(&full));
        assert!(!full.within(&r));
        let u = r.union(&NumericRange::from_value(9.0, RangeContext::new("dist", 1)));
        assert_eq!(u.effective_bounds(), (2.0, 9.0));
    }
}
