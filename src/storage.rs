//! Text checkpoints for the policy generator and the elite policies.
//!
//! Generator format, one line per slot:
//!
//! ```text
//! move(?A,?B): [clear(?A) AND clear(?B) => move(?A,?B):0.75, ABSENT:0.25] @ 0.5
//! ```
//!
//! The bracketed list holds every rule of the slot with its probability,
//! `ABSENT` standing for the empty choice. The optional `@ weight` suffix is
//! the slot's own probability (uniform when missing). Blank lines and lines
//! starting with `#` are ignored.
//!
//! Elite format: one block per policy, a `# value <v>` header followed by its
//! rules in priority order, blocks separated by blank lines.
//!
//! Rules are stored by text, not by id, so a checkpoint can be loaded into a
//! fresh [`RuleArena`].

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::distribution::policy::PolicyDistribution;
use crate::distribution::slot::Slot;
use crate::distribution::updater::EvaluatedPolicy;
use crate::error::{ParseError, StorageError};
use crate::logic::predicate::{split_top_level, RelationalPredicate};
use crate::logic::rule::{RelationalRule, RuleArena};

/// Default generator checkpoint path.
pub const GENERATOR_FILE_PATH: &str = "data/checkpoints/generator.txt";
/// Default elite checkpoint path.
pub const ELITES_FILE_PATH: &str = "data/checkpoints/elites.txt";

/// Marker for the absent slot choice.
pub const ABSENT_MARKER: &str = "ABSENT";

const ELITE_HEADER: &str = "# value ";

// ── Slot lines ──────────────────────────────────────────────────────────

/// One slot as stored on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRecord {
    pub action: RelationalPredicate,
    /// `None` is the absent choice.
    pub entries: Vec<(Option<RelationalRule>, f64)>,
    pub weight: Option<f64>,
}

pub fn format_slot_line(record: &SlotRecord) -> String {
    let items: Vec<String> = record
        .entries
        .iter()
        .map(|(rule, p)| match rule {
            Some(rule) => format!("{rule}:{p}"),
            None => format!("{ABSENT_MARKER}:{p}"),
        })
        .collect();
    let mut line = format!("{}: [{}]", record.action, items.join(", "));
    if let Some(weight) = record.weight {
        let _ = write!(line, " @ {weight}");
    }
    line
}

fn parse_probability(text: &str) -> Result<f64, ParseError> {
    let p: f64 = text
        .trim()
        .parse()
        .map_err(|_| ParseError::Probability(text.trim().to_string()))?;
    if !p.is_finite() || p < 0.0 {
        return Err(ParseError::Probability(text.trim().to_string()));
    }
    Ok(p)
}

pub fn parse_slot_line(line: &str) -> Result<SlotRecord, ParseError> {
    let malformed = |reason: &str| ParseError::Slot(line.to_string(), reason.to_string());

    let (action, rest) = line.split_once(": [").ok_or_else(|| malformed("missing ': ['"))?;
    let close = rest.rfind(']').ok_or_else(|| malformed("missing ']'"))?;
    let (inner, tail) = (&rest[..close], rest[close + 1..].trim());

    let action: RelationalPredicate = action.trim().parse()?;

    let weight = if tail.is_empty() {
        None
    } else {
        let w = tail
            .strip_prefix('@')
            .ok_or_else(|| malformed("unexpected text after ']'"))?;
        Some(parse_probability(w)?)
    };

    let mut entries = Vec::new();
    if !inner.trim().is_empty() {
        for item in split_top_level(inner, ',') {
            let (text, p) = item
                .trim()
                .rsplit_once(':')
                .ok_or_else(|| malformed("entry without probability"))?;
            let p = parse_probability(p)?;
            let rule = match text.trim() {
                ABSENT_MARKER => None,
                text => {
                    let rule: RelationalRule = text.parse()?;
                    if rule.action_name() != action.name {
                        return Err(malformed("rule does not produce the slot's action"));
                    }
                    Some(rule)
                }
            };
            entries.push((rule, p));
        }
    }
    Ok(SlotRecord {
        action,
        entries,
        weight,
    })
}

// ── Generator checkpoint ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratorCheckpoint {
    pub slots: Vec<SlotRecord>,
}

impl GeneratorCheckpoint {
    pub fn capture(dist: &PolicyDistribution, arena: &RuleArena) -> Self {
        let slots = dist
            .slots()
            .iter()
            .enumerate()
            .map(|(index, slot)| SlotRecord {
                action: slot.action().clone(),
                entries: slot
                    .distribution()
                    .iter()
                    .map(|(choice, p)| (choice.map(|id| arena.get(id).clone()), p))
                    .collect(),
                weight: Some(dist.slot_probability(index)),
            })
            .collect();
        Self { slots }
    }

    /// Rebuild the distribution, registering every stored rule in `arena`.
    pub fn restore(&self, arena: &mut RuleArena) -> PolicyDistribution {
        let uniform = 1.0 / self.slots.len().max(1) as f64;
        let mut dist = PolicyDistribution::new();
        for record in &self.slots {
            let entries: Vec<_> = record
                .entries
                .iter()
                .map(|(rule, p)| (rule.as_ref().map(|r| arena.insert(r.clone()).0), *p))
                .collect();
            let slot = Slot::from_entries(record.action.clone(), entries);
            dist.add_slot_weighted(slot, record.weight.unwrap_or(uniform));
        }
        dist.normalise();
        dist
    }
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))
        }
        _ => Ok(()),
    }
}

pub fn save_generator(
    path: &Path,
    dist: &PolicyDistribution,
    arena: &RuleArena,
) -> Result<(), StorageError> {
    let start = Instant::now();
    let checkpoint = GeneratorCheckpoint::capture(dist, arena);
    let mut out = String::new();
    for record in &checkpoint.slots {
        out.push_str(&format_slot_line(record));
        out.push('\n');
    }
    ensure_parent(path)?;
    fs::write(path, out).map_err(|e| StorageError::io(path, e))?;
    tracing::info!(
        path = %path.display(),
        slots = checkpoint.slots.len(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "saved generator"
    );
    Ok(())
}

pub fn load_generator(path: &Path) -> Result<GeneratorCheckpoint, StorageError> {
    let text = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    let mut slots = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record = parse_slot_line(line).map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        slots.push(record);
    }
    tracing::info!(path = %path.display(), slots = slots.len(), "loaded generator");
    Ok(GeneratorCheckpoint { slots })
}

/// Load a generator checkpoint, or `None` (logged) when it is missing or
/// unreadable, in which case learning starts fresh.
pub fn load_generator_or_fresh(path: &Path) -> Option<GeneratorCheckpoint> {
    match load_generator(path) {
        Ok(checkpoint) if !checkpoint.slots.is_empty() => Some(checkpoint),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "generator checkpoint is empty; starting fresh");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not load generator; starting fresh");
            None
        }
    }
}

// ── Elite checkpoint ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EliteRecord {
    pub value: f64,
    pub rules: Vec<RelationalRule>,
}

pub fn save_elites(
    path: &Path,
    elites: &[EvaluatedPolicy],
    arena: &RuleArena,
) -> Result<(), StorageError> {
    let mut out = String::new();
    for elite in elites {
        let _ = writeln!(out, "{ELITE_HEADER}{}", elite.value);
        out.push_str(&elite.policy.describe(arena));
        out.push('\n');
    }
    ensure_parent(path)?;
    fs::write(path, out).map_err(|e| StorageError::io(path, e))?;
    tracing::info!(path = %path.display(), elites = elites.len(), "saved elites");
    Ok(())
}

pub fn load_elites(path: &Path) -> Result<Vec<EliteRecord>, StorageError> {
    let text = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    let corrupt = |line: usize, source: ParseError| StorageError::Corrupt {
        path: path.to_path_buf(),
        line,
        source,
    };

    let mut elites: Vec<EliteRecord> = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(value) = line.strip_prefix(ELITE_HEADER) {
            let value = value
                .trim()
                .parse()
                .map_err(|_| corrupt(i + 1, ParseError::Probability(value.to_string())))?;
            elites.push(EliteRecord {
                value,
                rules: Vec::new(),
            });
            continue;
        }
        let rule: RelationalRule = line.parse().map_err(|e| corrupt(i + 1, e))?;
        match elites.last_mut() {
            Some(elite) => elite.rules.push(rule),
            None => {
                return Err(corrupt(
                    i + 1,
                    ParseError::Rule(line.to_string(), "rule before any policy header".into()),
                ))
            }
        }
    }
    Ok(elites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::policy::{Policy, PolicyEntry};

    #[test]
    fn test_slot_line_round_trip() {
        let line = "move(?A,?B): [clear(?A) AND clear(?B) => move(?A,?B):0.75, ABSENT:0.25] @ 0.5";
        let record = parse_slot_line(line).unwrap();
        assert_eq!(record.entries.len(), 2);
        assert_eq!(record.entries[1], (None, 0.25));
        assert_eq!(record.weight, Some(0.5));
        assert_eq!(format_slot_line(&record), line);
    }

    #[test]
    fn test_slot_line_without_weight() {
        let record = parse_slot_line("move_floor(?A): [clear(?A) => move_floor(?A):1]").unwrap();
        assert_eq!(record.weight, None);
        assert_eq!(record.entries[0].1, 1.0);
    }

    #[test]
    fn test_malformed_slot_lines() {
        for line in [
            "move(?A,?B) [clear(?A) => move(?A,?B):1]",
            "move(?A,?B): [clear(?A) => move(?A,?B)]",
            "move(?A,?B): [clear(?A) => move(?A,?B):-1]",
            "move(?A,?B): [clear(?A) => move_floor(?A):1]",
            "move(?A,?B): [clear(?A) => move(?A,?B):1] 0.5",
            "move(?A,?B): [clear(?A999999999999999999) => move(?A,?B):1]",
        ] {
            assert!(parse_slot_line(line).is_err(), "accepted {line}");
        }
    }

    #[test]
    fn test_capture_and_restore() {
        let mut arena = RuleArena::new();
        let (a, _) = arena.insert("clear(?A) AND clear(?B) => move(?A,?B)".parse().unwrap());
        let (b, _) = arena.insert("clear(?A) AND highest(?B) => move(?A,?B)".parse().unwrap());
        let mut slot = Slot::new("move(?A,?B)".parse().unwrap(), a, 0.2);
        slot.add_mutants(a, &[b]);
        let mut dist = PolicyDistribution::new();
        dist.add_slot(slot);

        let checkpoint = GeneratorCheckpoint::capture(&dist, &arena);
        let mut fresh = RuleArena::new();
        let restored = checkpoint.restore(&mut fresh);
        assert!(restored.is_normalised());
        let slot = restored.slot(0);
        assert_eq!(slot.rule_count(), 2);
        let id = fresh.lookup(&arena.get(b).key()).unwrap();
        assert!((slot.probability(id) - dist.slot(0).probability(b)).abs() < 1e-12);
        assert!((slot.absent_probability() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_elite_blocks_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elites.txt");
        let mut arena = RuleArena::new();
        let (a, _) = arena.insert("clear(?A) AND clear(?B) => move(?A,?B)".parse().unwrap());
        let (b, _) = arena.insert("clear(?A) => move_floor(?A)".parse().unwrap());
        let elites = vec![
            EvaluatedPolicy {
                policy: Policy::from_entries(vec![
                    PolicyEntry { slot: 0, choice: Some(a) },
                    PolicyEntry { slot: 1, choice: Some(b) },
                ]),
                value: -2.5,
            },
            EvaluatedPolicy {
                policy: Policy::from_entries(vec![PolicyEntry { slot: 1, choice: Some(b) }]),
                value: -4.0,
            },
        ];
        save_elites(&path, &elites, &arena).unwrap();
        let loaded = load_elites(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].value, -2.5);
        assert_eq!(loaded[0].rules.len(), 2);
        assert_eq!(loaded[0].rules[0].key(), arena.get(a).key());
        assert_eq!(loaded[1].rules.len(), 1);
    }
}
