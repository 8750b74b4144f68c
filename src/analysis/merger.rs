//! Consolidation of mappings across analyzed units
//!
//! Consolidation needs every slot of a batch; it is not incremental.
//! Mappings are grouped by `(mappingType, value key)` where the value
//! key depends on what kind of value the mapping carries:
//!
//! - coordinates compare normalized
//! - concept-like terms compare case- and whitespace-insensitively and
//!   report their most frequent spelling
//! - relationships compare as `(source, predicate, target)` triples
//! - anything else compares by its trimmed value
//!
//! Consolidating an already consolidated set changes nothing.

use super::types::{AnalysisUnit, Elaboration, Mapping, UnitOutcome, Variation};
use crate::coordinate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

/// Separator between distinct reasonings of a consolidated mapping
pub const REASONING_SEPARATOR: &str = " | ";

const TERM_TYPES: &[&str] = &["concept", "entity", "keyword", "term", "theme", "tag"];

/// How a mapping's value is compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Coordinate,
    Term,
    Relationship,
    Exact,
}

impl MappingKind {
    pub fn of(mapping_type: &str) -> Self {
        let t = mapping_type.trim().to_lowercase();
        if t.contains("coordinate") {
            MappingKind::Coordinate
        } else if t.contains("relation") {
            MappingKind::Relationship
        } else if TERM_TYPES.iter().any(|k| t.starts_with(k)) {
            MappingKind::Term
        } else {
            MappingKind::Exact
        }
    }

    /// Comparison key for `value` under this kind.
    pub fn value_key(self, value: &str) -> String {
        match self {
            MappingKind::Coordinate => coordinate::normalize(value.trim()),
            MappingKind::Term => fold(value),
            MappingKind::Relationship => match parse_triple(value) {
                Some((s, p, t)) => format!("{}\u{1f}{}\u{1f}{}", fold(&s), fold(&p), fold(&t)),
                None => fold(value),
            },
            MappingKind::Exact => value.trim().to_string(),
        }
    }
}

fn fold(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn triple_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^\s*(.+?)\s*-\[\s*(.+?)\s*\]->\s*(.+?)\s*$",
            r"^\s*(.+?)\s*->\s*(.+?)\s*->\s*(.+?)\s*$",
            r"^\s*(.+?)\s*\|\s*(.+?)\s*\|\s*(.+?)\s*$",
            r"^\s*\(\s*(.+?)\s*,\s*(.+?)\s*,\s*(.+?)\s*\)\s*$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

/// Split a relationship value into `(source, predicate, target)`.
///
/// Accepts `A -[p]-> B`, `A -> p -> B`, `A | p | B` and `(A, p, B)`.
pub fn parse_triple(value: &str) -> Option<(String, String, String)> {
    triple_patterns().iter().find_map(|re| {
        let caps = re.captures(value)?;
        Some((
            caps[1].to_string(),
            caps[2].to_string(),
            caps[3].to_string(),
        ))
    })
}

/// All mappings of a batch, each tagged with its slot index.
pub fn flatten(outcomes: &[UnitOutcome]) -> Vec<Mapping> {
    outcomes
        .iter()
        .enumerate()
        .filter_map(|(i, o)| o.unit().map(|u| (i, u)))
        .flat_map(|(i, unit)| {
            unit.extracted_mappings.iter().map(move |m| Mapping {
                source_unit_indices: vec![i],
                ..m.clone()
            })
        })
        .collect()
}

struct Group {
    kind: MappingKind,
    mapping_type: String,
    spellings: Vec<(String, u32)>,
    weighted_confidence: f64,
    occurrences: u32,
    members: usize,
    first_confidence: f64,
    reasonings: Vec<String>,
    sources: BTreeSet<usize>,
}

impl Group {
    fn new(kind: MappingKind, mapping: &Mapping) -> Self {
        Self {
            kind,
            mapping_type: mapping.mapping_type.trim().to_string(),
            spellings: Vec::new(),
            weighted_confidence: 0.0,
            occurrences: 0,
            members: 0,
            first_confidence: mapping.confidence_score,
            reasonings: Vec::new(),
            sources: BTreeSet::new(),
        }
    }

    fn add(&mut self, mapping: &Mapping) {
        let occurrences = mapping.occurrences.max(1);
        let spelling = mapping.mapping_value.trim();
        match self.spellings.iter_mut().find(|(s, _)| s == spelling) {
            Some((_, count)) => *count += occurrences,
            None => self.spellings.push((spelling.to_string(), occurrences)),
        }
        self.weighted_confidence += mapping.confidence_score * f64::from(occurrences);
        self.occurrences += occurrences;
        self.members += 1;
        for part in mapping.reasoning.split(REASONING_SEPARATOR) {
            let part = part.trim();
            if !part.is_empty() && !self.reasonings.iter().any(|r| r == part) {
                self.reasonings.push(part.to_string());
            }
        }
        self.sources.extend(mapping.source_unit_indices.iter().copied());
    }

    fn value(&self) -> String {
        match self.kind {
            MappingKind::Coordinate => self
                .spellings
                .first()
                .map(|(s, _)| coordinate::normalize(s))
                .unwrap_or_default(),
            _ => {
                // Most frequent spelling; the earliest wins a tie
                let mut best: Option<&(String, u32)> = None;
                for entry in &self.spellings {
                    if best.map_or(true, |b| entry.1 > b.1) {
                        best = Some(entry);
                    }
                }
                best.map(|(s, _)| s.clone()).unwrap_or_default()
            }
        }
    }

    fn finish(self) -> Mapping {
        let confidence = if self.members == 1 {
            self.first_confidence
        } else {
            self.weighted_confidence / f64::from(self.occurrences.max(1))
        };
        Mapping {
            mapping_value: self.value(),
            mapping_type: self.mapping_type,
            confidence_score: confidence.clamp(0.0, 1.0),
            occurrences: self.occurrences,
            reasoning: self.reasonings.join(REASONING_SEPARATOR),
            source_unit_indices: self.sources.into_iter().collect(),
        }
    }
}

/// Merge duplicate mappings. Groups keep first-seen order.
pub fn consolidate(mappings: Vec<Mapping>) -> Vec<Mapping> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();

    for mapping in &mappings {
        let kind = MappingKind::of(&mapping.mapping_type);
        let key = (
            mapping.mapping_type.trim().to_lowercase(),
            kind.value_key(&mapping.mapping_value),
        );
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Group::new(kind, mapping));
            groups.len() - 1
        });
        groups[slot].add(mapping);
    }

    groups.into_iter().map(Group::finish).collect()
}

/// Per-slot view of consolidated mappings: each slot sees the enriched
/// version of every group it contributed to.
pub fn distribute(consolidated: &[Mapping], slot_count: usize) -> Vec<Vec<Mapping>> {
    (0..slot_count)
        .map(|slot| {
            consolidated
                .iter()
                .filter(|m| m.source_unit_indices.contains(&slot))
                .cloned()
                .collect()
        })
        .collect()
}

pub fn dedupe_variations(variations: impl IntoIterator<Item = Variation>) -> Vec<Variation> {
    let mut seen = HashSet::new();
    variations
        .into_iter()
        .filter(|v| seen.insert((fold(&v.variation_type), fold(&v.description))))
        .collect()
}

pub fn dedupe_elaborations(elaborations: impl IntoIterator<Item = Elaboration>) -> Vec<Elaboration> {
    let mut seen = HashSet::new();
    elaborations
        .into_iter()
        .filter(|e| seen.insert((fold(&e.topic), fold(&e.content))))
        .collect()
}

/// Batch-wide result of consolidation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consolidated {
    pub mappings: Vec<Mapping>,
    pub variations: Vec<Variation>,
    pub elaborations: Vec<Elaboration>,
    /// Summaries of successful slots, in slot order
    pub summaries: Vec<String>,
    /// Consolidated mappings per slot
    pub per_unit: Vec<Vec<Mapping>>,
}

/// Consolidate everything the successful slots of a batch produced.
pub fn consolidate_outcomes(outcomes: &[UnitOutcome]) -> Consolidated {
    let units: Vec<&AnalysisUnit> = outcomes.iter().filter_map(UnitOutcome::unit).collect();
    let mappings = consolidate(flatten(outcomes));
    Consolidated {
        per_unit: distribute(&mappings, outcomes.len()),
        variations: dedupe_variations(units.iter().flat_map(|u| u.variations.iter().cloned())),
        elaborations: dedupe_elaborations(
            units.iter().flat_map(|u| u.elaborations.iter().cloned()),
        ),
        summaries: units
            .iter()
            .filter_map(|u| u.summary.clone())
            .filter(|s| !s.trim().is_empty())
            .collect(),
        mappings,
    }
}
