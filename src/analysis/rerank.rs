//! Relevance ordering of consolidated mappings
//!
//! relevance = confidence
//!           + min(occurrence_bonus * (occurrences - 1), occurrence_cap)
//!           + one coordinate bonus: exact target > child of target > parent of target
//!
//! Only coordinate-typed mappings whose whole value is a coordinate earn
//! the coordinate bonus; a value that merely mentions one does not.
//!
//! The sort is stable and total: relevance descending, then raw
//! confidence descending, then input order.

use super::merger::MappingKind;
use super::types::Mapping;
use crate::coordinate::{parse_coordinate, Coordinate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankWeights {
    /// Added per repeat beyond the first occurrence
    pub occurrence_bonus: f64,
    pub occurrence_cap: f64,
    pub exact_target_bonus: f64,
    pub child_bonus: f64,
    pub parent_bonus: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            occurrence_bonus: 0.05,
            occurrence_cap: 0.2,
            exact_target_bonus: 0.3,
            child_bonus: 0.15,
            parent_bonus: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMapping {
    #[serde(flatten)]
    pub mapping: Mapping,
    pub relevance: f64,
}

/// Relevance of one mapping with respect to `target`.
pub fn relevance(mapping: &Mapping, target: Option<&Coordinate>, weights: &RerankWeights) -> f64 {
    let repeats = f64::from(mapping.occurrences.saturating_sub(1));
    let mut score =
        mapping.confidence_score + (weights.occurrence_bonus * repeats).min(weights.occurrence_cap);

    let coordinate = match MappingKind::of(&mapping.mapping_type) {
        MappingKind::Coordinate => parse_coordinate(&mapping.mapping_value),
        _ => None,
    };
    if let (Some(target), Some(coord)) = (target, coordinate) {
        if &coord == target {
            score += weights.exact_target_bonus;
        } else if coord.is_child_of(target) {
            score += weights.child_bonus;
        } else if coord.is_parent_of(target) {
            score += weights.parent_bonus;
        }
    }
    score
}

/// Score and order every mapping. Nothing is dropped.
pub fn rerank(
    mappings: Vec<Mapping>,
    target: Option<&Coordinate>,
    weights: &RerankWeights,
) -> Vec<RankedMapping> {
    let mut ranked: Vec<RankedMapping> = mappings
        .into_iter()
        .map(|mapping| RankedMapping {
            relevance: relevance(&mapping, target, weights),
            mapping,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.relevance
            .total_cmp(&a.relevance)
            .then_with(|| b.mapping.confidence_score.total_cmp(&a.mapping.confidence_score))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(value: &str, confidence: f64) -> Mapping {
        Mapping::new("Coordinate", value).with_confidence(confidence)
    }

    #[test]
    fn target_proximity_orders_equal_confidence() {
        let target = Coordinate::new("#4-0");
        let ranked = rerank(
            vec![
                mapping("#9", 0.5),
                mapping("#4", 0.5),
                mapping("#4-0-1", 0.5),
                mapping("#4.0", 0.5),
            ],
            Some(&target),
            &RerankWeights::default(),
        );
        let order: Vec<&str> = ranked.iter().map(|r| r.mapping.mapping_value.as_str()).collect();
        assert_eq!(order, vec!["#4.0", "#4-0-1", "#4", "#9"]);
    }

    #[test]
    fn only_whole_coordinate_values_earn_proximity_bonus() {
        let target = Coordinate::new("#4-0");
        let weights = RerankWeights::default();
        let exact = relevance(&mapping("#4.0", 0.5), Some(&target), &weights);
        assert!((exact - 0.8).abs() < 1e-9);

        for unrelated in [
            mapping("section #4-0 contrasts", 0.5),
            mapping("#4-0-9", 0.5),
            Mapping::new("Concept", "#4-0").with_confidence(0.5),
            Mapping::new("Concept", "Harmony").with_confidence(0.5),
        ] {
            let score = relevance(&unrelated, Some(&target), &weights);
            assert!(
                (score - 0.5).abs() < 1e-9,
                "{:?} scored {score}",
                unrelated.mapping_value
            );
        }
    }

    #[test]
    fn occurrence_bonus_is_capped() {
        let mut frequent = Mapping::new("Concept", "Harmony").with_confidence(0.5);
        frequent.occurrences = 50;
        let score = relevance(&frequent, None, &RerankWeights::default());
        assert!((score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn ties_break_on_confidence_then_input_order() {
        let mut repeated = Mapping::new("Concept", "A").with_confidence(0.25);
        repeated.occurrences = 2;
        let weights = RerankWeights {
            occurrence_bonus: 0.25,
            occurrence_cap: 1.0,
            ..RerankWeights::default()
        };
        let ranked = rerank(
            vec![
                Mapping::new("Concept", "B").with_confidence(0.5),
                repeated,
                Mapping::new("Concept", "C").with_confidence(0.5),
            ],
            None,
            &weights,
        );
        assert!(ranked.iter().all(|r| r.relevance == 0.5));
        let order: Vec<&str> = ranked.iter().map(|r| r.mapping.mapping_value.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
    }

    #[test]
    fn reranking_keeps_every_mapping() {
        let input: Vec<Mapping> = (0..20)
            .map(|i| {
                Mapping::new("Concept", format!("c{i}")).with_confidence(f64::from(i % 4) / 4.0)
            })
            .collect();
        let ranked = rerank(input.clone(), None, &RerankWeights::default());
        assert_eq!(ranked.len(), input.len());
        for pair in ranked.windows(2) {
            assert!(pair[0].relevance >= pair[1].relevance);
        }
    }
}
