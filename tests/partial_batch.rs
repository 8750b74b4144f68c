//! Grouped analysis when the backend returns fewer entries than asked for

mod common;

use common::{five_section_document, test_config, ScriptedAnalyst};
use meridian::analysis::{AnalysisMode, FailureKind, MISSING_ANALYSIS};
use meridian::cache::Caches;
use meridian::pipeline::{AnalysisPipeline, AnalysisRequest, RunStatus};
use std::sync::Arc;

#[tokio::test]
async fn short_group_answer_pads_missing_slots() {
    let analyst = Arc::new(ScriptedAnalyst::new().with_group_limit(3));
    let pipeline = AnalysisPipeline::new(analyst.clone(), Caches::in_memory())
        .with_config(test_config(AnalysisMode::Grouped { group_size: 5 }));

    let report = pipeline
        .run_analysis(AnalysisRequest::for_content(five_section_document()))
        .await
        .unwrap();

    assert_eq!(analyst.call_count(), 2, "one grouped call plus synthesis");
    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(
        report.status,
        RunStatus::Partial {
            failed_units: vec![3, 4]
        }
    );
    for slot in [3, 4] {
        let failure = report.outcomes[slot].failure().unwrap();
        assert_eq!(failure.kind, FailureKind::MissingAnalysis);
        assert_eq!(failure.error, MISSING_ANALYSIS);
    }

    let values: Vec<&str> = report
        .mappings
        .iter()
        .map(|r| r.mapping.mapping_value.as_str())
        .collect();
    assert_eq!(values.len(), 3);
    for expected in ["Alpha", "Beta", "Gamma"] {
        assert!(values.contains(&expected), "{expected} missing from {values:?}");
    }
    assert!(report.per_unit[3].is_empty() && report.per_unit[4].is_empty());
    assert!(!report.warnings.is_empty());
}

#[tokio::test]
async fn groups_are_sized_by_configuration() {
    let analyst = Arc::new(ScriptedAnalyst::new());
    let pipeline = AnalysisPipeline::new(analyst.clone(), Caches::in_memory())
        .with_config(test_config(AnalysisMode::Grouped { group_size: 2 }));

    let report = pipeline
        .run_analysis(AnalysisRequest::for_content(five_section_document()))
        .await
        .unwrap();

    assert!(report.is_complete());
    // 2 + 2 + 1 units, then synthesis
    assert_eq!(analyst.call_count(), 4);
    assert_eq!(report.mappings.len(), 5);
    for (slot, unit) in report.per_unit.iter().enumerate() {
        assert_eq!(unit.len(), 1);
        assert_eq!(unit[0].source_unit_indices, vec![slot]);
    }
}

#[tokio::test]
async fn single_unit_mode_analyzes_the_batch_at_once() {
    let analyst = Arc::new(ScriptedAnalyst::new());
    let pipeline = AnalysisPipeline::new(analyst.clone(), Caches::in_memory())
        .with_config(test_config(AnalysisMode::SingleUnit));

    let report = pipeline
        .run_analysis(AnalysisRequest::for_content(five_section_document()))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(analyst.call_count(), 2);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.mappings.len(), 5);
}
