//! End-to-end runs of the analysis pipeline against the scripted analyst

mod common;

use common::{music_graph, scripted::SYNTHESIS, sectioned_document, test_config, ScriptedAnalyst};
use meridian::analysis::AnalysisMode;
use meridian::cache::Caches;
use meridian::context::{ContextDepth, ProjectContext};
use meridian::coordinate::Coordinate;
use meridian::graph::parse_raw_graph;
use meridian::pipeline::{AnalysisPipeline, AnalysisRequest, PipelineError};
use meridian::store::{InMemoryGraph, MemoryDocumentStore, RecordingPublisher};
use serde_json::json;
use std::sync::Arc;

fn request() -> AnalysisRequest {
    AnalysisRequest::for_content(sectioned_document())
        .with_graph(music_graph())
        .with_project(ProjectContext::new("Sonata study"))
        .with_target(Coordinate::new("#4-0"))
}

#[tokio::test]
async fn per_chunk_run_consolidates_and_ranks() {
    let analyst = Arc::new(ScriptedAnalyst::new());
    let caches = Caches::in_memory();
    let pipeline = AnalysisPipeline::new(analyst.clone(), caches.clone())
        .with_config(test_config(AnalysisMode::PerChunk));

    let report = pipeline.run_analysis(request()).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(analyst.call_count(), 4, "three units plus synthesis");
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.synthesis, SYNTHESIS);
    assert_eq!(report.transform.dropped_edges, 1);

    let harmony = report
        .mappings
        .iter()
        .find(|r| r.mapping.mapping_value == "Harmony")
        .unwrap();
    assert_eq!(harmony.mapping.occurrences, 2);
    assert_eq!(harmony.mapping.source_unit_indices, vec![0, 1]);
    assert!((harmony.mapping.confidence_score - 0.8).abs() < 1e-9);

    // `#4-0-1` is a child of the target
    let coordinate = report
        .mappings
        .iter()
        .find(|r| r.mapping.mapping_type == "Coordinate")
        .unwrap();
    assert_eq!(coordinate.mapping.mapping_value, "#4-0-1");
    assert!((coordinate.relevance - 0.75).abs() < 1e-9);

    for pair in report.mappings.windows(2) {
        assert!(pair[0].relevance >= pair[1].relevance);
    }

    assert_eq!(report.per_unit.len(), 3);
    let last: Vec<&str> = report.per_unit[2]
        .iter()
        .map(|m| m.mapping_value.as_str())
        .collect();
    assert_eq!(last, vec!["Cadence"]);

    assert!(caches.results.get(&report.cache_keys.units).await.is_some());
    assert!(caches.results.get(&report.cache_keys.result).await.is_some());
}

#[tokio::test]
async fn document_is_read_published_and_updated() {
    let store = Arc::new(MemoryDocumentStore::new().with_document(
        "doc-1",
        json!({"title": "Sonata", "content": sectioned_document()}),
    ));
    let publisher = Arc::new(RecordingPublisher::new());
    let caches = Caches::in_memory();
    let pipeline = AnalysisPipeline::new(Arc::new(ScriptedAnalyst::new()), caches.clone())
        .with_config(test_config(AnalysisMode::PerChunk))
        .with_document_store(store.clone())
        .with_publisher(publisher.clone());

    let report = pipeline
        .run_analysis(
            AnalysisRequest::for_document("doc-1")
                .with_graph(music_graph())
                .with_publish_target("page-9"),
        )
        .await
        .unwrap();

    let appended = publisher.appended();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].0, "page-9");
    assert!(appended[0].1.contains(SYNTHESIS));

    let stored = store.snapshot("doc-1").unwrap();
    assert_eq!(stored["title"], json!("Sonata"));
    assert_eq!(stored["analysis"]["runKey"], json!(report.run_key));
    assert_eq!(stored["analysis"]["synthesis"], json!(SYNTHESIS));
    assert!(caches.documents.contains_in_memory("doc:doc-1"));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[tokio::test]
async fn publish_failure_is_only_a_warning() {
    let pipeline = AnalysisPipeline::new(Arc::new(ScriptedAnalyst::new()), Caches::in_memory())
        .with_config(test_config(AnalysisMode::PerChunk))
        .with_publisher(Arc::new(RecordingPublisher::failing()));

    let report = pipeline
        .run_analysis(request().with_publish_target("page-9"))
        .await
        .unwrap();

    assert!(report.is_complete());
    assert!(report.warnings.iter().any(|w| w.contains("publish")));
}

#[tokio::test]
async fn comprehensive_windows_reach_the_prompt() {
    let raw = parse_raw_graph(&music_graph()).unwrap();
    let analyst = Arc::new(ScriptedAnalyst::new());
    let mut config = test_config(AnalysisMode::PerChunk);
    config.analysis.depth = ContextDepth::Comprehensive;
    let pipeline = AnalysisPipeline::new(analyst.clone(), Caches::in_memory())
        .with_config(config)
        .with_graph(Arc::new(InMemoryGraph::new(raw)));

    pipeline
        .run_analysis(request().with_target(Coordinate::new("#4.0-1")))
        .await
        .unwrap();

    let first = &analyst.prompts()[0];
    assert!(first.contains("Harmony"));
    assert!(first.contains("Resolve"), "domain operator missing:\n{first}");
}

#[tokio::test]
async fn unreachable_backend_fails_the_run_but_keeps_state() {
    let caches = Caches::in_memory();
    let pipeline = AnalysisPipeline::new(Arc::new(ScriptedAnalyst::unavailable()), caches.clone())
        .with_config(test_config(AnalysisMode::PerChunk));

    let err = pipeline.run_analysis(request()).await.unwrap_err();
    assert_eq!(err.code(), "completion_unavailable");

    let PipelineError::CompletionUnavailable { units_key, .. } = err else {
        panic!("unexpected error");
    };
    let cached = caches.results.get(&units_key).await.unwrap();
    let slots = cached.as_array().unwrap();
    assert_eq!(slots.len(), 3);
    assert!(slots.iter().all(|s| s["status"] == json!("failed")));
}

#[tokio::test]
async fn every_unit_unparseable_is_all_units_failed() {
    let analyst = ScriptedAnalyst::new().garbling("");
    let pipeline = AnalysisPipeline::new(Arc::new(analyst), Caches::in_memory())
        .with_config(test_config(AnalysisMode::PerChunk));

    let err = pipeline.run_analysis(request()).await.unwrap_err();
    assert_eq!(err.code(), "all_units_failed");
}
