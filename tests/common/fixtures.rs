//! Graph snapshots, documents and configuration shared by the tests

use meridian::analysis::{AnalysisMode, AnalysisSettings};
use meridian::config::{CacheBackend, PipelineConfig};
use serde_json::{json, Value};

/// Store-export snapshot: a root, two principles under `#4`, concepts at
/// mixed `.`/`-` notation and one domain operator.
pub fn music_graph() -> Value {
    json!({
        "nodes": [
            {"id": 0, "labels": ["Root"], "properties": {"coordinate": "#", "name": "Music"}},
            {"id": 1, "labels": ["Principle"], "properties": {"coordinate": "#4", "name": "Form"}},
            {"id": 2, "labels": ["Principle"], "properties": {"coordinate": "#4.0", "name": "Structure",
                "description": "How a piece is organised over time."}},
            {"id": 3, "labels": ["Concept"], "properties": {"coordinate": "#4-0-1", "name": "Harmony",
                "description": "Simultaneous pitches heard as a whole."}},
            {"id": 4, "labels": ["Concept"], "properties": {"coordinate": "#4.0.2", "name": "Rhythm"}},
            {"id": 5, "labels": ["Operator"], "properties": {"name": "Resolve",
                "description": "Moves tension toward rest."}}
        ],
        "relationships": [
            {"source": 3, "target": 4, "type": "SUPPORTS"},
            {"source": 5, "target": 3, "type": "OPERATES_ON"},
            {"source": 3, "target": 99, "type": "DANGLING"}
        ]
    })
}

/// Three sections; **Harmony** appears in two of them.
pub fn sectioned_document() -> String {
    [
        "# Opening",
        "",
        "The piece begins with **Harmony** in the strings, anchored at #4.0-1.",
        "",
        "# Development",
        "",
        "A driving **Rhythm** takes over while **Harmony** thins out.",
        "",
        "# Close",
        "",
        "Everything settles into a quiet **Cadence**.",
    ]
    .join("\n")
}

/// Five sections, one concept each.
pub fn five_section_document() -> String {
    ["Alpha", "Beta", "Gamma", "Delta", "Epsilon"]
        .iter()
        .map(|name| format!("# Part {name}\n\nThis part is about **{name}**."))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Defaults with a memory cache and no retry delay.
pub fn test_config(mode: AnalysisMode) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.analysis = AnalysisSettings {
        mode,
        retry_backoff_ms: 1,
        ..AnalysisSettings::default()
    };
    config.cache.backend = CacheBackend::Memory;
    config
}
