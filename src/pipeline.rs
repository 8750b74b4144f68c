//! AnalysisPipeline: one document from raw graph snapshot to published synthesis
//!
//! Stages, in order:
//! 1. resolve the document text (inline, or through the document cache)
//! 2. return a cached result when allowed
//! 3. transform the graph snapshot into a coordinate map (never fatal)
//! 4. chunk, then analyze every unit with its context window
//! 5. write per-unit outcomes to the result cache
//! 6. consolidate, synthesize, rerank
//! 7. publish, update the source document, cache the final result
//!
//! The coordinate map is built once per run and shared read-only.
//! Outcomes are cached before any document-level error is returned, so a
//! retry resumes with the slots that already succeeded.

use crate::analysis::{
    consolidate_outcomes, rerank, AnalysisOrchestrator, Elaboration, Mapping, RankedMapping,
    UnitOutcome, Variation,
};
use crate::cache::{Caches, TwoTierCache};
use crate::config::PipelineConfig;
use crate::context::{ContextBuilder, ProjectContext};
use crate::coordinate::Coordinate;
use crate::document::{Chunker, DocumentGateway};
use crate::graph::{transform_value, MapSummary, TransformReport};
use crate::llm::CompletionClient;
use crate::store::{DocumentStore, GraphQuery, PublishTarget, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Document fields that may hold the text to analyze
const CONTENT_FIELDS: &[&str] = &["content", "text", "body"];

/// Mappings listed in the published content
const PUBLISHED_MAPPINGS: usize = 10;

/// Document-level failures
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document has no content to analyze")]
    NoContent,

    #[error("completion backend unavailable: {reason}")]
    CompletionUnavailable {
        reason: String,
        /// Cache key holding the per-unit outcomes of the failed run
        units_key: String,
    },

    #[error("all {failed} units failed")]
    AllUnitsFailed { failed: usize, units_key: String },

    #[error("document store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Stable reason code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::NoContent => "no_content",
            PipelineError::CompletionUnavailable { .. } => "completion_unavailable",
            PipelineError::AllUnitsFailed { .. } => "all_units_failed",
            PipelineError::Store(_) => "document_unavailable",
        }
    }
}

/// One analysis run
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    /// Source document; its text is fetched when `content` is absent
    pub document_id: Option<String>,
    pub content: Option<String>,
    pub target: Option<Coordinate>,
    /// Graph snapshot, `{nodes: [...], relationships: [...]}`
    pub raw_graph: Value,
    pub project: ProjectContext,
    /// Page the synthesis is appended to
    pub publish_target: Option<String>,
    /// Return a cached final result without calling the backend
    pub reuse_cached: bool,
}

impl AnalysisRequest {
    pub fn for_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn for_document(id: impl Into<String>) -> Self {
        Self {
            document_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: Coordinate) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_graph(mut self, raw_graph: Value) -> Self {
        self.raw_graph = raw_graph;
        self
    }

    pub fn with_project(mut self, project: ProjectContext) -> Self {
        self.project = project;
        self
    }

    pub fn with_publish_target(mut self, target: impl Into<String>) -> Self {
        self.publish_target = Some(target.into());
        self
    }

    pub fn reuse_cached(mut self, reuse: bool) -> Self {
        self.reuse_cached = reuse;
        self
    }
}

/// How much of the batch succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Partial { failed_units: Vec<usize> },
}

/// Keys under which a run's state is cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKeys {
    pub units: String,
    pub result: String,
}

impl CacheKeys {
    pub fn for_run(run_key: &str) -> Self {
        Self {
            units: format!("analysis:{}:units", run_key),
            result: format!("analysis:{}:result", run_key),
        }
    }
}

/// Content handed to the publish target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub content: String,
}

/// Result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub run_key: String,
    pub status: RunStatus,
    pub target: Option<Coordinate>,
    /// Consolidated mappings, most relevant first
    pub mappings: Vec<RankedMapping>,
    pub variations: Vec<Variation>,
    pub elaborations: Vec<Elaboration>,
    pub synthesis: String,
    /// Consolidated mappings per slot
    pub per_unit: Vec<Vec<Mapping>>,
    pub outcomes: Vec<UnitOutcome>,
    pub cache_keys: CacheKeys,
    pub map: MapSummary,
    pub transform: TransformReport,
    /// Non-fatal problems met along the way
    pub warnings: Vec<String>,
    #[serde(rename = "publishPayload")]
    pub publish_payload: PublishPayload,
    /// Served from the result cache
    #[serde(default)]
    pub from_cache: bool,
}

impl AnalysisReport {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}

/// Deterministic key for one document text analyzed against one target.
///
/// The text is always part of the key, so an edited document starts a
/// new run instead of resuming from outcomes of its previous text.
pub fn run_key(document_id: Option<&str>, content: &str, target: Option<&Coordinate>) -> String {
    let identity = match document_id {
        Some(id) => format!("id:{}", id),
        None => "inline".to_string(),
    };
    let name = format!(
        "{}\u{0}{}\u{0}{}",
        identity,
        content,
        target.map(Coordinate::as_str).unwrap_or("")
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Runs documents through analysis
pub struct AnalysisPipeline {
    client: Arc<dyn CompletionClient>,
    orchestrator: AnalysisOrchestrator,
    caches: Caches,
    documents: Option<DocumentGateway>,
    graph: Option<Arc<dyn GraphQuery>>,
    publisher: Option<Arc<dyn PublishTarget>>,
    config: PipelineConfig,
}

impl AnalysisPipeline {
    pub fn new(client: Arc<dyn CompletionClient>, caches: Caches) -> Self {
        let config = PipelineConfig::default();
        Self {
            orchestrator: AnalysisOrchestrator::new(client.clone())
                .with_settings(config.analysis.clone()),
            client,
            caches,
            documents: None,
            graph: None,
            publisher: None,
            config,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.orchestrator =
            AnalysisOrchestrator::new(self.client.clone()).with_settings(config.analysis.clone());
        self.config = config;
        self
    }

    pub fn with_document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(DocumentGateway::new(store, self.caches.documents.clone()));
        self
    }

    /// Graph store for comprehensive-context lookups.
    pub fn with_graph(mut self, graph: Arc<dyn GraphQuery>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn PublishTarget>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub async fn run_analysis(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisReport, PipelineError> {
        let content = self.resolve_content(&request).await?;
        let key = run_key(
            request.document_id.as_deref(),
            &content,
            request.target.as_ref(),
        );
        let keys = CacheKeys::for_run(&key);
        let results = &self.caches.results;

        if request.reuse_cached {
            if let Some(mut report) = read_json::<AnalysisReport>(results, &keys.result).await {
                info!(run = %key, "returning cached analysis");
                report.from_cache = true;
                return Ok(report);
            }
        }

        let map = Arc::new(transform_value(&request.raw_graph));
        let summary = map.summary().clone();
        let transform = map.report().clone();
        debug!(
            run = %key,
            nodes = summary.node_count,
            dropped_edges = transform.dropped_edges,
            "coordinate map built"
        );

        let units = Chunker::new(self.config.chunking.max_chars).chunk(&content);
        if units.is_empty() {
            return Err(PipelineError::NoContent);
        }

        let mut contexts = ContextBuilder::new(map, request.project.clone())
            .with_limits(self.config.context.clone());
        if let Some(graph) = &self.graph {
            contexts = contexts.with_graph(graph.clone());
        }

        let previous = read_json::<Vec<UnitOutcome>>(results, &keys.units).await;
        if previous.is_some() {
            debug!(run = %key, "resuming from cached unit outcomes");
        }
        let batch = self
            .orchestrator
            .analyze(
                &units,
                &contexts,
                request.target.as_ref(),
                previous.as_deref(),
            )
            .await;
        let outcomes = batch.outcomes();
        write_json(results, &keys.units, &outcomes).await;

        if batch.success_count() == 0 {
            let failed = outcomes.len();
            if batch.backend_unavailable() {
                let reason = batch
                    .completion_errors
                    .last()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                return Err(PipelineError::CompletionUnavailable {
                    reason,
                    units_key: keys.units,
                });
            }
            return Err(PipelineError::AllUnitsFailed {
                failed,
                units_key: keys.units,
            });
        }

        let mut warnings = Vec::new();
        let failed_units = batch.failed_indices();
        if !failed_units.is_empty() {
            warnings.push(format!("{} of {} units failed", failed_units.len(), outcomes.len()));
        }

        let consolidated = consolidate_outcomes(&outcomes);
        let synthesis = self
            .synthesize(&request, &consolidated.mappings, &consolidated.summaries, &mut warnings)
            .await;
        let mappings = rerank(
            consolidated.mappings,
            request.target.as_ref(),
            &self.config.rerank,
        );

        let publish_payload = PublishPayload {
            target_id: request.publish_target.clone(),
            content: render_publication(&synthesis, &mappings),
        };
        self.publish(&publish_payload, &mut warnings).await;

        let status = if failed_units.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Partial { failed_units }
        };

        if let (Some(id), Some(gateway)) = (&request.document_id, &self.documents) {
            let partial = json!({
                "analysis.runKey": key,
                "analysis.status": status,
                "analysis.synthesis": synthesis,
                "analysis.mappingCount": mappings.len(),
                "analysis.updatedAt": Utc::now().to_rfc3339(),
            });
            let report = gateway.update(id, &partial).await;
            if !report.succeeded() {
                warnings.push(format!("document '{}' could not be updated", id));
            }
        }

        let report = AnalysisReport {
            run_key: key,
            status,
            target: request.target.clone(),
            mappings,
            variations: consolidated.variations,
            elaborations: consolidated.elaborations,
            synthesis,
            per_unit: consolidated.per_unit,
            outcomes,
            cache_keys: keys,
            map: summary,
            transform,
            warnings,
            publish_payload,
            from_cache: false,
        };
        write_json(results, &report.cache_keys.result, &report).await;
        info!(
            run = %report.run_key,
            mappings = report.mappings.len(),
            complete = report.is_complete(),
            "analysis finished"
        );
        Ok(report)
    }

    async fn resolve_content(&self, request: &AnalysisRequest) -> Result<String, PipelineError> {
        if let Some(content) = request.content.as_deref().filter(|c| !c.trim().is_empty()) {
            return Ok(content.to_string());
        }
        let (Some(id), Some(gateway)) = (&request.document_id, &self.documents) else {
            return Err(PipelineError::NoContent);
        };
        let document = gateway.get(id).await?.ok_or(PipelineError::NoContent)?;
        CONTENT_FIELDS
            .iter()
            .find_map(|f| document.get(*f).and_then(Value::as_str))
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .ok_or(PipelineError::NoContent)
    }

    async fn synthesize(
        &self,
        request: &AnalysisRequest,
        mappings: &[Mapping],
        summaries: &[String],
        warnings: &mut Vec<String>,
    ) -> String {
        let prompt = self.orchestrator.prompts().synthesis_prompt(
            request.target.as_ref().map(Coordinate::as_str),
            mappings,
            summaries,
        );
        match self.orchestrator.synthesize(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("synthesis came back empty, using unit summaries");
                warnings.push("synthesis was empty; unit summaries used instead".to_string());
                summaries.join("\n\n")
            }
            Err(e) => {
                warn!(error = %e, "synthesis failed, using unit summaries");
                warnings.push(format!("synthesis failed: {}", e));
                summaries.join("\n\n")
            }
        }
    }

    async fn publish(&self, payload: &PublishPayload, warnings: &mut Vec<String>) {
        let (Some(target), Some(publisher)) = (&payload.target_id, &self.publisher) else {
            return;
        };
        if let Err(e) = publisher.append_content(target, &payload.content).await {
            warn!(target = %target, error = %e, "publish failed");
            warnings.push(format!("publish to '{}' failed: {}", target, e));
        }
    }
}

/// Text appended to the publish target.
pub fn render_publication(synthesis: &str, mappings: &[RankedMapping]) -> String {
    let mut out = String::new();
    out.push_str("## Synthesis\n\n");
    out.push_str(synthesis);
    out.push('\n');
    if !mappings.is_empty() {
        out.push_str("\n## Key mappings\n\n");
        for ranked in mappings.iter().take(PUBLISHED_MAPPINGS) {
            let m = &ranked.mapping;
            let _ = writeln!(
                out,
                "- {}: {} ({:.2})",
                m.mapping_type, m.mapping_value, ranked.relevance
            );
        }
    }
    out
}

async fn read_json<T: serde::de::DeserializeOwned>(cache: &TwoTierCache, key: &str) -> Option<T> {
    let value = cache.get(key).await?;
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(cache = %cache.name(), key, error = %e, "cached entry unreadable, ignoring");
            None
        }
    }
}

async fn write_json<T: Serialize>(cache: &TwoTierCache, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(payload) => cache.set(key, payload).await,
        Err(e) => warn!(cache = %cache.name(), key, error = %e, "failed to serialize cache entry"),
    }
}
