//! ContextBuilder: assembles a context window for one text unit
//!
//! Both entry points share focus resolution: an explicit target wins,
//! then the first coordinate mentioned in the text, then none (whole-map
//! context). The lightweight path never leaves the map. The comprehensive
//! path may call the graph store for domain operators; when that call
//! fails the window is returned with what was already gathered and the
//! failure is recorded in `degraded`.

use super::truncate::preview;
use super::window::{
    ComprehensiveContext, ContextDepth, ContextWindow, DomainOperator, HierarchyEntry,
    LightweightContext, NodeSummary, ProjectContext, ProjectSummary, RelevantNodes,
};
use crate::coordinate::{self, Coordinate};
use crate::graph::{CoordinateMap, Node, NodeId, Relationship, DEFAULT_RELATIONSHIP};
use crate::store::{GraphQuery, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Query pattern sent to the graph store for domain-operator lookups
pub const DOMAIN_OPERATOR_PATTERN: &str =
    "MATCH (n {coordinate: $coordinate})-[r]-(op:$label) RETURN n, r, op";

/// Names shorter than this are not matched against chunk text
const MIN_NAME_MENTION_CHARS: usize = 3;

/// Errors during context enrichment. Never fatal to a run.
#[derive(Debug, Error)]
pub enum ContextBuildError {
    #[error("graph query failed: {0}")]
    GraphQuery(#[from] StoreError),
}

/// Size limits applied while building windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLimits {
    /// Characters of chunk text kept as the preview
    pub preview_chars: usize,
    pub document_summary_chars: usize,
    /// Characters of each node description
    pub description_chars: usize,
    /// Levels of hierarchy in the lightweight slice
    pub hierarchy_depth: usize,
    pub max_siblings: usize,
    pub max_relationships: usize,
    /// Node type/label that marks a domain operator
    pub operator_label: String,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            preview_chars: 400,
            document_summary_chars: 800,
            description_chars: 280,
            hierarchy_depth: 2,
            max_siblings: 12,
            max_relationships: 24,
            operator_label: "Operator".to_string(),
        }
    }
}

/// Builds context windows against one immutable coordinate map
pub struct ContextBuilder {
    map: Arc<CoordinateMap>,
    project: ProjectContext,
    limits: ContextLimits,
    graph: Option<Arc<dyn GraphQuery>>,
}

impl ContextBuilder {
    pub fn new(map: Arc<CoordinateMap>, project: ProjectContext) -> Self {
        Self {
            map,
            project,
            limits: ContextLimits::default(),
            graph: None,
        }
    }

    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Graph store used for domain-operator lookups.
    pub fn with_graph(mut self, graph: Arc<dyn GraphQuery>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn map(&self) -> &CoordinateMap {
        &self.map
    }

    pub fn limits(&self) -> &ContextLimits {
        &self.limits
    }

    /// Focus coordinate for `text`: `target`, else the first mention, else none.
    pub fn resolve_focus(&self, text: &str, target: Option<&Coordinate>) -> Option<Coordinate> {
        target
            .cloned()
            .or_else(|| coordinate::first_coordinate(text))
    }

    /// Build a window of the requested depth.
    pub async fn build(
        &self,
        text: &str,
        target: Option<&Coordinate>,
        depth: ContextDepth,
    ) -> ContextWindow {
        match depth {
            ContextDepth::Lightweight => ContextWindow::Lightweight(self.lightweight(text, target)),
            ContextDepth::Comprehensive => {
                ContextWindow::Comprehensive(self.comprehensive(text, target).await)
            }
        }
    }

    /// Preview, summaries and a shallow hierarchy slice around the focus.
    pub fn lightweight(&self, text: &str, target: Option<&Coordinate>) -> LightweightContext {
        let focus = self.resolve_focus(text, target);
        let structure = self.map.structure();
        let anchor = focus
            .as_ref()
            .and_then(|f| f.parent().or_else(|| Some(f.clone())))
            .and_then(|c| structure.find(&c))
            .unwrap_or(structure);

        LightweightContext {
            chunk_summary: preview(text, self.limits.preview_chars),
            document_summary: self.document_summary(),
            project_summary: self.project_line(),
            hierarchy: HierarchyEntry::flatten(&anchor.slice(self.limits.hierarchy_depth)),
            focus,
        }
    }

    /// Relevant nodes, their relationships, the project overview and
    /// domain operators for the focus.
    pub async fn comprehensive(
        &self,
        text: &str,
        target: Option<&Coordinate>,
    ) -> ComprehensiveContext {
        let focus = self.resolve_focus(text, target);
        let relevant_nodes = self.relevant_nodes(text, focus.as_ref());
        let relationships = self.relationships_among(&relevant_nodes);

        let mut degraded = Vec::new();
        let domain_operator_context = match &focus {
            Some(f) => self.domain_operators(f, &mut degraded).await,
            None => Vec::new(),
        };

        debug!(
            focus = ?focus.as_ref().map(|f| f.as_str()),
            direct = relevant_nodes.direct.len(),
            parents = relevant_nodes.parents.len(),
            siblings = relevant_nodes.siblings.len(),
            relationships = relationships.len(),
            operators = domain_operator_context.len(),
            degraded = degraded.len(),
            "comprehensive context built"
        );

        ComprehensiveContext {
            focus,
            chunk_summary: preview(text, self.limits.preview_chars),
            document_summary: self.document_summary(),
            relevant_nodes,
            relationships,
            project_context: self.project_summary(),
            domain_operator_context,
            degraded,
        }
    }

    fn summarize(&self, node: &Node) -> NodeSummary {
        NodeSummary::from_node(node, self.limits.description_chars)
    }

    fn document_summary(&self) -> String {
        preview(&self.project.document_summary, self.limits.document_summary_chars)
    }

    fn project_line(&self) -> String {
        let description = preview(&self.project.description, self.limits.document_summary_chars);
        match (self.project.name.is_empty(), description.is_empty()) {
            (_, true) => self.project.name.clone(),
            (true, false) => description,
            (false, false) => format!("{}: {}", self.project.name, description),
        }
    }

    fn project_summary(&self) -> ProjectSummary {
        let summary = self.map.summary();
        ProjectSummary {
            name: self.project.name.clone(),
            description: preview(&self.project.description, self.limits.document_summary_chars),
            node_count: summary.node_count,
            relationship_count: summary.relationship_count,
            roots: self
                .map
                .roots()
                .iter()
                .filter_map(|r| self.map.node(&r.id))
                .map(|n| self.summarize(n))
                .collect(),
        }
    }

    /// Direct mentions, the focus parent and its siblings, each
    /// deduplicated by coordinate and never repeated across lists.
    fn relevant_nodes(&self, text: &str, focus: Option<&Coordinate>) -> RelevantNodes {
        let mut seen: HashSet<String> = HashSet::new();
        let mut push = |list: &mut Vec<NodeSummary>, node: &Node| {
            let summary = self.summarize(node);
            if seen.insert(summary.dedupe_key()) {
                list.push(summary);
            }
        };

        let mut relevant = RelevantNodes::default();

        if let Some(node) = focus.and_then(|f| self.map.node_at(f)) {
            push(&mut relevant.direct, node);
        }
        for mention in coordinate::find_coordinates(text) {
            if let Some(node) = self.map.node_at(&mention) {
                push(&mut relevant.direct, node);
            }
        }
        let lowered = text.to_lowercase();
        for node in self.map.nodes() {
            if node.name.chars().count() >= MIN_NAME_MENTION_CHARS
                && mentions_name(&lowered, &node.name.to_lowercase())
            {
                push(&mut relevant.direct, node);
            }
        }

        let Some(focus) = focus else {
            return relevant;
        };
        if let Some(parent) = self.map.parent_of(focus) {
            push(&mut relevant.parents, parent);
        }
        for sibling in self.map.siblings(focus) {
            if relevant.siblings.len() >= self.limits.max_siblings {
                break;
            }
            push(&mut relevant.siblings, sibling);
        }
        relevant
    }

    fn relationships_among(&self, relevant: &RelevantNodes) -> Vec<Relationship> {
        let mut seen: HashSet<&Relationship> = HashSet::new();
        let mut out = Vec::new();
        for summary in relevant.all() {
            for rel in self.map.relationships_for(&summary.id) {
                if out.len() >= self.limits.max_relationships {
                    return out;
                }
                if seen.insert(rel) {
                    out.push(rel.clone());
                }
            }
        }
        out
    }

    /// Operators adjacent to the focus in the map, plus those the graph
    /// store reports. A store failure is logged and recorded, not raised.
    async fn domain_operators(
        &self,
        focus: &Coordinate,
        degraded: &mut Vec<String>,
    ) -> Vec<DomainOperator> {
        let label = self.limits.operator_label.as_str();
        let mut operators: Vec<DomainOperator> = Vec::new();
        let mut names: HashSet<String> = HashSet::new();
        let mut add = |op: DomainOperator| {
            if names.insert(op.name.to_lowercase()) {
                operators.push(op);
            }
        };

        let focus_id: Option<NodeId> = self.map.node_at(focus).map(|n| n.id.clone());
        if let Some(id) = &focus_id {
            for rel in self.map.relationships_for(id) {
                let Some(other) = rel.other_end(id).and_then(|r| self.map.node(&r.id)) else {
                    continue;
                };
                if other.node_type.eq_ignore_ascii_case(label) {
                    add(DomainOperator {
                        name: other.name.clone(),
                        description: preview(&other.description, self.limits.description_chars),
                        relationship: rel.relationship_type.clone(),
                    });
                }
            }
        }

        let Some(graph) = &self.graph else {
            return operators;
        };
        let params = json!({ "coordinate": focus.as_str(), "label": label });
        match graph.query(DOMAIN_OPERATOR_PATTERN, &params).await {
            Ok(raw) => {
                for node in &raw.nodes {
                    if node.coordinate().map(Coordinate::new).as_ref() == Some(focus) {
                        continue;
                    }
                    let Some(name) = node.name().or_else(|| node.id_string()) else {
                        continue;
                    };
                    let id = node.id_string();
                    let relationship = raw
                        .all_edges()
                        .find(|e| id.is_some() && (e.source_id() == id || e.target_id() == id))
                        .and_then(|e| e.relationship_type())
                        .unwrap_or_else(|| DEFAULT_RELATIONSHIP.to_string());
                    add(DomainOperator {
                        name,
                        description: preview(
                            &node.description().unwrap_or_default(),
                            self.limits.description_chars,
                        ),
                        relationship,
                    });
                }
            }
            Err(e) => {
                let err = ContextBuildError::from(e);
                warn!(coordinate = %focus, error = %err, "domain operator lookup failed, continuing with partial context");
                degraded.push(format!("domain operators: {}", err));
            }
        }
        operators
    }
}

/// Whether `needle` occurs in `haystack` on word boundaries. Both lowercased.
fn mentions_name(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before = haystack[..begin].chars().next_back();
        let after = haystack[end..].chars().next();
        if before.map_or(true, |c| !c.is_alphanumeric()) && after.map_or(true, |c| !c.is_alphanumeric()) {
            return true;
        }
        start = begin + needle.chars().next().map_or(1, char::len_utf8);
    }
    false
}
