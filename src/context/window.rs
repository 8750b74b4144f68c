//! Context window types
//!
//! A window is the background handed to the completion backend alongside
//! one text unit. Both variants are immutable once built.

use crate::coordinate::{Coordinate, Hierarchy};
use crate::graph::{Node, NodeId, Relationship};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use super::truncate::preview;

/// Project-level background supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub document_title: Option<String>,
    /// Summary of the whole document; the builder truncates it
    #[serde(default)]
    pub document_summary: String,
}

impl ProjectContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_document_summary(mut self, summary: impl Into<String>) -> Self {
        self.document_summary = summary.into();
        self
    }
}

/// How much context to assemble per unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextDepth {
    /// Preview, summaries and a shallow hierarchy slice
    #[default]
    Lightweight,
    /// Relevant nodes, relationships and domain operators
    Comprehensive,
}

/// A node as it appears inside a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub coordinate: Option<Coordinate>,
    pub name: String,
    pub node_type: String,
    pub description: String,
}

impl NodeSummary {
    pub fn from_node(node: &Node, description_chars: usize) -> Self {
        Self {
            id: node.id.clone(),
            coordinate: node.coordinate.clone(),
            name: node.name.clone(),
            node_type: node.node_type.clone(),
            description: preview(&node.description, description_chars),
        }
    }

    /// Coordinate when present, id otherwise.
    pub fn dedupe_key(&self) -> String {
        match &self.coordinate {
            Some(c) => c.to_string(),
            None => format!("id:{}", self.id),
        }
    }

    fn render_line(&self, out: &mut String) {
        let coord = self
            .coordinate
            .as_ref()
            .map(|c| format!("{} ", c))
            .unwrap_or_default();
        let _ = write!(out, "- {}{}", coord, self.name);
        if !self.node_type.is_empty() {
            let _ = write!(out, " [{}]", self.node_type);
        }
        if !self.description.is_empty() {
            let _ = write!(out, ": {}", self.description);
        }
        out.push('\n');
    }
}

/// One row of a flattened hierarchy slice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyEntry {
    pub coordinate: Coordinate,
    pub name: Option<String>,
    pub depth: usize,
}

impl HierarchyEntry {
    /// Flatten a tree, skipping the bare root.
    pub fn flatten(tree: &Hierarchy) -> Vec<HierarchyEntry> {
        tree.walk()
            .into_iter()
            .filter(|h| !(h.coordinate.is_root() && h.node_id.is_none()))
            .map(|h| HierarchyEntry {
                coordinate: h.coordinate.clone(),
                name: h.name.clone(),
                depth: h.coordinate.depth(),
            })
            .collect()
    }
}

/// Cheap per-chunk context for high-volume ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightweightContext {
    pub focus: Option<Coordinate>,
    pub chunk_summary: String,
    pub document_summary: String,
    pub project_summary: String,
    pub hierarchy: Vec<HierarchyEntry>,
}

/// Nodes relevant to the focus coordinate, each list deduplicated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevantNodes {
    pub direct: Vec<NodeSummary>,
    pub parents: Vec<NodeSummary>,
    pub siblings: Vec<NodeSummary>,
}

impl RelevantNodes {
    pub fn len(&self) -> usize {
        self.direct.len() + self.parents.len() + self.siblings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> impl Iterator<Item = &NodeSummary> {
        self.direct
            .iter()
            .chain(self.parents.iter())
            .chain(self.siblings.iter())
    }
}

/// Secondary classification attached to a coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainOperator {
    pub name: String,
    pub description: String,
    pub relationship: String,
}

/// Map-wide background for the comprehensive path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub description: String,
    pub node_count: usize,
    pub relationship_count: usize,
    pub roots: Vec<NodeSummary>,
}

/// Full per-chunk context for deep analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveContext {
    pub focus: Option<Coordinate>,
    pub chunk_summary: String,
    pub document_summary: String,
    pub relevant_nodes: RelevantNodes,
    pub relationships: Vec<Relationship>,
    pub project_context: ProjectSummary,
    pub domain_operator_context: Vec<DomainOperator>,
    /// Enrichment steps that failed; the window is partial when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

/// Context assembled for one text unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextWindow {
    Lightweight(LightweightContext),
    Comprehensive(ComprehensiveContext),
}

impl ContextWindow {
    pub fn focus(&self) -> Option<&Coordinate> {
        match self {
            ContextWindow::Lightweight(c) => c.focus.as_ref(),
            ContextWindow::Comprehensive(c) => c.focus.as_ref(),
        }
    }

    pub fn depth(&self) -> ContextDepth {
        match self {
            ContextWindow::Lightweight(_) => ContextDepth::Lightweight,
            ContextWindow::Comprehensive(_) => ContextDepth::Comprehensive,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ContextWindow::Comprehensive(c) if !c.degraded.is_empty())
    }

    /// Text form placed in the user prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            ContextWindow::Lightweight(c) => {
                section(&mut out, "Project", &c.project_summary);
                section(&mut out, "Document", &c.document_summary);
                if let Some(focus) = &c.focus {
                    section(&mut out, "Focus coordinate", focus.as_str());
                }
                if !c.hierarchy.is_empty() {
                    out.push_str("## Hierarchy\n");
                    for entry in &c.hierarchy {
                        let indent = "  ".repeat(entry.depth.saturating_sub(1));
                        let _ = writeln!(
                            out,
                            "{}- {} {}",
                            indent,
                            entry.coordinate,
                            entry.name.as_deref().unwrap_or("")
                        );
                    }
                    out.push('\n');
                }
                section(&mut out, "Chunk preview", &c.chunk_summary);
            }
            ContextWindow::Comprehensive(c) => {
                let p = &c.project_context;
                let _ = writeln!(
                    out,
                    "## Project\n{}: {} ({} nodes, {} relationships)\n",
                    p.name, p.description, p.node_count, p.relationship_count
                );
                node_list(&mut out, "Top-level coordinates", &p.roots);
                section(&mut out, "Document", &c.document_summary);
                if let Some(focus) = &c.focus {
                    section(&mut out, "Focus coordinate", focus.as_str());
                }
                node_list(&mut out, "Directly relevant", &c.relevant_nodes.direct);
                node_list(&mut out, "Parents", &c.relevant_nodes.parents);
                node_list(&mut out, "Siblings", &c.relevant_nodes.siblings);
                if !c.relationships.is_empty() {
                    out.push_str("## Relationships\n");
                    for rel in &c.relationships {
                        let _ = writeln!(out, "- {}", rel);
                    }
                    out.push('\n');
                }
                if !c.domain_operator_context.is_empty() {
                    out.push_str("## Domain operators\n");
                    for op in &c.domain_operator_context {
                        let _ = writeln!(out, "- {} ({}): {}", op.name, op.relationship, op.description);
                    }
                    out.push('\n');
                }
                section(&mut out, "Chunk preview", &c.chunk_summary);
            }
        }
        out
    }
}

fn section(out: &mut String, title: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    let _ = write!(out, "## {}\n{}\n\n", title, body.trim());
}

fn node_list(out: &mut String, title: &str, nodes: &[NodeSummary]) {
    if nodes.is_empty() {
        return;
    }
    let _ = writeln!(out, "## {}", title);
    for node in nodes {
        node.render_line(out);
    }
    out.push('\n');
}
