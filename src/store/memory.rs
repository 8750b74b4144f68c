//! In-memory collaborators

use super::traits::{DocumentStore, GraphQuery, PublishTarget, StoreError, StoreResult};
use crate::cache::apply_partial_update;
use crate::coordinate::Coordinate;
use crate::graph::{RawGraph, RawNode};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Graph store over a fixed raw snapshot.
///
/// Without a `coordinate` parameter a query returns the whole snapshot.
/// With one it returns the one-hop neighbourhood of the node at that
/// coordinate, restricted to neighbours carrying `label` when given.
/// The pattern text itself is not interpreted.
pub struct InMemoryGraph {
    graph: RawGraph,
    available: bool,
    queries: AtomicUsize,
}

impl InMemoryGraph {
    pub fn new(graph: RawGraph) -> Self {
        Self {
            graph,
            available: true,
            queries: AtomicUsize::new(0),
        }
    }

    /// A store whose every query fails.
    pub fn unavailable() -> Self {
        Self {
            graph: RawGraph::default(),
            available: false,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn has_label(node: &RawNode, label: &str) -> bool {
        node.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
            || node
                .node_type()
                .is_some_and(|t| t.eq_ignore_ascii_case(label))
    }

    fn neighbourhood(&self, coordinate: &Coordinate, label: Option<&str>) -> RawGraph {
        let Some(focus_id) = self
            .graph
            .nodes
            .iter()
            .find(|n| n.coordinate().map(Coordinate::new).as_ref() == Some(coordinate))
            .and_then(|n| n.id_string())
        else {
            return RawGraph::default();
        };

        let mut neighbour_ids: HashSet<String> = HashSet::new();
        for edge in self.graph.all_edges() {
            let (source, target) = (edge.source_id(), edge.target_id());
            if source.as_deref() == Some(focus_id.as_str()) {
                neighbour_ids.extend(target);
            } else if target.as_deref() == Some(focus_id.as_str()) {
                neighbour_ids.extend(source);
            }
        }

        let nodes: Vec<RawNode> = self
            .graph
            .nodes
            .iter()
            .filter(|n| {
                n.id_string().is_some_and(|id| neighbour_ids.contains(&id))
                    && label.map_or(true, |l| Self::has_label(n, l))
            })
            .cloned()
            .collect();
        let kept: HashSet<String> = nodes.iter().filter_map(|n| n.id_string()).collect();

        let edges = self
            .graph
            .all_edges()
            .filter(|e| {
                let ends = (e.source_id(), e.target_id());
                match ends {
                    (Some(s), Some(t)) => {
                        (s == focus_id && kept.contains(&t)) || (t == focus_id && kept.contains(&s))
                    }
                    _ => false,
                }
            })
            .cloned()
            .collect();

        RawGraph {
            nodes,
            relationships: edges,
            ..Default::default()
        }
    }
}

#[async_trait]
impl GraphQuery for InMemoryGraph {
    async fn query(&self, _pattern: &str, params: &Value) -> StoreResult<RawGraph> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(StoreError::Unavailable("graph store offline".to_string()));
        }
        match params.get("coordinate").and_then(Value::as_str) {
            Some(c) => Ok(self.neighbourhood(
                &Coordinate::new(c),
                params.get("label").and_then(Value::as_str),
            )),
            None => Ok(self.graph.clone()),
        }
    }
}

/// Document store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, Value>,
    reject_updates: AtomicBool,
    reject_saves: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, id: impl Into<String>, document: Value) -> Self {
        self.documents.insert(id.into(), document);
        self
    }

    /// Make `update` fail, to exercise fallback paths.
    pub fn reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }

    /// Make `store` fail, to exercise fallback paths.
    pub fn reject_saves(&self, reject: bool) {
        self.reject_saves.store(reject, Ordering::SeqCst);
    }

    /// Number of `get_by_id` calls served.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Current stored copy, bypassing counters.
    pub fn snapshot(&self, id: &str) -> Option<Value> {
        self.documents.get(id).map(|d| d.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_by_id(&self, id: &str) -> StoreResult<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.get(id).map(|d| d.clone()))
    }

    async fn update(&self, id: &str, partial: &Value) -> StoreResult<()> {
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!("update of '{}' refused", id)));
        }
        let mut doc = self
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply_partial_update(doc.value_mut(), partial);
        Ok(())
    }

    async fn store(&self, id: &str, document: &Value) -> StoreResult<()> {
        if self.reject_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!("save of '{}' refused", id)));
        }
        self.documents.insert(id.to_string(), document.clone());
        Ok(())
    }
}

/// Publish target that records appended content.
#[derive(Default)]
pub struct RecordingPublisher {
    appended: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every append fails.
    pub fn failing() -> Self {
        Self {
            appended: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn appended(&self) -> Vec<(String, String)> {
        self.appended.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PublishTarget for RecordingPublisher {
    async fn append_content(&self, target_id: &str, content: &str) -> StoreResult<()> {
        if self.fail {
            return Err(StoreError::Unavailable("publish target offline".to_string()));
        }
        self.appended
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((target_id.to_string(), content.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph() -> RawGraph {
        serde_json::from_value(json!({
            "nodes": [
                {"id": "h", "coordinate": "#2.1", "name": "Harmony"},
                {"id": "op", "labels": ["Operator"], "name": "Integrate"},
                {"id": "c", "type": "Concept", "name": "Rhythm"}
            ],
            "edges": [
                {"source": "op", "target": "h", "type": "OPERATES_ON"},
                {"source": "h", "target": "c", "type": "BALANCES"}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn neighbourhood_query_filters_by_label() {
        let store = InMemoryGraph::new(graph());
        let result = store
            .query("operators", &json!({"coordinate": "#2-1", "label": "Operator"}))
            .await
            .unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(result.nodes[0].name().as_deref(), Some("Integrate"));
        assert_eq!(result.edge_count(), 1);
    }

    #[tokio::test]
    async fn query_without_coordinate_returns_snapshot() {
        let store = InMemoryGraph::new(graph());
        let result = store.query("all", &json!({})).await.unwrap();
        assert_eq!(result.nodes.len(), 3);
    }

    #[tokio::test]
    async fn document_updates_merge_dot_paths() {
        let store = MemoryDocumentStore::new()
            .with_document("d1", json!({"title": "T", "analysis": {"status": "new"}}));
        store
            .update("d1", &json!({"analysis.status": "done"}))
            .await
            .unwrap();
        assert_eq!(
            store.snapshot("d1").unwrap(),
            json!({"title": "T", "analysis": {"status": "done"}})
        );
    }

    #[tokio::test]
    async fn failing_publisher_reports_errors() {
        let publisher = RecordingPublisher::failing();
        assert!(publisher.append_content("page", "x").await.is_err());
        assert!(publisher.appended().is_empty());
    }
}
