//! Graph-to-map transformer
//!
//! Turns a raw graph snapshot into a [`CoordinateMap`]. Transformation
//! never fails hard: a malformed or empty snapshot yields an empty map,
//! because an analysis can still run on degraded context.

use super::edge::Relationship;
use super::map::CoordinateMap;
use super::node::{Node, NodeId, PropertyValue};
use super::raw::RawGraph;
use crate::coordinate::Coordinate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors reading a raw graph snapshot
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("malformed graph snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// What happened to the input during a transform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    pub nodes_in: usize,
    pub edges_in: usize,
    /// Edges whose source or target did not resolve to a retained node
    pub dropped_edges: usize,
    /// Nodes skipped because their id was already taken
    pub duplicate_nodes: usize,
    pub nodes_without_coordinate: usize,
    /// Nodes that arrived without an id and were given one
    pub generated_ids: usize,
}

/// Parse a JSON value into a raw graph. `null` is an empty graph.
pub fn parse_raw_graph(value: &serde_json::Value) -> Result<RawGraph, TransformError> {
    if value.is_null() {
        return Ok(RawGraph::default());
    }
    Ok(RawGraph::deserialize(value)?)
}

/// Transform a JSON snapshot, degrading to an empty map when it is malformed.
pub fn transform_value(value: &serde_json::Value) -> CoordinateMap {
    match parse_raw_graph(value) {
        Ok(raw) => transform(&raw),
        Err(e) => {
            warn!(error = %e, "graph snapshot unreadable, continuing with an empty map");
            CoordinateMap::empty()
        }
    }
}

/// Transform a raw graph into a coordinate map.
///
/// Every node is retained, with or without a coordinate. Edges are kept
/// when both endpoints resolve to retained nodes (by id, falling back to
/// coordinate); the rest are dropped and counted in the report.
pub fn transform(raw: &RawGraph) -> CoordinateMap {
    let mut report = TransformReport {
        nodes_in: raw.nodes.len(),
        edges_in: raw.edge_count(),
        ..Default::default()
    };

    let mut nodes: Vec<Node> = Vec::with_capacity(raw.nodes.len());
    let mut seen: HashMap<NodeId, usize> = HashMap::with_capacity(raw.nodes.len());

    for (idx, raw_node) in raw.nodes.iter().enumerate() {
        let coordinate = raw_node.coordinate().map(Coordinate::new);
        let id = match raw_node.id_string() {
            Some(id) => NodeId::from_string(id),
            None => {
                report.generated_ids += 1;
                match &coordinate {
                    Some(c) => NodeId::from_string(format!("coord:{}", c)),
                    None => NodeId::from_string(format!("node:{}", idx)),
                }
            }
        };

        if seen.contains_key(&id) {
            report.duplicate_nodes += 1;
            warn!(node_id = %id, "duplicate node id in graph snapshot, keeping the first");
            continue;
        }
        if coordinate.is_none() {
            report.nodes_without_coordinate += 1;
        }

        let name = raw_node
            .name()
            .or_else(|| coordinate.as_ref().map(|c| c.to_string()))
            .unwrap_or_else(|| id.to_string());

        let properties = raw_node
            .merged_properties()
            .iter()
            .map(|(k, v)| (k.clone(), PropertyValue::from(v)))
            .collect();

        let node = Node {
            id: id.clone(),
            coordinate,
            name,
            description: raw_node.description().unwrap_or_default(),
            node_type: raw_node.node_type().unwrap_or_default(),
            properties,
        };
        seen.insert(id, nodes.len());
        nodes.push(node);
    }

    let by_coordinate: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.coordinate.as_ref().map(|c| (c.as_str(), i)))
        .rev()
        .collect();

    let resolve = |endpoint: Option<String>| -> Option<usize> {
        let endpoint = endpoint?;
        seen.get(&NodeId::from_string(endpoint.clone()))
            .copied()
            .or_else(|| by_coordinate.get(Coordinate::new(&endpoint).as_str()).copied())
    };

    let mut relationships = Vec::with_capacity(report.edges_in);
    for edge in raw.all_edges() {
        match (resolve(edge.source_id()), resolve(edge.target_id())) {
            (Some(s), Some(t)) => relationships.push(Relationship::new(
                edge.relationship_type().unwrap_or_default(),
                nodes[s].to_ref(),
                nodes[t].to_ref(),
            )),
            _ => {
                report.dropped_edges += 1;
                warn!(
                    source = ?edge.source_id(),
                    target = ?edge.target_id(),
                    "dropping edge with a missing endpoint"
                );
            }
        }
    }

    debug!(
        nodes = nodes.len(),
        relationships = relationships.len(),
        dropped_edges = report.dropped_edges,
        "graph transformed"
    );

    CoordinateMap::from_parts(nodes, relationships, report)
}
