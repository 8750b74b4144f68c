//! CoordinateMap: the read-only snapshot one analysis run works against

use super::edge::Relationship;
use super::node::{Node, NodeId, NodeRef};
use super::transform::TransformReport;
use crate::coordinate::{self, Coordinate, Hierarchy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Counts and root nodes of a map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapSummary {
    pub node_count: usize,
    pub relationship_count: usize,
    pub coordinate_node_count: usize,
    /// `#` first when present, then by coordinate
    pub root_nodes: Vec<NodeRef>,
    pub node_types: BTreeMap<String, usize>,
    pub dropped_edges: usize,
}

/// All nodes and relationships for one run, plus derived structure
///
/// Built once by the transformer and never mutated afterwards; share it
/// behind an `Arc`. Lookups by id, by coordinate and by parent coordinate
/// go through indexes built at construction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinateMap {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
    structure: Hierarchy,
    summary: MapSummary,
    #[serde(skip)]
    report: TransformReport,
    #[serde(skip)]
    by_id: HashMap<NodeId, usize>,
    #[serde(skip)]
    by_coordinate: HashMap<Coordinate, usize>,
    #[serde(skip)]
    children_of: HashMap<Coordinate, Vec<usize>>,
}

impl CoordinateMap {
    /// A map with no nodes, relationships or roots.
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        nodes: Vec<Node>,
        relationships: Vec<Relationship>,
        report: TransformReport,
    ) -> Self {
        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut by_coordinate = HashMap::new();
        let mut children_of: HashMap<Coordinate, Vec<usize>> = HashMap::new();
        let mut structure = Hierarchy::new();
        let mut node_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut roots: Vec<NodeRef> = Vec::new();

        for (idx, node) in nodes.iter().enumerate() {
            by_id.insert(node.id.clone(), idx);
            if !node.node_type.is_empty() {
                *node_types.entry(node.node_type.clone()).or_default() += 1;
            }
            let Some(coord) = &node.coordinate else {
                continue;
            };
            by_coordinate.entry(coord.clone()).or_insert(idx);
            if let Some(parent) = coord.parent() {
                children_of.entry(parent).or_default().push(idx);
            }
            structure.insert(coord, node.id.as_str(), &node.name);
            if coordinate::is_root_coordinate(coord.as_str()) {
                roots.push(node.to_ref());
            }
        }

        roots.sort_by(|a, b| {
            let key = |r: &NodeRef| {
                let c = r.coordinate.as_ref().map(|c| c.as_str()).unwrap_or_default();
                (c != coordinate::ROOT, c.to_string())
            };
            key(a).cmp(&key(b))
        });

        let summary = MapSummary {
            node_count: nodes.len(),
            relationship_count: relationships.len(),
            coordinate_node_count: nodes.iter().filter(|n| n.coordinate.is_some()).count(),
            root_nodes: roots,
            node_types,
            dropped_edges: report.dropped_edges,
        };

        Self {
            nodes,
            relationships,
            structure,
            summary,
            report,
            by_id,
            by_coordinate,
            children_of,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn structure(&self) -> &Hierarchy {
        &self.structure
    }

    pub fn summary(&self) -> &MapSummary {
        &self.summary
    }

    pub fn report(&self) -> &TransformReport {
        &self.report
    }

    pub fn roots(&self) -> &[NodeRef] {
        &self.summary.root_nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.by_id.get(id).map(|&i| &self.nodes[i])
    }

    /// The first node carrying `coordinate`.
    pub fn node_at(&self, coordinate: &Coordinate) -> Option<&Node> {
        self.by_coordinate.get(coordinate).map(|&i| &self.nodes[i])
    }

    /// Nodes exactly one level below `coordinate`.
    pub fn children(&self, coordinate: &Coordinate) -> Vec<&Node> {
        self.children_of
            .get(coordinate)
            .map(|idxs| idxs.iter().map(|&i| &self.nodes[i]).collect())
            .unwrap_or_default()
    }

    /// Nodes sharing `coordinate`'s parent, excluding nodes at `coordinate`.
    pub fn siblings(&self, coordinate: &Coordinate) -> Vec<&Node> {
        let Some(parent) = coordinate.parent() else {
            return Vec::new();
        };
        self.children(&parent)
            .into_iter()
            .filter(|n| n.coordinate.as_ref() != Some(coordinate))
            .collect()
    }

    /// The node at `coordinate`'s parent, if one exists in the map.
    pub fn parent_of(&self, coordinate: &Coordinate) -> Option<&Node> {
        coordinate.parent().and_then(|p| self.node_at(&p))
    }

    pub fn relationships_for(&self, id: &NodeId) -> Vec<&Relationship> {
        self.relationships.iter().filter(|r| r.involves(id)).collect()
    }
}
