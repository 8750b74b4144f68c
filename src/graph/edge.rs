//! Relationships between nodes of a coordinate map

use super::node::{NodeId, NodeRef};
use serde::{Deserialize, Serialize};

/// Relationship type used when the source graph leaves it blank
pub const DEFAULT_RELATIONSHIP: &str = "RELATED_TO";

/// A directed relationship between two snapshotted nodes
///
/// Endpoints are [`NodeRef`] copies rather than pointers, so a map stays
/// self-contained after the source graph is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub source: NodeRef,
    pub target: NodeRef,
}

impl Relationship {
    pub fn new(relationship_type: impl Into<String>, source: NodeRef, target: NodeRef) -> Self {
        let relationship_type = relationship_type.into();
        Self {
            relationship_type: if relationship_type.trim().is_empty() {
                DEFAULT_RELATIONSHIP.to_string()
            } else {
                relationship_type
            },
            source,
            target,
        }
    }

    /// Whether either endpoint is `id`
    pub fn involves(&self, id: &NodeId) -> bool {
        &self.source.id == id || &self.target.id == id
    }

    /// The endpoint opposite to `id`, if `id` is an endpoint
    pub fn other_end(&self, id: &NodeId) -> Option<&NodeRef> {
        if &self.source.id == id {
            Some(&self.target)
        } else if &self.target.id == id {
            Some(&self.source)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -[{}]-> {}",
            self.source, self.relationship_type, self.target
        )
    }
}
