//! Coordinate map data model and the graph-to-map transformer

mod edge;
mod map;
mod node;
mod raw;
mod transform;

#[cfg(test)]
mod tests;

pub use edge::{Relationship, DEFAULT_RELATIONSHIP};
pub use map::{CoordinateMap, MapSummary};
pub use node::{Node, NodeId, NodeRef, Properties, PropertyValue};
pub use raw::{RawEdge, RawGraph, RawNode};
pub use transform::{parse_raw_graph, transform, transform_value, TransformError, TransformReport};
