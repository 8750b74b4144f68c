//! Node representation in the coordinate map

use crate::coordinate::Coordinate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a node within one map
///
/// Serializes as a plain string; numeric ids from the source graph are
/// stringified on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Typed property values carried over from the raw graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<PropertyValue>),
    Object(HashMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&serde_json::Value> for PropertyValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => PropertyValue::Null,
            Value::Bool(b) => PropertyValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PropertyValue::Int(i),
                None => PropertyValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::Array(items) => PropertyValue::Array(items.iter().map(Into::into).collect()),
            Value::Object(map) => PropertyValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
            ),
        }
    }
}

/// Properties collection
pub type Properties = HashMap<String, PropertyValue>;

/// A node in the coordinate map
///
/// Nodes without a coordinate are valid: they render and take part in
/// relationships but are never found by hierarchy lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: Properties,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            coordinate: None,
            name: name.into(),
            description: String::new(),
            node_type: String::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_coordinate(mut self, coordinate: impl Into<Coordinate>) -> Self {
        self.coordinate = Some(coordinate.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Snapshot reference used by relationships and summaries.
    pub fn to_ref(&self) -> NodeRef {
        NodeRef {
            id: self.id.clone(),
            coordinate: self.coordinate.clone(),
            name: self.name.clone(),
        }
    }
}

/// A snapshot of a node's identity taken at transform time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
    pub name: String,
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.coordinate {
            Some(c) => write!(f, "{} ({})", self.name, c),
            None => write!(f, "{}", self.name),
        }
    }
}
