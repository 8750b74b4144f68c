//! Raw graph snapshots as they arrive from the graph store
//!
//! The store is not consistent about shape: edges come as `edges`,
//! `links`, or `relationships`; node fields may sit at the top level or
//! under `properties`; ids may be strings or numbers; edge endpoints may
//! be bare ids or embedded node objects. These types accept all of it and
//! leave interpretation to the transformer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A node/edge snapshot in whatever shape the graph store produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGraph {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub nodes: Vec<RawNode>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<RawEdge>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<RawEdge>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RawEdge>,
}

impl RawGraph {
    pub fn new(nodes: Vec<RawNode>, edges: Vec<RawEdge>) -> Self {
        Self {
            nodes,
            edges,
            ..Default::default()
        }
    }

    /// Edges from every accepted field, in field order.
    pub fn all_edges(&self) -> impl Iterator<Item = &RawEdge> {
        self.edges
            .iter()
            .chain(self.links.iter())
            .chain(self.relationships.iter())
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len() + self.links.len() + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edge_count() == 0
    }
}

/// Stringify an id that may be a string or a number.
fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A node in the raw snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawNode {
    /// Look a field up under `properties` first, then at the top level.
    pub fn field(&self, names: &[&str]) -> Option<&Value> {
        names.iter().find_map(|name| {
            self.properties
                .as_ref()
                .and_then(|p| p.get(*name))
                .filter(|v| !v.is_null())
                .or_else(|| self.fields.get(*name).filter(|v| !v.is_null()))
        })
    }

    pub fn id_string(&self) -> Option<String> {
        self.id
            .as_ref()
            .and_then(scalar_id)
            .or_else(|| self.field(&["id", "nodeId"]).and_then(scalar_id))
    }

    pub fn coordinate(&self) -> Option<String> {
        self.field(&["coordinate", "coord"]).and_then(non_empty_str)
    }

    pub fn name(&self) -> Option<String> {
        self.field(&["name", "title", "label"]).and_then(non_empty_str)
    }

    pub fn description(&self) -> Option<String> {
        self.field(&["description", "summary", "content"])
            .and_then(non_empty_str)
    }

    pub fn node_type(&self) -> Option<String> {
        self.field(&["type", "nodeType", "kind"])
            .and_then(non_empty_str)
            .or_else(|| self.labels.first().cloned())
    }

    /// All properties, `properties` entries overriding top-level ones.
    pub fn merged_properties(&self) -> Map<String, Value> {
        let mut merged = self.fields.clone();
        if let Some(props) = &self.properties {
            for (k, v) in props {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

/// An edge in the raw snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEdge {
    #[serde(default, alias = "from", alias = "start", skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, alias = "to", alias = "end", skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>, relationship: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("type".into(), Value::String(relationship.to_string()));
        Self {
            source: Some(Value::String(source.into())),
            target: Some(Value::String(target.into())),
            fields,
        }
    }

    /// Endpoint id: a bare id, or the `id` of an embedded node object.
    fn endpoint(value: Option<&Value>) -> Option<String> {
        match value? {
            Value::Object(obj) => obj.get("id").and_then(scalar_id),
            other => scalar_id(other),
        }
    }

    pub fn source_id(&self) -> Option<String> {
        Self::endpoint(self.source.as_ref())
    }

    pub fn target_id(&self) -> Option<String> {
        Self::endpoint(self.target.as_ref())
    }

    pub fn relationship_type(&self) -> Option<String> {
        ["type", "relationship", "rel_type", "label"]
            .iter()
            .find_map(|k| self.fields.get(*k).and_then(non_empty_str))
    }
}
