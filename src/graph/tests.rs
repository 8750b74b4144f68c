//! Transformer tests against graph snapshots in the shapes the store emits

use serde_json::{json, Value};

/// Neo4j-style export: ids, labels, nested properties, `relationships`.
fn store_export_fixture() -> Value {
    json!({
        "nodes": [
            {"id": 0, "labels": ["Root"], "properties": {"coordinate": "#", "name": "Origin"}},
            {"id": 1, "labels": ["Principle"], "properties": {"coordinate": "#1", "name": "Form"}},
            {"id": 2, "labels": ["Principle"], "properties": {"coordinate": "#2", "name": "Flow"}},
            {"id": 3, "labels": ["Concept"], "properties": {"coordinate": "#2.1", "name": "Harmony",
                "description": "Balanced proportion between parts."}},
            {"id": 4, "labels": ["Concept"], "properties": {"coordinate": "#2-2", "name": "Rhythm"}},
            {"id": 5, "labels": ["Operator"], "properties": {"name": "Integrate"}}
        ],
        "relationships": [
            {"source": 1, "target": 3, "type": "INFORMS"},
            {"source": 3, "target": 4, "type": "BALANCES"},
            {"source": 5, "target": 3, "type": "OPERATES_ON"}
        ]
    })
}

/// D3-style export: flat fields, `links`, string ids.
fn force_graph_fixture() -> Value {
    json!({
        "nodes": [
            {"id": "a", "coordinate": "#3", "name": "Alpha"},
            {"id": "b", "coordinate": "#3.1", "name": "Beta"}
        ],
        "links": [
            {"source": "a", "target": "b", "type": "CONTAINS"},
            {"source": "a", "target": "ghost", "type": "CONTAINS"}
        ]
    })
}

#[cfg(test)]
mod transform_tests {
    use super::*;
    use crate::coordinate::Coordinate;
    use crate::graph::{transform_value, NodeId};

    #[test]
    fn retains_every_node_and_edge_when_endpoints_exist() {
        let map = transform_value(&store_export_fixture());
        assert_eq!(map.len(), 6);
        assert_eq!(map.relationships().len(), 3);
        assert_eq!(map.report().dropped_edges, 0);
    }

    #[test]
    fn nodes_without_coordinates_still_relate() {
        let map = transform_value(&store_export_fixture());
        let operator = map.node(&NodeId::from("5")).unwrap();
        assert!(operator.coordinate.is_none());
        assert_eq!(map.relationships_for(&operator.id).len(), 1);
        assert_eq!(map.report().nodes_without_coordinate, 1);
    }

    #[test]
    fn edges_with_missing_endpoints_are_dropped_and_counted() {
        let map = transform_value(&force_graph_fixture());
        assert_eq!(map.len(), 2);
        assert_eq!(map.relationships().len(), 1);
        assert_eq!(map.report().dropped_edges, 1);
        assert_eq!(map.summary().dropped_edges, 1);
    }

    #[test]
    fn edges_and_links_are_both_accepted() {
        let map = transform_value(&json!({
            "nodes": [{"id": "x"}, {"id": "y"}],
            "edges": [{"source": "x", "target": "y"}],
            "links": [{"source": "y", "target": "x", "type": "BACK"}]
        }));
        assert_eq!(map.relationships().len(), 2);
        assert_eq!(map.relationships()[0].relationship_type, "RELATED_TO");
        assert_eq!(map.relationships()[1].relationship_type, "BACK");
    }

    #[test]
    fn relationships_snapshot_endpoint_identity() {
        let map = transform_value(&store_export_fixture());
        let rel = &map.relationships()[1];
        assert_eq!(rel.source.name, "Harmony");
        assert_eq!(rel.source.coordinate, Some(Coordinate::new("#2-1")));
        assert_eq!(rel.target.name, "Rhythm");
    }

    #[test]
    fn root_nodes_are_hash_and_single_digit() {
        let map = transform_value(&store_export_fixture());
        let roots: Vec<_> = map.roots().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(roots, vec!["Origin", "Form", "Flow"]);
    }

    #[test]
    fn empty_null_and_malformed_graphs_yield_empty_maps() {
        for value in [json!(null), json!({}), json!({"nodes": null}), json!("not a graph")] {
            let map = transform_value(&value);
            assert!(map.is_empty());
            assert!(map.relationships().is_empty());
            assert!(map.roots().is_empty());
        }
    }

    #[test]
    fn duplicate_ids_keep_the_first_node() {
        let map = transform_value(&json!({
            "nodes": [{"id": "a", "name": "First"}, {"id": "a", "name": "Second"}]
        }));
        assert_eq!(map.len(), 1);
        assert_eq!(map.nodes()[0].name, "First");
        assert_eq!(map.report().duplicate_nodes, 1);
    }

    #[test]
    fn every_child_is_listed_under_its_parent() {
        let map = transform_value(&store_export_fixture());
        for node in map.nodes() {
            let Some(coord) = &node.coordinate else { continue };
            let Some(parent) = coord.parent() else { continue };
            assert!(coord.is_child_of(&parent));
            assert!(
                map.children(&parent).iter().any(|c| c.id == node.id),
                "{} missing from children of {}",
                coord,
                parent
            );
        }
    }

    #[test]
    fn structure_mirrors_coordinates() {
        let map = transform_value(&store_export_fixture());
        let harmony = map.structure().find(&Coordinate::new("#2-1")).unwrap();
        assert_eq!(harmony.name.as_deref(), Some("Harmony"));
        assert_eq!(map.structure().node_id.as_deref(), Some("0"));
    }
}
