use std::collections::BTreeMap;

use serde_json::json;
use strata::config::ResourceDefinition;
use strata::dag::DependencyGraph;
use strata::StackError;

fn defs(entries: Vec<(&str, ResourceDefinition)>) -> BTreeMap<String, ResourceDefinition> {
    entries
        .into_iter()
        .map(|(name, def)| (name.to_string(), def))
        .collect()
}

fn plain() -> ResourceDefinition {
    ResourceDefinition::new("Strata::None")
}

/// net <- subnet <- server, plus a standalone bucket.
fn web_stack() -> BTreeMap<String, ResourceDefinition> {
    defs(vec![
        ("net", plain()),
        (
            "subnet",
            plain().with_property("network", json!({"get_resource": "net"})),
        ),
        (
            "server",
            plain()
                .with_property("subnet", json!({"get_attr": ["subnet", "id"]}))
                .with_depends_on("net"),
        ),
        ("bucket", plain()),
    ])
}

#[test]
fn test_edges_include_sentinels_for_roots() {
    let graph = DependencyGraph::build(&web_stack()).unwrap();
    let edges = graph.edges();

    assert!(edges.contains(&("net".to_string(), None)));
    assert!(edges.contains(&("bucket".to_string(), None)));
    assert!(edges.contains(&("subnet".to_string(), Some("net".to_string()))));
    assert!(edges.contains(&("server".to_string(), Some("subnet".to_string()))));
    assert!(edges.contains(&("server".to_string(), Some("net".to_string()))));
    assert_eq!(edges.len(), 5);
}

#[test]
fn test_requires_and_required_by() {
    let graph = DependencyGraph::build(&web_stack()).unwrap();
    assert_eq!(graph.requires("server"), vec!["net", "subnet"]);
    assert_eq!(graph.required_by("net"), vec!["server", "subnet"]);
    assert!(graph.required_by("server").is_empty());
    assert!(graph.requires("unknown").is_empty());
}

#[test]
fn test_forward_walk_puts_dependencies_first() {
    let graph = DependencyGraph::build(&web_stack()).unwrap();
    let order: Vec<&str> = graph.walk(false).collect();
    assert_eq!(order.len(), 4);

    let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
    assert!(pos("net") < pos("subnet"));
    assert!(pos("subnet") < pos("server"));
}

#[test]
fn test_reverse_walk_mirrors_forward_walk() {
    let graph = DependencyGraph::build(&web_stack()).unwrap();
    let mut forward: Vec<&str> = graph.walk(false).collect();
    let reverse: Vec<&str> = graph.walk(true).collect();
    forward.reverse();
    assert_eq!(forward, reverse);

    // Each walk starts fresh.
    assert_eq!(graph.walk(true).count(), 4);
}

#[test]
fn test_unknown_reference_is_invalid() {
    let defs = defs(vec![(
        "server",
        plain().with_property("net", json!({"get_resource": "missing"})),
    )]);
    match DependencyGraph::build(&defs) {
        Err(StackError::InvalidReference { resource, target }) => {
            assert_eq!(resource, "server");
            assert_eq!(target, "missing");
        }
        other => panic!("expected InvalidReference, got {:?}", other.map(|g| g.len())),
    }
}

#[test]
fn test_unknown_depends_on_is_invalid() {
    let defs = defs(vec![("server", plain().with_depends_on("ghost"))]);
    assert!(matches!(
        DependencyGraph::build(&defs),
        Err(StackError::InvalidReference { .. })
    ));
}

#[test]
fn test_self_reference_is_a_cycle() {
    let defs = defs(vec![(
        "a",
        plain().with_property("me", json!({"get_attr": ["a", "id"]})),
    )]);
    let err = DependencyGraph::build(&defs).unwrap_err();
    assert_eq!(err.to_string(), "Circular dependency detected: a -> a");
}

#[test]
fn test_two_node_cycle_names_both() {
    let defs = defs(vec![
        ("a", plain().with_depends_on("b")),
        ("b", plain().with_depends_on("a")),
    ]);
    match DependencyGraph::build(&defs) {
        Err(StackError::CircularDependency { cycle }) => {
            assert_eq!(cycle.len(), 3);
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"a".to_string()));
            assert!(cycle.contains(&"b".to_string()));
        }
        other => panic!("expected cycle, got {:?}", other.map(|g| g.len())),
    }
}

#[test]
fn test_metadata_references_create_edges() {
    let defs = defs(vec![
        ("a", plain()),
        ("b", plain().with_metadata(json!({"owner": {"get_resource": "a"}}))),
    ]);
    let graph = DependencyGraph::build(&defs).unwrap();
    assert_eq!(graph.requires("b"), vec!["a"]);
}

#[test]
fn test_dot_output() {
    let graph = DependencyGraph::build(&web_stack()).unwrap();
    let dot = graph.to_dot("web");
    assert!(dot.starts_with("digraph \"web\" {"));
    assert!(dot.contains("\"net\" -> \"server\";"));
    assert!(dot.contains("\"net\" -> \"subnet\" [style=dashed];"));
    assert!(dot.contains("\"bucket\" [label=\"bucket\"];"));
    assert!(dot.ends_with('}'));
}

#[test]
fn test_empty_graph() {
    let graph = DependencyGraph::build(&BTreeMap::new()).unwrap();
    assert!(graph.is_empty());
    assert!(graph.edges().is_empty());
    assert_eq!(graph.walk(false).count(), 0);
}
