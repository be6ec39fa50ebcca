use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction as EdgeDirection;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::references;
use crate::config::ResourceDefinition;
use crate::error::{Result, StackError};

/// How an edge was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyEdge {
    /// Listed in `depends_on`.
    Explicit,
    /// Implied by a `get_resource` or `get_attr` reference.
    Implicit,
}

/// Partial order over the resources of one stack.
///
/// An edge from A to B means B depends on A (A must be created first).
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, DependencyEdge>,
    node_map: HashMap<String, NodeIndex>,
    order: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph for a set of resource definitions.
    ///
    /// Fails with `InvalidReference` when a definition names a resource
    /// outside the set and with `CircularDependency` when the references
    /// form a cycle.
    pub fn build(resources: &BTreeMap<String, ResourceDefinition>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut node_map: HashMap<String, NodeIndex> = HashMap::new();

        for name in resources.keys() {
            let idx = graph.add_node(name.clone());
            node_map.insert(name.clone(), idx);
        }

        // (dependency, dependent) -> kind; explicit wins over implicit
        let mut edges: BTreeMap<(String, String), DependencyEdge> = BTreeMap::new();
        for (name, definition) in resources {
            let explicit: HashSet<&String> = definition.depends_on.iter().collect();
            for dep in references::dependencies_of(definition) {
                if !node_map.contains_key(&dep) {
                    return Err(StackError::InvalidReference {
                        resource: name.clone(),
                        target: dep,
                    });
                }
                if dep == *name {
                    return Err(StackError::CircularDependency {
                        cycle: vec![name.clone(), name.clone()],
                    });
                }
                let kind = if explicit.contains(&dep) {
                    DependencyEdge::Explicit
                } else {
                    DependencyEdge::Implicit
                };
                edges.insert((dep, name.clone()), kind);
            }
        }

        for ((from, to), kind) in edges {
            graph.add_edge(node_map[&from], node_map[&to], kind);
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            return Err(StackError::CircularDependency {
                cycle: find_cycle(&graph, cycle.node_id()),
            });
        }

        let order = stable_order(&graph);
        Ok(Self {
            graph,
            node_map,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_map.contains_key(name)
    }

    /// Node names in dependency order.
    pub fn nodes(&self) -> &[String] {
        &self.order
    }

    /// Every (dependent, dependency) pair, plus `(node, None)` for each node
    /// that depends on nothing. Follows dependency order.
    pub fn edges(&self) -> Vec<(String, Option<String>)> {
        let mut edges = Vec::new();
        for name in &self.order {
            let deps = self.requires(name);
            if deps.is_empty() {
                edges.push((name.clone(), None));
            } else {
                edges.extend(deps.into_iter().map(|dep| (name.clone(), Some(dep))));
            }
        }
        edges
    }

    /// Resources `name` depends on, sorted.
    pub fn requires(&self, name: &str) -> Vec<String> {
        self.neighbors(name, EdgeDirection::Incoming)
    }

    /// Resources depending on `name`, sorted.
    pub fn required_by(&self, name: &str) -> Vec<String> {
        self.neighbors(name, EdgeDirection::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: EdgeDirection) -> Vec<String> {
        let Some(&idx) = self.node_map.get(name) else {
            return Vec::new();
        };
        let set: BTreeSet<String> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        set.into_iter().collect()
    }

    /// Iterate nodes in dependency order, or its mirror when `reverse`.
    /// Each call starts a fresh walk.
    pub fn walk(&self, reverse: bool) -> Walk<'_> {
        Walk {
            inner: self.order.iter(),
            reverse,
        }
    }

    /// Render the graph in DOT format. Implicit edges are dashed.
    pub fn to_dot(&self, title: &str) -> String {
        let mut lines = Vec::new();
        lines.push(format!("digraph \"{}\" {{", title));
        lines.push("    rankdir=TB;".to_string());
        lines.push("    node [shape=box, style=filled, fillcolor=lightblue];".to_string());

        for name in &self.order {
            lines.push(format!("    \"{}\" [label=\"{}\"];", name, name));
        }

        let mut edges: Vec<(&str, &str, DependencyEdge)> = self
            .graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].as_str(),
                    self.graph[e.target()].as_str(),
                    *e.weight(),
                )
            })
            .collect();
        edges.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        for (from, to, kind) in edges {
            match kind {
                DependencyEdge::Explicit => lines.push(format!("    \"{}\" -> \"{}\";", from, to)),
                DependencyEdge::Implicit => lines.push(format!(
                    "    \"{}\" -> \"{}\" [style=dashed];",
                    from, to
                )),
            }
        }

        lines.push("}".to_string());
        lines.join("\n")
    }
}

/// Iterator returned by [`DependencyGraph::walk`].
pub struct Walk<'a> {
    inner: std::slice::Iter<'a, String>,
    reverse: bool,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let next = if self.reverse {
            self.inner.next_back()
        } else {
            self.inner.next()
        };
        next.map(String::as_str)
    }
}

/// Kahn's algorithm, taking ready nodes in name order so the walk is stable.
fn stable_order(graph: &DiGraph<String, DependencyEdge>) -> Vec<String> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| {
            (
                idx,
                graph.neighbors_directed(idx, EdgeDirection::Incoming).count(),
            )
        })
        .collect();
    let mut ready: BTreeSet<(String, NodeIndex)> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&idx, _)| (graph[idx].clone(), idx))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some((name, idx)) = ready.pop_first() {
        order.push(name);
        for next in graph.neighbors_directed(idx, EdgeDirection::Outgoing) {
            if let Some(deg) = in_degree.get_mut(&next) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert((graph[next].clone(), next));
                }
            }
        }
    }
    order
}

/// Names along one cycle through the strongly connected component holding
/// `start`, in requirer -> required order, closed by repeating the first.
fn find_cycle(graph: &DiGraph<String, DependencyEdge>, start: NodeIndex) -> Vec<String> {
    let component: HashSet<NodeIndex> = petgraph::algo::tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&start) && scc.len() > 1)
        .map(|scc| scc.into_iter().collect())
        .unwrap_or_default();

    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    if dfs_back_to(graph, &component, start, start, &mut path, &mut visited) {
        path.push(start);
    }
    path.into_iter().map(|idx| graph[idx].clone()).collect()
}

fn dfs_back_to(
    graph: &DiGraph<String, DependencyEdge>,
    component: &HashSet<NodeIndex>,
    current: NodeIndex,
    start: NodeIndex,
    path: &mut Vec<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
) -> bool {
    let mut deps: Vec<NodeIndex> = graph
        .neighbors_directed(current, EdgeDirection::Incoming)
        .filter(|n| component.contains(n))
        .collect();
    deps.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

    for dep in deps {
        if dep == start {
            return true;
        }
        if visited.insert(dep) {
            path.push(dep);
            if dfs_back_to(graph, component, dep, start, path, visited) {
                return true;
            }
            path.pop();
        }
    }
    false
}
