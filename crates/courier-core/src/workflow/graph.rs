//! Graph model: adjacency, incoming-dependency counts, and scoped resume mode.
//!
//! `WorkflowGraph` is built once per run from the authored nodes and edges.
//! In resume mode it is restricted to the subgraph forward-reachable from the
//! start nodes, whose incoming counts are forced to zero so a resumed run
//! never waits on upstream nodes it is deliberately skipping.
//!
//! Cycles are rejected up front with `petgraph::algo::toposort`; the
//! dependency-counting scheduler would otherwise stall silently on them.

use std::collections::{HashMap, HashSet};

use courier_types::workflow::{Edge, Node};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structural problems that prevent a graph from running at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("edge '{from}' -> '{to}' references unknown node '{missing}'")]
    UnknownNode {
        from: String,
        to: String,
        missing: String,
    },

    #[error("cycle detected involving node '{0}'")]
    CycleDetected(String),
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// Derived view of a workflow graph for one scheduler pass.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// Included nodes, in declaration order.
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    /// Outgoing targets per source, in edge declaration order.
    edges_by_source: HashMap<String, Vec<String>>,
    incoming_count: HashMap<String, usize>,
}

impl WorkflowGraph {
    /// Build the graph for a full run (no start nodes) or a scoped resume.
    ///
    /// Start node IDs that do not name a node are ignored.
    pub fn build(
        nodes: &[Node],
        edges: &[Edge],
        start_node_ids: &[String],
    ) -> Result<Self, GraphError> {
        let mut all_ids: HashSet<&str> = HashSet::with_capacity(nodes.len());
        for node in nodes {
            if !all_ids.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        for edge in edges {
            for endpoint in [&edge.source, &edge.target] {
                if !all_ids.contains(endpoint.as_str()) {
                    return Err(GraphError::UnknownNode {
                        from: edge.source.clone(),
                        to: edge.target.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        let starts: HashSet<&str> = start_node_ids
            .iter()
            .map(String::as_str)
            .filter(|id| all_ids.contains(id))
            .collect();
        let scoped = !start_node_ids.is_empty();

        let included: HashSet<&str> = if scoped {
            reachable_from(&starts, edges)
        } else {
            all_ids
        };

        let nodes: Vec<Node> = nodes
            .iter()
            .filter(|n| included.contains(n.id.as_str()))
            .cloned()
            .collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut edges_by_source: HashMap<String, Vec<String>> = HashMap::new();
        let mut incoming_count: HashMap<String, usize> =
            nodes.iter().map(|n| (n.id.clone(), 0)).collect();

        for edge in edges {
            if !included.contains(edge.source.as_str()) || !included.contains(edge.target.as_str())
            {
                continue;
            }
            edges_by_source
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
            if let Some(count) = incoming_count.get_mut(&edge.target) {
                *count += 1;
            }
        }

        for start in &starts {
            incoming_count.insert((*start).to_string(), 0);
        }

        let graph = Self {
            nodes,
            index,
            edges_by_source,
            incoming_count,
        };
        graph.check_acyclic(&starts)?;
        Ok(graph)
    }

    /// Reject cycles that could stall the scheduler.
    ///
    /// Edges into forced start nodes are ignored: those nodes never wait on
    /// their incoming edges.
    fn check_acyclic(&self, starts: &HashSet<&str>) -> Result<(), GraphError> {
        let mut graph = DiGraph::<&str, ()>::new();
        let indices: HashMap<&str, _> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
            .collect();

        for (source, targets) in &self.edges_by_source {
            for target in targets {
                if starts.contains(target.as_str()) {
                    continue;
                }
                graph.add_edge(indices[source.as_str()], indices[target.as_str()], ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            GraphError::CycleDetected(graph[cycle.node_id()].to_string())
        })?;
        Ok(())
    }

    /// Included nodes in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Outgoing targets of `id`, in edge declaration order.
    pub fn targets(&self, id: &str) -> &[String] {
        self.edges_by_source
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of incoming edges `id` must see resolved before it can run.
    pub fn incoming(&self, id: &str) -> usize {
        self.incoming_count.get(id).copied().unwrap_or(0)
    }

    /// Nodes with no unresolved dependencies, in declaration order.
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| self.incoming(&n.id) == 0)
            .map(|n| n.id.as_str())
            .collect()
    }
}

/// Forward reachability walk from the start set.
fn reachable_from<'a>(starts: &HashSet<&'a str>, edges: &'a [Edge]) -> HashSet<&'a str> {
    let mut adjacency: HashMap<&str, Vec<&'a str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut visited: HashSet<&'a str> = starts.iter().copied().collect();
    let mut stack: Vec<&'a str> = starts.iter().copied().collect();

    while let Some(current) = stack.pop() {
        if let Some(targets) = adjacency.get(current) {
            for &target in targets {
                if visited.insert(target) {
                    stack.push(target);
                }
            }
        }
    }

    visited
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::workflow::{NodeConfig, NodeKind};

    fn action(id: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Action,
            label: id.to_uppercase(),
            enabled: true,
            config: NodeConfig::default(),
        }
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<Edge> {
        pairs.iter().map(|(s, t)| Edge::new(*s, *t)).collect()
    }

    #[test]
    fn test_linear_chain_counts() {
        let nodes = vec![action("a"), action("b"), action("c")];
        let graph = WorkflowGraph::build(&nodes, &edges(&[("a", "b"), ("b", "c")]), &[]).unwrap();

        assert_eq!(graph.roots(), vec!["a"]);
        assert_eq!(graph.incoming("b"), 1);
        assert_eq!(graph.incoming("c"), 1);
        assert_eq!(graph.targets("a"), ["b".to_string()]);
        assert!(graph.targets("c").is_empty());
    }

    #[test]
    fn test_diamond_join_waits_on_both() {
        // A -> {B, C} -> D
        let nodes = vec![action("a"), action("b"), action("c"), action("d")];
        let graph = WorkflowGraph::build(
            &nodes,
            &edges(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]),
            &[],
        )
        .unwrap();

        assert_eq!(graph.incoming("d"), 2);
        assert_eq!(graph.targets("a"), ["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_independent_nodes_are_all_roots_in_declaration_order() {
        let nodes = vec![action("z"), action("y"), action("x")];
        let graph = WorkflowGraph::build(&nodes, &[], &[]).unwrap();
        assert_eq!(graph.roots(), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_scoped_resume_excludes_upstream_and_forces_zero() {
        //   t -> q -> x -> y
        //        u ------^
        let nodes = vec![action("t"), action("q"), action("u"), action("x"), action("y")];
        let graph = WorkflowGraph::build(
            &nodes,
            &edges(&[("t", "q"), ("q", "x"), ("u", "y"), ("x", "y")]),
            &["x".to_string()],
        )
        .unwrap();

        let ids: Vec<&str> = graph.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(graph.incoming("x"), 0, "start node forced to zero");
        assert_eq!(graph.incoming("y"), 1, "edge from excluded 'u' not counted");
        assert!(graph.node("t").is_none());
        assert_eq!(graph.roots(), vec!["x"]);
    }

    #[test]
    fn test_scoped_resume_ignores_unknown_start() {
        let nodes = vec![action("a"), action("b")];
        let graph =
            WorkflowGraph::build(&nodes, &edges(&[("a", "b")]), &["ghost".to_string()]).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let nodes = vec![action("a"), action("b"), action("c")];
        let err = WorkflowGraph::build(&nodes, &edges(&[("a", "b"), ("b", "c"), ("c", "b")]), &[])
            .unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected(_)));
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn test_cycle_through_forced_start_is_allowed() {
        let nodes = vec![action("x"), action("y")];
        let graph =
            WorkflowGraph::build(&nodes, &edges(&[("x", "y"), ("y", "x")]), &["x".to_string()])
                .unwrap();
        assert_eq!(graph.incoming("x"), 0);
        assert_eq!(graph.incoming("y"), 1);
    }

    #[test]
    fn test_unknown_edge_endpoint() {
        let nodes = vec![action("a")];
        let err = WorkflowGraph::build(&nodes, &edges(&[("a", "missing")]), &[]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownNode {
                from: "a".into(),
                to: "missing".into(),
                missing: "missing".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_node_id() {
        let nodes = vec![action("a"), action("a")];
        let err = WorkflowGraph::build(&nodes, &[], &[]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("a".into()));
    }

    #[test]
    fn test_parallel_edges_count_twice() {
        let nodes = vec![action("a"), action("b")];
        let graph = WorkflowGraph::build(&nodes, &edges(&[("a", "b"), ("a", "b")]), &[]).unwrap();
        assert_eq!(graph.incoming("b"), 2);
        assert_eq!(graph.targets("a").len(), 2);
    }
}
