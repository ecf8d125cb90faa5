//! Mutable state for a single scheduler pass.
//!
//! `RunState` owns the per-node results, the outputs visible to template
//! references, the run variables, and the dependency counters that decide
//! when a node becomes ready or is skipped.

use std::collections::{HashMap, HashSet, VecDeque};

use courier_types::workflow::{sanitize_node_id, ExecutionResult, NodeOutput, RunOutcome};
use serde_json::{json, Value};

use super::graph::WorkflowGraph;

/// What resolving one incoming edge did to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeResolution {
    /// Other incoming edges are still unresolved.
    Pending,
    /// All incoming edges resolved and at least one allowed the target.
    Ready,
    /// All incoming edges resolved and none allowed the target.
    Blocked,
}

#[derive(Debug, Default)]
pub struct RunState {
    pub results: HashMap<String, ExecutionResult>,
    /// Keyed by sanitized node ID.
    pub outputs: HashMap<String, NodeOutput>,
    pub variables: HashMap<String, Value>,
    resolved: HashSet<String>,
    satisfied: HashMap<String, usize>,
    blocked: HashMap<String, usize>,
    ready: VecDeque<String>,
}

impl RunState {
    pub fn new(initial_variables: HashMap<String, Value>) -> Self {
        Self {
            variables: initial_variables,
            ..Self::default()
        }
    }

    pub fn enqueue(&mut self, node_id: &str) {
        self.ready.push_back(node_id.to_string());
    }

    pub fn pop_ready(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    pub fn is_resolved(&self, node_id: &str) -> bool {
        self.resolved.contains(node_id)
    }

    /// Record a node's result and publish its output under the sanitized ID.
    pub fn record(&mut self, node_id: &str, label: &str, result: ExecutionResult) {
        self.outputs.insert(
            sanitize_node_id(node_id),
            NodeOutput {
                label: label.to_string(),
                data: result.data.clone().unwrap_or(Value::Null),
            },
        );
        self.results.insert(node_id.to_string(), result);
        self.resolved.insert(node_id.to_string());
    }

    /// Count one incoming edge of `target` as resolved.
    ///
    /// Nodes that are already resolved (forced start nodes) ignore late edges.
    pub fn resolve_edge(&mut self, target: &str, allowed: bool, incoming: usize) -> EdgeResolution {
        if self.is_resolved(target) {
            return EdgeResolution::Pending;
        }

        let counter = if allowed {
            &mut self.satisfied
        } else {
            &mut self.blocked
        };
        *counter.entry(target.to_string()).or_insert(0) += 1;

        let satisfied = self.satisfied.get(target).copied().unwrap_or(0);
        let blocked = self.blocked.get(target).copied().unwrap_or(0);

        if satisfied + blocked != incoming {
            EdgeResolution::Pending
        } else if satisfied > 0 {
            EdgeResolution::Ready
        } else {
            EdgeResolution::Blocked
        }
    }

    /// Propagate the outcome of `source` along its outgoing edges.
    ///
    /// Targets whose every incoming edge is blocked are skipped, and the skip
    /// cascades downstream.
    pub fn propagate(&mut self, graph: &WorkflowGraph, source: &str, allowed: bool) {
        for target in graph.targets(source) {
            match self.resolve_edge(target, allowed, graph.incoming(target)) {
                EdgeResolution::Pending => {}
                EdgeResolution::Ready => self.enqueue(target),
                EdgeResolution::Blocked => self.skip(graph, target),
            }
        }
    }

    /// Mark `node_id` skipped and block everything downstream of it.
    pub fn skip(&mut self, graph: &WorkflowGraph, node_id: &str) {
        if self.is_resolved(node_id) {
            return;
        }
        tracing::debug!(node_id, "skipping node");
        let label = graph.node(node_id).map(|n| n.label.as_str()).unwrap_or_default();
        self.record(node_id, label, ExecutionResult::skipped());
        self.propagate(graph, node_id, false);
    }

    /// A run succeeds only if every recorded node succeeded. Skipped nodes
    /// count as failures.
    pub fn all_succeeded(&self) -> bool {
        self.results.values().all(|r| r.success)
    }

    /// IDs of nodes that did not succeed, sorted.
    pub fn failed_nodes(&self) -> Vec<&str> {
        let mut failed: Vec<&str> = self
            .results
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(id, _)| id.as_str())
            .collect();
        failed.sort_unstable();
        failed
    }

    /// Snapshot of outputs and variables for the execution record.
    pub fn snapshot(&self) -> Value {
        json!({
            "results": self.results,
            "variables": self.variables,
        })
    }

    pub fn into_outcome(self, success: bool, error: Option<String>) -> RunOutcome {
        RunOutcome {
            success,
            results: self.results,
            outputs: self.outputs,
            error,
            ..RunOutcome::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::workflow::{Edge, Node, NodeConfig, NodeKind};

    fn graph(ids: &[&str], pairs: &[(&str, &str)]) -> WorkflowGraph {
        let nodes: Vec<Node> = ids
            .iter()
            .map(|id| Node {
                id: id.to_string(),
                kind: NodeKind::Action,
                label: format!("L-{id}"),
                enabled: true,
                config: NodeConfig::default(),
            })
            .collect();
        let edges: Vec<Edge> = pairs.iter().map(|(s, t)| Edge::new(*s, *t)).collect();
        WorkflowGraph::build(&nodes, &edges, &[]).unwrap()
    }

    #[test]
    fn test_record_publishes_sanitized_output() {
        let mut state = RunState::new(HashMap::new());
        state.record("node-1", "First", ExecutionResult::ok(json!({ "x": 1 })));

        assert!(state.is_resolved("node-1"));
        assert_eq!(state.outputs["node_1"].label, "First");
        assert_eq!(state.outputs["node_1"].data, json!({ "x": 1 }));
        assert!(state.all_succeeded());
    }

    #[test]
    fn test_join_ready_when_any_parent_allows() {
        let g = graph(&["a", "b", "c"], &[("a", "c"), ("b", "c")]);
        let mut state = RunState::new(HashMap::new());

        state.propagate(&g, "a", false);
        assert!(state.pop_ready().is_none(), "still waiting on b");
        state.propagate(&g, "b", true);
        assert_eq!(state.pop_ready().as_deref(), Some("c"));
    }

    #[test]
    fn test_skip_cascades_when_all_parents_block() {
        let g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]);
        let mut state = RunState::new(HashMap::new());
        state.record("a", "A", ExecutionResult::failure("boom"));

        state.propagate(&g, "a", false);

        for id in ["b", "c", "d"] {
            assert!(state.results[id].is_skipped(), "{id} should be skipped");
            assert_eq!(state.outputs[id].data, Value::Null);
        }
        assert!(!state.all_succeeded());
        assert_eq!(state.failed_nodes(), vec!["a", "b", "c", "d"]);
        assert!(state.pop_ready().is_none());
    }

    #[test]
    fn test_resolved_targets_ignore_late_edges() {
        let g = graph(&["a", "b"], &[("a", "b")]);
        let mut state = RunState::new(HashMap::new());
        state.record("b", "B", ExecutionResult::ok(Value::Null));

        assert_eq!(state.resolve_edge("b", true, 1), EdgeResolution::Pending);
        state.propagate(&g, "a", false);
        assert!(!state.results["b"].is_skipped());
    }
}
