//! Compiled flow and the action-guided runner.
//!
//! The runner is deliberately oblivious to checkpoints: it always walks from
//! the start node, and the wrapper decides whether a node actually runs or
//! replays its recorded action. Resume therefore needs no special runner
//! path.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{FlowError, Result};
use crate::store::SharedState;

use super::wrapper::InstrumentedNodeWrapper;

/// Record of one node visit during a run, kept for result reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRun {
    pub node_id: String,
    pub action: String,
    pub cached: bool,
    pub duration_ms: Option<f64>,
}

/// An executable workflow: wrapped nodes plus the successor table compiled
/// from the IR's edges.
pub struct CompiledFlow {
    start: String,
    nodes: HashMap<String, InstrumentedNodeWrapper>,
    /// node id → action → successor node id
    successors: HashMap<String, HashMap<String, String>>,
    run_log: Vec<NodeRun>,
}

impl std::fmt::Debug for CompiledFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFlow")
            .field("start", &self.start)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CompiledFlow {
    pub fn new(
        start: String,
        nodes: HashMap<String, InstrumentedNodeWrapper>,
        successors: HashMap<String, HashMap<String, String>>,
    ) -> Self {
        Self {
            start,
            nodes,
            successors,
            run_log: Vec::new(),
        }
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Per-node visit records from the most recent [`Self::run`].
    pub fn run_log(&self) -> &[NodeRun] {
        &self.run_log
    }

    /// Drives the flow to completion and returns the final action.
    ///
    /// Starting from the start node: run the current node's wrapper, read
    /// the returned action, follow the successor registered under that
    /// action. No successor for an action is the normal terminal condition.
    /// A node error short-circuits the remainder of the graph.
    pub fn run(&mut self, shared: &mut SharedState) -> Result<String> {
        self.run_log.clear();
        let mut current = self.start.clone();

        loop {
            let wrapper = self.nodes.get_mut(&current).ok_or_else(|| {
                FlowError::Configuration {
                    message: format!("flow references unknown node '{current}'"),
                }
            })?;
            let outcome = wrapper.execute(shared)?;
            let action = outcome.action().to_string();
            self.run_log.push(NodeRun {
                node_id: current.clone(),
                action: action.clone(),
                cached: outcome.is_cached(),
                duration_ms: outcome.duration_ms(),
            });

            match self
                .successors
                .get(&current)
                .and_then(|by_action| by_action.get(&action))
            {
                Some(next) => {
                    debug!(from = %current, action = %action, to = %next, "following edge");
                    current = next.clone();
                }
                None => {
                    debug!(node = %current, action = %action, "terminal node reached");
                    return Ok(action);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DEFAULT_ACTION;
    use crate::nodes::Node;
    use crate::store::NamespacedStore;
    use crate::template::ResolveMode;
    use serde_json::{json, Map, Value};
    use std::collections::HashSet;

    #[derive(Debug)]
    struct ActionNode {
        params: Map<String, Value>,
    }

    impl ActionNode {
        fn new() -> Self {
            Self { params: Map::new() }
        }
    }

    impl Node for ActionNode {
        fn set_params(&mut self, params: Map<String, Value>) {
            self.params = params;
        }

        fn params(&self) -> &Map<String, Value> {
            &self.params
        }

        fn post(
            &mut self,
            store: &mut NamespacedStore<'_>,
            _prep: Value,
            _exec: Value,
        ) -> crate::error::Result<String> {
            store.insert("visited", json!(true));
            let action = self
                .params
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_ACTION);
            Ok(action.to_string())
        }
    }

    fn wrapper(id: &str, params: Value) -> InstrumentedNodeWrapper {
        InstrumentedNodeWrapper::new(
            id,
            "action",
            Box::new(ActionNode::new()),
            params.as_object().cloned().unwrap_or_default(),
            None,
            HashSet::new(),
            ResolveMode::Strict,
            true,
        )
    }

    fn linear_flow(ids: &[&str]) -> CompiledFlow {
        let mut nodes = HashMap::new();
        let mut successors: HashMap<String, HashMap<String, String>> = HashMap::new();
        for pair in ids.windows(2) {
            successors
                .entry(pair[0].to_string())
                .or_default()
                .insert(DEFAULT_ACTION.to_string(), pair[1].to_string());
        }
        for id in ids {
            nodes.insert(id.to_string(), wrapper(id, json!({})));
        }
        CompiledFlow::new(ids[0].to_string(), nodes, successors)
    }

    #[test]
    fn runs_nodes_in_edge_order() {
        let mut flow = linear_flow(&["a", "b", "c"]);
        let mut shared = SharedState::new();
        let action = flow.run(&mut shared).unwrap();
        assert_eq!(action, DEFAULT_ACTION);
        assert_eq!(
            shared.execution().completed_nodes,
            ["a", "b", "c"],
            "nodes complete in traversal order"
        );
        let visited: Vec<&str> = flow.run_log().iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(visited, ["a", "b", "c"]);
    }

    #[test]
    fn action_selects_branch() {
        let mut nodes = HashMap::new();
        nodes.insert("router".to_string(), wrapper("router", json!({"action": "retry"})));
        nodes.insert("retry-path".to_string(), wrapper("retry-path", json!({})));
        nodes.insert("default-path".to_string(), wrapper("default-path", json!({})));

        let mut successors: HashMap<String, HashMap<String, String>> = HashMap::new();
        let branches = successors.entry("router".to_string()).or_default();
        branches.insert("retry".to_string(), "retry-path".to_string());
        branches.insert(DEFAULT_ACTION.to_string(), "default-path".to_string());

        let mut flow = CompiledFlow::new("router".to_string(), nodes, successors);
        let mut shared = SharedState::new();
        flow.run(&mut shared).unwrap();

        assert!(shared.namespace("retry-path").is_some());
        assert!(shared.namespace("default-path").is_none());
    }

    #[test]
    fn unmatched_action_terminates_normally() {
        let mut nodes = HashMap::new();
        nodes.insert("only".to_string(), wrapper("only", json!({"action": "nothing-listens"})));
        let mut flow = CompiledFlow::new("only".to_string(), nodes, HashMap::new());
        let mut shared = SharedState::new();
        let action = flow.run(&mut shared).unwrap();
        assert_eq!(action, "nothing-listens");
    }
}
