//! # Workflow Node System
//!
//! Nodes are the units of work a workflow executes. The engine only ever
//! sees them through the [`Node`] capability trait — the node library itself
//! (shell, HTTP, LLM, file I/O) lives outside the core and plugs in through
//! the [`registry::NodeRegistry`] table of constructors.
//!
//! ## Lifecycle
//!
//! A node executes in three phases:
//!
//! 1. `prep` — read whatever it needs from the (namespaced) shared state;
//! 2. `exec` — do the work on the prepared value, without store access;
//! 3. `post` — write results back and choose the outgoing edge by returning
//!    an action name.
//!
//! The provided [`Node::run`] chains the phases. Composition nodes that need
//! full control of the store across all phases (the sub-workflow executor)
//! override `run` directly.
//!
//! ```rust
//! use pipeline_engine_core::nodes::Node;
//! use pipeline_engine_core::store::NamespacedStore;
//! use pipeline_engine_core::error::Result;
//! use serde_json::{json, Map, Value};
//!
//! #[derive(Debug, Default)]
//! struct UppercaseNode {
//!     params: Map<String, Value>,
//! }
//!
//! impl Node for UppercaseNode {
//!     fn set_params(&mut self, params: Map<String, Value>) {
//!         self.params = params;
//!     }
//!
//!     fn params(&self) -> &Map<String, Value> {
//!         &self.params
//!     }
//!
//!     fn exec(&mut self, prep_res: Value) -> Result<Value> {
//!         let text = self.params.get("text").and_then(Value::as_str).unwrap_or("");
//!         let _ = prep_res;
//!         Ok(json!(text.to_uppercase()))
//!     }
//!
//!     fn post(
//!         &mut self,
//!         store: &mut NamespacedStore<'_>,
//!         _prep_res: Value,
//!         exec_res: Value,
//!     ) -> Result<String> {
//!         store.insert("output", exec_res);
//!         Ok("default".to_string())
//!     }
//! }
//! ```

pub mod registry;

pub use registry::{InMemoryWorkflowLibrary, NodeFactory, NodeRegistry, WorkflowLibrary};

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::ir::{ParamKind, DEFAULT_ACTION};
use crate::store::NamespacedStore;

/// Base trait for all workflow nodes.
///
/// Implementations must be `Send` (compiled flows may be handed between
/// threads) and `Debug`. Parameters are set by the compiler from the node's
/// IR spec and re-set by the wrapper with template-resolved values before
/// every run.
pub trait Node: Send + Debug {
    /// Stores the node's parameter mapping.
    fn set_params(&mut self, params: Map<String, Value>);

    /// The node's current parameter mapping.
    fn params(&self) -> &Map<String, Value>;

    /// Gathers inputs from the shared state. Defaults to no preparation.
    fn prep(&mut self, store: &mut NamespacedStore<'_>) -> Result<Value> {
        let _ = store;
        Ok(Value::Null)
    }

    /// Performs the node's work. Defaults to passing the prepared value
    /// through.
    fn exec(&mut self, prep_res: Value) -> Result<Value> {
        Ok(prep_res)
    }

    /// Writes results and picks the outgoing action. Defaults to storing
    /// nothing and following the `default` edge.
    fn post(
        &mut self,
        store: &mut NamespacedStore<'_>,
        prep_res: Value,
        exec_res: Value,
    ) -> Result<String> {
        let _ = (store, prep_res, exec_res);
        Ok(DEFAULT_ACTION.to_string())
    }

    /// Runs the full `prep → exec → post` lifecycle.
    fn run(&mut self, store: &mut NamespacedStore<'_>) -> Result<String> {
        let prep_res = self.prep(store)?;
        let exec_res = self.exec(prep_res.clone())?;
        self.post(store, prep_res, exec_res)
    }
}

/// Declared interface of a node type: the parameter metadata the wrapper
/// uses for type-aware JSON auto-parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInterface {
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl NodeInterface {
    /// Declared kind of a parameter, if the interface describes it.
    pub fn param_kind(&self, key: &str) -> Option<ParamKind> {
        self.params.iter().find(|p| p.key == key).map(|p| p.kind)
    }
}

/// Metadata for a single node parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub key: String,
    #[serde(rename = "type", default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default)]
    struct PassthroughNode {
        params: Map<String, Value>,
    }

    impl Node for PassthroughNode {
        fn set_params(&mut self, params: Map<String, Value>) {
            self.params = params;
        }

        fn params(&self) -> &Map<String, Value> {
            &self.params
        }
    }

    #[test]
    fn default_lifecycle_returns_default_action() {
        let mut shared = crate::store::SharedState::new();
        let mut store = NamespacedStore::new(&mut shared, "n", true);
        let mut node = PassthroughNode::default();
        assert_eq!(node.run(&mut store).unwrap(), DEFAULT_ACTION);
    }

    #[test]
    fn interface_lookup_by_key() {
        let interface: NodeInterface = serde_json::from_value(json!({
            "params": [
                {"key": "body", "type": "object"},
                {"key": "url", "type": "string", "required": true}
            ]
        }))
        .unwrap();
        assert_eq!(interface.param_kind("body"), Some(ParamKind::Object));
        assert_eq!(interface.param_kind("url"), Some(ParamKind::String));
        assert_eq!(interface.param_kind("missing"), None);
    }
}
