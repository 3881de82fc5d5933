//! Test support: fixture nodes and registry builders.
//!
//! Shared by the crate's own unit and integration tests, and usable by
//! embedders for testing workflows without a real node library.

use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};

use crate::error::{FlowError, Result};
use crate::ir::{ParamKind, DEFAULT_ACTION};
use crate::nodes::{Node, NodeInterface, NodeRegistry, ParamSpec};
use crate::store::NamespacedStore;

/// Writes its `value` parameter to the `out` key of its namespace.
#[derive(Debug, Default)]
pub struct EchoNode {
    params: Map<String, Value>,
}

impl Node for EchoNode {
    fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn post(
        &mut self,
        store: &mut NamespacedStore<'_>,
        _prep_res: Value,
        _exec_res: Value,
    ) -> Result<String> {
        let value = self.params.get("value").cloned().unwrap_or(Value::Null);
        store.insert("out", value);
        Ok(DEFAULT_ACTION.to_string())
    }
}

/// Fails in `exec` with the configured `message`. Used to drive error and
/// repair paths.
#[derive(Debug, Default)]
pub struct FailingNode {
    params: Map<String, Value>,
    message: Option<String>,
}

impl FailingNode {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            params: Map::new(),
            message: Some(message.into()),
        }
    }
}

impl Node for FailingNode {
    fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn exec(&mut self, _prep_res: Value) -> Result<Value> {
        let message = self
            .message
            .clone()
            .or_else(|| {
                self.params
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "intentional failure".to_string());
        Err(FlowError::node_failure(message))
    }
}

/// Increments a shared counter on every real execution, so checkpoint tests
/// can prove a node body did not re-run.
#[derive(Debug)]
pub struct CountingNode {
    params: Map<String, Value>,
    counter: Arc<Mutex<usize>>,
}

impl CountingNode {
    pub fn new(counter: Arc<Mutex<usize>>) -> Self {
        Self {
            params: Map::new(),
            counter,
        }
    }
}

impl Node for CountingNode {
    fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn exec(&mut self, _prep_res: Value) -> Result<Value> {
        let mut counter = self.counter.lock().expect("counter lock");
        *counter += 1;
        Ok(json!(format!("executed_{}", *counter)))
    }

    fn post(
        &mut self,
        store: &mut NamespacedStore<'_>,
        _prep_res: Value,
        exec_res: Value,
    ) -> Result<String> {
        store.insert("result", exec_res);
        Ok(DEFAULT_ACTION.to_string())
    }
}

/// Stand-in for the node library's generic MCP client: records the injected
/// server/tool parameters into its namespace.
#[derive(Debug, Default)]
pub struct McpRecorderNode {
    params: Map<String, Value>,
}

impl McpRecorderNode {
    pub const SEEN_SERVER: &'static str = "server";
    pub const SEEN_TOOL: &'static str = "tool";
}

impl Node for McpRecorderNode {
    fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn post(
        &mut self,
        store: &mut NamespacedStore<'_>,
        _prep_res: Value,
        _exec_res: Value,
    ) -> Result<String> {
        let server = self
            .params
            .get(crate::runtime::KEY_MCP_SERVER)
            .cloned()
            .unwrap_or(Value::Null);
        let tool = self
            .params
            .get(crate::runtime::KEY_MCP_TOOL)
            .cloned()
            .unwrap_or(Value::Null);
        store.insert(Self::SEEN_SERVER, server);
        store.insert(Self::SEEN_TOOL, tool);
        Ok(DEFAULT_ACTION.to_string())
    }
}

/// Copies its fully resolved params into its namespace under `params`.
/// Registered with typed `dict_param`/`list_param`/`str_param` metadata so
/// JSON auto-parsing can be observed end to end.
#[derive(Debug, Default)]
pub struct SinkNode {
    params: Map<String, Value>,
}

impl Node for SinkNode {
    fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn post(
        &mut self,
        store: &mut NamespacedStore<'_>,
        _prep_res: Value,
        _exec_res: Value,
    ) -> Result<String> {
        store.insert("params", Value::Object(self.params.clone()));
        Ok(DEFAULT_ACTION.to_string())
    }
}

/// Records what it can see: the root value keys, the nesting depth, and the
/// ancestor stack length. Used to verify storage isolation modes.
#[derive(Debug, Default)]
pub struct SnoopNode {
    params: Map<String, Value>,
}

impl Node for SnoopNode {
    fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn prep(&mut self, store: &mut NamespacedStore<'_>) -> Result<Value> {
        let root = store.root();
        let mut keys: Vec<String> = root.values.keys().cloned().collect();
        keys.sort();
        Ok(json!({
            "seen_keys": keys,
            "depth": root.depth(),
            "stack_len": root.stack().len(),
        }))
    }

    fn post(
        &mut self,
        store: &mut NamespacedStore<'_>,
        prep_res: Value,
        _exec_res: Value,
    ) -> Result<String> {
        store.insert("observed", prep_res);
        Ok(DEFAULT_ACTION.to_string())
    }
}

fn sink_interface() -> NodeInterface {
    NodeInterface {
        params: vec![
            ParamSpec {
                key: "dict_param".into(),
                kind: ParamKind::Object,
                required: false,
                description: None,
            },
            ParamSpec {
                key: "list_param".into(),
                kind: ParamKind::Array,
                required: false,
                description: None,
            },
            ParamSpec {
                key: "str_param".into(),
                kind: ParamKind::String,
                required: false,
                description: None,
            },
        ],
    }
}

/// Registry with the fixture nodes: `echo`, `fail`, `sink`, `snoop`, and
/// the generic `mcp` recorder.
pub fn base_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register("echo", || Box::new(EchoNode::default()));
    registry.register("fail", || Box::new(FailingNode::default()));
    registry.register_with_interface("sink", sink_interface(), || Box::new(SinkNode::default()));
    registry.register("snoop", || Box::new(SnoopNode::default()));
    registry.register(crate::runtime::GENERIC_MCP_TYPE, || {
        Box::new(McpRecorderNode::default())
    });
    registry
}

/// [`base_registry`] wrapped for the compiler's `Arc` signature.
pub fn test_registry() -> Arc<NodeRegistry> {
    Arc::new(base_registry())
}

/// Registers a `counting` node type backed by the given counter.
pub fn register_counting(registry: &mut NodeRegistry, counter: Arc<Mutex<usize>>) {
    registry.register("counting", move || {
        Box::new(CountingNode::new(Arc::clone(&counter)))
    });
}
