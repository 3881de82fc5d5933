//! # Workflow Intermediate Representation
//!
//! The declarative, graph-shaped description of a workflow: an ordered set of
//! [`NodeSpec`]s connected by labeled [`EdgeSpec`]s, plus declared inputs and
//! outputs. The IR is the on-the-wire form — a JSON-serializable mapping —
//! that callers hand to the compiler.
//!
//! An IR is validated once (see [`validator`]), compiled into an executable
//! flow, run zero or more times, and discarded. Compiled flows are never
//! persisted; the IR is the durable artifact.
//!
//! ```rust
//! use pipeline_engine_core::ir::WorkflowIr;
//! use serde_json::json;
//!
//! let ir: WorkflowIr = serde_json::from_value(json!({
//!     "ir_version": "0.1.0",
//!     "nodes": [
//!         {"id": "fetch", "type": "http", "params": {"url": "${endpoint}"}},
//!         {"id": "store", "type": "write-file", "params": {"path": "out.json"}}
//!     ],
//!     "edges": [{"from": "fetch", "to": "store"}],
//!     "inputs": {"endpoint": {"type": "string"}}
//! })).unwrap();
//!
//! assert_eq!(ir.start_node_id(), Some("fetch"));
//! ```

pub mod validator;

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};

/// Current IR schema version.
pub const IR_VERSION: &str = "0.1.0";

/// Edge action taken when a node's `post` step does not choose another.
pub const DEFAULT_ACTION: &str = "default";

/// Reserved node type executed by the engine itself (sub-workflow composition).
pub const TYPE_WORKFLOW: &str = "workflow";

/// Reserved node type for inline code nodes (provided by the node library).
pub const TYPE_CODE: &str = "code";

/// Prefix marking MCP tool nodes (`mcp-<server>-<tool>`).
pub const MCP_TYPE_PREFIX: &str = "mcp-";

/// Names a workflow may not be saved under.
pub const RESERVED_WORKFLOW_NAMES: &[&str] = &[
    "null", "undefined", "none", "test", "settings", "registry", "workflow", "mcp",
];

static NODE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("node id pattern is valid")
});

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("version pattern is valid"));

/// Returns true if `id` is a well-formed node identifier.
pub fn is_valid_node_id(id: &str) -> bool {
    NODE_ID_PATTERN.is_match(id)
}

/// Returns true if `version` is a well-formed `major.minor.patch` string.
pub fn is_valid_ir_version(version: &str) -> bool {
    VERSION_PATTERN.is_match(version)
}

fn default_ir_version() -> String {
    IR_VERSION.to_string()
}

fn default_action() -> String {
    DEFAULT_ACTION.to_string()
}

fn default_true() -> bool {
    true
}

// An explicit `"default": null` must seed null, which is different from the
// field being absent. Wrapping the raw value keeps that distinction.
fn deserialize_explicit_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// The on-the-wire workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowIr {
    /// Schema version, `major.minor.patch`.
    #[serde(default = "default_ir_version")]
    pub ir_version: String,

    /// Ordered, non-empty sequence of nodes. The first node is the default
    /// start node.
    pub nodes: Vec<NodeSpec>,

    /// Labeled transitions between nodes. May be empty.
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,

    /// Explicit start node id; defaults to the first declared node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node: Option<String>,

    /// Declared workflow parameters, keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputSpec>,

    /// Declared workflow outputs, keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputSpec>,

    /// Route each node's writes into its own `shared[node_id]` sub-mapping.
    #[serde(default = "default_true")]
    pub enable_namespacing: bool,
}

impl WorkflowIr {
    /// Applies on-demand normalization: fills in a missing `ir_version` and
    /// guarantees `edges` is present. Idempotent.
    pub fn normalize(&mut self) {
        if self.ir_version.is_empty() {
            self.ir_version = default_ir_version();
        }
        // `edges` is materialized by deserialization; nothing further to do.
    }

    /// The effective start node id: explicit `start_node` if set, otherwise
    /// the first declared node.
    pub fn start_node_id(&self) -> Option<&str> {
        self.start_node
            .as_deref()
            .or_else(|| self.nodes.first().map(|n| n.id.as_str()))
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Parses an IR from a JSON value, accepting either a raw IR object or an
    /// IR wrapped under a top-level `ir` key (the stored-with-metadata form).
    pub fn from_json_value(value: Value) -> Result<Self> {
        let ir_value = match value {
            Value::Object(ref obj) if obj.contains_key("ir") && !obj.contains_key("nodes") => {
                obj.get("ir").cloned().unwrap_or(Value::Null)
            }
            other => other,
        };
        if !ir_value.is_object() {
            return Err(FlowError::Validation {
                message: "Workflow definition must be a JSON object".to_string(),
            });
        }
        let mut ir: WorkflowIr = serde_json::from_value(ir_value)?;
        ir.normalize();
        Ok(ir)
    }
}

/// One unit of work in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique within the workflow; `[A-Za-z][A-Za-z0-9_-]*`.
    pub id: String,

    /// A registry key, or one of the reserved types `workflow`, `code`,
    /// `mcp-<server>-<tool>`.
    #[serde(rename = "type")]
    pub node_type: String,

    /// Free-text description of what this node is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,

    /// Configuration values, possibly containing template expressions.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// A labeled transition between two nodes.
///
/// The edge is taken when the source node's `post` step returns the matching
/// action name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
    #[serde(default = "default_action")]
    pub action: String,
}

/// JSON value kinds used for input declarations and parameter metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "int")]
    Integer,
    Number,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "list")]
    Array,
    #[serde(alias = "dict")]
    Object,
    #[default]
    Any,
}

impl ParamKind {
    /// True for the container kinds eligible for JSON auto-parsing.
    pub fn is_structured(self) -> bool {
        matches!(self, ParamKind::Array | ParamKind::Object)
    }

    /// Whether `value` already has this kind.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Any => true,
        }
    }
}

/// Declaration of one workflow parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type", default)]
    pub kind: ParamKind,

    /// Whether the caller must supply a value (or a default must exist).
    #[serde(default = "default_true")]
    pub required: bool,

    /// Value seeded when the caller omits the parameter. An explicit `null`
    /// is a real default and distinct from the field being absent.
    #[serde(
        default,
        deserialize_with = "deserialize_explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// If true the value is piped on stdin rather than passed as an argument.
    #[serde(default)]
    pub stdin: bool,
}

/// Declaration of one workflow output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Template expression identifying the value in the final shared state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ParamKind>,
}

/// Parsed reference to an MCP tool node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpToolRef {
    pub server: String,
    pub tool: String,
}

impl McpToolRef {
    /// Splits `mcp-<server>-<tool>` at the first two `-` separators;
    /// underscores in the tool name are preserved. A bare `mcp-` prefix with
    /// no server or no tool is not an MCP reference.
    pub fn parse(node_type: &str) -> Option<Self> {
        let rest = node_type.strip_prefix(MCP_TYPE_PREFIX)?;
        let (server, tool) = rest.split_once('-')?;
        if server.is_empty() || tool.is_empty() {
            return None;
        }
        Some(Self {
            server: server.to_string(),
            tool: tool.to_string(),
        })
    }
}
