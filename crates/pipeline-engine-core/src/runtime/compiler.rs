//! IR → executable flow compilation.
//!
//! Compilation is declarative and idempotent: the same IR can be re-compiled
//! after a repair pass with no side effects. Node constructors come from the
//! registry table; the two reserved forms the engine itself understands are
//! `workflow` (sub-workflow composition, built here) and `mcp-<server>-<tool>`
//! (resolved to the generic MCP client registered under `mcp`, with the
//! parsed server/tool injected as special parameters).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FlowError, Result};
use crate::ir::{validator, McpToolRef, WorkflowIr, TYPE_WORKFLOW};
use crate::nodes::{Node, NodeInterface, NodeRegistry, WorkflowLibrary};
use crate::template::ResolveMode;

use super::flow::CompiledFlow;
use super::sub_workflow::SubWorkflowNode;
use super::wrapper::InstrumentedNodeWrapper;

/// Registry key under which the node library provides its generic MCP
/// client. `mcp-*` node types all construct through it.
pub const GENERIC_MCP_TYPE: &str = "mcp";

/// Special parameter carrying the parsed MCP server name.
pub const KEY_MCP_SERVER: &str = "__mcp_server__";
/// Special parameter carrying the parsed MCP tool name.
pub const KEY_MCP_TOOL: &str = "__mcp_tool__";

/// Sub-workflow parameters never template-resolved in the parent's scope.
const WORKFLOW_OPAQUE_PARAMS: &[&str] = &["workflow_ir"];

/// Compilation knobs.
pub struct CompileOptions {
    /// Run the validator before compiling. On by default; the orchestrator
    /// turns it off after validating with the real execution params.
    pub validate: bool,
    /// Template-resolution failure mode for every node in the flow.
    pub mode: ResolveMode,
    /// Workflow library handed to sub-workflow nodes for `workflow_name`
    /// resolution.
    pub library: Option<Arc<dyn WorkflowLibrary>>,
    /// Caller-provided input values, consulted by validation only.
    pub initial_params: Map<String, Value>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            validate: true,
            mode: ResolveMode::default(),
            library: None,
            initial_params: Map::new(),
        }
    }
}

/// Compiles a workflow IR into an executable flow of wrapped nodes.
pub fn compile_ir_to_flow(
    ir: &WorkflowIr,
    registry: &Arc<NodeRegistry>,
    options: &CompileOptions,
) -> Result<CompiledFlow> {
    if options.validate {
        let errors = validator::validate_workflow(ir, &options.initial_params, Some(registry));
        if !errors.is_empty() {
            let combined = errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FlowError::Validation { message: combined });
        }
    }

    let start = ir
        .start_node_id()
        .ok_or_else(|| FlowError::Validation {
            message: "Workflow must contain at least one node".to_string(),
        })?
        .to_string();

    let mut nodes = HashMap::with_capacity(ir.nodes.len());
    for spec in &ir.nodes {
        let compiled = compile_node(spec, ir, registry, options)?;
        nodes.insert(spec.id.clone(), compiled);
    }

    let mut successors: HashMap<String, HashMap<String, String>> = HashMap::new();
    for edge in &ir.edges {
        successors
            .entry(edge.from.clone())
            .or_default()
            .insert(edge.action.clone(), edge.to.clone());
    }

    debug!(nodes = ir.nodes.len(), edges = ir.edges.len(), start = %start, "compiled workflow");
    Ok(CompiledFlow::new(start, nodes, successors))
}

fn compile_node(
    spec: &crate::ir::NodeSpec,
    ir: &WorkflowIr,
    registry: &Arc<NodeRegistry>,
    options: &CompileOptions,
) -> Result<InstrumentedNodeWrapper> {
    let mut params = spec.params.clone();
    let mut opaque_params: HashSet<String> = HashSet::new();
    let interface: Option<NodeInterface>;

    let inner: Box<dyn Node> = if spec.node_type == TYPE_WORKFLOW {
        // The composition node is part of the engine, not the node library.
        // It gets the registry so the child compiles against the same table.
        for key in WORKFLOW_OPAQUE_PARAMS {
            opaque_params.insert((*key).to_string());
        }
        interface = None;
        Box::new(SubWorkflowNode::new(
            Arc::clone(registry),
            options.library.clone(),
            options.mode,
        ))
    } else if let Some(mcp) = McpToolRef::parse(&spec.node_type) {
        params.insert(KEY_MCP_SERVER.to_string(), Value::from(mcp.server));
        params.insert(KEY_MCP_TOOL.to_string(), Value::from(mcp.tool));
        interface = registry
            .interface(&spec.node_type)
            .or_else(|| registry.interface(GENERIC_MCP_TYPE))
            .cloned();
        registry.create(GENERIC_MCP_TYPE)?
    } else {
        interface = registry.interface(&spec.node_type).cloned();
        registry.create(&spec.node_type)?
    };

    let mut inner = inner;
    inner.set_params(params.clone());

    Ok(InstrumentedNodeWrapper::new(
        &spec.id,
        &spec.node_type,
        inner,
        params,
        interface,
        opaque_params,
        options.mode,
        ir.enable_namespacing,
    ))
}
