//! # IR Validation
//!
//! Structural and cross-referential validation of a [`WorkflowIr`] before
//! compilation. Every check collects into one error list instead of stopping
//! at the first problem — callers driving LLM repair need to see all
//! problems at once.
//!
//! Structural checks are fail-fast: when the graph itself is malformed the
//! cross-referential checks (which assume resolvable node ids) are skipped.
//!
//! ## Template-variable validation
//!
//! Every `${root.path}` with a dotted path must anchor to a declared input,
//! another node's id, or a reserved key; a node-output reference is valid
//! only when the referenced node is upstream of the referencing one. Bare
//! roots (`${maybe_runtime_value}`) are deliberately not validated — an
//! upstream node or the caller may materialize them at runtime, and the
//! strict/permissive resolution modes own that failure.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde_json::{Map, Value};

use super::{
    is_valid_ir_version, is_valid_node_id, McpToolRef, WorkflowIr, RESERVED_WORKFLOW_NAMES,
    TYPE_CODE, TYPE_WORKFLOW,
};
use crate::error::ErrorRecord;
use crate::nodes::NodeRegistry;
use crate::store::is_special_key;
use crate::template::{parse, Segment, VarRef};

/// Sub-workflow executor parameters whose contents belong to the child's
/// template scope and must not be validated against the parent workflow.
const OPAQUE_WORKFLOW_PARAMS: &[&str] = &["workflow_ir"];

/// Runs every validation pass and returns the collected errors. An empty
/// vector means the workflow is valid.
///
/// `initial_params` are the caller-provided input values, consulted for
/// required-input checking. Node-type validation runs only when a registry
/// is supplied (the node library may be unavailable in planning contexts).
pub fn validate_workflow(
    ir: &WorkflowIr,
    initial_params: &Map<String, Value>,
    registry: Option<&NodeRegistry>,
) -> Vec<ErrorRecord> {
    let structural = validate_structure(ir);
    if !structural.is_empty() {
        return structural;
    }

    let mut errors = Vec::new();
    errors.extend(validate_templates(ir, initial_params));
    errors.extend(validate_outputs(ir));
    if let Some(registry) = registry {
        errors.extend(validate_node_types(ir, registry));
    }
    errors
}

/// Structural checks: shape of the IR independent of any cross-references.
pub fn validate_structure(ir: &WorkflowIr) -> Vec<ErrorRecord> {
    let mut errors = Vec::new();

    if !is_valid_ir_version(&ir.ir_version) {
        errors.push(ErrorRecord::validation(format!(
            "Invalid ir_version '{}': expected major.minor.patch",
            ir.ir_version
        )));
    }

    if ir.nodes.is_empty() {
        errors.push(ErrorRecord::validation(
            "Workflow must contain at least one node",
        ));
        return errors;
    }

    let mut seen_ids = HashSet::new();
    for node in &ir.nodes {
        if node.id.is_empty() {
            errors.push(ErrorRecord::validation("Node id must not be empty"));
            continue;
        }
        if !is_valid_node_id(&node.id) {
            errors.push(
                ErrorRecord::validation(format!(
                    "Invalid node id '{}': must match [A-Za-z][A-Za-z0-9_-]*",
                    node.id
                ))
                .with_node(&node.id),
            );
        }
        if !seen_ids.insert(node.id.as_str()) {
            errors.push(
                ErrorRecord::validation(format!("Duplicate node id '{}'", node.id))
                    .with_node(&node.id),
            );
        }
        if node.node_type.is_empty() {
            errors.push(
                ErrorRecord::validation(format!("Node '{}' has an empty type", node.id))
                    .with_node(&node.id),
            );
        }
    }

    for edge in &ir.edges {
        if !ir.has_node(&edge.from) {
            errors.push(ErrorRecord::validation(format!(
                "Edge references unknown source node '{}'",
                edge.from
            )));
        }
        if !ir.has_node(&edge.to) {
            errors.push(ErrorRecord::validation(format!(
                "Edge references unknown target node '{}'",
                edge.to
            )));
        }
        if edge.action.is_empty() {
            errors.push(ErrorRecord::validation(format!(
                "Edge '{}' -> '{}' has an empty action",
                edge.from, edge.to
            )));
        }
    }

    if let Some(start) = &ir.start_node {
        if !ir.has_node(start) {
            errors.push(ErrorRecord::validation(format!(
                "start_node '{start}' is not a node in the workflow"
            )));
        }
    }

    errors
}

/// Cross-referential template checks plus unused / missing input detection.
pub fn validate_templates(
    ir: &WorkflowIr,
    initial_params: &Map<String, Value>,
) -> Vec<ErrorRecord> {
    let mut errors = Vec::new();
    let node_ids: HashSet<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();
    let successors = adjacency(ir);

    let mut used_roots: BTreeSet<String> = BTreeSet::new();

    for node in &ir.nodes {
        let opaque: &[&str] = if node.node_type == TYPE_WORKFLOW {
            OPAQUE_WORKFLOW_PARAMS
        } else {
            &[]
        };
        for var in collect_params_vars(&node.params, opaque) {
            used_roots.insert(var.root().to_string());

            if !var.has_path() {
                // Bare roots may be materialized at runtime; resolution mode
                // owns that failure.
                continue;
            }
            let root = var.root();
            if ir.inputs.contains_key(root) || is_special_key(root) {
                continue;
            }
            if node_ids.contains(root) {
                if root == node.id {
                    errors.push(
                        ErrorRecord::validation(format!(
                            "Node '{}' references its own output '{}'",
                            node.id, var.raw
                        ))
                        .with_node(&node.id),
                    );
                } else if !is_upstream(&successors, root, &node.id) {
                    errors.push(
                        ErrorRecord::validation(format!(
                            "Node '{}' references '{}' but node '{}' is not upstream of it",
                            node.id, var.raw, root
                        ))
                        .with_node(&node.id),
                    );
                }
            } else {
                errors.push(
                    ErrorRecord::validation(format!(
                        "Node '{}' references unknown node or input '{}' in '{}'",
                        node.id, root, var.raw
                    ))
                    .with_node(&node.id),
                );
            }
        }
    }

    let unused: Vec<&str> = ir
        .inputs
        .keys()
        .filter(|name| !used_roots.contains(*name))
        .map(String::as_str)
        .collect();
    if !unused.is_empty() {
        errors.push(
            ErrorRecord::validation(format!(
                "Declared input(s) never used as template variable: {}",
                unused.join(", ")
            ))
            .with_user_action("Remove the unused input or reference it with ${...} in a node"),
        );
    }

    for (name, spec) in &ir.inputs {
        if spec.required && spec.default.is_none() && !initial_params.contains_key(name) {
            errors.push(
                ErrorRecord::validation(format!(
                    "Missing required input '{name}' (no value provided and no default declared)"
                ))
                .with_user_action("Provide the input value or declare a default"),
            );
        }
    }

    errors
}

/// Structural validation of declared output sources.
pub fn validate_outputs(ir: &WorkflowIr) -> Vec<ErrorRecord> {
    let mut errors = Vec::new();
    let node_ids: HashSet<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();

    for (name, output) in &ir.outputs {
        let Some(source) = &output.source else {
            continue;
        };
        for segment in parse(source) {
            let Segment::Var(var) = segment else { continue };
            let root = var.root();
            if node_ids.contains(root) || ir.inputs.contains_key(root) || is_special_key(root) {
                continue;
            }
            errors.push(ErrorRecord::validation(format!(
                "Output '{name}' source references unknown node or input '{root}' in '{}'",
                var.raw
            )));
        }
    }

    errors
}

/// Optional node-type validation against the registry. Reserved forms
/// (`workflow`, `code`, `mcp-<server>-<tool>`) never require registration of
/// the literal type name.
pub fn validate_node_types(ir: &WorkflowIr, registry: &NodeRegistry) -> Vec<ErrorRecord> {
    let mut errors = Vec::new();
    for node in &ir.nodes {
        let reserved = node.node_type == TYPE_WORKFLOW
            || node.node_type == TYPE_CODE
            || McpToolRef::parse(&node.node_type).is_some();
        if !reserved && !registry.contains(&node.node_type) {
            errors.push(
                ErrorRecord::new(
                    crate::error::ErrorCategory::MissingResource,
                    format!(
                        "Node '{}' has unknown type '{}'",
                        node.id, node.node_type
                    ),
                )
                .with_node(&node.id)
                .with_user_action("Register the node type or correct the spelling"),
            );
        }
    }
    errors
}

/// Checks a name against the reserved list. Applies only when saving a
/// workflow; execution never consults it.
pub fn validate_workflow_name(name: &str) -> Option<ErrorRecord> {
    let lowered = name.to_ascii_lowercase();
    if RESERVED_WORKFLOW_NAMES.contains(&lowered.as_str()) {
        return Some(ErrorRecord::validation(format!(
            "'{name}' is a reserved workflow name"
        )));
    }
    None
}

fn adjacency(ir: &WorkflowIr) -> HashMap<&str, Vec<&str>> {
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &ir.edges {
        successors
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
    }
    successors
}

// Breadth-first reachability over the edge graph, ignoring actions: an
// upstream reference is valid if some path of edges leads from the producer
// to the consumer.
fn is_upstream(successors: &HashMap<&str, Vec<&str>>, from: &str, to: &str) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(from);
    while let Some(current) = queue.pop_front() {
        if current == to {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = successors.get(current) {
            queue.extend(next.iter().copied());
        }
    }
    false
}

// Recursively collects template variables from a params mapping, skipping
// opaque parameters at the top level.
fn collect_params_vars(params: &Map<String, Value>, opaque: &[&str]) -> Vec<VarRef> {
    let mut vars = Vec::new();
    for (key, value) in params {
        if opaque.contains(&key.as_str()) {
            continue;
        }
        collect_value_vars(value, &mut vars);
    }
    vars
}

fn collect_value_vars(value: &Value, vars: &mut Vec<VarRef>) {
    match value {
        Value::String(text) => {
            for segment in parse(text) {
                if let Segment::Var(var) = segment {
                    vars.push(var);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_value_vars(item, vars);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_value_vars(item, vars);
            }
        }
        _ => {}
    }
}
